#![allow(dead_code)]

use anyhow::{anyhow, Result};
use bigdecimal::BigDecimal;
use serde_json::json;

use attest_negotiation::crypto::Wallet;
use attest_negotiation::db::model::Attestation;
use attest_negotiation::negotiation::{ExternalAction, JobDetailsRequest};
use attest_negotiation::service::Wallets;
use attest_negotiation::testing::{MockNode, NegotiationNetwork};
use attest_negotiation::AttestationType;

pub const ATTESTER: &str = "Attester";
pub const REQUESTER: &str = "Requester";

pub const ATTESTER_ARGS: &[&str] = &[
    "--attester-types",
    "phone",
    "--acceptable-rewards",
    r#"{"phone":"5"}"#,
    "--approved-requesters",
    r#"{"any":true}"#,
    "--ping-enabled",
    "false",
];

pub const REQUESTER_ARGS: &[&str] = &[
    "--approved-attesters",
    r#"{"any":true}"#,
    "--ping-enabled",
    "false",
];

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn attester_wallets() -> Wallets {
    Wallets {
        attester: Some(Wallet::random()),
        requester: None,
    }
}

pub fn requester_wallets() -> Wallets {
    Wallets {
        attester: None,
        requester: Some(Wallet::random()),
    }
}

/// Attester and requester with the given extra arguments, listening and
/// with the requester's escrow funded on the attester's ledger.
pub async fn market(
    test_name: &str,
    attester_args: &[&str],
    requester_args: &[&str],
) -> Result<NegotiationNetwork> {
    init_logger();
    let network = NegotiationNetwork::new(test_name)?
        .add_node(ATTESTER, attester_args, attester_wallets())
        .await?
        .add_node(REQUESTER, requester_args, requester_wallets())
        .await?;
    network.settle().await?;

    let requester = network.node(REQUESTER).requester_wallet().address();
    network
        .node(ATTESTER)
        .ledger
        .set_balance(requester, BigDecimal::from(100));
    Ok(network)
}

/// Creates a phone attestation on the requester and solicits bids for it.
/// Returns the attestation and the negotiation id.
pub async fn solicit(node: &MockNode, reward: u32) -> Result<(Attestation, String)> {
    let attestation = node
        .service
        .create_attestation(AttestationType::Phone)
        .await?;
    let negotiation_id = node
        .service
        .initiate_solicitation(&attestation.id, BigDecimal::from(reward), node.requester_wallet())
        .await?;
    Ok((attestation, negotiation_id))
}

fn hex_of(byte: u8, len: usize) -> String {
    format!("0x{}", hex::encode(vec![byte; len]))
}

pub fn job_details(attestation_id: &str) -> JobDetailsRequest {
    JobDetailsRequest {
        attestation_id: attestation_id.to_string(),
        subject: Wallet::random().address(),
        subject_data: json!("+1 (555) 010-0200"),
        type_ids: vec![AttestationType::Phone.id()],
        subject_sig: hex_of(0x11, 65),
        payment_nonce: hex_of(0x22, 32),
        payment_sig: hex_of(0x33, 65),
        requester_sig: hex_of(0x44, 65),
        data_hash: hex_of(0x55, 32),
        request_nonce: hex_of(0x66, 32),
    }
}

/// Runs solicitation, bid and job details. Returns the attester side
/// attestation id, which is ready for submission.
pub async fn negotiate_job(network: &NegotiationNetwork) -> Result<String> {
    let requester = network.node(REQUESTER);
    let (attestation, _) = solicit(requester, 5).await?;
    network.settle().await?;
    requester
        .service
        .send_job_details(job_details(&attestation.id), requester.requester_wallet())
        .await?;
    network.settle().await?;

    network
        .node(ATTESTER)
        .notifier
        .actions()
        .into_iter()
        .find_map(|action| match action {
            ExternalAction::PerformAttestation(perform) => Some(perform.attestation_id),
            _ => None,
        })
        .ok_or_else(|| anyhow!("Attester wasn't asked to perform the attestation."))
}
