mod utils;

use bigdecimal::BigDecimal;

use attest_negotiation::crypto::to_topic;
use attest_negotiation::db::dao::{AttestationDao, FilterDao, NegotiationDao};
use attest_negotiation::db::model::{AttestationRole, AttestationStatus, MessageType};
use attest_negotiation::negotiation::{ExternalAction, PaymentAuthorizationRequest};
use attest_negotiation::{AttestationType, Execution, Message};

use utils::*;

#[tokio::test]
async fn test_job_details_flow() -> anyhow::Result<()> {
    let network = market("test_job_details_flow", ATTESTER_ARGS, REQUESTER_ARGS).await?;
    let attester = network.node(ATTESTER);
    let requester = network.node(REQUESTER);

    let (attestation, negotiation_id) = solicit(requester, 5).await?;
    network.settle().await?;

    // Requester accepted the bid and asks for subject data.
    let actions = requester.notifier.actions();
    assert_eq!(actions.len(), 1);
    match &actions[0] {
        ExternalAction::CollectSubjectData(collect) => {
            assert_eq!(collect.attestation_id, attestation.id);
            assert_eq!(collect.negotiation_id, negotiation_id);
            assert_eq!(collect.attestation_type, AttestationType::Phone);
            assert_eq!(collect.attester, attester.attester_wallet().address());
            assert_eq!(collect.requester, requester.requester_wallet().address());
            assert_eq!(collect.reward, BigDecimal::from(5));
        }
        other => panic!("Unexpected action: {:?}", other),
    }
    // No more bids are expected, so the reply channel is closed.
    assert!(requester.whisper.active_filters().is_empty());

    let execution = requester
        .service
        .send_job_details(job_details(&attestation.id), requester.requester_wallet())
        .await?;
    assert!(matches!(execution, Execution::Applied { .. }));
    network.settle().await?;

    let attester_attestation = match attester.notifier.actions().as_slice() {
        [ExternalAction::PerformAttestation(perform)] => {
            assert_eq!(perform.negotiation_id, negotiation_id);
            assert_eq!(perform.job_details.type_ids, vec![AttestationType::Phone.id()]);
            perform.attestation_id.clone()
        }
        other => panic!("Unexpected actions: {:?}", other),
    };
    // Only the broadcast listener is left.
    assert_eq!(attester.whisper.active_filters().len(), 1);

    let stored = attester
        .db
        .as_dao::<AttestationDao>()
        .get(&attester_attestation)
        .await?
        .unwrap();
    assert_eq!(stored.role, AttestationRole::Attester);
    assert_eq!(stored.status, AttestationStatus::Ready);
    assert_eq!(
        stored.requester,
        Some(requester.requester_wallet().address().to_string())
    );

    attester.service.submit_attestation(&attester_attestation).await?;
    network.settle().await?;

    let submitted = attester.ledger.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].attester, attester.attester_wallet().address());
    assert_eq!(submitted[0].requester, requester.requester_wallet().address());
    assert_eq!(submitted[0].reward, BigDecimal::from(5));
    assert_eq!(submitted[0].data_hash, [0x55; 32]);

    let stored = attester
        .db
        .as_dao::<AttestationDao>()
        .get(&attester_attestation)
        .await?
        .unwrap();
    assert_eq!(stored.status, AttestationStatus::Complete);
    assert!(stored.tx_hash.is_some());

    let steps: Vec<MessageType> = requester
        .db
        .as_dao::<NegotiationDao>()
        .messages(&negotiation_id)
        .await?
        .into_iter()
        .map(|msg| msg.message_type)
        .collect();
    assert_eq!(
        steps,
        vec![
            MessageType::SolicitationStored,
            MessageType::AwaitSubjectDataStored,
            MessageType::SendJobDetailsStored,
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_payment_authorization_flow() -> anyhow::Result<()> {
    let network = market("test_payment_authorization_flow", ATTESTER_ARGS, REQUESTER_ARGS).await?;
    let attester = network.node(ATTESTER);
    let requester = network.node(REQUESTER);

    let (attestation, negotiation_id) = solicit(requester, 7).await?;
    network.settle().await?;

    requester
        .service
        .send_payment_authorization(
            PaymentAuthorizationRequest {
                attestation_id: attestation.id.clone(),
                payment_nonce: None,
            },
            requester.requester_wallet(),
        )
        .await?;
    network.settle().await?;

    match attester.notifier.actions().as_slice() {
        [ExternalAction::CollectSubjectData(collect)] => {
            assert_eq!(collect.negotiation_id, negotiation_id);
            assert_eq!(collect.requester, requester.requester_wallet().address());
            assert_eq!(collect.attester, attester.attester_wallet().address());
            assert_eq!(collect.reward, BigDecimal::from(7));
        }
        other => panic!("Unexpected actions: {:?}", other),
    }

    let attester_attestation = attester
        .db
        .as_dao::<AttestationDao>()
        .find_by_negotiation(&negotiation_id, AttestationRole::Attester)
        .await?
        .unwrap();
    let requester_attestation = requester
        .db
        .as_dao::<AttestationDao>()
        .get(&attestation.id)
        .await?
        .unwrap();
    assert_eq!(attester_attestation.status, AttestationStatus::Ready);
    assert!(attester_attestation.payment_sig.is_some());
    assert_eq!(
        attester_attestation.payment_sig,
        requester_attestation.payment_sig
    );
    assert_eq!(
        attester_attestation.payment_nonce,
        requester_attestation.payment_nonce
    );
    Ok(())
}

#[tokio::test]
async fn test_bid_from_unapproved_attester_is_rejected() -> anyhow::Result<()> {
    // Requester doesn't approve anyone.
    let network = market(
        "test_bid_from_unapproved_attester_is_rejected",
        ATTESTER_ARGS,
        &["--ping-enabled", "false"],
    )
    .await?;
    let requester = network.node(REQUESTER);

    let (attestation, negotiation_id) = solicit(requester, 5).await?;
    let stats = network.settle().await?;

    assert_eq!(stats.rejected, 1);
    assert!(requester.notifier.actions().is_empty());
    assert!(requester
        .db
        .as_dao::<NegotiationDao>()
        .find_message(&negotiation_id, MessageType::AwaitSubjectDataStored)
        .await?
        .is_none());
    // Still waiting for other bids.
    assert_eq!(
        requester
            .db
            .as_dao::<FilterDao>()
            .find(&to_topic(&negotiation_id), "requester")
            .await?
            .len(),
        1
    );
    assert!(requester
        .service
        .send_job_details(job_details(&attestation.id), requester.requester_wallet())
        .await
        .is_err());
    Ok(())
}

#[tokio::test]
async fn test_solicitation_below_minimum_gets_no_bid() -> anyhow::Result<()> {
    let network = market(
        "test_solicitation_below_minimum_gets_no_bid",
        ATTESTER_ARGS,
        REQUESTER_ARGS,
    )
    .await?;
    let requester = network.node(REQUESTER);

    let (_, negotiation_id) = solicit(requester, 4).await?;
    let stats = network.settle().await?;

    assert_eq!(stats.rejected, 1);
    assert!(network
        .whisper()
        .posted_on(&to_topic(&negotiation_id))
        .is_empty());
    assert!(requester.notifier.actions().is_empty());

    // The attester keeps no trace of it.
    let attester = network.node(ATTESTER);
    assert!(attester.db.as_dao::<AttestationDao>().list().await?.is_empty());
    let dao = attester.db.as_dao::<NegotiationDao>();
    assert!(dao.get(&negotiation_id).await?.is_none());
    assert!(dao.messages(&negotiation_id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_escrow_funds_requirement() -> anyhow::Result<()> {
    init_logger();
    let network = attest_negotiation::testing::NegotiationNetwork::new(
        "test_escrow_funds_requirement",
    )?
    .add_node(ATTESTER, ATTESTER_ARGS, attester_wallets())
    .await?
    .add_node(REQUESTER, REQUESTER_ARGS, requester_wallets())
    .await?;
    network.settle().await?;
    let requester = network.node(REQUESTER);

    // Nothing in escrow.
    let (_, negotiation_id) = solicit(requester, 5).await?;
    let stats = network.settle().await?;
    assert_eq!(stats.rejected, 1);
    assert!(network
        .whisper()
        .posted_on(&to_topic(&negotiation_id))
        .is_empty());

    let mut lenient = ATTESTER_ARGS.to_vec();
    lenient.extend_from_slice(&["--require-escrow-funds", "false"]);
    let network = attest_negotiation::testing::NegotiationNetwork::new(
        "test_escrow_funds_requirement_disabled",
    )?
    .add_node(ATTESTER, &lenient, attester_wallets())
    .await?
    .add_node(REQUESTER, REQUESTER_ARGS, requester_wallets())
    .await?;
    network.settle().await?;

    let (_, negotiation_id) = solicit(network.node(REQUESTER), 5).await?;
    network.settle().await?;
    assert_eq!(
        network.whisper().posted_on(&to_topic(&negotiation_id)).len(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_replayed_solicitation_is_bid_on_once() -> anyhow::Result<()> {
    let network = market(
        "test_replayed_solicitation_is_bid_on_once",
        ATTESTER_ARGS,
        REQUESTER_ARGS,
    )
    .await?;
    let attester = network.node(ATTESTER);
    let requester = network.node(REQUESTER);

    let (_, negotiation_id) = solicit(requester, 5).await?;
    network.settle().await?;

    // Post the solicitation a second time, as a flaky node would.
    let solicitation = network
        .whisper()
        .posted_on(&AttestationType::Phone.topic())
        .into_iter()
        .map(|payload| Message::from_payload(&payload).unwrap())
        .find(|message| message.session() == negotiation_id)
        .unwrap();
    requester
        .service
        .queue()
        .publish(attest_negotiation::Task::WhisperBroadcastMessage {
            message: solicitation,
            topic: AttestationType::Phone.topic(),
            password: requester.config.whisper.whisper_password.clone(),
        })
        .await?;
    let stats = network.settle().await?;

    assert_eq!(stats.replayed, 1);
    assert_eq!(
        network.whisper().posted_on(&to_topic(&negotiation_id)).len(),
        1
    );
    let attester_attestations = attester
        .db
        .as_dao::<AttestationDao>()
        .list()
        .await?
        .into_iter()
        .filter(|a| a.negotiation_id.as_deref() == Some(negotiation_id.as_str()))
        .count();
    assert_eq!(attester_attestations, 1);
    assert_eq!(requester.notifier.actions().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_job_details_for_unknown_attestation() -> anyhow::Result<()> {
    let network = market(
        "test_job_details_for_unknown_attestation",
        ATTESTER_ARGS,
        REQUESTER_ARGS,
    )
    .await?;
    let requester = network.node(REQUESTER);

    let result = requester
        .service
        .send_job_details(job_details("no-such-attestation"), requester.requester_wallet())
        .await;
    assert!(matches!(
        result,
        Err(attest_negotiation::negotiation::NegotiationError::AttestationNotFound(_))
    ));

    // Solicited, but no bid accepted yet.
    let (attestation, _) = solicit(requester, 5).await?;
    let result = requester
        .service
        .send_job_details(job_details(&attestation.id), requester.requester_wallet())
        .await;
    assert!(matches!(
        result,
        Err(attest_negotiation::negotiation::NegotiationError::NoAcceptedBid(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_invalid_subject_data_is_refused_locally() -> anyhow::Result<()> {
    let network = market(
        "test_invalid_subject_data_is_refused_locally",
        ATTESTER_ARGS,
        REQUESTER_ARGS,
    )
    .await?;
    let requester = network.node(REQUESTER);
    let (attestation, _) = solicit(requester, 5).await?;
    network.settle().await?;

    let mut request = job_details(&attestation.id);
    request.subject_data = serde_json::json!("not a phone");
    assert!(requester
        .service
        .send_job_details(request, requester.requester_wallet())
        .await
        .is_err());
    assert!(network.node(ATTESTER).notifier.actions().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unavailable_webhook_does_not_stall_negotiation() -> anyhow::Result<()> {
    let network = market(
        "test_unavailable_webhook_does_not_stall_negotiation",
        ATTESTER_ARGS,
        REQUESTER_ARGS,
    )
    .await?;
    let requester = network.node(REQUESTER);
    requester.notifier.set_unavailable(true);

    let (attestation, negotiation_id) = solicit(requester, 5).await?;
    let stats = network.settle().await?;

    assert_eq!(stats.failed, 0);
    assert!(requester.notifier.actions().is_empty());
    assert!(requester
        .db
        .as_dao::<NegotiationDao>()
        .find_message(&negotiation_id, MessageType::AwaitSubjectDataStored)
        .await?
        .is_some());

    // The requester's application learns about the bid some other way and
    // carries on.
    let posted = network.whisper().posted_count();
    requester
        .service
        .send_job_details(job_details(&attestation.id), requester.requester_wallet())
        .await?;
    network.settle().await?;
    assert_eq!(network.whisper().posted_count(), posted + 1);
    Ok(())
}
