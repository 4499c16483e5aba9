//! Checks a message has to pass before a node commits to the next step.
//! Every gate fails closed: lookup and recovery errors count as a failed
//! check.

use bigdecimal::BigDecimal;

use attest_ledger::{Address, Ledger};
use attest_persistence::executor::DbExecutor;
use attest_whisper::Topic;

use crate::config::ApprovalList;
use crate::crypto::{
    parse_bytes32, recover_payment_signer, recover_session_signer, EscrowDomain, PayTokens,
};
use crate::db::dao::NegotiationDao;
use crate::db::model::MessageType;
use crate::protocol::{AttestationBid, AttestationType, PaymentAuthorization, Reply, Solicitation};

/// Attestation type a negotiation is about, from its broadcast topic.
pub async fn negotiation_type(db: &DbExecutor, negotiation_id: &str) -> Option<AttestationType> {
    let negotiation = match db.as_dao::<NegotiationDao>().get(negotiation_id).await {
        Ok(Some(negotiation)) => negotiation,
        Ok(None) => {
            log::info!("Unknown negotiation [{}].", negotiation_id);
            return None;
        }
        Err(e) => {
            log::warn!("Can't load negotiation [{}]: {}", negotiation_id, e);
            return None;
        }
    };
    negotiation
        .attestation_topic
        .parse::<Topic>()
        .ok()
        .and_then(|topic| AttestationType::from_topic(&topic))
}

async fn is_approved_signer<M: Reply + Sync>(
    db: &DbExecutor,
    list: &ApprovalList,
    msg: &M,
    role: &str,
) -> bool {
    let signer = match recover_session_signer(msg.re_session(), msg.re_session_signed()) {
        Ok(signer) => signer,
        Err(e) => {
            log::info!(
                "{} signature in negotiation [{}] is invalid: {}",
                role,
                msg.negotiation_session(),
                e
            );
            return false;
        }
    };
    let attestation_type = match negotiation_type(db, msg.negotiation_session()).await {
        Some(t) => t,
        None => return false,
    };

    let approved = list.is_approved(&signer, attestation_type);
    if !approved {
        log::info!(
            "{} [{}] is not approved for [{}] attestations.",
            role,
            signer,
            attestation_type
        );
    }
    approved
}

/// Bid signer is on the approved-attesters list for the negotiation's type.
pub async fn is_approved_attester(
    db: &DbExecutor,
    list: &ApprovalList,
    bid: &AttestationBid,
) -> bool {
    is_approved_signer(db, list, bid, "Attester").await
}

/// Sender of job details or a payment authorization is an approved requester.
pub async fn is_approved_requester<M: Reply + Sync>(
    db: &DbExecutor,
    list: &ApprovalList,
    msg: &M,
) -> bool {
    is_approved_signer(db, list, msg, "Requester").await
}

/// Bid is exactly the reward asked in the solicitation.
pub async fn bid_matches_ask(db: &DbExecutor, bid: &AttestationBid) -> bool {
    match db
        .as_dao::<NegotiationDao>()
        .get(&bid.negotiation_session)
        .await
    {
        Ok(Some(negotiation)) => negotiation.initial_reward.0 == bid.reward_bid,
        Ok(None) => false,
        Err(e) => {
            log::warn!(
                "Can't load negotiation [{}]: {}",
                bid.negotiation_session,
                e
            );
            false
        }
    }
}

/// Offered reward is exactly what this attester bid.
pub async fn reward_matches_bid<M: Reply + Sync>(
    db: &DbExecutor,
    msg: &M,
    reward: &BigDecimal,
) -> bool {
    match db
        .as_dao::<NegotiationDao>()
        .find_message(msg.negotiation_session(), MessageType::BidStored)
        .await
    {
        Ok(Some(bid)) => bid.bid.map_or(false, |bid| &bid.0 == reward),
        Ok(None) => false,
        Err(e) => {
            log::warn!(
                "Can't load bid of negotiation [{}]: {}",
                msg.negotiation_session(),
                e
            );
            false
        }
    }
}

/// Solicitation signer holds at least the asked reward in escrow.
pub async fn confirm_requester_funds(ledger: &dyn Ledger, solicitation: &Solicitation) -> bool {
    let requester = match recover_session_signer(&solicitation.session, &solicitation.session_signed)
    {
        Ok(requester) => requester,
        Err(e) => {
            log::info!(
                "Solicitation [{}] signature is invalid: {}",
                solicitation.session,
                e
            );
            return false;
        }
    };
    match ledger.escrow_balance(&requester).await {
        Ok(balance) => balance >= solicitation.reward_ask,
        Err(e) => {
            log::warn!("Can't check escrow balance of [{}]: {}", requester, e);
            false
        }
    }
}

/// Payment signature was made by the named requester, who is also the one
/// who sent the message, and pays this attester.
pub fn payment_authorization_valid(
    domain: &EscrowDomain,
    msg: &PaymentAuthorization,
    attester: &Address,
) -> bool {
    if &msg.attester != attester {
        log::info!(
            "Payment authorization in [{}] pays [{}], not us.",
            msg.negotiation_session,
            msg.attester
        );
        return false;
    }
    match recover_session_signer(&msg.re_session, &msg.re_session_signed) {
        Ok(sender) if sender == msg.requester => (),
        Ok(sender) => {
            log::info!(
                "Payment authorization in [{}] names requester [{}] but was sent by [{}].",
                msg.negotiation_session,
                msg.requester,
                sender
            );
            return false;
        }
        Err(_) => return false,
    }
    let nonce = match parse_bytes32(&msg.payment_nonce) {
        Ok(nonce) => nonce,
        Err(_) => return false,
    };
    let pay = PayTokens {
        sender: msg.requester,
        receiver: msg.attester,
        amount: msg.reward.clone(),
        nonce,
    };
    match recover_payment_signer(domain, &pay, &msg.payment_sig) {
        Ok(signer) => signer == msg.requester,
        Err(e) => {
            log::info!(
                "Payment signature in [{}] is invalid: {}",
                msg.negotiation_session,
                e
            );
            false
        }
    }
}
