use attest_whisper::Topic;

use crate::crypto::{new_session, recover_session_signer, sign_session_id, to_topic, Wallet};
use crate::db::dao::AttestationDao;
use crate::db::model::{
    AttestationRole, PersistRecord, StoreAttestationBid, StorePaymentAuthorization,
    StoreStartAttestation,
};
use crate::negotiation::common::CommonBroker;
use crate::negotiation::decision::{
    CollectSubjectData, Decision, DecisionAction, DecisionResult, ExternalAction,
    PerformAttestation, Recipient, RejectReason, Rejected, Subscription,
};
use crate::negotiation::gates;
use crate::negotiation::subject_data::validate_subject_data;
use crate::protocol::{
    AttestationBid, AttestationType, Message, PaymentAuthorization, SendJobDetails, Solicitation,
};

/// Attester side of a negotiation: bids on solicitations and takes on jobs.
#[derive(Clone)]
pub struct AttesterBroker {
    pub(super) common: CommonBroker,
}

impl AttesterBroker {
    pub fn new(common: CommonBroker) -> AttesterBroker {
        AttesterBroker { common }
    }

    /// Bids the asked reward on a solicitation for a type we serve, if the
    /// reward meets our minimum and the requester can pay it.
    pub async fn handle_solicitation(
        &self,
        msg: &Solicitation,
        arrival: &Topic,
        wallet: &Wallet,
    ) -> DecisionResult {
        let config = &self.common.config.negotiation;
        let attestation_type =
            AttestationType::from_topic(arrival).ok_or(RejectReason::UnsupportedType)?;
        let minimum = config
            .acceptable_rewards
            .minimum(attestation_type)
            .ok_or(RejectReason::UnsupportedType)?;

        if &msg.reward_ask < minimum {
            return Err(RejectReason::RewardBelowMinimum {
                ask: msg.reward_ask.clone(),
                minimum: minimum.clone(),
            }
            .into());
        }
        if config.require_escrow_funds
            && !gates::confirm_requester_funds(self.common.ledger.as_ref(), msg).await
        {
            return Err(RejectReason::InsufficientFunds.into());
        }
        let requester_key = msg
            .reply_to
            .clone()
            .ok_or(RejectReason::MissingReplyAddress)?;

        let bid_session = new_session();
        let listen_topic = to_topic(&bid_session);
        let re_session_signed = sign_session_id(wallet, &msg.session)
            .map_err(|e| RejectReason::Signing(e.to_string()))?;

        let bid = AttestationBid {
            session: bid_session.clone(),
            negotiation_session: msg.session.clone(),
            re_session: msg.session.clone(),
            re_session_signed,
            reward_bid: msg.reward_ask.clone(),
            reply_to: None,
            reply_to_topic: listen_topic.clone(),
        };
        log::debug!(
            "Bidding {} on [{}] solicitation [{}].",
            bid.reward_bid,
            attestation_type,
            msg.session
        );

        Ok(Decision::new(DecisionAction::SendBid)
            .subscribe(Subscription::direct(listen_topic.clone()))
            .respond(
                Recipient::direct(msg.reply_to_topic.clone(), requester_key.clone()),
                Message::AttestationBid(bid),
            )
            .persist(PersistRecord::AttestationBid(StoreAttestationBid {
                bid_session,
                negotiation_session: msg.session.clone(),
                solicitation_session: msg.session.clone(),
                reward_ask: msg.reward_ask.clone(),
                reward_bid: msg.reward_ask.clone(),
                attestation_type,
                attestation_topic: arrival.clone(),
                listen_topic,
                requester_public_key: Some(requester_key),
            })))
    }

    /// Accepts a job from an approved requester paying what we bid.
    /// Failed checks close the negotiation channel.
    pub async fn handle_job_details(
        &self,
        msg: &SendJobDetails,
        arrival: &Topic,
        wallet: &Wallet,
    ) -> DecisionResult {
        let db = &self.common.db;
        let config = &self.common.config.negotiation;

        let mut reasons = vec![];
        if !gates::is_approved_requester(db, &config.approved_requesters, msg).await {
            reasons.push(RejectReason::RequesterNotApproved);
        }
        if !gates::reward_matches_bid(db, msg, &msg.reward).await {
            reasons.push(RejectReason::RewardDoesNotMatchBid);
        }
        if let Err(e) = validate_subject_data(&msg.subject_data, &msg.type_ids) {
            reasons.push(RejectReason::InvalidSubjectData(e));
        }
        let reject = |reasons| {
            Ok(Decision::rejected(
                DecisionAction::RejectJobDetails,
                arrival.clone(),
                reasons,
            ))
        };
        if !reasons.is_empty() {
            return reject(reasons);
        }

        let attestation = match db
            .as_dao::<AttestationDao>()
            .find_by_negotiation(&msg.negotiation_session, AttestationRole::Attester)
            .await
        {
            Ok(Some(attestation)) => attestation,
            Ok(None) => {
                return reject(vec![RejectReason::AttestationMissing(
                    AttestationRole::Attester.to_string(),
                )])
            }
            Err(e) => {
                log::warn!(
                    "Can't load attestation of negotiation [{}]: {}",
                    msg.negotiation_session,
                    e
                );
                return Err(RejectReason::AttestationMissing(AttestationRole::Attester.to_string()).into());
            }
        };
        let requester = match recover_session_signer(&msg.re_session, &msg.re_session_signed) {
            Ok(requester) => requester,
            Err(_) => return reject(vec![RejectReason::RequesterNotApproved]),
        };

        Ok(Decision::new(DecisionAction::StartAttestation)
            .unsubscribe(arrival.clone())
            .persist(PersistRecord::StartAttestation(StoreStartAttestation {
                session: msg.session.clone(),
                bid_session: msg.re_session.clone(),
                negotiation_session: msg.negotiation_session.clone(),
                attester: wallet.address(),
                requester,
                details: msg.into(),
            }))
            .external(ExternalAction::PerformAttestation(PerformAttestation {
                attestation_id: attestation.id,
                negotiation_id: msg.negotiation_session.clone(),
                job_details: msg.clone(),
            })))
    }

    /// Accepts a payment authorization in place of job details. Nothing
    /// changes when a check fails.
    pub async fn handle_payment_authorization(
        &self,
        msg: &PaymentAuthorization,
        arrival: &Topic,
        wallet: &Wallet,
    ) -> DecisionResult {
        let db = &self.common.db;
        let config = &self.common.config;

        let mut reasons = vec![];
        if !gates::is_approved_requester(db, &config.negotiation.approved_requesters, msg).await {
            reasons.push(RejectReason::RequesterNotApproved);
        }
        if !gates::reward_matches_bid(db, msg, &msg.reward).await {
            reasons.push(RejectReason::RewardDoesNotMatchBid);
        }
        if !gates::payment_authorization_valid(
            &config.ledger.escrow_domain(),
            msg,
            &wallet.address(),
        ) {
            reasons.push(RejectReason::InvalidPaymentAuthorization);
        }
        if !reasons.is_empty() {
            return Err(Rejected::new(reasons));
        }

        let attestation = db
            .as_dao::<AttestationDao>()
            .find_by_negotiation(&msg.negotiation_session, AttestationRole::Attester)
            .await
            .ok()
            .flatten()
            .ok_or_else(|| RejectReason::AttestationMissing(AttestationRole::Attester.to_string()))?;

        Ok(Decision::new(DecisionAction::AuthorizePayment)
            .unsubscribe(arrival.clone())
            .persist(PersistRecord::PaymentAuthorization(StorePaymentAuthorization {
                role: AttestationRole::Attester,
                session: msg.session.clone(),
                bid_session: msg.re_session.clone(),
                negotiation_session: msg.negotiation_session.clone(),
                requester: msg.requester,
                attester: msg.attester,
                reward: msg.reward.clone(),
                payment_nonce: msg.payment_nonce.clone(),
                payment_sig: msg.payment_sig.clone(),
            }))
            .external(ExternalAction::CollectSubjectData(CollectSubjectData {
                attestation_id: attestation.id,
                negotiation_id: msg.negotiation_session.clone(),
                attestation_type: attestation.attestation_type,
                requester: msg.requester,
                attester: msg.attester,
                reward: msg.reward.clone(),
            })))
    }
}
