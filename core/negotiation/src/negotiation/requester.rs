use bigdecimal::{BigDecimal, Zero};
use serde::Deserialize;

use attest_ledger::Address;
use attest_whisper::Topic;

use crate::crypto::{
    new_session, parse_bytes32, random_bytes32, recover_session_signer,
    sign_payment_authorization, sign_session_id, to_topic, PayTokens, Wallet,
};
use crate::db::dao::{AttestationDao, NegotiationDao};
use crate::db::model::{
    Attestation, AttestationRole, MessageType, PersistRecord, StoreAwaitSubjectData,
    StoreJobDetails, StorePaymentAuthorization, StoreSolicitation,
};
use crate::negotiation::common::CommonBroker;
use crate::negotiation::decision::{
    CollectSubjectData, Decision, DecisionAction, DecisionResult, ExternalAction, Recipient,
    RejectReason, Subscription,
};
use crate::negotiation::error::NegotiationError;
use crate::negotiation::gates;
use crate::negotiation::subject_data::validate_subject_data;
use crate::protocol::{
    AttestationBid, Message, PaymentAuthorization, SendJobDetails, Solicitation,
};

/// Job details as supplied by the requester's application.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetailsRequest {
    pub attestation_id: String,
    pub subject: Address,
    pub subject_data: serde_json::Value,
    pub type_ids: Vec<i32>,
    pub subject_sig: String,
    pub payment_nonce: String,
    pub payment_sig: String,
    pub requester_sig: String,
    pub data_hash: String,
    pub request_nonce: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorizationRequest {
    pub attestation_id: String,
    /// Random nonce is generated when missing.
    #[serde(default)]
    pub payment_nonce: Option<String>,
}

/// Accepted bid of a requester attestation, as stored on acceptance.
struct AcceptedBid {
    negotiation_id: String,
    bid_session: String,
    reward: BigDecimal,
    attester_topic: Topic,
    attester_key: String,
}

/// Requester side of a negotiation: solicits bids, picks one and hands
/// over the job.
#[derive(Clone)]
pub struct RequesterBroker {
    pub(super) common: CommonBroker,
}

impl RequesterBroker {
    pub fn new(common: CommonBroker) -> RequesterBroker {
        RequesterBroker { common }
    }

    async fn requester_attestation(&self, attestation_id: &str) -> Result<Attestation, NegotiationError> {
        let attestation = self
            .common
            .db
            .as_dao::<AttestationDao>()
            .get(attestation_id)
            .await?
            .ok_or_else(|| NegotiationError::AttestationNotFound(attestation_id.to_string()))?;
        if attestation.role != AttestationRole::Requester {
            return Err(NegotiationError::WrongRole {
                id: attestation.id,
                role: attestation.role.to_string(),
            });
        }
        Ok(attestation)
    }

    async fn accepted_bid(&self, attestation: &Attestation) -> Result<AcceptedBid, NegotiationError> {
        let no_bid = || NegotiationError::NoAcceptedBid(attestation.id.clone());
        let negotiation_id = attestation.negotiation_id.clone().ok_or_else(no_bid)?;
        let accepted = self
            .common
            .db
            .as_dao::<NegotiationDao>()
            .find_message(&negotiation_id, MessageType::AwaitSubjectDataStored)
            .await?
            .ok_or_else(no_bid)?;

        Ok(AcceptedBid {
            negotiation_id,
            bid_session: accepted.regarding_uuid.ok_or_else(no_bid)?,
            reward: accepted.bid.map(|bid| bid.0).ok_or_else(no_bid)?,
            attester_topic: accepted
                .future_topic
                .and_then(|topic| topic.parse().ok())
                .ok_or_else(no_bid)?,
            attester_key: accepted.reply_to.ok_or_else(no_bid)?,
        })
    }

    /// Opens a negotiation for a requester attestation by broadcasting a
    /// solicitation on the attestation type's topic.
    pub async fn initiate_solicitation(
        &self,
        attestation_id: &str,
        reward: BigDecimal,
        wallet: &Wallet,
    ) -> Result<Decision, NegotiationError> {
        if reward <= BigDecimal::zero() {
            return Err(NegotiationError::InvalidRequest(format!(
                "reward must be positive, got {}",
                reward
            )));
        }
        let attestation = self.requester_attestation(attestation_id).await?;
        let topic = attestation.attestation_type.topic();

        let session = new_session();
        let reply_topic = to_topic(&session);
        let solicitation = Solicitation {
            session: session.clone(),
            session_signed: sign_session_id(wallet, &session)?,
            reward_ask: reward.clone(),
            reply_to: None,
            reply_to_topic: reply_topic.clone(),
        };

        Ok(Decision::new(DecisionAction::Solicit)
            .subscribe(Subscription::direct(reply_topic.clone()))
            .respond(
                Recipient::broadcast(topic.clone(), self.common.password()),
                Message::Solicitation(solicitation),
            )
            .persist(PersistRecord::Solicitation(StoreSolicitation {
                session,
                attestation_id: attestation.id,
                reward_ask: reward,
                attestation_topic: topic,
                reply_topic,
            })))
    }

    /// Accepts a bid from an approved attester matching the asked reward.
    /// A rejected bid only ends the bidder's session.
    pub async fn handle_attestation_bid(
        &self,
        bid: &AttestationBid,
        wallet: &Wallet,
    ) -> DecisionResult {
        let db = &self.common.db;
        let config = &self.common.config.negotiation;

        let mut reasons = vec![];
        if !gates::is_approved_attester(db, &config.approved_attesters, bid).await {
            reasons.push(RejectReason::AttesterNotApproved);
        }
        if !gates::bid_matches_ask(db, bid).await {
            reasons.push(RejectReason::BidDoesNotMatchAsk);
        }
        let reject = |reasons| {
            Ok(Decision::rejected(
                DecisionAction::RejectBid,
                bid.reply_to_topic.clone(),
                reasons,
            ))
        };
        if !reasons.is_empty() {
            return reject(reasons);
        }

        let attester = match recover_session_signer(&bid.re_session, &bid.re_session_signed) {
            Ok(attester) => attester,
            Err(_) => return reject(vec![RejectReason::AttesterNotApproved]),
        };
        let attestation = match db
            .as_dao::<AttestationDao>()
            .find_by_negotiation(&bid.negotiation_session, AttestationRole::Requester)
            .await
        {
            Ok(Some(attestation)) => attestation,
            Ok(None) => {
                return reject(vec![RejectReason::AttestationMissing(
                    AttestationRole::Requester.to_string(),
                )])
            }
            Err(e) => {
                log::warn!(
                    "Can't load attestation of negotiation [{}]: {}",
                    bid.negotiation_session,
                    e
                );
                return Err(RejectReason::AttestationMissing(AttestationRole::Requester.to_string()).into());
            }
        };

        Ok(Decision::new(DecisionAction::AcceptBid)
            .unsubscribe(to_topic(&bid.negotiation_session))
            .persist(PersistRecord::AwaitSubjectData(StoreAwaitSubjectData {
                uuid: new_session(),
                bid_session: bid.session.clone(),
                negotiation_session: bid.negotiation_session.clone(),
                attester,
                reward_bid: bid.reward_bid.clone(),
                attester_topic: bid.reply_to_topic.clone(),
                attester_public_key: bid.reply_to.clone(),
            }))
            .external(ExternalAction::CollectSubjectData(CollectSubjectData {
                attestation_id: attestation.id,
                negotiation_id: bid.negotiation_session.clone(),
                attestation_type: attestation.attestation_type,
                requester: wallet.address(),
                attester,
                reward: bid.reward_bid.clone(),
            })))
    }

    /// Sends job details to the attester whose bid was accepted.
    pub async fn send_job_details(
        &self,
        request: JobDetailsRequest,
        wallet: &Wallet,
    ) -> Result<Decision, NegotiationError> {
        validate_subject_data(&request.subject_data, &request.type_ids)
            .map_err(NegotiationError::InvalidRequest)?;
        let attestation = self.requester_attestation(&request.attestation_id).await?;
        let accepted = self.accepted_bid(&attestation).await?;

        let msg = SendJobDetails {
            session: new_session(),
            negotiation_session: accepted.negotiation_id.clone(),
            re_session: accepted.bid_session.clone(),
            re_session_signed: sign_session_id(wallet, &accepted.bid_session)?,
            reward: accepted.reward.clone(),
            subject: request.subject,
            subject_data: request.subject_data,
            type_ids: request.type_ids,
            subject_sig: request.subject_sig,
            payment_nonce: request.payment_nonce,
            payment_sig: request.payment_sig,
            requester_sig: request.requester_sig,
            data_hash: request.data_hash,
            request_nonce: request.request_nonce,
            reply_to: None,
            reply_to_topic: to_topic(&accepted.negotiation_id),
        };

        Ok(Decision::new(DecisionAction::SendJobDetails)
            .persist(PersistRecord::JobDetails(StoreJobDetails {
                session: msg.session.clone(),
                bid_session: accepted.bid_session,
                negotiation_session: accepted.negotiation_id,
                details: (&msg).into(),
            }))
            .respond(
                Recipient::direct(accepted.attester_topic, accepted.attester_key),
                Message::SendJobDetails(msg),
            ))
    }

    /// Authorizes the escrow to pay the accepted attester, in place of
    /// sending job details.
    pub async fn send_payment_authorization(
        &self,
        request: PaymentAuthorizationRequest,
        wallet: &Wallet,
    ) -> Result<Decision, NegotiationError> {
        let attestation = self.requester_attestation(&request.attestation_id).await?;
        let accepted = self.accepted_bid(&attestation).await?;
        let attester = attestation
            .attester_address()
            .ok_or_else(|| NegotiationError::NoAcceptedBid(attestation.id.clone()))?;
        let nonce = match &request.payment_nonce {
            Some(nonce) => parse_bytes32(nonce)?,
            None => random_bytes32(),
        };

        let pay = PayTokens {
            sender: wallet.address(),
            receiver: attester,
            amount: accepted.reward.clone(),
            nonce,
        };
        let payment_sig =
            sign_payment_authorization(wallet, &self.common.config.ledger.escrow_domain(), &pay)?;

        let msg = PaymentAuthorization {
            session: new_session(),
            negotiation_session: accepted.negotiation_id.clone(),
            re_session: accepted.bid_session.clone(),
            re_session_signed: sign_session_id(wallet, &accepted.bid_session)?,
            reward: accepted.reward.clone(),
            requester: wallet.address(),
            attester,
            payment_nonce: format!("0x{}", hex::encode(nonce)),
            payment_sig,
            reply_to: None,
            reply_to_topic: to_topic(&accepted.negotiation_id),
        };

        Ok(Decision::new(DecisionAction::SendPaymentAuthorization)
            .persist(PersistRecord::PaymentAuthorization(StorePaymentAuthorization {
                role: AttestationRole::Requester,
                session: msg.session.clone(),
                bid_session: accepted.bid_session,
                negotiation_session: accepted.negotiation_id,
                requester: msg.requester,
                attester,
                reward: msg.reward.clone(),
                payment_nonce: msg.payment_nonce.clone(),
                payment_sig: msg.payment_sig.clone(),
            }))
            .respond(
                Recipient::direct(accepted.attester_topic, accepted.attester_key),
                Message::PaymentAuthorization(msg),
            ))
    }
}
