//! Negotiation decisions. Handlers read state and check gates, but never
//! write: every state change and message they want is carried by the
//! returned [`Decision`].

use std::fmt;
use std::str::FromStr;

use attest_whisper::Topic;

use crate::crypto::Wallet;
use crate::protocol::{AttestationType, Message};

mod attester;
mod common;
pub mod decision;
pub mod error;
pub mod gates;
mod requester;
pub mod subject_data;

pub use attester::AttesterBroker;
pub use common::CommonBroker;
pub use decision::{
    CollectSubjectData, Decision, DecisionAction, DecisionResult, ExternalAction,
    PerformAttestation, Recipient, RecipientKind, RejectReason, Rejected, Subscription,
    SubscriptionKind,
};
pub use error::NegotiationError;
pub use requester::{JobDetailsRequest, PaymentAuthorizationRequest, RequesterBroker};

/// Local identity a Whisper filter belongs to. Stored in the filter table
/// as `requester`, the attestation type name, or `ping`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Entity {
    Requester,
    Attester(AttestationType),
    Ping,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Requester => write!(f, "requester"),
            Entity::Attester(attestation_type) => write!(f, "{}", attestation_type),
            Entity::Ping => write!(f, "ping"),
        }
    }
}

impl FromStr for Entity {
    type Err = strum::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requester" => Ok(Entity::Requester),
            "ping" => Ok(Entity::Ping),
            other => AttestationType::from_str(other).map(Entity::Attester),
        }
    }
}

/// Routes inbound messages to the side of the protocol the receiving
/// entity plays.
#[derive(Clone)]
pub struct NegotiationBroker {
    pub common: CommonBroker,
    pub attester: AttesterBroker,
    pub requester: RequesterBroker,
}

impl NegotiationBroker {
    pub fn new(common: CommonBroker) -> NegotiationBroker {
        NegotiationBroker {
            attester: AttesterBroker::new(common.clone()),
            requester: RequesterBroker::new(common.clone()),
            common,
        }
    }

    pub async fn decide(
        &self,
        entity: &Entity,
        message: &Message,
        arrival: &Topic,
        wallet: &Wallet,
    ) -> DecisionResult {
        match (entity, message) {
            (Entity::Attester(_), Message::Solicitation(msg)) => {
                self.attester.handle_solicitation(msg, arrival, wallet).await
            }
            (Entity::Attester(_), Message::SendJobDetails(msg)) => {
                self.attester.handle_job_details(msg, arrival, wallet).await
            }
            (Entity::Attester(_), Message::PaymentAuthorization(msg)) => {
                self.attester
                    .handle_payment_authorization(msg, arrival, wallet)
                    .await
            }
            (Entity::Requester, Message::AttestationBid(bid)) => {
                self.requester.handle_attestation_bid(bid, wallet).await
            }
            (Entity::Ping, Message::Ping(ping)) => Ok(self.common.handle_ping(ping)),
            (Entity::Ping, Message::Pong(pong)) => {
                log::info!("Pong [{}] answers ping [{}].", pong.session, pong.re_session);
                Ok(Decision::new(DecisionAction::PongReceived))
            }
            (entity, message) => Err(RejectReason::UnexpectedMessage {
                kind: message.kind().to_string(),
                entity: entity.to_string(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_names() {
        for entity in [
            Entity::Requester,
            Entity::Ping,
            Entity::Attester(AttestationType::SanctionScreen),
        ]
        .iter()
        {
            assert_eq!(&Entity::from_str(&entity.to_string()).unwrap(), entity);
        }
        assert!(Entity::from_str("nobody").is_err());
    }
}
