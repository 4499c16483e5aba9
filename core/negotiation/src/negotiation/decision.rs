use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use attest_ledger::Address;
use attest_whisper::Topic;

use crate::db::model::PersistRecord;
use crate::protocol::{AttestationType, Message, SendJobDetails};

/// Channel a node starts listening on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub topic: Topic,
    pub kind: SubscriptionKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubscriptionKind {
    /// Symmetric key derived from a password shared by the marketplace.
    Broadcast { password: String },
    /// Fresh keypair; its public key goes out as the `replyTo` of the
    /// message sent together with the subscription.
    Direct,
}

impl Subscription {
    pub fn broadcast(topic: Topic, password: impl Into<String>) -> Self {
        Subscription {
            topic,
            kind: SubscriptionKind::Broadcast {
                password: password.into(),
            },
        }
    }

    pub fn direct(topic: Topic) -> Self {
        Subscription {
            topic,
            kind: SubscriptionKind::Direct,
        }
    }
}

/// Where a response is posted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub topic: Topic,
    pub kind: RecipientKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecipientKind {
    Broadcast { password: String },
    Direct { public_key: String },
}

impl Recipient {
    pub fn broadcast(topic: Topic, password: impl Into<String>) -> Self {
        Recipient {
            topic,
            kind: RecipientKind::Broadcast {
                password: password.into(),
            },
        }
    }

    pub fn direct(topic: Topic, public_key: impl Into<String>) -> Self {
        Recipient {
            topic,
            kind: RecipientKind::Direct {
                public_key: public_key.into(),
            },
        }
    }
}

/// Summary handed to the webhook when subject data has to be collected.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectSubjectData {
    pub attestation_id: String,
    pub negotiation_id: String,
    pub attestation_type: AttestationType,
    pub requester: Address,
    pub attester: Address,
    pub reward: BigDecimal,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformAttestation {
    pub attestation_id: String,
    pub negotiation_id: String,
    pub job_details: SendJobDetails,
}

/// Call to the upstream collaborator.
#[derive(Clone, Debug, PartialEq)]
pub enum ExternalAction {
    CollectSubjectData(CollectSubjectData),
    PerformAttestation(PerformAttestation),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum DecisionAction {
    Solicit,
    SendBid,
    AcceptBid,
    RejectBid,
    SendJobDetails,
    StartAttestation,
    RejectJobDetails,
    SendPaymentAuthorization,
    AuthorizePayment,
    Pong,
    PongReceived,
}

/// Outcome of handling one message or one local request. Pure data: the
/// `DecisionExecutor` performs the side effects it describes.
#[derive(Clone, Debug, PartialEq)]
pub struct Decision {
    pub action: DecisionAction,
    pub unsubscribe_from: Option<Topic>,
    pub subscribe_to: Option<Subscription>,
    pub respond_to: Option<Recipient>,
    pub respond_with: Option<Message>,
    pub persist: Option<PersistRecord>,
    pub external_action: Option<ExternalAction>,
    /// Failed checks behind a rejecting decision.
    pub reasons: Vec<RejectReason>,
}

impl Decision {
    pub fn new(action: DecisionAction) -> Self {
        Decision {
            action,
            unsubscribe_from: None,
            subscribe_to: None,
            respond_to: None,
            respond_with: None,
            persist: None,
            external_action: None,
            reasons: vec![],
        }
    }

    /// Decision that only closes the channel the rejected message came on.
    pub fn rejected(action: DecisionAction, topic: Topic, reasons: Vec<RejectReason>) -> Self {
        let mut decision = Decision::new(action).unsubscribe(topic);
        decision.reasons = reasons;
        decision
    }

    pub fn unsubscribe(mut self, topic: Topic) -> Self {
        self.unsubscribe_from = Some(topic);
        self
    }

    pub fn subscribe(mut self, subscription: Subscription) -> Self {
        self.subscribe_to = Some(subscription);
        self
    }

    pub fn respond(mut self, recipient: Recipient, message: Message) -> Self {
        self.respond_to = Some(recipient);
        self.respond_with = Some(message);
        self
    }

    pub fn persist(mut self, record: PersistRecord) -> Self {
        self.persist = Some(record);
        self
    }

    pub fn external(mut self, action: ExternalAction) -> Self {
        self.external_action = Some(action);
        self
    }

    pub fn is_rejection(&self) -> bool {
        !self.reasons.is_empty()
    }
}

#[derive(thiserror::Error, Clone, Debug, PartialEq)]
pub enum RejectReason {
    #[error("reward {ask} is below the minimum of {minimum}")]
    RewardBelowMinimum { ask: BigDecimal, minimum: BigDecimal },
    #[error("attestation type is not served")]
    UnsupportedType,
    #[error("requester's escrow balance doesn't cover the reward")]
    InsufficientFunds,
    #[error("attester is not approved")]
    AttesterNotApproved,
    #[error("requester is not approved")]
    RequesterNotApproved,
    #[error("bid doesn't match the asked reward")]
    BidDoesNotMatchAsk,
    #[error("reward doesn't match the bid")]
    RewardDoesNotMatchBid,
    #[error("invalid subject data: {0}")]
    InvalidSubjectData(String),
    #[error("payment authorization is not signed by the requester")]
    InvalidPaymentAuthorization,
    #[error("message carries no reply address")]
    MissingReplyAddress,
    #[error("no {0} attestation for the negotiation")]
    AttestationMissing(String),
    #[error("{kind} is not expected by {entity}")]
    UnexpectedMessage { kind: String, entity: String },
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Message dropped without any side effect.
#[derive(Clone, Debug, PartialEq)]
pub struct Rejected {
    pub reasons: Vec<RejectReason>,
}

impl Rejected {
    pub fn new(reasons: Vec<RejectReason>) -> Self {
        Rejected { reasons }
    }

    pub fn single(reason: RejectReason) -> Self {
        Rejected {
            reasons: vec![reason],
        }
    }
}

impl From<RejectReason> for Rejected {
    fn from(reason: RejectReason) -> Self {
        Rejected::single(reason)
    }
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reasons: Vec<String> = self.reasons.iter().map(ToString::to_string).collect();
        write!(f, "{}", reasons.join("; "))
    }
}

impl std::error::Error for Rejected {}

pub type DecisionResult = Result<Decision, Rejected>;
