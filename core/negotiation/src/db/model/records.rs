use bigdecimal::BigDecimal;

use attest_ledger::Address;
use attest_whisper::Topic;

use crate::db::model::{AttestationRole, MessageType};
use crate::protocol::{AttestationType, SendJobDetails};

/// State change a decision asks to persist. Each variant is one step of the
/// negotiation and is written atomically by `NegotiationDao::store`.
#[derive(Clone, Debug, PartialEq)]
pub enum PersistRecord {
    Solicitation(StoreSolicitation),
    AttestationBid(StoreAttestationBid),
    AwaitSubjectData(StoreAwaitSubjectData),
    JobDetails(StoreJobDetails),
    StartAttestation(StoreStartAttestation),
    PaymentAuthorization(StorePaymentAuthorization),
}

impl PersistRecord {
    pub fn message_type(&self) -> MessageType {
        match self {
            PersistRecord::Solicitation(_) => MessageType::SolicitationStored,
            PersistRecord::AttestationBid(_) => MessageType::BidStored,
            PersistRecord::AwaitSubjectData(_) => MessageType::AwaitSubjectDataStored,
            PersistRecord::JobDetails(_) => MessageType::SendJobDetailsStored,
            PersistRecord::StartAttestation(_) => MessageType::StartAttestationStored,
            PersistRecord::PaymentAuthorization(_) => {
                MessageType::SendPaymentAuthorizationStored
            }
        }
    }

    pub fn negotiation_id(&self) -> &str {
        match self {
            PersistRecord::Solicitation(r) => &r.session,
            PersistRecord::AttestationBid(r) => &r.negotiation_session,
            PersistRecord::AwaitSubjectData(r) => &r.negotiation_session,
            PersistRecord::JobDetails(r) => &r.negotiation_session,
            PersistRecord::StartAttestation(r) => &r.negotiation_session,
            PersistRecord::PaymentAuthorization(r) => &r.negotiation_session,
        }
    }
}

/// Requester opened a negotiation for one of its attestations.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreSolicitation {
    pub session: String,
    pub attestation_id: String,
    pub reward_ask: BigDecimal,
    pub attestation_topic: Topic,
    pub reply_topic: Topic,
}

/// Attester bid on a solicitation.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreAttestationBid {
    pub bid_session: String,
    pub negotiation_session: String,
    pub solicitation_session: String,
    pub reward_ask: BigDecimal,
    pub reward_bid: BigDecimal,
    pub attestation_type: AttestationType,
    pub attestation_topic: Topic,
    pub listen_topic: Topic,
    pub requester_public_key: Option<String>,
}

/// Requester accepted a bid and waits for subject data.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreAwaitSubjectData {
    pub uuid: String,
    pub bid_session: String,
    pub negotiation_session: String,
    pub attester: Address,
    pub reward_bid: BigDecimal,
    pub attester_topic: Topic,
    pub attester_public_key: Option<String>,
}

/// Everything the attester needs to perform and submit an attestation.
#[derive(Clone, Debug, PartialEq)]
pub struct JobDetailsFields {
    pub subject: Address,
    pub subject_data: String,
    pub type_ids: Vec<i32>,
    pub subject_sig: String,
    pub requester_sig: String,
    pub payment_nonce: String,
    pub payment_sig: String,
    pub data_hash: String,
    pub request_nonce: String,
    pub reward: BigDecimal,
}

impl From<&SendJobDetails> for JobDetailsFields {
    fn from(msg: &SendJobDetails) -> Self {
        JobDetailsFields {
            subject: msg.subject,
            subject_data: msg.subject_data.to_string(),
            type_ids: msg.type_ids.clone(),
            subject_sig: msg.subject_sig.clone(),
            requester_sig: msg.requester_sig.clone(),
            payment_nonce: msg.payment_nonce.clone(),
            payment_sig: msg.payment_sig.clone(),
            data_hash: msg.data_hash.clone(),
            request_nonce: msg.request_nonce.clone(),
            reward: msg.reward.clone(),
        }
    }
}

/// Requester sent job details to the accepted attester.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreJobDetails {
    pub session: String,
    pub bid_session: String,
    pub negotiation_session: String,
    pub details: JobDetailsFields,
}

/// Attester received valid job details.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreStartAttestation {
    pub session: String,
    pub bid_session: String,
    pub negotiation_session: String,
    pub attester: Address,
    pub requester: Address,
    pub details: JobDetailsFields,
}

/// Payment authorization sent (requester) or received (attester).
#[derive(Clone, Debug, PartialEq)]
pub struct StorePaymentAuthorization {
    pub role: AttestationRole,
    pub session: String,
    pub bid_session: String,
    pub negotiation_session: String,
    pub requester: Address,
    pub attester: Address,
    pub reward: BigDecimal,
    pub payment_nonce: String,
    pub payment_sig: String,
}
