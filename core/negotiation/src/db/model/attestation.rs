use chrono::{NaiveDateTime, Utc};
use diesel::sql_types::Text;
use std::str::FromStr;

use attest_ledger::Address;
use attest_persistence::types::BigDecimalField;

use crate::db::schema::attestation;
use crate::protocol::AttestationType;

#[derive(
    strum::EnumString,
    strum::Display,
    strum::AsRefStr,
    AsExpression,
    FromSqlRow,
    PartialEq,
    Eq,
    Debug,
    Clone,
    Copy,
)]
#[strum(serialize_all = "kebab-case")]
#[sql_type = "Text"]
pub enum AttestationRole {
    Requester,
    Attester,
}

text_field!(AttestationRole);

#[derive(
    strum::EnumString,
    strum::Display,
    strum::AsRefStr,
    AsExpression,
    FromSqlRow,
    PartialEq,
    Eq,
    Debug,
    Clone,
    Copy,
)]
#[strum(serialize_all = "kebab-case")]
#[sql_type = "Text"]
pub enum AttestationStatus {
    /// Negotiation still in progress.
    Initial,
    /// Job details or payment authorization received, work can start.
    Ready,
    /// Claimed by a worker that is sending the transaction.
    Submitting,
    /// Attestation submitted on chain.
    Complete,
}

text_field!(AttestationStatus);

#[derive(Clone, Debug, Identifiable, Insertable, Queryable)]
#[table_name = "attestation"]
pub struct Attestation {
    pub id: String,
    pub role: AttestationRole,
    pub attestation_type: AttestationType,
    pub status: AttestationStatus,
    pub negotiation_id: Option<String>,
    pub subject: Option<String>,
    pub attester: Option<String>,
    pub requester: Option<String>,
    /// Subject data as JSON text.
    pub data: Option<String>,
    /// JSON array of attestation type ids.
    pub type_ids: Option<String>,
    pub subject_sig: Option<String>,
    pub requester_sig: Option<String>,
    pub payment_nonce: Option<String>,
    pub payment_sig: Option<String>,
    pub data_hash: Option<String>,
    pub request_nonce: Option<String>,
    pub reward: Option<BigDecimalField>,
    pub tx_hash: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Attestation {
    pub fn new(role: AttestationRole, attestation_type: AttestationType) -> Self {
        let now = Utc::now().naive_utc();
        Attestation {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            attestation_type,
            status: AttestationStatus::Initial,
            negotiation_id: None,
            subject: None,
            attester: None,
            requester: None,
            data: None,
            type_ids: None,
            subject_sig: None,
            requester_sig: None,
            payment_nonce: None,
            payment_sig: None,
            data_hash: None,
            request_nonce: None,
            reward: None,
            tx_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn attester_address(&self) -> Option<Address> {
        self.attester.as_deref().and_then(|a| Address::from_str(a).ok())
    }

    pub fn type_ids(&self) -> Vec<i32> {
        self.type_ids
            .as_deref()
            .and_then(|ids| serde_json::from_str(ids).ok())
            .unwrap_or_default()
    }
}
