use chrono::{NaiveDateTime, Utc};
use diesel::sql_types::Text;

use attest_persistence::types::BigDecimalField;

use crate::db::schema::{negotiation, negotiation_msg};

/// Kind of step a [`NegotiationMsg`] row records. Together with the
/// regarded message and the negotiation it forms the idempotency key.
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
pub enum MessageType {
    SolicitationStored,
    BidStored,
    AwaitSubjectDataStored,
    SendJobDetailsStored,
    StartAttestationStored,
    SendPaymentAuthorizationStored,
}

text_field!(MessageType);

#[derive(Clone, Debug, Identifiable, Insertable, Queryable)]
#[table_name = "negotiation"]
pub struct Negotiation {
    /// Session id of the solicitation that opened the negotiation.
    pub id: String,
    pub initial_reward: BigDecimalField,
    pub attestation_topic: String,
    pub attestation_id: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Negotiation {
    pub fn new(id: String, initial_reward: BigDecimalField, attestation_topic: String) -> Self {
        Negotiation {
            id,
            initial_reward,
            attestation_topic,
            attestation_id: None,
            created_at: Utc::now().naive_utc(),
        }
    }
}

#[derive(Clone, Debug, Insertable, Queryable)]
#[table_name = "negotiation_msg"]
pub struct NegotiationMsg {
    pub uuid: String,
    pub regarding_uuid: Option<String>,
    pub negotiation_id: String,
    /// Topic later replies in this negotiation land on.
    pub future_topic: Option<String>,
    pub message_type: MessageType,
    pub bid: Option<BigDecimalField>,
    /// Whisper public key of the counterparty's direct channel.
    pub reply_to: Option<String>,
    pub created_at: NaiveDateTime,
}

impl NegotiationMsg {
    pub fn new(
        uuid: String,
        regarding_uuid: Option<String>,
        negotiation_id: String,
        message_type: MessageType,
    ) -> Self {
        NegotiationMsg {
            uuid,
            regarding_uuid,
            negotiation_id,
            future_topic: None,
            message_type,
            bid: None,
            reply_to: None,
            created_at: Utc::now().naive_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_message_type_names() {
        assert_eq!(MessageType::BidStored.to_string(), "bid-stored");
        assert_eq!(
            MessageType::from_str("await-subject-data-stored").unwrap(),
            MessageType::AwaitSubjectDataStored
        );
    }
}
