use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use attest_ledger::Address;
use attest_whisper::Topic;

/// Message exchanged over Whisper. Serialized as JSON with a `messageType`
/// tag and camelCase fields; the JSON text is the hex-encoded payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageType", rename_all = "camelCase")]
pub enum Message {
    Solicitation(Solicitation),
    AttestationBid(AttestationBid),
    SendJobDetails(SendJobDetails),
    PaymentAuthorization(PaymentAuthorization),
    Ping(Ping),
    Pong(Pong),
}

/// Requester's broadcast asking attesters of one type for bids.
/// `session` doubles as the negotiation id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Solicitation {
    pub session: String,
    pub session_signed: String,
    pub reward_ask: BigDecimal,
    /// Whisper public key of the requester's reply channel. Filled in by
    /// the job that creates the channel, right before posting.
    pub reply_to: Option<String>,
    pub reply_to_topic: Topic,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationBid {
    pub session: String,
    pub negotiation_session: String,
    pub re_session: String,
    pub re_session_signed: String,
    pub reward_bid: BigDecimal,
    pub reply_to: Option<String>,
    pub reply_to_topic: Topic,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendJobDetails {
    pub session: String,
    pub negotiation_session: String,
    pub re_session: String,
    pub re_session_signed: String,
    pub reward: BigDecimal,
    pub subject: Address,
    pub subject_data: serde_json::Value,
    pub type_ids: Vec<i32>,
    pub subject_sig: String,
    pub payment_nonce: String,
    pub payment_sig: String,
    pub requester_sig: String,
    pub data_hash: String,
    pub request_nonce: String,
    pub reply_to: Option<String>,
    pub reply_to_topic: Topic,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorization {
    pub session: String,
    pub negotiation_session: String,
    pub re_session: String,
    pub re_session_signed: String,
    pub reward: BigDecimal,
    pub requester: Address,
    pub attester: Address,
    pub payment_nonce: String,
    pub payment_sig: String,
    pub reply_to: Option<String>,
    pub reply_to_topic: Topic,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ping {
    pub session: String,
    pub reply_to_topic: Topic,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pong {
    pub session: String,
    pub re_session: String,
}

/// Message answering a previous step: names the negotiation and carries the
/// sender's signature over the session it answers.
pub trait Reply {
    fn negotiation_session(&self) -> &str;
    fn re_session(&self) -> &str;
    fn re_session_signed(&self) -> &str;
}

macro_rules! impl_reply {
    ($($t:ty),*) => {
        $(impl Reply for $t {
            fn negotiation_session(&self) -> &str {
                &self.negotiation_session
            }
            fn re_session(&self) -> &str {
                &self.re_session
            }
            fn re_session_signed(&self) -> &str {
                &self.re_session_signed
            }
        })*
    };
}

impl_reply!(AttestationBid, SendJobDetails, PaymentAuthorization);

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("Payload is not UTF-8 JSON: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("Unrecognized message: {0}")]
    Json(#[from] serde_json::Error),
}

impl Message {
    pub fn from_payload(payload: &[u8]) -> Result<Message, DecodeError> {
        let text = String::from_utf8(payload.to_vec())?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn to_payload(&self) -> Vec<u8> {
        // Serializing plain structs with string keys can't fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Solicitation(_) => "solicitation",
            Message::AttestationBid(_) => "attestationBid",
            Message::SendJobDetails(_) => "sendJobDetails",
            Message::PaymentAuthorization(_) => "paymentAuthorization",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
        }
    }

    pub fn session(&self) -> &str {
        match self {
            Message::Solicitation(m) => &m.session,
            Message::AttestationBid(m) => &m.session,
            Message::SendJobDetails(m) => &m.session,
            Message::PaymentAuthorization(m) => &m.session,
            Message::Ping(m) => &m.session,
            Message::Pong(m) => &m.session,
        }
    }

    /// Negotiation the message belongs to. Liveness pings belong to none.
    pub fn negotiation_id(&self) -> Option<&str> {
        match self {
            Message::Solicitation(m) => Some(&m.session),
            Message::AttestationBid(m) => Some(m.negotiation_session()),
            Message::SendJobDetails(m) => Some(m.negotiation_session()),
            Message::PaymentAuthorization(m) => Some(m.negotiation_session()),
            Message::Ping(_) | Message::Pong(_) => None,
        }
    }

    /// Sets the public key replies should be encrypted to. No-op for
    /// messages nobody answers directly.
    pub fn set_reply_to(&mut self, public_key: String) {
        match self {
            Message::Solicitation(m) => m.reply_to = Some(public_key),
            Message::AttestationBid(m) => m.reply_to = Some(public_key),
            Message::SendJobDetails(m) => m.reply_to = Some(public_key),
            Message::PaymentAuthorization(m) => m.reply_to = Some(public_key),
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_solicitation_wire_format() {
        let message = Message::Solicitation(Solicitation {
            session: "s-1".to_string(),
            session_signed: "0xsig".to_string(),
            reward_ask: BigDecimal::from_str("12.5").unwrap(),
            reply_to: None,
            reply_to_topic: Topic::from_bytes([1, 2, 3, 4]),
        });
        let json: serde_json::Value = serde_json::from_slice(&message.to_payload()).unwrap();

        assert_eq!(json["messageType"], "solicitation");
        assert_eq!(json["session"], "s-1");
        assert_eq!(json["sessionSigned"], "0xsig");
        assert_eq!(json["replyToTopic"], "0x01020304");
        assert_eq!(json["rewardAsk"], "12.5");
    }

    #[test]
    fn test_decode_bid_and_set_reply_to() {
        let payload = br#"{
            "messageType": "attestationBid",
            "session": "b-1",
            "negotiationSession": "s-1",
            "reSession": "s-1",
            "reSessionSigned": "0xsig",
            "rewardBid": "10",
            "replyTo": null,
            "replyToTopic": "0xdeadbeef"
        }"#;
        let mut message = Message::from_payload(payload).unwrap();
        assert_eq!(message.kind(), "attestationBid");
        assert_eq!(message.session(), "b-1");
        assert_eq!(message.negotiation_id(), Some("s-1"));

        message.set_reply_to("0x04ab".to_string());
        match message {
            Message::AttestationBid(bid) => {
                assert_eq!(bid.reply_to.as_deref(), Some("0x04ab"));
                assert_eq!(bid.reward_bid, BigDecimal::from(10));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_message_type_is_a_decode_error() {
        assert!(Message::from_payload(br#"{"messageType":"gossip","session":"x"}"#).is_err());
        assert!(Message::from_payload(&[0xff, 0xfe]).is_err());
    }
}
