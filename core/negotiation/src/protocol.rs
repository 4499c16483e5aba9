//! Wire protocol: attestation type catalogue and negotiation messages.

pub mod attestation_type;
pub mod messages;

pub use attestation_type::AttestationType;
pub use messages::{
    AttestationBid, DecodeError, Message, PaymentAuthorization, Ping, Pong, Reply,
    SendJobDetails, Solicitation,
};

use attest_whisper::Topic;

use crate::crypto::to_topic;

/// Topic liveness pings are broadcast on.
pub fn ping_topic() -> Topic {
    to_topic("ping")
}
