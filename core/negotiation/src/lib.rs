//! Negotiation core of the attestation marketplace.
//!
//! Requesters broadcast solicitations on per-attestation-type topics,
//! attesters answer with bids, the requester accepts one and sends job
//! details (or a payment authorization) over a direct channel. Every step is
//! a pure [`Decision`] executed by the [`DecisionExecutor`]; side effects that
//! touch Whisper or the ledger run as idempotent jobs from the [`JobQueue`].

#[macro_use]
extern crate diesel;
#[macro_use]
extern crate diesel_migrations;

pub mod config;
pub mod crypto;
pub mod db;
pub mod executor;
pub mod negotiation;
pub mod notifier;
pub mod protocol;
pub mod queue;
pub mod service;
#[cfg(any(test, feature = "test-suite"))]
pub mod testing;

pub use config::Config;
pub use executor::{DecisionExecutor, Execution};
pub use negotiation::{Decision, DecisionAction, Entity, RejectReason, Rejected};
pub use notifier::{Notifier, WebhookNotifier};
pub use protocol::{AttestationType, Message};
pub use queue::{JobQueue, Task, Worker};
pub use service::NegotiationService;
