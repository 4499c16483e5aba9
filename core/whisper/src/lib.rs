//! Whisper transport adapter.
//!
//! The negotiation core only sees the [`Whisper`] trait. [`WhisperClient`]
//! talks to a node over the `shh_*` JSON-RPC namespace, [`mock`] provides an
//! in-process network for tests.

pub mod client;
pub mod error;
pub mod mock;
pub mod topic;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use client::{PostOptions, WhisperClient};
pub use error::WhisperError;
pub use topic::{Topic, TopicParseError};

pub type FilterId = String;
pub type KeyId = String;

/// Recipient of a posted message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostTarget {
    /// Symmetric key id, everyone knowing the password can read it.
    SymKey(KeyId),
    /// Public key of a direct-message keypair.
    PublicKey(String),
}

/// Key a filter decrypts with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterKey {
    SymKey(KeyId),
    PrivateKey(KeyId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Post {
    pub topic: Topic,
    pub payload: Vec<u8>,
    pub target: PostTarget,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WhisperMessage {
    pub hash: String,
    pub topic: Topic,
    pub payload: Vec<u8>,
    pub timestamp: u64,
}

#[async_trait]
pub trait Whisper: Send + Sync {
    async fn post(&self, post: Post) -> Result<bool, WhisperError>;

    async fn new_message_filter(
        &self,
        topics: Vec<Topic>,
        key: FilterKey,
    ) -> Result<FilterId, WhisperError>;

    async fn delete_message_filter(&self, filter_id: &str) -> Result<bool, WhisperError>;

    /// Messages received since the previous call. A filter that the node
    /// dropped (expired or unknown) yields [`WhisperError::FilterNotFound`].
    async fn get_filter_messages(&self, filter_id: &str)
        -> Result<Vec<WhisperMessage>, WhisperError>;

    async fn generate_sym_key_from_password(&self, password: &str) -> Result<KeyId, WhisperError>;

    async fn new_key_pair(&self) -> Result<KeyId, WhisperError>;

    async fn get_public_key(&self, keypair_id: &str) -> Result<String, WhisperError>;

    async fn delete_key_pair(&self, keypair_id: &str) -> Result<bool, WhisperError>;
}
