//! In-process Whisper network. Every [`MockWhisper`] node created from the
//! same [`MockNetwork`] sees the messages the others post, with the same
//! routing rules as a real node: symmetric filters match posts encrypted
//! with a key derived from the same password, asymmetric filters match
//! posts addressed to their keypair's public key.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    FilterId, FilterKey, KeyId, Post, PostTarget, Topic, Whisper, WhisperError, WhisperMessage,
};

#[derive(Clone, Debug)]
enum Envelope {
    Sym { password: String },
    Asym { public_key: String },
}

#[derive(Clone, Debug)]
struct Posted {
    post: Post,
    envelope: Envelope,
    hash: String,
    timestamp: u64,
}

#[derive(Default)]
struct NetworkState {
    log: Vec<Posted>,
    clock: u64,
}

#[derive(Clone, Default)]
pub struct MockNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, name: &str) -> MockWhisper {
        MockWhisper {
            name: name.to_string(),
            network: self.clone(),
            node: Arc::new(Mutex::new(NodeState::default())),
        }
    }

    /// Every payload posted on `topic` so far, in posting order.
    pub fn posted_on(&self, topic: &Topic) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|p| &p.post.topic == topic)
            .map(|p| p.post.payload.clone())
            .collect()
    }

    pub fn posted_count(&self) -> usize {
        self.state.lock().log.len()
    }

    fn publish(&self, post: Post, envelope: Envelope) {
        let mut state = self.state.lock();
        state.clock += 1;
        let timestamp = state.clock;
        let hash = format!("0x{:064x}", timestamp);
        state.log.push(Posted {
            post,
            envelope,
            hash,
            timestamp,
        });
    }
}

struct MockFilter {
    topics: Vec<Topic>,
    key: FilterKey,
    cursor: usize,
}

#[derive(Default)]
struct NodeState {
    sym_keys: HashMap<KeyId, String>,
    key_pairs: HashMap<KeyId, String>,
    filters: HashMap<FilterId, MockFilter>,
}

#[derive(Clone)]
pub struct MockWhisper {
    name: String,
    network: MockNetwork,
    node: Arc<Mutex<NodeState>>,
}

fn random_id() -> String {
    hex::encode(rand::thread_rng().gen::<[u8; 16]>())
}

impl MockWhisper {
    /// Drops a filter on the "node" side only, like a real node does once
    /// the filter is idle for too long.
    pub fn expire_filter(&self, filter_id: &str) {
        self.node.lock().filters.remove(filter_id);
    }

    pub fn active_filters(&self) -> Vec<(FilterId, Vec<Topic>)> {
        self.node
            .lock()
            .filters
            .iter()
            .map(|(id, f)| (id.clone(), f.topics.clone()))
            .collect()
    }

    pub fn key_pair_count(&self) -> usize {
        self.node.lock().key_pairs.len()
    }

    fn matches(node: &NodeState, filter: &MockFilter, posted: &Posted) -> bool {
        if !filter.topics.contains(&posted.post.topic) {
            return false;
        }
        match (&filter.key, &posted.envelope) {
            (FilterKey::SymKey(key), Envelope::Sym { password }) => {
                node.sym_keys.get(key) == Some(password)
            }
            (FilterKey::PrivateKey(key), Envelope::Asym { public_key }) => {
                node.key_pairs.get(key) == Some(public_key)
            }
            _ => false,
        }
    }
}

#[async_trait]
impl Whisper for MockWhisper {
    async fn post(&self, post: Post) -> Result<bool, WhisperError> {
        let envelope = match &post.target {
            PostTarget::SymKey(key) => {
                let node = self.node.lock();
                let password = node.sym_keys.get(key).cloned().ok_or_else(|| {
                    WhisperError::Rpc {
                        method: "shh_post".to_string(),
                        code: -32000,
                        message: format!("non-existent key ID [{}]", key),
                    }
                })?;
                Envelope::Sym { password }
            }
            PostTarget::PublicKey(public_key) => Envelope::Asym {
                public_key: public_key.clone(),
            },
        };
        log::trace!("[{}] posting on {}", self.name, post.topic);
        self.network.publish(post, envelope);
        Ok(true)
    }

    async fn new_message_filter(
        &self,
        topics: Vec<Topic>,
        key: FilterKey,
    ) -> Result<FilterId, WhisperError> {
        let cursor = self.network.state.lock().log.len();
        let id = random_id();
        self.node.lock().filters.insert(
            id.clone(),
            MockFilter {
                topics,
                key,
                cursor,
            },
        );
        Ok(id)
    }

    async fn delete_message_filter(&self, filter_id: &str) -> Result<bool, WhisperError> {
        match self.node.lock().filters.remove(filter_id) {
            Some(_) => Ok(true),
            None => Err(WhisperError::FilterNotFound(filter_id.to_string())),
        }
    }

    async fn get_filter_messages(
        &self,
        filter_id: &str,
    ) -> Result<Vec<WhisperMessage>, WhisperError> {
        let network = self.network.state.lock();
        let mut node = self.node.lock();

        let cursor = match node.filters.get(filter_id) {
            Some(filter) => filter.cursor,
            None => return Err(WhisperError::FilterNotFound(filter_id.to_string())),
        };
        let messages = match node.filters.get(filter_id) {
            Some(filter) => network.log[cursor..]
                .iter()
                .filter(|posted| Self::matches(&node, filter, posted))
                .map(|posted| WhisperMessage {
                    hash: posted.hash.clone(),
                    topic: posted.post.topic.clone(),
                    payload: posted.post.payload.clone(),
                    timestamp: posted.timestamp,
                })
                .collect(),
            None => Vec::new(),
        };
        if let Some(filter) = node.filters.get_mut(filter_id) {
            filter.cursor = network.log.len();
        }
        Ok(messages)
    }

    async fn generate_sym_key_from_password(&self, password: &str) -> Result<KeyId, WhisperError> {
        let id = random_id();
        self.node
            .lock()
            .sym_keys
            .insert(id.clone(), password.to_string());
        Ok(id)
    }

    async fn new_key_pair(&self) -> Result<KeyId, WhisperError> {
        let id = random_id();
        let public_key = format!("0x04{}", hex::encode(rand::thread_rng().gen::<[u8; 32]>()));
        self.node.lock().key_pairs.insert(id.clone(), public_key);
        Ok(id)
    }

    async fn get_public_key(&self, keypair_id: &str) -> Result<String, WhisperError> {
        self.node
            .lock()
            .key_pairs
            .get(keypair_id)
            .cloned()
            .ok_or_else(|| WhisperError::Rpc {
                method: "shh_getPublicKey".to_string(),
                code: -32000,
                message: format!("non-existent key ID [{}]", keypair_id),
            })
    }

    async fn delete_key_pair(&self, keypair_id: &str) -> Result<bool, WhisperError> {
        Ok(self.node.lock().key_pairs.remove(keypair_id).is_some())
    }
}
