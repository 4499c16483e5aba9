use metrics::counter;
use std::str::FromStr;
use std::sync::Arc;

use attest_ledger::{Address, AttestationTx, Ledger, LedgerError};
use attest_persistence::executor::DbExecutor;
use attest_whisper::{FilterKey, Post, PostTarget, Topic, Whisper, WhisperError};

use crate::crypto::parse_bytes32;
use crate::db::dao::{AttestationDao, FilterDao};
use crate::db::model::{Attestation, AttestationRole, AttestationStatus, WhisperFilter};
use crate::db::DbError;
use crate::negotiation::{Subscription, SubscriptionKind};
use crate::protocol::Message;
use crate::queue::Task;

#[derive(thiserror::Error, Debug)]
pub enum TaskError {
    /// Transient failure, the job goes back to the queue.
    #[error("{0}")]
    Retryable(String),
    #[error("{0}")]
    Fatal(String),
}

impl TaskError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Retryable(_))
    }
}

impl From<WhisperError> for TaskError {
    fn from(e: WhisperError) -> Self {
        TaskError::Retryable(e.to_string())
    }
}

impl From<DbError> for TaskError {
    fn from(e: DbError) -> Self {
        TaskError::Retryable(e.to_string())
    }
}

impl From<LedgerError> for TaskError {
    fn from(e: LedgerError) -> Self {
        TaskError::Retryable(e.to_string())
    }
}

/// Executes queued tasks. Every handler can run more than once for the same
/// job: sessions are deleted before being recreated and deleting what is
/// already gone is not an error.
#[derive(Clone)]
pub struct TaskRunner {
    db: DbExecutor,
    whisper: Arc<dyn Whisper>,
    ledger: Arc<dyn Ledger>,
}

impl TaskRunner {
    pub fn new(db: DbExecutor, whisper: Arc<dyn Whisper>, ledger: Arc<dyn Ledger>) -> TaskRunner {
        TaskRunner {
            db,
            whisper,
            ledger,
        }
    }

    pub async fn run(&self, task: &Task) -> Result<(), TaskError> {
        match task {
            Task::WhisperEndSession { topic, entity } => self.end_session(topic, entity).await,
            Task::WhisperNewBroadcastSession {
                subscription,
                entity,
            } => self.new_session(subscription, entity).await.map(|_| ()),
            Task::WhisperBroadcastMessage {
                message,
                topic,
                password,
            } => self.broadcast(message, topic, password).await,
            Task::WhisperDirectMessage {
                message,
                topic,
                public_key,
            } => self.direct_message(message, topic, public_key).await,
            Task::WhisperSubscribeThenBroadcast {
                subscription,
                entity,
                message,
                topic,
                password,
            } => {
                let message = self.subscribe_for_replies(subscription, entity, message).await?;
                self.broadcast(&message, topic, password).await
            }
            Task::WhisperSubscribeThenDirectMessage {
                subscription,
                entity,
                message,
                topic,
                public_key,
            } => {
                let message = self.subscribe_for_replies(subscription, entity, message).await?;
                self.direct_message(&message, topic, public_key).await
            }
            Task::SubmitAttestation { attestation_id } => {
                self.submit_attestation(attestation_id).await
            }
        }
    }

    async fn end_session(&self, topic: &Topic, entity: &str) -> Result<(), TaskError> {
        let dao = self.db.as_dao::<FilterDao>();
        for filter in dao.find(topic, entity).await? {
            if let Err(e) = self.whisper.delete_message_filter(&filter.filter_id).await {
                log::debug!("Filter [{}] already gone: {}", filter.filter_id, e);
            }
            if let Some(keypair_id) = &filter.keypair_id {
                if let Err(e) = self.whisper.delete_key_pair(keypair_id).await {
                    log::debug!("Keypair [{}] already gone: {}", keypair_id, e);
                }
            }
            dao.delete(&filter.filter_id).await?;
            log::debug!("[{}] stopped listening on {}.", entity, topic);
        }
        Ok(())
    }

    /// Creates the filter, replacing any existing one of the entity on the
    /// same topic. Returns the public key of a direct channel.
    async fn new_session(
        &self,
        subscription: &Subscription,
        entity: &str,
    ) -> Result<Option<String>, TaskError> {
        self.end_session(&subscription.topic, entity).await?;

        let (filter_id, keypair_id, public_key) = match &subscription.kind {
            SubscriptionKind::Broadcast { password } => {
                let key = self.whisper.generate_sym_key_from_password(password).await?;
                let filter_id = self
                    .whisper
                    .new_message_filter(vec![subscription.topic.clone()], FilterKey::SymKey(key))
                    .await?;
                (filter_id, None, None)
            }
            SubscriptionKind::Direct => {
                let keypair_id = self.whisper.new_key_pair().await?;
                let public_key = self.whisper.get_public_key(&keypair_id).await?;
                let filter_id = self
                    .whisper
                    .new_message_filter(
                        vec![subscription.topic.clone()],
                        FilterKey::PrivateKey(keypair_id.clone()),
                    )
                    .await?;
                (filter_id, Some(keypair_id), Some(public_key))
            }
        };

        self.db
            .as_dao::<FilterDao>()
            .insert(WhisperFilter::new(
                filter_id,
                entity.to_string(),
                keypair_id,
                &subscription.topic,
            ))
            .await?;
        log::debug!("[{}] listening on {}.", entity, subscription.topic);
        Ok(public_key)
    }

    async fn subscribe_for_replies(
        &self,
        subscription: &Subscription,
        entity: &str,
        message: &Message,
    ) -> Result<Message, TaskError> {
        let mut message = message.clone();
        if let Some(public_key) = self.new_session(subscription, entity).await? {
            message.set_reply_to(public_key);
        }
        Ok(message)
    }

    async fn broadcast(&self, message: &Message, topic: &Topic, password: &str) -> Result<(), TaskError> {
        let key = self.whisper.generate_sym_key_from_password(password).await?;
        self.post(message, topic, PostTarget::SymKey(key)).await
    }

    async fn direct_message(
        &self,
        message: &Message,
        topic: &Topic,
        public_key: &str,
    ) -> Result<(), TaskError> {
        self.post(message, topic, PostTarget::PublicKey(public_key.to_string()))
            .await
    }

    async fn post(&self, message: &Message, topic: &Topic, target: PostTarget) -> Result<(), TaskError> {
        self.whisper
            .post(Post {
                topic: topic.clone(),
                payload: message.to_payload(),
                target,
            })
            .await?;
        counter!("attestd.whisper.posted", 1);
        log::debug!("Posted {} [{}] on {}.", message.kind(), message.session(), topic);
        Ok(())
    }

    /// Submits a ready attester attestation on chain. The attestation row is
    /// claimed before the ledger call, so concurrent workers never send the
    /// same transaction twice. A no-op once a transaction is recorded.
    async fn submit_attestation(&self, attestation_id: &str) -> Result<(), TaskError> {
        let dao = self.db.as_dao::<AttestationDao>();
        let attestation = dao.get(attestation_id).await?.ok_or_else(|| {
            TaskError::Fatal(format!("Attestation [{}] not found.", attestation_id))
        })?;

        if attestation.tx_hash.is_some() || attestation.status == AttestationStatus::Complete {
            log::info!("Attestation [{}] already submitted.", attestation_id);
            return Ok(());
        }
        if attestation.role != AttestationRole::Attester {
            return Err(TaskError::Fatal(format!(
                "Attestation [{}] is a requester attestation.",
                attestation_id
            )));
        }
        if attestation.status == AttestationStatus::Initial {
            return Err(TaskError::Fatal(format!(
                "Attestation [{}] has no job details.",
                attestation_id
            )));
        }

        let tx = attestation_tx(&attestation).map_err(|e| {
            TaskError::Fatal(format!("Attestation [{}] is incomplete: {}", attestation_id, e))
        })?;

        if !dao.claim_for_submission(attestation_id).await? {
            return Err(TaskError::Retryable(format!(
                "Attestation [{}] is being submitted by another worker.",
                attestation_id
            )));
        }

        let tx_hash = match self.ledger.submit_attestation(&tx).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                dao.release_claim(attestation_id).await?;
                return Err(e.into());
            }
        };

        if !dao.mark_complete(attestation_id, &tx_hash).await? {
            log::warn!(
                "Attestation [{}] lost its submission claim while sending tx {}.",
                attestation_id,
                tx_hash
            );
        }
        counter!("attestd.attestation.submitted", 1);
        Ok(())
    }
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, String> {
    value.as_deref().ok_or_else(|| format!("missing {}", field))
}

fn address(value: &Option<String>, field: &str) -> Result<Address, String> {
    Address::from_str(required(value, field)?).map_err(|e| e.to_string())
}

fn hex_bytes(value: &Option<String>, field: &str) -> Result<Vec<u8>, String> {
    hex::decode(required(value, field)?.trim_start_matches("0x"))
        .map_err(|e| format!("{}: {}", field, e))
}

fn attestation_tx(attestation: &Attestation) -> Result<AttestationTx, String> {
    Ok(AttestationTx {
        attester: address(&attestation.attester, "attester")?,
        subject: address(&attestation.subject, "subject")?,
        requester: address(&attestation.requester, "requester")?,
        reward: attestation
            .reward
            .clone()
            .map(|reward| reward.0)
            .ok_or("missing reward")?,
        requester_sig: hex_bytes(&attestation.requester_sig, "requester signature")?,
        data_hash: parse_bytes32(required(&attestation.data_hash, "data hash")?)
            .map_err(|e| e.to_string())?,
        request_nonce: parse_bytes32(required(&attestation.request_nonce, "request nonce")?)
            .map_err(|e| e.to_string())?,
        subject_sig: hex_bytes(&attestation.subject_sig, "subject signature")?,
    })
}
