//! Durable job queue for side effects that talk to Whisper or the ledger.
//!
//! Jobs live in the `job` table. A worker claims one with a compare-and-set
//! on its state, so each attempt runs once; a failed attempt is put back
//! with linear backoff until the retry limit. Delivery is at-least-once,
//! which is why every task handler is idempotent.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use attest_persistence::executor::DbExecutor;
use attest_persistence::types::AdaptTimestamp;
use attest_whisper::Topic;

use crate::config::QueueConfig;
use crate::db::dao::JobDao;
use crate::db::model::{JobState, NewJob};
use crate::db::DbError;
use crate::negotiation::Subscription;
use crate::protocol::Message;

mod tasks;
mod worker;

pub use tasks::{TaskError, TaskRunner};
pub use worker::Worker;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "kebab-case")]
pub enum Task {
    /// Drop every local filter of `entity` on `topic`, with their keypairs.
    WhisperEndSession { topic: Topic, entity: String },
    /// (Re)create a filter; an existing one on the same topic is replaced.
    WhisperNewBroadcastSession {
        subscription: Subscription,
        entity: String,
    },
    WhisperBroadcastMessage {
        message: Message,
        topic: Topic,
        password: String,
    },
    WhisperDirectMessage {
        message: Message,
        topic: Topic,
        public_key: String,
    },
    /// Subscribe, then broadcast `message` with `replyTo` set to the new
    /// channel's public key.
    WhisperSubscribeThenBroadcast {
        subscription: Subscription,
        entity: String,
        message: Message,
        topic: Topic,
        password: String,
    },
    WhisperSubscribeThenDirectMessage {
        subscription: Subscription,
        entity: String,
        message: Message,
        topic: Topic,
        public_key: String,
    },
    SubmitAttestation { attestation_id: String },
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::WhisperEndSession { .. } => "whisper-end-session",
            Task::WhisperNewBroadcastSession { .. } => "whisper-new-broadcast-session",
            Task::WhisperBroadcastMessage { .. } => "whisper-broadcast-message",
            Task::WhisperDirectMessage { .. } => "whisper-direct-message",
            Task::WhisperSubscribeThenBroadcast { .. } => "whisper-subscribe-then-broadcast",
            Task::WhisperSubscribeThenDirectMessage { .. } => {
                "whisper-subscribe-then-direct-message"
            }
            Task::SubmitAttestation { .. } => "submit-attestation",
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum QueueError {
    #[error("Job queue storage error: {0}")]
    Db(#[from] DbError),
    #[error("Invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Job claimed by a worker.
#[derive(Clone, Debug)]
pub struct ClaimedJob {
    pub id: i32,
    pub attempts: i32,
    pub retry_limit: i32,
    pub task: Task,
}

#[derive(Clone)]
pub struct JobQueue {
    db: DbExecutor,
    retry_limit: i32,
    retry_delay: Duration,
}

impl JobQueue {
    pub fn new(db: DbExecutor, config: &QueueConfig) -> JobQueue {
        JobQueue {
            db,
            retry_limit: config.job_retry_limit,
            retry_delay: config.job_retry_delay,
        }
    }

    pub async fn publish(&self, task: Task) -> Result<i32, QueueError> {
        self.publish_after(task, Duration::from_secs(0)).await
    }

    pub async fn publish_after(&self, task: Task, delay: Duration) -> Result<i32, QueueError> {
        let job = self.job_row(&task, delay)?;
        let id = self.db.as_dao::<JobDao>().insert(job).await?;
        log::trace!("Published job [{}] {}.", id, task.name());
        Ok(id)
    }

    /// Job row for `task`, due at once, for callers that insert it in their
    /// own transaction.
    pub fn job(&self, task: &Task) -> Result<NewJob, QueueError> {
        self.job_row(task, Duration::from_secs(0))
    }

    fn job_row(&self, task: &Task, delay: Duration) -> Result<NewJob, QueueError> {
        let now = Utc::now().naive_utc();
        let run_after =
            now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        Ok(NewJob {
            task_name: task.name().to_string(),
            payload: serde_json::to_string(task)?,
            state: JobState::Pending,
            attempts: 0,
            retry_limit: self.retry_limit,
            run_after: run_after.adapt(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Claims the next due job. Jobs with a payload this build can't decode
    /// are failed on the spot.
    pub async fn next(&self) -> Result<Option<ClaimedJob>, QueueError> {
        let dao = self.db.as_dao::<JobDao>();
        loop {
            let job = match dao.claim_next().await? {
                Some(job) => job,
                None => return Ok(None),
            };
            match serde_json::from_str::<Task>(&job.payload) {
                Ok(task) => {
                    return Ok(Some(ClaimedJob {
                        id: job.id,
                        attempts: job.attempts,
                        retry_limit: job.retry_limit,
                        task,
                    }))
                }
                Err(e) => {
                    log::error!("Job [{}] {} has invalid payload: {}", job.id, job.task_name, e);
                    dao.fail(job.id, e.to_string(), None).await?;
                }
            }
        }
    }

    pub async fn complete(&self, job: &ClaimedJob) -> Result<(), QueueError> {
        Ok(self.db.as_dao::<JobDao>().complete(job.id).await?)
    }

    /// Schedules a retry `attempts * retry_delay` from now, or fails the job
    /// for good once out of attempts or on a non-retryable error.
    pub async fn fail(&self, job: &ClaimedJob, error: &TaskError) -> Result<(), QueueError> {
        let retry_at = match error.is_retryable() && job.attempts < job.retry_limit {
            true => {
                let backoff = self.retry_delay * job.attempts.max(1) as u32;
                let backoff = chrono::Duration::from_std(backoff)
                    .unwrap_or_else(|_| chrono::Duration::seconds(60));
                Some(Utc::now().naive_utc() + backoff)
            }
            false => None,
        };
        if retry_at.is_none() {
            log::warn!(
                "Job [{}] {} failed for good after {} attempt(s): {}",
                job.id,
                job.task.name(),
                job.attempts,
                error
            );
        }
        Ok(self
            .db
            .as_dao::<JobDao>()
            .fail(job.id, error.to_string(), retry_at)
            .await?)
    }

    /// Hands jobs interrupted by a shutdown back to the workers.
    pub async fn recover(&self) -> Result<usize, QueueError> {
        let requeued = self.db.as_dao::<JobDao>().requeue_active().await?;
        if requeued > 0 {
            log::info!("Requeued {} interrupted job(s).", requeued);
        }
        Ok(requeued)
    }

    /// Tasks of jobs in the given state, oldest first.
    pub async fn tasks(&self, state: JobState) -> Result<Vec<Task>, QueueError> {
        self.db
            .as_dao::<JobDao>()
            .list(Some(state))
            .await?
            .iter()
            .map(|job| serde_json::from_str::<Task>(&job.payload).map_err(QueueError::from))
            .collect()
    }
}
