use metrics::counter;
use std::sync::Arc;

use attest_persistence::executor::DbExecutor;

use crate::db::dao::{NegotiationDao, StoreError};
use crate::negotiation::{Decision, Entity, Recipient, RecipientKind};
use crate::notifier::Notifier;
use crate::queue::{JobQueue, QueueError, Task};

#[derive(thiserror::Error, Debug)]
pub enum ExecuteError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Execution {
    /// Persisted (if asked) with the listed jobs enqueued in the same
    /// transaction.
    Applied { jobs: Vec<&'static str> },
    /// Step was stored by an earlier delivery of the same message. Nothing
    /// was done.
    Replayed,
}

/// Carries out a [`Decision`]: state together with its Whisper jobs, then
/// the external notification.
#[derive(Clone)]
pub struct DecisionExecutor {
    db: DbExecutor,
    queue: JobQueue,
    notifier: Arc<dyn Notifier>,
}

fn respond_task(recipient: Recipient, message: crate::protocol::Message) -> Task {
    match recipient.kind {
        RecipientKind::Broadcast { password } => Task::WhisperBroadcastMessage {
            message,
            topic: recipient.topic,
            password,
        },
        RecipientKind::Direct { public_key } => Task::WhisperDirectMessage {
            message,
            topic: recipient.topic,
            public_key,
        },
    }
}

impl DecisionExecutor {
    pub fn new(db: DbExecutor, queue: JobQueue, notifier: Arc<dyn Notifier>) -> Self {
        DecisionExecutor {
            db,
            queue,
            notifier,
        }
    }

    pub async fn execute(
        &self,
        decision: Decision,
        entity: &Entity,
    ) -> Result<Execution, ExecuteError> {
        let action = decision.action;
        if decision.is_rejection() {
            counter!("attestd.negotiation.rejected", 1);
            let reasons: Vec<String> = decision.reasons.iter().map(ToString::to_string).collect();
            log::info!("[{}] {}: {}", entity, action, reasons.join("; "));
        }

        let entity_name = entity.to_string();
        let mut tasks = vec![];
        if let Some(topic) = decision.unsubscribe_from {
            tasks.push(Task::WhisperEndSession {
                topic,
                entity: entity_name.clone(),
            });
        }
        match (decision.subscribe_to, decision.respond_to, decision.respond_with) {
            (Some(subscription), None, _) => tasks.push(Task::WhisperNewBroadcastSession {
                subscription,
                entity: entity_name,
            }),
            (None, Some(recipient), Some(message)) => tasks.push(respond_task(recipient, message)),
            (Some(subscription), Some(recipient), Some(message)) => {
                tasks.push(match recipient.kind {
                    RecipientKind::Broadcast { password } => Task::WhisperSubscribeThenBroadcast {
                        subscription,
                        entity: entity_name,
                        message,
                        topic: recipient.topic,
                        password,
                    },
                    RecipientKind::Direct { public_key } => {
                        Task::WhisperSubscribeThenDirectMessage {
                            subscription,
                            entity: entity_name,
                            message,
                            topic: recipient.topic,
                            public_key,
                        }
                    }
                })
            }
            (_, Some(recipient), None) => {
                log::warn!("[{}] {} names recipient {} but no message.", entity, action, recipient.topic)
            }
            (None, None, _) => (),
        }
        let jobs: Vec<&'static str> = tasks.iter().map(Task::name).collect();

        match decision.persist {
            // The step and its jobs commit together: a redelivered message is
            // either a full replay or finds nothing stored.
            Some(record) => {
                let negotiation_id = record.negotiation_id().to_string();
                let rows = tasks
                    .iter()
                    .map(|task| self.queue.job(task))
                    .collect::<Result<Vec<_>, _>>()?;
                match self
                    .db
                    .as_dao::<NegotiationDao>()
                    .store_with_jobs(record, rows)
                    .await
                {
                    Ok(()) => (),
                    Err(StoreError::Duplicate { message_type, .. }) => {
                        counter!("attestd.negotiation.replayed", 1);
                        log::debug!(
                            "[{}] {} of [{}] already stored, skipping.",
                            entity,
                            message_type,
                            negotiation_id
                        );
                        return Ok(Execution::Replayed);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None => {
                for task in tasks {
                    self.queue.publish(task).await?;
                }
            }
        }

        if let Some(external) = decision.external_action {
            if let Err(e) = self.notifier.notify(&external).await {
                counter!("attestd.webhook.failed", 1);
                log::error!("[{}] {}: notification failed: {}", entity, action, e);
            }
        }

        counter!("attestd.negotiation.decisions", 1);
        log::debug!("[{}] {} executed, jobs: {:?}", entity, action, jobs);
        Ok(Execution::Applied { jobs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Message, Pong};
    use attest_whisper::Topic;

    fn pong() -> Message {
        Message::Pong(Pong {
            session: "pong".to_string(),
            re_session: "ping".to_string(),
        })
    }

    #[test]
    fn test_respond_task_follows_recipient_kind() {
        let topic = Topic::from_bytes([0, 0, 0, 1]);
        match respond_task(Recipient::direct(topic.clone(), "0x04ab"), pong()) {
            Task::WhisperDirectMessage { public_key, .. } => assert_eq!(public_key, "0x04ab"),
            other => panic!("Unexpected task: {:?}", other),
        }
        match respond_task(Recipient::broadcast(topic, "secret"), pong()) {
            Task::WhisperBroadcastMessage { password, .. } => assert_eq!(password, "secret"),
            other => panic!("Unexpected task: {:?}", other),
        }
    }
}
