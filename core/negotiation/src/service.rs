use bigdecimal::BigDecimal;
use metrics::counter;
use std::sync::Arc;

use attest_ledger::Ledger;
use attest_persistence::executor::DbExecutor;
use attest_std_utils::LogErr;
use attest_whisper::{Whisper, WhisperMessage};

use crate::config::Config;
use crate::crypto::Wallet;
use crate::db::dao::{AttestationDao, FilterDao};
use crate::db::model::{Attestation, AttestationRole, WhisperFilter};
use crate::executor::{DecisionExecutor, ExecuteError, Execution};
use crate::negotiation::{
    CommonBroker, Entity, JobDetailsRequest, NegotiationBroker, NegotiationError,
    PaymentAuthorizationRequest, Subscription,
};
use crate::notifier::Notifier;
use crate::protocol::{ping_topic, AttestationType, Message};
use crate::queue::{JobQueue, Task, TaskRunner, Worker};

/// Keys this node negotiates with. A missing wallet means the node doesn't
/// play that role.
#[derive(Clone, Debug, Default)]
pub struct Wallets {
    pub attester: Option<Wallet>,
    pub requester: Option<Wallet>,
}

impl Wallets {
    pub fn from_config(config: &Config) -> Result<Wallets, NegotiationError> {
        Ok(Wallets {
            attester: config.wallet.attester_wallet()?,
            requester: config.wallet.requester_wallet()?,
        })
    }
}

/// Outcome of one pass over an entity's filters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HandleStats {
    pub received: usize,
    pub applied: usize,
    pub replayed: usize,
    pub rejected: usize,
    pub failed: usize,
    pub expired_filters: usize,
}

impl std::ops::AddAssign for HandleStats {
    fn add_assign(&mut self, other: HandleStats) {
        self.received += other.received;
        self.applied += other.applied;
        self.replayed += other.replayed;
        self.rejected += other.rejected;
        self.failed += other.failed;
        self.expired_filters += other.expired_filters;
    }
}

#[derive(Clone)]
pub struct NegotiationService {
    config: Arc<Config>,
    db: DbExecutor,
    whisper: Arc<dyn Whisper>,
    broker: NegotiationBroker,
    executor: DecisionExecutor,
    queue: JobQueue,
    runner: TaskRunner,
}

impl NegotiationService {
    pub fn new(
        config: Arc<Config>,
        db: DbExecutor,
        whisper: Arc<dyn Whisper>,
        ledger: Arc<dyn Ledger>,
        notifier: Arc<dyn Notifier>,
    ) -> NegotiationService {
        let queue = JobQueue::new(db.clone(), &config.queue);
        let broker = NegotiationBroker::new(CommonBroker::new(
            db.clone(),
            ledger.clone(),
            config.clone(),
        ));
        let executor = DecisionExecutor::new(db.clone(), queue.clone(), notifier);
        let runner = TaskRunner::new(db.clone(), whisper.clone(), ledger);

        NegotiationService {
            config,
            db,
            whisper,
            broker,
            executor,
            queue,
            runner,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn worker(&self) -> Worker {
        Worker::new(
            self.queue.clone(),
            self.runner.clone(),
            self.config.queue.job_poll_interval,
        )
    }

    /// Creates a requester attestation to negotiate for.
    pub async fn create_attestation(
        &self,
        attestation_type: AttestationType,
    ) -> Result<Attestation, NegotiationError> {
        let attestation = Attestation::new(AttestationRole::Requester, attestation_type);
        self.db
            .as_dao::<AttestationDao>()
            .create(attestation.clone())
            .await?;
        log::info!(
            "Created {} attestation [{}].",
            attestation_type,
            attestation.id
        );
        Ok(attestation)
    }

    /// Broadcasts a solicitation for the attestation. Returns the session,
    /// which identifies the negotiation from now on.
    pub async fn initiate_solicitation(
        &self,
        attestation_id: &str,
        reward: BigDecimal,
        wallet: &Wallet,
    ) -> Result<String, NegotiationError> {
        let decision = self
            .broker
            .requester
            .initiate_solicitation(attestation_id, reward, wallet)
            .await?;
        let session = match &decision.respond_with {
            Some(message) => message.session().to_string(),
            None => {
                return Err(NegotiationError::InvalidRequest(
                    "solicitation without a message".to_string(),
                ))
            }
        };
        self.executor.execute(decision, &Entity::Requester).await?;
        log::info!(
            "Solicited bids for attestation [{}] in negotiation [{}].",
            attestation_id,
            session
        );
        Ok(session)
    }

    pub async fn send_job_details(
        &self,
        request: JobDetailsRequest,
        wallet: &Wallet,
    ) -> Result<Execution, NegotiationError> {
        let decision = self
            .broker
            .requester
            .send_job_details(request, wallet)
            .await?;
        Ok(self.executor.execute(decision, &Entity::Requester).await?)
    }

    pub async fn send_payment_authorization(
        &self,
        request: PaymentAuthorizationRequest,
        wallet: &Wallet,
    ) -> Result<Execution, NegotiationError> {
        let decision = self
            .broker
            .requester
            .send_payment_authorization(request, wallet)
            .await?;
        Ok(self.executor.execute(decision, &Entity::Requester).await?)
    }

    /// Enqueues the on-chain submission of a ready attester attestation.
    pub async fn submit_attestation(&self, attestation_id: &str) -> Result<i32, NegotiationError> {
        self.db
            .as_dao::<AttestationDao>()
            .get(attestation_id)
            .await?
            .ok_or_else(|| NegotiationError::AttestationNotFound(attestation_id.to_string()))?;
        Ok(self
            .queue
            .publish(Task::SubmitAttestation {
                attestation_id: attestation_id.to_string(),
            })
            .await?)
    }

    /// Entities this node answers for with the given wallets.
    pub fn served_entities(&self, wallets: &Wallets) -> Vec<Entity> {
        let mut entities = vec![];
        if wallets.requester.is_some() {
            entities.push(Entity::Requester);
        }
        if wallets.attester.is_some() {
            entities.extend(
                self.config
                    .negotiation
                    .attester_types
                    .iter()
                    .map(|t| Entity::Attester(*t)),
            );
        }
        if self.config.whisper.ping_enabled {
            entities.push(Entity::Ping);
        }
        entities
    }

    fn broadcast_subscription(&self, entity: &Entity) -> Option<Subscription> {
        let password = self.config.whisper.whisper_password.clone();
        match entity {
            Entity::Attester(attestation_type) => {
                Some(Subscription::broadcast(attestation_type.topic(), password))
            }
            Entity::Ping => Some(Subscription::broadcast(ping_topic(), password)),
            Entity::Requester => None,
        }
    }

    /// Enqueues the broadcast subscriptions of every served attester type and
    /// of the ping topic.
    pub async fn start_sessions(&self, wallets: &Wallets) -> Result<(), NegotiationError> {
        for entity in self.served_entities(wallets) {
            if let Some(subscription) = self.broadcast_subscription(&entity) {
                log::info!("Listening on {} as [{}].", subscription.topic, entity);
                self.queue
                    .publish(Task::WhisperNewBroadcastSession {
                        subscription,
                        entity: entity.to_string(),
                    })
                    .await?;
            }
        }
        Ok(())
    }

    async fn drop_expired_filter(
        &self,
        entity: &Entity,
        filter: &WhisperFilter,
    ) -> Result<(), NegotiationError> {
        log::warn!(
            "Filter [{}] of [{}] on {} expired, removing it.",
            filter.filter_id,
            entity,
            filter.topic
        );
        self.db
            .as_dao::<FilterDao>()
            .delete(&filter.filter_id)
            .await?;
        if let Some(keypair_id) = &filter.keypair_id {
            if let Err(e) = self.whisper.delete_key_pair(keypair_id).await {
                log::debug!("Can't delete keypair [{}]: {}", keypair_id, e);
            }
            return Ok(());
        }

        // Broadcast listeners have to stay up, so they are created anew.
        if let Some(subscription) = self.broadcast_subscription(entity) {
            if subscription.topic.to_string() == filter.topic {
                self.queue
                    .publish(Task::WhisperNewBroadcastSession {
                        subscription,
                        entity: entity.to_string(),
                    })
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_message(
        &self,
        entity: &Entity,
        envelope: WhisperMessage,
        wallet: &Wallet,
        stats: &mut HandleStats,
    ) {
        let message = match Message::from_payload(&envelope.payload) {
            Ok(message) => message,
            Err(e) => {
                log::info!(
                    "[{}] dropping undecodable message {} on {}: {}",
                    entity,
                    envelope.hash,
                    envelope.topic,
                    e
                );
                stats.failed += 1;
                return;
            }
        };
        log::debug!(
            "[{}] received {} [{}] on {}",
            entity,
            message.kind(),
            message.session(),
            envelope.topic
        );

        let decision = match self
            .broker
            .decide(entity, &message, &envelope.topic, wallet)
            .await
        {
            Ok(decision) => decision,
            Err(rejected) => {
                counter!("attestd.negotiation.rejected", 1);
                log::info!(
                    "[{}] rejected {} [{}]: {}",
                    entity,
                    message.kind(),
                    message.session(),
                    rejected
                );
                stats.rejected += 1;
                return;
            }
        };

        let rejection = decision.is_rejection();
        match self.executor.execute(decision, entity).await {
            Ok(Execution::Replayed) => stats.replayed += 1,
            Ok(Execution::Applied { .. }) if rejection => stats.rejected += 1,
            Ok(Execution::Applied { .. }) => stats.applied += 1,
            Err(ExecuteError::Store(e)) if e.is_protocol_violation() => {
                log::error!(
                    "[{}] dropping {} [{}] of negotiation {:?}: {}",
                    entity,
                    message.kind(),
                    message.session(),
                    message.negotiation_id(),
                    e
                );
                stats.failed += 1;
            }
            Err(e) => {
                log::warn!(
                    "[{}] can't apply {} [{}]: {}",
                    entity,
                    message.kind(),
                    message.session(),
                    e
                );
                stats.failed += 1;
            }
        }
    }

    /// Drains every filter of `entity` once. Per-message failures are
    /// logged and counted; only a failure to read the filter table stops
    /// the pass.
    pub async fn handle_messages(
        &self,
        entity: &Entity,
        wallet: &Wallet,
    ) -> Result<HandleStats, NegotiationError> {
        let mut stats = HandleStats::default();
        let filters = self
            .db
            .as_dao::<FilterDao>()
            .list_for_entity(&entity.to_string())
            .await?;

        for filter in filters {
            let messages = match self.whisper.get_filter_messages(&filter.filter_id).await {
                Ok(messages) => messages,
                Err(e) if e.is_filter_not_found() => {
                    stats.expired_filters += 1;
                    self.drop_expired_filter(entity, &filter)
                        .await
                        .log_err_msg("Can't remove expired filter")
                        .ok();
                    continue;
                }
                Err(e) => {
                    log::warn!(
                        "Can't fetch messages of filter [{}]: {}",
                        filter.filter_id,
                        e
                    );
                    continue;
                }
            };

            for envelope in messages {
                stats.received += 1;
                self.handle_message(entity, envelope, wallet, &mut stats)
                    .await;
            }
        }
        Ok(stats)
    }

    /// One poll of every served entity.
    pub async fn poll(&self, wallets: &Wallets, ping_wallet: &Wallet) -> HandleStats {
        let mut total = HandleStats::default();
        for entity in self.served_entities(wallets) {
            let wallet = match entity {
                Entity::Requester => wallets.requester.as_ref(),
                Entity::Attester(_) => wallets.attester.as_ref(),
                Entity::Ping => Some(ping_wallet),
            };
            let wallet = match wallet {
                Some(wallet) => wallet,
                None => continue,
            };
            match self.handle_messages(&entity, wallet).await {
                Ok(stats) => total += stats,
                Err(e) => log::error!("Polling [{}] failed: {}", entity, e),
            }
        }
        total
    }

    /// Runs the job worker and polls all filters until the future is
    /// dropped.
    pub async fn run(self, wallets: Wallets) -> Result<(), NegotiationError> {
        self.start_sessions(&wallets).await?;
        let ping_wallet = wallets
            .attester
            .clone()
            .or_else(|| wallets.requester.clone())
            .unwrap_or_else(Wallet::random);

        let worker = tokio::task::spawn(self.worker().run());
        let mut interval = tokio::time::interval(self.config.whisper.whisper_poll_interval);
        log::info!(
            "Negotiation service started, serving {:?}.",
            self.served_entities(&wallets)
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
        );
        loop {
            interval.tick().await;
            let stats = self.poll(&wallets, &ping_wallet).await;
            if stats.received > 0 {
                log::debug!("Poll: {:?}", stats);
            }
            if worker.is_finished() {
                log::error!("Job worker stopped.");
                return Ok(());
            }
        }
    }
}
