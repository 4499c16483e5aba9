//! Helpers for exercising the negotiation core without a Whisper node, an
//! Ethereum node or a webhook receiver.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;

use attest_ledger::MockLedger;
use attest_persistence::executor::DbExecutor;
use attest_whisper::mock::{MockNetwork, MockWhisper};

use crate::config::Config;
use crate::crypto::Wallet;
use crate::db;
use crate::negotiation::ExternalAction;
use crate::notifier::{Notifier, NotifierError};
use crate::service::{HandleStats, NegotiationService, Wallets};

/// Keeps every notification instead of posting it.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    actions: Arc<Mutex<Vec<ExternalAction>>>,
    unavailable: Arc<Mutex<bool>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<ExternalAction> {
        self.actions.lock().clone()
    }

    /// Makes further notifications fail, as if the receiver were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, action: &ExternalAction) -> Result<(), NotifierError> {
        if *self.unavailable.lock() {
            return Err(NotifierError::Unavailable("receiver is down".to_string()));
        }
        self.actions.lock().push(action.clone());
        Ok(())
    }
}

/// Configuration with defaults for everything not given in `args`. Jobs are
/// retried without delay, so tests can drain the queue right away.
pub fn config_from_args(args: &[&str]) -> Result<Config> {
    let mut full = vec!["attestd", "--job-retry-delay", "0s"];
    full.extend_from_slice(args);
    Ok(Config::from_iter_safe(full)?)
}

/// One daemon on a [`NegotiationNetwork`].
pub struct MockNode {
    pub name: String,
    pub config: Arc<Config>,
    pub db: DbExecutor,
    pub whisper: MockWhisper,
    pub ledger: MockLedger,
    pub notifier: RecordingNotifier,
    pub service: NegotiationService,
    pub wallets: Wallets,
    ping_wallet: Wallet,
}

impl MockNode {
    pub fn attester_wallet(&self) -> &Wallet {
        self.wallets
            .attester
            .as_ref()
            .unwrap_or_else(|| panic!("Node [{}] has no attester wallet.", self.name))
    }

    pub fn requester_wallet(&self) -> &Wallet {
        self.wallets
            .requester
            .as_ref()
            .unwrap_or_else(|| panic!("Node [{}] has no requester wallet.", self.name))
    }

    /// Runs every due job. Returns the number of attempts.
    pub async fn run_jobs(&self) -> Result<usize> {
        Ok(self.service.worker().run_pending().await?)
    }

    /// Polls every entity the node serves once.
    pub async fn poll(&self) -> HandleStats {
        self.service.poll(&self.wallets, &self.ping_wallet).await
    }
}

/// Daemons sharing one in-process Whisper network, each with its own
/// database under `tests/test-workdir/<test name>/<node name>`.
pub struct NegotiationNetwork {
    whisper: MockNetwork,
    nodes: Vec<MockNode>,
    test_dir: PathBuf,
}

impl NegotiationNetwork {
    /// `test_name` has to be unique among all tests, as it names the
    /// directory the databases live in.
    pub fn new(test_name: &str) -> Result<Self> {
        Ok(NegotiationNetwork {
            whisper: MockNetwork::new(),
            nodes: vec![],
            test_dir: prepare_test_dir(test_name)?,
        })
    }

    pub fn whisper(&self) -> &MockNetwork {
        &self.whisper
    }

    /// Adds a node configured with `args` on top of the test defaults.
    pub async fn add_node(mut self, name: &str, args: &[&str], wallets: Wallets) -> Result<Self> {
        let config = Arc::new(config_from_args(args)?);
        let db = self.init_database(name)?;
        let whisper = self.whisper.node(name);
        let ledger = MockLedger::new();
        let notifier = RecordingNotifier::new();
        let service = NegotiationService::new(
            config.clone(),
            db.clone(),
            Arc::new(whisper.clone()),
            Arc::new(ledger.clone()),
            Arc::new(notifier.clone()),
        );
        service.start_sessions(&wallets).await?;

        self.nodes.push(MockNode {
            name: name.to_string(),
            config,
            db,
            whisper,
            ledger,
            notifier,
            service,
            wallets,
            ping_wallet: Wallet::random(),
        });
        Ok(self)
    }

    pub fn node(&self, name: &str) -> &MockNode {
        self.nodes
            .iter()
            .find(|node| node.name == name)
            .unwrap_or_else(|| panic!("Test node [{}] not found.", name))
    }

    /// Runs jobs and polls on every node, in the order they were added, until
    /// a whole round neither runs a job nor receives a message.
    pub async fn settle(&self) -> Result<HandleStats> {
        let mut total = HandleStats::default();
        for _ in 0..20 {
            let mut moved = 0;
            for node in &self.nodes {
                moved += node.run_jobs().await?;
                let stats = node.poll().await;
                moved += stats.received;
                total += stats;
            }
            if moved == 0 {
                return Ok(total);
            }
        }
        Err(anyhow!("Network didn't settle: {:?}", total))
    }

    fn init_database(&self, name: &str) -> Result<DbExecutor> {
        let dir = self.test_dir.join(name);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Creating node directory: {}", dir.display()))?;
        let db = DbExecutor::from_data_dir(&dir, "attestd")
            .map_err(|e| anyhow!("Failed to create db [{:?}]. Error: {}", dir, e))?;
        db::init(&db)?;
        Ok(db)
    }
}

fn test_data_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/test-workdir")
}

pub fn prepare_test_dir(dir_name: &str) -> Result<PathBuf> {
    let test_dir: PathBuf = test_data_dir().join(dir_name);

    if test_dir.exists() {
        fs::remove_dir_all(&test_dir)
            .with_context(|| format!("Removing test directory: {}", test_dir.display()))?;
    }
    fs::create_dir_all(&test_dir)
        .with_context(|| format!("Creating test directory: {}", test_dir.display()))?;
    Ok(test_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_args_overrides_defaults() {
        let config = config_from_args(&["--job-retry-limit", "2"]).unwrap();
        assert_eq!(config.queue.job_retry_limit, 2);
        assert_eq!(config.queue.job_retry_delay, std::time::Duration::from_secs(0));
        assert_eq!(config.whisper.whisper_password, "attestation-marketplace");
    }
}
