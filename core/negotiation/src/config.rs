use bigdecimal::BigDecimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use structopt::StructOpt;
use url::Url;

use attest_ledger::Address;

use crate::crypto::{CryptoError, EscrowDomain, Wallet};
use crate::protocol::AttestationType;

#[derive(StructOpt, Clone, Debug)]
pub struct Config {
    #[structopt(flatten)]
    pub db: DbConfig,
    #[structopt(flatten)]
    pub whisper: WhisperConfig,
    #[structopt(flatten)]
    pub ledger: LedgerConfig,
    #[structopt(flatten)]
    pub negotiation: NegotiationConfig,
    #[structopt(flatten)]
    pub queue: QueueConfig,
    #[structopt(flatten)]
    pub webhook: WebhookConfig,
    #[structopt(flatten)]
    pub wallet: WalletConfig,
}

#[derive(StructOpt, Clone, Debug)]
pub struct DbConfig {
    #[structopt(long, env = "DATABASE_URL", default_value = "attestd.db")]
    pub database_url: String,
    #[structopt(long, env = "DB_POOL_SIZE", default_value = "10")]
    pub db_pool_size: u32,
}

#[derive(StructOpt, Clone, Debug)]
pub struct WhisperConfig {
    #[structopt(long, env = "WHISPER_PROVIDER", default_value = "http://localhost:8545")]
    pub whisper_provider: Url,
    /// Password every marketplace participant derives the broadcast key from.
    #[structopt(
        long,
        env = "WHISPER_PASSWORD",
        default_value = "attestation-marketplace",
        hide_env_values = true
    )]
    pub whisper_password: String,
    #[structopt(long, env = "WHISPER_TTL", default_value = "60")]
    pub whisper_ttl: u32,
    #[structopt(long, env = "WHISPER_POW_TIME", default_value = "1.0")]
    pub whisper_pow_time: f64,
    #[structopt(long, env = "WHISPER_POW_TARGET", default_value = "2.5")]
    pub whisper_pow_target: f64,
    #[structopt(long, env = "WHISPER_TIMEOUT", parse(try_from_str = humantime::parse_duration), default_value = "30s")]
    pub whisper_timeout: Duration,
    /// Interval between two polls of all message filters.
    #[structopt(long, env = "WHISPER_POLL_INTERVAL", parse(try_from_str = humantime::parse_duration), default_value = "2s")]
    pub whisper_poll_interval: Duration,
    /// Answer liveness pings on the `ping` topic.
    #[structopt(long, env = "WHISPER_PING_ENABLED", parse(try_from_str), default_value = "true")]
    pub ping_enabled: bool,
}

#[derive(StructOpt, Clone, Debug)]
pub struct LedgerConfig {
    #[structopt(long, env = "ETH_RPC_URL", default_value = "http://localhost:8545")]
    pub eth_rpc_url: Url,
    #[structopt(long, env = "ETH_TIMEOUT", parse(try_from_str = humantime::parse_duration), default_value = "30s")]
    pub eth_timeout: Duration,
    #[structopt(
        long,
        env = "ESCROW_CONTRACT",
        default_value = "0x0000000000000000000000000000000000000000"
    )]
    pub escrow_contract: Address,
    #[structopt(
        long,
        env = "ATTESTATION_CONTRACT",
        default_value = "0x0000000000000000000000000000000000000000"
    )]
    pub attestation_contract: Address,
    #[structopt(long, env = "CHAIN_ID", default_value = "1")]
    pub chain_id: u64,
    #[structopt(long, env = "ESCROW_DOMAIN_NAME", default_value = "Token Escrow Marketplace")]
    pub escrow_domain_name: String,
    #[structopt(long, env = "ESCROW_DOMAIN_VERSION", default_value = "2")]
    pub escrow_domain_version: String,
}

impl LedgerConfig {
    pub fn escrow_domain(&self) -> EscrowDomain {
        EscrowDomain {
            name: self.escrow_domain_name.clone(),
            version: self.escrow_domain_version.clone(),
            chain_id: self.chain_id,
            verifying_contract: self.escrow_contract,
        }
    }
}

#[derive(StructOpt, Clone, Debug)]
pub struct NegotiationConfig {
    /// Minimal reward per attestation type, e.g. `{"phone":"5","email":"2.5"}`.
    /// Types missing here are not served.
    #[structopt(long, env = "ACCEPTABLE_REWARDS", default_value = "{}")]
    pub acceptable_rewards: RewardTable,
    /// Attesters a requester accepts bids from, e.g.
    /// `{"any":false,"all":["0x.."],"phone":["0x.."]}`.
    #[structopt(long, env = "APPROVED_ATTESTERS", default_value = "{}")]
    pub approved_attesters: ApprovalList,
    #[structopt(long, env = "APPROVED_REQUESTERS", default_value = "{}")]
    pub approved_requesters: ApprovalList,
    /// Attestation types this node listens for solicitations of.
    #[structopt(long, env = "ATTESTER_TYPES", use_delimiter = true)]
    pub attester_types: Vec<AttestationType>,
    /// Bid only on solicitations whose requester has the asked reward in escrow.
    #[structopt(long, env = "REQUIRE_ESCROW_FUNDS", parse(try_from_str), default_value = "true")]
    pub require_escrow_funds: bool,
}

#[derive(StructOpt, Clone, Debug)]
pub struct QueueConfig {
    #[structopt(long, env = "JOB_POLL_INTERVAL", parse(try_from_str = humantime::parse_duration), default_value = "1s")]
    pub job_poll_interval: Duration,
    #[structopt(long, env = "JOB_RETRY_LIMIT", default_value = "5")]
    pub job_retry_limit: i32,
    /// Backoff unit: n-th retry runs `n * delay` after the failure.
    #[structopt(long, env = "JOB_RETRY_DELAY", parse(try_from_str = humantime::parse_duration), default_value = "10s")]
    pub job_retry_delay: Duration,
}

#[derive(StructOpt, Clone, Debug)]
pub struct WebhookConfig {
    #[structopt(long, env = "WEBHOOK_HOST", default_value = "http://localhost:3000")]
    pub webhook_host: Url,
    #[structopt(long, env = "WEBHOOK_KEY", hide_env_values = true)]
    pub webhook_key: Option<String>,
    #[structopt(long, env = "WEBHOOK_TIMEOUT", parse(try_from_str = humantime::parse_duration), default_value = "10s")]
    pub webhook_timeout: Duration,
}

#[derive(StructOpt, Clone, Debug)]
pub struct WalletConfig {
    #[structopt(long, env = "ATTESTER_PRIVATE_KEY", hide_env_values = true)]
    pub attester_private_key: Option<String>,
    #[structopt(long, env = "REQUESTER_PRIVATE_KEY", hide_env_values = true)]
    pub requester_private_key: Option<String>,
}

impl WalletConfig {
    pub fn attester_wallet(&self) -> Result<Option<Wallet>, CryptoError> {
        self.attester_private_key
            .as_deref()
            .map(Wallet::from_hex)
            .transpose()
    }

    pub fn requester_wallet(&self) -> Result<Option<Wallet>, CryptoError> {
        self.requester_private_key
            .as_deref()
            .map(Wallet::from_hex)
            .transpose()
    }
}

/// Minimal acceptable reward per attestation type.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct RewardTable(HashMap<AttestationType, BigDecimal>);

impl RewardTable {
    pub fn minimum(&self, attestation_type: AttestationType) -> Option<&BigDecimal> {
        self.0.get(&attestation_type)
    }
}

impl FromStr for RewardTable {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

/// Counterparty allow-list. `any` approves everyone, `all` lists addresses
/// approved for every type, remaining keys are per-type lists.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ApprovalList {
    #[serde(default)]
    pub any: bool,
    #[serde(default)]
    pub all: Vec<Address>,
    #[serde(flatten)]
    pub per_type: HashMap<AttestationType, Vec<Address>>,
}

impl ApprovalList {
    pub fn anyone() -> Self {
        ApprovalList {
            any: true,
            ..Default::default()
        }
    }

    pub fn is_approved(&self, address: &Address, attestation_type: AttestationType) -> bool {
        self.any
            || self.all.contains(address)
            || self
                .per_type
                .get(&attestation_type)
                .map_or(false, |list| list.contains(address))
    }
}

impl FromStr for ApprovalList {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}
