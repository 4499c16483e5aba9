use anyhow::{anyhow, Context, Result};
use bigdecimal::BigDecimal;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use structopt::{clap, StructOpt};

use attest_file_logging::{start_logger, LogConfig};
use attest_ledger::{EthClient, EthClientConfig};
use attest_negotiation::crypto::Wallet;
use attest_negotiation::db;
use attest_negotiation::negotiation::{JobDetailsRequest, PaymentAuthorizationRequest};
use attest_negotiation::service::Wallets;
use attest_negotiation::{AttestationType, Config, NegotiationService, WebhookNotifier};
use attest_persistence::executor::DbExecutor;
use attest_std_utils::LogErr;
use attest_whisper::{PostOptions, WhisperClient};

#[derive(StructOpt, Debug)]
#[structopt(global_setting = clap::AppSettings::ColoredHelp)]
#[structopt(about = clap::crate_description!())]
#[structopt(setting = clap::AppSettings::DeriveDisplayOrder)]
struct CliArgs {
    /// Directory for rotated log files. Logs go to stderr only when unset.
    #[structopt(long, env = "ATTESTD_LOG_DIR")]
    #[structopt(set = clap::ArgSettings::Global)]
    log_dir: Option<PathBuf>,

    /// Log on debug level
    #[structopt(long)]
    #[structopt(set = clap::ArgSettings::Global)]
    debug: bool,

    /// Return results in JSON format
    #[structopt(long)]
    #[structopt(set = clap::ArgSettings::Global)]
    json: bool,

    #[structopt(flatten)]
    config: Config,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt, Debug)]
enum Command {
    /// Negotiation service
    Service(Service),
    /// Requester attestations
    Attestation(AttestationCommand),
    /// Broadcasts a solicitation for a requester attestation
    Solicit {
        #[structopt(long)]
        attestation_id: String,
        /// Reward offered, in tokens
        #[structopt(long)]
        reward: BigDecimal,
    },
    /// Sends job details (JSON file) to the accepted attester
    JobDetails { file: PathBuf },
    /// Sends a payment authorization (JSON file) to the accepted attester
    PaymentAuthorization { file: PathBuf },
    /// Submits a ready attestation on chain
    Submit {
        #[structopt(long)]
        attestation_id: String,
    },
}

#[derive(StructOpt, Debug)]
enum Service {
    /// Runs the service in foreground
    Run,
}

#[derive(StructOpt, Debug)]
enum AttestationCommand {
    /// Creates a requester attestation
    New {
        #[structopt(long = "type")]
        attestation_type: AttestationType,
    },
}

struct CliCtx {
    config: Arc<Config>,
    json: bool,
}

impl CliCtx {
    fn output(&self, value: serde_json::Value, text: String) {
        match self.json {
            true => println!("{}", value),
            false => println!("{}", text),
        }
    }

    fn service(&self) -> Result<NegotiationService> {
        let config = &self.config;
        let db = DbExecutor::with_pool_size(&config.db.database_url, config.db.db_pool_size)
            .with_context(|| format!("Opening database [{}]", config.db.database_url))?;
        db::init(&db).context("Applying database migrations")?;

        let whisper = WhisperClient::new(
            config.whisper.whisper_provider.clone(),
            config.whisper.whisper_timeout,
            PostOptions {
                ttl: config.whisper.whisper_ttl,
                pow_time: config.whisper.whisper_pow_time,
                pow_target: config.whisper.whisper_pow_target,
            },
        )?;
        let ledger = EthClient::new(EthClientConfig {
            rpc_url: config.ledger.eth_rpc_url.clone(),
            escrow_contract: config.ledger.escrow_contract,
            attestation_contract: config.ledger.attestation_contract,
            timeout: config.ledger.eth_timeout,
        });
        let notifier = WebhookNotifier::new(&config.webhook)?;

        Ok(NegotiationService::new(
            config.clone(),
            db,
            Arc::new(whisper),
            Arc::new(ledger),
            Arc::new(notifier),
        ))
    }

    fn requester_wallet(&self) -> Result<Wallet> {
        self.config
            .wallet
            .requester_wallet()?
            .ok_or_else(|| anyhow!("REQUESTER_PRIVATE_KEY is not set."))
    }
}

fn read_json<T: serde::de::DeserializeOwned>(file: &Path) -> Result<T> {
    let content =
        fs::read_to_string(file).with_context(|| format!("Reading {}", file.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Parsing {}", file.display()))
}

impl Command {
    async fn run_command(self, ctx: &CliCtx) -> Result<()> {
        match self {
            Command::Service(Service::Run) => {
                let wallets = Wallets::from_config(&ctx.config)?;
                if wallets.attester.is_none() && wallets.requester.is_none() {
                    log::warn!("No wallet configured, only answering pings.");
                }
                let service = ctx.service()?;
                log::info!("Starting {} service.", clap::crate_name!());
                tokio::select! {
                    result = service.run(wallets) => result.log_err_msg("Negotiation service stopped")?,
                    _ = tokio::signal::ctrl_c() => log::info!("Shutting down."),
                }
                Ok(())
            }
            Command::Attestation(AttestationCommand::New { attestation_type }) => {
                let attestation = ctx.service()?.create_attestation(attestation_type).await?;
                ctx.output(
                    json!({ "id": attestation.id, "type": attestation_type }),
                    attestation.id.clone(),
                );
                Ok(())
            }
            Command::Solicit {
                attestation_id,
                reward,
            } => {
                let wallet = ctx.requester_wallet()?;
                let negotiation_id = ctx
                    .service()?
                    .initiate_solicitation(&attestation_id, reward, &wallet)
                    .await?;
                ctx.output(
                    json!({ "attestationId": attestation_id, "negotiationId": negotiation_id }),
                    negotiation_id.clone(),
                );
                Ok(())
            }
            Command::JobDetails { file } => {
                let request: JobDetailsRequest = read_json(&file)?;
                let wallet = ctx.requester_wallet()?;
                let attestation_id = request.attestation_id.clone();
                ctx.service()?.send_job_details(request, &wallet).await?;
                ctx.output(
                    json!({ "attestationId": attestation_id, "sent": "jobDetails" }),
                    format!("Job details of [{}] queued.", attestation_id),
                );
                Ok(())
            }
            Command::PaymentAuthorization { file } => {
                let request: PaymentAuthorizationRequest = read_json(&file)?;
                let wallet = ctx.requester_wallet()?;
                let attestation_id = request.attestation_id.clone();
                ctx.service()?
                    .send_payment_authorization(request, &wallet)
                    .await?;
                ctx.output(
                    json!({ "attestationId": attestation_id, "sent": "paymentAuthorization" }),
                    format!("Payment authorization of [{}] queued.", attestation_id),
                );
                Ok(())
            }
            Command::Submit { attestation_id } => {
                let job_id = ctx.service()?.submit_attestation(&attestation_id).await?;
                ctx.output(
                    json!({ "attestationId": attestation_id, "jobId": job_id }),
                    format!("Submission of [{}] queued as job {}.", attestation_id, job_id),
                );
                Ok(())
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = CliArgs::from_args();

    let _logger = start_logger(&LogConfig {
        log_dir: args.log_dir.clone(),
        force_debug: args.debug,
        module_overrides: "attest_negotiation::db::dao=info".to_string(),
        ..Default::default()
    })?;

    let ctx = CliCtx {
        config: Arc::new(args.config),
        json: args.json,
    };
    args.command.run_command(&ctx).await
}
