//! program-metadata CLI
//!
//! Writes, closes and administers metadata accounts of Solana programs.
//! Every command plans its instructions into transactions first; `plan`
//! stops there and prints the plan, the others execute it.

#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(unused_must_use)]

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use program_metadata::{
    config::Config,
    instruction_plans::{default_send_and_confirm, ExecutionError, InstructionPlan, TransactionPlanExecutor, TransactionPlanner},
    metadata::{
        plans::{self, ExistingBuffer},
        Compression, DataFormat, DataSource, Encoding, Format, MetadataTarget, Seed, WriteMetadataInput,
    },
    observability::TraceContext,
    rpc::{self, RpcBlockhashSource, RpcComputeUnitEstimator, RpcSendAndConfirm},
};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// RPC URL, overrides the configuration
    #[arg(long, env = "PROGRAM_METADATA_RPC_URL")]
    rpc: Option<String>,

    /// Keypair file paying for and signing transactions
    #[arg(short, long, env = "PROGRAM_METADATA_KEYPAIR")]
    keypair: Option<String>,

    /// Priority fee in micro-lamports per compute unit
    #[arg(long)]
    priority_fee: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or update a metadata account from a file
    Write(WriteArgs),
    /// Print the transaction plan of a write without sending anything
    Plan(WriteArgs),
    /// Close a metadata account and reclaim its rent
    Close(TargetArgs),
    /// Close a buffer account and reclaim its rent
    CloseBuffer {
        buffer: Pubkey,
    },
    /// Set an additional authority on canonical metadata
    SetAuthority {
        #[command(flatten)]
        target: TargetArgs,
        new_authority: Pubkey,
    },
    /// Remove the additional authority from canonical metadata
    RemoveAuthority(TargetArgs),
    /// Make a metadata account immutable, this cannot be undone
    SetImmutable(TargetArgs),
    /// Send lamports above the rent exemption back to the payer
    WithdrawExcessLamports(TargetArgs),
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// Program the metadata describes
    program: Pubkey,

    /// Metadata seed, e.g. "idl"
    seed: Seed,

    /// Use the keypair as authority instead of the program upgrade authority
    #[arg(long)]
    third_party: bool,
}

#[derive(Args, Debug)]
struct WriteArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// File holding the metadata content
    #[arg(required_unless_present = "buffer")]
    file: Option<PathBuf>,

    /// Copy the data from an existing buffer account instead of a file
    #[arg(long, conflicts_with = "file")]
    buffer: Option<Pubkey>,

    /// Keep the buffer account open after the update
    #[arg(long)]
    keep_buffer: bool,

    /// Always write through a buffer, even when the data fits inline
    #[arg(long)]
    buffer_only: bool,

    #[arg(long, value_enum, default_value_t = Encoding::Utf8)]
    encoding: Encoding,

    #[arg(long, value_enum, default_value_t = Compression::None)]
    compression: Compression,

    #[arg(long, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// Where the content lives; anything other than "direct" stores a pointer
    #[arg(long, value_enum, default_value_t = DataSource::Direct)]
    data_source: DataSource,
}

/// Connection, wallet and settings shared by all commands
struct Session {
    config: Config,
    client: Arc<RpcClient>,
    commitment: CommitmentConfig,
    keypair: Arc<Keypair>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let mut config = load_config(&cli.config)?;
    if let Some(url) = &cli.rpc {
        config.rpc.url = url.clone();
    }
    if let Some(path) = &cli.keypair {
        config.wallet.keypair_path = path.clone();
    }
    if let Some(price) = cli.priority_fee {
        config.planner.compute_unit_price = Some(price);
    }
    config.validate().context("Invalid configuration")?;

    let commitment = config.commitment()?;
    let keypair_path = expand_home(&config.wallet.keypair_path);
    let keypair = rpc::load_keypair(&keypair_path).context("Failed to load wallet")?;
    info!(rpc = %config.rpc.url, payer = %keypair.pubkey(), "Session ready");

    let session = Session {
        client: Arc::new(RpcClient::new_with_timeout_and_commitment(
            config.rpc.url.clone(),
            config.rpc_timeout(),
            commitment,
        )),
        commitment,
        keypair: Arc::new(keypair),
        config,
    };

    match cli.command {
        Command::Write(args) => write(&session, &args, false).await,
        Command::Plan(args) => write(&session, &args, true).await,
        Command::Close(target) => {
            let target = session.resolve_target(&target).await?;
            session.run(&plans::close_metadata_plan(&target), Vec::new()).await
        }
        Command::CloseBuffer { buffer } => {
            let payer = session.keypair.pubkey();
            session
                .run(&plans::close_buffer_plan(&buffer, &payer, &payer), Vec::new())
                .await
        }
        Command::SetAuthority { target, new_authority } => {
            let target = session.resolve_target(&target).await?;
            session
                .run(&plans::set_authority_plan(&target, Some(&new_authority)), Vec::new())
                .await
        }
        Command::RemoveAuthority(target) => {
            let target = session.resolve_target(&target).await?;
            session.run(&plans::set_authority_plan(&target, None), Vec::new()).await
        }
        Command::SetImmutable(target) => {
            let target = session.resolve_target(&target).await?;
            session.run(&plans::set_immutable_plan(&target), Vec::new()).await
        }
        Command::WithdrawExcessLamports(target) => {
            let target = session.resolve_target(&target).await?;
            session
                .run(&plans::withdraw_excess_lamports_plan(&target), Vec::new())
                .await
        }
    }
}

async fn write(session: &Session, args: &WriteArgs, dry_run: bool) -> Result<()> {
    let target = session.resolve_target(&args.target).await?;
    let existing = rpc::fetch_metadata_account(&session.client, &target.metadata, session.commitment)
        .await
        .context("Failed to fetch the metadata account")?;
    let rent = rpc::fetch_rent(&session.client, session.commitment).await?;

    let existing_buffer = match args.buffer {
        Some(address) => {
            let buffer = rpc::fetch_buffer_account(&session.client, &address, session.commitment)
                .await
                .with_context(|| format!("Failed to fetch buffer {address}"))?;
            Some(ExistingBuffer {
                address,
                data_length: buffer.data.len(),
            })
        }
        None => None,
    };
    let data = match &args.file {
        Some(path) => std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?,
        None => Vec::new(),
    };

    let new_buffer = Arc::new(Keypair::new());
    let input = WriteMetadataInput {
        target,
        format: DataFormat {
            encoding: args.encoding,
            compression: args.compression,
            format: args.format,
            data_source: args.data_source,
        },
        data,
        existing,
        existing_buffer,
        new_buffer: new_buffer.pubkey(),
        close_buffer: !args.keep_buffer,
        force_buffer: args.buffer_only,
        rent,
    };
    let plan = plans::plan_write_metadata(&session.planner(), &input)?;
    info!(
        strategy = ?plan.strategy,
        metadata = %input.target.metadata,
        transactions = plan.transaction_plan.transaction_count(),
        "Write planned"
    );

    if dry_run {
        let report = json!({
            "metadata": input.target.metadata.to_string(),
            "strategy": plan.strategy,
            "transactions": plan.transaction_plan.transaction_count(),
            "plan": plan.transaction_plan.summary(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    session.execute(&plan.transaction_plan, vec![new_buffer]).await
}

impl Session {
    fn planner(&self) -> TransactionPlanner {
        TransactionPlanner::with_fee_payer(self.keypair.pubkey(), &self.config.planner_config())
    }

    /// Canonical target when the keypair is the program authority,
    /// third-party target when asked for
    async fn resolve_target(&self, args: &TargetArgs) -> Result<MetadataTarget> {
        let signer = self.keypair.pubkey();
        if args.third_party {
            return Ok(MetadataTarget::third_party(args.program, signer, signer, args.seed));
        }

        let program_authority = rpc::fetch_program_authority(&self.client, &args.program, self.commitment)
            .await
            .with_context(|| format!("Failed to resolve the authority of {}", args.program))?;
        if program_authority.authority != Some(signer) {
            anyhow::bail!(
                "You must be the program authority to manage canonical metadata of {}. \
                 Use --third-party to write as a third party.",
                args.program
            );
        }
        let program_data = program_authority
            .program_data
            .context("Canonical metadata requires an upgradeable program")?;
        Ok(MetadataTarget::canonical(args.program, program_data, signer, signer, args.seed))
    }

    async fn run(&self, instruction_plan: &InstructionPlan, extra_signers: Vec<Arc<Keypair>>) -> Result<()> {
        let transaction_plan = self.planner().plan(instruction_plan)?;
        self.execute(&transaction_plan, extra_signers).await
    }

    async fn execute(
        &self,
        transaction_plan: &program_metadata::TransactionPlan,
        extra_signers: Vec<Arc<Keypair>>,
    ) -> Result<()> {
        let mut signers = vec![self.keypair.clone()];
        signers.extend(extra_signers);

        let sender = default_send_and_confirm(
            RpcSendAndConfirm::new(self.client.clone(), signers, self.commitment)
                .with_poll_interval(self.config.poll_interval()),
            RpcBlockhashSource::new(self.client.clone(), self.commitment),
            RpcComputeUnitEstimator::new(self.client.clone(), self.commitment),
            &self.config.sender_config(),
        );
        let executor = TransactionPlanExecutor::new(sender, self.config.executor_config())
            .with_trace(TraceContext::new("program_metadata_cli"));

        let abort = CancellationToken::new();
        let on_interrupt = abort.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, canceling pending transactions");
                on_interrupt.cancel();
            }
        });

        match executor.execute_with_abort(transaction_plan, abort).await {
            Ok(result) => {
                println!("{}", serde_json::to_string_pretty(&result.summary())?);
                Ok(())
            }
            Err(e) => {
                println!("{}", serde_json::to_string_pretty(&e.result().summary())?);
                Err(describe_execution_error(e))
            }
        }
    }
}

fn describe_execution_error(error: ExecutionError) -> anyhow::Error {
    match error.first_error() {
        Some(first) => anyhow::anyhow!("{error}: {first}"),
        None => anyhow::anyhow!("{error}"),
    }
}

/// Initialize logging subsystem
fn init_logging(verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        "program_metadata=debug,info"
    } else {
        "program_metadata=info,warn"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| env_filter.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();

    Ok(())
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file_with_env(path).with_context(|| format!("Failed to load config from {}", path))
    } else {
        warn!("Config file '{}' not found, using defaults", path);
        let mut config = Config::default();
        dotenvy::dotenv().ok();
        config.apply_env_overrides();
        Ok(config)
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}
