//! Transfer Engine CLI
//!
//! Solana front end for the transfer pipeline:
//! - `preview`: build a transfer without a signing key and print it
//! - `send`: authenticate with a keypair file, submit, record the pending entry
//! - `watch`: poll history, reconcile and print the merged view until Ctrl-C

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use solana_client::nonblocking::rpc_client::RpcClient;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use transfer_engine::chain::solana::SolanaRpc;
use transfer_engine::config::Config;
use transfer_engine::logging::{init_logging, SessionLogger};
use transfer_engine::metrics::metrics;
use transfer_engine::orchestrator::FileKeyStore;
use transfer_engine::pending::{PendingStorage, SledStorage};
use transfer_engine::reconcile::{spawn_collector, MergedEntry};
use transfer_engine::{
    AuthContext, Backoff, Orchestrator, PendingScope, PendingStore, Reconciler, RpcPair,
    SolanaAdapter, TokenRef, TransferOrder, TxBuilder,
};

/// Pending store location when `pending.storage_path` is not configured
const DEFAULT_STORE_PATH: &str = "pending-store";

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a transfer without signing and print its instructions
    Preview(TransferArgs),

    /// Sign and submit a transfer
    Send {
        #[command(flatten)]
        transfer: TransferArgs,

        /// Keypair file (JSON byte array or hex)
        #[arg(long)]
        keypair: PathBuf,
    },

    /// Reconcile pending transfers against chain history
    Watch {
        #[arg(long)]
        account: String,

        /// Token mint, native SOL when omitted
        #[arg(long)]
        mint: Option<String>,

        /// Seconds between polls
        #[arg(long, default_value = "5")]
        interval_secs: u64,
    },
}

#[derive(clap::Args, Debug)]
struct TransferArgs {
    /// Sender address
    #[arg(long)]
    from: String,

    /// Recipient address
    #[arg(long)]
    to: String,

    /// Amount in base units (lamports or token units)
    #[arg(long)]
    amount: u64,

    /// Token mint, native SOL when omitted
    #[arg(long)]
    mint: Option<String>,

    /// Token decimals
    #[arg(long, default_value = "9")]
    decimals: u8,

    /// Memo attached to the transfer
    #[arg(long)]
    comment: Option<String>,

    /// Reference keys appended to the transfer instruction
    #[arg(long = "reference")]
    reference: Vec<String>,
}

impl TransferArgs {
    fn order(&self) -> TransferOrder {
        let order = match &self.mint {
            Some(mint) => TransferOrder::token(
                self.to.clone(),
                self.amount,
                TokenRef {
                    address: mint.clone(),
                    decimals: self.decimals,
                },
            ),
            None => TransferOrder::native(self.to.clone(), self.amount),
        };
        let order = order.with_reference(self.reference.clone());
        match &self.comment {
            Some(comment) => order.with_comment(comment.clone()),
            None => order,
        }
    }

    fn scope(&self) -> PendingScope {
        PendingScope {
            account: self.from.clone(),
            token: self.mint.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, from_file) = load_config(&args.config)?;
    init_logging(&config.logging, args.verbose)?;
    if !from_file {
        warn!("Config file '{}' not found, using defaults", args.config);
    }
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let session = SessionLogger::new();
    let result = run(args.command, &config, &session).await;
    if let Err(err) = &result {
        session.log_failure(&format!("{:#}", err));
    }

    if let Ok(text) = metrics().render() {
        tracing::debug!(metrics = %text, "Final metrics");
    }
    result
}

async fn run(command: Command, config: &Config, session: &SessionLogger) -> Result<()> {
    let commitment = config.solana.commitment_config()?;
    let rpc: RpcPair<Arc<dyn SolanaRpc>> = RpcPair::new(
        Arc::new(RpcClient::new_with_commitment(
            config.solana.primary_rpc.clone(),
            commitment,
        )),
        Arc::new(RpcClient::new_with_commitment(
            config.solana.fallback_rpc.clone(),
            commitment,
        )),
    );
    let backoff = Backoff::new(config.backoff.clone());

    match command {
        Command::Preview(transfer) => {
            let builder = TxBuilder::new(SolanaAdapter::default(), rpc, backoff);
            let built = builder
                .build(&transfer.order(), &transfer.from, None)
                .await
                .context("Failed to build transfer")?;

            println!("fee payer:  {}", built.fee_payer);
            println!("blockhash:  {}", built.checkpoint);
            if let Some(account) = &built.recipient_token_account {
                println!(
                    "recipient token account: {} (given directly: {})",
                    account, built.is_token_account
                );
            }
            for (i, ix) in built.instructions.iter().enumerate() {
                println!(
                    "#{} program={} accounts={} data={}B",
                    i,
                    ix.program_id,
                    ix.accounts.len(),
                    ix.data.len()
                );
            }
        }

        Command::Send { transfer, keypair } => {
            let store = open_store(config)?;
            let orchestrator =
                Orchestrator::new(TxBuilder::new(SolanaAdapter::default(), rpc, backoff));
            let key_store = FileKeyStore::new(keypair);
            let ctx = AuthContext::new(transfer.from.clone(), "send transfer");

            let pending = orchestrator
                .submit(&transfer.order(), &transfer.from, &key_store, &ctx)
                .await
                .context("Transfer failed")?;

            store
                .add(&transfer.scope(), pending.clone())
                .context("Failed to record pending transaction")?;
            session.log_submitted(&pending);
            println!("{}", pending.id);
        }

        Command::Watch {
            account,
            mint,
            interval_secs,
        } => {
            let store = Arc::new(open_store(config)?);
            let scope = PendingScope {
                account,
                token: mint,
            };
            let reconciler = Reconciler::new(
                SolanaAdapter::default(),
                rpc,
                backoff,
                Arc::clone(&store),
                config.pending.reconcile_config(),
            );
            let collector = spawn_collector(Arc::clone(&store), config.pending.gc_grace());

            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutting down watch");
                        reconciler.generation().invalidate();
                        break;
                    }
                    _ = ticker.tick() => {
                        let now = chrono::Utc::now().timestamp();
                        if let Some(view) = reconciler.poll(&scope, now).await {
                            session.log_view(&view);
                            print_view(&view);
                        }
                    }
                }
            }
            collector.abort();
        }
    }

    Ok(())
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<(Config, bool)> {
    if std::path::Path::new(path).exists() {
        let config = Config::from_file_with_env(path)
            .with_context(|| format!("Failed to load config from {}", path))?;
        Ok((config, true))
    } else {
        dotenvy::dotenv().ok();
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok((config, false))
    }
}

/// Open the sled-backed pending store shared by `send` and `watch`
fn open_store(config: &Config) -> Result<PendingStore> {
    let path = config
        .pending
        .storage_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH));
    let storage: Arc<dyn PendingStorage> = Arc::new(
        SledStorage::open(&path)
            .with_context(|| format!("Failed to open pending store at {}", path.display()))?,
    );
    Ok(PendingStore::new(storage))
}

fn print_view(view: &[MergedEntry]) {
    println!("--- {} entries", view.len());
    for entry in view {
        match entry {
            MergedEntry::Pending(tx) => {
                println!("{:>10} {:?} {}", tx.time, tx.status, tx.id)
            }
            MergedEntry::Chain(tx) => {
                let state = if tx.failed { "Failed" } else { "Confirmed" };
                println!("{:>10} {} {}", tx.time, state, tx.id)
            }
        }
    }
}
