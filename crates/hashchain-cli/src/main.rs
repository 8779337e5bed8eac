use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hashchain_core::{constants, Block, Chain, ChainConfig};
use hashchain_storage::{open_chain, SledStore};
use serde::Serialize;
use std::future::{self, Future};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "hashchain")]
#[command(about = "Append-only proof-of-work chain stored in an embedded database")]
struct Cli {
    /// Database directory
    #[arg(long, global = true, default_value = constants::DEFAULT_DB_PATH)]
    db: PathBuf,

    /// Difficulty: leading zero bits every block hash needs
    #[arg(long, global = true, default_value_t = constants::TARGET_BITS)]
    target_bits: u32,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mine a block holding DATA and append it
    Add {
        #[arg(long)]
        data: String,
    },
    /// Print every block from the tip back to genesis
    Print {
        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },
    /// Check links and proof-of-work for the whole chain
    Verify,
}

#[derive(Serialize)]
struct BlockRow {
    hash: String,
    prev_hash: String,
    data: String,
    timestamp: i64,
    nonce: i64,
    pow: bool,
}

impl BlockRow {
    fn new(block: &Block, pow: bool) -> Self {
        Self {
            hash: hex::encode(block.hash()),
            prev_hash: block.prev_hash().map(hex::encode).unwrap_or_default(),
            data: String::from_utf8_lossy(block.payload()).into_owned(),
            timestamp: block.timestamp(),
            nonce: block.nonce(),
            pow,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ChainConfig::new(&cli.db).with_target_bits(cli.target_bits);
    let chain = open_chain(&config)
        .with_context(|| format!("opening chain at {}", cli.db.display()))?;

    match cli.cmd {
        Command::Add { data } => {
            let (chain, outcome) = add(chain, data).await?;
            finish(chain, outcome)
        }
        Command::Print { json } => {
            let outcome = print(&chain, json);
            finish(chain, outcome)
        }
        Command::Verify => {
            let outcome = chain
                .verify()
                .map(|count| println!("chain OK: {count} blocks"))
                .context("verifying chain");
            finish(chain, outcome)
        }
    }
}

/// Mine on a blocking worker so Ctrl-C can raise the cancel flag. The chain
/// comes back with the outcome so it can be closed either way.
async fn add(chain: Chain<SledStore>, data: String) -> Result<(Chain<SledStore>, Result<()>)> {
    let cancel = chain.cancel_handle();
    let mut task = tokio::task::spawn_blocking(move || {
        let result = chain.append(data);
        (chain, result)
    });

    let (chain, result) = tokio::select! {
        joined = &mut task => joined.context("mining worker panicked")?,
        () = interrupted(tokio::signal::ctrl_c()) => {
            warn!("interrupted, cancelling mining");
            cancel.store(true, Ordering::Relaxed);
            task.await.context("mining worker panicked")?
        }
    };

    let outcome = result
        .map(|hash| println!("{}", hex::encode(hash)))
        .context("appending block");
    Ok((chain, outcome))
}

/// Resolves when `signal` fires. If the handler could not be installed this
/// never resolves, so mining runs to completion instead of being cancelled.
async fn interrupted(signal: impl Future<Output = io::Result<()>>) {
    if let Err(err) = signal.await {
        warn!(error = %err, "cannot listen for Ctrl-C");
        future::pending::<()>().await;
    }
}

fn print(chain: &Chain<SledStore>, json: bool) -> Result<()> {
    let mut out = io::stdout().lock();
    for block in chain.iter() {
        let block = block.context("reading chain")?;
        let row = BlockRow::new(&block, chain.pow().validate(&block));
        if json {
            serde_json::to_writer(&mut out, &row)?;
            writeln!(out)?;
        } else {
            writeln!(out, "Prev. hash: {}", row.prev_hash)?;
            writeln!(out, "Data: {}", row.data)?;
            writeln!(out, "Hash: {}", row.hash)?;
            writeln!(out, "Nonce: {}", row.nonce)?;
            writeln!(out, "Timestamp: {}", row.timestamp)?;
            writeln!(out, "PoW: {}", row.pow)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn finish(chain: Chain<SledStore>, outcome: Result<()>) -> Result<()> {
    let closed = chain.close().context("closing chain");
    outcome?;
    closed
}
