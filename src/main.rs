use std::{
    fs,
    path::{Path, PathBuf},
    process,
};

use clap::{Parser, Subcommand};
use tinybank::{
    chain::load_script, format_units, Chain, ChainError, Genesis, Receipt, StateSnapshot,
};

//==================== CLI ====================//

#[derive(Parser)]
#[command(name = "tinybank", version, about = "Replay call scripts against a token ledger and staking bank")]
struct Cli {
    /// Log every committed call (RUST_LOG overrides the filter).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply a genesis config, replay a JSON-lines script and print receipts.
    Run {
        #[arg(long)]
        genesis: PathBuf,
        #[arg(long)]
        script: PathBuf,
        /// Write the final state snapshot as JSON.
        #[arg(long)]
        snapshot_out: Option<PathBuf>,
        /// Stop at the first failed call (exit code 1).
        #[arg(long)]
        stop_on_error: bool,
    },
    /// Write a sample genesis config.
    Genesis {
        #[arg(long)]
        out: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info,tinybank=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn fail(err: ChainError) -> ! {
    eprintln!("error: {err}");
    process::exit(2)
}

//==================== run ====================//

fn print_receipt(idx: usize, receipt: &Receipt) {
    match serde_json::to_string(receipt) {
        Ok(line) => println!("{line}"),
        Err(err) => eprintln!("call {idx}: receipt encode failed: {err}"),
    }
}

fn write_snapshot(path: &Path, snapshot: &StateSnapshot) -> Result<(), ChainError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec_pretty(snapshot)?)?;
    Ok(())
}

fn run_cmd(genesis: PathBuf, script: PathBuf, snapshot_out: Option<PathBuf>, stop_on_error: bool) {
    let genesis = Genesis::load(&genesis).unwrap_or_else(|err| fail(err));
    let calls = load_script(&script).unwrap_or_else(|err| fail(err));
    let mut chain = Chain::from_genesis(&genesis).unwrap_or_else(|err| fail(err));

    let mut failed = 0usize;
    for (idx, call) in calls.iter().enumerate() {
        match chain.submit(call) {
            Ok(receipt) => print_receipt(idx + 1, &receipt),
            Err(err) => {
                failed += 1;
                tracing::warn!(call = idx + 1, caller = %call.caller, op = call.op.name(), error = %err, "call rejected");
                eprintln!("call {} ({} by {}) rejected: {err}", idx + 1, call.op.name(), call.caller);
                if stop_on_error {
                    process::exit(1);
                }
            }
        }
    }

    let snapshot = chain.snapshot();
    let decimals = chain.ledger().decimals();
    eprintln!(
        "height {} | {} calls, {} rejected | supply {} {} | staked {} | root {}",
        snapshot.height,
        calls.len(),
        failed,
        format_units(snapshot.token.total_supply, decimals),
        snapshot.token.symbol,
        format_units(snapshot.bank.total_staked, decimals),
        snapshot.state_root,
    );
    if let Some(path) = snapshot_out {
        write_snapshot(&path, &snapshot).unwrap_or_else(|err| fail(err));
        eprintln!("snapshot → {}", path.display());
    }
}

//==================== genesis ====================//

fn genesis_cmd(out: PathBuf) {
    let encoded = serde_json::to_vec_pretty(&Genesis::sample())
        .map_err(ChainError::from)
        .unwrap_or_else(|err| fail(err));
    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent)
            .map_err(ChainError::from)
            .unwrap_or_else(|err| fail(err));
    }
    fs::write(&out, encoded)
        .map_err(ChainError::from)
        .unwrap_or_else(|err| fail(err));
    println!("genesis written → {}", out.display());
}

//==================== main ====================//

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Command::Run {
            genesis,
            script,
            snapshot_out,
            stop_on_error,
        } => run_cmd(genesis, script, snapshot_out, stop_on_error),
        Command::Genesis { out } => genesis_cmd(out),
    }
}
