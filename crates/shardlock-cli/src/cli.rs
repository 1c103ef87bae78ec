use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "shardlock",
    about = "Lease-locked shared entity graphs for sharded workers",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML file with synchronizer settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run several shards persisting random deltas into one shared graph
    Simulate(SimulateArgs),
    /// Walk through lease contention and expiry between two holders
    Lock(LockArgs),
    /// Decode a stored shared graph and summarize it
    Inspect(InspectArgs),
    /// Print the effective configuration
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct SimulateArgs {
    #[arg(long, default_value = "4")]
    pub shards: usize,
    /// Persist cycles per shard
    #[arg(long, default_value = "3")]
    pub rounds: usize,
    /// New edges per shard per cycle
    #[arg(long, default_value = "8")]
    pub edges: usize,
    #[arg(long, default_value = "1")]
    pub chain: u64,
    /// Store graph blobs under this directory instead of in memory
    #[arg(long)]
    pub blob_dir: Option<PathBuf>,
    #[arg(long)]
    pub seed: Option<u64>,
    /// Override the configured retry interval
    #[arg(long)]
    pub retry_ms: Option<u64>,
}

#[derive(Args)]
pub struct LockArgs {
    #[arg(long, default_value = "x")]
    pub name: String,
    #[arg(long, default_value = "1000")]
    pub lease_ms: u64,
}

#[derive(Args)]
pub struct InspectArgs {
    /// Directory the blobs were written to
    #[arg(long)]
    pub blob_dir: PathBuf,
    #[arg(long, default_value = "1")]
    pub chain: u64,
    /// Show the cluster this address belongs to
    #[arg(long)]
    pub address: Option<String>,
}

#[derive(Args)]
pub struct ConfigArgs {}
