//! # CLI Interface
//!
//! Command-line structure for `derec-cli`, via `clap` derive.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use derec_protocol::config::DEFAULT_COIN_TYPE;

use crate::logging::LogFormat;

/// DeRec command-line tools.
///
/// Derive helper and account keys from a seed, or run a secret through its
/// whole lifecycle against in-memory helpers.
#[derive(Parser, Debug)]
#[command(
    name = "derec-cli",
    about = "DeRec key derivation and secret lifecycle tools",
    version,
    propagate_version = true
)]
pub struct DerecCli {
    /// Log output format (logs go to stderr).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty, env = "DEREC_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Derive the key-pair at a path.
    Derive(DeriveArgs),
    /// Derive a BIP44 address key: m/44'/coin'/account'/change/index.
    Account(AccountArgs),
    /// Simulate a secret's lifecycle over in-memory helpers.
    Simulate(SimulateArgs),
    /// Print version information and exit.
    Version,
}

/// Seed shared by the derivation commands.
#[derive(Args, Debug)]
pub struct SeedArgs {
    /// Hex-encoded BIP32 seed, 16 to 64 bytes.
    ///
    /// **Never pass a real wallet seed on the command line** outside a
    /// throwaway environment; prefer the environment variable.
    #[arg(long, env = "DEREC_SEED", hide_env_values = true)]
    pub seed: String,
}

/// Arguments for the `derive` subcommand.
#[derive(Args, Debug)]
pub struct DeriveArgs {
    #[command(flatten)]
    pub seed: SeedArgs,

    /// SLIP-44 coin type for relative paths.
    #[arg(long, default_value_t = DEFAULT_COIN_TYPE)]
    pub coin_type: u32,

    /// Derivation path. `m/...` is absolute; anything else is relative to
    /// m/44'/coin'.
    #[arg(long)]
    pub path: String,
}

/// Arguments for the `account` subcommand.
#[derive(Args, Debug)]
pub struct AccountArgs {
    #[command(flatten)]
    pub seed: SeedArgs,

    /// SLIP-44 coin type (3 is Dogecoin).
    #[arg(long, default_value_t = DEFAULT_COIN_TYPE)]
    pub coin_type: u32,

    /// Account index (hardened).
    #[arg(long, default_value_t = 0)]
    pub account: u32,

    /// Change branch: 0 external, 1 internal.
    #[arg(long, default_value_t = 0)]
    pub change: u32,

    /// Address index.
    #[arg(long, default_value_t = 1)]
    pub index: u32,
}

/// Arguments for the `simulate` subcommand.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Secret configuration as JSON (quorum, timeouts in ms, coin type).
    #[arg(long, short = 'c', env = "DEREC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Hex seed for the owner. A random one is generated when omitted.
    #[arg(long, env = "DEREC_SEED", hide_env_values = true)]
    pub seed: Option<String>,

    /// Number of helpers to pair.
    #[arg(long, default_value_t = 3)]
    pub helpers: usize,

    /// How many of those helpers never acknowledge updates.
    #[arg(long, default_value_t = 0)]
    pub unresponsive: usize,

    /// Override the update deadline, in milliseconds.
    #[arg(long)]
    pub update_timeout_ms: Option<u64>,
}
