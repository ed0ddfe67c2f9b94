// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # DeRec CLI
//!
//! Entry point for the `derec-cli` binary. Subcommands:
//!
//! - `derive`: key-pair at a derivation path
//! - `account`: BIP44 address key (defaults: Dogecoin, index 1)
//! - `simulate`: run a secret through add / update / remove / close over
//!   in-memory helpers and print the resulting versions
//! - `version`: print build version information
//!
//! Results are printed to stdout as JSON; logs go to stderr.

mod cli;
mod logging;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;

use derec_protocol::config::{SecretConfig, PROTOCOL_VERSION};
use derec_protocol::helper::HelperBehavior;
use derec_protocol::{
    DerivationPath, Identity, KeyDeriver, KeyPair, MemoryTransport, Owner, Pairable, Version,
};

use cli::{Commands, DerecCli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DerecCli::parse();
    logging::init_logging("derec_cli=info,derec_protocol=info", cli.log_format);

    match cli.command {
        Commands::Derive(args) => derive(args),
        Commands::Account(args) => account(args),
        Commands::Simulate(args) => simulate(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// A derived key-pair as printed by `derive` and `account`.
#[derive(Serialize)]
struct KeyReport {
    path: String,
    public_key: String,
    private_key: String,
}

impl KeyReport {
    fn new(path: &DerivationPath, key: &KeyPair) -> Self {
        Self {
            path: path.to_string(),
            public_key: key.public_key().to_hex(),
            private_key: hex::encode(key.private_key_bytes()),
        }
    }
}

fn deriver(seed: &str) -> Result<KeyDeriver> {
    KeyDeriver::from_hex_seed(seed).context("invalid seed")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `derive`: absolute paths go straight to the master key, relative ones
/// hang off m/44'/coin'.
fn derive(args: cli::DeriveArgs) -> Result<()> {
    let deriver = deriver(&args.seed.seed)?;
    let relative: DerivationPath = args
        .path
        .parse()
        .with_context(|| format!("invalid derivation path {:?}", args.path))?;

    let absolute = if args.path.trim_start().starts_with(|c: char| c == 'm' || c == 'M') {
        relative
    } else {
        DerivationPath::bip44_coin_root(args.coin_type)?.join(&relative)
    };
    let key = deriver.derive_path(&absolute)?;

    tracing::debug!(path = %absolute, "derived key");
    print_json(&KeyReport::new(&absolute, &key))
}

/// `account`: BIP44 address key lookup.
fn account(args: cli::AccountArgs) -> Result<()> {
    let deriver = deriver(&args.seed.seed)?;
    let path = DerivationPath::bip44_address(args.coin_type, args.account, args.change, args.index)?;
    let key = deriver.bip44_address_key(args.coin_type, args.account, args.change, args.index)?;

    tracing::debug!(path = %path, "derived account key");
    print_json(&KeyReport::new(&path, &key))
}

/// Everything `simulate` observed.
#[derive(Serialize)]
struct SimulationReport {
    secret_id: String,
    description: String,
    config: SecretConfig,
    helpers: Vec<Pairable>,
    updates: Vec<UpdateReport>,
    removed: Vec<String>,
    versions: Vec<Version>,
}

#[derive(Serialize)]
struct UpdateReport {
    version: Option<u64>,
    safe: bool,
    error: Option<String>,
}

/// `simulate`: pair helpers, push updates, drop a helper, close.
async fn simulate(args: cli::SimulateArgs) -> Result<()> {
    if args.helpers == 0 {
        bail!("--helpers must be at least 1");
    }
    if args.unresponsive > args.helpers {
        bail!(
            "--unresponsive ({}) exceeds --helpers ({})",
            args.unresponsive,
            args.helpers
        );
    }

    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str::<SecretConfig>(&raw)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        }
        None => SecretConfig::default(),
    };
    if let Some(ms) = args.update_timeout_ms {
        config = config.with_update_timeout(Duration::from_millis(ms));
    }

    let seed = match &args.seed {
        Some(seed) => seed.clone(),
        None => hex::encode(rand::random::<[u8; 32]>()),
    };

    let transport = MemoryTransport::new();
    let owner = Owner::new(
        Identity::new("owner", "mailto:owner@example.com", None)?,
        Arc::new(deriver(&seed)?),
        Arc::new(transport.clone()),
    )
    .with_config(config.clone())?;

    let secret = owner.new_secret("simulation", b"initial secret bytes")?;
    tracing::info!(secret = %secret.id(), helpers = args.helpers, unresponsive = args.unresponsive, "simulation started");

    let helpers = (0..args.helpers)
        .map(|i| {
            Identity::new(
                &format!("helper-{i}"),
                &format!("mailto:helper-{i}@example.com"),
                Some(format!("mem://helper-{i}").as_str()),
            )
        })
        .collect::<derec_protocol::Result<Vec<_>>>()?;
    for helper in helpers.iter().rev().take(args.unresponsive) {
        transport.set_update_behavior(helper, HelperBehavior::Silent);
    }
    secret.add_helpers(helpers.clone()).await?;

    let mut updates = Vec::new();
    for payload in [&b"update one"[..], &b"update two"[..]] {
        updates.push(update_report(secret.update(payload).await));
    }

    let removed = secret.remove_helpers(&[helpers[0].id()]).await?;
    updates.push(update_report(secret.update(b"after removal").await));

    let helper_records = secret.helpers()?;
    secret.close().await;

    print_json(&SimulationReport {
        secret_id: secret.id().to_string(),
        description: secret.description().to_string(),
        config,
        helpers: helper_records,
        updates,
        removed: removed.iter().map(ToString::to_string).collect(),
        versions: secret.versions(),
    })
}

fn update_report(result: derec_protocol::Result<Version>) -> UpdateReport {
    match result {
        Ok(version) => UpdateReport {
            version: Some(version.number()),
            safe: true,
            error: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, "update not confirmed");
            let version = match &e {
                derec_protocol::DeRecError::UpdateNotSafe { version, .. }
                | derec_protocol::DeRecError::Canceled { version } => Some(*version),
                _ => None,
            };
            UpdateReport {
                version,
                safe: false,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Prints version information to stdout.
fn print_version() {
    println!("derec-cli {}", env!("CARGO_PKG_VERSION"));
    println!("protocol  {}", PROTOCOL_VERSION);
}
