//! # CLI Interface
//!
//! Command-line arguments for `ember-node`, defined with `clap` derive.
//! Every `run` flag can also come from an `EMBER_*` environment variable.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ember_protocol::config::{
    DEFAULT_HOST, DEFAULT_PEER_REQUEST_TIMEOUT, DEFAULT_PEER_UPDATE_INTERVAL, DEFAULT_POA_CYCLE,
};
use ember_protocol::crypto::Account;
use ember_protocol::network::consensus::ConsensusKind;
use ember_protocol::network::peers::Peer;
use ember_protocol::network::selector::Strategy;

use crate::logging::LogFormat;

/// Ember blockchain node.
///
/// Keeps a copy of the chain, accepts signed transactions, mines blocks
/// under proof of work or proof of authority, and stays in sync with its
/// peers.
#[derive(Parser, Debug)]
#[command(
    name = "ember-node",
    about = "Ember blockchain node",
    version,
    propagate_version = true
)]
pub struct EmberNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Query the status of a running node through its peer endpoint.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding the block database. Created on first run.
    #[arg(long, short = 'd', env = "EMBER_DATA_DIR", default_value = "ember-data")]
    pub data_dir: PathBuf,

    /// Genesis document (JSON).
    #[arg(long, short = 'g', env = "EMBER_GENESIS", default_value = "genesis.json")]
    pub genesis: PathBuf,

    /// `ip:port` for peer traffic. Also this node's identity among peers.
    #[arg(long, env = "EMBER_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Address for the public API.
    #[arg(long, env = "EMBER_PUBLIC_ADDR", default_value = "0.0.0.0:8080")]
    pub public_addr: String,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "EMBER_METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,

    /// Account credited with fees and mining rewards.
    #[arg(long, short = 'b', env = "EMBER_BENEFICIARY", value_parser = parse_account)]
    pub beneficiary: Account,

    /// `pow` or `poa`.
    #[arg(long, env = "EMBER_CONSENSUS", default_value = "pow")]
    pub consensus: ConsensusKind,

    /// Transaction selection: `tip` or `tip_advanced`.
    #[arg(long, env = "EMBER_STRATEGY", default_value = "tip")]
    pub strategy: Strategy,

    /// Seed peers as `ip:port`, comma separated.
    #[arg(long = "peer", env = "EMBER_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Seconds between peer discovery passes.
    #[arg(long, env = "EMBER_PEER_UPDATE_SECS", default_value_t = DEFAULT_PEER_UPDATE_INTERVAL.as_secs())]
    pub peer_update_secs: u64,

    /// Seconds per PoA cycle.
    #[arg(long, env = "EMBER_POA_CYCLE_SECS", default_value_t = DEFAULT_POA_CYCLE.as_secs())]
    pub poa_cycle_secs: u64,

    /// Timeout for every request to a peer, in seconds.
    #[arg(long, env = "EMBER_PEER_TIMEOUT_SECS", default_value_t = DEFAULT_PEER_REQUEST_TIMEOUT.as_secs())]
    pub peer_timeout_secs: u64,

    /// `pretty` or `json`.
    #[arg(long, env = "EMBER_LOG_FORMAT", default_value = "pretty", value_parser = parse_log_format)]
    pub log_format: LogFormat,
}

impl RunArgs {
    pub fn known_peers(&self) -> Vec<Peer> {
        self.peers
            .iter()
            .map(|host| host.trim())
            .filter(|host| !host.is_empty())
            .map(Peer::new)
            .collect()
    }
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Peer endpoint (`ip:port`) of the running node.
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,
}

fn parse_account(raw: &str) -> Result<Account, String> {
    Account::parse(raw).map_err(|e| e.to_string())
}

fn parse_log_format(raw: &str) -> Result<LogFormat, String> {
    Ok(LogFormat::from_str_lossy(raw))
}
