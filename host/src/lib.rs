pub mod interfaces;
pub mod server;

use std::path::PathBuf;
use std::sync::Arc;

use axon_driver::ResultSink;
use axon_taskdb::TaskStore;
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::interfaces::HostResult;

fn default_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_config_path() -> PathBuf {
    PathBuf::from("config/config.json")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_rpc_url() -> String {
    "http://localhost:8545".to_string()
}

fn default_registry_address() -> String {
    "0x0000000000000000000000000000000000000000".to_string()
}

fn default_relay_url() -> String {
    "http://localhost:8084/".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Default, Clone, Serialize, Deserialize, Debug, Parser)]
#[command(
    name = "axon-bridge",
    about = "Bridge between API clients and the decentralized inference network",
    long_about = None
)]
#[serde(default)]
pub struct Cli {
    #[arg(long, require_equals = true, default_value = "0.0.0.0:8080")]
    #[serde(default = "default_address")]
    /// Server bind address
    pub address: String,

    #[arg(long, require_equals = true, default_value = "config/config.json")]
    #[serde(default = "default_config_path")]
    /// Path to a JSON config file. CLI flags override its contents
    pub config_path: PathBuf,

    #[arg(long, require_equals = true, default_value = "data")]
    #[serde(default = "default_data_dir")]
    /// Root directory for downloaded result artifacts
    pub data_dir: PathBuf,

    #[arg(long, require_equals = true, default_value = "http://localhost:8545")]
    #[serde(default = "default_rpc_url")]
    /// JSON-RPC endpoint of the chain node
    pub rpc_url: String,

    #[arg(
        long,
        require_equals = true,
        default_value = "0x0000000000000000000000000000000000000000"
    )]
    #[serde(default = "default_registry_address")]
    /// Address of the task registry contract
    pub registry_address: String,

    #[arg(long, require_equals = true, default_value = "http://localhost:8084/")]
    #[serde(default = "default_relay_url")]
    /// Base URL of the relay
    pub relay_url: String,

    #[arg(long, require_equals = true, env = "AXON_PRIVATE_KEY", default_value = "")]
    #[serde(skip_serializing)]
    /// Operator private key, hex encoded
    pub private_key: String,

    #[arg(long, require_equals = true, env = "RUST_LOG", default_value = "info")]
    #[serde(default = "default_log_level")]
    /// Set the log level
    pub log_level: String,
}

impl Cli {
    /// Read the options from the config file and merge the CLI
    /// values over it.
    pub fn merge_from_file(&mut self) -> HostResult<()> {
        let file = std::fs::File::open(&self.config_path)?;
        let reader = std::io::BufReader::new(file);
        let mut config: Value = serde_json::from_reader(reader)?;
        let this = serde_json::to_value(&self)?;
        merge(&mut config, &this);

        // The key never round-trips through JSON; keep the CLI/env
        // value unless only the config file has one.
        let private_key = std::mem::take(&mut self.private_key);
        *self = serde_json::from_value(config)?;
        if !private_key.is_empty() {
            self.private_key = private_key;
        }
        Ok(())
    }
}

/// Merges two json's together, overwriting `a` with the values of `b`
fn merge(a: &mut Value, b: &Value) {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            for (k, v) in b {
                merge(a.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
        (a, b) if !b.is_null() => *a = b.clone(),
        // If b is null, just keep a (which means do nothing).
        _ => {}
    }
}

/// Parse the command line and fold in the config file when present.
pub fn parse_opts() -> HostResult<Cli> {
    let mut opts = Cli::parse();
    if opts.config_path.exists() {
        opts.merge_from_file()?;
    }
    Ok(opts)
}

/// Shared state of the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TaskStore>,
    pub sink: ResultSink,
}
