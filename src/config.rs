//! Configuration module for the program-metadata client
//!
//! This module handles configuration loading from TOML files and
//! environment variables, and maps it onto the planner, executor and
//! sender settings.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentConfig;

use crate::instruction_plans::{ExecutorConfig, PlannerConfig, SenderConfig};

/// Environment variable overriding `rpc.url`
pub const RPC_URL_ENV: &str = "PROGRAM_METADATA_RPC_URL";
/// Environment variable overriding `wallet.keypair_path`
pub const KEYPAIR_ENV: &str = "PROGRAM_METADATA_KEYPAIR";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// RPC endpoint configuration
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Wallet configuration
    #[serde(default)]
    pub wallet: WalletConfig,

    /// Transaction plan execution
    #[serde(default)]
    pub executor: ExecutionConfig,

    /// Transaction planning
    #[serde(default)]
    pub planner: PlanningConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// JSON RPC endpoint
    #[serde(default = "default_rpc_url")]
    pub url: String,

    /// Commitment used for reads and confirmations
    #[serde(default = "default_commitment")]
    pub commitment: String,

    /// Request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,

    /// Delay between signature status polls in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Path to keypair file
    #[serde(default = "default_keypair_path")]
    pub keypair_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Parallel transactions sent concurrently
    #[serde(default = "default_parallel_chunk_size")]
    pub parallel_chunk_size: usize,

    /// Retries per transaction after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// How long a fetched blockhash is reused
    #[serde(default = "default_blockhash_ttl")]
    pub blockhash_ttl_secs: u64,

    /// Simulate transactions to size their compute unit limit
    #[serde(default = "default_true")]
    pub simulate_compute_units: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlanningConfig {
    /// Priority fee in micro-lamports per compute unit
    #[serde(default)]
    pub compute_unit_price: Option<u64>,
}

// Default value functions
fn default_rpc_url() -> String { "http://127.0.0.1:8899".to_string() }
fn default_commitment() -> String { "confirmed".to_string() }
fn default_rpc_timeout() -> u64 { 30 }
fn default_poll_interval() -> u64 { 500 }
fn default_keypair_path() -> String { "~/.config/solana/id.json".to_string() }
fn default_parallel_chunk_size() -> usize { 5 }
fn default_max_retries() -> usize { 3 }
fn default_blockhash_ttl() -> u64 { 60 }
fn default_true() -> bool { true }

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            commitment: default_commitment(),
            timeout_secs: default_rpc_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            keypair_path: default_keypair_path(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallel_chunk_size: default_parallel_chunk_size(),
            max_retries: default_max_retries(),
            blockhash_ttl_secs: default_blockhash_ttl(),
            simulate_compute_units: default_true(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with `.env` and environment variable overrides
    pub fn from_file_with_env(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `PROGRAM_METADATA_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(RPC_URL_ENV) {
            self.rpc.url = url;
        }
        if let Ok(path) = std::env::var(KEYPAIR_ENV) {
            self.wallet.keypair_path = path;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.executor.parallel_chunk_size == 0 {
            anyhow::bail!("executor.parallel_chunk_size must be at least 1");
        }
        if self.rpc.url.is_empty() {
            anyhow::bail!("rpc.url must not be empty");
        }
        if self.rpc.poll_interval_ms == 0 {
            anyhow::bail!("rpc.poll_interval_ms must be at least 1");
        }
        self.commitment()?;
        Ok(())
    }

    pub fn commitment(&self) -> anyhow::Result<CommitmentConfig> {
        self.rpc
            .commitment
            .parse::<CommitmentConfig>()
            .ok()
            .with_context(|| format!("Invalid rpc.commitment '{}'", self.rpc.commitment))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.rpc.poll_interval_ms)
    }

    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            compute_unit_price: self.planner.compute_unit_price,
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            parallel_chunk_size: self.executor.parallel_chunk_size,
        }
    }

    pub fn sender_config(&self) -> SenderConfig {
        SenderConfig {
            max_retries: self.executor.max_retries,
            blockhash_ttl: Duration::from_secs(self.executor.blockhash_ttl_secs),
            simulate_compute_units: self.executor.simulate_compute_units,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.executor.parallel_chunk_size, 5);
        assert_eq!(config.executor.max_retries, 3);
        assert_eq!(config.sender_config().blockhash_ttl, Duration::from_secs(60));
        assert!(config.planner_config().compute_unit_price.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml(
            r#"
            [rpc]
            url = "https://api.devnet.solana.com"

            [executor]
            max_retries = 1

            [planner]
            compute_unit_price = 5000
            "#,
        )
        .unwrap();

        assert_eq!(config.rpc.url, "https://api.devnet.solana.com");
        assert_eq!(config.rpc.commitment, "confirmed");
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.executor.max_retries, 1);
        assert_eq!(config.executor.parallel_chunk_size, 5);
        assert_eq!(config.planner.compute_unit_price, Some(5000));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_toml("[executor]\nparallel_chunk_size = 0").is_err());
        assert!(Config::from_toml("[rpc]\ncommitment = \"eventually\"").is_err());
        assert!(Config::from_toml("[rpc]\npoll_interval_ms = 0").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[wallet]\nkeypair_path = \"/tmp/key.json\"").unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.wallet.keypair_path, "/tmp/key.json");
    }
}
