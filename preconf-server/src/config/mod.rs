//! Configuration module for the settlement oracle server.
//!
//! Configuration is loaded from:
//! 1. A TOML configuration file (default: `./preconf-oracle.toml`)
//! 2. Environment variables (for secrets)
//!
//! Secrets are never read from the file:
//! - `DATABASE_URL`: the PostgreSQL connection string
//! - `ORACLE_PRIVATE_KEY`: the hex key of the settlement account

mod file;

pub use file::FileConfig;

use preconf_core::config::{ContractsConfig, ListenerConfig, TransactorConfig, UpdaterConfig};
use preconf_core::utils::retry::MAX_RETRY_EXPONENT;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable is not set")]
    MissingDatabaseUrl,

    #[error("ORACLE_PRIVATE_KEY environment variable is not set")]
    MissingPrivateKey,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub listen: SocketAddr,
    pub settlement_rpc: Url,
    pub l1_rpc: Url,
    pub contracts: ContractsConfig,
    pub transactor: TransactorConfig,
    pub updater: UpdaterConfig,
    pub listener: ListenerConfig,
}

/// Configuration loader that handles file parsing.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Load and validate the configuration file.
    ///
    /// The `--listen` override, when given, replaces `server.listen`.
    pub fn load(&self) -> Result<OracleConfig, ConfigError> {
        let content = std::fs::read_to_string(&self.config_path)?;
        let mut config = Self::load_from_str(&content)?;
        if let Some(listen) = self.listen_override {
            config.listen = listen;
        }
        Ok(config)
    }

    /// Load and validate configuration from a TOML string.
    pub fn load_from_str(content: &str) -> Result<OracleConfig, ConfigError> {
        let file_config: FileConfig = toml::from_str(content)?;
        Self::validate(&file_config)?;
        Ok(Self::into_runtime(file_config))
    }

    fn validate(config: &FileConfig) -> Result<(), ConfigError> {
        if config.transactor.allowed_pending_txn_count == 0 {
            return Err(ConfigError::ValidationError(
                "transactor.allowed_pending_txn_count must be greater than zero".to_string(),
            ));
        }
        if config.transactor.confirmation_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "transactor.confirmation_interval_secs must be greater than zero".to_string(),
            ));
        }
        if config.updater.max_retry_exponent > MAX_RETRY_EXPONENT {
            return Err(ConfigError::ValidationError(format!(
                "updater.max_retry_exponent must be at most {MAX_RETRY_EXPONENT}"
            )));
        }

        let contracts = [
            ("block_tracker", config.contracts.block_tracker),
            ("preconf_store", config.contracts.preconf_store),
            ("oracle", config.contracts.oracle),
        ];
        let mut seen = HashSet::new();
        for (name, address) in contracts {
            if address.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "contracts.{name} must not be the zero address"
                )));
            }
            if !seen.insert(address) {
                return Err(ConfigError::ValidationError(format!(
                    "contracts.{name} ({address}) is used for more than one contract"
                )));
            }
        }

        for (name, url) in [
            ("chains.settlement_rpc", &config.chains.settlement_rpc),
            ("chains.l1_rpc", &config.chains.l1_rpc),
        ] {
            if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
                return Err(ConfigError::ValidationError(format!(
                    "{name} has unsupported scheme '{}'",
                    url.scheme()
                )));
            }
        }
        // Logs are streamed through a subscription.
        if !matches!(config.chains.settlement_rpc.scheme(), "ws" | "wss") {
            return Err(ConfigError::ValidationError(
                "chains.settlement_rpc must be a websocket endpoint".to_string(),
            ));
        }

        Ok(())
    }

    fn into_runtime(config: FileConfig) -> OracleConfig {
        OracleConfig {
            listen: config.server.listen,
            settlement_rpc: config.chains.settlement_rpc,
            l1_rpc: config.chains.l1_rpc,
            contracts: ContractsConfig {
                block_tracker: config.contracts.block_tracker,
                preconf_store: config.contracts.preconf_store,
                oracle: config.contracts.oracle,
            },
            transactor: TransactorConfig {
                allowed_pending_txn_count: config.transactor.allowed_pending_txn_count,
                confirmation_interval: Duration::from_secs(
                    config.transactor.confirmation_interval_secs,
                ),
            },
            updater: UpdaterConfig {
                max_retry_exponent: config.updater.max_retry_exponent,
            },
            listener: ListenerConfig {
                start_block: config.listener.start_block,
            },
        }
    }
}

/// Get the database URL from environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

/// Get the settlement account key from environment.
pub fn get_private_key() -> Result<String, ConfigError> {
    std::env::var("ORACLE_PRIVATE_KEY").map_err(|_| ConfigError::MissingPrivateKey)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const CONTRACTS: &str = r#"
[contracts]
block_tracker = "0x2eed8e0d6b3b73d2e4e5a2c0f3b1c8e4a7d3f901"
preconf_store = "0x3fe9e1b0c4a6d7e8f9a0b1c2d3e4f5a6b7c8d902"
oracle = "0x4a1b2c3d4e5f60718293a4b5c6d7e8f901234503"
"#;

    const CHAINS: &str = r#"
[chains]
settlement_rpc = "ws://127.0.0.1:8546"
l1_rpc = "https://eth.example.com"
"#;

    #[test]
    fn test_load_valid_config() {
        let content = format!("{CHAINS}{CONTRACTS}\n[listener]\nstart_block = 42\n");
        let config = ConfigLoader::load_from_str(&content).unwrap();
        assert_eq!(
            config.contracts.oracle,
            address!("0x4a1b2c3d4e5f60718293a4b5c6d7e8f901234503")
        );
        assert_eq!(config.transactor.allowed_pending_txn_count, 128);
        assert_eq!(config.transactor.confirmation_interval, Duration::from_secs(1));
        assert_eq!(config.updater.max_retry_exponent, 6);
        assert_eq!(config.listener.start_block, Some(42));
    }

    #[test]
    fn test_zero_pending_txn_count_rejected() {
        let content = format!("{CHAINS}{CONTRACTS}\n[transactor]\nallowed_pending_txn_count = 0\n");
        let result = ConfigLoader::load_from_str(&content);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_zero_confirmation_interval_rejected() {
        let content = format!("{CHAINS}{CONTRACTS}\n[transactor]\nconfirmation_interval_secs = 0\n");
        let result = ConfigLoader::load_from_str(&content);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_large_retry_exponent_rejected() {
        let content = format!("{CHAINS}{CONTRACTS}\n[updater]\nmax_retry_exponent = 64\n");
        let result = ConfigLoader::load_from_str(&content);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        let content = format!("{CHAINS}{CONTRACTS}\n[updater]\nmax_retry_exponent = 20\n");
        let config = ConfigLoader::load_from_str(&content).unwrap();
        assert_eq!(config.updater.max_retry_exponent, 20);
    }

    #[test]
    fn test_duplicate_contract_rejected() {
        let content = format!(
            r#"{CHAINS}
[contracts]
block_tracker = "0x2eed8e0d6b3b73d2e4e5a2c0f3b1c8e4a7d3f901"
preconf_store = "0x2eed8e0d6b3b73d2e4e5a2c0f3b1c8e4a7d3f901"
oracle = "0x4a1b2c3d4e5f60718293a4b5c6d7e8f901234503"
"#
        );
        let result = ConfigLoader::load_from_str(&content);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_zero_contract_rejected() {
        let content = format!(
            r#"{CHAINS}
[contracts]
block_tracker = "0x2eed8e0d6b3b73d2e4e5a2c0f3b1c8e4a7d3f901"
preconf_store = "0x3fe9e1b0c4a6d7e8f9a0b1c2d3e4f5a6b7c8d902"
oracle = "0x0000000000000000000000000000000000000000"
"#
        );
        let result = ConfigLoader::load_from_str(&content);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_http_settlement_rpc_rejected() {
        let content = format!(
            r#"
[chains]
settlement_rpc = "http://127.0.0.1:8545"
l1_rpc = "https://eth.example.com"
{CONTRACTS}"#
        );
        let result = ConfigLoader::load_from_str(&content);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_listen_override_applied() {
        let path = std::env::temp_dir().join(format!("preconf-oracle-{}.toml", std::process::id()));
        std::fs::write(&path, format!("{CHAINS}{CONTRACTS}")).unwrap();
        let listen: SocketAddr = "127.0.0.1:9100".parse().unwrap();

        let config = ConfigLoader::new(&path, Some(listen)).load().unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.listen, listen);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let loader = ConfigLoader::new("/nonexistent/preconf-oracle.toml", None);
        assert!(matches!(loader.load(), Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let result = ConfigLoader::load_from_str("[chains\nsettlement_rpc = 1");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
