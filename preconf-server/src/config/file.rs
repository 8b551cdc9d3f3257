//! TOML file configuration structures.
//!
//! These structs directly map to the `preconf-oracle.toml` file format.

use alloy::primitives::Address;
use preconf_core::config::DEFAULT_ALLOWED_PENDING_TXN_COUNT;
use preconf_core::utils::retry::DEFAULT_MAX_RETRY_EXPONENT;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub chains: ChainsConfig,
    pub contracts: ContractsConfig,
    #[serde(default)]
    pub transactor: TransactorConfig,
    #[serde(default)]
    pub updater: UpdaterConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port the health endpoint listens on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

/// RPC endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainsConfig {
    /// Settlement chain RPC. Must support subscriptions (ws:// or wss://).
    pub settlement_rpc: Url,
    /// L1 RPC, used to read block contents.
    pub l1_rpc: Url,
}

/// Contract addresses on the settlement chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    pub block_tracker: Address,
    pub preconf_store: Address,
    pub oracle: Address,
}

/// Transactor configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactorConfig {
    /// Maximum distance between a nonce being sent and the confirmed nonce.
    #[serde(default = "default_allowed_pending_txn_count")]
    pub allowed_pending_txn_count: u64,
    /// Seconds between confirmation checks.
    #[serde(default = "default_confirmation_interval_secs")]
    pub confirmation_interval_secs: u64,
}

impl Default for TransactorConfig {
    fn default() -> Self {
        Self {
            allowed_pending_txn_count: default_allowed_pending_txn_count(),
            confirmation_interval_secs: default_confirmation_interval_secs(),
        }
    }
}

fn default_allowed_pending_txn_count() -> u64 {
    DEFAULT_ALLOWED_PENDING_TXN_COUNT
}

fn default_confirmation_interval_secs() -> u64 {
    1
}

/// Updater configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Cap on the retry backoff exponent (delay is 2^n seconds).
    #[serde(default = "default_max_retry_exponent")]
    pub max_retry_exponent: u32,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            max_retry_exponent: default_max_retry_exponent(),
        }
    }
}

fn default_max_retry_exponent() -> u32 {
    DEFAULT_MAX_RETRY_EXPONENT
}

/// Log listener configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Block to start reading logs from when no cursor is stored yet.
    /// Without it, only live logs are read on first start.
    pub start_block: Option<u64>,
}
