//! Configuration for arbiter-control.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};

/// Top-level configuration for the control service.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControlConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Remote platform client configuration.
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Fleet target configuration.
    #[serde(default)]
    pub fleet: FleetConfig,

    /// Artifact storage configuration.
    #[serde(default)]
    pub artifacts: ArtifactConfig,

    /// Webhook delivery configuration.
    #[serde(default)]
    pub webhooks: WebhookConfig,
}

impl ControlConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `control.toml` in the current directory (if present)
    /// 3. Environment variables with `ARBITER_CONTROL_` prefix
    pub fn load() -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file("control.toml"))
            .merge(Env::prefixed("ARBITER_CONTROL_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("ARBITER_CONTROL_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to listen on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Externally reachable base URL of this API. Embedded in deploy
    /// requests as the completion-callback target.
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8084)
}

fn default_api_base() -> String {
    "http://localhost:8084".to_owned()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            api_base: default_api_base(),
        }
    }
}

/// Which store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// PostgreSQL-backed store.
    #[default]
    Postgres,

    /// In-memory store for testing and local development.
    Memory,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Store backend to use.
    #[serde(default)]
    pub backend: StoreBackend,

    /// PostgreSQL connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "postgres://localhost/arbiter".to_owned()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Remote platform client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    /// Base URL for the remote platform deployment API.
    #[serde(default = "default_platform_url")]
    pub api_url: String,

    /// Base URL for the managed-account provisioning API.
    #[serde(default = "default_accounts_url")]
    pub accounts_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_platform_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_platform_url() -> String {
    "http://localhost:9090".to_owned()
}

fn default_accounts_url() -> String {
    "http://localhost:9091".to_owned()
}

const fn default_platform_timeout_secs() -> u64 {
    10
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_url: default_platform_url(),
            accounts_url: default_accounts_url(),
            timeout_secs: default_platform_timeout_secs(),
        }
    }
}

/// Fleet target configuration.
///
/// Target selection is a pluggable seam; the shipped selector returns this
/// single configured target for every decision.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Name of the fleet target.
    #[serde(default = "default_fleet_name")]
    pub name: String,

    /// Namespace on the remote platform to deploy into.
    #[serde(default = "default_fleet_namespace")]
    pub namespace: String,
}

fn default_fleet_name() -> String {
    "default".to_owned()
}

fn default_fleet_namespace() -> String {
    "decisions".to_owned()
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            name: default_fleet_name(),
            namespace: default_fleet_namespace(),
        }
    }
}

/// Artifact storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactConfig {
    /// Object store URL (e.g., "s3://bucket" or "file:///path").
    #[serde(default = "default_store_url")]
    pub store_url: String,

    /// S3 endpoint URL (for S3-compatible stores).
    pub endpoint: Option<String>,

    /// S3 region.
    pub region: Option<String>,

    /// S3 access key ID.
    pub access_key_id: Option<String>,

    /// S3 secret access key.
    pub secret_access_key: Option<String>,
}

fn default_store_url() -> String {
    "file:///var/lib/arbiter/artifacts".to_owned()
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            store_url: default_store_url(),
            endpoint: None,
            region: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

/// Webhook delivery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Maximum number of in-flight deliveries.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Timeout for a single delivery attempt in seconds.
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
}

const fn default_max_in_flight() -> usize {
    16
}

const fn default_delivery_timeout_secs() -> u64 {
    10
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            delivery_timeout_secs: default_delivery_timeout_secs(),
        }
    }
}
