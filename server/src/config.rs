//! Server configuration.

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use serde::Deserialize;
use xdg::BaseDirectories;

use crate::storage::LocalStorageConfig;

/// Application prefix in XDG base directories.
///
/// This will be concatenated into `$XDG_CONFIG_HOME/depot`.
const XDG_PREFIX: &str = "depot";

/// Environment variable storing the Base64-encoded TOML configuration.
///
/// This is useful for deploying to certain application platforms.
const ENV_CONFIG_BASE64: &str = "DEPOT_SERVER_CONFIG_BASE64";

/// Environment variable storing the database connection string.
const ENV_DATABASE_URL: &str = "DEPOT_SERVER_DATABASE_URL";

/// Configuration for the Depot Server.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Socket address to listen on.
    #[serde(default = "default_listen_address")]
    pub listen: SocketAddr,

    /// Allowed `Host` headers.
    ///
    /// This _must_ be configured for production use. If unconfigured
    /// or the list is empty, all `Host` headers are allowed.
    #[serde(rename = "allowed-hosts")]
    #[serde(default = "Vec::new")]
    pub allowed_hosts: Vec<String>,

    /// The canonical API endpoint of this server.
    #[serde(rename = "api-endpoint")]
    pub api_endpoint: Option<String>,

    /// Maximum accepted HTTP request body size, in bytes.
    ///
    /// Must be large enough to hold one base64-encoded chunk.
    #[serde(rename = "max-request-body-size")]
    #[serde(default = "default_max_request_body_size")]
    pub max_request_body_size: usize,

    /// Database connection.
    pub database: DatabaseConfig,

    /// Storage.
    pub storage: StorageConfig,

    /// Background jobs.
    #[serde(default = "Default::default")]
    pub jobs: JobConfig,

    /// Garbage collection.
    #[serde(rename = "garbage-collection")]
    #[serde(default = "Default::default")]
    pub garbage_collection: GarbageCollectionConfig,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL.
    #[serde(default = "load_database_url_from_env")]
    pub url: String,

    /// Whether to enable sending of periodic heartbeat queries.
    ///
    /// If enabled, a heartbeat query will be sent every minute.
    #[serde(default = "default_db_heartbeat")]
    pub heartbeat: bool,
}

/// File storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// Local file storage.
    ///
    /// The blob store must be able to hand out filesystem paths
    /// (variant generation decodes images in place), so local
    /// storage is the only backend.
    #[serde(rename = "local")]
    Local(LocalStorageConfig),
}

/// Background job configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Number of worker tasks processing background jobs.
    #[serde(default = "default_job_workers")]
    pub workers: usize,
}

/// Garbage collection config.
#[derive(Debug, Clone, Deserialize)]
pub struct GarbageCollectionConfig {
    /// The frequency to run garbage collection at.
    ///
    /// If zero, automatic garbage collection is disabled, but it can
    /// still be run manually with `depotd --mode garbage-collector-once`.
    #[serde(with = "humantime_serde", default = "default_gc_interval")]
    pub interval: Duration,

    /// How long a pending or uploading session may go without
    /// completing before its chunks are reclaimed and the upload is
    /// marked failed.
    #[serde(rename = "upload-retention-period")]
    #[serde(with = "humantime_serde", default = "default_upload_retention_period")]
    pub upload_retention_period: Duration,
}

fn load_database_url_from_env() -> String {
    env::var(ENV_DATABASE_URL).unwrap_or_else(|_| {
        panic!(
            "Database URL must be specified in either database.url \
            or the {ENV_DATABASE_URL} environment."
        )
    })
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            workers: default_job_workers(),
        }
    }
}

impl Default for GarbageCollectionConfig {
    fn default() -> Self {
        Self {
            interval: default_gc_interval(),
            upload_retention_period: default_upload_retention_period(),
        }
    }
}

fn default_listen_address() -> SocketAddr {
    "[::]:8080".parse().unwrap()
}

fn default_max_request_body_size() -> usize {
    // One base64-encoded 100 MiB chunk plus JSON overhead fits with
    // a wide margin.
    256 * 1024 * 1024
}

fn default_db_heartbeat() -> bool {
    false
}

fn default_job_workers() -> usize {
    4
}

fn default_gc_interval() -> Duration {
    Duration::from_secs(43200)
}

fn default_upload_retention_period() -> Duration {
    Duration::from_secs(86400)
}

fn load_config_from_path(path: &Path) -> Result<Config> {
    tracing::info!("Using configurations: {:?}", path);

    let config = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&config)?)
}

fn load_config_from_str(s: &str) -> Result<Config> {
    tracing::info!("Using configurations from environment variable");
    Ok(toml::from_str(s)?)
}

/// Loads the configuration in the standard order.
///
/// Precedence is as follows:
/// * Path given from the command line
/// * Configuration read from the DEPOT_SERVER_CONFIG_BASE64 environment variable
/// * Path read from the XDG config directory
pub async fn load_config(config_path: Option<&Path>) -> Result<Config> {
    if let Some(config_path) = config_path {
        return load_config_from_path(config_path);
    }

    if let Ok(config_env) = env::var(ENV_CONFIG_BASE64) {
        let decoded = String::from_utf8(BASE64_STANDARD.decode(config_env.as_bytes())?)?;
        return load_config_from_str(&decoded);
    }

    let config_path = get_xdg_config_path()?;
    load_config_from_path(&config_path)
}

pub fn get_xdg_config_path() -> Result<PathBuf> {
    let xdg_dirs = BaseDirectories::with_prefix(XDG_PREFIX)?;
    let config_path = xdg_dirs.place_config_file("server.toml")?;

    Ok(config_path)
}
