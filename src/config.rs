pub mod api_info;

use crate::deals::EngineConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const ENV_CONFIG_PATH: &str = "SPADE_CLIENT_CONFIG";
pub const ENV_LOG: &str = "SPADE_CLIENT_LOG";
pub const ENV_DOWNLOAD_PATH: &str = "SPADE_CLIENT_DOWNLOAD_PATH";
pub const ENV_MAX_ACTIVE: &str = "SPADE_CLIENT_MAX_ACTIVE";
pub const ENV_FULLNODE_API_INFO: &str = "FULLNODE_API_INFO";
pub const ENV_MINER_API_INFO: &str = "MINER_API_INFO";
pub const ENV_MARKETS_API_INFO: &str = "MARKETS_API_INFO";

fn default_log_level() -> String {
    "info".to_string()
}
fn default_download_path() -> String {
    "/tmp/filecoin-spade-downloads".to_string()
}
fn default_max_spade_deals_active() -> usize {
    2
}
fn default_spade_url() -> String {
    "https://api.spade.storacha.network/".to_string()
}
fn default_pending_refresh_secs() -> u64 {
    30
}
fn default_daemon_url() -> String {
    "http://127.0.0.1:1234/rpc/v1".to_string()
}
fn default_miner_url() -> String {
    "http://127.0.0.1:2345/rpc/v0".to_string()
}
fn default_boost_rpc_url() -> String {
    "http://127.0.0.1:1288/rpc/v0".to_string()
}
fn default_graphql_port() -> u16 {
    8080
}
fn default_graphql_url() -> String {
    "http://127.0.0.1:8080".to_string()
}
fn default_aria2_url() -> String {
    "http://127.0.0.1:6800/jsonrpc".to_string()
}
fn default_acquire_max_retries() -> u32 {
    10
}
fn default_acquire_backoff_secs() -> u64 {
    10
}
fn default_monitor_every_secs() -> u64 {
    10
}
fn default_open_deals_limit() -> u32 {
    1000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub spade: SpadeConfig,
    pub lotus: LotusConfig,
    pub boost: BoostConfig,
    pub aria2: Aria2Config,
    pub deals: DealsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    /// Where aria2 writes downloads; must be readable by Boost at the same path.
    pub download_path: String,
    /// Active deals plus reservations waiting for a proposal.
    pub max_spade_deals_active: usize,
    pub insecure_skip_verify: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpadeConfig {
    pub url: String,
    pub pending_refresh_secs: u64,
    /// Pieces never to reserve.
    pub ignored_pieces: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LotusConfig {
    pub daemon_url: String,
    pub daemon_token: String,
    pub miner_url: String,
    pub miner_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostConfig {
    pub rpc_url: String,
    pub auth_token: String,
    /// Used to derive `graphql_url` from `MARKETS_API_INFO`.
    pub graphql_port: u16,
    pub graphql_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Aria2Config {
    pub url: String,
    /// `--rpc-secret` of the aria2 daemon; empty when unset.
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DealsConfig {
    /// Retries after the first failed download start.
    pub acquire_max_retries: u32,
    /// Retry `n` waits `n * acquire_backoff_secs`.
    pub acquire_backoff_secs: u64,
    pub monitor_every_secs: u64,
    /// Page size of the Boost open-deal query.
    pub open_deals_limit: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            download_path: default_download_path(),
            max_spade_deals_active: default_max_spade_deals_active(),
            insecure_skip_verify: false,
        }
    }
}

impl Default for SpadeConfig {
    fn default() -> Self {
        Self {
            url: default_spade_url(),
            pending_refresh_secs: default_pending_refresh_secs(),
            ignored_pieces: Vec::new(),
        }
    }
}

impl Default for LotusConfig {
    fn default() -> Self {
        Self {
            daemon_url: default_daemon_url(),
            daemon_token: String::new(),
            miner_url: default_miner_url(),
            miner_token: String::new(),
        }
    }
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_boost_rpc_url(),
            auth_token: String::new(),
            graphql_port: default_graphql_port(),
            graphql_url: default_graphql_url(),
        }
    }
}

impl Default for Aria2Config {
    fn default() -> Self {
        Self {
            url: default_aria2_url(),
            secret: String::new(),
        }
    }
}

impl Default for DealsConfig {
    fn default() -> Self {
        Self {
            acquire_max_retries: default_acquire_max_retries(),
            acquire_backoff_secs: default_acquire_backoff_secs(),
            monitor_every_secs: default_monitor_every_secs(),
            open_deals_limit: default_open_deals_limit(),
        }
    }
}

#[derive(Debug)]
pub enum EnvOverrideError {
    ApiInfo {
        var: &'static str,
        source: api_info::ApiInfoError,
    },
    InvalidNumber {
        var: &'static str,
        value: String,
    },
}

impl std::fmt::Display for EnvOverrideError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiInfo { var, .. } => write!(f, "could not parse {var}"),
            Self::InvalidNumber { var, value } => write!(f, "{var}={value} is not a number"),
        }
    }
}

impl std::error::Error for EnvOverrideError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ApiInfo { source, .. } => Some(source),
            Self::InvalidNumber { .. } => None,
        }
    }
}

impl Config {
    pub fn apply_env_overrides(&mut self) -> Result<(), EnvOverrideError> {
        self.apply_overrides_from(|var| std::env::var(var).ok())
    }

    /// Applies overrides from `lookup`; empty values are ignored.
    pub fn apply_overrides_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), EnvOverrideError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let parse_info = |var: &'static str| {
            get(var)
                .map(|raw| api_info::parse(&raw).map_err(|source| EnvOverrideError::ApiInfo { var, source }))
                .transpose()
        };

        if let Some(info) = parse_info(ENV_FULLNODE_API_INFO)? {
            self.lotus.daemon_url = info.rpc_url("v1");
            self.lotus.daemon_token = info.token;
        }
        if let Some(info) = parse_info(ENV_MINER_API_INFO)? {
            self.lotus.miner_url = info.rpc_url("v0");
            self.lotus.miner_token = info.token;
        }
        if let Some(info) = parse_info(ENV_MARKETS_API_INFO)? {
            self.boost.rpc_url = info.rpc_url("v0");
            self.boost.graphql_url = format!("http://{}:{}", bracket(&info.host), self.boost.graphql_port);
            self.boost.auth_token = info.token;
        }

        if let Some(path) = get(ENV_DOWNLOAD_PATH) {
            self.general.download_path = path;
        }
        if let Some(raw) = get(ENV_MAX_ACTIVE) {
            self.general.max_spade_deals_active =
                raw.trim().parse().map_err(|_| EnvOverrideError::InvalidNumber {
                    var: ENV_MAX_ACTIVE,
                    value: raw.clone(),
                })?;
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_active: self.general.max_spade_deals_active,
            tick_interval: Duration::from_secs(self.spade.pending_refresh_secs.max(1)),
            acquire_max_retries: self.deals.acquire_max_retries,
            acquire_backoff: Duration::from_secs(self.deals.acquire_backoff_secs),
            monitor_interval: Duration::from_secs(self.deals.monitor_every_secs.max(1)),
        }
    }

    /// Secrets shortened, for the startup log line.
    pub fn redacted(&self) -> Self {
        use crate::logging::redact_token;
        let mut cfg = self.clone();
        cfg.lotus.daemon_token = redact_token(&cfg.lotus.daemon_token);
        cfg.lotus.miner_token = redact_token(&cfg.lotus.miner_token);
        cfg.boost.auth_token = redact_token(&cfg.boost.auth_token);
        cfg.aria2.secret = redact_token(&cfg.aria2.secret);
        cfg
    }
}

fn bracket(host: &str) -> String {
    if host.contains(':') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

pub fn init_tracing(config: &Config) {
    // Priority order:
    // 1) RUST_LOG
    // 2) SPADE_CLIENT_LOG
    // 3) general.log_level from config.toml
    //
    // Example:
    // RUST_LOG=info,spade_client::deals=debug

    let env_filter = std::env::var("RUST_LOG")
        .ok()
        .or_else(|| std::env::var(ENV_LOG).ok())
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| config.general.log_level.clone());

    let filter = EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .compact()
        .init();
}
