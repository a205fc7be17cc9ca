use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use clap::Parser;
use serde::Deserialize;
use tracing::Level;
use url::Url;

use derive_bridge::route::ChainConnections;
use derive_bridge::{BridgeSettings, ChainId, UnknownChain};
use derive_evm::Chain;
use derive_evm::rpc::{self, BackoffPolicy, RpcPoolError, RpcSettings};

use crate::telemetry::{TelemetryConfig, TelemetryCtx};

#[derive(Parser, Debug)]
pub struct Env {
    /// Path to plaintext TOML configuration file
    #[clap(long)]
    pub config: PathBuf,
    /// Path to TOML secrets file
    #[clap(long)]
    pub secrets: PathBuf,
}

impl Env {
    pub fn into_ctx(self) -> Result<Ctx, ConfigError> {
        Ctx::load_files(&self.config, &self.secrets)
    }
}

/// Non-secret settings deserialized from the plaintext config TOML.
#[derive(Deserialize)]
struct Config {
    environment: Option<String>,
    log_level: Option<LogLevel>,
    registry: PathBuf,
    wallet: Address,
    #[serde(default)]
    rpc: HashMap<String, Vec<Url>>,
    rpc_backoff: Option<RpcBackoffConfig>,
    #[serde(default)]
    bridge: BridgeConfig,
    telemetry: Option<TelemetryConfig>,
}

/// Secret credentials deserialized from the secrets TOML.
#[derive(Deserialize)]
struct Secrets {
    private_key: B256,
    telemetry_api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RpcBackoffConfig {
    initial_secs: Option<u64>,
    max_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

/// `[bridge]` overrides. Anything left out keeps the library default.
#[derive(Debug, Default, Deserialize)]
struct BridgeConfig {
    source_finality_blocks: Option<u64>,
    target_finality_blocks: Option<u64>,
    finality_timeout_secs: Option<u64>,
    finality_poll_secs: Option<u64>,
    log_scan_range: Option<u64>,
    log_scan_poll_secs: Option<u64>,
    log_scan_timeout_secs: Option<u64>,
    msg_gas_limit: Option<u64>,
    payload_size: Option<u64>,
    speed_tier: Option<String>,
    gas_funding_threshold_wei: Option<u64>,
    gas_funding_amount_wei: Option<u64>,
    gas_funding_timeout_secs: Option<u64>,
}

// ===== Runtime types (assembled from Config + Secrets) =====

/// Runtime context for the CLI, assembled from config and secrets.
#[derive(Debug, Clone)]
pub struct Ctx {
    pub log_level: LogLevel,
    pub registry: PathBuf,
    pub wallet: Address,
    pub(crate) rpc: HashMap<ChainId, Vec<Url>>,
    pub(crate) rpc_settings: RpcSettings,
    pub bridge: BridgeSettings,
    pub(crate) signer: PrivateKeySigner,
    pub(crate) telemetry: Option<TelemetryCtx>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        match log_level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

impl From<&LogLevel> for Level {
    fn from(log_level: &LogLevel) -> Self {
        (*log_level).into()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML")]
    Toml(#[from] toml::de::Error),
    #[error("failed to derive signer from private_key")]
    PrivateKeyDerivation(#[source] alloy::signers::k256::ecdsa::Error),
    #[error("bridging is only supported in prod, not {0}")]
    UnsupportedEnvironment(String),
    #[error("invalid [rpc] entry: {0}")]
    UnknownChain(#[from] UnknownChain),
    #[error("[rpc] entry for {0} has no URLs")]
    EmptyRpcList(ChainId),
    #[error("invalid built-in RPC URL for {chain}")]
    DefaultRpcUrl {
        chain: ChainId,
        #[source]
        source: url::ParseError,
    },
    #[error("telemetry config present in config but telemetry_api_key missing")]
    TelemetrySecretsMissing,
    #[error("telemetry_api_key present but telemetry config missing in config")]
    TelemetryConfigMissing,
}

impl Ctx {
    pub fn load_files(config: &Path, secrets: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(config)?;
        let secrets_str = std::fs::read_to_string(secrets)?;
        Self::from_toml(&config_str, &secrets_str)
    }

    pub fn from_toml(config_toml: &str, secrets_toml: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(config_toml)?;
        let secrets: Secrets = toml::from_str(secrets_toml)?;

        if let Some(environment) = config.environment
            && environment != "prod"
        {
            return Err(ConfigError::UnsupportedEnvironment(environment));
        }

        let log_level = config.log_level.unwrap_or(LogLevel::Info);
        let signer = PrivateKeySigner::from_bytes(&secrets.private_key)
            .map_err(ConfigError::PrivateKeyDerivation)?;
        let rpc = assemble_rpc(config.rpc)?;
        let telemetry = assemble_telemetry(config.telemetry, secrets.telemetry_api_key, log_level)?;

        Ok(Self {
            log_level,
            registry: config.registry,
            wallet: config.wallet,
            rpc,
            rpc_settings: assemble_rpc_settings(config.rpc_backoff.unwrap_or_default()),
            bridge: assemble_bridge(config.bridge),
            signer,
            telemetry,
        })
    }

    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }

    pub fn rpc_urls(&self, chain: ChainId) -> &[Url] {
        self.rpc.get(&chain).map_or(&[], Vec::as_slice)
    }

    pub const fn telemetry(&self) -> Option<&TelemetryCtx> {
        self.telemetry.as_ref()
    }

    /// Opens a rotating endpoint pool for every supported chain.
    pub fn connect_chains(&self) -> Result<ChainConnections, RpcPoolError> {
        ChainId::ALL
            .into_iter()
            .map(|chain| {
                let urls = self.rpc_urls(chain).to_vec();
                let connection = rpc::connect(chain.id(), urls, &self.rpc_settings)?;
                Ok((chain, Arc::new(connection) as Arc<dyn Chain>))
            })
            .collect()
    }
}

/// Configured endpoints per chain, falling back to the public endpoint for
/// chains without an entry.
fn assemble_rpc(
    configured: HashMap<String, Vec<Url>>,
) -> Result<HashMap<ChainId, Vec<Url>>, ConfigError> {
    let mut rpc = HashMap::new();

    for (key, urls) in configured {
        let chain: ChainId = key.parse()?;
        if urls.is_empty() {
            return Err(ConfigError::EmptyRpcList(chain));
        }
        rpc.insert(chain, urls);
    }

    for chain in ChainId::ALL {
        if rpc.contains_key(&chain) {
            continue;
        }
        let url = Url::parse(chain.default_rpc_url())
            .map_err(|source| ConfigError::DefaultRpcUrl { chain, source })?;
        rpc.insert(chain, vec![url]);
    }

    Ok(rpc)
}

fn assemble_rpc_settings(config: RpcBackoffConfig) -> RpcSettings {
    let defaults = RpcSettings::default();

    RpcSettings {
        backoff: BackoffPolicy {
            initial: config
                .initial_secs
                .map_or(defaults.backoff.initial, Duration::from_secs),
            max: config
                .max_secs
                .map_or(defaults.backoff.max, Duration::from_secs),
        },
        request_timeout: config
            .request_timeout_secs
            .map_or(defaults.request_timeout, Duration::from_secs),
    }
}

fn assemble_bridge(config: BridgeConfig) -> BridgeSettings {
    let mut settings = BridgeSettings::default();

    if let Some(blocks) = config.source_finality_blocks {
        settings.source_finality.finality_blocks = blocks;
    }
    if let Some(blocks) = config.target_finality_blocks {
        settings.target_finality.finality_blocks = blocks;
    }
    if let Some(secs) = config.finality_timeout_secs {
        settings.source_finality.timeout = Duration::from_secs(secs);
        settings.target_finality.timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = config.finality_poll_secs {
        settings.source_finality.poll_interval = Duration::from_secs(secs);
        settings.target_finality.poll_interval = Duration::from_secs(secs);
    }
    if let Some(range) = config.log_scan_range {
        settings.event_scan.max_block_range = range;
    }
    if let Some(secs) = config.log_scan_poll_secs {
        settings.event_scan.poll_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = config.log_scan_timeout_secs {
        settings.event_scan.timeout = Duration::from_secs(secs);
    }
    if let Some(limit) = config.msg_gas_limit {
        settings.msg_gas_limit = limit;
    }
    if let Some(size) = config.payload_size {
        settings.payload_size = size;
    }
    if let Some(tier) = config.speed_tier {
        settings.speed_tier = tier;
    }
    if let Some(wei) = config.gas_funding_threshold_wei {
        settings.gas_funding.threshold = U256::from(wei);
    }
    if let Some(wei) = config.gas_funding_amount_wei {
        settings.gas_funding.amount = U256::from(wei);
    }
    if let Some(secs) = config.gas_funding_timeout_secs {
        settings.gas_funding.timeout = Duration::from_secs(secs);
    }

    settings
}

fn assemble_telemetry(
    config: Option<TelemetryConfig>,
    api_key: Option<String>,
    log_level: LogLevel,
) -> Result<Option<TelemetryCtx>, ConfigError> {
    match (config, api_key) {
        (Some(config), Some(api_key)) => {
            Ok(Some(TelemetryCtx::new(config, api_key, log_level.into())))
        }
        (Some(_), None) => Err(ConfigError::TelemetrySecretsMissing),
        (None, Some(_)) => Err(ConfigError::TelemetryConfigMissing),
        (None, None) => Ok(None),
    }
}

pub(crate) fn default_filter(level: Level) -> String {
    format!("derive_client={level},derive_bridge={level},derive_evm={level}")
}

pub fn setup_tracing(log_level: &LogLevel) {
    let level: Level = log_level.into();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(level).into()),
        )
        .init();
}
