use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::orchestrator::OrchestratorSettings;
use crate::provider::ProviderSettings;
use crate::runner::RunnerSettings;
use crate::transport::LocalTransport;

pub const ENV_PROVIDER_URL: &str = "ENRICH_PROVIDER_URL";
pub const ENV_API_KEY: &str = "ENRICH_API_KEY";
pub const ENV_ASSET_DIR: &str = "ENRICH_ASSET_DIR";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "ENRICH_REQUEST_TIMEOUT_SECS";
pub const ENV_RESET_GRACE_MS: &str = "ENRICH_RESET_GRACE_MS";
pub const ENV_ITEM_TIMEOUT_SECS: &str = "ENRICH_ITEM_TIMEOUT_SECS";
pub const ENV_ITEM_PAUSE_MS: &str = "ENRICH_ITEM_PAUSE_MS";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: String, value: String },
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub asset_dir: PathBuf,
    pub provider: ProviderSettings,
    pub runner: RunnerSettings,
    pub orchestrator: OrchestratorSettings,
    pub transport_buffer: usize,
}

impl EngineConfig {
    pub fn default_with_output(asset_dir: PathBuf) -> Self {
        Self {
            asset_dir,
            provider: ProviderSettings::default(),
            runner: RunnerSettings::default(),
            orchestrator: OrchestratorSettings::default(),
            transport_buffer: LocalTransport::DEFAULT_BUFFER,
        }
    }

    /// Defaults overridden by `ENRICH_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let asset_dir = lookup(ENV_ASSET_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(default_asset_dir);
        let mut config = Self::default_with_output(asset_dir);

        config.provider.base_url = lookup(ENV_PROVIDER_URL);
        config.provider.api_key = lookup(ENV_API_KEY);
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_REQUEST_TIMEOUT_SECS)? {
            config.provider.request_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_RESET_GRACE_MS)? {
            config.orchestrator.reset_grace = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_ITEM_TIMEOUT_SECS)? {
            config.runner.item_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_ITEM_PAUSE_MS)? {
            config.runner.pause_between_items = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::default_with_output(default_asset_dir())
    }
}

fn default_asset_dir() -> PathBuf {
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("audio")
}

fn parse_var<T, L>(lookup: &L, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    L: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
        })
}
