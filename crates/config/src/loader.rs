//! Reading the agent configuration
//!
//! A config is assembled from up to two layers: a file, and `GRIDBROKER_*`
//! environment variables layered on top of it. Sections and keys in a
//! variable name are joined with a double underscore so that snake_case
//! keys survive the round trip: `GRIDBROKER_EDGE__GETH_URL` sets
//! `edge.geth_url`, `GRIDBROKER_LOG_LEVEL` sets the top-level `log_level`.

use crate::{AgentConfig, ConfigError, Result};
use config::{Config, Environment, File, FileFormat};
use std::path::Path;

/// Prefix shared by every gridbroker environment variable.
pub const ENV_PREFIX: &str = "GRIDBROKER";

/// Separator between config sections in a variable name.
const ENV_SEPARATOR: &str = "__";

/// Config file formats the agent accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Infer the format from a file name.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("json") => Ok(ConfigFormat::Json),
            _ => Err(ConfigError::LoadError(format!(
                "cannot tell the config format of {}; expected .toml, .yaml, .yml, or .json",
                path.display()
            ))),
        }
    }
}

impl From<ConfigFormat> for FileFormat {
    fn from(format: ConfigFormat) -> Self {
        match format {
            ConfigFormat::Toml => FileFormat::Toml,
            ConfigFormat::Yaml => FileFormat::Yaml,
            ConfigFormat::Json => FileFormat::Json,
        }
    }
}

/// Deserialize a config document held in memory.
pub fn parse(content: &str, format: ConfigFormat) -> Result<AgentConfig> {
    let config = match format {
        ConfigFormat::Toml => toml::from_str(content)?,
        ConfigFormat::Yaml => serde_yaml::from_str(content)?,
        ConfigFormat::Json => serde_json::from_str(content)?,
    };
    Ok(config)
}

/// Read a config file alone, ignoring the environment.
pub fn load_file(path: &Path) -> Result<AgentConfig> {
    let format = ConfigFormat::from_path(path)?;
    parse(&std::fs::read_to_string(path)?, format)
}

/// Assemble a config from `GRIDBROKER_*` environment variables alone.
/// Fails when the variables do not add up to a complete `edge` section.
pub fn load_env() -> Result<AgentConfig> {
    Config::builder()
        .add_source(env_source())
        .build()?
        .try_deserialize()
        .map_err(ConfigError::from)
}

/// Read a config file and layer `GRIDBROKER_*` environment variables over
/// it, key by key. This is what the agent binary calls when given
/// `--config`.
pub fn load(path: &Path) -> Result<AgentConfig> {
    let format = ConfigFormat::from_path(path)?;
    Config::builder()
        .add_source(File::from(path).format(format.into()))
        .add_source(env_source())
        .build()?
        .try_deserialize()
        .map_err(ConfigError::from)
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR)
}
