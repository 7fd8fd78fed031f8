//! Layered configuration: built-in defaults, then the TOML config file, then
//! `FNEXEC__SECTION__KEY` environment variables.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use fnexec_protocol::Codec;
use serde::{Deserialize, Serialize};

use crate::server::Network;

pub const APP_NAME: &str = "fnexec";

/// Default listen address.
pub const DEFAULT_ADDRESS: &str = "0.0.0.0:1234";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub network: Network,
    pub address: String,
    /// Directory holding `ca.crt`, `tls.crt` and `tls.key`. Unset serves plaintext.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_server_certs_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: Network::Tcp,
            address: DEFAULT_ADDRESS.to_string(),
            tls_server_certs_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub pipe_format: Codec,
    /// Unset or zero runs every request immediately.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_runs: Option<usize>,
}

impl AppConfig {
    /// Load configuration from `path` (which need not exist) and the process
    /// environment.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_from(path, Environment::with_prefix(&env_prefix()).separator("__"))
    }

    fn load_from(path: &Path, environment: Environment) -> Result<Self> {
        let defaults = Self::default();
        let built = Config::builder()
            .set_default("logging.level", defaults.logging.level)?
            .set_default("server.network", defaults.server.network.to_string())?
            .set_default("server.address", defaults.server.address)?
            .set_default("runner.pipe_format", defaults.runner.pipe_format.as_str())?
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(environment.try_parsing(true))
            .build()
            .with_context(|| format!("loading configuration from {}", path.display()))?;

        let mut config: Self = built
            .try_deserialize()
            .context("parsing configuration")?;

        if let Some(dir) = &config.server.tls_server_certs_dir {
            config.server.tls_server_certs_dir = Some(expand_str_path(dir)?.display().to_string());
        }
        Ok(config)
    }

    /// Render as TOML, as it would appear in the config file.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing config to TOML")
    }
}

/// Config file to read: `override_path` if given (a directory means its
/// `config.toml`), else `config.toml` in the default config directory.
pub fn resolve_config_path(override_path: Option<&Path>) -> Result<PathBuf> {
    match override_path {
        Some(path) => {
            let expanded = expand_path(path)?;
            if expanded.is_dir() {
                Ok(expanded.join("config.toml"))
            } else {
                Ok(expanded)
            }
        }
        None => Ok(default_config_dir()?.join("config.toml")),
    }
}

pub fn expand_path(path: &Path) -> Result<PathBuf> {
    match path.to_str() {
        Some(text) => expand_str_path(text),
        None => Ok(path.to_path_buf()),
    }
}

pub fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn env_prefix() -> String {
    APP_NAME.to_ascii_uppercase()
}
