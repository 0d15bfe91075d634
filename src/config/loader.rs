use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::types::BridgeConfig;
use crate::error::{BridgeError, Result};

/// Overrides the proxy backend URL.
pub const BACKEND_URL_ENV: &str = "CLOUDFLARE_WORKER_URL";
/// Overrides the remote runtime base URL.
pub const RUNTIME_URL_ENV: &str = "SANDBOX_RUNTIME_URL";
/// Overrides the remote runtime bearer token.
pub const RUNTIME_TOKEN_ENV: &str = "SANDBOX_RUNTIME_TOKEN";

/// Get the default configuration file path
pub fn get_config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "sandbox-bridge", "sandbox-bridge")
    {
        proj_dirs.config_dir().join("config.toml")
    } else {
        // Fallback to home directory
        dirs_fallback().join(".sandbox-bridge").join("config.toml")
    }
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load configuration from file, with defaults for missing values and
/// environment overrides applied on top.
pub fn load_config(config_path: Option<&Path>) -> Result<BridgeConfig> {
    let mut config = read_config_file(config_path)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn read_config_file(config_path: Option<&Path>) -> Result<BridgeConfig> {
    let explicit = config_path.is_some();
    let path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(get_config_path);

    if !path.exists() {
        if explicit {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }
        // Return defaults if no config file exists
        return Ok(BridgeConfig::default());
    }

    debug!(path = %path.display(), "Loading configuration");
    let content = std::fs::read_to_string(&path)?;
    let config: BridgeConfig =
        toml::from_str(&content).map_err(|e| BridgeError::TomlParse(e.to_string()))?;

    Ok(config)
}

/// Apply environment variable overrides. `lookup` is injected so tests do not
/// have to mutate the process environment.
pub fn apply_env_overrides<F>(config: &mut BridgeConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(url) = non_empty(BACKEND_URL_ENV) {
        config.proxy.backend_url = url;
    }
    if let Some(url) = non_empty(RUNTIME_URL_ENV) {
        config.runtime.remote.base_url = url;
    }
    if let Some(token) = non_empty(RUNTIME_TOKEN_ENV) {
        config.runtime.remote.api_token = Some(token);
    }
}
