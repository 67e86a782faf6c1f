//! Engine configuration loader for Threadwise.
//!
//! Reads a TOML file into [`EngineConfig`] and validates it. A missing file
//! yields the documented defaults; anything else that goes wrong (unreadable
//! file, malformed TOML, failed validation) is a [`ConfigError`], which is
//! fatal at startup.

use std::path::Path;

use threadwise_types::config::EngineConfig;
use threadwise_types::error::ConfigError;

/// Conventional configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "threadwise.toml";

/// Load and validate configuration from `path`.
pub async fn load_engine_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            let config = EngineConfig::default();
            config.validate()?;
            return Ok(config);
        }
        Err(err) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                reason: err.to_string(),
            });
        }
    };

    parse_engine_config(&content, path)
}

/// Parse and validate configuration text. `origin` is only used in errors.
pub fn parse_engine_config(content: &str, origin: &Path) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = toml::from_str(content).map_err(|err| ConfigError::Parse {
        path: origin.display().to_string(),
        reason: err.to_string(),
    })?;
    config.validate()?;

    tracing::debug!(
        path = %origin.display(),
        channels = config.channels.len(),
        "loaded engine config"
    );
    Ok(config)
}
