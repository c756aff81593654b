//! Configuration loading.

use anyhow::{Context, Result, anyhow};
use ferry_core::AppConfig;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::path::Path;

/// Load configuration from an optional TOML file overlaid with `FERRY_`
/// environment variables (`__` separates nested keys).
pub fn load(path: &Path) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if path.exists() {
        tracing::debug!(config_path = %path.display(), "loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!(config_path = %path.display(), "no config file, using defaults and environment");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("FERRY_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow!(e))
        .context("invalid configuration")?;
    Ok(config)
}
