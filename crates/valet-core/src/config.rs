use std::path::PathBuf;

use anyhow::{bail, Result};
use serde::Deserialize;

use crate::update::UpdateKind;

/// Root configuration structure deserialized from TOML.
///
/// Everything is optional: a host without a configuration file runs with
/// defaults, in which case the update command reports that no URL is
/// configured instead of failing.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub update: UpdateConfig,
    pub plugins: PluginsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Archive URL for replacing the host's own install directory.
    pub self_url: Option<String>,
    /// Archive URL for replacing the `systems/` plugin directory.
    pub systems_url: Option<String>,
    /// Seconds between liveness polls in the deferred replacer. Bounds the
    /// window in which the OS could recycle the watched process id.
    pub poll_interval_secs: u64,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            self_url: None,
            systems_url: None,
            poll_interval_secs: 5,
        }
    }
}

impl UpdateConfig {
    /// URL configured for `kind`, with empty strings treated as unset.
    pub fn url_for(&self, kind: UpdateKind) -> Option<&str> {
        let url = match kind {
            UpdateKind::Host => self.self_url.as_deref(),
            UpdateKind::Systems => self.systems_url.as_deref(),
        };
        url.filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PluginsConfig {
    /// Overrides the plugin root; defaults to `systems/` beside the host
    /// executable.
    pub dir: Option<PathBuf>,
}

impl Config {
    /// Validates structural invariants and provides actionable error messages.
    pub fn validate(&self) -> Result<()> {
        if self.update.poll_interval_secs == 0 {
            bail!("update.poll_interval_secs must be greater than zero");
        }
        for (field, url) in [
            ("update.self_url", &self.update.self_url),
            ("update.systems_url", &self.update.systems_url),
        ] {
            let Some(url) = url else { continue };
            if url.is_empty() {
                continue;
            }
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("{field} must be an http(s) URL, got `{url}`");
            }
        }
        Ok(())
    }
}
