use anyhow::{Context, Result};
use keykit::backend::keybase::{DEFAULT_KEYSERVER, DEFAULT_TIMEOUT_SECS, KeybaseFetcher};
use keykit::reconcile::DEFAULT_UNCHANGED_PATTERN;
use keykit::{CommandTemplates, DEFAULT_TOOL_PATH, ReconcileOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("keyward"))
}

/// Get the default config file path
pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Expand `~` in a user-supplied path
pub fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Key tool binary, a path or a name looked up in PATH
    pub tool_path: String,
    /// Base URL of the remote identity service
    pub keyserver: String,
    /// Remote fetch timeout
    pub fetch_timeout_secs: u64,
    /// Refresh stderr pattern meaning "nothing changed"
    pub unchanged_pattern: String,
    /// Check the keyring in remote-identity mode
    pub verify_remote_presence: bool,
    /// Command template overrides, by name
    pub templates: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tool_path: DEFAULT_TOOL_PATH.to_string(),
            keyserver: DEFAULT_KEYSERVER.to_string(),
            fetch_timeout_secs: DEFAULT_TIMEOUT_SECS,
            unchanged_pattern: DEFAULT_UNCHANGED_PATTERN.to_string(),
            verify_remote_presence: false,
            templates: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load the config file.
    ///
    /// An explicit path must exist; the default location is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_from(&expand_path(path)),
            None => {
                let path = default_config_path()?;
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    log::debug!("no config at {}, using defaults", path.display());
                    Ok(Self::default())
                }
            }
        }
    }

    /// Load a specific config file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config format in {}", path.display()))?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Key tool path, with `~` expanded
    pub fn tool_path(&self) -> PathBuf {
        expand_path(Path::new(&self.tool_path))
    }

    /// Options for the reconciler
    pub fn reconcile_options(&self) -> Result<ReconcileOptions> {
        let options = ReconcileOptions {
            templates: CommandTemplates::default().with_overrides(self.templates.clone()),
            verify_remote_presence: self.verify_remote_presence,
            ..ReconcileOptions::default()
        };
        options
            .with_unchanged_pattern(&self.unchanged_pattern)
            .context("Invalid unchanged_pattern in config")
    }

    /// Fetcher for the configured identity service
    pub fn fetcher(&self) -> KeybaseFetcher {
        KeybaseFetcher::with_base_url(
            &self.keyserver,
            Duration::from_secs(self.fetch_timeout_secs),
        )
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}
