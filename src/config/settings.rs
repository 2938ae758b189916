//! Configuration Loading
//!
//! Settings come from defaults, then optional JSON config files, then the
//! environment; later sources override earlier ones. Credentials arrive as
//! enumerated `LLMRELAY_KEY_<n>` variables, a comma-separated flat list,
//! or a pointer to an external key source.

use crate::client::OauthCredential;
use crate::error::{Error, Result};
use crate::router::key_store::DEFAULT_COOLDOWN_SECS;
use crate::router::pool::DEFAULT_ERROR_THRESHOLD;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const CONFIG_PATH_VAR: &str = "LLMRELAY_CONFIG_PATH";
const KEY_VAR_PREFIX: &str = "LLMRELAY_KEY_";
const KEYS_VAR: &str = "LLMRELAY_KEYS";
const KEY_SOURCE_VAR: &str = "LLMRELAY_KEY_SOURCE";
const TIER_FALLBACK_VAR: &str = "LLMRELAY_TIER_FALLBACK";
const POOL_ERROR_THRESHOLD_VAR: &str = "LLMRELAY_POOL_ERROR_THRESHOLD";
const STATE_PATH_VAR: &str = "LLMRELAY_STATE_PATH";
const LISTEN_ADDR_VAR: &str = "LLMRELAY_LISTEN_ADDR";
const BACKEND_URL_VAR: &str = "LLMRELAY_BACKEND_URL";
const COOLDOWN_VAR: &str = "LLMRELAY_COOLDOWN_SECS";

/// Resolved gateway configuration
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen_addr: String,

    pub backend_base_url: String,

    /// Credentials supplied directly via configuration
    pub keys: Vec<String>,

    /// External key source (file path or URL)
    pub key_source: Option<String>,

    /// Automatic fallback to cheaper model tiers
    pub tier_fallback: bool,

    /// Consecutive errors before a pool credential is invalidated
    pub pool_error_threshold: u32,

    /// State directory for the file-backed store; in-memory when unset
    pub state_path: Option<PathBuf>,

    /// Default cooldown applied when a key is marked exhausted
    pub cooldown_secs: u64,

    /// Ordered model tier list, preferred first
    pub tiers: Vec<String>,

    /// Structured OAuth credentials for the round-robin pool (file config
    /// only; these never come from the environment)
    pub oauth_credentials: Vec<OauthCredential>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8000".to_string(),
            backend_base_url: "https://generativelanguage.googleapis.com".to_string(),
            keys: Vec::new(),
            key_source: None,
            tier_fallback: true,
            pool_error_threshold: DEFAULT_ERROR_THRESHOLD,
            state_path: None,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            tiers: vec![
                "gemini-2.5-pro".to_string(),
                "gemini-2.5-flash".to_string(),
            ],
            oauth_credentials: Vec::new(),
        }
    }
}

/// Partial configuration as read from a JSON file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub listen_addr: Option<String>,
    pub backend_base_url: Option<String>,
    #[serde(default)]
    pub keys: Vec<String>,
    pub key_source: Option<String>,
    pub tier_fallback: Option<bool>,
    pub pool_error_threshold: Option<u32>,
    pub state_path: Option<PathBuf>,
    pub cooldown_secs: Option<u64>,
    pub tiers: Option<Vec<String>>,
    #[serde(default)]
    pub oauth_credentials: Vec<OauthCredential>,
}

impl FileConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))
    }
}

impl Settings {
    /// Load from default file locations and the process environment.
    pub fn load() -> Result<Self> {
        let mut settings = Self::default();

        for path in Self::config_paths() {
            if path.exists() {
                settings.merge_file(FileConfig::from_path(&path)?);
            }
        }

        settings.apply_env(std::env::vars())?;
        Ok(settings)
    }

    /// Config paths to probe, most specific first overridden by later ones.
    fn config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(custom) = std::env::var(CONFIG_PATH_VAR) {
            paths.push(PathBuf::from(custom));
        }

        paths.push(PathBuf::from("llmrelay.json"));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("llmrelay").join("config.json"));
        }
        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".llmrelay").join("config.json"));
        }

        paths
    }

    /// Overlay a file config; set fields win over current values.
    pub fn merge_file(&mut self, file: FileConfig) {
        if let Some(addr) = file.listen_addr {
            self.listen_addr = addr;
        }
        if let Some(url) = file.backend_base_url {
            self.backend_base_url = url;
        }
        self.keys.extend(file.keys);
        if file.key_source.is_some() {
            self.key_source = file.key_source;
        }
        if let Some(fallback) = file.tier_fallback {
            self.tier_fallback = fallback;
        }
        if let Some(threshold) = file.pool_error_threshold {
            self.pool_error_threshold = threshold;
        }
        if file.state_path.is_some() {
            self.state_path = file.state_path;
        }
        if let Some(cooldown) = file.cooldown_secs {
            self.cooldown_secs = cooldown;
        }
        if let Some(tiers) = file.tiers {
            self.tiers = tiers;
        }
        self.oauth_credentials.extend(file.oauth_credentials);
    }

    /// Overlay environment variables. Pure over the given iterator so
    /// tests never touch the process environment.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut numbered: Vec<(String, String)> = Vec::new();

        for (name, value) in vars {
            match name.as_str() {
                KEYS_VAR => {
                    self.keys.extend(
                        value
                            .split(',')
                            .map(|k| k.trim().to_string())
                            .filter(|k| !k.is_empty()),
                    );
                }
                KEY_SOURCE_VAR => self.key_source = Some(value),
                TIER_FALLBACK_VAR => self.tier_fallback = parse_flag(&name, &value)?,
                POOL_ERROR_THRESHOLD_VAR => {
                    self.pool_error_threshold = parse_number(&name, &value)?;
                }
                STATE_PATH_VAR => self.state_path = Some(PathBuf::from(value)),
                LISTEN_ADDR_VAR => self.listen_addr = value,
                BACKEND_URL_VAR => self.backend_base_url = value,
                COOLDOWN_VAR => self.cooldown_secs = parse_number(&name, &value)?,
                _ if name.starts_with(KEY_VAR_PREFIX) => {
                    if !value.trim().is_empty() {
                        numbered.push((name, value.trim().to_string()));
                    }
                }
                _ => {}
            }
        }

        // Numeric suffixes sort numerically, everything else by name.
        numbered.sort_by_key(|(name, _)| {
            match name[KEY_VAR_PREFIX.len()..].parse::<u32>() {
                Ok(n) => (0, n, name.clone()),
                Err(_) => (1, 0, name.clone()),
            }
        });
        self.keys.extend(numbered.into_iter().map(|(_, v)| v));

        Ok(())
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(Error::Config(format!(
            "{} must be \"true\" or \"false\", got '{}'",
            name, other
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a number, got '{}'", name, value)))
}
