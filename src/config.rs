//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MAILSCAN_CONFIG` (environment variable)
//! 2. `~/.config/mailscan/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailscan\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::classify::Policy;
use crate::parser::eml::DEFAULT_MAX_MESSAGE_SIZE;
use crate::parser::multipart::DEFAULT_MAX_DEPTH;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Scan behavior.
    pub scan: ScanConfig,
    /// Report format.
    pub output: OutputConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Scan behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Detection policy: "test-signature" or "suspicious-extension".
    pub policy: Policy,
    /// Maximum multipart nesting depth to descend into.
    pub max_depth: usize,
    /// Messages larger than this many bytes are skipped.
    pub max_message_size: u64,
}

/// Report format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Print one JSON object per message instead of flagged labels.
    pub json: bool,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "info".to_string(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE, // 256 MB
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILSCAN_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mailscan").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailscan")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("mailscan.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.general.log_level, "info");
        assert_eq!(cfg.scan.policy, Policy::TestSignature);
        assert_eq!(cfg.scan.max_depth, 16);
        assert_eq!(cfg.scan.max_message_size, 256 * 1024 * 1024);
        assert!(!cfg.output.json);
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.scan.policy, cfg.scan.policy);
        assert_eq!(parsed.scan.max_depth, cfg.scan.max_depth);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[scan]
policy = "suspicious-extension"

[output]
json = true
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.scan.policy, Policy::SuspiciousExtension);
        assert!(cfg.output.json);
        // Other fields use defaults
        assert_eq!(cfg.scan.max_depth, 16);
        assert_eq!(cfg.general.log_level, "info");
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let bad = "[scan]\npolicy = \"nope\"\n";
        assert!(toml::from_str::<Config>(bad).is_err());
    }

    #[test]
    fn test_log_file_under_cache_dir() {
        let mut cfg = Config::default();
        cfg.general.cache_dir = Some(PathBuf::from("/tmp/mailscan-test"));
        assert_eq!(
            log_file_path(&cfg),
            PathBuf::from("/tmp/mailscan-test/mailscan.log")
        );
    }
}
