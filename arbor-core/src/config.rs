//! Configuration for arbor

use crate::ArborError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment variable overrides (e.g. `ARBOR_CACHE_MAX_SIZE_MB`)
pub const ENV_PREFIX: &str = "ARBOR_";

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "ARBOR_CONFIG_PATH";

/// Default configuration as TOML
pub const DEFAULT_CONFIG: &str = r#"# Arbor Configuration

# Log level used when neither --debug nor ARBOR_LOG is set
log_level = "INFO"
# Default maximum results returned by search operations
max_results_default = 100

[cache]
# Keep parsed trees in memory between requests
enabled = true
# Memory budget for cached trees (approximate footprint)
max_size_mb = 100
# Entries older than this are reparsed (0 disables expiry)
ttl_seconds = 300

[security]
# Files above this size are rejected
max_file_size_mb = 5
# Directories never read or listed
excluded_dirs = [".git", "node_modules", "__pycache__"]
# Restrict readable files to these extensions (omit to allow all)
# allowed_extensions = ["py", "rs", "js", "ts", "go"]

[language]
# Default depth for AST traversal
default_max_depth = 5
# Languages loaded at startup (others load on first use)
preferred_languages = []
# Children emitted per AST node (0 = unlimited)
max_children = 0
"#;

/// Arbor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub language: LanguageConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_max_results")]
    pub max_results_default: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_size_mb")]
    pub max_size_mb: u64,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_excluded_dirs")]
    pub excluded_dirs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_extensions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    #[serde(default = "default_max_depth")]
    pub default_max_depth: usize,
    #[serde(default)]
    pub preferred_languages: Vec<String>,
    #[serde(default)]
    pub max_children: usize,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_max_results() -> usize {
    100
}
fn default_cache_size_mb() -> u64 {
    100
}
fn default_ttl_seconds() -> u64 {
    300
}
fn default_max_file_size_mb() -> u64 {
    5
}
fn default_excluded_dirs() -> Vec<String> {
    vec![
        ".git".to_string(),
        "node_modules".to_string(),
        "__pycache__".to_string(),
    ]
}
fn default_max_depth() -> usize {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            security: SecurityConfig::default(),
            language: LanguageConfig::default(),
            log_level: default_log_level(),
            max_results_default: default_max_results(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_mb: default_cache_size_mb(),
            ttl_seconds: default_ttl_seconds(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
            excluded_dirs: default_excluded_dirs(),
            allowed_extensions: None,
        }
    }
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            default_max_depth: default_max_depth(),
            preferred_languages: Vec::new(),
            max_children: 0,
        }
    }
}

const MB: u64 = 1024 * 1024;

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| ArborError::ConfigParse(e.to_string()))
    }

    /// Locate the config file: explicit path, then `ARBOR_CONFIG_PATH`,
    /// then `$HOME/.config/arbor/config.toml` when it exists.
    pub fn discover(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        let home = std::env::var_os("HOME")?;
        let path = PathBuf::from(home).join(".config/arbor/config.toml");
        path.is_file().then_some(path)
    }

    /// Cache budget in bytes
    pub fn cache_max_bytes(&self) -> usize {
        (self.cache.max_size_mb.saturating_mul(MB)) as usize
    }

    /// Cache entry lifetime; `None` when expiry is disabled
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache.ttl_seconds > 0).then(|| Duration::from_secs(self.cache.ttl_seconds))
    }

    /// Largest readable file in bytes
    pub fn max_file_bytes(&self) -> u64 {
        self.security.max_file_size_mb.saturating_mul(MB)
    }

    /// Update a setting by dotted path (e.g. `cache.max_size_mb`)
    pub fn set_value(&mut self, path: &str, value: &str) -> crate::Result<()> {
        let unknown = || ArborError::UnknownSetting(path.to_string());
        let bad = |e: String| ArborError::ConfigParse(format!("{}: {}", path, e));

        match path {
            "cache.enabled" => self.cache.enabled = parse_bool(value),
            "cache.max_size_mb" => {
                self.cache.max_size_mb = value.trim().parse().map_err(|e| bad(format!("{e}")))?
            }
            "cache.ttl_seconds" => {
                self.cache.ttl_seconds = value.trim().parse().map_err(|e| bad(format!("{e}")))?
            }
            "security.max_file_size_mb" => {
                self.security.max_file_size_mb =
                    value.trim().parse().map_err(|e| bad(format!("{e}")))?
            }
            "security.excluded_dirs" => self.security.excluded_dirs = parse_list(value),
            "security.allowed_extensions" => {
                let list = parse_list(value);
                self.security.allowed_extensions = (!list.is_empty()).then_some(list);
            }
            "language.default_max_depth" => {
                self.language.default_max_depth =
                    value.trim().parse().map_err(|e| bad(format!("{e}")))?
            }
            "language.preferred_languages" => self.language.preferred_languages = parse_list(value),
            "language.max_children" => {
                self.language.max_children =
                    value.trim().parse().map_err(|e| bad(format!("{e}")))?
            }
            "log_level" => self.log_level = value.trim().to_uppercase(),
            "max_results_default" => {
                self.max_results_default = value.trim().parse().map_err(|e| bad(format!("{e}")))?
            }
            _ => return Err(unknown()),
        }
        Ok(())
    }

    /// Apply `ARBOR_*` overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_vars(std::env::vars());
    }

    /// Apply overrides from `(name, value)` pairs; invalid entries are logged and skipped.
    pub fn apply_env_vars<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            // Not settings: log filter and config file location
            if key == "LOG" || key == "CONFIG_PATH" {
                continue;
            }
            let key = key.to_lowercase();
            let path = match key.split_once('_') {
                Some((section, setting))
                    if matches!(section, "cache" | "security" | "language") =>
                {
                    format!("{}.{}", section, setting)
                }
                _ => key,
            };
            match self.set_value(&path, &value) {
                Ok(()) => {
                    tracing::debug!(env = %name, setting = %path, "applied environment override")
                }
                Err(err) => {
                    tracing::warn!(env = %name, error = %err, "ignoring environment override")
                }
            }
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "yes" | "1" | "y" | "t" | "on"
    )
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config = Config::from_toml(DEFAULT_CONFIG).unwrap();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.max_size_mb, 100);
        assert_eq!(config.cache.ttl_seconds, 300);
        assert_eq!(config.security.max_file_size_mb, 5);
        assert_eq!(config.language.default_max_depth, 5);
        assert!(config.security.allowed_extensions.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml("[cache]\nmax_size_mb = 7\n").unwrap();
        assert_eq!(config.cache.max_size_mb, 7);
        assert_eq!(config.cache.ttl_seconds, 300);
        assert_eq!(config.security.excluded_dirs.len(), 3);
    }

    #[test]
    fn test_set_value() {
        let mut config = Config::default();
        config.set_value("cache.enabled", "false").unwrap();
        config.set_value("security.allowed_extensions", "py, rs").unwrap();
        config.set_value("log_level", "debug").unwrap();
        assert!(!config.cache.enabled);
        assert_eq!(
            config.security.allowed_extensions,
            Some(vec!["py".to_string(), "rs".to_string()])
        );
        assert_eq!(config.log_level, "DEBUG");

        assert!(matches!(
            config.set_value("cache.nope", "1"),
            Err(ArborError::UnknownSetting(_))
        ));
        assert!(matches!(
            config.set_value("cache.max_size_mb", "lots"),
            Err(ArborError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_vars(vec![
            ("ARBOR_CACHE_MAX_SIZE_MB".to_string(), "42".to_string()),
            ("ARBOR_LANGUAGE_DEFAULT_MAX_DEPTH".to_string(), "9".to_string()),
            ("ARBOR_LOG_LEVEL".to_string(), "warn".to_string()),
            ("ARBOR_SECURITY_MAX_FILE_SIZE_MB".to_string(), "nan".to_string()),
            ("OTHER_CACHE_MAX_SIZE_MB".to_string(), "1".to_string()),
        ]);
        assert_eq!(config.cache.max_size_mb, 42);
        assert_eq!(config.language.default_max_depth, 9);
        assert_eq!(config.log_level, "WARN");
        // invalid value leaves default in place
        assert_eq!(config.security.max_file_size_mb, 5);
    }

    #[test]
    fn test_conversions() {
        let mut config = Config::default();
        assert_eq!(config.cache_max_bytes(), 100 * 1024 * 1024);
        assert_eq!(config.cache_ttl(), Some(Duration::from_secs(300)));
        config.cache.ttl_seconds = 0;
        assert_eq!(config.cache_ttl(), None);
    }
}
