//! Configuration management for whereabouts.
//!
//! `Config` is what a user writes (TOML, YAML or JSON, chosen by extension);
//! `Settings` are the resolved runtime paths. Environment variables override
//! both.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coordinator::CoordinatorConfig;

/// Default database filename.
const DEFAULT_DATABASE_FILENAME: &str = "whereabouts.db";

/// Application directory name under the platform config/data dirs.
const APP_DIR: &str = "whereabouts";

pub const ENV_CONFIG: &str = "WHEREABOUTS_CONFIG";
pub const ENV_DATA_DIR: &str = "WHEREABOUTS_DATA_DIR";
pub const ENV_REQUEST_DELAY_MS: &str = "WHEREABOUTS_REQUEST_DELAY_MS";
pub const ENV_API_BASE: &str = "WHEREABOUTS_API_BASE";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {format} config {path}: {message}")]
    Parse {
        path: PathBuf,
        format: &'static str,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename.
    pub database_filename: String,
}

impl Default for Settings {
    fn default() -> Self {
        // Platform data dir -> home dir -> current dir
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
        }
    }
}

impl Settings {
    /// Full path to the SQLite database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Create the data directory if needed.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}

/// Queue pacing, breaker and watchdog timings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Base delay between upstream calls in milliseconds.
    pub request_delay_ms: Option<u64>,
    /// Jitter applied to the delay in either direction, in milliseconds.
    pub jitter_ms: Option<u64>,
    /// Lockout when a rate limit carries no usable reset time.
    pub rate_limit_fallback_ms: Option<u64>,
    /// Margin added to the upstream reset time.
    pub reset_margin_ms: Option<u64>,
    /// Hard timeout for one upstream call.
    pub fetch_timeout_ms: Option<u64>,
    pub watchdog_interval_ms: Option<u64>,
    pub stall_threshold_ms: Option<u64>,
}

/// Cache freshness limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries younger than this are served without refresh.
    pub fresh_days: Option<u64>,
    /// Entries this old or older are refetched before being served.
    pub hard_days: Option<u64>,
    /// Number of values listed in stats.
    pub top_values: Option<usize>,
}

/// Conditions gating background refreshes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionsConfig {
    pub idle_threshold_secs: Option<u64>,
    pub safety_window_secs: Option<u64>,
}

/// Upstream endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub api_base: Option<String>,
    pub user_agent: Option<String>,
}

/// User-facing configuration file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub conditions: ConditionsConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// File this config was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a specific file path.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let mut config = Self::parse(&contents, path)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse config text, choosing the format from the path's extension.
    pub fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
        let parse_error = |format: &'static str, message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            format,
            message,
        };

        match ext {
            "json" => serde_json::from_str(contents).map_err(|e| parse_error("JSON", e.to_string())),
            "yaml" | "yml" => {
                serde_yaml::from_str(contents).map_err(|e| parse_error("YAML", e.to_string()))
            }
            _ => toml::from_str(contents).map_err(|e| parse_error("TOML", e.to_string())),
        }
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved against `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply overrides from a variable source (the process environment in practice).
    pub fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        if let Some(dir) = var(ENV_DATA_DIR) {
            tracing::debug!("Using {} from environment: {}", ENV_DATA_DIR, dir);
            self.data_dir = Some(dir);
        }
        if let Some(delay) = var(ENV_REQUEST_DELAY_MS) {
            match delay.trim().parse() {
                Ok(ms) => self.timing.request_delay_ms = Some(ms),
                Err(_) => tracing::warn!("Ignoring non-numeric {}={}", ENV_REQUEST_DELAY_MS, delay),
            }
        }
        if let Some(base) = var(ENV_API_BASE) {
            self.upstream.api_base = Some(base);
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
    }

    /// Build coordinator tunables, filling gaps with defaults.
    pub fn coordinator_config(&self) -> Result<CoordinatorConfig, ConfigError> {
        let mut config = CoordinatorConfig::default();
        let ms = Duration::from_millis;
        let t = &self.timing;

        if let Some(v) = t.request_delay_ms {
            config.request_delay = ms(v);
        }
        if let Some(v) = t.jitter_ms {
            config.jitter = ms(v);
        }
        if let Some(v) = t.rate_limit_fallback_ms {
            config.rate_limit_fallback = ms(v);
        }
        if let Some(v) = t.reset_margin_ms {
            config.reset_margin = ms(v);
        }
        if let Some(v) = t.fetch_timeout_ms {
            config.fetch_timeout = ms(v);
        }
        if let Some(v) = t.watchdog_interval_ms {
            config.watchdog_interval = ms(v);
        }
        if let Some(v) = t.stall_threshold_ms {
            config.stall_threshold = ms(v);
        }

        let day = |d: u64| Duration::from_secs(d * 24 * 60 * 60);
        if let Some(d) = self.cache.fresh_days {
            config.fresh_limit = day(d);
        }
        if let Some(d) = self.cache.hard_days {
            config.hard_limit = day(d);
        }
        if let Some(n) = self.cache.top_values {
            config.top_values_limit = n;
        }

        if let Some(s) = self.conditions.idle_threshold_secs {
            config.idle_threshold = Duration::from_secs(s);
        }
        if let Some(s) = self.conditions.safety_window_secs {
            config.safety_window = Duration::from_secs(s);
        }

        if let Some(ref base) = self.upstream.api_base {
            config.api_base = base.clone();
        }

        if config.fresh_limit > config.hard_limit {
            return Err(ConfigError::Invalid(format!(
                "cache.fresh_days ({}) exceeds cache.hard_days ({})",
                config.fresh_limit.as_secs() / 86_400,
                config.hard_limit.as_secs() / 86_400
            )));
        }
        if config.watchdog_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "timing.watchdog_interval_ms must be positive".to_string(),
            ));
        }
        if config.fetch_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "timing.fetch_timeout_ms must be positive".to_string(),
            ));
        }
        // A gap between calls longer than the stall threshold reads as a stall.
        if config.request_delay + config.jitter >= config.stall_threshold {
            return Err(ConfigError::Invalid(format!(
                "timing.request_delay_ms + timing.jitter_ms ({}ms) must be below timing.stall_threshold_ms ({}ms)",
                (config.request_delay + config.jitter).as_millis(),
                config.stall_threshold.as_millis()
            )));
        }

        Ok(config)
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides discovery).
    pub config_path: Option<PathBuf>,
    /// Data directory or database file (--data flag).
    pub data: Option<PathBuf>,
}

/// Find a whereabouts config file in the standard locations.
async fn discover_config() -> Option<PathBuf> {
    match prefer::load(APP_DIR).await {
        Ok(found) => found.source_path().map(|p| p.to_path_buf()),
        Err(e) => {
            tracing::debug!("No config file discovered: {}", e);
            None
        }
    }
}

/// Resolve `--data`: a `.db` file selects the database directly, anything else
/// is a directory.
fn resolve_data_path(path: &Path) -> (PathBuf, Option<String>) {
    let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
    let path = PathBuf::from(expanded);
    let path = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };

    let is_db_file = path
        .extension()
        .is_some_and(|ext| ext == "db" || ext == "sqlite" || ext == "sqlite3");

    if is_db_file {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string);
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        (dir, filename)
    } else {
        (path, None)
    }
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(
    options: LoadOptions,
) -> Result<(Settings, Config), ConfigError> {
    // Priority: --config, WHEREABOUTS_CONFIG, platform config dir, defaults
    let explicit = options
        .config_path
        .clone()
        .or_else(|| std::env::var(ENV_CONFIG).ok().filter(|s| !s.is_empty()).map(PathBuf::from));
    let config_path = match explicit {
        Some(path) => Some(path),
        None => discover_config().await,
    };

    let mut config = match config_path {
        Some(ref path) => {
            tracing::debug!("Loading config from {}", path.display());
            Config::load_from_path(path).await?
        }
        None => Config::default(),
    };
    config.apply_overrides(|name| std::env::var(name).ok());

    let mut settings = Settings::default();
    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    config.apply_to_settings(&mut settings, &base_dir);

    // --data takes precedence over everything else
    if let Some(ref data) = options.data {
        let (dir, filename) = resolve_data_path(data);
        settings.data_dir = dir;
        if let Some(filename) = filename {
            settings.database_filename = filename;
        }
    }

    Ok((settings, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_toml_sections() {
        let text = r#"
            data_dir = "~/whereabouts-data"

            [timing]
            request_delay_ms = 800
            jitter_ms = 0

            [cache]
            fresh_days = 3
            hard_days = 10

            [upstream]
            api_base = "http://localhost:9999/graphql"
        "#;
        let config = Config::parse(text, Path::new("config.toml")).unwrap();
        let coordinator = config.coordinator_config().unwrap();

        assert_eq!(coordinator.request_delay, Duration::from_millis(800));
        assert_eq!(coordinator.jitter, Duration::ZERO);
        assert_eq!(coordinator.fresh_limit, Duration::from_secs(3 * 86_400));
        assert_eq!(coordinator.hard_limit, Duration::from_secs(10 * 86_400));
        assert_eq!(coordinator.api_base, "http://localhost:9999/graphql");
        // untouched values keep their defaults
        assert_eq!(coordinator.stall_threshold, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_json_and_yaml() {
        let json = Config::parse(r#"{"timing": {"request_delay_ms": 100}}"#, Path::new("c.json"))
            .unwrap();
        assert_eq!(json.timing.request_delay_ms, Some(100));

        let yaml = Config::parse("cache:\n  top_values: 3\n", Path::new("c.yaml")).unwrap();
        assert_eq!(yaml.cache.top_values, Some(3));
    }

    #[test]
    fn test_parse_error_names_format() {
        let err = Config::parse("timing = [", Path::new("bad.toml")).unwrap_err();
        assert!(err.to_string().contains("TOML"));
    }

    #[test]
    fn test_rejects_fresh_beyond_hard() {
        let mut config = Config::default();
        config.cache.fresh_days = Some(40);
        assert!(matches!(
            config.coordinator_config(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_delay_at_or_beyond_stall_threshold() {
        let mut config = Config::default();
        config.timing.request_delay_ms = Some(8_000);
        config.timing.jitter_ms = Some(0);
        assert!(matches!(
            config.coordinator_config(),
            Err(ConfigError::Invalid(_))
        ));

        // Jitter counts toward the worst-case gap.
        config.timing.request_delay_ms = Some(4_500);
        config.timing.jitter_ms = Some(500);
        assert!(config.coordinator_config().is_err());

        config.timing.stall_threshold_ms = Some(10_000);
        assert!(config.coordinator_config().is_ok());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_REQUEST_DELAY_MS, "1200"),
            (ENV_API_BASE, "http://proxy/graphql"),
            (ENV_DATA_DIR, "/tmp/wa"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.timing.request_delay_ms, Some(1200));
        assert_eq!(config.upstream.api_base.as_deref(), Some("http://proxy/graphql"));

        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, Path::new("/"));
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/wa"));
        assert_eq!(
            settings.database_path(),
            PathBuf::from("/tmp/wa/whereabouts.db")
        );
    }

    #[test]
    fn test_bad_numeric_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|name| (name == ENV_REQUEST_DELAY_MS).then(|| "soon".to_string()));
        assert_eq!(config.timing.request_delay_ms, None);
    }

    #[test]
    fn test_resolve_data_path() {
        let (dir, file) = resolve_data_path(Path::new("/var/lib/wa/custom.db"));
        assert_eq!(dir, PathBuf::from("/var/lib/wa"));
        assert_eq!(file.as_deref(), Some("custom.db"));

        let (dir, file) = resolve_data_path(Path::new("/var/lib/wa"));
        assert_eq!(dir, PathBuf::from("/var/lib/wa"));
        assert!(file.is_none());
    }

    #[tokio::test]
    async fn test_explicit_config_path_skips_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.yaml");
        std::fs::write(&path, "database: alt.db\ncache:\n  top_values: 2\n").unwrap();

        let (settings, config) = load_settings_with_options(LoadOptions {
            config_path: Some(path.clone()),
            data: None,
        })
        .await
        .unwrap();

        assert_eq!(config.source_path, Some(path));
        assert_eq!(config.cache.top_values, Some(2));
        assert_eq!(settings.database_filename, "alt.db");
    }

    #[tokio::test]
    async fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "database = \"alt.db\"\n").unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.database.as_deref(), Some("alt.db"));
        assert_eq!(config.base_dir(), Some(dir.path().to_path_buf()));

        let missing = Config::load_from_path(&dir.path().join("nope.toml")).await;
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
