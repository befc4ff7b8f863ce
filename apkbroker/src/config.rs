//! Configuration file handling.
//!
//! Settings live in an INI file, by default
//! `$XDG_CONFIG_HOME/apkbroker/config.ini`. Every key is optional; a
//! missing file means all defaults.
//!
//! ```ini
//! [server]
//! bind = 127.0.0.1:8000
//!
//! [cache]
//! directory = /var/cache/apkbroker
//! min_artifact_bytes = 100000
//! negative_ttl_secs = 3600
//! deletion_delay_secs = 60
//! max_age_secs = 300
//! sweep_interval_secs = 60
//!
//! [direct]
//! enabled = true
//! bundle_url = https://d.apkpure.com/b/XAPK/{id}?version=latest
//! package_url = https://d.apkpure.com/b/APK/{id}?version=latest
//! connections = 16
//! min_split_bytes = 1048576
//! connect_timeout_secs = 30
//! request_timeout_secs = 120
//! overall_timeout_secs = 300
//!
//! [tool]
//! enabled = true
//! path = apkeep
//! timeout_secs = 300
//!
//! [worker]
//! max_blocking = 16
//!
//! [classify]
//! unrecognized = single-package
//!
//! [logging]
//! level = info
//! directory = /var/log/apkbroker
//! ```

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;
use tracing::debug;

use crate::cache::{DEFAULT_DELETION_DELAY, DEFAULT_NEGATIVE_TTL};
use crate::channel::direct::{
    FetchConfig, DEFAULT_BUNDLE_URL, DEFAULT_PACKAGE_URL, ID_PLACEHOLDER,
};
use crate::channel::tool::{DEFAULT_TOOL_PROGRAM, DEFAULT_TOOL_TIMEOUT_SECS};
use crate::classify::UnrecognizedPolicy;
use crate::sweeper::{DEFAULT_MAX_AGE, DEFAULT_SWEEP_INTERVAL};
use crate::worker::default_capacity;

/// Default listen address.
pub const DEFAULT_BIND: &str = "127.0.0.1:8000";

/// Default plausibility threshold in bytes.
pub const DEFAULT_MIN_ARTIFACT_BYTES: u64 = 100_000;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("invalid value '{value}' for [{section}] {key}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },

    #[error("failed to write config: {0}")]
    Write(#[source] std::io::Error),
}

/// Path of the default configuration file.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("apkbroker")
        .join("config.ini")
}

/// Default artifact cache directory.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("apkbroker")
        .join("artifacts")
}

/// `[server]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
        }
    }
}

/// `[cache]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub directory: PathBuf,
    pub min_artifact_bytes: u64,
    pub negative_ttl: Duration,
    pub deletion_delay: Duration,
    pub max_age: Duration,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: default_cache_dir(),
            min_artifact_bytes: DEFAULT_MIN_ARTIFACT_BYTES,
            negative_ttl: DEFAULT_NEGATIVE_TTL,
            deletion_delay: DEFAULT_DELETION_DELAY,
            max_age: DEFAULT_MAX_AGE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl CacheConfig {
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn with_min_artifact_bytes(mut self, bytes: u64) -> Self {
        self.min_artifact_bytes = bytes;
        self
    }

    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = ttl;
        self
    }

    pub fn with_deletion_delay(mut self, delay: Duration) -> Self {
        self.deletion_delay = delay;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

/// `[direct]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectConfig {
    pub enabled: bool,
    pub bundle_url: String,
    pub package_url: String,
    pub fetch: FetchConfig,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bundle_url: DEFAULT_BUNDLE_URL.to_string(),
            package_url: DEFAULT_PACKAGE_URL.to_string(),
            fetch: FetchConfig::default(),
        }
    }
}

/// `[tool]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub timeout: Duration,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from(DEFAULT_TOOL_PROGRAM),
            timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Level or full filter directive; `RUST_LOG` is merged on top.
    pub level: String,
    /// Directory for daily-rotated log files; `None` logs to stderr only.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            directory: None,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub direct: DirectConfig,
    pub tool: ToolConfig,
    /// `[worker] max_blocking`
    pub max_blocking: usize,
    /// `[classify] unrecognized`
    pub unrecognized: UnrecognizedPolicy,
    pub logging: LoggingConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            direct: DirectConfig::default(),
            tool: ToolConfig::default(),
            max_blocking: default_capacity(),
            unrecognized: UnrecognizedPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Load from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path).map_err(|e| match e {
            ini::Error::Io(source) => ConfigError::Read {
                path: path.to_path_buf(),
                source,
            },
            ini::Error::Parse(parse) => ConfigError::Parse {
                path: path.to_path_buf(),
                reason: parse.to_string(),
            },
        })?;

        debug!(path = %path.display(), "Loaded config file");
        Self::from_ini(&ini)
    }

    /// Parse INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<string>"),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let r = Reader { ini };

        if let Some(bind) = r.parse("server", "bind")? {
            config.server.bind = bind;
        }

        let cache = &mut config.cache;
        if let Some(dir) = r.get("cache", "directory") {
            cache.directory = PathBuf::from(dir);
        }
        if let Some(v) = r.parse("cache", "min_artifact_bytes")? {
            cache.min_artifact_bytes = v;
        }
        if let Some(v) = r.secs("cache", "negative_ttl_secs")? {
            cache.negative_ttl = v;
        }
        if let Some(v) = r.secs("cache", "deletion_delay_secs")? {
            cache.deletion_delay = v;
        }
        if let Some(v) = r.secs("cache", "max_age_secs")? {
            cache.max_age = v;
        }
        if let Some(v) = r.positive_secs("cache", "sweep_interval_secs")? {
            cache.sweep_interval = v;
        }

        let direct = &mut config.direct;
        if let Some(v) = r.bool("direct", "enabled")? {
            direct.enabled = v;
        }
        if let Some(v) = r.template("direct", "bundle_url")? {
            direct.bundle_url = v;
        }
        if let Some(v) = r.template("direct", "package_url")? {
            direct.package_url = v;
        }
        if let Some(v) = r.positive::<usize>("direct", "connections")? {
            direct.fetch.connections = v;
        }
        if let Some(v) = r.positive::<u64>("direct", "min_split_bytes")? {
            direct.fetch.min_split_bytes = v;
        }
        if let Some(v) = r.positive_secs("direct", "connect_timeout_secs")? {
            direct.fetch.connect_timeout = v;
        }
        if let Some(v) = r.positive_secs("direct", "request_timeout_secs")? {
            direct.fetch.request_timeout = v;
        }
        if let Some(v) = r.positive_secs("direct", "overall_timeout_secs")? {
            direct.fetch.overall_timeout = v;
        }

        let tool = &mut config.tool;
        if let Some(v) = r.bool("tool", "enabled")? {
            tool.enabled = v;
        }
        if let Some(v) = r.get("tool", "path") {
            tool.path = PathBuf::from(v);
        }
        if let Some(v) = r.positive_secs("tool", "timeout_secs")? {
            tool.timeout = v;
        }

        if let Some(v) = r.positive::<usize>("worker", "max_blocking")? {
            config.max_blocking = v;
        }

        if let Some(v) = r.parse("classify", "unrecognized")? {
            config.unrecognized = v;
        }

        if let Some(v) = r.get("logging", "level") {
            config.logging.level = v.to_string();
        }
        if let Some(v) = r.get("logging", "directory") {
            config.logging.directory = Some(PathBuf::from(v));
        }

        Ok(config)
    }

    /// Render the effective configuration as INI text.
    pub fn to_ini_string(&self) -> Result<String, ConfigError> {
        let mut ini = Ini::new();
        ini.with_section(Some("server"))
            .set("bind", self.server.bind.to_string());
        ini.with_section(Some("cache"))
            .set("directory", self.cache.directory.display().to_string())
            .set("min_artifact_bytes", self.cache.min_artifact_bytes.to_string())
            .set("negative_ttl_secs", self.cache.negative_ttl.as_secs().to_string())
            .set("deletion_delay_secs", self.cache.deletion_delay.as_secs().to_string())
            .set("max_age_secs", self.cache.max_age.as_secs().to_string())
            .set("sweep_interval_secs", self.cache.sweep_interval.as_secs().to_string());
        ini.with_section(Some("direct"))
            .set("enabled", self.direct.enabled.to_string())
            .set("bundle_url", self.direct.bundle_url.as_str())
            .set("package_url", self.direct.package_url.as_str())
            .set("connections", self.direct.fetch.connections.to_string())
            .set("min_split_bytes", self.direct.fetch.min_split_bytes.to_string())
            .set("connect_timeout_secs", self.direct.fetch.connect_timeout.as_secs().to_string())
            .set("request_timeout_secs", self.direct.fetch.request_timeout.as_secs().to_string())
            .set("overall_timeout_secs", self.direct.fetch.overall_timeout.as_secs().to_string());
        ini.with_section(Some("tool"))
            .set("enabled", self.tool.enabled.to_string())
            .set("path", self.tool.path.display().to_string())
            .set("timeout_secs", self.tool.timeout.as_secs().to_string());
        ini.with_section(Some("worker"))
            .set("max_blocking", self.max_blocking.to_string());
        ini.with_section(Some("classify")).set(
            "unrecognized",
            self.unrecognized.default_kind().label().to_string(),
        );
        let mut logging = ini.with_section(Some("logging"));
        logging.set("level", self.logging.level.as_str());
        if let Some(dir) = &self.logging.directory {
            logging.set("directory", dir.display().to_string());
        }

        let mut buf = Vec::new();
        ini.write_to(&mut buf).map_err(ConfigError::Write)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Typed accessors over a loaded INI document.
struct Reader<'a> {
    ini: &'a Ini,
}

impl Reader<'_> {
    fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.ini
            .section(Some(section))
            .and_then(|props| props.get(key))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn invalid(section: &str, key: &str, value: impl Display) -> ConfigError {
        ConfigError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    fn parse<T: FromStr>(&self, section: &str, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get(section, key) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| Self::invalid(section, key, raw)),
        }
    }

    fn positive<T>(&self, section: &str, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr + PartialOrd + Default + Display + Copy,
    {
        match self.parse::<T>(section, key)? {
            Some(v) if v <= T::default() => Err(Self::invalid(section, key, v)),
            other => Ok(other),
        }
    }

    fn secs(&self, section: &str, key: &str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(section, key)?.map(Duration::from_secs))
    }

    fn positive_secs(&self, section: &str, key: &str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.positive::<u64>(section, key)?.map(Duration::from_secs))
    }

    fn bool(&self, section: &str, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.get(section, key) {
            None => Ok(None),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Some(true)),
                "false" | "no" | "off" | "0" => Ok(Some(false)),
                _ => Err(Self::invalid(section, key, raw)),
            },
        }
    }

    fn template(&self, section: &str, key: &str) -> Result<Option<String>, ConfigError> {
        match self.get(section, key) {
            None => Ok(None),
            Some(raw) if raw.contains(ID_PLACEHOLDER) => Ok(Some(raw.to_string())),
            Some(raw) => Err(Self::invalid(section, key, raw)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(BrokerConfig::parse("").unwrap(), BrokerConfig::default());
    }

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.server.bind.to_string(), DEFAULT_BIND);
        assert_eq!(config.cache.min_artifact_bytes, 100_000);
        assert_eq!(config.cache.negative_ttl, Duration::from_secs(3600));
        assert_eq!(config.cache.deletion_delay, Duration::from_secs(60));
        assert_eq!(config.cache.max_age, Duration::from_secs(300));
        assert_eq!(config.cache.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.direct.fetch.connections, 16);
        assert_eq!(config.tool.path, PathBuf::from("apkeep"));
        assert_eq!(config.unrecognized, UnrecognizedPolicy::AssumeSinglePackage);
        assert!(config.max_blocking >= 4);
    }

    #[test]
    fn test_parse_overrides() {
        let text = r#"
[server]
bind = 0.0.0.0:9000

[cache]
directory = /srv/apk
negative_ttl_secs = 120

[direct]
enabled = no
connections = 4

[tool]
path = /opt/apkeep

[classify]
unrecognized = unknown

[logging]
level = debug
directory = /var/log/apkbroker
"#;
        let config = BrokerConfig::parse(text).unwrap();
        assert_eq!(config.server.bind.port(), 9000);
        assert_eq!(config.cache.directory, PathBuf::from("/srv/apk"));
        assert_eq!(config.cache.negative_ttl, Duration::from_secs(120));
        assert!(!config.direct.enabled);
        assert_eq!(config.direct.fetch.connections, 4);
        assert_eq!(config.tool.path, PathBuf::from("/opt/apkeep"));
        assert_eq!(config.unrecognized, UnrecognizedPolicy::Unknown);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.logging.directory,
            Some(PathBuf::from("/var/log/apkbroker"))
        );
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let cases = [
            ("[server]\nbind = nope", "server", "bind"),
            ("[direct]\nconnections = 0", "direct", "connections"),
            ("[direct]\nenabled = maybe", "direct", "enabled"),
            ("[direct]\nbundle_url = https://example.com/x", "direct", "bundle_url"),
            ("[cache]\nmin_artifact_bytes = -5", "cache", "min_artifact_bytes"),
            ("[classify]\nunrecognized = zip", "classify", "unrecognized"),
        ];
        for (text, section, key) in cases {
            match BrokerConfig::parse(text) {
                Err(ConfigError::InvalidValue {
                    section: s, key: k, ..
                }) => {
                    assert_eq!((s.as_str(), k.as_str()), (section, key), "for {text:?}");
                }
                other => panic!("expected InvalidValue for {text:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = BrokerConfig::load_from(&dir.path().join("absent.ini")).unwrap();
        assert_eq!(config, BrokerConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[tool]\nenabled = false\ntimeout_secs = 30\n").unwrap();

        let config = BrokerConfig::load_from(&path).unwrap();
        assert!(!config.tool.enabled);
        assert_eq!(config.tool.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_rendered_config_parses_back() {
        let mut config = BrokerConfig::default();
        config.cache.directory = PathBuf::from("/srv/apk");
        config.unrecognized = UnrecognizedPolicy::Unknown;
        config.logging.directory = Some(PathBuf::from("/var/log/apkbroker"));

        let text = config.to_ini_string().unwrap();
        assert_eq!(BrokerConfig::parse(&text).unwrap(), config);
    }
}
