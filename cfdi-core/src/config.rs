//! Configuration for template assets, certificate sources and caching.
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

/// SAT certificate repository, addressed by the sliced certificate number.
pub const DEFAULT_PRIMARY_BASE_URL: &str = "https://rdc.sat.gob.mx/rccf";
/// Flat mirror of the SAT certificate repository.
pub const DEFAULT_SECONDARY_BASE_URL: &str =
    "https://administracioncfdi-certificados.s3.amazonaws.com";
/// Six months, counted as half of a 365 day year.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15_768_000);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_TEMPLATE_DIR: &str = "./assets/xslt";

pub const ENV_TEMPLATE_DIR: &str = "CFDI_TEMPLATE_DIR";
pub const ENV_CACHE_TTL_SECS: &str = "CFDI_CACHE_TTL_SECS";
pub const ENV_FETCH_TIMEOUT_SECS: &str = "CFDI_FETCH_TIMEOUT_SECS";
pub const ENV_PRIMARY_BASE_URL: &str = "CFDI_SAT_CERT_BASE_URL";
pub const ENV_SECONDARY_BASE_URL: &str = "CFDI_MIRROR_CERT_BASE_URL";

/// Error returned when an environment override cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Configuration for the validator and the certificate resolver.
///
/// # Examples
/// ```rust
/// use std::time::Duration;
/// use cfdi_core::config::Config;
///
/// let config = Config::default().with_fetch_timeout(Duration::from_secs(3));
/// assert_eq!(config.fetch_timeout(), Duration::from_secs(3));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    template_dir: PathBuf,
    cache_ttl: Duration,
    fetch_timeout: Duration,
    primary_base_url: String,
    secondary_base_url: String,
}

impl Config {
    pub fn new(template_dir: impl Into<PathBuf>) -> Self {
        Self {
            template_dir: template_dir.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by the `CFDI_*` environment variables.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] when a numeric override is not a
    /// whole number of seconds.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(dir) = lookup(ENV_TEMPLATE_DIR) {
            config.template_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup(ENV_CACHE_TTL_SECS) {
            config.cache_ttl = parse_seconds(ENV_CACHE_TTL_SECS, &value)?;
        }
        if let Some(value) = lookup(ENV_FETCH_TIMEOUT_SECS) {
            config.fetch_timeout = parse_seconds(ENV_FETCH_TIMEOUT_SECS, &value)?;
        }
        if let Some(url) = lookup(ENV_PRIMARY_BASE_URL) {
            config.primary_base_url = normalize_base_url(&url);
        }
        if let Some(url) = lookup(ENV_SECONDARY_BASE_URL) {
            config.secondary_base_url = normalize_base_url(&url);
        }
        Ok(config)
    }

    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_dir = dir.into();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_base_urls(mut self, primary: &str, secondary: &str) -> Self {
        self.primary_base_url = normalize_base_url(primary);
        self.secondary_base_url = normalize_base_url(secondary);
        self
    }

    pub fn template_dir(&self) -> &Path {
        &self.template_dir
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    pub fn primary_base_url(&self) -> &str {
        &self.primary_base_url
    }

    pub fn secondary_base_url(&self) -> &str {
        &self.secondary_base_url
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            template_dir: PathBuf::from(DEFAULT_TEMPLATE_DIR),
            cache_ttl: DEFAULT_CACHE_TTL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            primary_base_url: DEFAULT_PRIMARY_BASE_URL.to_string(),
            secondary_base_url: DEFAULT_SECONDARY_BASE_URL.to_string(),
        }
    }
}

fn parse_seconds(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_map(vars: &[(&str, &str)]) -> HashMap<String, String> {
        vars.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_point_at_sat_sources() {
        let config = Config::default();
        assert_eq!(config.primary_base_url(), DEFAULT_PRIMARY_BASE_URL);
        assert_eq!(config.secondary_base_url(), DEFAULT_SECONDARY_BASE_URL);
        assert_eq!(config.cache_ttl(), Duration::from_secs(182 * 86_400 + 43_200));
        assert_eq!(config.template_dir(), Path::new(DEFAULT_TEMPLATE_DIR));
    }

    #[test]
    fn lookup_overrides_every_setting() {
        let vars = env_map(&[
            (ENV_TEMPLATE_DIR, "/opt/sat/xslt"),
            (ENV_CACHE_TTL_SECS, "60"),
            (ENV_FETCH_TIMEOUT_SECS, " 2 "),
            (ENV_PRIMARY_BASE_URL, "http://localhost:8080/rccf/"),
            (ENV_SECONDARY_BASE_URL, "http://localhost:8081"),
        ]);
        let config = Config::from_lookup(|key| vars.get(key).cloned()).expect("config");

        assert_eq!(config.template_dir(), Path::new("/opt/sat/xslt"));
        assert_eq!(config.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.fetch_timeout(), Duration::from_secs(2));
        assert_eq!(config.primary_base_url(), "http://localhost:8080/rccf");
        assert_eq!(config.secondary_base_url(), "http://localhost:8081");
    }

    #[test]
    fn lookup_rejects_non_numeric_ttl() {
        let vars = env_map(&[(ENV_CACHE_TTL_SECS, "six months")]);
        let err = Config::from_lookup(|key| vars.get(key).cloned()).expect_err("invalid ttl");
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: ENV_CACHE_TTL_SECS,
                value: "six months".into(),
            }
        );
    }
}
