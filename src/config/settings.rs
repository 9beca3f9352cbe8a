use crate::error::CacheError;
use std::env;
use std::time::Duration;

pub const DEFAULT_REDIS_HOST: &str = "redis";
pub const DEFAULT_REDIS_PORT: u16 = 6379;
pub const DEFAULT_REDIS_DB: i64 = 0;
pub const DEFAULT_TTL_SECS: u64 = 3600;
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: i64,
    /// Full connection URL; takes precedence over host/port/db when set.
    pub redis_url: Option<String>,
    pub default_ttl_secs: u64,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_host: DEFAULT_REDIS_HOST.to_string(),
            redis_port: DEFAULT_REDIS_PORT,
            redis_db: DEFAULT_REDIS_DB,
            redis_url: None,
            default_ttl_secs: DEFAULT_TTL_SECS,
            connect_timeout_ms: DEFAULT_TIMEOUT_MS,
            io_timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl CacheSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds settings from any variable source. Unparseable numbers fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        CacheSettings {
            redis_host: lookup("REDIS_HOST").unwrap_or_else(|| DEFAULT_REDIS_HOST.to_string()),
            redis_port: lookup("REDIS_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_REDIS_PORT),
            redis_db: lookup("REDIS_DB")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_REDIS_DB),
            redis_url: lookup("REDIS_URL").filter(|v| !v.trim().is_empty()),
            default_ttl_secs: lookup("CACHE_DEFAULT_TTL_SECS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_TTL_SECS),
            connect_timeout_ms: lookup("REDIS_CONNECT_TIMEOUT_MS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_MS),
            io_timeout_ms: lookup("REDIS_IO_TIMEOUT_MS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn connection_url(&self) -> String {
        match &self.redis_url {
            Some(url) => url.clone(),
            None => format!("redis://{}:{}/{}", self.redis_host, self.redis_port, self.redis_db),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `None` disables the read/write timeout on the connection.
    pub fn io_timeout(&self) -> Option<Duration> {
        (self.io_timeout_ms > 0).then(|| Duration::from_millis(self.io_timeout_ms))
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        if self.redis_url.is_none() {
            if self.redis_host.trim().is_empty() {
                return Err(CacheError::Config("REDIS_HOST cannot be empty".to_string()));
            }
            if self.redis_port == 0 {
                return Err(CacheError::Config("REDIS_PORT cannot be 0".to_string()));
            }
            if self.redis_db < 0 {
                return Err(CacheError::Config("REDIS_DB cannot be negative".to_string()));
            }
        }
        if self.connect_timeout_ms == 0 {
            return Err(CacheError::Config(
                "REDIS_CONNECT_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Logs the settings with any URL credentials masked.
    pub fn log_settings(&self) {
        log::info!(
            "Cache configuration loaded: url={}, default_ttl={}s, connect_timeout={}ms, io_timeout={}ms",
            mask_credentials(&self.connection_url()),
            self.default_ttl_secs,
            self.connect_timeout_ms,
            self.io_timeout_ms
        );
    }
}

pub(crate) fn mask_credentials(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn settings_from(vars: &[(&str, &str)]) -> CacheSettings {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CacheSettings::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let settings = settings_from(&[]);
        assert_eq!(settings, CacheSettings::default());
        assert_eq!(settings.connection_url(), "redis://redis:6379/0");
        assert_eq!(settings.default_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn reads_host_port_and_db() {
        let settings = settings_from(&[
            ("REDIS_HOST", "cache.internal"),
            ("REDIS_PORT", "6380"),
            ("REDIS_DB", "3"),
        ]);
        assert_eq!(settings.connection_url(), "redis://cache.internal:6380/3");
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let settings = settings_from(&[("REDIS_PORT", "six"), ("CACHE_DEFAULT_TTL_SECS", "-1")]);
        assert_eq!(settings.redis_port, DEFAULT_REDIS_PORT);
        assert_eq!(settings.default_ttl_secs, DEFAULT_TTL_SECS);
    }

    #[test]
    fn redis_url_overrides_parts() {
        let settings = settings_from(&[
            ("REDIS_HOST", "ignored"),
            ("REDIS_URL", "redis://:secret@10.0.0.5:6379/2"),
        ]);
        assert_eq!(settings.connection_url(), "redis://:secret@10.0.0.5:6379/2");
        assert_eq!(mask_credentials(&settings.connection_url()), "redis://***@10.0.0.5:6379/2");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut settings = CacheSettings::default();
        assert!(settings.validate().is_ok());

        settings.redis_port = 0;
        assert!(matches!(settings.validate(), Err(CacheError::Config(_))));

        settings.redis_port = DEFAULT_REDIS_PORT;
        settings.redis_host = " ".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_io_timeout_disables_it() {
        let settings = CacheSettings {
            io_timeout_ms: 0,
            ..CacheSettings::default()
        };
        assert_eq!(settings.io_timeout(), None);
    }
}
