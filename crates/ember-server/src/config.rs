use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ember_vault::VaultConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

pub const ENV_BIND_ADDR: &str = "EMBER_BIND_ADDR";
pub const ENV_STORAGE_DIR: &str = "EMBER_STORAGE_DIR";
pub const ENV_MAX_FILE_SIZE: &str = "MAX_FILE_SIZE";
pub const ENV_EXPIRATION_SECONDS: &str = "EXPIRATION_SECONDS";
pub const ENV_SWEEP_INTERVAL_SECONDS: &str = "SWEEP_INTERVAL_SECONDS";
pub const ENV_BURN_GRACE_SECONDS: &str = "BURN_GRACE_SECONDS";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Directory holding committed objects plus the staging and claimed
    /// subdirectories.
    pub storage_dir: PathBuf,
    pub vault: VaultConfig,
    pub rate_limit: RateLimitConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            storage_dir: PathBuf::from("ephemeral_storage"),
            vault: VaultConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Per-client request quotas, counted per IP address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub upload_per_minute: u32,
    pub download_per_minute: u32,
    /// Applies to `/health` and `/info`.
    pub page_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            upload_per_minute: 5,
            download_per_minute: 20,
            page_per_minute: 10,
        }
    }
}

impl ServerConfig {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> ServerResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ServerResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> ServerResult<Self> {
        toml::from_str(raw).map_err(|e| ServerError::Config(e.to_string()))
    }

    /// Override fields from variables resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> ServerResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_BIND_ADDR) {
            self.bind_addr = parse_var(ENV_BIND_ADDR, &v)?;
        }
        if let Some(v) = lookup(ENV_STORAGE_DIR) {
            self.storage_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_MAX_FILE_SIZE) {
            self.vault.max_file_size = parse_var(ENV_MAX_FILE_SIZE, &v)?;
        }
        if let Some(v) = lookup(ENV_EXPIRATION_SECONDS) {
            self.vault.expiration_secs = parse_var(ENV_EXPIRATION_SECONDS, &v)?;
        }
        if let Some(v) = lookup(ENV_SWEEP_INTERVAL_SECONDS) {
            self.vault.sweep_interval_secs = parse_var(ENV_SWEEP_INTERVAL_SECONDS, &v)?;
        }
        if let Some(v) = lookup(ENV_BURN_GRACE_SECONDS) {
            self.vault.burn_grace_secs = parse_var(ENV_BURN_GRACE_SECONDS, &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> ServerResult<()> {
        self.vault
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;
        let limits = &self.rate_limit;
        if limits.enabled
            && (limits.upload_per_minute == 0
                || limits.download_per_minute == 0
                || limits.page_per_minute == 0)
        {
            return Err(ServerError::Config(
                "rate limits must be positive when enabled".into(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T>(key: &str, value: &str) -> ServerResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ServerError::Config(format!("{key}={value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config() {
        let c = ServerConfig::default();
        assert_eq!(c.bind_addr, "127.0.0.1:8000".parse::<SocketAddr>().unwrap());
        assert_eq!(c.storage_dir, PathBuf::from("ephemeral_storage"));
        assert_eq!(c.vault.max_file_size, 681_574_400);
        assert_eq!(c.rate_limit.upload_per_minute, 5);
        assert_eq!(c.rate_limit.download_per_minute, 20);
        c.validate().unwrap();
    }

    #[test]
    fn toml_overrides_nested_sections() {
        let c = ServerConfig::from_toml(
            r#"
            bind_addr = "0.0.0.0:9000"
            storage_dir = "/var/lib/ember"

            [vault]
            expiration_secs = 600

            [rate_limit]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(c.bind_addr.port(), 9000);
        assert_eq!(c.storage_dir, PathBuf::from("/var/lib/ember"));
        assert_eq!(c.vault.expiration_secs, 600);
        assert_eq!(c.vault.sweep_interval_secs, 3_600);
        assert!(!c.rate_limit.enabled);
        assert_eq!(c.rate_limit.page_per_minute, 10);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        assert!(matches!(
            ServerConfig::from_toml("bind_addr = 12"),
            Err(ServerError::Config(_))
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let mut c = ServerConfig::default();
        c.apply_env(env(&[
            ("EMBER_BIND_ADDR", "0.0.0.0:8080"),
            ("EMBER_STORAGE_DIR", "/tmp/ember"),
            ("MAX_FILE_SIZE", "1024"),
            ("EXPIRATION_SECONDS", " 60 "),
            ("SWEEP_INTERVAL_SECONDS", "30"),
            ("BURN_GRACE_SECONDS", "0"),
        ]))
        .unwrap();
        assert_eq!(c.bind_addr.port(), 8080);
        assert_eq!(c.storage_dir, PathBuf::from("/tmp/ember"));
        assert_eq!(c.vault.max_file_size, 1024);
        assert_eq!(c.vault.expiration_secs, 60);
        assert_eq!(c.vault.sweep_interval_secs, 30);
        assert_eq!(c.vault.burn_grace_secs, 0);
    }

    #[test]
    fn bad_env_value_names_the_variable() {
        let mut c = ServerConfig::default();
        let err = c.apply_env(env(&[("MAX_FILE_SIZE", "lots")])).unwrap_err();
        assert!(err.to_string().contains("MAX_FILE_SIZE"));
    }

    #[test]
    fn zero_rate_limit_rejected_only_when_enabled() {
        let mut c = ServerConfig::default();
        c.rate_limit.upload_per_minute = 0;
        assert!(c.validate().is_err());
        c.rate_limit.enabled = false;
        c.validate().unwrap();
    }

    #[test]
    fn zero_expiration_rejected() {
        let mut c = ServerConfig::default();
        c.vault.expiration_secs = 0;
        assert!(matches!(c.validate(), Err(ServerError::Config(_))));
    }
}
