use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// 650 MiB, the upload bound of the original service.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 650 * 1024 * 1024;
/// Three hours.
pub const DEFAULT_EXPIRATION_SECS: u64 = 10_800;
/// One hour.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3_600;
pub const DEFAULT_BURN_GRACE_SECS: u64 = 2;
pub const DEFAULT_STALE_ARTIFACT_SECS: u64 = 3_600;

/// Lifecycle settings. Durations are whole seconds so the struct reads
/// naturally from TOML and environment variables.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Largest accepted payload, in bytes.
    pub max_file_size: u64,
    /// Age after which the sweeper deletes an object.
    pub expiration_secs: u64,
    /// Pause between sweep cycles.
    pub sweep_interval_secs: u64,
    /// Delay between a burn download ending and its bytes being deleted.
    pub burn_grace_secs: u64,
    /// Age after which leftover staging and claimed files are purged.
    pub stale_artifact_secs: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            expiration_secs: DEFAULT_EXPIRATION_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            burn_grace_secs: DEFAULT_BURN_GRACE_SECS,
            stale_artifact_secs: DEFAULT_STALE_ARTIFACT_SECS,
        }
    }
}

impl VaultConfig {
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn burn_grace(&self) -> Duration {
        Duration::from_secs(self.burn_grace_secs)
    }

    pub fn stale_artifact_age(&self) -> Duration {
        Duration::from_secs(self.stale_artifact_secs)
    }

    /// Reject settings the lifecycle cannot run with.
    pub fn validate(&self) -> VaultResult<()> {
        if self.max_file_size == 0 {
            return Err(VaultError::Config("max_file_size must be positive".into()));
        }
        if self.expiration_secs == 0 {
            return Err(VaultError::Config("expiration_secs must be positive".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(VaultError::Config("sweep_interval_secs must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_service() {
        let c = VaultConfig::default();
        assert_eq!(c.max_file_size, 681_574_400);
        assert_eq!(c.expiration(), Duration::from_secs(10_800));
        assert_eq!(c.sweep_interval(), Duration::from_secs(3_600));
        assert_eq!(c.burn_grace(), Duration::from_secs(2));
        c.validate().unwrap();
    }

    #[test]
    fn zero_values_are_rejected() {
        for config in [
            VaultConfig { max_file_size: 0, ..Default::default() },
            VaultConfig { expiration_secs: 0, ..Default::default() },
            VaultConfig { sweep_interval_secs: 0, ..Default::default() },
        ] {
            assert!(matches!(config.validate(), Err(VaultError::Config(_))));
        }
    }

    #[test]
    fn zero_grace_is_allowed() {
        let c = VaultConfig { burn_grace_secs: 0, ..Default::default() };
        c.validate().unwrap();
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let c: VaultConfig = toml::from_str("expiration_secs = 60").unwrap();
        assert_eq!(c.expiration_secs, 60);
        assert_eq!(c.max_file_size, DEFAULT_MAX_FILE_SIZE);
    }
}
