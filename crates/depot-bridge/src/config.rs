//! Bridge configuration
//!
//! [`BridgeConfig`] is plain serde data with builder-style setters; it can be
//! loaded from a TOML file where every field is optional.

use crate::backend::TrustPolicy;
use crate::credentials::DEFAULT_SESSION_CAPACITY;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Description recorded on every changelist the bridge submits
pub const DEFAULT_CHANGELIST_DESCRIPTION: &str = "submitted by webapp author";

/// Prefix of ephemeral workspace names
pub const DEFAULT_WORKSPACE_PREFIX: &str = "webAuthP4";

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Maximum number of cached sessions
    pub credential_capacity: u64,
    /// Optional lifetime of a cached session, in seconds
    pub credential_ttl_secs: Option<u64>,
    /// Overwrite policy applied by plain writes
    pub default_overwrite: bool,
    /// Description recorded with submitted changelists
    pub changelist_description: String,
    /// Prefix of ephemeral workspace names
    pub workspace_prefix: String,
    /// Upper bound of pending changelists inspected during cleanup
    pub pending_changelist_limit: usize,
    /// How secured transports establish trust
    pub trust_policy: TrustPolicy,
    /// Directory for staging files (system temp dir if unset)
    pub temp_root: Option<PathBuf>,
}

impl BridgeConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML and validate
    ///
    /// # Errors
    /// `ConfigError::Parse` on invalid TOML, `InvalidValue` on bad values
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` if the file cannot be read, otherwise as
    /// [`BridgeConfig::from_toml_str`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Fails only if a value cannot be represented in TOML
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// `ConfigError::InvalidValue` naming the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credential_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "credential_capacity",
                reason: "must be at least 1".into(),
            });
        }
        if self.credential_ttl_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "credential_ttl_secs",
                reason: "must be positive when set".into(),
            });
        }
        if self.workspace_prefix.is_empty()
            || !self
                .workspace_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(ConfigError::InvalidValue {
                field: "workspace_prefix",
                reason: format!("'{}' is not a valid workspace name prefix", self.workspace_prefix),
            });
        }
        if self.changelist_description.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "changelist_description",
                reason: "must not be empty".into(),
            });
        }
        if self.pending_changelist_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pending_changelist_limit",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Session lifetime, if configured
    #[inline]
    #[must_use]
    pub fn credential_ttl(&self) -> Option<Duration> {
        self.credential_ttl_secs.map(Duration::from_secs)
    }

    /// With session capacity
    #[inline]
    #[must_use]
    pub fn with_credential_capacity(mut self, capacity: u64) -> Self {
        self.credential_capacity = capacity;
        self
    }

    /// With session lifetime
    #[inline]
    #[must_use]
    pub fn with_credential_ttl(mut self, ttl: Duration) -> Self {
        self.credential_ttl_secs = Some(ttl.as_secs().max(1));
        self
    }

    /// With overwrite policy for plain writes
    #[inline]
    #[must_use]
    pub fn with_default_overwrite(mut self, overwrite: bool) -> Self {
        self.default_overwrite = overwrite;
        self
    }

    /// With changelist description
    #[inline]
    #[must_use]
    pub fn with_changelist_description(mut self, description: impl Into<String>) -> Self {
        self.changelist_description = description.into();
        self
    }

    /// With workspace name prefix
    #[inline]
    #[must_use]
    pub fn with_workspace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.workspace_prefix = prefix.into();
        self
    }

    /// With trust policy
    #[inline]
    #[must_use]
    pub fn with_trust_policy(mut self, policy: TrustPolicy) -> Self {
        self.trust_policy = policy;
        self
    }

    /// With staging directory
    #[inline]
    #[must_use]
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            credential_capacity: DEFAULT_SESSION_CAPACITY,
            credential_ttl_secs: None,
            default_overwrite: true,
            changelist_description: DEFAULT_CHANGELIST_DESCRIPTION.to_string(),
            workspace_prefix: DEFAULT_WORKSPACE_PREFIX.to_string(),
            pending_changelist_limit: 1000,
            trust_policy: TrustPolicy::AcceptOnFirstUse,
            temp_root: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let config = BridgeConfig::new();
        assert_eq!(config.credential_capacity, 10_000);
        assert_eq!(config.credential_ttl(), None);
        assert!(config.default_overwrite);
        assert_eq!(config.changelist_description, "submitted by webapp author");
        assert_eq!(config.trust_policy, TrustPolicy::AcceptOnFirstUse);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = BridgeConfig::from_toml_str(
            r#"
            credential_ttl_secs = 3600
            trust_policy = "strict"
            "#,
        )
        .unwrap();
        assert_eq!(config.credential_ttl(), Some(Duration::from_secs(3600)));
        assert_eq!(config.trust_policy, TrustPolicy::Strict);
        assert_eq!(config.workspace_prefix, DEFAULT_WORKSPACE_PREFIX);
    }

    #[test]
    fn toml_roundtrip() {
        let config = BridgeConfig::new()
            .with_workspace_prefix("bridge")
            .with_default_overwrite(false)
            .with_temp_root("/var/tmp/bridge");
        let text = config.to_toml_string().unwrap();
        assert_eq!(BridgeConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn rejects_invalid_values() {
        let err = BridgeConfig::from_toml_str("credential_capacity = 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "credential_capacity", .. }));

        let err = BridgeConfig::new().with_workspace_prefix("bad prefix").validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "workspace_prefix", .. }));
    }

    #[test]
    fn rejects_bad_toml() {
        let err = BridgeConfig::from_toml_str("credential_capacity = \"lots\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(&path, "default_overwrite = false\n").unwrap();

        let config = BridgeConfig::load(&path).unwrap();
        assert!(!config.default_overwrite);

        let missing = BridgeConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
