//! Cache settings and their layered loading.
//!
//! Sources are merged in this order (later sources override earlier):
//!
//! 1. Built-in defaults from [`CacheSettings::default`]
//! 2. An optional TOML file
//! 3. Environment variables prefixed `NSCACHE_`, using `__` to reach nested
//!    keys (e.g. `NSCACHE_ENABLED=false`, `NSCACHE_TTL__DB=30`)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Namespace whose TTL applies to namespaces with no TTL of their own.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default environment variable prefix.
pub const ENV_PREFIX: &str = "NSCACHE_";

const DEFAULT_MAX_ENTRIES: usize = 1024;
const FALLBACK_TTL_SECS: u64 = 300;

fn default_ttls() -> BTreeMap<String, u64> {
    [
        (DEFAULT_NAMESPACE, FALLBACK_TTL_SECS),
        ("db", 60),
        ("http", 300),
        ("embed", 86_400),
        ("prompt", 3_600),
        ("llm", 3_600),
    ]
    .into_iter()
    .map(|(ns, ttl)| (ns.to_owned(), ttl))
    .collect()
}

/// Global caching configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// When `false`, every namespace gets a no-op backend.
    pub enabled: bool,

    /// Capacity of each namespace's in-memory store.
    pub max_entries: usize,

    /// Default TTL in seconds, per namespace.
    pub ttl: BTreeMap<String, u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_MAX_ENTRIES,
            ttl: default_ttls(),
        }
    }
}

impl CacheSettings {
    /// Loads settings from defaults and `NSCACHE_*` environment variables.
    pub fn load() -> CacheResult<Self> {
        SettingsLoader::new().load()
    }

    /// TTL for `namespace`, falling back to the `default` namespace.
    pub fn ttl_for(&self, namespace: &str) -> u64 {
        self.ttl
            .get(namespace)
            .or_else(|| self.ttl.get(DEFAULT_NAMESPACE))
            .copied()
            .unwrap_or(FALLBACK_TTL_SECS)
    }

    /// Rejects settings no cache could be built from.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Configuration`] if caching is enabled with a
    /// zero `max_entries`.
    pub fn validate(&self) -> CacheResult<()> {
        if self.enabled && self.max_entries == 0 {
            return Err(CacheError::configuration(
                "max_entries must be greater than 0 when caching is enabled",
            ));
        }
        Ok(())
    }
}

/// Builder for loading [`CacheSettings`] from a file and the environment.
#[derive(Debug, Clone)]
pub struct SettingsLoader {
    config_path: Option<PathBuf>,
    env_prefix: String,
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_prefix: ENV_PREFIX.to_owned(),
        }
    }

    /// Reads a TOML file between the defaults and the environment. A
    /// missing file is skipped.
    pub fn with_config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Merges all sources, then validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Configuration`] if a source is malformed or the
    /// merged settings fail [`CacheSettings::validate`].
    pub fn load(&self) -> CacheResult<CacheSettings> {
        let mut figment = Figment::new().merge(Serialized::defaults(CacheSettings::default()));

        if let Some(path) = &self.config_path {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading cache settings file");
                figment = figment.merge(Toml::file(path));
            } else {
                tracing::debug!(path = %path.display(), "cache settings file not found, skipping");
            }
        }

        figment = figment.merge(Env::prefixed(&self.env_prefix).split("__"));

        let settings: CacheSettings = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn defaults_cover_known_namespaces() {
        let settings = CacheSettings::default();
        assert!(settings.enabled);
        assert_eq!(settings.max_entries, 1024);
        for ns in ["default", "db", "http", "embed", "prompt", "llm"] {
            assert!(settings.ttl.contains_key(ns), "missing ttl for {ns}");
        }
    }

    #[test]
    fn unknown_namespace_uses_default_ttl() {
        let mut settings = CacheSettings::default();
        settings.ttl.insert("default".into(), 42);
        assert_eq!(settings.ttl_for("db"), 60);
        assert_eq!(settings.ttl_for("sessions"), 42);

        settings.ttl.clear();
        assert_eq!(settings.ttl_for("sessions"), 300);
    }

    #[test]
    fn zero_capacity_rejected_only_when_enabled() {
        let mut settings = CacheSettings {
            max_entries: 0,
            ..CacheSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(CacheError::Configuration { .. })
        ));

        settings.enabled = false;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn environment_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.set_env("NSCACHE_ENABLED", "false");
            jail.set_env("NSCACHE_MAX_ENTRIES", "16");
            jail.set_env("NSCACHE_TTL__DB", "5");

            let settings = CacheSettings::load().expect("settings load");
            assert!(!settings.enabled);
            assert_eq!(settings.max_entries, 16);
            assert_eq!(settings.ttl_for("db"), 5);
            assert_eq!(settings.ttl_for("llm"), 3_600);
            Ok(())
        });
    }

    #[test]
    fn file_then_environment() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "cache.toml",
                r#"
                    max_entries = 8

                    [ttl]
                    http = 10
                    sessions = 900
                "#,
            )?;
            jail.set_env("NSCACHE_TTL__HTTP", "20");

            let settings = SettingsLoader::new()
                .with_config_path("cache.toml")
                .load()
                .expect("settings load");
            assert_eq!(settings.max_entries, 8);
            assert_eq!(settings.ttl_for("http"), 20);
            assert_eq!(settings.ttl_for("sessions"), 900);
            assert_eq!(settings.ttl_for("db"), 60);
            Ok(())
        });
    }

    #[test]
    fn missing_file_is_skipped() {
        Jail::expect_with(|_jail| {
            let settings = SettingsLoader::new()
                .with_config_path("does-not-exist.toml")
                .load()
                .expect("settings load");
            assert_eq!(settings, CacheSettings::default());
            Ok(())
        });
    }

    #[test]
    fn invalid_values_are_configuration_errors() {
        Jail::expect_with(|jail| {
            jail.set_env("NSCACHE_MAX_ENTRIES", "0");
            let err = CacheSettings::load().unwrap_err();
            assert!(matches!(err, CacheError::Configuration { .. }));

            jail.set_env("NSCACHE_MAX_ENTRIES", "lots");
            let err = CacheSettings::load().unwrap_err();
            assert!(matches!(err, CacheError::Configuration { .. }));
            Ok(())
        });
    }
}
