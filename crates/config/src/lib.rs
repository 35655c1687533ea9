//! Layered configuration.
//!
//! Values are merged from (lowest to highest precedence) built-in defaults,
//! the per-user `config.toml`, an explicitly supplied file, and `TOME_`
//! prefixed environment variables (`__` separates nested keys, e.g.
//! `TOME_SESSION__CONCURRENCY=4`).

pub mod error;
mod package;
mod session;

pub use crate::package::{ChapterFilter, PackageConfig, PackageMode};
pub use crate::session::SessionConfig;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "TOME_";

/// Limiter category for catalog lookups.
pub const LIMIT_INFO: &str = "info";
/// Limiter category for searches.
pub const LIMIT_SEARCH: &str = "search";
/// Limiter category for background caching crawls.
pub const LIMIT_CACHE: &str = "cache";
/// Limiter category for in-memory artifact extraction.
pub const LIMIT_DOWNLOAD: &str = "download";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub package: PackageConfig,
    /// Directory holding record files.
    pub record_dir: PathBuf,
    /// Limiter category to maximum concurrent holders.
    pub limits: BTreeMap<String, usize>,
}
impl Default for Config {
    fn default() -> Self {
        let record_dir = project_dirs()
            .map(|dirs| dirs.cache_dir().to_path_buf())
            .unwrap_or_else(|| std::env::temp_dir().join("tome"));
        let limits = [(LIMIT_INFO, 1), (LIMIT_SEARCH, 1), (LIMIT_CACHE, 1), (LIMIT_DOWNLOAD, 3)]
            .into_iter()
            .map(|(name, limit)| (name.to_string(), limit))
            .collect();
        Self {
            session: SessionConfig::default(),
            package: PackageConfig::default(),
            record_dir,
            limits,
        }
    }
}

impl Config {
    /// Load configuration from every layer, optionally including an extra
    /// file whose format is picked from its extension.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(dirs) = project_dirs() {
            let user_file = dirs.config_dir().join("config.toml");
            tracing::trace!(path = %user_file.display(), "considering user configuration file");
            figment = figment.merge(Toml::file(user_file));
        }
        if let Some(path) = file {
            figment = merge_file(figment, path)?;
        }
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract and validate from an already assembled [`Figment`].
    pub fn extract(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Extract)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.session.concurrency == 0 {
            exn::bail!(ErrorKind::Invalid("session.concurrency", "must be at least 1".to_string()));
        }
        if let Some((name, _)) = self.limits.iter().find(|(_, limit)| **limit == 0) {
            exn::bail!(ErrorKind::Invalid("limits", format!("category `{name}` has no capacity")));
        }
        let chapter_zero = self.package.chapters.iter().any(|f| f.volume == 0 || f.chapters.contains(&0));
        if self.package.volumes.contains(&0) || chapter_zero {
            exn::bail!(ErrorKind::Invalid("package", "volume and chapter indices start at 1".to_string()));
        }
        Ok(())
    }
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
    Ok(match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file_exact(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
        Some("json") => figment.merge(Json::file_exact(path)),
        _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
    })
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "tome")
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let config = Config::extract(Figment::from(Serialized::defaults(Config::default()))).unwrap();
        assert_eq!(config.session.concurrency, 3);
        assert_eq!(config.session.retries, 3);
        assert_eq!(config.session.timeout_secs, 30);
        assert_eq!(config.package.mode, PackageMode::Book);
        assert_eq!(config.package.lang, "zh");
        assert!(config.package.sync);
        assert_eq!(config.limits.get(LIMIT_DOWNLOAD), Some(&3));
        assert_eq!(config.limits.get(LIMIT_CACHE), Some(&1));
    }

    #[rstest]
    #[case("none", PackageMode::None)]
    #[case("book", PackageMode::Book)]
    #[case("volume", PackageMode::Volume)]
    #[case("chapter", PackageMode::Chapter)]
    fn test_mode_from_toml(#[case] name: &str, #[case] expected: PackageMode) {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::string(&format!("[package]\nmode = \"{name}\"")));
        assert_eq!(Config::extract(figment).unwrap().package.mode, expected);
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let figment = Figment::from(Serialized::defaults(Config::default())).merge(Toml::string("[package]\nmode = \"pdf\""));
        let err = Config::extract(figment).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Extract));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let figment =
            Figment::from(Serialized::defaults(Config::default())).merge(Toml::string("[session]\nconcurrency = 0"));
        let err = Config::extract(figment).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid("session.concurrency", _)));
    }

    #[test]
    fn test_zero_volume_index_rejected() {
        let figment =
            Figment::from(Serialized::defaults(Config::default())).merge(Toml::string("[package]\nvolumes = [0, 2]"));
        assert!(Config::extract(figment).is_err());
    }

    #[test]
    fn test_file_and_environment_layers() {
        Jail::expect_with(|jail| {
            jail.create_file("tome.yaml", "session:\n  concurrency: 5\npackage:\n  volumes: [1, 3]\n")?;
            jail.set_env("TOME_SESSION__RETRIES", "7");
            jail.set_env("TOME_PACKAGE__MODE", "chapter");
            let config = Config::load(Some(Path::new("tome.yaml"))).unwrap();
            assert_eq!(config.session.concurrency, 5);
            assert_eq!(config.session.retries, 7);
            assert_eq!(config.package.volumes, vec![1, 3]);
            assert_eq!(config.package.mode, PackageMode::Chapter);
            Ok(())
        });
    }

    #[test]
    fn test_unsupported_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tome.ini");
        std::fs::write(&path, "concurrency=1").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedFormat(_)));
    }
}
