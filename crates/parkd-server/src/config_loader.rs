use parkd_core::ParkdConfig;
use parkd_core::config::Paths;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const HOME_ENV: &str = "PARKD_HOME";
pub const CONFIG_ENV: &str = "PARKD_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{CONFIG_ENV} points at {}, which does not exist", .0.display())]
    Missing(PathBuf),
}

/// Where a setting came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    Default,
    File(PathBuf),
    EnvVar(String),
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::File(p) => write!(f, "{}", p.display()),
            Self::EnvVar(k) => write!(f, "env:{k}"),
        }
    }
}

/// The loaded configuration and the directories it resolves against.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    pub config: ParkdConfig,
    pub config_path: PathBuf,
    pub base_dir: PathBuf,
    pub base_provenance: Provenance,
}

impl ConfigLoader {
    /// Load using the process environment.
    pub async fn load() -> Result<Self, ConfigError> {
        let home = std::env::var_os(HOME_ENV).map(PathBuf::from);
        let explicit = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        Self::load_from(home, explicit).await
    }

    /// Load with `home` standing in for `PARKD_HOME` and `explicit` for
    /// `PARKD_CONFIG`.
    pub async fn load_from(
        home: Option<PathBuf>,
        explicit: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let (base_dir, base_provenance) = match home {
            Some(home) => {
                info!("Using {} from {}", home.display(), HOME_ENV);
                (home, Provenance::EnvVar(HOME_ENV.to_string()))
            }
            None => (Self::default_base_dir(), Provenance::Default),
        };

        let (config_path, required) = match explicit {
            Some(path) => (path, true),
            None if base_provenance != Provenance::Default => (base_dir.join("config.toml"), false),
            None => (Self::global_config_path(), false),
        };

        let config = Self::read_config(&config_path, required).await?;
        Ok(Self {
            config,
            config_path,
            base_dir,
            base_provenance,
        })
    }

    /// Every location, with configured entries taking precedence.
    #[must_use]
    pub fn paths(&self) -> Paths {
        self.config.paths.resolve(&self.base_dir)
    }

    /// Where the effective value of `key` came from.
    #[must_use]
    pub fn explain(&self, key: &str) -> Provenance {
        match key {
            "paths.base" => self.base_provenance.clone(),
            _ if self.config_path.exists() => Provenance::File(self.config_path.clone()),
            _ => Provenance::Default,
        }
    }

    fn global_config_path() -> PathBuf {
        directories::ProjectDirs::from("dev", "parkd", "parkd").map_or_else(
            || PathBuf::from("parkd-config.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }

    fn default_base_dir() -> PathBuf {
        directories::ProjectDirs::from("dev", "parkd", "parkd").map_or_else(
            || PathBuf::from(".parkd"),
            |dirs| dirs.data_dir().to_path_buf(),
        )
    }

    async fn read_config(path: &Path, required: bool) -> Result<ParkdConfig, ConfigError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if required {
                    return Err(ConfigError::Missing(path.to_path_buf()));
                }
                debug!("No config at {}, using defaults", path.display());
                return Ok(ParkdConfig::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn home_override_without_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::load_from(Some(dir.path().to_path_buf()), None)
            .await
            .unwrap();

        assert_eq!(loader.config, ParkdConfig::default());
        assert_eq!(loader.paths().state, dir.path().join("state.json"));
        assert_eq!(
            loader.explain("paths.base"),
            Provenance::EnvVar(HOME_ENV.to_string())
        );
        assert_eq!(loader.explain("runtime.auto_install"), Provenance::Default);
    }

    #[tokio::test]
    async fn home_config_file_is_read() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[runtime]\nauto_install = true\n\n[paths]\nstate = \"/var/lib/parkd/state.json\"\n",
        )
        .unwrap();

        let loader = ConfigLoader::load_from(Some(dir.path().to_path_buf()), None)
            .await
            .unwrap();

        assert!(loader.config.runtime.auto_install);
        assert_eq!(
            loader.paths().state,
            PathBuf::from("/var/lib/parkd/state.json")
        );
        assert_eq!(
            loader.explain("runtime.auto_install").to_string(),
            dir.path().join("config.toml").display().to_string()
        );
    }

    #[tokio::test]
    async fn explicit_config_must_exist() {
        let dir = tempdir().unwrap();
        let err = ConfigLoader::load_from(
            Some(dir.path().to_path_buf()),
            Some(dir.path().join("nope.toml")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[tokio::test]
    async fn malformed_config_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("parkd.toml");
        std::fs::write(&path, "[hosts\nmanage = false").unwrap();

        let err = ConfigLoader::load_from(Some(dir.path().to_path_buf()), Some(path))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
