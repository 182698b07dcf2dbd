use parkd_core::{SiteConfig, State, StateError};
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read state file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write state file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("state file {} is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize state: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] StateError),
}

/// Owner of the persisted state document.
///
/// All reads and writes go through one exclusive lock. Mutations are applied
/// to a copy, written in full, and only then become visible in memory, so the
/// in-memory state never runs ahead of what is on disk.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: Mutex<State>,
}

/// Exclusive access to the state, held across a mutation and the
/// reconciliation that follows it.
#[derive(Debug)]
pub struct StateGuard<'a> {
    path: &'a Path,
    state: MutexGuard<'a, State>,
}

impl Deref for StateGuard<'_> {
    type Target = State;

    fn deref(&self) -> &State {
        &self.state
    }
}

impl StateGuard<'_> {
    /// Mutate, persist the whole document, then publish the new state.
    pub async fn apply<T>(
        &mut self,
        edit: impl FnOnce(&mut State) -> Result<T, StateError>,
    ) -> Result<T, StoreError> {
        let mut next = self.state.clone();
        let out = edit(&mut next)?;
        write_state(self.path, &next).await?;
        *self.state = next;
        Ok(out)
    }

    /// Rewrite the document as it currently is.
    pub async fn save(&self) -> Result<(), StoreError> {
        write_state(self.path, &self.state).await
    }
}

impl StateStore {
    /// Load the state at `path`, creating it with the default shape if missing.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = load(&path).await?;
        info!("State file location: {}", path.display());
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn lock(&self) -> StateGuard<'_> {
        StateGuard {
            path: &self.path,
            state: self.state.lock().await,
        }
    }

    /// A copy of the current state.
    pub async fn snapshot(&self) -> State {
        self.state.lock().await.clone()
    }

    /// Re-read the document from disk, replacing the in-memory copy.
    pub async fn load(&self) -> Result<(), StoreError> {
        let mut guard = self.state.lock().await;
        *guard = load(&self.path).await?;
        Ok(())
    }

    pub async fn save(&self) -> Result<(), StoreError> {
        self.lock().await.save().await
    }

    pub async fn add_path(&self, path: &Path) -> Result<bool, StoreError> {
        self.mutate(|s| s.add_path(path)).await
    }

    pub async fn remove_path(&self, path: &Path) -> Result<bool, StoreError> {
        self.mutate(|s| Ok(s.remove_path(path))).await
    }

    pub async fn add_link(&self, name: &str, path: &Path) -> Result<bool, StoreError> {
        self.mutate(|s| s.add_link(name, path)).await
    }

    pub async fn remove_link(&self, name: &str) -> Result<Option<PathBuf>, StoreError> {
        self.mutate(|s| Ok(s.remove_link(name))).await
    }

    pub async fn add_ignore(&self, path: &Path) -> Result<bool, StoreError> {
        self.mutate(|s| s.add_ignore(path)).await
    }

    pub async fn remove_ignore(&self, path: &Path) -> Result<bool, StoreError> {
        self.mutate(|s| Ok(s.remove_ignore(path))).await
    }

    pub async fn set_site_config(&self, domain: &str, config: SiteConfig) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.set_site_config(domain, config);
            Ok(())
        })
        .await
    }

    pub async fn set_addon_enabled(&self, id: &str, enabled: bool) -> Result<bool, StoreError> {
        self.mutate(|s| Ok(s.set_addon_enabled(id, enabled))).await
    }

    pub async fn set_secure(&self, secure: bool) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.secure = secure;
            Ok(())
        })
        .await
    }

    pub async fn set_tld(&self, tld: &str) -> Result<bool, StoreError> {
        self.mutate(|s| s.set_tld(tld)).await
    }

    pub async fn set_port(&self, port: &str) -> Result<bool, StoreError> {
        self.mutate(|s| s.set_port(port)).await
    }

    pub async fn set_default_runtime_version(&self, version: &str) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.default_runtime_version = version.trim().to_string();
            Ok(())
        })
        .await
    }

    async fn mutate<T>(
        &self,
        edit: impl FnOnce(&mut State) -> Result<T, StateError>,
    ) -> Result<T, StoreError> {
        self.lock().await.apply(edit).await
    }
}

async fn load(path: &Path) -> Result<State, StoreError> {
    let mut state = match fs::read_to_string(path).await {
        Ok(content) if content.trim().is_empty() => State::default(),
        Ok(content) => serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let state = State::default();
            write_state(path, &state).await?;
            debug!("Created state file {}", path.display());
            state
        }
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    state.heal();
    Ok(state)
}

async fn write_state(path: &Path, state: &State) -> Result<(), StoreError> {
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let content = serde_json::to_string_pretty(state).map_err(StoreError::Serialize)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, content).await.map_err(write_err)?;
    fs::rename(&tmp, path).await.map_err(write_err)?;
    Ok(())
}
