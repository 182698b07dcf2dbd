//! Workflows over the persisted state.
//!
//! Every mutating workflow follows the same shape: take the store lock,
//! persist the change, then reconcile the proxy from the new state while the
//! lock is still held. A failure before the write is reported as
//! [`WorkflowError::State`] (or a rejection); a failure after it as
//! [`WorkflowError::Reconcile`], meaning the request is recorded and a later
//! [`Engine::reconcile`] will retry it.

use crate::adapter::{LinuxAdapter, SystemAdapter};
use crate::certs;
use crate::store::{StateGuard, StateStore, StoreError};
use crate::synth::{ReconcileError, Synthesis, SynthesisWarning, Synthesizer};
use anyhow::Context;
use parkd_core::config::Paths;
use parkd_core::{
    AddonRegistry, ParkdConfig, RequirementRecord, ResolvedSite, SiteKind, SiteOverride, State,
    version,
};
use parkd_utils::{detect, discovery};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("request was not recorded: {0}")]
    State(#[from] StoreError),
    #[error("request was not recorded: {0}")]
    Rejected(String),
    #[error("request was not recorded: no site named {0:?}")]
    UnknownSite(String),
    #[error("request was not recorded: could not install PHP {version}: {source:#}")]
    Install {
        version: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("request was recorded, but the proxy was not updated: {0}")]
    Reconcile(#[from] ReconcileError),
}

impl WorkflowError {
    /// Whether the state change survived the failure.
    #[must_use]
    pub const fn was_recorded(&self) -> bool {
        matches!(self, Self::Reconcile(_))
    }
}

/// Outcome of a successful workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub warnings: Vec<SynthesisWarning>,
    /// Per-site records written by discovery.
    pub overrides: Vec<SiteOverride>,
    /// Domains served by their own block after reconciliation.
    pub isolated: Vec<String>,
}

impl Report {
    fn from_synthesis(synthesis: Synthesis, overrides: Vec<SiteOverride>) -> Self {
        Self {
            warnings: synthesis.warnings,
            overrides,
            isolated: synthesis.isolated,
        }
    }
}

#[derive(Debug)]
pub struct Engine {
    store: StateStore,
    adapter: Arc<dyn SystemAdapter>,
    addons: AddonRegistry,
    synthesizer: Synthesizer,
    config: ParkdConfig,
}

impl Engine {
    #[must_use]
    pub fn new(
        store: StateStore,
        adapter: Arc<dyn SystemAdapter>,
        synthesizer: Synthesizer,
        config: ParkdConfig,
    ) -> Self {
        Self {
            store,
            adapter,
            addons: AddonRegistry::builtin(),
            synthesizer,
            config,
        }
    }

    /// Open the store at `paths.state` and drive the local machine.
    ///
    /// # Errors
    ///
    /// Returns an error if the state or a template override cannot be loaded.
    pub async fn open(config: ParkdConfig, paths: Paths) -> anyhow::Result<Self> {
        let store = StateStore::open(&paths.state)
            .await
            .context("Failed to open parkd state")?;
        let synthesizer = Synthesizer::from_config(&config).await?;
        let adapter = Arc::new(LinuxAdapter::new(&config, paths));
        Ok(Self::new(store, adapter, synthesizer, config))
    }

    #[must_use]
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    #[must_use]
    pub fn addons(&self) -> &AddonRegistry {
        &self.addons
    }

    /// Register a directory whose subdirectories are served as sites.
    pub async fn park(&self, path: &Path) -> Result<Report, WorkflowError> {
        let mut guard = self.store.lock().await;
        guard.apply(|s| s.add_path(path)).await?;
        let overrides = self
            .discover_locked(&mut guard, |site| {
                site.kind == SiteKind::Parked && site.path.parent() == Some(path)
            })
            .await?;
        self.finish(&guard, overrides).await
    }

    /// Stop serving a parked directory. Overrides of sites that disappear
    /// with it are dropped.
    pub async fn forget(&self, path: &Path) -> Result<Report, WorkflowError> {
        let mut guard = self.store.lock().await;
        let mut after = State::clone(&guard);
        after.remove_path(path);
        let orphans = orphaned_overrides(&guard, &after).await;
        guard
            .apply(|s| {
                s.remove_path(path);
                for domain in &orphans {
                    s.site_configs.remove(domain);
                }
                Ok(())
            })
            .await?;
        self.finish(&guard, Vec::new()).await
    }

    pub async fn link(&self, name: &str, path: &Path) -> Result<Report, WorkflowError> {
        let mut guard = self.store.lock().await;
        guard.apply(|s| s.add_link(name, path)).await?;
        let overrides = self
            .discover_locked(&mut guard, |site| site.name == name)
            .await?;
        self.finish(&guard, overrides).await
    }

    pub async fn unlink(&self, name: &str) -> Result<Report, WorkflowError> {
        let mut guard = self.store.lock().await;
        let name = guard.site_name(name).unwrap_or(name).to_string();
        if !guard.links.contains_key(&name) {
            return Err(WorkflowError::UnknownSite(name));
        }
        let mut after = State::clone(&guard);
        after.remove_link(&name);
        let orphans = orphaned_overrides(&guard, &after).await;
        guard
            .apply(|s| {
                s.remove_link(&name);
                for domain in &orphans {
                    s.site_configs.remove(domain);
                }
                Ok(())
            })
            .await?;
        self.finish(&guard, Vec::new()).await
    }

    pub async fn ignore(&self, path: &Path) -> Result<Report, WorkflowError> {
        let mut guard = self.store.lock().await;
        guard.apply(|s| s.add_ignore(path)).await?;
        self.finish(&guard, Vec::new()).await
    }

    pub async fn unignore(&self, path: &Path) -> Result<Report, WorkflowError> {
        let mut guard = self.store.lock().await;
        guard.apply(|s| Ok(s.remove_ignore(path))).await?;
        let overrides = self
            .discover_locked(&mut guard, |site| site.path == path)
            .await?;
        self.finish(&guard, overrides).await
    }

    /// Pin a site to `version`, installing it first if needed.
    pub async fn isolate(&self, site: &str, version: &str) -> Result<Report, WorkflowError> {
        let version = parse_version(version)?;
        let mut guard = self.store.lock().await;
        let name = require_site(&guard, site).await?;
        self.ensure_installed(&version).await?;
        guard
            .apply(|s| {
                s.update_site_config(&name, |c| {
                    c.runtime_version = Some(version.clone());
                    c.pinned = true;
                });
                Ok(())
            })
            .await?;
        info!("Isolated {} on PHP {}", guard.domain_for(&name), version);
        self.finish(&guard, Vec::new()).await
    }

    pub async fn unisolate(&self, site: &str) -> Result<Report, WorkflowError> {
        let mut guard = self.store.lock().await;
        let name = require_site(&guard, site).await?;
        guard
            .apply(|s| {
                s.update_site_config(&name, |c| {
                    c.runtime_version = None;
                    c.pinned = false;
                });
                Ok(())
            })
            .await?;
        self.finish(&guard, Vec::new()).await
    }

    /// Make `version` the default runtime, installing it first if needed.
    pub async fn use_version(&self, version: &str) -> Result<Report, WorkflowError> {
        let version = parse_version(version)?;
        let mut guard = self.store.lock().await;
        self.ensure_installed(&version).await?;
        guard
            .apply(|s| {
                s.default_runtime_version.clone_from(&version);
                Ok(())
            })
            .await?;
        info!("Default PHP is now {}", version);
        self.finish(&guard, Vec::new()).await
    }

    /// Toggle TLS. Enabling it issues the certificate before reconciling.
    pub async fn set_secure(&self, secure: bool) -> Result<Report, WorkflowError> {
        let mut guard = self.store.lock().await;
        guard
            .apply(|s| {
                s.secure = secure;
                Ok(())
            })
            .await?;
        if secure {
            certs::refresh(&guard, &self.config.proxy.dashboard, self.adapter.as_ref()).await?;
        }
        self.finish(&guard, Vec::new()).await
    }

    pub async fn set_tld(&self, tld: &str) -> Result<Report, WorkflowError> {
        let mut guard = self.store.lock().await;
        guard.apply(|s| s.set_tld(tld)).await?;
        if guard.secure {
            certs::refresh(&guard, &self.config.proxy.dashboard, self.adapter.as_ref()).await?;
        }
        self.finish(&guard, Vec::new()).await
    }

    pub async fn set_port(&self, port: &str) -> Result<Report, WorkflowError> {
        let mut guard = self.store.lock().await;
        guard.apply(|s| s.set_port(port)).await?;
        self.finish(&guard, Vec::new()).await
    }

    pub async fn enable_addon(&self, id: &str) -> Result<Report, WorkflowError> {
        if !self.addons.contains(id) {
            let available: Vec<_> = self.addons.ids().collect();
            return Err(WorkflowError::Rejected(format!(
                "unknown add-on {id:?} (available: {})",
                available.join(", ")
            )));
        }
        let mut guard = self.store.lock().await;
        guard.apply(|s| Ok(s.set_addon_enabled(id, true))).await?;
        self.finish(&guard, Vec::new()).await
    }

    pub async fn disable_addon(&self, id: &str) -> Result<Report, WorkflowError> {
        let mut guard = self.store.lock().await;
        guard.apply(|s| Ok(s.set_addon_enabled(id, false))).await?;
        self.finish(&guard, Vec::new()).await
    }

    /// Replace a site's tags and category. Does not touch the proxy.
    pub async fn tag(
        &self,
        site: &str,
        tags: &[String],
        category: Option<&str>,
    ) -> Result<Report, WorkflowError> {
        let mut guard = self.store.lock().await;
        let name = require_site(&guard, site).await?;

        let mut seen = BTreeSet::new();
        let tags: Vec<String> = tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty() && seen.insert(t.clone()))
            .collect();
        let category = category
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        guard
            .apply(|s| {
                s.update_site_config(&name, |c| {
                    c.tags = tags;
                    c.category = category;
                });
                Ok(())
            })
            .await?;

        let domain = guard.domain_for(&name);
        let config = guard.site_config(&domain).cloned().unwrap_or_default();
        Ok(Report {
            overrides: vec![SiteOverride::from_config(&domain, &config)],
            ..Report::default()
        })
    }

    /// Detect requirements for every site and record what they resolve to.
    pub async fn discover(&self) -> Result<Report, WorkflowError> {
        let mut guard = self.store.lock().await;
        let overrides = self.discover_locked(&mut guard, |_| true).await?;
        self.finish(&guard, overrides).await
    }

    /// Rebuild and apply the proxy configuration from the current state.
    pub async fn reconcile(&self) -> Result<Report, WorkflowError> {
        let guard = self.store.lock().await;
        self.finish(&guard, Vec::new()).await
    }

    /// Reissue the certificate for the current set of domains, then reconcile.
    pub async fn refresh_certificates(&self) -> Result<Report, WorkflowError> {
        let guard = self.store.lock().await;
        certs::refresh(&guard, &self.config.proxy.dashboard, self.adapter.as_ref()).await?;
        self.finish(&guard, Vec::new()).await
    }

    pub async fn sites(&self) -> Vec<ResolvedSite> {
        let state = self.store.snapshot().await;
        discovery::resolve_sites(&state).await
    }

    async fn finish(
        &self,
        state: &State,
        overrides: Vec<SiteOverride>,
    ) -> Result<Report, WorkflowError> {
        let synthesis = self
            .synthesizer
            .apply(state, self.adapter.as_ref(), &self.addons)
            .await?;

        if self.config.hosts.manage {
            let domains = certs::collect_domains(state, &self.config.proxy.dashboard).await;
            self.adapter
                .update_hosts_file(&certs::hosts_domains(&domains))
                .await
                .map_err(ReconcileError::adapter("update the hosts file"))?;
        }

        for warning in &synthesis.warnings {
            warn!("{}", warning);
        }
        info!(
            "Proxy reconciled ({} isolated sites)",
            synthesis.isolated.len()
        );
        Ok(Report::from_synthesis(synthesis, overrides))
    }

    async fn discover_locked(
        &self,
        guard: &mut StateGuard<'_>,
        wanted: impl Fn(&ResolvedSite) -> bool,
    ) -> Result<Vec<SiteOverride>, StoreError> {
        let sites: Vec<ResolvedSite> = discovery::resolve_sites(guard)
            .await
            .into_iter()
            .filter(|site| wanted(site))
            .collect();
        if sites.is_empty() {
            return Ok(Vec::new());
        }

        let mut installed = self.adapter.installed_versions_descending().await;
        // Resolved against the default the scan started with, so a runtime
        // installed below is recorded as the site's own pin.
        let default =
            version::effective_default(&guard.default_runtime_version, &installed).unwrap_or_default();
        let mut found = Vec::new();

        for site in sites {
            let record = detect::detect(&site.path).await.record;
            let mut resolved = String::new();

            if let Some(constraint) = runtime_constraint(&record) {
                resolved = version::resolve(constraint, &installed, &default);

                let nothing_compatible = version::resolve(constraint, &installed, "").is_empty();
                if nothing_compatible
                    && self.config.runtime.auto_install
                    && let Some(base) = version::base_version(constraint)
                {
                    match self.adapter.install_runtime_version(&base).await {
                        Ok(()) => {
                            installed = self.adapter.installed_versions_descending().await;
                            resolved = version::resolve(constraint, &installed, &default);
                        }
                        Err(e) => warn!("Could not install PHP {} for {}: {:#}", base, site.name, e),
                    }
                }
            }

            found.push((site.domain, record, resolved));
        }

        guard
            .apply(|s| {
                for (domain, record, resolved) in &found {
                    s.update_site_config(domain, |c| {
                        if let Some(constraint) = runtime_constraint(record) {
                            let still_valid = c
                                .runtime_version()
                                .is_some_and(|v| version::satisfies(constraint, v));
                            if !c.pinned && !still_valid {
                                c.runtime_version =
                                    (!resolved.is_empty()).then(|| resolved.clone());
                            }
                        }
                        if let Some(web_root) = &record.web_root {
                            c.web_root = Some(web_root.clone());
                        }
                        if let Some(node) = &record.dependency_runtime_constraint {
                            c.dependency_version = Some(node.clone());
                        }
                    });
                }
                Ok(())
            })
            .await?;

        Ok(found
            .iter()
            .map(|(domain, ..)| {
                let config = guard.site_config(domain).cloned().unwrap_or_default();
                SiteOverride::from_config(domain, &config)
            })
            .collect())
    }

    async fn ensure_installed(&self, version: &str) -> Result<(), WorkflowError> {
        let installed = self.adapter.installed_versions_descending().await;
        if installed.iter().any(|v| v == version) {
            return Ok(());
        }

        self.adapter
            .install_runtime_version(version)
            .await
            .map_err(|source| WorkflowError::Install {
                version: version.to_string(),
                source,
            })?;

        let installed = self.adapter.installed_versions_descending().await;
        if installed.iter().any(|v| v == version) {
            Ok(())
        } else {
            Err(WorkflowError::Install {
                version: version.to_string(),
                source: anyhow::anyhow!("still missing after installation"),
            })
        }
    }
}

fn runtime_constraint(record: &RequirementRecord) -> Option<&str> {
    record
        .runtime_constraint
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
}

fn parse_version(version: &str) -> Result<String, WorkflowError> {
    let version = version.trim();
    match version::parse_major_minor(version) {
        Some(v) => Ok(format!("{}.{}", v.major, v.minor)),
        None => Err(WorkflowError::Rejected(format!(
            "{version:?} is not a PHP version"
        ))),
    }
}

async fn require_site(state: &State, site: &str) -> Result<String, WorkflowError> {
    let name = state.site_name(site).unwrap_or(site).to_string();
    if discovery::find_site_path(state, &name).await.is_none() {
        return Err(WorkflowError::UnknownSite(name));
    }
    Ok(name)
}

/// Override records of sites servable in `before` but not in `after`.
async fn orphaned_overrides(before: &State, after: &State) -> Vec<String> {
    let mut orphans = Vec::new();
    for domain in before.site_configs.keys() {
        let Some(name) = before.site_name(domain) else {
            continue;
        };
        if discovery::find_site_path(before, name).await.is_some()
            && discovery::find_site_path(after, name).await.is_none()
        {
            orphans.push(domain.clone());
        }
    }
    orphans
}
