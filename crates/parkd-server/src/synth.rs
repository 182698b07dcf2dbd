//! Virtual-host synthesis.
//!
//! The document has three sections, each introduced by a
//! `# ---- parkd: <section> ----` marker:
//!
//! 1. `base`: the wildcard server for every `*.<tld>` site on the default runtime
//! 2. `add-ons`: reverse-proxy blocks contributed by enabled add-ons
//! 3. `isolated sites`: one block per site pinned to its own runtime or web root
//!
//! Output depends only on the state and on which sockets the adapter reports,
//! so two passes over the same inputs are byte-identical.

use crate::adapter::{RuntimeSocket, SystemAdapter};
use anyhow::Context;
use parkd_core::addon::FragmentError;
use parkd_core::{
    AddonRegistry, Bindings, ConfigContributor, FragmentContext, ParkdConfig, Placeholder, State,
    TemplateError, TemplateSet, version,
};
use parkd_utils::discovery;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

pub const BASE_SECTION: &str = "base";
pub const ADDON_SECTION: &str = "add-ons";
pub const ISOLATED_SECTION: &str = "isolated sites";

/// A problem that cost one piece of the document but not the whole pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisWarning {
    MissingPath { domain: String },
    MissingSocket { domain: String, version: String },
    UnknownAddon { id: String },
    FragmentFailed { addon: String, error: FragmentError },
}

impl fmt::Display for SynthesisWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPath { domain } => {
                write!(f, "{domain}: no site directory found, not isolated")
            }
            Self::MissingSocket { domain, version } => {
                write!(f, "{domain}: PHP {version} has no socket, not isolated")
            }
            Self::UnknownAddon { id } => write!(f, "unknown add-on {id:?} skipped"),
            Self::FragmentFailed { addon, error } => write!(f, "add-on {addon}: {error}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("no PHP version is installed")]
    NoRuntimeInstalled,
    #[error("default PHP {version} has no socket: {source:#}")]
    NoDefaultSocket {
        version: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("failed to {action}: {source:#}")]
    Adapter {
        action: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl ReconcileError {
    pub(crate) fn adapter(action: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Adapter { action, source }
    }
}

/// A synthesized document and whatever was left out of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesis {
    pub document: String,
    pub warnings: Vec<SynthesisWarning>,
    /// Domains that received an isolated block, in document order.
    pub isolated: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Synthesizer {
    templates: TemplateSet,
    https_port: String,
    warning_floor: String,
}

impl Synthesizer {
    #[must_use]
    pub fn new(templates: TemplateSet, https_port: impl Into<String>, warning_floor: impl Into<String>) -> Self {
        Self {
            templates,
            https_port: https_port.into(),
            warning_floor: warning_floor.into(),
        }
    }

    /// Built-in templates, replaced file by file from `proxy.template_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if an override cannot be read or uses an unknown placeholder.
    pub async fn from_config(config: &ParkdConfig) -> anyhow::Result<Self> {
        let builtin = [
            parkd_core::template::BASE,
            parkd_core::template::BASE_SECURE,
            parkd_core::template::ISOLATED,
            parkd_core::template::ISOLATED_SECURE,
        ];
        let mut sources = builtin.map(str::to_string);

        if let Some(dir) = &config.proxy.template_dir {
            for (source, file) in sources.iter_mut().zip(TemplateSet::FILES) {
                let path = dir.join(file);
                match tokio::fs::read_to_string(&path).await {
                    Ok(text) => {
                        info!("Using template override {}", path.display());
                        *source = text;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(e).with_context(|| format!("Failed to read {}", path.display()));
                    }
                }
            }
        }

        let templates = TemplateSet::from_sources(sources.each_ref().map(String::as_str))?;
        Ok(Self::new(
            templates,
            config.proxy.https_port.clone(),
            config.runtime.isolation_warning_floor.clone(),
        ))
    }

    /// Build the full proxy document for `state`.
    pub async fn synthesize(
        &self,
        state: &State,
        adapter: &dyn SystemAdapter,
        addons: &AddonRegistry,
    ) -> Result<Synthesis, ReconcileError> {
        let installed = adapter.installed_versions_descending().await;
        let default_version = version::effective_default(&state.default_runtime_version, &installed)
            .ok_or(ReconcileError::NoRuntimeInstalled)?;
        let default_socket = adapter.socket_for(&default_version).await.map_err(|source| {
            ReconcileError::NoDefaultSocket {
                version: default_version.clone(),
                source,
            }
        })?;

        let shared = self.shared_bindings(state, adapter);
        let mut warnings = Vec::new();

        let base = self.templates.base(state.secure).render(
            &shared
                .clone()
                .with(Placeholder::DefaultSocket, default_socket.to_string()),
        )?;

        let fragments = self.addon_fragments(state, adapter, addons, &mut warnings);

        let mut isolated = Vec::new();
        let mut blocks = Vec::new();
        for (domain, config) in &state.site_configs {
            let pinned = config.runtime_version().filter(|v| *v != default_version);
            let web_root = config.web_root().filter(|r| *r != ".");
            if pinned.is_none() && web_root.is_none() {
                continue;
            }

            let site_path = match state.site_name(domain) {
                Some(name) => discovery::find_site_path(state, name).await,
                None => None,
            };
            let Some(site_path) = site_path else {
                warn!("Not isolating {}: site directory not found", domain);
                warnings.push(SynthesisWarning::MissingPath {
                    domain: domain.clone(),
                });
                continue;
            };

            let socket = match pinned {
                None => default_socket.clone(),
                Some(version) => match adapter.socket_for(version).await {
                    Ok(socket) => socket,
                    Err(e) => {
                        if version::meets_floor(version, &self.warning_floor) {
                            warn!("Not isolating {}: {:#}", domain, e);
                            warnings.push(SynthesisWarning::MissingSocket {
                                domain: domain.clone(),
                                version: version.to_string(),
                            });
                        } else {
                            debug!("Not isolating {} on legacy PHP {}: {:#}", domain, version, e);
                        }
                        continue;
                    }
                },
            };

            let root = match web_root {
                Some(web_root) => site_path.join(web_root),
                None => site_path,
            };
            blocks.push(self.isolated_block(state, &shared, domain, &root, &socket)?);
            isolated.push(domain.clone());
        }

        let document = assemble(&base, &fragments, &blocks);
        debug!(
            "Synthesized {} bytes, {} isolated sites, {} warnings",
            document.len(),
            isolated.len(),
            warnings.len()
        );
        Ok(Synthesis {
            document,
            warnings,
            isolated,
        })
    }

    /// Synthesize, write the document through the adapter and reload the proxy.
    pub async fn apply(
        &self,
        state: &State,
        adapter: &dyn SystemAdapter,
        addons: &AddonRegistry,
    ) -> Result<Synthesis, ReconcileError> {
        let synthesis = self.synthesize(state, adapter, addons).await?;
        adapter
            .write_proxy_config(&synthesis.document)
            .await
            .map_err(ReconcileError::adapter("write the proxy configuration"))?;
        adapter
            .reload_proxy()
            .await
            .map_err(ReconcileError::adapter("reload the proxy"))?;
        Ok(synthesis)
    }

    fn shared_bindings(&self, state: &State, adapter: &dyn SystemAdapter) -> Bindings {
        let bundle = adapter.certificate_bundle();
        Bindings::new()
            .with(Placeholder::Home, adapter.runtime_home().display().to_string())
            .with(Placeholder::Tld, state.tld.clone())
            .with(Placeholder::HttpListen, state.port.clone())
            .with(Placeholder::HttpListenV6, format!("[::]:{}", state.port))
            .with(Placeholder::HttpsListen, self.https_port.clone())
            .with(Placeholder::HttpsListenV6, format!("[::]:{}", self.https_port))
            .with(Placeholder::Certificate, bundle.certificate.display().to_string())
            .with(Placeholder::CertificateKey, bundle.key.display().to_string())
    }

    fn isolated_block(
        &self,
        state: &State,
        shared: &Bindings,
        domain: &str,
        root: &Path,
        socket: &RuntimeSocket,
    ) -> Result<String, TemplateError> {
        let bindings = shared
            .clone()
            .with(Placeholder::Domain, domain)
            .with(Placeholder::Root, root.display().to_string())
            .with(Placeholder::Socket, socket.to_string());
        let body = self.templates.isolated(state.secure).render(&bindings)?;
        Ok(format!("# isolated: {domain}\n{}", body.trim_end()))
    }

    fn addon_fragments(
        &self,
        state: &State,
        adapter: &dyn SystemAdapter,
        addons: &AddonRegistry,
        warnings: &mut Vec<SynthesisWarning>,
    ) -> Vec<String> {
        let bundle = adapter.certificate_bundle();
        let ctx = FragmentContext {
            tld: state.tld.clone(),
            http_port: state.port.clone(),
            https_port: self.https_port.clone(),
            secure: state.secure,
            certificate: bundle.certificate.display().to_string(),
            certificate_key: bundle.key.display().to_string(),
        };

        let mut out = Vec::new();
        for id in &state.enabled_addons {
            let Some(addon) = addons.get(id) else {
                warn!("Skipping unknown add-on {:?}", id);
                warnings.push(SynthesisWarning::UnknownAddon { id: id.clone() });
                continue;
            };
            let fragments = match addon.fragments(&ctx) {
                Ok(fragments) => fragments,
                Err(error) => {
                    warn!("Skipping add-on {}: {}", id, error);
                    warnings.push(SynthesisWarning::FragmentFailed {
                        addon: id.clone(),
                        error,
                    });
                    continue;
                }
            };
            for fragment in fragments {
                if let Err(error) = fragment.validate() {
                    warn!("Dropping fragment {}: {}", fragment.name, error);
                    warnings.push(SynthesisWarning::FragmentFailed {
                        addon: addon.id().to_string(),
                        error,
                    });
                    continue;
                }
                out.push(format!("# add-on: {}\n{}", fragment.name, fragment.body.trim_end()));
            }
        }
        out
    }
}

fn marker(section: &str) -> String {
    format!("# ---- parkd: {section} ----")
}

fn assemble(base: &str, fragments: &[String], blocks: &[String]) -> String {
    let base = [base.trim_end().to_string()];
    let mut document = String::new();
    for (section, parts) in [
        (BASE_SECTION, &base[..]),
        (ADDON_SECTION, fragments),
        (ISOLATED_SECTION, blocks),
    ] {
        if !document.is_empty() {
            document.push('\n');
        }
        document.push_str(&marker(section));
        document.push('\n');
        for part in parts {
            document.push_str(part);
            document.push_str("\n\n");
        }
    }
    let trimmed = document.trim_end().len();
    document.truncate(trimmed);
    document.push('\n');
    document
}
