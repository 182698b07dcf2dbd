use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub const DEFAULT_TLD: &str = "test";
pub const DEFAULT_PORT: &str = "80";

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("invalid site name {0:?}: names must be non-empty, must not contain '/', '\"' or whitespace and must not start with '.'")]
    InvalidSiteName(String),
    #[error("path {} is not absolute", .0.display())]
    RelativePath(PathBuf),
    #[error("invalid top-level domain {0:?}")]
    InvalidTld(String),
    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

/// The persisted description of everything parkd should serve.
///
/// Every collection tolerates being absent or `null` in the stored document;
/// [`State::heal`] restores the scalar defaults after loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct State {
    /// Suffix appended to site names to build hostnames.
    #[serde(deserialize_with = "nullable")]
    pub tld: String,
    /// Parked directories. Insertion ordered, no duplicates.
    #[serde(deserialize_with = "nullable")]
    pub paths: Vec<PathBuf>,
    /// Explicit site name to project path registrations.
    #[serde(deserialize_with = "nullable")]
    pub links: BTreeMap<String, PathBuf>,
    /// Per-site overrides keyed by fully-qualified domain.
    #[serde(deserialize_with = "nullable")]
    pub site_configs: BTreeMap<String, SiteConfig>,
    /// Paths excluded from discovery even when under a parked directory.
    #[serde(deserialize_with = "nullable")]
    pub ignored: BTreeSet<PathBuf>,
    #[serde(deserialize_with = "nullable")]
    pub secure: bool,
    #[serde(deserialize_with = "nullable")]
    pub port: String,
    #[serde(deserialize_with = "nullable")]
    pub default_runtime_version: String,
    /// Add-on identifiers, in the order they were enabled.
    #[serde(deserialize_with = "nullable")]
    pub enabled_addons: Vec<String>,
}

/// Overrides recorded for a single site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_version: Option<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Set when the runtime was chosen by hand. Discovery never replaces such a pin.
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "is_false")]
    pub pinned: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

impl SiteConfig {
    /// True when the record carries no information worth persisting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        non_empty(self.runtime_version.as_deref()).is_none()
            && non_empty(self.web_root.as_deref()).is_none()
            && non_empty(self.dependency_version.as_deref()).is_none()
            && self.tags.is_empty()
            && non_empty(self.category.as_deref()).is_none()
    }

    #[must_use]
    pub fn runtime_version(&self) -> Option<&str> {
        non_empty(self.runtime_version.as_deref())
    }

    #[must_use]
    pub fn web_root(&self) -> Option<&str> {
        non_empty(self.web_root.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl Default for State {
    fn default() -> Self {
        Self {
            tld: DEFAULT_TLD.to_string(),
            paths: Vec::new(),
            links: BTreeMap::new(),
            site_configs: BTreeMap::new(),
            ignored: BTreeSet::new(),
            secure: false,
            port: DEFAULT_PORT.to_string(),
            default_runtime_version: String::new(),
            enabled_addons: Vec::new(),
        }
    }
}

/// Treats an explicit `null` the same as a missing field.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl State {
    /// Restore scalar defaults a partially-shaped document left blank and
    /// qualify any bare site names used as override keys.
    pub fn heal(&mut self) {
        if self.tld.trim().is_empty() {
            self.tld = DEFAULT_TLD.to_string();
        }
        if self.port.trim().is_empty() {
            self.port = DEFAULT_PORT.to_string();
        }
        let mut seen = BTreeSet::new();
        self.paths.retain(|p| seen.insert(p.clone()));
        let mut seen = BTreeSet::new();
        self.enabled_addons.retain(|a| seen.insert(a.clone()));

        let configs = std::mem::take(&mut self.site_configs);
        let (qualified, bare): (Vec<_>, Vec<_>) = configs
            .into_iter()
            .partition(|(key, _)| self.site_name(key).is_some());
        self.site_configs.extend(qualified);
        for (name, config) in bare {
            let domain = self.domain_for(&name);
            self.site_configs.entry(domain).or_insert(config);
        }

        for config in self.site_configs.values_mut() {
            if config.runtime_version().is_none() {
                config.pinned = false;
            }
        }
        self.site_configs.retain(|_, config| !config.is_empty());
    }

    /// `name.tld` for a bare site name.
    #[must_use]
    pub fn domain_for(&self, name: &str) -> String {
        format!("{name}.{}", self.tld)
    }

    /// Qualify a site name, leaving already-qualified domains untouched.
    #[must_use]
    pub fn qualify(&self, name_or_domain: &str) -> String {
        if self.site_name(name_or_domain).is_some() {
            name_or_domain.to_string()
        } else {
            self.domain_for(name_or_domain)
        }
    }

    /// The bare site name of a domain under the current TLD.
    #[must_use]
    pub fn site_name<'a>(&self, domain: &'a str) -> Option<&'a str> {
        domain
            .strip_suffix(self.tld.as_str())
            .and_then(|rest| rest.strip_suffix('.'))
            .filter(|name| !name.is_empty())
    }

    #[must_use]
    pub fn is_ignored(&self, path: &Path) -> bool {
        self.ignored.contains(path)
    }

    pub fn add_path(&mut self, path: &Path) -> Result<bool, StateError> {
        ensure_absolute(path)?;
        if self.paths.iter().any(|p| p == path) {
            return Ok(false);
        }
        self.paths.push(path.to_path_buf());
        Ok(true)
    }

    pub fn remove_path(&mut self, path: &Path) -> bool {
        let before = self.paths.len();
        self.paths.retain(|p| p != path);
        before != self.paths.len()
    }

    /// Register `name` for `path`. Re-linking a name to a new path replaces it.
    pub fn add_link(&mut self, name: &str, path: &Path) -> Result<bool, StateError> {
        validate_site_name(name)?;
        ensure_absolute(path)?;
        if self.links.get(name).is_some_and(|existing| existing == path) {
            return Ok(false);
        }
        self.links.insert(name.to_string(), path.to_path_buf());
        Ok(true)
    }

    pub fn remove_link(&mut self, name: &str) -> Option<PathBuf> {
        self.links.remove(name)
    }

    pub fn add_ignore(&mut self, path: &Path) -> Result<bool, StateError> {
        ensure_absolute(path)?;
        Ok(self.ignored.insert(path.to_path_buf()))
    }

    pub fn remove_ignore(&mut self, path: &Path) -> bool {
        self.ignored.remove(path)
    }

    #[must_use]
    pub fn site_config(&self, name_or_domain: &str) -> Option<&SiteConfig> {
        self.site_configs.get(&self.qualify(name_or_domain))
    }

    /// Store `config` for a site; an empty record removes the entry.
    pub fn set_site_config(&mut self, name_or_domain: &str, config: SiteConfig) {
        let domain = self.qualify(name_or_domain);
        if config.is_empty() {
            self.site_configs.remove(&domain);
        } else {
            self.site_configs.insert(domain, config);
        }
    }

    /// Apply `edit` to a site's record, creating it when missing.
    pub fn update_site_config(&mut self, name_or_domain: &str, edit: impl FnOnce(&mut SiteConfig)) {
        let domain = self.qualify(name_or_domain);
        let mut config = self.site_configs.remove(&domain).unwrap_or_default();
        edit(&mut config);
        self.set_site_config(&domain, config);
    }

    pub fn set_addon_enabled(&mut self, id: &str, enabled: bool) -> bool {
        let present = self.enabled_addons.iter().any(|a| a == id);
        match (present, enabled) {
            (false, true) => {
                self.enabled_addons.push(id.to_string());
                true
            }
            (true, false) => {
                self.enabled_addons.retain(|a| a != id);
                true
            }
            _ => false,
        }
    }

    /// Change the TLD, re-keying every site override under the new suffix.
    pub fn set_tld(&mut self, tld: &str) -> Result<bool, StateError> {
        let tld = tld.trim().trim_start_matches('.');
        if tld.is_empty() || tld.contains('/') || tld.contains(char::is_whitespace) {
            return Err(StateError::InvalidTld(tld.to_string()));
        }
        if tld == self.tld {
            return Ok(false);
        }

        let configs = std::mem::take(&mut self.site_configs);
        let old = std::mem::replace(&mut self.tld, tld.to_string());
        for (domain, config) in configs {
            let name = domain
                .strip_suffix(old.as_str())
                .and_then(|rest| rest.strip_suffix('.'))
                .unwrap_or(&domain);
            self.site_configs.insert(self.domain_for(name), config);
        }
        Ok(true)
    }

    pub fn set_port(&mut self, port: &str) -> Result<bool, StateError> {
        let port = port.trim();
        if port.parse::<u16>().map_or(true, |p| p == 0) {
            return Err(StateError::InvalidPort(port.to_string()));
        }
        if port == self.port {
            return Ok(false);
        }
        self.port = port.to_string();
        Ok(true)
    }
}

pub fn validate_site_name(name: &str) -> Result<(), StateError> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '"'])
        || name.contains(char::is_whitespace)
    {
        return Err(StateError::InvalidSiteName(name.to_string()));
    }
    Ok(())
}

fn ensure_absolute(path: &Path) -> Result<(), StateError> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(StateError::RelativePath(path.to_path_buf()))
    }
}

/// JSON schema of the persisted state document.
#[must_use]
pub fn schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(State)).unwrap_or_default()
}
