use crate::state::{SiteConfig, State};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SiteKind {
    Parked,
    Linked,
}

impl std::fmt::Display for SiteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parked => write!(f, "parked"),
            Self::Linked => write!(f, "linked"),
        }
    }
}

/// A servable site, as produced for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSite {
    pub name: String,
    pub path: PathBuf,
    pub domain: String,
    pub resolved_runtime_version: String,
    pub secure: bool,
    pub kind: SiteKind,
    pub tags: Vec<String>,
    pub category: Option<String>,
}

impl ResolvedSite {
    /// Combine a discovered project with whatever overrides `state` holds for it.
    #[must_use]
    pub fn new(state: &State, name: &str, path: PathBuf, kind: SiteKind) -> Self {
        let domain = state.domain_for(name);
        let config = state.site_configs.get(&domain);
        let resolved_runtime_version = config
            .and_then(SiteConfig::runtime_version)
            .unwrap_or(state.default_runtime_version.as_str())
            .to_string();

        Self {
            name: name.to_string(),
            path,
            resolved_runtime_version,
            secure: state.secure,
            kind,
            tags: config.map(|c| c.tags.clone()).unwrap_or_default(),
            category: config.and_then(|c| c.category.clone()),
            domain,
        }
    }
}

/// Requirements a project declares or implies. Empty fields mean "no opinion".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementRecord {
    pub runtime_constraint: Option<String>,
    pub dependency_runtime_constraint: Option<String>,
    pub web_root: Option<String>,
}

/// What discovery recorded for one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteOverride {
    pub domain: String,
    /// Empty when the default runtime already satisfies the project.
    pub resolved_version: String,
    pub web_root: String,
    pub tags: Vec<String>,
    pub category: Option<String>,
}

impl SiteOverride {
    #[must_use]
    pub fn from_config(domain: &str, config: &SiteConfig) -> Self {
        Self {
            domain: domain.to_string(),
            resolved_version: config.runtime_version().unwrap_or_default().to_string(),
            web_root: config.web_root().unwrap_or_default().to_string(),
            tags: config.tags.clone(),
            category: config.category.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_site_prefers_override_version() {
        let mut state = State {
            default_runtime_version: "8.3".to_string(),
            secure: true,
            ..State::default()
        };
        state.update_site_config("legacy", |c| {
            c.runtime_version = Some("7.4".to_string());
            c.tags = vec!["client".to_string()];
        });

        let legacy = ResolvedSite::new(&state, "legacy", PathBuf::from("/srv/legacy"), SiteKind::Parked);
        let fresh = ResolvedSite::new(&state, "fresh", PathBuf::from("/srv/fresh"), SiteKind::Linked);

        assert_eq!(legacy.domain, "legacy.test");
        assert_eq!(legacy.resolved_runtime_version, "7.4");
        assert_eq!(legacy.tags, vec!["client"]);
        assert!(legacy.secure);
        assert_eq!(fresh.resolved_runtime_version, "8.3");
        assert_eq!(fresh.kind.to_string(), "linked");
    }

    #[test]
    fn override_record_uses_empty_strings() {
        let config = SiteConfig {
            web_root: Some("public".to_string()),
            ..SiteConfig::default()
        };
        let record = SiteOverride::from_config("blog.test", &config);
        assert_eq!(record.resolved_version, "");
        assert_eq!(record.web_root, "public");
    }
}
