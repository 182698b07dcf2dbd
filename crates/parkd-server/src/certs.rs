use crate::adapter::SystemAdapter;
use crate::synth::ReconcileError;
use parkd_core::State;
use parkd_utils::discovery;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Every name the shared certificate must cover, sorted.
///
/// The dashboard, the TLD wildcard, each link and each visible project of
/// each parked directory. Unreadable parked directories are skipped.
pub async fn collect_domains(state: &State, dashboard: &str) -> Vec<String> {
    let mut domains = BTreeSet::new();
    domains.insert(state.domain_for(dashboard));
    domains.insert(format!("*.{}", state.tld));

    for name in state.links.keys() {
        domains.insert(state.domain_for(name));
    }

    for root in &state.paths {
        match discovery::parked_projects(root).await {
            Ok(projects) => {
                for (name, path) in projects {
                    if !state.is_ignored(&path) {
                        domains.insert(state.domain_for(&name));
                    }
                }
            }
            Err(e) => debug!("Skipping {} for certificates: {:#}", root.display(), e),
        }
    }

    domains.into_iter().collect()
}

/// `domains` without wildcard entries, for the hosts file.
#[must_use]
pub fn hosts_domains(domains: &[String]) -> Vec<String> {
    domains
        .iter()
        .filter(|d| !d.contains('*'))
        .cloned()
        .collect()
}

/// Collect the domains and have the adapter issue the bundle for them.
pub async fn refresh(
    state: &State,
    dashboard: &str,
    adapter: &dyn SystemAdapter,
) -> Result<Vec<String>, ReconcileError> {
    let domains = collect_domains(state, dashboard).await;
    adapter
        .generate_certificate(&domains)
        .await
        .map_err(ReconcileError::adapter("generate the certificate"))?;
    info!("Certificate covers {} domains", domains.len());
    Ok(domains)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use tempfile::tempdir;

    #[tokio::test]
    async fn covers_dashboard_wildcard_links_and_projects() {
        let dir = tempdir().unwrap();
        let parked = dir.path().join("sites");
        for name in ["blog", "shop", "scratch", ".git"] {
            std::fs::create_dir_all(parked.join(name)).unwrap();
        }

        let mut state = State::default();
        state.add_path(&parked).unwrap();
        state.add_path(&dir.path().join("gone")).unwrap();
        state.add_ignore(&parked.join("scratch")).unwrap();
        state.add_link("api", &dir.path().join("api")).unwrap();
        state.add_link("blog", &parked.join("blog")).unwrap();

        let domains = collect_domains(&state, "parkd").await;
        assert_eq!(
            domains,
            vec!["*.test", "api.test", "blog.test", "parkd.test", "shop.test"]
        );
        assert_eq!(
            hosts_domains(&domains),
            vec!["api.test", "blog.test", "parkd.test", "shop.test"]
        );
    }

    #[tokio::test]
    async fn refresh_hands_domains_to_the_adapter() {
        let adapter = MemoryAdapter::new("/opt/parkd");
        let state = State {
            tld: "localhost".to_string(),
            ..State::default()
        };

        let domains = refresh(&state, "parkd", &adapter).await.unwrap();

        assert_eq!(domains, vec!["*.localhost", "parkd.localhost"]);
        assert_eq!(adapter.certificate_requests(), vec![domains]);
    }

    #[tokio::test]
    async fn refresh_failure_is_an_adapter_error() {
        let adapter = MemoryAdapter::new("/opt/parkd").failing_certificate();
        let err = refresh(&State::default(), "parkd", &adapter).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Adapter { .. }));
    }
}
