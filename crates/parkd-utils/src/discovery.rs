use anyhow::{Context, Result};
use parkd_core::state::validate_site_name;
use parkd_core::{ResolvedSite, SiteKind, State};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Immediate, non-hidden subdirectories of a parked directory, sorted by name.
///
/// Symlinked directories count as projects. Directories whose names cannot be
/// served as a hostname (quotes, whitespace) are skipped with a warning.
///
/// # Errors
///
/// Returns an error if `root` cannot be listed.
pub async fn parked_projects(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut entries = fs::read_dir(root)
        .await
        .with_context(|| format!("Failed to list parked directory {}", root.display()))?;

    let mut projects = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        if validate_site_name(&name).is_err() {
            warn!("Skipping {}: not usable as a site name", path.display());
            continue;
        }
        if fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
            projects.push((name, path));
        }
    }
    projects.sort();
    Ok(projects)
}

/// Every servable site, links first, deduplicated by name and by path.
///
/// Unreadable parked directories are skipped with a warning.
pub async fn resolve_sites(state: &State) -> Vec<ResolvedSite> {
    let mut sites = Vec::new();
    let mut names = HashSet::new();
    let mut paths = HashSet::new();

    for (name, path) in &state.links {
        names.insert(name.clone());
        paths.insert(path.clone());
        sites.push(ResolvedSite::new(state, name, path.clone(), SiteKind::Linked));
    }

    for root in &state.paths {
        let projects = match parked_projects(root).await {
            Ok(projects) => projects,
            Err(e) => {
                warn!("Skipping parked directory {}: {:#}", root.display(), e);
                continue;
            }
        };

        for (name, path) in projects {
            if state.is_ignored(&path) {
                debug!("Ignoring {}", path.display());
                continue;
            }
            if names.contains(&name) || paths.contains(&path) {
                continue;
            }
            names.insert(name.clone());
            paths.insert(path.clone());
            sites.push(ResolvedSite::new(state, &name, path, SiteKind::Parked));
        }
    }

    sites.sort_by(|a, b| a.name.cmp(&b.name));
    sites
}

/// Physical path of a site: a link of that name, else the first parked
/// directory holding a matching, non-ignored subdirectory.
pub async fn find_site_path(state: &State, name: &str) -> Option<PathBuf> {
    if let Some(path) = state.links.get(name) {
        return Some(path.clone());
    }
    if name.starts_with('.') || name.contains('/') {
        return None;
    }

    for root in &state.paths {
        let candidate = root.join(name);
        if state.is_ignored(&candidate) {
            continue;
        }
        if fs::metadata(&candidate).await.is_ok_and(|m| m.is_dir()) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn lists_visible_directories_only() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("blog")).unwrap();
        std::fs::create_dir(dir.path().join("api")).unwrap();
        std::fs::create_dir(dir.path().join(".cache")).unwrap();
        std::fs::create_dir(dir.path().join("my \"app\"")).unwrap();
        std::fs::create_dir(dir.path().join("old copy")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let projects = parked_projects(dir.path()).await.unwrap();
        let names: Vec<_> = projects.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["api", "blog"]);
    }

    #[tokio::test]
    async fn links_win_over_parked_directories() {
        let dir = tempdir().unwrap();
        let parked = dir.path().join("sites");
        std::fs::create_dir_all(parked.join("blog")).unwrap();
        std::fs::create_dir_all(parked.join("shop")).unwrap();
        let elsewhere = dir.path().join("work").join("blog");
        std::fs::create_dir_all(&elsewhere).unwrap();

        let mut state = State::default();
        state.add_path(&parked).unwrap();
        state.add_link("blog", &elsewhere).unwrap();

        let sites = resolve_sites(&state).await;
        let blog: Vec<_> = sites.iter().filter(|s| s.name == "blog").collect();

        assert_eq!(blog.len(), 1);
        assert_eq!(blog[0].kind, SiteKind::Linked);
        assert_eq!(blog[0].path, elsewhere);
        assert_eq!(sites.len(), 2);
    }

    #[tokio::test]
    async fn same_path_is_listed_once() {
        let dir = tempdir().unwrap();
        let parked = dir.path().join("sites");
        std::fs::create_dir_all(parked.join("blog")).unwrap();

        let mut state = State::default();
        state.add_path(&parked).unwrap();
        state.add_link("journal", &parked.join("blog")).unwrap();

        let sites = resolve_sites(&state).await;
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].name, "journal");
    }

    #[tokio::test]
    async fn ignored_and_missing_paths_are_skipped() {
        let dir = tempdir().unwrap();
        let parked = dir.path().join("sites");
        std::fs::create_dir_all(parked.join("blog")).unwrap();
        std::fs::create_dir_all(parked.join("scratch")).unwrap();

        let mut state = State::default();
        state.add_path(&parked).unwrap();
        state.add_path(&dir.path().join("missing")).unwrap();
        state.add_ignore(&parked.join("scratch")).unwrap();

        let sites = resolve_sites(&state).await;
        let names: Vec<_> = sites.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["blog"]);
        assert_eq!(find_site_path(&state, "scratch").await, None);
        assert_eq!(find_site_path(&state, "blog").await, Some(parked.join("blog")));
    }
}
