//! Inferring what a project needs from the files it carries.
//!
//! Each field of the [`RequirementRecord`] is resolved on its own, first
//! source wins:
//!
//! 1. `.parkd.toml` (`php`, `node`, `web_root`)
//! 2. `composer.json` `require.php` for the runtime constraint
//! 3. `.nvmrc`, then `.node-version`, for the dependency runtime
//! 4. a `public/` directory for the web root

use parkd_core::RequirementRecord;
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

pub const MANIFEST: &str = ".parkd.toml";
pub const COMPOSER: &str = "composer.json";
pub const PIN_FILES: [&str; 2] = [".nvmrc", ".node-version"];
pub const WEB_ROOT: &str = "public";

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed {}: {source}", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("malformed {}: {source}", path.display())]
    Composer {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result of scanning one project: whatever was recovered, plus any problems.
#[derive(Debug, Default)]
pub struct Detection {
    pub record: RequirementRecord,
    pub problems: Vec<DetectError>,
}

#[derive(Debug, Default, Deserialize)]
struct Manifest {
    php: Option<String>,
    node: Option<String>,
    #[serde(alias = "root")]
    web_root: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Composer {
    #[serde(default)]
    require: serde_json::Map<String, serde_json::Value>,
}

/// Detect the requirements of the project at `path`.
///
/// Never fails: missing files are simply not consulted, and malformed ones are
/// reported in [`Detection::problems`] while the remaining sources are still
/// tried.
pub async fn detect(path: &Path) -> Detection {
    let mut detection = Detection::default();

    if let Some(manifest) = read_manifest(path, &mut detection.problems).await {
        detection.record.runtime_constraint = clean(manifest.php);
        detection.record.dependency_runtime_constraint = clean(manifest.node);
        detection.record.web_root = clean(manifest.web_root);
    }

    if detection.record.runtime_constraint.is_none() {
        detection.record.runtime_constraint =
            read_composer_php(path, &mut detection.problems).await;
    }

    if detection.record.dependency_runtime_constraint.is_none() {
        for pin in PIN_FILES {
            if let Some(contents) = read_optional(&path.join(pin), &mut detection.problems).await
                && let Some(version) = clean(Some(contents))
            {
                detection.record.dependency_runtime_constraint = Some(version);
                break;
            }
        }
    }

    if detection.record.web_root.is_none()
        && fs::metadata(path.join(WEB_ROOT))
            .await
            .is_ok_and(|m| m.is_dir())
    {
        detection.record.web_root = Some(WEB_ROOT.to_string());
    }

    for problem in &detection.problems {
        warn!("{}", problem);
    }
    debug!("Detected {:?} for {}", detection.record, path.display());
    detection
}

async fn read_manifest(root: &Path, problems: &mut Vec<DetectError>) -> Option<Manifest> {
    let path = root.join(MANIFEST);
    let content = read_optional(&path, problems).await?;
    match toml::from_str(&content) {
        Ok(manifest) => Some(manifest),
        Err(source) => {
            problems.push(DetectError::Manifest { path, source });
            None
        }
    }
}

async fn read_composer_php(root: &Path, problems: &mut Vec<DetectError>) -> Option<String> {
    let path = root.join(COMPOSER);
    let content = read_optional(&path, problems).await?;
    match serde_json::from_str::<Composer>(&content) {
        Ok(composer) => clean(
            composer
                .require
                .get("php")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        ),
        Err(source) => {
            problems.push(DetectError::Composer { path, source });
            None
        }
    }
}

async fn read_optional(path: &Path, problems: &mut Vec<DetectError>) -> Option<String> {
    match fs::read_to_string(path).await {
        Ok(content) => Some(content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(source) => {
            problems.push(DetectError::Read {
                path: path.to_path_buf(),
                source,
            });
            None
        }
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn empty_project_has_no_opinion() {
        let dir = tempdir().unwrap();
        let detection = detect(dir.path()).await;
        assert_eq!(detection.record, RequirementRecord::default());
        assert!(detection.problems.is_empty());
    }

    #[tokio::test]
    async fn inferred_sources_fill_every_field() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("composer.json"),
            r#"{"require": {"php": "^8.1", "laravel/framework": "^11.0"}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join(".nvmrc"), "20.11.0\n").unwrap();
        std::fs::create_dir(dir.path().join("public")).unwrap();

        let record = detect(dir.path()).await.record;
        assert_eq!(record.runtime_constraint.as_deref(), Some("^8.1"));
        assert_eq!(record.dependency_runtime_constraint.as_deref(), Some("20.11.0"));
        assert_eq!(record.web_root.as_deref(), Some("public"));
    }

    #[tokio::test]
    async fn manifest_wins_field_by_field() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".parkd.toml"), "php = \"8.2\"\n").unwrap();
        std::fs::write(
            dir.path().join("composer.json"),
            r#"{"require": {"php": ">=7.4"}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join(".node-version"), "18").unwrap();
        std::fs::create_dir(dir.path().join("public")).unwrap();

        let record = detect(dir.path()).await.record;
        assert_eq!(record.runtime_constraint.as_deref(), Some("8.2"));
        assert_eq!(record.dependency_runtime_constraint.as_deref(), Some("18"));
        assert_eq!(record.web_root.as_deref(), Some("public"));
    }

    #[tokio::test]
    async fn manifest_web_root_beats_public_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".parkd.toml"), "root = \"web\"\n").unwrap();
        std::fs::create_dir(dir.path().join("public")).unwrap();

        let record = detect(dir.path()).await.record;
        assert_eq!(record.web_root.as_deref(), Some("web"));
    }

    #[tokio::test]
    async fn malformed_manifest_is_reported_and_scan_continues() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".parkd.toml"), "php = [unterminated").unwrap();
        std::fs::write(
            dir.path().join("composer.json"),
            r#"{"require": {"php": "^8.0"}}"#,
        )
        .unwrap();

        let detection = detect(dir.path()).await;
        assert_eq!(detection.record.runtime_constraint.as_deref(), Some("^8.0"));
        assert_eq!(detection.problems.len(), 1);
        assert!(matches!(detection.problems[0], DetectError::Manifest { .. }));
    }

    #[tokio::test]
    async fn malformed_composer_is_reported() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("composer.json"), "{not json").unwrap();
        std::fs::write(dir.path().join(".nvmrc"), "   ").unwrap();
        std::fs::write(dir.path().join(".node-version"), "22").unwrap();

        let detection = detect(dir.path()).await;
        assert_eq!(detection.record.runtime_constraint, None);
        assert_eq!(
            detection.record.dependency_runtime_constraint.as_deref(),
            Some("22")
        );
        assert!(matches!(detection.problems[0], DetectError::Composer { .. }));
    }
}
