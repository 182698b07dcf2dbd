use parkd_core::{ParkdConfig, SiteKind, TemplateSet};
use parkd_server::adapter::MemoryAdapter;
use parkd_server::engine::{Engine, WorkflowError};
use parkd_server::store::StateStore;
use parkd_server::synth::{ReconcileError, SynthesisWarning, Synthesizer};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

async fn engine(state_file: &Path, adapter: &Arc<MemoryAdapter>) -> Engine {
    let store = StateStore::open(state_file).await.unwrap();
    let synthesizer = Synthesizer::new(TemplateSet::builtin().unwrap(), "443", "7.4");
    Engine::new(store, adapter.clone(), synthesizer, ParkdConfig::default())
}

fn runtimes() -> Arc<MemoryAdapter> {
    Arc::new(
        MemoryAdapter::new("/opt/parkd")
            .with_runtime("8.3", "/run/8.3.sock")
            .with_runtime("8.1", "/run/8.1.sock"),
    )
}

#[tokio::test]
async fn pinned_site_gets_exactly_one_isolated_block() {
    let dir = tempdir().unwrap();
    let srv = dir.path().join("srv");
    std::fs::create_dir_all(srv.join("blog")).unwrap();
    std::fs::create_dir_all(srv.join("shop")).unwrap();

    let state_file = dir.path().join("state.json");
    let document = serde_json::json!({
        "tld": "test",
        "paths": [srv],
        "links": {},
        "siteConfigs": { "blog.test": { "runtimeVersion": "8.1" } },
        "secure": false
    });
    std::fs::write(&state_file, document.to_string()).unwrap();

    let adapter = runtimes();
    let report = engine(&state_file, &adapter).await.reconcile().await.unwrap();
    let config = adapter.last_config().unwrap();

    assert_eq!(report.isolated, vec!["blog.test"]);
    assert!(report.warnings.is_empty());
    assert_eq!(config.matches("# isolated: ").count(), 1);
    assert!(config.contains("# isolated: blog.test"));
    assert!(config.contains(&format!("root \"{}\";", srv.join("blog").display())));
    assert!(config.contains("fastcgi_pass unix:/run/8.1.sock;"));
    assert!(config.contains("server_name .test localhost;"));
    assert!(config.contains("fastcgi_pass unix:/run/8.3.sock;"));
    assert_eq!(adapter.reload_count(), 1);
}

#[tokio::test]
async fn synthesis_is_byte_identical_across_runs() {
    let dir = tempdir().unwrap();
    let srv = dir.path().join("srv");
    for name in ["alpha", "beta", "gamma"] {
        std::fs::create_dir_all(srv.join(name)).unwrap();
    }

    let adapter = runtimes();
    let engine = engine(&dir.path().join("state.json"), &adapter).await;
    engine.park(&srv).await.unwrap();
    engine.isolate("gamma", "8.1").await.unwrap();
    engine.isolate("alpha.test", "8.1").await.unwrap();
    engine.enable_addon("minio").await.unwrap();
    engine.enable_addon("mailpit").await.unwrap();

    engine.reconcile().await.unwrap();
    engine.reconcile().await.unwrap();

    let written = adapter.written_configs();
    let last = &written[written.len() - 1];
    let previous = &written[written.len() - 2];
    assert_eq!(last, previous);

    let alpha = last.find("# isolated: alpha.test").unwrap();
    let gamma = last.find("# isolated: gamma.test").unwrap();
    assert!(alpha < gamma);
    let minio = last.find("# add-on: minio:minio").unwrap();
    let mailpit = last.find("# add-on: mailpit:mailpit").unwrap();
    assert!(minio < mailpit);
}

#[tokio::test]
async fn missing_socket_skips_only_that_site() {
    let dir = tempdir().unwrap();
    let srv = dir.path().join("srv");
    for name in ["modern", "ancient", "blog"] {
        std::fs::create_dir_all(srv.join(name)).unwrap();
    }

    let state_file = dir.path().join("state.json");
    let document = serde_json::json!({
        "paths": [srv],
        "siteConfigs": {
            "modern.test": { "runtimeVersion": "8.2" },
            "ancient.test": { "runtimeVersion": "5.6" },
            "blog.test": { "runtimeVersion": "8.1" }
        }
    });
    std::fs::write(&state_file, document.to_string()).unwrap();

    let adapter = runtimes();
    let report = engine(&state_file, &adapter).await.reconcile().await.unwrap();

    assert_eq!(report.isolated, vec!["blog.test"]);
    assert_eq!(
        report.warnings,
        vec![SynthesisWarning::MissingSocket {
            domain: "modern.test".to_string(),
            version: "8.2".to_string(),
        }]
    );
    let config = adapter.last_config().unwrap();
    assert!(config.contains("# ---- parkd: base ----"));
    assert!(!config.contains("modern.test"));
    assert!(!config.contains("ancient.test"));
}

#[tokio::test]
async fn missing_site_directory_is_a_warning() {
    let dir = tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    let document = serde_json::json!({
        "paths": [dir.path().join("srv")],
        "siteConfigs": { "ghost.test": { "webRoot": "public" } }
    });
    std::fs::write(&state_file, document.to_string()).unwrap();

    let adapter = runtimes();
    let report = engine(&state_file, &adapter).await.reconcile().await.unwrap();

    assert_eq!(
        report.warnings,
        vec![SynthesisWarning::MissingPath {
            domain: "ghost.test".to_string()
        }]
    );
    assert!(report.isolated.is_empty());
}

#[tokio::test]
async fn linked_and_parked_site_is_listed_once() {
    let dir = tempdir().unwrap();
    let srv = dir.path().join("srv");
    std::fs::create_dir_all(srv.join("blog")).unwrap();
    std::fs::create_dir_all(srv.join("docs")).unwrap();

    let adapter = runtimes();
    let engine = engine(&dir.path().join("state.json"), &adapter).await;
    engine.park(&srv).await.unwrap();
    engine.link("blog", &srv.join("blog")).await.unwrap();

    let sites = engine.sites().await;
    let blog: Vec<_> = sites.iter().filter(|s| s.name == "blog").collect();
    assert_eq!(blog.len(), 1);
    assert_eq!(blog[0].kind, SiteKind::Linked);
    assert_eq!(sites.len(), 2);
}

#[tokio::test]
async fn partial_state_heals_and_saves() {
    let dir = tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    std::fs::write(&state_file, r#"{"tld":"test","links":{},"secure":false}"#).unwrap();

    let adapter = runtimes();
    let engine = engine(&state_file, &adapter).await;
    let state = engine.store().snapshot().await;
    assert!(state.paths.is_empty());
    assert!(state.ignored.is_empty());

    engine.store().save().await.unwrap();
    engine.reconcile().await.unwrap();
}

#[tokio::test]
async fn hosts_file_gets_every_name_but_wildcards() {
    let dir = tempdir().unwrap();
    let srv = dir.path().join("srv");
    std::fs::create_dir_all(srv.join("blog")).unwrap();

    let adapter = runtimes();
    let engine = engine(&dir.path().join("state.json"), &adapter).await;
    engine.park(&srv).await.unwrap();

    assert_eq!(
        adapter.hosts_entries().unwrap(),
        vec!["blog.test", "parkd.test"]
    );
}

#[tokio::test]
async fn proxy_failure_still_records_the_request() {
    let dir = tempdir().unwrap();
    let srv = dir.path().join("srv");
    std::fs::create_dir_all(srv.join("blog")).unwrap();
    let state_file = dir.path().join("state.json");

    let adapter = Arc::new(
        MemoryAdapter::new("/opt/parkd")
            .with_runtime("8.3", "/run/8.3.sock")
            .failing_reload(),
    );
    let engine = engine(&state_file, &adapter).await;

    let err = engine.park(&srv).await.unwrap_err();

    assert!(err.was_recorded());
    assert!(matches!(
        err,
        WorkflowError::Reconcile(ReconcileError::Adapter { .. })
    ));
    assert!(err.to_string().contains("request was recorded"));
    let reopened = StateStore::open(&state_file).await.unwrap().snapshot().await;
    assert_eq!(reopened.paths, vec![srv]);
}

#[tokio::test]
async fn invalid_request_is_not_recorded() {
    let dir = tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    let adapter = runtimes();
    let engine = engine(&state_file, &adapter).await;

    let err = engine.park(Path::new("relative/sites")).await.unwrap_err();

    assert!(!err.was_recorded());
    assert!(matches!(err, WorkflowError::State(_)));
    assert!(adapter.written_configs().is_empty());
    assert!(engine.store().snapshot().await.paths.is_empty());
}

#[tokio::test]
async fn no_default_socket_writes_nothing() {
    let dir = tempdir().unwrap();
    let adapter = Arc::new(MemoryAdapter::new("/opt/parkd").with_runtime_without_socket("8.3"));
    let engine = engine(&dir.path().join("state.json"), &adapter).await;

    let err = engine.reconcile().await.unwrap_err();

    assert!(matches!(
        err,
        WorkflowError::Reconcile(ReconcileError::NoDefaultSocket { .. })
    ));
    assert!(adapter.written_configs().is_empty());
    assert!(adapter.hosts_entries().is_none());
}

#[tokio::test]
async fn quoted_characters_in_paths_are_escaped() {
    let dir = tempdir().unwrap();
    let srv = dir.path().join(r#"client "acme""#);
    std::fs::create_dir_all(srv.join("blog")).unwrap();

    let adapter = runtimes();
    let engine = engine(&dir.path().join("state.json"), &adapter).await;
    engine.park(&srv).await.unwrap();
    engine.isolate("blog", "8.1").await.unwrap();

    let config = adapter.last_config().unwrap();
    let escaped = srv.join("blog").display().to_string().replace('"', "\\\"");
    assert!(config.contains(&format!("root \"{escaped}\";")));
    assert!(!config.contains(r#"client "acme""#));
}
