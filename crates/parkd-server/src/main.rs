use anyhow::{Context, Result};
use parkd_server::config_loader::ConfigLoader;
use parkd_server::{Engine, logging};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let loader = ConfigLoader::load()
        .await
        .context("Failed to load parkd configuration")?;
    info!(
        "parkd {} starting (config: {})",
        env!("CARGO_PKG_VERSION"),
        loader.config_path.display()
    );

    let paths = loader.paths();
    let engine = Engine::open(loader.config, paths).await?;

    match engine.discover().await {
        Ok(report) => {
            for warning in &report.warnings {
                warn!("{}", warning);
            }
            for site in engine.sites().await {
                info!(
                    "{} -> {} (PHP {})",
                    site.domain,
                    site.path.display(),
                    if site.resolved_runtime_version.is_empty() {
                        "default"
                    } else {
                        site.resolved_runtime_version.as_str()
                    }
                );
            }
            Ok(())
        }
        Err(e) => {
            if e.was_recorded() {
                error!("Run parkd again once the proxy problem is fixed");
            }
            Err(e.into())
        }
    }
}
