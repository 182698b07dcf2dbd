use super::{RuntimeSocket, SystemAdapter};
use anyhow::{Context, Result};
use async_trait::async_trait;
use parkd_core::config::{HostsConfig, Paths, RuntimeConfig};
use parkd_core::{HostsSection, ParkdConfig, version};
use parkd_utils::cert::{self, CertificateBundle};
use parkd_utils::process;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

/// PHP-FPM behind nginx on a Debian-style layout.
///
/// Versions are found as `<fpm_root>/<version>/fpm`, their sockets as
/// `<socket_dir>/php<version>-fpm.sock`.
#[derive(Debug, Clone)]
pub struct LinuxAdapter {
    paths: Paths,
    runtime: RuntimeConfig,
    hosts: HostsConfig,
    nginx: String,
    timeout: Duration,
    dry_run: bool,
}

impl LinuxAdapter {
    #[must_use]
    pub fn new(config: &ParkdConfig, paths: Paths) -> Self {
        Self {
            paths,
            runtime: config.runtime.clone(),
            hosts: config.hosts.clone(),
            nginx: config.proxy.binary.clone(),
            timeout: Duration::from_secs(config.adapter.command_timeout_secs),
            dry_run: config.adapter.dry_run,
        }
    }

    #[must_use]
    pub fn socket_path(&self, version: &str) -> PathBuf {
        self.runtime
            .socket_dir
            .join(format!("php{version}-fpm.sock"))
    }

    fn skip(&self, effect: &str) -> bool {
        if self.dry_run {
            info!("Dry run: would {}", effect);
        }
        self.dry_run
    }
}

#[async_trait]
impl SystemAdapter for LinuxAdapter {
    async fn installed_versions_descending(&self) -> Vec<String> {
        let root = &self.runtime.fpm_root;
        let mut entries = match fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list PHP installations in {}: {}", root.display(), e);
                return Vec::new();
            }
        };

        let mut versions = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if version::parse_major_minor(&name).is_none() {
                continue;
            }
            if fs::metadata(entry.path().join("fpm"))
                .await
                .is_ok_and(|m| m.is_dir())
            {
                versions.push(name);
            }
        }
        version::sort_descending(&mut versions);
        debug!("Installed PHP versions: {:?}", versions);
        versions
    }

    async fn socket_for(&self, version: &str) -> Result<RuntimeSocket> {
        let path = self.socket_path(version);
        if fs::try_exists(&path).await.unwrap_or(false) {
            Ok(RuntimeSocket::Unix(path))
        } else {
            anyhow::bail!("No PHP-FPM {} socket at {}", version, path.display())
        }
    }

    async fn write_proxy_config(&self, text: &str) -> Result<()> {
        let target = &self.paths.proxy_config;
        if self.skip(&format!("write {} ({} bytes)", target.display(), text.len())) {
            return Ok(());
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut tmp = target.as_os_str().to_owned();
        tmp.push(".tmp");
        fs::write(&tmp, text)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;
        fs::rename(&tmp, target)
            .await
            .with_context(|| format!("Failed to replace {}", target.display()))?;
        debug!("Wrote proxy configuration to {}", target.display());
        Ok(())
    }

    async fn reload_proxy(&self) -> Result<()> {
        if self.skip(&format!("run `{} -s reload`", self.nginx)) {
            return Ok(());
        }
        process::run(&self.nginx, &["-s", "reload"], self.timeout)
            .await
            .context("Failed to reload nginx")?;
        info!("Reloaded nginx");
        Ok(())
    }

    async fn generate_certificate(&self, domains: &[String]) -> Result<()> {
        if self.skip(&format!("issue a certificate for {}", domains.join(", "))) {
            return Ok(());
        }
        cert::issue_bundle(&self.paths.certs, domains).await?;
        Ok(())
    }

    async fn update_hosts_file(&self, domains: &[String]) -> Result<()> {
        let file = &self.hosts.file;
        let current = match fs::read_to_string(file).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", file.display()));
            }
        };

        let updated = HostsSection::new(self.hosts.address.as_str()).apply(&current, domains);
        if updated == current {
            debug!("{} is already up to date", file.display());
            return Ok(());
        }
        if self.skip(&format!("update {} with {} domains", file.display(), domains.len())) {
            return Ok(());
        }
        fs::write(file, updated)
            .await
            .with_context(|| format!("Failed to write {}", file.display()))?;
        Ok(())
    }

    async fn install_runtime_version(&self, version: &str) -> Result<()> {
        let package = format!("php{version}-fpm");
        if self.skip(&format!("install {package}")) {
            return Ok(());
        }
        info!("Installing {}", package);
        process::run("apt-get", &["install", "-y", &package], self.timeout)
            .await
            .with_context(|| format!("Failed to install {package}"))?;
        process::run("systemctl", &["enable", "--now", &package], self.timeout)
            .await
            .with_context(|| format!("Failed to start {package}"))?;
        Ok(())
    }

    fn runtime_home(&self) -> &Path {
        &self.paths.home
    }

    fn certificate_bundle(&self) -> CertificateBundle {
        CertificateBundle::in_dir(&self.paths.certs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn adapter(base: &Path, dry_run: bool) -> LinuxAdapter {
        let mut config = ParkdConfig::default();
        config.runtime.fpm_root = base.join("php");
        config.runtime.socket_dir = base.join("run");
        config.hosts.file = base.join("hosts");
        config.adapter.dry_run = dry_run;
        let paths = config.paths.resolve(base);
        LinuxAdapter::new(&config, paths)
    }

    #[tokio::test]
    async fn lists_versions_with_fpm_newest_first() {
        let dir = tempdir().unwrap();
        for v in ["7.4", "8.3", "8.10"] {
            std::fs::create_dir_all(dir.path().join("php").join(v).join("fpm")).unwrap();
        }
        std::fs::create_dir_all(dir.path().join("php").join("8.0").join("cli")).unwrap();
        std::fs::create_dir_all(dir.path().join("php").join("mods-available")).unwrap();

        let versions = adapter(dir.path(), false).installed_versions_descending().await;
        assert_eq!(versions, vec!["8.10", "8.3", "7.4"]);
    }

    #[tokio::test]
    async fn missing_fpm_root_means_nothing_installed() {
        let dir = tempdir().unwrap();
        let versions = adapter(dir.path(), false).installed_versions_descending().await;
        assert!(versions.is_empty());
    }

    #[tokio::test]
    async fn socket_must_exist() {
        let dir = tempdir().unwrap();
        let adapter = adapter(dir.path(), false);
        assert!(adapter.socket_for("8.1").await.is_err());

        std::fs::create_dir_all(dir.path().join("run")).unwrap();
        std::fs::write(dir.path().join("run").join("php8.1-fpm.sock"), "").unwrap();
        assert_eq!(
            adapter.socket_for("8.1").await.unwrap(),
            RuntimeSocket::Unix(dir.path().join("run").join("php8.1-fpm.sock"))
        );
    }

    #[tokio::test]
    async fn writes_proxy_config_and_hosts_section() {
        let dir = tempdir().unwrap();
        let adapter = adapter(dir.path(), false);
        std::fs::write(dir.path().join("hosts"), "127.0.0.1 localhost\n").unwrap();

        adapter.write_proxy_config("server {}\n").await.unwrap();
        adapter
            .update_hosts_file(&["blog.test".to_string(), "*.test".to_string()])
            .await
            .unwrap();

        let written = std::fs::read_to_string(dir.path().join("nginx").join("parkd.conf")).unwrap();
        assert_eq!(written, "server {}\n");
        let hosts = std::fs::read_to_string(dir.path().join("hosts")).unwrap();
        assert!(hosts.starts_with("127.0.0.1 localhost\n"));
        assert!(hosts.contains("127.0.0.1 blog.test"));
        assert!(!hosts.contains("*.test"));
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let dir = tempdir().unwrap();
        let adapter = adapter(dir.path(), true);

        adapter.write_proxy_config("server {}\n").await.unwrap();
        adapter.update_hosts_file(&["blog.test".to_string()]).await.unwrap();
        adapter.reload_proxy().await.unwrap();
        adapter.install_runtime_version("8.2").await.unwrap();

        assert!(!dir.path().join("nginx").exists());
        assert!(!dir.path().join("hosts").exists());
    }

    #[test]
    fn bundle_lives_in_certs_dir() {
        let dir = tempdir().unwrap();
        let adapter = adapter(dir.path(), false);
        assert_eq!(
            adapter.certificate_bundle().certificate,
            dir.path().join("certs").join("parkd.crt")
        );
        assert_eq!(adapter.runtime_home(), dir.path());
    }
}
