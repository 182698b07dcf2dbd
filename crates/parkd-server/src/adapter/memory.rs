use super::{RuntimeSocket, SystemAdapter};
use anyhow::Result;
use async_trait::async_trait;
use parkd_core::version;
use parkd_utils::cert::CertificateBundle;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// An adapter that keeps everything in memory and records each effect.
#[derive(Debug)]
pub struct MemoryAdapter {
    home: PathBuf,
    bundle: CertificateBundle,
    inner: Mutex<Recorded>,
}

#[derive(Debug, Default)]
struct Recorded {
    installed: Vec<String>,
    sockets: BTreeMap<String, RuntimeSocket>,
    installable: BTreeMap<String, RuntimeSocket>,
    configs: Vec<String>,
    reloads: usize,
    certificates: Vec<Vec<String>>,
    hosts: Option<Vec<String>>,
    installs: Vec<String>,
    fail_reload: bool,
    fail_certificate: bool,
}

impl MemoryAdapter {
    #[must_use]
    pub fn new(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            bundle: CertificateBundle::in_dir(&home.join("certs")),
            home,
            inner: Mutex::new(Recorded::default()),
        }
    }

    /// An installed version listening on a unix socket.
    #[must_use]
    pub fn with_runtime(self, version: &str, socket: impl Into<PathBuf>) -> Self {
        {
            let mut inner = self.lock();
            inner.installed.push(version.to_string());
            inner
                .sockets
                .insert(version.to_string(), RuntimeSocket::Unix(socket.into()));
        }
        self
    }

    /// An installed version whose listener is down.
    #[must_use]
    pub fn with_runtime_without_socket(self, version: &str) -> Self {
        self.lock().installed.push(version.to_string());
        self
    }

    /// A version that becomes available once installed.
    #[must_use]
    pub fn with_installable(self, version: &str, socket: impl Into<PathBuf>) -> Self {
        self.lock()
            .installable
            .insert(version.to_string(), RuntimeSocket::Unix(socket.into()));
        self
    }

    #[must_use]
    pub fn failing_reload(self) -> Self {
        self.lock().fail_reload = true;
        self
    }

    #[must_use]
    pub fn failing_certificate(self) -> Self {
        self.lock().fail_certificate = true;
        self
    }

    #[must_use]
    pub fn written_configs(&self) -> Vec<String> {
        self.lock().configs.clone()
    }

    #[must_use]
    pub fn last_config(&self) -> Option<String> {
        self.lock().configs.last().cloned()
    }

    #[must_use]
    pub fn reload_count(&self) -> usize {
        self.lock().reloads
    }

    #[must_use]
    pub fn certificate_requests(&self) -> Vec<Vec<String>> {
        self.lock().certificates.clone()
    }

    #[must_use]
    pub fn hosts_entries(&self) -> Option<Vec<String>> {
        self.lock().hosts.clone()
    }

    #[must_use]
    pub fn installs(&self) -> Vec<String> {
        self.lock().installs.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SystemAdapter for MemoryAdapter {
    async fn installed_versions_descending(&self) -> Vec<String> {
        let mut versions = self.lock().installed.clone();
        version::sort_descending(&mut versions);
        versions
    }

    async fn socket_for(&self, version: &str) -> Result<RuntimeSocket> {
        self.lock()
            .sockets
            .get(version)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No socket for runtime {version}"))
    }

    async fn write_proxy_config(&self, text: &str) -> Result<()> {
        self.lock().configs.push(text.to_string());
        Ok(())
    }

    async fn reload_proxy(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_reload {
            anyhow::bail!("nginx: configuration test failed");
        }
        inner.reloads += 1;
        Ok(())
    }

    async fn generate_certificate(&self, domains: &[String]) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_certificate {
            anyhow::bail!("certificate authority unavailable");
        }
        inner.certificates.push(domains.to_vec());
        Ok(())
    }

    async fn update_hosts_file(&self, domains: &[String]) -> Result<()> {
        self.lock().hosts = Some(domains.to_vec());
        Ok(())
    }

    async fn install_runtime_version(&self, version: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.installs.push(version.to_string());
        let Some(socket) = inner.installable.remove(version) else {
            anyhow::bail!("No package for runtime {version}");
        };
        inner.installed.push(version.to_string());
        inner.sockets.insert(version.to_string(), socket);
        Ok(())
    }

    fn runtime_home(&self) -> &Path {
        &self.home
    }

    fn certificate_bundle(&self) -> CertificateBundle {
        self.bundle.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn installing_makes_a_version_available() {
        let adapter = MemoryAdapter::new("/opt/parkd")
            .with_runtime("8.3", "/run/8.3.sock")
            .with_installable("8.1", "/run/8.1.sock");

        assert!(adapter.socket_for("8.1").await.is_err());
        adapter.install_runtime_version("8.1").await.unwrap();

        assert_eq!(
            adapter.installed_versions_descending().await,
            vec!["8.3", "8.1"]
        );
        assert_eq!(
            adapter.socket_for("8.1").await.unwrap().to_string(),
            "unix:/run/8.1.sock"
        );
        assert!(adapter.install_runtime_version("5.6").await.is_err());
        assert_eq!(adapter.installs(), vec!["8.1", "5.6"]);
    }

    #[tokio::test]
    async fn records_effects() {
        let adapter = MemoryAdapter::new("/opt/parkd");
        adapter.write_proxy_config("a").await.unwrap();
        adapter.write_proxy_config("b").await.unwrap();
        adapter.reload_proxy().await.unwrap();

        assert_eq!(adapter.written_configs(), vec!["a", "b"]);
        assert_eq!(adapter.last_config().as_deref(), Some("b"));
        assert_eq!(adapter.reload_count(), 1);
        assert_eq!(
            adapter.certificate_bundle().key,
            PathBuf::from("/opt/parkd/certs/parkd.key")
        );
    }
}
