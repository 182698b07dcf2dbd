//! The boundary between parkd and the machine it runs on.
//!
//! Everything that touches the installed runtimes, the proxy, the
//! certificate store or the hosts file goes through [`SystemAdapter`].
//! [`LinuxAdapter`] does it for real; [`MemoryAdapter`] records the calls.

use anyhow::Result;
use async_trait::async_trait;
use parkd_utils::cert::CertificateBundle;
use std::fmt;
use std::path::{Path, PathBuf};

pub mod linux;
pub mod memory;

pub use linux::LinuxAdapter;
pub use memory::MemoryAdapter;

/// Where nginx reaches a runtime's FastCGI listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeSocket {
    Unix(PathBuf),
    Tcp(String),
}

impl fmt::Display for RuntimeSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(addr) => write!(f, "{addr}"),
        }
    }
}

#[async_trait]
pub trait SystemAdapter: Send + Sync + fmt::Debug {
    /// Installed runtime versions, newest first.
    async fn installed_versions_descending(&self) -> Vec<String>;

    /// The listener for `version`; an error when that version has none.
    async fn socket_for(&self, version: &str) -> Result<RuntimeSocket>;

    async fn write_proxy_config(&self, text: &str) -> Result<()>;

    async fn reload_proxy(&self) -> Result<()>;

    /// Issue the shared bundle for every name in `domains`.
    async fn generate_certificate(&self, domains: &[String]) -> Result<()>;

    /// Replace the managed hosts-file section with `domains`.
    async fn update_hosts_file(&self, domains: &[String]) -> Result<()>;

    async fn install_runtime_version(&self, version: &str) -> Result<()>;

    /// Directory holding the front-controller script.
    fn runtime_home(&self) -> &Path;

    fn certificate_bundle(&self) -> CertificateBundle;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sockets_render_as_fastcgi_targets() {
        assert_eq!(
            RuntimeSocket::Unix(PathBuf::from("/run/php/php8.1-fpm.sock")).to_string(),
            "unix:/run/php/php8.1-fpm.sock"
        );
        assert_eq!(
            RuntimeSocket::Tcp("127.0.0.1:9081".to_string()).to_string(),
            "127.0.0.1:9081"
        );
    }
}
