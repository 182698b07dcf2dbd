use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global parkd configuration, read from `config.toml`.
///
/// # Example
/// ```toml
/// [runtime]
/// isolation_warning_floor = "7.4"
/// auto_install = true
///
/// [hosts]
/// manage = false
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ParkdConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub hosts: HostsConfig,
    #[serde(default)]
    pub adapter: AdapterConfig,
}

/// Locations parkd reads and writes. Unset entries live under the base directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct PathsConfig {
    /// The persisted state document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<PathBuf>,
    /// Where the synthesized nginx configuration is written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_config: Option<PathBuf>,
    /// Runtime installation directory (router script, logs).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home: Option<PathBuf>,
    /// Certificate authority and issued bundle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certs: Option<PathBuf>,
}

/// Fully resolved [`PathsConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub state: PathBuf,
    pub proxy_config: PathBuf,
    pub home: PathBuf,
    pub certs: PathBuf,
}

impl PathsConfig {
    #[must_use]
    pub fn resolve(&self, base: &Path) -> Paths {
        Paths {
            state: self
                .state
                .clone()
                .unwrap_or_else(|| base.join("state.json")),
            proxy_config: self
                .proxy_config
                .clone()
                .unwrap_or_else(|| base.join("nginx").join("parkd.conf")),
            home: self.home.clone().unwrap_or_else(|| base.to_path_buf()),
            certs: self.certs.clone().unwrap_or_else(|| base.join("certs")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Site name of the dashboard; always covered by the certificate.
    #[serde(default = "default_dashboard")]
    pub dashboard: String,
    #[serde(default = "default_https_port")]
    pub https_port: String,
    /// Directory with replacement templates (`base.conf`, `isolated.conf`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_dir: Option<PathBuf>,
    /// The nginx executable used for reloads.
    #[serde(default = "default_nginx")]
    pub binary: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            dashboard: default_dashboard(),
            https_port: default_https_port(),
            template_dir: None,
            binary: default_nginx(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Versions below this are assumed unsupported: a missing socket for
    /// them skips isolation without a warning.
    #[serde(default = "default_floor")]
    pub isolation_warning_floor: String,
    /// Install a matching runtime when discovery finds no compatible version.
    #[serde(default = "default_false")]
    pub auto_install: bool,
    /// Root of the per-version FPM installations (`<root>/<version>/fpm`).
    #[serde(default = "default_fpm_root")]
    pub fpm_root: PathBuf,
    /// Directory holding `php<version>-fpm.sock`.
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            isolation_warning_floor: default_floor(),
            auto_install: false,
            fpm_root: default_fpm_root(),
            socket_dir: default_socket_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct HostsConfig {
    /// Whether reconciliation rewrites the managed hosts-file section.
    #[serde(default = "default_true")]
    pub manage: bool,
    #[serde(default = "default_hosts_file")]
    pub file: PathBuf,
    #[serde(default = "default_loopback")]
    pub address: String,
}

impl Default for HostsConfig {
    fn default() -> Self {
        Self {
            manage: true,
            file: default_hosts_file(),
            address: default_loopback(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Upper bound for every external command (reload, install).
    #[serde(default = "default_timeout")]
    pub command_timeout_secs: u64,
    /// Log every effect instead of applying it; discovery still reads the system.
    #[serde(default = "default_false")]
    pub dry_run: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_timeout(),
            dry_run: false,
        }
    }
}

fn default_dashboard() -> String {
    "parkd".to_string()
}

fn default_https_port() -> String {
    "443".to_string()
}

fn default_nginx() -> String {
    "nginx".to_string()
}

fn default_floor() -> String {
    "7.4".to_string()
}

fn default_fpm_root() -> PathBuf {
    PathBuf::from("/etc/php")
}

fn default_socket_dir() -> PathBuf {
    PathBuf::from("/run/php")
}

fn default_hosts_file() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\Windows\System32\drivers\etc\hosts")
    } else {
        PathBuf::from("/etc/hosts")
    }
}

fn default_loopback() -> String {
    "127.0.0.1".to_string()
}

const fn default_timeout() -> u64 {
    30
}

const fn default_true() -> bool {
    true
}

const fn default_false() -> bool {
    false
}
