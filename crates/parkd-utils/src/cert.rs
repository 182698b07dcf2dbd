use anyhow::{Context, Result};
use rcgen::{
    BasicConstraints, CertificateParams, CertifiedIssuer, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose,
};
use std::path::{Path, PathBuf};
use tracing::info;

const CA_CERT: &str = "rootCA.pem";
const CA_KEY: &str = "rootCA-key.pem";

/// Paths of the shared TLS bundle referenced by every TLS stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    pub certificate: PathBuf,
    pub key: PathBuf,
}

impl CertificateBundle {
    #[must_use]
    pub fn in_dir(certs_dir: &Path) -> Self {
        Self {
            certificate: certs_dir.join("parkd.crt"),
            key: certs_dir.join("parkd.key"),
        }
    }
}

fn ca_params() -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "parkd Development CA");
    dn.push(DnType::OrganizationName, "parkd");
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params
}

/// Make sure a root CA exists in `certs_dir`, generating one if needed.
///
/// # Errors
///
/// Returns an error if only half of the CA is present, or if it cannot be written.
pub async fn ensure_root_ca(certs_dir: &Path) -> Result<()> {
    let ca_cert_path = certs_dir.join(CA_CERT);
    let ca_key_path = certs_dir.join(CA_KEY);

    tokio::fs::create_dir_all(certs_dir)
        .await
        .context("Failed to create parkd certs directory")?;

    let cert_exists = ca_cert_path.exists();
    let key_exists = ca_key_path.exists();

    if cert_exists != key_exists {
        anyhow::bail!(
            "Root CA in {} is partially configured ({CA_CERT}/{CA_KEY} mismatch); remove both files to regenerate it",
            certs_dir.display()
        );
    }
    if cert_exists {
        return Ok(());
    }

    let (cert_pem, key_pem) = tokio::task::spawn_blocking(|| -> Result<(String, String)> {
        let key_pair = KeyPair::generate()?;
        let cert = ca_params().self_signed(&key_pair)?;
        Ok((cert.pem(), key_pair.serialize_pem()))
    })
    .await
    .context("CA generation task panicked")??;

    tokio::fs::write(&ca_cert_path, cert_pem)
        .await
        .with_context(|| format!("Failed to write {}", ca_cert_path.display()))?;
    tokio::fs::write(&ca_key_path, key_pem)
        .await
        .with_context(|| format!("Failed to write {}", ca_key_path.display()))?;

    info!("Generated parkd Root CA at {}", ca_cert_path.display());
    Ok(())
}

/// Issue one certificate covering every domain in `domains`, signed by the
/// parkd CA, and write it as the shared bundle.
///
/// # Errors
///
/// Returns an error if `domains` is empty, the CA cannot be loaded, or signing fails.
pub async fn issue_bundle(certs_dir: &Path, domains: &[String]) -> Result<CertificateBundle> {
    anyhow::ensure!(!domains.is_empty(), "No domains to certify");
    ensure_root_ca(certs_dir).await?;

    let ca_key_pem = tokio::fs::read_to_string(certs_dir.join(CA_KEY))
        .await
        .context("Failed to read rootCA-key.pem")?;
    let count = domains.len();
    let domains = domains.to_vec();

    let (cert_pem, key_pem) = tokio::task::spawn_blocking(move || -> Result<(String, String)> {
        let ca_key = KeyPair::from_pem(&ca_key_pem).context("Failed to parse rootCA-key.pem")?;
        let issuer = CertifiedIssuer::self_signed(ca_params(), ca_key)
            .context("Failed to create CertifiedIssuer")?;

        let mut params = CertificateParams::new(domains.clone())?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, domains[0].as_str());
        dn.push(DnType::OrganizationName, "parkd");
        params.distinguished_name = dn;

        let key_pair = KeyPair::generate()?;
        let cert = params.signed_by(&key_pair, &issuer)?;
        Ok((cert.pem(), key_pair.serialize_pem()))
    })
    .await
    .context("Certificate signing task panicked")??;

    let bundle = CertificateBundle::in_dir(certs_dir);
    tokio::fs::write(&bundle.certificate, cert_pem)
        .await
        .with_context(|| format!("Failed to write {}", bundle.certificate.display()))?;
    tokio::fs::write(&bundle.key, key_pem)
        .await
        .with_context(|| format!("Failed to write {}", bundle.key.display()))?;

    info!(
        "Issued certificate bundle {} for {} domains",
        bundle.certificate.display(),
        count
    );
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn issues_bundle_with_fresh_ca() {
        let dir = tempdir().unwrap();
        let domains = vec!["parkd.test".to_string(), "*.test".to_string()];

        let bundle = issue_bundle(dir.path(), &domains).await.unwrap();

        assert!(dir.path().join(CA_CERT).exists());
        let pem = std::fs::read_to_string(&bundle.certificate).unwrap();
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----"));
        let key = std::fs::read_to_string(&bundle.key).unwrap();
        assert!(key.contains("PRIVATE KEY"));
    }

    #[tokio::test]
    async fn reuses_existing_ca() {
        let dir = tempdir().unwrap();
        ensure_root_ca(dir.path()).await.unwrap();
        let before = std::fs::read_to_string(dir.path().join(CA_KEY)).unwrap();

        issue_bundle(dir.path(), &["blog.test".to_string()]).await.unwrap();

        let after = std::fs::read_to_string(dir.path().join(CA_KEY)).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn half_configured_ca_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CA_CERT), "stale").unwrap();
        assert!(ensure_root_ca(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn empty_domain_list_is_rejected() {
        let dir = tempdir().unwrap();
        assert!(issue_bundle(dir.path(), &[]).await.is_err());
    }
}
