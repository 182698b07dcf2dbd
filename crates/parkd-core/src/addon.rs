//! Add-on services that contribute their own nginx server blocks.
//!
//! The set of add-ons is closed: every variant of [`Addon`] is known at
//! compile time and registered by identifier in an [`AddonRegistry`].

use crate::template::escape_quoted;
use std::collections::BTreeMap;
use std::fmt::Write;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum FragmentError {
    #[error("TLS is enabled but no certificate bundle is configured")]
    MissingCertificate,
    #[error("fragment {0} is empty")]
    Empty(String),
    #[error("fragment {0} has unbalanced braces")]
    Unbalanced(String),
}

/// Inputs an add-on may use when rendering its fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentContext {
    pub tld: String,
    pub http_port: String,
    pub https_port: String,
    pub secure: bool,
    pub certificate: String,
    pub certificate_key: String,
}

/// A named piece of proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFragment {
    pub name: String,
    pub body: String,
}

impl ConfigFragment {
    /// Reject fragments that would break the surrounding document.
    pub fn validate(&self) -> Result<(), FragmentError> {
        if self.body.trim().is_empty() {
            return Err(FragmentError::Empty(self.name.clone()));
        }
        let mut depth: i64 = 0;
        for c in self.body.chars() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(FragmentError::Unbalanced(self.name.clone()));
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err(FragmentError::Unbalanced(self.name.clone()));
        }
        Ok(())
    }
}

/// Something that can add fragments to the synthesized proxy configuration.
pub trait ConfigContributor: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &'static str;

    /// Zero or more fragments for the current context.
    fn fragments(&self, ctx: &FragmentContext) -> Result<Vec<ConfigFragment>, FragmentError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Addon {
    /// Local SMTP catcher with a web inbox.
    Mailpit,
    /// S3-compatible object storage (API and console).
    Minio,
    Meilisearch,
}

impl Addon {
    pub const ALL: [Self; 3] = [Self::Mailpit, Self::Minio, Self::Meilisearch];

    /// `(subdomain, upstream port)` pairs this add-on exposes.
    const fn upstreams(self) -> &'static [(&'static str, u16)] {
        match self {
            Self::Mailpit => &[("mailpit", 8025)],
            Self::Minio => &[("minio", 9000), ("minio-console", 9001)],
            Self::Meilisearch => &[("meilisearch", 7700)],
        }
    }
}

impl ConfigContributor for Addon {
    fn id(&self) -> &'static str {
        match self {
            Self::Mailpit => "mailpit",
            Self::Minio => "minio",
            Self::Meilisearch => "meilisearch",
        }
    }

    fn fragments(&self, ctx: &FragmentContext) -> Result<Vec<ConfigFragment>, FragmentError> {
        if ctx.secure && (ctx.certificate.is_empty() || ctx.certificate_key.is_empty()) {
            return Err(FragmentError::MissingCertificate);
        }

        Ok(self
            .upstreams()
            .iter()
            .map(|(subdomain, port)| ConfigFragment {
                name: format!("{}:{subdomain}", self.id()),
                body: proxy_block(&format!("{subdomain}.{}", ctx.tld), *port, ctx),
            })
            .collect())
    }
}

fn proxy_block(domain: &str, port: u16, ctx: &FragmentContext) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "server {{");
    if ctx.secure {
        let _ = writeln!(out, "    listen {} ssl;", ctx.https_port);
        let _ = writeln!(out, "    listen [::]:{} ssl;", ctx.https_port);
        let _ = writeln!(out, "    server_name {domain};");
        let _ = writeln!(out, "    ssl_certificate \"{}\";", escape_quoted(&ctx.certificate));
        let _ = writeln!(
            out,
            "    ssl_certificate_key \"{}\";",
            escape_quoted(&ctx.certificate_key)
        );
    } else {
        let _ = writeln!(out, "    listen {};", ctx.http_port);
        let _ = writeln!(out, "    listen [::]:{};", ctx.http_port);
        let _ = writeln!(out, "    server_name {domain};");
    }
    let _ = writeln!(out, "    location / {{");
    let _ = writeln!(out, "        proxy_pass http://127.0.0.1:{port};");
    let _ = writeln!(out, "        proxy_set_header Host $host;");
    let _ = writeln!(out, "        proxy_set_header X-Forwarded-Proto $scheme;");
    let _ = writeln!(out, "        proxy_set_header Upgrade $http_upgrade;");
    let _ = writeln!(out, "        proxy_set_header Connection \"upgrade\";");
    let _ = writeln!(out, "    }}");
    out.push('}');
    out
}

/// Identifier to add-on lookup. Iteration is sorted by identifier.
#[derive(Debug, Clone)]
pub struct AddonRegistry {
    addons: BTreeMap<&'static str, Addon>,
}

impl Default for AddonRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl AddonRegistry {
    /// Every add-on parkd ships.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            addons: Addon::ALL.into_iter().map(|a| (a.id(), a)).collect(),
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Addon> {
        self.addons.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.addons.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.addons.keys().copied()
    }
}
