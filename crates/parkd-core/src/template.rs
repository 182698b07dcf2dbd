//! Typed nginx configuration templates.
//!
//! A template is plain text containing `{{NAME}}` placeholders. Parsing
//! rejects names outside [`Placeholder`] so a typo in a template surfaces when
//! it is loaded, and rendering rejects any placeholder left unbound. Path
//! values are escaped for the double-quoted strings they sit in.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template {template}: unknown placeholder {{{{{name}}}}}")]
    UnknownPlaceholder { template: String, name: String },
    #[error("template {template}: unterminated placeholder at byte {offset}")]
    Unterminated { template: String, offset: usize },
    #[error("template {template}: no value bound for {placeholder}")]
    Unbound {
        template: String,
        placeholder: Placeholder,
    },
}

/// Every name a proxy template may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Placeholder {
    /// Runtime installation directory (holds `server.php` and logs).
    Home,
    Tld,
    HttpListen,
    HttpListenV6,
    HttpsListen,
    HttpsListenV6,
    DefaultSocket,
    Certificate,
    CertificateKey,
    Domain,
    Root,
    Socket,
}

impl Placeholder {
    pub const ALL: [Self; 12] = [
        Self::Home,
        Self::Tld,
        Self::HttpListen,
        Self::HttpListenV6,
        Self::HttpsListen,
        Self::HttpsListenV6,
        Self::DefaultSocket,
        Self::Certificate,
        Self::CertificateKey,
        Self::Domain,
        Self::Root,
        Self::Socket,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Home => "HOME",
            Self::Tld => "TLD",
            Self::HttpListen => "HTTP_LISTEN",
            Self::HttpListenV6 => "HTTP_LISTEN_V6",
            Self::HttpsListen => "HTTPS_LISTEN",
            Self::HttpsListenV6 => "HTTPS_LISTEN_V6",
            Self::DefaultSocket => "DEFAULT_SOCKET",
            Self::Certificate => "CERTIFICATE",
            Self::CertificateKey => "CERTIFICATE_KEY",
            Self::Domain => "DOMAIN",
            Self::Root => "ROOT",
            Self::Socket => "SOCKET",
        }
    }

    /// Filesystem paths, always placed inside `"..."` by the templates.
    #[must_use]
    pub const fn is_quoted_path(self) -> bool {
        matches!(
            self,
            Self::Home | Self::Certificate | Self::CertificateKey | Self::Root
        )
    }
}

/// Escape `value` for use inside an nginx double-quoted string.
#[must_use]
pub fn escape_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{{{}}}}}", self.name())
    }
}

impl FromStr for Placeholder {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|p| p.name() == s).ok_or(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Slot(Placeholder),
}

/// A parsed, validated template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    name: String,
    segments: Vec<Segment>,
}

/// Values for the placeholders of one render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    values: BTreeMap<Placeholder, String>,
}

impl Bindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, placeholder: Placeholder, value: impl Into<String>) -> Self {
        self.values.insert(placeholder, value.into());
        self
    }

    pub fn set(&mut self, placeholder: Placeholder, value: impl Into<String>) {
        self.values.insert(placeholder, value.into());
    }

    #[must_use]
    pub fn get(&self, placeholder: Placeholder) -> Option<&str> {
        self.values.get(&placeholder).map(String::as_str)
    }
}

impl Template {
    /// Parse `source`, rejecting unknown or unterminated placeholders.
    pub fn parse(name: &str, source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| TemplateError::Unterminated {
                template: name.to_string(),
                offset: offset + start,
            })?;
            let key = after[..end].trim();
            let placeholder =
                key.parse::<Placeholder>()
                    .map_err(|()| TemplateError::UnknownPlaceholder {
                        template: name.to_string(),
                        name: key.to_string(),
                    })?;
            segments.push(Segment::Slot(placeholder));

            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            segments,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Placeholders referenced by this template, in first-use order.
    #[must_use]
    pub fn placeholders(&self) -> Vec<Placeholder> {
        let mut seen = Vec::new();
        for segment in &self.segments {
            if let Segment::Slot(p) = segment
                && !seen.contains(p)
            {
                seen.push(*p);
            }
        }
        seen
    }

    pub fn render(&self, bindings: &Bindings) -> Result<String, TemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Slot(placeholder) => {
                    let value =
                        bindings
                            .get(*placeholder)
                            .ok_or_else(|| TemplateError::Unbound {
                                template: self.name.clone(),
                                placeholder: *placeholder,
                            })?;
                    if placeholder.is_quoted_path() {
                        out.push_str(&escape_quoted(value));
                    } else {
                        out.push_str(value);
                    }
                }
            }
        }
        Ok(out)
    }
}

pub const BASE: &str = include_str!("../templates/base.conf");
pub const BASE_SECURE: &str = include_str!("../templates/base-secure.conf");
pub const ISOLATED: &str = include_str!("../templates/isolated.conf");
pub const ISOLATED_SECURE: &str = include_str!("../templates/isolated-secure.conf");

/// The four templates a synthesis pass needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSet {
    pub base: Template,
    pub base_secure: Template,
    pub isolated: Template,
    pub isolated_secure: Template,
}

impl TemplateSet {
    /// File names used when templates are overridden from a directory.
    pub const FILES: [&'static str; 4] = [
        "base.conf",
        "base-secure.conf",
        "isolated.conf",
        "isolated-secure.conf",
    ];

    /// The templates shipped with parkd.
    pub fn builtin() -> Result<Self, TemplateError> {
        Self::from_sources([BASE, BASE_SECURE, ISOLATED, ISOLATED_SECURE])
    }

    /// Parse templates given in [`TemplateSet::FILES`] order.
    pub fn from_sources(sources: [&str; 4]) -> Result<Self, TemplateError> {
        let [base, base_secure, isolated, isolated_secure] = sources;
        Ok(Self {
            base: Template::parse(Self::FILES[0], base)?,
            base_secure: Template::parse(Self::FILES[1], base_secure)?,
            isolated: Template::parse(Self::FILES[2], isolated)?,
            isolated_secure: Template::parse(Self::FILES[3], isolated_secure)?,
        })
    }

    #[must_use]
    pub const fn base(&self, secure: bool) -> &Template {
        if secure { &self.base_secure } else { &self.base }
    }

    #[must_use]
    pub const fn isolated(&self, secure: bool) -> &Template {
        if secure {
            &self.isolated_secure
        } else {
            &self.isolated
        }
    }
}
