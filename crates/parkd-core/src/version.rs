//! Matching declared runtime constraints against installed runtime versions.
//!
//! Constraints come straight from project manifests (`^8.1`, `>=7.4`, `8.2`,
//! `~8.0.3`). Only the first `major.minor` token and the operator matter.
//! Resolution never fails: an empty string means "no override, use the
//! default runtime".

use regex::Regex;
use semver::Version;
use std::cmp::Ordering;
use std::sync::LazyLock;

static MAJOR_MINOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)").expect("static pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    /// `>=`: any major at or above the base.
    AtLeast,
    /// `^` and every other operator: same major, at or above the base.
    SameMajor,
    /// Bare version: exact match only.
    Exact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Constraint {
    operator: Operator,
    base_text: String,
    base: Version,
}

impl Constraint {
    fn parse(constraint: &str) -> Option<Self> {
        let captures = MAJOR_MINOR.captures(constraint)?;
        let base_text = captures.get(0)?.as_str().to_string();
        let base = Version::new(
            captures[1].parse().ok()?,
            captures[2].parse().ok()?,
            0,
        );

        let operator = if constraint.contains(">=") {
            Operator::AtLeast
        } else if constraint.contains(['^', '~', '>', '<', '=', '*', '|']) {
            Operator::SameMajor
        } else {
            Operator::Exact
        };

        Some(Self {
            operator,
            base_text,
            base,
        })
    }

    fn accepts(&self, candidate: &str) -> bool {
        match self.operator {
            Operator::Exact => candidate == self.base_text,
            Operator::AtLeast => parse_major_minor(candidate).is_some_and(|v| v >= self.base),
            Operator::SameMajor => parse_major_minor(candidate)
                .is_some_and(|v| v.major == self.base.major && v >= self.base),
        }
    }
}

/// Parse a `major.minor` version string (`8.3`, `8.3.1` also accepted).
#[must_use]
pub fn parse_major_minor(version: &str) -> Option<Version> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some(Version::new(major, minor, 0))
}

/// Pick the newest installed version compatible with `constraint`.
///
/// `installed_desc` must already be sorted newest first. Returns an empty
/// string when the constraint is empty or unparseable, when nothing is
/// compatible, or when the best match is `current_default` (no override is
/// needed in that case).
///
/// ```
/// use parkd_core::version::resolve;
///
/// let installed = ["8.3", "8.1", "7.4"].map(String::from);
/// assert_eq!(resolve("^8.1", &installed, ""), "8.3");
/// assert_eq!(resolve("^8.1", &installed, "8.3"), "");
/// ```
#[must_use]
pub fn resolve(constraint: &str, installed_desc: &[String], current_default: &str) -> String {
    let constraint = constraint.trim();
    if constraint.is_empty() {
        return String::new();
    }
    let Some(parsed) = Constraint::parse(constraint) else {
        return String::new();
    };

    match installed_desc.iter().find(|candidate| parsed.accepts(candidate)) {
        Some(winner) if winner != current_default => winner.clone(),
        _ => String::new(),
    }
}

/// The `major.minor` base a constraint refers to, if any.
#[must_use]
pub fn base_version(constraint: &str) -> Option<String> {
    Constraint::parse(constraint).map(|c| c.base_text)
}

/// True when `constraint` accepts `version`. Unparseable constraints accept nothing.
#[must_use]
pub fn satisfies(constraint: &str, version: &str) -> bool {
    Constraint::parse(constraint.trim()).is_some_and(|c| c.accepts(version.trim()))
}

/// The runtime sites fall back to: the stored default, else the newest installed.
#[must_use]
pub fn effective_default(stored: &str, installed_desc: &[String]) -> Option<String> {
    let stored = stored.trim();
    if stored.is_empty() {
        installed_desc.first().cloned()
    } else {
        Some(stored.to_string())
    }
}

/// True when `version` is at or above `floor`. Unparseable versions never meet it.
#[must_use]
pub fn meets_floor(version: &str, floor: &str) -> bool {
    match (parse_major_minor(version), parse_major_minor(floor)) {
        (Some(v), Some(f)) => v >= f,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Sort version strings newest first; unparseable entries go last in their original order.
pub fn sort_descending(versions: &mut Vec<String>) {
    versions.sort_by(|a, b| match (parse_major_minor(a), parse_major_minor(b)) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    versions.dedup();
}
