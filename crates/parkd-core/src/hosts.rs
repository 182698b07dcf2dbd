//! Editing the parkd-managed block of a hosts file.
//!
//! Only the lines between the markers are ever touched; everything else in
//! the file is preserved byte for byte.

use std::fmt::Write;

pub const BEGIN_MARKER: &str = "# BEGIN parkd";
pub const END_MARKER: &str = "# END parkd";

/// The managed section of a hosts file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostsSection {
    address: String,
}

impl Default for HostsSection {
    fn default() -> Self {
        Self::new("127.0.0.1")
    }
}

impl HostsSection {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// The section text for `domains`. Wildcards cannot live in a hosts file
    /// and are skipped.
    #[must_use]
    pub fn render(&self, domains: &[String]) -> String {
        let mut section = String::new();
        section.push_str(BEGIN_MARKER);
        section.push('\n');
        for domain in domains.iter().filter(|d| !d.contains('*')) {
            let _ = writeln!(section, "{} {domain}", self.address);
        }
        section.push_str(END_MARKER);
        section
    }

    /// `current` with the managed section replaced, or appended when absent.
    #[must_use]
    pub fn apply(&self, current: &str, domains: &[String]) -> String {
        let section = self.render(domains);

        if let Some((start, end)) = find_section(current) {
            let mut output = String::from(&current[..start]);
            output.push_str(&section);
            output.push_str(&current[end..]);
            return output;
        }

        let mut output = String::from(current);
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&section);
        output.push('\n');
        output
    }
}

fn find_section(content: &str) -> Option<(usize, usize)> {
    let start = content.find(BEGIN_MARKER)?;
    let end = content[start..].find(END_MARKER)? + start + END_MARKER.len();
    Some((start, end))
}
