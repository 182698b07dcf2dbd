//! # parkd-core
//!
//! Side-effect free building blocks of parkd: the persisted [`State`] model,
//! runtime version resolution, typed nginx templates, add-on contributors and
//! hosts-file section editing. Nothing in this crate touches the filesystem.

pub mod addon;
pub use addon::{Addon, AddonRegistry, ConfigContributor, ConfigFragment, FragmentContext};
pub mod config;
pub use config::ParkdConfig;
pub mod hosts;
pub use hosts::HostsSection;
pub mod site;
pub use site::{RequirementRecord, ResolvedSite, SiteKind, SiteOverride};
pub mod state;
pub use state::{SiteConfig, State, StateError};
pub mod template;
pub use template::{Bindings, Placeholder, Template, TemplateError, TemplateSet};
pub mod version;
