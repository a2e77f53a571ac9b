//! Manifest document model for quay.
//!
//! A quay manifest is a YAML document declaring an artifact's identity, the
//! registries it draws dependencies from, and a set of *demand blocks*:
//! bundles of installation and activation instructions that apply either
//! unconditionally or when a host selector (a media query over platform
//! facts) evaluates true.
//!
//! This crate owns the typed model and the two small grammars the model
//! embeds: media queries for block selectors, and restricted comparison
//! expressions for probe `is` conditions. Shape problems are collected as
//! [`ValidationError`]s rather than aborting the parse, so a caller can
//! surface every defect in one batch.

mod coerce;
pub mod error;
pub mod expr;
pub mod installer;
pub mod manifest;
pub mod query;

pub use error::{ErrorKind, ValidationError};
pub use expr::{Bindings, Expression};
pub use installer::{ArchiveInstaller, GitInstaller, Installer, NupkgInstaller};
pub use manifest::{
    ConditionalDemand, DemandBlock, DemandSet, Info, Manifest, RegistryDecl, Settings, Unless,
};
pub use query::Query;
