//! Core engine for quay: artifact acquisition and environment activation.
//!
//! Given manifests describing host-conditional installation steps
//! ([`quay_schema`]), the engine:
//!
//! - evaluates which demand blocks apply to the host, probing for
//!   externally installed alternatives ([`demands`], [`probe`])
//! - resolves the transitive dependency graph through a registry
//!   abstraction into a flat, deduplicated artifact set ([`registry`],
//!   [`artifact`])
//! - orchestrates installer execution per artifact: acquisition with
//!   digest verification, archive unpacking with path shaping, git
//!   checkouts ([`acquire`], [`unpack`])
//! - composes every resolved artifact's environment contributions into one
//!   activation and persists it reversibly through a shell postscript
//!   ([`activation`], [`postscript`])

pub mod acquire;
pub mod activation;
pub mod artifact;
pub mod demands;
pub mod error;
pub mod exec;
pub mod host;
mod install;
pub mod paths;
pub mod postscript;
pub mod probe;
pub mod registry;
pub mod reporter;
pub mod session;
pub mod unpack;

pub use activation::{Activation, PATH_DELIMITER};
pub use artifact::{Artifact, ArtifactMap, InstallOptions, Selection};
pub use demands::{ApplicableDemands, Fulfillment, ResolvedDemand};
pub use error::{Error, Result};
pub use host::HostContext;
pub use postscript::{POSTSCRIPT_VARIABLE, Postscript, ShellKind, UNDO_VARIABLE};
pub use registry::{LocalRegistry, Registry, RegistrySet};
pub use reporter::{LogReporter, NullReporter, Reporter};
pub use session::{Config, Session};

/// User agent for registry and artifact transfers.
pub const USER_AGENT: &str = concat!("quay/", env!("CARGO_PKG_VERSION"));
