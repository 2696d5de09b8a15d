//! Core library for the lifecycle orchestrator
//!
//! This crate contains the platform-API negotiation, mount path resolution,
//! cache selection, phase configuration, extension inspection, daemon-side
//! image extension, phase execution, and scheduling that together drive one
//! run of the Cloud Native Buildpacks lifecycle against a container daemon.

pub mod auth;
pub mod daemon_extender;
pub mod docker;
pub mod errors;
pub mod extensions;
pub mod logging;
pub mod mount_paths;
pub mod oci_layout;
pub mod options;
pub mod phase_cache;
pub mod phase_config;
pub mod phase_runner;
pub mod platform;
pub mod platform_api;
pub mod redaction;
pub mod registry_parser;
pub mod retry;
pub mod run_state;
pub mod scheduler;

// Re-export IndexMap for use by dependent crates (preserves insertion order for ordered maps)
pub use indexmap::IndexMap;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
