//! Error types for the lifecycle orchestrator
//!
//! Mirrors the taxonomy the orchestrator must surface: configuration
//! problems, platform-API negotiation failures, hard constraint violations,
//! phase runtime failures, and cleanup failures. Each leaf enum is wrapped by
//! [`OrchestratorError`] so callers can match on the subsystem that failed
//! without losing the underlying cause.

use thiserror::Error;

/// Top-level error type returned by every public orchestrator operation.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Invalid image reference, missing image when previous-image set,
    /// mismatched publish registries, and similar input problems.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No Platform API version is mutually supported by tool, builder, and
    /// (if given) lifecycle.
    #[error("platform API negotiation failed: {0}")]
    Negotiation(String),

    /// A hard constraint was violated (e.g. extensions require a volume
    /// build cache; the creator does not support extensions).
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A phase container exited non-zero, a daemon call failed, or a
    /// mandatory copy-out failed.
    #[error("phase '{phase}' failed: {source}")]
    Phase {
        phase: String,
        #[source]
        source: Box<OrchestratorError>,
    },

    /// Container daemon interaction failure (build, create, start, exec).
    #[error("daemon error: {0}")]
    Docker(#[from] DockerError),

    /// Cleanup (volume/tmpDir removal) failed. Never masks an earlier phase
    /// error; the scheduler always returns the phase error if one occurred.
    #[error("cleanup error: {0}")]
    Cleanup(String),

    /// Extension/metadata inspection failure distinct from a phase failure
    /// (e.g. malformed TOML that is present but unreadable).
    #[error("extensions inspection error: {0}")]
    Extensions(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Wrap this error as having occurred during the named phase.
    pub fn in_phase(self, phase: impl Into<String>) -> Self {
        OrchestratorError::Phase {
            phase: phase.into(),
            source: Box::new(self),
        }
    }
}

/// Configuration-class errors (taxonomy class 1).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("{message}")]
    Validation { message: String },

    #[error("publish registries do not match: image registry '{image_registry}' != previous-image registry '{previous_registry}'")]
    RegistryMismatch {
        image_registry: String,
        previous_registry: String,
    },

    #[error("extensions require a volume build cache, got {actual}")]
    ExtensionsRequireVolumeCache { actual: String },

    #[error(
        "builder has an order for extensions which is not supported when using the creator"
    )]
    CreatorWithExtensions,

    #[error("failed to parse TOML at {path}: {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Container daemon interaction errors.
#[derive(Error, Debug)]
pub enum DockerError {
    #[error("docker binary not found on PATH")]
    NotInstalled,

    #[error("docker CLI error: {0}")]
    CLIError(String),

    #[error("container exited with non-zero status {code}: {message}")]
    NonZeroExit { code: i32, message: String },

    #[error("image build failed: {0}")]
    ImageBuild(String),

    #[error("task join error: {0}")]
    Join(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
