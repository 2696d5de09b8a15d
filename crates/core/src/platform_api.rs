//! Platform-API version negotiation
//!
//! The orchestrator, the builder image, and (optionally) a custom lifecycle
//! each advertise a set of supported Platform API versions. Negotiation picks
//! the highest version mutually supported by all parties that have an
//! opinion.

use crate::errors::OrchestratorError;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// An (major, minor) Platform API version pair. Totally ordered, immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlatformVersion {
    pub major: u32,
    pub minor: u32,
}

impl PlatformVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Compare against a bare `(major, minor)` threshold, e.g. for the many
    /// `platform >= 0.10` style conditions in the phase contracts.
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        *self >= PlatformVersion::new(major, minor)
    }

    pub fn less_than(&self, major: u32, minor: u32) -> bool {
        *self < PlatformVersion::new(major, minor)
    }
}

impl fmt::Display for PlatformVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid platform API version '{0}'")]
pub struct ParseVersionError(String);

impl FromStr for PlatformVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major_str, minor_str) = s
            .split_once('.')
            .ok_or_else(|| ParseVersionError(s.to_string()))?;
        let major = major_str
            .parse()
            .map_err(|_| ParseVersionError(s.to_string()))?;
        let minor = minor_str
            .parse()
            .map_err(|_| ParseVersionError(s.to_string()))?;
        Ok(PlatformVersion::new(major, minor))
    }
}

/// Platform API versions this orchestrator itself knows how to drive,
/// ordered ascending. Negotiation walks this from highest to lowest.
pub const TOOL_SUPPORTED: &[PlatformVersion] = &[
    PlatformVersion::new(0, 3),
    PlatformVersion::new(0, 4),
    PlatformVersion::new(0, 5),
    PlatformVersion::new(0, 6),
    PlatformVersion::new(0, 7),
    PlatformVersion::new(0, 8),
    PlatformVersion::new(0, 9),
    PlatformVersion::new(0, 10),
    PlatformVersion::new(0, 11),
    PlatformVersion::new(0, 12),
];

/// Two-pointer intersection of two ascending-sorted slices. Commutative,
/// preserves ascending order, equals set intersection (P8).
pub fn intersect(a: &[PlatformVersion], b: &[PlatformVersion]) -> Vec<PlatformVersion> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
        }
    }
    out
}

/// Negotiate the Platform API version for a run.
///
/// If `lifecycle_supported` is non-empty, candidates are the intersection of
/// the parsed lifecycle versions and `builder_supported`; otherwise
/// candidates are simply `builder_supported`. The tool's own supported list
/// is then walked from highest to lowest, returning the first version
/// present in `candidates`.
pub fn negotiate(
    builder_supported: &[PlatformVersion],
    lifecycle_supported: &[String],
) -> Result<PlatformVersion, OrchestratorError> {
    let mut builder_sorted = builder_supported.to_vec();
    builder_sorted.sort();

    let candidates = if lifecycle_supported.is_empty() {
        builder_sorted
    } else {
        let mut parsed = Vec::with_capacity(lifecycle_supported.len());
        for raw in lifecycle_supported {
            parsed.push(PlatformVersion::from_str(raw).map_err(|e| {
                OrchestratorError::Negotiation(format!("bad lifecycle version: {e}"))
            })?);
        }
        parsed.sort();
        intersect(&parsed, &builder_sorted)
    };

    for candidate in TOOL_SUPPORTED.iter().rev() {
        if candidates.contains(candidate) {
            return Ok(*candidate);
        }
    }

    Err(OrchestratorError::Negotiation(
        "unable to find a supported Platform API version".to_string(),
    ))
}
