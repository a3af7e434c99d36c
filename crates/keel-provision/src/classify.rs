//! Provider error classification
//!
//! One explicit classifier decides whether a provider failure justifies
//! moving to the next region. Call sites never do inline string matching.

/// How to react to a provider error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Capacity/availability trouble scoped to a region; try the next one
    RegionTransient,
    /// Anything else; abort the whole call
    Fatal,
}

/// Substrings (lowercased) that mark a region-transient failure
const REGION_TRANSIENT_PATTERNS: &[&str] = &[
    "capacity",
    "unavailable",
    "service unavailable",
    "503",
    "timed out",
    "timeout",
    "temporarily",
    "try again",
    "overloaded",
    "insufficient resources",
    "region is at capacity",
    "no available instances",
];

/// Classify a provider error by its text
///
/// Providers rarely expose machine-readable codes consistently across API
/// versions, so classification is by pattern on the error text.
#[must_use]
pub fn classify_provider_error(text: &str) -> ErrorClass {
    let lowered = text.to_ascii_lowercase();
    if REGION_TRANSIENT_PATTERNS.iter().any(|p| lowered.contains(p)) {
        ErrorClass::RegionTransient
    } else {
        ErrorClass::Fatal
    }
}
