//! Schema versioning and compatibility.

/// Current schema version for registry records and exported JSON.
///
/// Follows semver: MAJOR.MINOR.PATCH
/// - MAJOR: Breaking changes (procedure IR changes, field removals)
/// - MINOR: Additive changes (new optional fields)
/// - PATCH: Bug fixes, documentation
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Check if a schema version is compatible with current.
///
/// Registered rebuild procedures written under a different major version are
/// not replayed.
pub fn is_compatible(version: &str) -> bool {
    let current_major = SCHEMA_VERSION
        .split('.')
        .next()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(0);

    let other_major = version
        .split('.')
        .next()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(0);

    current_major == other_major
}
