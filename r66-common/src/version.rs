//! Partner version parsing and threshold comparison
//!
//! Peers announce a version string during authentication. Only the
//! `major.minor.patch` prefix takes part in comparisons; anything after it
//! (a pre-release tag, or a `.{json}` capability extension) is ignored here.

use semver::Version;

/// First version reporting file size and final digest
pub const VERSION_FILE_SIZE: Version = Version::new(2, 4, 12);

/// First version using the configured field separator instead of a blank
pub const VERSION_SEPARATOR: Version = Version::new(2, 4, 13);

/// First version speaking the JSON dialect
pub const VERSION_JSON: Version = Version::new(2, 4, 17);

/// First version allowing the responder to change file information
pub const VERSION_CHANGE_FILE_INFO: Version = Version::new(3, 0, 4);

/// Version assumed when an authentication packet carries none
pub const DEFAULT_PARTNER_VERSION: &str = "2.4.12";

/// Parse the `major.minor.patch` prefix of a version string
///
/// Returns `None` for empty or malformed strings. Missing minor or patch
/// components are treated as zero (`"3"` parses as `3.0.0`).
#[must_use]
pub fn parse_version(raw: &str) -> Option<Version> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let mut parts = [0u64; 3];
    let mut count = 0;
    for piece in raw.split('.') {
        if count == 3 {
            break;
        }
        let digits: String = piece.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            break;
        }
        parts[count] = digits.parse().ok()?;
        count += 1;
        if digits.len() != piece.len() {
            // "0-SNAPSHOT" style suffix ends the numeric prefix
            break;
        }
    }

    if count == 0 {
        return None;
    }
    Some(Version::new(parts[0], parts[1], parts[2]))
}

/// True when `candidate` is at least `threshold`, ignoring pre-release tags
#[must_use]
pub fn is_at_least(candidate: &Version, threshold: &Version) -> bool {
    (candidate.major, candidate.minor, candidate.patch)
        >= (threshold.major, threshold.minor, threshold.patch)
}

/// Split an announced version into the plain version and its JSON extension
///
/// `"3.1.0.{\"HOSTID\":\"b\"}"` yields `("3.1.0", Some("{\"HOSTID\":\"b\"}"))`.
#[must_use]
pub fn split_extension(announced: &str) -> (&str, Option<&str>) {
    match announced.find(".{") {
        Some(pos) => (&announced[..pos], Some(&announced[pos + 1..])),
        None => (announced, None),
    }
}
