//! Version parsing and upgrade-path validation (C1).
//!
//! MongoDB versions upgrade along a fixed ladder of minor releases; within a
//! minor release any patch bump is allowed. This module is the single place
//! that knows the ladder and enforces the "one step at a time" rule.

use crate::errors::ValidationError;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// The canonical upgrade ladder. Each entry is a `(major, minor)` pair;
/// consecutive entries are the only legal minor-version jumps.
pub const LADDER: &[(u32, u32)] = &[
    (3, 6),
    (4, 0),
    (4, 2),
    (4, 4),
    (5, 0),
    (6, 0),
    (7, 0),
    (8, 0),
];

/// A parsed `major.minor.patch` version.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    raw: String,
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        let raw = format!("{major}.{minor}.{patch}");
        Self {
            major,
            minor,
            patch,
            raw,
        }
    }

    /// Parse `"M.m"` or `"M.m.p"`. Patch defaults to 0 when omitted.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(ValidationError::ParseError(s.to_string()));
        }
        let major = parts[0]
            .parse::<u32>()
            .map_err(|_| ValidationError::ParseError(s.to_string()))?;
        let minor = parts[1]
            .parse::<u32>()
            .map_err(|_| ValidationError::ParseError(s.to_string()))?;
        let patch = if parts.len() == 3 {
            parts[2]
                .parse::<u32>()
                .map_err(|_| ValidationError::ParseError(s.to_string()))?
        } else {
            0
        };
        Ok(Self {
            major,
            minor,
            patch,
            raw: s.to_string(),
        })
    }

    pub fn major_minor(&self) -> (u32, u32) {
        (self.major, self.minor)
    }

    pub fn major_minor_string(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare two versions, returning -1/0/1 like a C-style comparator.
pub fn compare(a: &Version, b: &Version) -> i32 {
    match a.cmp(b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

fn ladder_successor(major: u32, minor: u32) -> Option<(u32, u32)> {
    let idx = LADDER.iter().position(|&mm| mm == (major, minor))?;
    LADDER.get(idx + 1).copied()
}

/// Validate that `to` is a legal next step from `from`.
///
/// Rules, in order:
/// 1. `to > from` is required.
/// 2. Same `major.minor`: any patch delta is fine.
/// 3. Otherwise `(from.major, from.minor)` must be on the ladder and
///    `(to.major, to.minor)` must be its immediate successor.
pub fn validate_path(from: &Version, to: &Version) -> Result<(), ValidationError> {
    if to <= from {
        return Err(ValidationError::Downgrade {
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    if from.major_minor() == to.major_minor() {
        return Ok(());
    }

    let Some(expected) = ladder_successor(from.major, from.minor) else {
        return Err(ValidationError::OffLadder {
            from: from.major_minor_string(),
        });
    };

    if to.major_minor() == expected {
        return Ok(());
    }

    Err(ValidationError::IllegalJump {
        from: from.major_minor_string(),
        to: to.major_minor_string(),
        required: format!("{}.{}", expected.0, expected.1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn parse_accepts_major_minor() {
        let parsed = v("7.0");
        assert_eq!(parsed.major, 7);
        assert_eq!(parsed.minor, 0);
        assert_eq!(parsed.patch, 0);
    }

    #[test]
    fn parse_accepts_major_minor_patch() {
        let parsed = v("7.0.26");
        assert_eq!(parsed.patch, 26);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Version::parse("not-a-version").is_err());
        assert!(Version::parse("7").is_err());
        assert!(Version::parse("7.0.26.1").is_err());
    }

    #[test]
    fn compare_is_lexicographic() {
        assert_eq!(compare(&v("7.0.1"), &v("7.0.2")), -1);
        assert_eq!(compare(&v("7.0.2"), &v("7.0.2")), 0);
        assert_eq!(compare(&v("7.1.0"), &v("7.0.99")), 1);
    }

    #[test]
    fn validate_path_rejects_equal_or_downgrade() {
        assert!(validate_path(&v("7.0.1"), &v("7.0.1")).is_err());
        assert!(validate_path(&v("7.0.2"), &v("7.0.1")).is_err());
    }

    #[test]
    fn validate_path_allows_any_patch_within_minor() {
        assert!(validate_path(&v("7.0.1"), &v("7.0.26")).is_ok());
    }

    #[test]
    fn validate_path_allows_ladder_successor() {
        assert!(validate_path(&v("6.0.15"), &v("7.0.0")).is_ok());
    }

    #[test]
    fn validate_path_rejects_skipped_rung() {
        let err = validate_path(&v("4.0.0"), &v("4.4.0")).unwrap_err();
        match err {
            ValidationError::IllegalJump { required, .. } => assert_eq!(required, "4.2"),
            other => panic!("expected IllegalJump, got {other:?}"),
        }
    }

    #[test]
    fn validate_path_rejects_off_ladder_source() {
        let err = validate_path(&v("4.1.0"), &v("4.2.0")).unwrap_err();
        assert!(matches!(err, ValidationError::OffLadder { .. }));
    }

    #[test]
    fn ladder_is_strictly_increasing_and_has_eight_rungs() {
        assert_eq!(LADDER.len(), 8);
        for pair in LADDER.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }
}
