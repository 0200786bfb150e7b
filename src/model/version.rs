use std::{
    fmt::{self, Display},
    path::Path,
};

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::model::ParseError;

/// Ordinal extracted from a release-candidate version string such as
/// `3.11.0rc20260301`. Strings that do not match the expected pattern map to
/// the zero ordinal, which sorts below every real release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionOrdinal {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub rc: u64,
}

impl VersionOrdinal {
    pub const ZERO: VersionOrdinal = VersionOrdinal {
        major: 0,
        minor: 0,
        patch: 0,
        rc: 0,
    };

    pub fn parse(version: &str) -> VersionOrdinal {
        let re = Regex::new(r"^(\d+)\.(\d+)\.(\d+)rc(\d+)").unwrap();
        let Some(captures) = re.captures(version) else {
            return VersionOrdinal::ZERO;
        };
        let part = |i: usize| captures.get(i).and_then(|m| m.as_str().parse().ok());
        match (part(1), part(2), part(3), part(4)) {
            (Some(major), Some(minor), Some(patch), Some(rc)) => VersionOrdinal {
                major,
                minor,
                patch,
                rc,
            },
            _ => VersionOrdinal::ZERO,
        }
    }

    pub fn is_zero(&self) -> bool {
        self == &VersionOrdinal::ZERO
    }
}

impl Display for VersionOrdinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}rc{}",
            self.major, self.minor, self.patch, self.rc
        )
    }
}

/// Pinned upstream versions, persisted as `version.json` in the project root.
/// Read by both the resolver and the orchestrator, rewritten by the resolver
/// only when a field actually changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PinnedVersions {
    #[serde(rename = "iree-version")]
    pub iree: String,
    #[serde(rename = "therock-version")]
    pub therock: String,
}

impl PinnedVersions {
    pub fn from_file(path: &Path) -> Result<PinnedVersions, ParseError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn write(&self, path: &Path) -> Result<(), ParseError> {
        let mut content = serde_json::to_string_pretty(self)?;
        content.push('\n');
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn ordinal_preserves_release_order() {
        let earlier = VersionOrdinal::parse("3.10.0rc20251201");
        let later = VersionOrdinal::parse("3.11.0rc20260301");
        let latest = VersionOrdinal::parse("3.11.0rc20260302");
        assert!(earlier < later);
        assert!(later < latest);
        assert!(VersionOrdinal::parse("4.0.0rc1") > latest);
    }

    #[test]
    fn ordinal_component_order_is_lexicographic() {
        assert!(VersionOrdinal::parse("1.2.3rc4") < VersionOrdinal::parse("1.2.4rc1"));
        assert!(VersionOrdinal::parse("1.9.0rc9") < VersionOrdinal::parse("1.10.0rc1"));
    }

    #[test]
    fn malformed_versions_parse_to_zero() {
        for malformed in ["", "garbage", "1.2.3", "1.2rc3", "a.b.crc1", "7.12.0a20260228"] {
            assert_eq!(VersionOrdinal::parse(malformed), VersionOrdinal::ZERO);
        }
        assert!(VersionOrdinal::ZERO < VersionOrdinal::parse("0.0.1rc1"));
    }

    #[test]
    fn ordinal_displays_in_source_format() {
        assert_eq!(VersionOrdinal::parse("3.11.0rc20260301").to_string(), "3.11.0rc20260301");
    }

    #[test]
    fn pinned_versions_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("version.json");
        let versions = PinnedVersions {
            iree: "3.10.0rc20251201".to_string(),
            therock: "7.12.0a20260228".to_string(),
        };
        versions.write(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"iree-version\": \"3.10.0rc20251201\""));
        assert!(content.ends_with('\n'));

        assert_eq!(PinnedVersions::from_file(&path).unwrap(), versions);
    }
}
