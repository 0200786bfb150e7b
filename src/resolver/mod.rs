mod git;
mod http;

pub use git::RemoteTagSource;
pub use http::HttpProbe;

use std::{fs::OpenOptions, io::Write, path::Path};

use chrono::{Days, NaiveDate};
use log::{debug, info, warn};
use regex_lite::Regex;
use thiserror::Error;

use crate::model::{
    version::{PinnedVersions, VersionOrdinal},
    ParseError,
};

/// Lists version tags published by the compiler project.
pub trait TagSource {
    fn release_tags(&self) -> anyhow::Result<Vec<String>>;
}

/// Presence checks against the two upstream publication channels.
pub trait ArtifactProbe {
    fn compiler_wheel_exists(&self, version: &str) -> anyhow::Result<bool>;
    fn runtime_tarball_exists(&self, version: &str) -> anyhow::Result<bool>;
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Failed to list release tags: {0}")]
    TagListing(#[source] anyhow::Error),
    #[error("No release-candidate tags found")]
    NoReleaseTags,
    #[error("No version with a published compiler wheel (tried: {})", tried.join(", "))]
    NoVerifiedWheel { tried: Vec<String> },
}

/// How many of the newest tags are tried before giving up. A wheel for the
/// newest tag can lag its tag by a few hours, so the previous tag acts as a
/// fallback.
const CANDIDATE_COUNT: usize = 2;

/// How many nightly dates are probed, starting from today (UTC).
const NIGHTLY_WINDOW_DAYS: u64 = 3;

/// Discovers the newest IREE version that has a published compiler wheel.
///
/// Tags that do not look like release candidates are discarded. A missing
/// wheel for every candidate is a fatal resolution failure; there is no
/// silent fallback to the currently pinned version.
pub fn resolve_iree(
    tags: &impl TagSource,
    probe: &impl ArtifactProbe,
) -> Result<String, ResolveError> {
    let refs = tags.release_tags().map_err(ResolveError::TagListing)?;

    let re = Regex::new(r"^refs/tags/iree-(\d+\.\d+\.\d+rc\d+)$").unwrap();
    let mut versions: Vec<(VersionOrdinal, String)> = refs
        .iter()
        .filter_map(|name| re.captures(name).map(|c| c[1].to_string()))
        .map(|version| (VersionOrdinal::parse(&version), version))
        .filter(|(ordinal, _)| !ordinal.is_zero())
        .collect();

    if versions.is_empty() {
        return Err(ResolveError::NoReleaseTags);
    }

    versions.sort();
    info!(
        "Found {} rc tags, latest: {}",
        versions.len(),
        versions.last().map(|(_, v)| v.as_str()).unwrap_or("")
    );

    let mut tried = Vec::new();
    for (_, candidate) in versions.into_iter().rev().take(CANDIDATE_COUNT) {
        match probe.compiler_wheel_exists(&candidate) {
            Ok(true) => return Ok(candidate),
            Ok(false) => info!("Compiler wheel not available for {candidate}, trying fallback"),
            Err(error) => warn!("Could not verify compiler wheel for {candidate}: {error:#}"),
        }
        tried.push(candidate);
    }

    Err(ResolveError::NoVerifiedWheel { tried })
}

/// Discovers the newest TheRock nightly by probing the content store for
/// today and the two preceding days (UTC), most recent first.
///
/// Never fatal: an unparseable current version or three missed probes keep
/// the current version with a warning.
pub fn resolve_therock(probe: &impl ArtifactProbe, current: &str, today: NaiveDate) -> String {
    let re = Regex::new(r"^(.+?)(\d{8})$").unwrap();
    let Some(captures) = re.captures(current) else {
        warn!("Cannot parse TheRock version '{current}', keeping current version");
        return current.to_string();
    };
    let prefix = &captures[1];
    debug!("TheRock version prefix: {prefix}");

    for days_ago in 0..NIGHTLY_WINDOW_DAYS {
        let Some(date) = today.checked_sub_days(Days::new(days_ago)) else {
            break;
        };
        let candidate = format!("{prefix}{}", date.format("%Y%m%d"));
        info!("Checking nightly tarball for {candidate}...");
        match probe.runtime_tarball_exists(&candidate) {
            Ok(true) => {
                info!("Found {candidate}");
                return candidate;
            }
            Ok(false) => {}
            Err(error) => warn!("Could not probe nightly tarball for {candidate}: {error:#}"),
        }
    }

    warn!("No newer TheRock version found, keeping {current}");
    current.to_string()
}

/// Writes `resolved` to the pinned record at `path` if and only if at least
/// one project version changed. Returns whether a write occurred.
pub fn compare_and_persist(
    path: &Path,
    pinned: &PinnedVersions,
    resolved: &PinnedVersions,
) -> Result<bool, ParseError> {
    if pinned == resolved {
        info!("Already up-to-date, no changes needed.");
        return Ok(false);
    }

    if pinned.iree != resolved.iree {
        info!("IREE:    {} -> {}", pinned.iree, resolved.iree);
    }
    if pinned.therock != resolved.therock {
        info!("TheRock: {} -> {}", pinned.therock, resolved.therock);
    }

    resolved.write(path)?;
    info!("Updated {}", path.display());
    Ok(true)
}

/// Exposes the pre- and post-resolution versions to a calling workflow by
/// appending `key=value` lines to the automation environment file. Always
/// logs the pairs, written or not.
pub fn export_versions(
    env_file: Option<&Path>,
    current: &PinnedVersions,
    latest: &PinnedVersions,
) -> std::io::Result<()> {
    let pairs = [
        ("CURRENT_IREE_VERSION", current.iree.as_str()),
        ("CURRENT_THEROCK_VERSION", current.therock.as_str()),
        ("LATEST_IREE_VERSION", latest.iree.as_str()),
        ("LATEST_THEROCK_VERSION", latest.therock.as_str()),
    ];

    if let Some(path) = env_file {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        for (key, value) in &pairs {
            writeln!(file, "{key}={value}")?;
        }
    }

    for (key, value) in pairs {
        info!("  {key}={value}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;

    use pretty_assertions::assert_eq;

    struct FakeTags(Vec<&'static str>);

    impl TagSource for FakeTags {
        fn release_tags(&self) -> anyhow::Result<Vec<String>> {
            Ok(self.0.iter().map(|s| s.to_string()).collect())
        }
    }

    #[derive(Default)]
    struct FakeProbe {
        wheels: Vec<&'static str>,
        tarballs: Vec<&'static str>,
        probed: RefCell<Vec<String>>,
    }

    impl ArtifactProbe for FakeProbe {
        fn compiler_wheel_exists(&self, version: &str) -> anyhow::Result<bool> {
            self.probed.borrow_mut().push(version.to_string());
            Ok(self.wheels.contains(&version))
        }

        fn runtime_tarball_exists(&self, version: &str) -> anyhow::Result<bool> {
            self.probed.borrow_mut().push(version.to_string());
            Ok(self.tarballs.contains(&version))
        }
    }

    struct FailingProbe;

    impl ArtifactProbe for FailingProbe {
        fn compiler_wheel_exists(&self, _version: &str) -> anyhow::Result<bool> {
            anyhow::bail!("network down")
        }

        fn runtime_tarball_exists(&self, _version: &str) -> anyhow::Result<bool> {
            anyhow::bail!("network down")
        }
    }

    #[test]
    fn iree_falls_back_to_second_candidate_with_available_wheel() {
        let tags = FakeTags(vec![
            "refs/tags/iree-3.10.0rc20251201",
            "refs/tags/iree-3.11.0rc20260301",
            "refs/tags/iree-3.11.0rc20260302",
        ]);
        let probe = FakeProbe {
            wheels: vec!["3.11.0rc20260301"],
            ..Default::default()
        };
        let resolved = resolve_iree(&tags, &probe).unwrap();
        assert_eq!(resolved, "3.11.0rc20260301");
        // The nominally newest tag is probed first and rejected.
        assert_eq!(
            *probe.probed.borrow(),
            vec!["3.11.0rc20260302", "3.11.0rc20260301"]
        );
    }

    #[test]
    fn iree_ignores_foreign_and_malformed_tags() {
        let tags = FakeTags(vec![
            "refs/tags/v2.9.0",
            "refs/tags/iree-not-a-version",
            "refs/tags/iree-3.11.0rc20260301",
        ]);
        let probe = FakeProbe {
            wheels: vec!["3.11.0rc20260301"],
            ..Default::default()
        };
        assert_eq!(resolve_iree(&tags, &probe).unwrap(), "3.11.0rc20260301");
    }

    #[test]
    fn iree_with_no_tags_is_fatal() {
        let tags = FakeTags(vec!["refs/tags/v2.9.0"]);
        let error = resolve_iree(&tags, &FakeProbe::default()).unwrap_err();
        assert!(matches!(error, ResolveError::NoReleaseTags));
    }

    #[test]
    fn iree_with_no_verified_wheel_is_fatal() {
        let tags = FakeTags(vec![
            "refs/tags/iree-3.11.0rc20260301",
            "refs/tags/iree-3.11.0rc20260302",
        ]);
        let error = resolve_iree(&tags, &FakeProbe::default()).unwrap_err();
        match error {
            ResolveError::NoVerifiedWheel { tried } => {
                assert_eq!(tried, vec!["3.11.0rc20260302", "3.11.0rc20260301"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn iree_probe_errors_count_as_misses() {
        let tags = FakeTags(vec!["refs/tags/iree-3.11.0rc20260301"]);
        let error = resolve_iree(&tags, &FailingProbe).unwrap_err();
        assert!(matches!(error, ResolveError::NoVerifiedWheel { .. }));
    }

    #[test]
    fn therock_probes_three_days_most_recent_first() {
        let probe = FakeProbe {
            tarballs: vec!["7.12.0a20260227"],
            ..Default::default()
        };
        let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let resolved = resolve_therock(&probe, "7.12.0a20260228", today);
        assert_eq!(resolved, "7.12.0a20260227");
        assert_eq!(
            *probe.probed.borrow(),
            vec!["7.12.0a20260301", "7.12.0a20260228", "7.12.0a20260227"]
        );
    }

    #[test]
    fn therock_keeps_current_when_nothing_newer_exists() {
        let probe = FakeProbe::default();
        let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(
            resolve_therock(&probe, "7.12.0a20260228", today),
            "7.12.0a20260228"
        );
        assert_eq!(probe.probed.borrow().len(), 3);
    }

    #[test]
    fn therock_probe_errors_are_soft() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(
            resolve_therock(&FailingProbe, "7.12.0a20260228", today),
            "7.12.0a20260228"
        );
    }

    #[test]
    fn therock_unparseable_current_version_is_kept() {
        let probe = FakeProbe::default();
        let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(resolve_therock(&probe, "nightly", today), "nightly");
        assert!(probe.probed.borrow().is_empty());
    }

    #[test]
    fn persist_writes_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("version.json");
        let pinned = PinnedVersions {
            iree: "3.10.0rc20251201".to_string(),
            therock: "7.12.0a20260228".to_string(),
        };
        pinned.write(&path).unwrap();

        let resolved = PinnedVersions {
            iree: "3.11.0rc20260301".to_string(),
            therock: "7.12.0a20260228".to_string(),
        };

        assert!(compare_and_persist(&path, &pinned, &resolved).unwrap());
        let reread = PinnedVersions::from_file(&path).unwrap();
        assert_eq!(reread, resolved);

        // Identical resolved values on a second run perform no write.
        let before = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert!(!compare_and_persist(&path, &reread, &resolved).unwrap());
        let after = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn export_appends_version_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("github.env");
        std::fs::write(&path, "EXISTING=1\n").unwrap();

        let current = PinnedVersions {
            iree: "3.10.0rc20251201".to_string(),
            therock: "7.12.0a20260228".to_string(),
        };
        let latest = PinnedVersions {
            iree: "3.11.0rc20260301".to_string(),
            therock: "7.12.0a20260228".to_string(),
        };
        export_versions(Some(&path), &current, &latest).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "EXISTING=1\n\
             CURRENT_IREE_VERSION=3.10.0rc20251201\n\
             CURRENT_THEROCK_VERSION=7.12.0a20260228\n\
             LATEST_IREE_VERSION=3.11.0rc20260301\n\
             LATEST_THEROCK_VERSION=7.12.0a20260228\n"
        );
    }
}
