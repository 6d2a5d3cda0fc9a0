//! Version resolution for package references.
//!
//! Two entry points:
//! - [`select_version`] resolves a version *reference* taken from a manifest
//!   dependency or a user token (`1.5.x`, `1.2`, `current`, `4.0.1`).
//! - [`latest_version`] picks the newest version of a registry listing when
//!   the caller gave no version at all.

use chrono::{DateTime, Utc};
use semver::Version;
use std::cmp::Ordering;
use std::collections::HashMap;
use vigil_package::{compare_versions, split_label};

/// Versions a registry reports for one package.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionListing {
    pub name: String,
    pub versions: Vec<String>,
    /// Publish timestamps from the registry's `time` map, when present.
    pub published: HashMap<String, DateTime<Utc>>,
    /// The `latest` dist-tag, when present.
    pub latest_tag: Option<String>,
}

impl VersionListing {
    pub fn new(name: impl Into<String>, versions: Vec<String>) -> Self {
        Self {
            name: name.into(),
            versions,
            ..Default::default()
        }
    }
}

/// Lenient SemVer parse: `1.2` is read as `1.2.0`.
pub fn parse_semver(version: &str) -> Option<Version> {
    if let Ok(v) = Version::parse(version) {
        return Some(v);
    }
    let (base, label) = split_label(version);
    if base.split('.').count() == 2 {
        let padded = match label {
            Some(label) => format!("{base}.0-{label}"),
            None => format!("{base}.0"),
        };
        return Version::parse(&padded).ok();
    }
    None
}

fn precedence(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch)
        .cmp(&(b.major, b.minor, b.patch))
        .then_with(|| a.pre.cmp(&b.pre))
}

/// Newest version in a listing.
///
/// Greatest SemVer wins, with pre-releases below their release. Versions of
/// equal precedence are ordered by publish date. If nothing parses as
/// SemVer the `latest` dist-tag is used, then plain version ordering.
pub fn latest_version(listing: &VersionListing) -> Option<String> {
    let best = listing
        .versions
        .iter()
        .filter_map(|v| parse_semver(v).map(|parsed| (v, parsed)))
        .max_by(|(a, pa), (b, pb)| {
            precedence(pa, pb).then_with(|| listing.published.get(*a).cmp(&listing.published.get(*b)))
        })
        .map(|(v, _)| v.clone());

    best.or_else(|| {
        listing
            .latest_tag
            .as_ref()
            .filter(|tag| listing.versions.contains(tag))
            .cloned()
    })
    .or_else(|| {
        listing
            .versions
            .iter()
            .max_by(|a, b| compare_versions(a, b))
            .cloned()
    })
}

/// Select the best matching version for a version reference.
///
/// - missing, `current`, `dev`, `latest` -> newest unlabeled version
/// - `1.5.x` -> highest patch of 1.5, unlabeled preferred
/// - `1.2` -> treated as `1.2.x`
/// - exact -> that version; an unlabeled request also accepts a labeled
///   build of the same version, a labeled request falls back to the release
pub fn select_version(versions: &[String], reference: Option<&str>) -> Option<String> {
    if versions.is_empty() {
        return None;
    }

    match reference.map(str::trim).unwrap_or("") {
        "" | "current" | "dev" | "latest" => newest_milestone(versions),
        r if r.ends_with(".x") => select_patch_range(versions, r.trim_end_matches(".x")),
        r if is_major_minor(r) => select_patch_range(versions, r),
        r => select_exact(versions, r),
    }
}

fn newest_milestone(versions: &[String]) -> Option<String> {
    let unlabeled = versions
        .iter()
        .filter(|v| split_label(v).1.is_none())
        .max_by(|a, b| compare_versions(a, b));
    unlabeled
        .or_else(|| versions.iter().max_by(|a, b| compare_versions(a, b)))
        .cloned()
}

fn select_patch_range(versions: &[String], prefix: &str) -> Option<String> {
    let prefix_depth = prefix.split('.').count();
    if prefix.split('.').any(|p| p.parse::<u32>().is_err()) {
        return None;
    }

    let in_range: Vec<&String> = versions
        .iter()
        .filter(|v| {
            let (base, _) = split_label(v);
            base.strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('.'))
                .is_some_and(|patch| patch.parse::<u32>().is_ok())
                && base.split('.').count() == prefix_depth + 1
        })
        .collect();

    let unlabeled = in_range
        .iter()
        .filter(|v| split_label(v).1.is_none())
        .max_by(|a, b| compare_versions(a, b));
    unlabeled
        .or_else(|| in_range.iter().max_by(|a, b| compare_versions(a, b)))
        .map(|v| (*v).clone())
}

fn select_exact(versions: &[String], reference: &str) -> Option<String> {
    if let Some(v) = versions.iter().find(|v| *v == reference) {
        return Some(v.clone());
    }
    let (base, label) = split_label(reference);
    match label {
        Some(_) => versions.iter().find(|v| *v == base).cloned(),
        None => versions
            .iter()
            .filter(|v| split_label(v).0 == base)
            .max_by(|a, b| compare_versions(a, b))
            .cloned(),
    }
}

fn is_major_minor(reference: &str) -> bool {
    let parts: Vec<&str> = reference.split('.').collect();
    parts.len() == 2 && parts.iter().all(|p| p.parse::<u32>().is_ok())
}
