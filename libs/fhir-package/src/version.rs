//! Version helpers following the FHIR package versioning rules.
//!
//! Package versions are SemVer-like (`4.0.1`, `5.0.0-ballot`) but registries
//! also carry non-numeric versions such as `current` or `dev`. Ordering here
//! is total over all of them so callers can sort freely.

use crate::error::PackageError;
use std::cmp::Ordering;

/// Validate version string format.
///
/// Versions may contain only alphanumeric characters, '.', '_', and '-'.
/// Numeric versions (starting with a digit) need at least `major.minor`.
pub fn validate_version_format(version: &str) -> Result<(), PackageError> {
    if version.is_empty() {
        return Err(PackageError::ValidationError(
            "Version cannot be empty".into(),
        ));
    }

    let allowed = |c: char| c.is_alphanumeric() || matches!(c, '.' | '_' | '-');
    if let Some(bad) = version.chars().find(|c| !allowed(*c)) {
        return Err(PackageError::ValidationError(format!(
            "Version '{version}' contains invalid character '{bad}'"
        )));
    }

    if is_numeric(version) {
        let (base, _) = split_label(version);
        let parts: Vec<&str> = base.split('.').collect();
        if parts.len() < 2 {
            return Err(PackageError::ValidationError(format!(
                "Numeric version '{version}' must look like 'major.minor[.patch]'"
            )));
        }
        if parts
            .iter()
            .any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
        {
            return Err(PackageError::ValidationError(format!(
                "Version '{version}' has non-numeric parts"
            )));
        }
    }

    Ok(())
}

/// Split a version into base and label (`1.2.3-ballot` -> (`1.2.3`, Some(`ballot`))).
pub fn split_label(version: &str) -> (&str, Option<&str>) {
    match version.split_once('-') {
        Some((base, label)) => (base, Some(label)),
        None => (version, None),
    }
}

fn is_numeric(version: &str) -> bool {
    version.chars().next().is_some_and(|c| c.is_ascii_digit())
}

fn numeric_parts(base: &str) -> Vec<u64> {
    base.split('.').map(|p| p.parse().unwrap_or(0)).collect()
}

/// Total order over package versions.
///
/// Numeric versions compare component-wise; for the same base, a labelled
/// version (`1.0.0-ballot`) sorts before the release. Non-numeric versions
/// sort before all numeric ones, lexicographically among themselves.
pub fn compare_versions(v1: &str, v2: &str) -> Ordering {
    match (is_numeric(v1), is_numeric(v2)) {
        (true, true) => {
            let (base1, label1) = split_label(v1);
            let (base2, label2) = split_label(v2);
            let parts1 = numeric_parts(base1);
            let parts2 = numeric_parts(base2);
            let len = parts1.len().max(parts2.len());
            for i in 0..len {
                let a = parts1.get(i).copied().unwrap_or(0);
                let b = parts2.get(i).copied().unwrap_or(0);
                match a.cmp(&b) {
                    Ordering::Equal => {}
                    other => return other,
                }
            }
            match (label1, label2) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            }
        }
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        (false, false) => v1.cmp(v2),
    }
}

/// Check if `version` satisfies `reference`: exact match, patch wildcard
/// (`1.2.x`), or same base ignoring labels.
pub fn version_matches(version: &str, reference: &str) -> bool {
    if version == reference {
        return true;
    }

    if let Some(prefix) = reference.strip_suffix(".x") {
        return version
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('.'))
            .map(|patch| split_label(patch).0.parse::<u32>().is_ok())
            .unwrap_or(false);
    }

    split_label(version).0 == split_label(reference).0
}
