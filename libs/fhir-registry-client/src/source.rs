//! Classification of user-supplied package references.

use crate::error::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// A package reference after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageReference {
    /// Local folder (package layout or loose definitions).
    Directory(PathBuf),
    /// Local `.tgz` / `.tar.gz` file.
    Archive(PathBuf),
    /// Tarball served over HTTP(S).
    Url(String),
    /// Registry token: `name`, `name@version` or `name#version`.
    Registry {
        name: String,
        version: Option<String>,
    },
}

impl PackageReference {
    /// Classify a reference string.
    ///
    /// URLs first, then existing directories, then archive file names, then
    /// registry tokens. An archive name that doesn't exist on disk is a
    /// `SourceUnreachable` error rather than a registry lookup.
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(Error::UnsupportedFormat("empty reference".to_string()));
        }

        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Ok(PackageReference::Url(reference.to_string()));
        }

        let path = Path::new(reference);
        if path.is_dir() {
            return Ok(PackageReference::Directory(path.to_path_buf()));
        }

        if is_archive_name(reference) {
            if path.is_file() {
                return Ok(PackageReference::Archive(path.to_path_buf()));
            }
            return Err(Error::unreachable(reference, "archive file does not exist"));
        }

        parse_registry_token(reference)
    }

    pub fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageReference::Directory(path) | PackageReference::Archive(path) => {
                write!(f, "{}", path.display())
            }
            PackageReference::Url(url) => f.write_str(url),
            PackageReference::Registry {
                name,
                version: Some(version),
            } => write!(f, "{name}#{version}"),
            PackageReference::Registry {
                name,
                version: None,
            } => f.write_str(name),
        }
    }
}

pub fn is_archive_name(reference: &str) -> bool {
    let lower = reference.to_ascii_lowercase();
    lower.ends_with(".tgz") || lower.ends_with(".tar.gz")
}

fn parse_registry_token(token: &str) -> Result<PackageReference> {
    // A leading '@' is an npm scope, not a version separator.
    let (scope, rest) = match token.strip_prefix('@') {
        Some(stripped) => match stripped.split_once('/') {
            Some((scope, rest)) => (Some(scope), rest),
            None => return Err(Error::UnsupportedFormat(token.to_string())),
        },
        None => (None, token),
    };

    let (name, version) = match rest.find(['#', '@']) {
        Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
        None => (rest, None),
    };

    if !is_valid_name(name) || scope.is_some_and(|s| !is_valid_name(s)) {
        return Err(Error::UnsupportedFormat(token.to_string()));
    }
    let version = match version {
        Some(v) if v.is_empty() || !v.chars().all(is_version_char) => {
            return Err(Error::UnsupportedFormat(token.to_string()))
        }
        Some(v) => Some(v.to_string()),
        None => None,
    };

    let name = match scope {
        Some(scope) => format!("@{scope}/{name}"),
        None => name.to_string(),
    };
    Ok(PackageReference::Registry { name, version })
}

fn is_valid_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

fn is_version_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+')
}
