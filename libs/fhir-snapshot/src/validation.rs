//! Structural checks for differentials and generated snapshots.

use crate::error::{Error, Result};
use vigil_models::{ElementDefinition, Snapshot};

/// A differential must not constrain a child before its (unsliced) parent.
pub fn validate_differential(elements: &[ElementDefinition]) -> Result<()> {
    for (i, elem) in elements.iter().enumerate() {
        if let Some(parent_path) = elem.parent_path() {
            let parent_appears_later = elements[i + 1..]
                .iter()
                .any(|e| e.path == parent_path && e.slice_name.is_none());

            if parent_appears_later {
                return Err(Error::Snapshot(format!(
                    "Differential element '{}' appears before its parent '{}'",
                    elem.path, parent_path
                )));
            }
        }
    }
    Ok(())
}

/// A snapshot starts with its root and lists every parent before its
/// children.
pub fn validate_snapshot(snapshot: &Snapshot) -> Result<()> {
    let Some(root) = snapshot.element.first() else {
        return Err(Error::Snapshot(
            "Snapshot must have at least one element".into(),
        ));
    };
    if root.path.contains('.') {
        return Err(Error::Snapshot(format!(
            "First element must be root, got '{}'",
            root.path
        )));
    }

    for (i, elem) in snapshot.element.iter().enumerate() {
        if let Some(parent_path) = elem.parent_path() {
            if !snapshot.element[..i].iter().any(|e| e.path == parent_path) {
                return Err(Error::Snapshot(format!(
                    "Element '{}' appears before its parent '{}'",
                    elem.path, parent_path
                )));
            }
        }
    }
    Ok(())
}
