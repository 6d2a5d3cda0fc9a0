//! Problems found while generating a snapshot.
//!
//! A profile that widens its base, or slices an element without a slicing
//! entry, still gets a snapshot; what was ignored or assumed is recorded
//! here so callers can surface it.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarningKind {
    /// `min` lowered or `max` raised relative to the base.
    CardinalityWidening,
    /// A type not allowed by the base element.
    TypeWidening,
    /// A binding weaker than the base binding.
    BindingWeakening,
    /// A slice on an element with no slicing entry.
    ImplicitSlicing,
    /// A differential element with no place in the snapshot.
    UnknownElement,
    /// A type or content reference that could not be unfolded.
    Unresolved,
    /// The generated element list is structurally inconsistent.
    Structure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotWarning {
    /// Id of the element the warning is about.
    pub element: String,
    pub kind: WarningKind,
    pub message: String,
}

impl SnapshotWarning {
    pub fn new(element: impl Into<String>, kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            element: element.into(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for SnapshotWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.element, self.message)
    }
}
