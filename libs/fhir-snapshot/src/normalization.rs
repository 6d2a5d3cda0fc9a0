//! ID and slice name normalization for element lists
//!
//! Snapshot generation addresses elements by id, so every element needs
//! one that agrees with its `sliceName`:
//! - a missing id is derived from the path (plus `:sliceName` for slices)
//! - a slice whose id doesn't end in `:sliceName` gets its last segment fixed
//! - a differential element whose id names a slice but which carries no
//!   `sliceName` gets the slice name from the id

use vigil_models::ElementDefinition;

/// Normalize ids of snapshot elements in place.
pub fn normalize_snapshot(elements: &mut [ElementDefinition]) {
    for element in elements {
        normalize_element_id(element);
    }
}

/// Normalize ids and slice names of differential elements in place.
pub fn normalize_differential(elements: &mut [ElementDefinition]) {
    for element in elements {
        if element.slice_name.is_none() {
            if let Some(slice_name) = element.id.as_deref().and_then(slice_name_from_id) {
                element.slice_name = Some(slice_name.to_string());
            }
        }
        normalize_element_id(element);
    }
}

fn normalize_element_id(element: &mut ElementDefinition) {
    let Some(slice_name) = element.slice_name.as_deref() else {
        if element.id.is_none() {
            element.id = Some(element.path.clone());
        }
        return;
    };

    let suffix = format!(":{slice_name}");
    match element.id.as_deref() {
        Some(id) if id.ends_with(&suffix) => {}
        Some(id) => {
            let prefix = id.rfind('.').map(|pos| &id[..=pos]).unwrap_or("");
            element.id = Some(format!("{prefix}{}{suffix}", element.name()));
        }
        None => element.id = Some(element.key()),
    }
}

/// Slice name carried by the last segment of an element id
/// (`Patient.identifier:mrn` -> `mrn`).
pub fn slice_name_from_id(id: &str) -> Option<&str> {
    let last = id.rsplit('.').next().unwrap_or(id);
    last.split_once(':')
        .map(|(_, slice)| slice)
        .filter(|slice| !slice.is_empty())
}

/// Id of the element owning `id`: one segment up, slice names kept
/// (`Patient.identifier:mrn.system` -> `Patient.identifier:mrn`).
pub fn parent_id(id: &str) -> Option<&str> {
    id.rfind('.').map(|pos| &id[..pos])
}
