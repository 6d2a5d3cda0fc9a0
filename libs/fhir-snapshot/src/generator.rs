//! Snapshot generation: a differential applied onto its base snapshot.
//!
//! Differential elements are applied in declaration order and addressed by
//! element id:
//! - an id already in the snapshot is narrowed in place ([`merge_element`])
//! - a new slice is cut from its unsliced element, seeded with a copy of
//!   that element's children, and appended after the existing slices
//! - a new child of an element without children unfolds the element's data
//!   type (or `contentReference`) first, then is merged or inserted
//!
//! `Observation.valueQuantity`-style differential paths are mapped onto the
//! `value[x]` element with the type restricted accordingly.

use crate::merge::merge_element;
use crate::normalization::{normalize_differential, normalize_snapshot, parent_id};
use crate::slicing::{default_slicing, is_implicitly_sliceable, slice_owner_id};
use crate::validation::{validate_differential, validate_snapshot};
use crate::warning::{SnapshotWarning, WarningKind};
use tracing::debug;
use vigil_models::{
    choice_suffix, is_primitive_type, type_code_for_suffix, Differential, ElementDefinition,
    ElementDefinitionBase, ElementDefinitionType, Snapshot,
};

/// A generated snapshot and what was ignored or assumed producing it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedSnapshot {
    pub snapshot: Snapshot,
    pub warnings: Vec<SnapshotWarning>,
}

/// Snapshot elements of data types, used to unfold an element before a
/// differential constrains its children.
pub trait TypeSnapshots {
    /// Elements of the type (or the type's first profile), root first.
    fn type_elements(&self, element_type: &ElementDefinitionType) -> Option<Vec<ElementDefinition>>;
}

impl<F> TypeSnapshots for F
where
    F: Fn(&ElementDefinitionType) -> Option<Vec<ElementDefinition>>,
{
    fn type_elements(&self, element_type: &ElementDefinitionType) -> Option<Vec<ElementDefinition>> {
        self(element_type)
    }
}

/// No type unfolding; children of unfolded types are treated as new paths.
pub struct NoTypeSnapshots;

impl TypeSnapshots for NoTypeSnapshots {
    fn type_elements(&self, _element_type: &ElementDefinitionType) -> Option<Vec<ElementDefinition>> {
        None
    }
}

/// Apply `differential` onto `base`.
pub fn generate_snapshot(
    base: &Snapshot,
    differential: &Differential,
    types: &dyn TypeSnapshots,
) -> GeneratedSnapshot {
    let mut elements = base.element.clone();
    normalize_snapshot(&mut elements);
    let mut diff = differential.element.clone();
    normalize_differential(&mut diff);

    let mut generation = Generation {
        elements,
        warnings: Vec::new(),
        types,
    };

    if let Err(err) = validate_differential(&diff) {
        generation.warn("", WarningKind::Structure, err.to_string());
    }

    generation.map_renamed_choices(&mut diff);
    for element in &diff {
        generation.apply(element);
    }

    let snapshot = Snapshot::new(generation.elements);
    let mut warnings = generation.warnings;
    if let Err(err) = validate_snapshot(&snapshot) {
        warnings.push(SnapshotWarning::new("", WarningKind::Structure, err.to_string()));
    }
    GeneratedSnapshot { snapshot, warnings }
}

struct Generation<'a> {
    elements: Vec<ElementDefinition>,
    warnings: Vec<SnapshotWarning>,
    types: &'a dyn TypeSnapshots,
}

impl Generation<'_> {
    fn warn(&mut self, element: &str, kind: WarningKind, message: impl Into<String>) {
        self.warnings.push(SnapshotWarning::new(element, kind, message));
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.elements.iter().position(|e| e.element_id() == id)
    }

    /// Index just past the element's own (unsliced) descendants.
    fn children_end(&self, index: usize) -> usize {
        let prefix = format!("{}.", self.elements[index].element_id());
        let mut end = index + 1;
        while end < self.elements.len() && self.elements[end].element_id().starts_with(&prefix) {
            end += 1;
        }
        end
    }

    /// Index just past the element's descendants and all of its slices.
    fn subtree_end(&self, index: usize) -> usize {
        let id = self.elements[index].element_id();
        let child = format!("{id}.");
        let slice = format!("{id}:");
        let reslice = format!("{id}/");
        let mut end = index + 1;
        while end < self.elements.len() {
            let next = self.elements[end].element_id();
            if !(next.starts_with(&child) || next.starts_with(&slice) || next.starts_with(&reslice)) {
                break;
            }
            end += 1;
        }
        end
    }

    fn apply(&mut self, diff: &ElementDefinition) {
        let id = diff.element_id();

        if let Some(index) = self.position(&id) {
            merge_element(&mut self.elements[index], diff, &mut self.warnings);
            return;
        }

        if let Some(slice_name) = diff.slice_name.as_deref() {
            if let Some(owner_id) = slice_owner_id(&id, slice_name) {
                match self.locate(&owner_id) {
                    Some(owner) => {
                        let index = self.add_slice(owner, slice_name, &id);
                        merge_element(&mut self.elements[index], diff, &mut self.warnings);
                    }
                    None => self.warn(
                        &id,
                        WarningKind::UnknownElement,
                        format!("sliced element {owner_id} is not in the base snapshot"),
                    ),
                }
                return;
            }
        }

        if let Some(index) = self.locate(&id) {
            merge_element(&mut self.elements[index], diff, &mut self.warnings);
            return;
        }

        let Some(parent) = parent_id(&id).and_then(|parent| self.locate(parent)) else {
            self.warn(
                &id,
                WarningKind::UnknownElement,
                "no parent element in the base snapshot",
            );
            return;
        };

        let mut element = diff.clone();
        if element.base.is_none() {
            element.base = Some(ElementDefinitionBase {
                path: element.path.clone(),
                min: element.min_cardinality(),
                max: element.max.clone().unwrap_or_else(|| "*".to_string()),
            });
        }
        let at = self.children_end(parent);
        debug!(element = %id, "adding element not present in base");
        self.elements.insert(at, element);
    }

    /// Find an element by id, unfolding ancestors' types when needed.
    fn locate(&mut self, id: &str) -> Option<usize> {
        if let Some(index) = self.position(id) {
            return Some(index);
        }
        let parent = self.locate(parent_id(id)?)?;
        if self.unfold(parent) {
            self.position(id)
        } else {
            None
        }
    }

    /// Insert the children of a leaf element from its type or content
    /// reference. Returns whether anything was inserted.
    fn unfold(&mut self, index: usize) -> bool {
        if self.children_end(index) > index + 1 {
            return false;
        }
        let element = self.elements[index].clone();
        let element_id = element.element_id();
        let element_path = element.path.clone();

        let (source, root_id, root_path) = if let Some(reference) = &element.content_reference {
            let target = reference.rsplit('#').next().unwrap_or(reference).to_string();
            let Some(target_index) = self.position(&target) else {
                self.warn(
                    &element_id,
                    WarningKind::Unresolved,
                    format!("content reference {reference} not found"),
                );
                return false;
            };
            let end = self.children_end(target_index);
            let source = self.elements[target_index + 1..end].to_vec();
            let root_path = self.elements[target_index].path.clone();
            (source, target, root_path)
        } else {
            let [element_type] = element.types() else {
                return false;
            };
            if is_primitive_type(&element_type.code) {
                return false;
            }
            let element_type = element_type.clone();
            match self.types.type_elements(&element_type) {
                Some(type_elements) if !type_elements.is_empty() => {
                    let root = &type_elements[0];
                    let root_id = root.element_id();
                    let root_path = root.path.clone();
                    (type_elements[1..].to_vec(), root_id, root_path)
                }
                _ => {
                    self.warn(
                        &element_id,
                        WarningKind::Unresolved,
                        format!("no snapshot available for type {}", element_type.code),
                    );
                    return false;
                }
            }
        };

        if source.is_empty() {
            return false;
        }
        let children: Vec<ElementDefinition> = source
            .into_iter()
            .map(|mut child| {
                rebase(&mut child, &root_id, &root_path, &element_id, &element_path);
                child
            })
            .collect();
        debug!(element = %element_id, children = children.len(), "unfolded element");
        self.elements.splice(index + 1..index + 1, children);
        true
    }

    /// Cut the slice `slice_id` from the element at `owner`; returns its
    /// index.
    fn add_slice(&mut self, owner: usize, slice_name: &str, slice_id: &str) -> usize {
        let owner_id = self.elements[owner].element_id();

        if self.elements[owner].slicing.is_none() {
            let slicing = default_slicing(&self.elements[owner]);
            if !is_implicitly_sliceable(&self.elements[owner]) {
                self.warn(
                    &owner_id,
                    WarningKind::ImplicitSlicing,
                    format!("slice {slice_name} declared without a slicing entry; assuming open slicing"),
                );
            }
            self.elements[owner].slicing = Some(slicing);
        }

        let mut slice = self.elements[owner].clone();
        slice.id = Some(slice_id.to_string());
        slice.slice_name = Some(slice_name.to_string());
        slice.slicing = None;
        slice.min = Some(0);

        let children_end = self.children_end(owner);
        let mut inserted = vec![slice];
        inserted.extend(self.elements[owner + 1..children_end].iter().cloned().map(|mut child| {
            let child_id = child.element_id();
            if let Some(rest) = child_id.strip_prefix(&owner_id) {
                child.id = Some(format!("{slice_id}{rest}"));
            }
            child
        }));

        let at = self.subtree_end(owner);
        self.elements.splice(at..at, inserted);
        at
    }

    /// Rewrite `Observation.valueQuantity` style ids (and their children)
    /// onto the choice element `Observation.value[x]`.
    fn map_renamed_choices(&self, diff: &mut [ElementDefinition]) {
        for i in 0..diff.len() {
            let id = diff[i].element_id();
            if self.position(&id).is_some() || diff[i].slice_name.is_some() {
                continue;
            }
            let Some(parent) = parent_id(&id) else {
                continue;
            };
            let name = &id[parent.len() + 1..];
            let choice = self.elements.iter().find_map(|e| {
                let e_id = e.element_id();
                let base = e_id.strip_prefix(parent)?.strip_prefix('.')?.strip_suffix("[x]")?;
                let suffix = choice_suffix(name, base)?;
                Some((e_id.clone(), e.path.clone(), type_code_for_suffix(suffix)))
            });
            let Some((choice_id, choice_path, type_code)) = choice else {
                continue;
            };

            let renamed_path = diff[i].path.clone();
            let element = &mut diff[i];
            element.id = Some(choice_id.clone());
            element.path = choice_path.clone();
            if element.types.is_none() {
                element.types = Some(vec![ElementDefinitionType::new(type_code)]);
            }

            let old_prefix = format!("{id}.");
            for child in diff[i + 1..].iter_mut() {
                let child_id = child.element_id();
                if let Some(rest) = child_id.strip_prefix(&old_prefix) {
                    child.id = Some(format!("{choice_id}.{rest}"));
                    if let Some(rest_path) = child.path.strip_prefix(&renamed_path) {
                        child.path = format!("{choice_path}{rest_path}");
                    }
                }
            }
        }
    }
}

/// Move a type's element under `element_id`/`element_path`.
fn rebase(
    child: &mut ElementDefinition,
    root_id: &str,
    root_path: &str,
    element_id: &str,
    element_path: &str,
) {
    let child_id = child.element_id();
    if let Some(rest) = child_id.strip_prefix(root_id) {
        child.id = Some(format!("{element_id}{rest}"));
    }
    if let Some(rest) = child.path.strip_prefix(root_path) {
        child.path = format!("{element_path}{rest}");
    }
}
