//! Slicing bookkeeping for snapshot generation
//!
//! - locating the element a slice belongs to (including re-slices `a/b`)
//! - merging slicing definitions when a differential restates them
//! - the default slicing entry used when a differential slices an element
//!   that declares no slicing

use vigil_models::{
    DiscriminatorType, ElementDefinition, ElementDefinitionDiscriminator,
    ElementDefinitionSlicing, SlicingRules, EXTENSION_TYPE,
};

/// Id of the element a slice with `id` and `slice_name` is cut from.
///
/// `Patient.identifier:mrn` -> `Patient.identifier`; a re-slice
/// `Patient.identifier:mrn/old` belongs to `Patient.identifier:mrn`.
pub fn slice_owner_id(id: &str, slice_name: &str) -> Option<String> {
    let unsliced = id.strip_suffix(slice_name)?.strip_suffix(':')?;
    match slice_name.rsplit_once('/') {
        Some((parent_slice, _)) => Some(format!("{unsliced}:{parent_slice}")),
        None => Some(unsliced.to_string()),
    }
}

/// Slicing entry for an element sliced without one.
///
/// Extensions are sliced by `url` and choice elements by type, as FHIR
/// defines for those elements; anything else gets an open slicing with no
/// discriminator.
pub fn default_slicing(element: &ElementDefinition) -> ElementDefinitionSlicing {
    let discriminator = if element.is_choice_type() {
        Some(vec![ElementDefinitionDiscriminator {
            discriminator_type: DiscriminatorType::Type,
            path: "$this".to_string(),
        }])
    } else if element.types().iter().any(|t| t.code == EXTENSION_TYPE) {
        Some(vec![ElementDefinitionDiscriminator {
            discriminator_type: DiscriminatorType::Value,
            path: "url".to_string(),
        }])
    } else {
        None
    };

    ElementDefinitionSlicing {
        discriminator,
        description: None,
        ordered: Some(false),
        rules: SlicingRules::Open,
    }
}

/// Whether slicing this element without an explicit entry is normal FHIR
/// practice (choice types and extensions).
pub fn is_implicitly_sliceable(element: &ElementDefinition) -> bool {
    element.is_choice_type() || element.types().iter().any(|t| t.code == EXTENSION_TYPE)
}

/// Merge a differential's slicing onto the base slicing.
///
/// Discriminators, description and ordering come from the differential when
/// given. Rules only ever get stricter: closed beats openAtEnd beats open.
pub fn merge_slicing(
    base: &ElementDefinitionSlicing,
    diff: &ElementDefinitionSlicing,
) -> ElementDefinitionSlicing {
    ElementDefinitionSlicing {
        discriminator: diff
            .discriminator
            .clone()
            .or_else(|| base.discriminator.clone()),
        description: diff
            .description
            .clone()
            .or_else(|| base.description.clone()),
        ordered: match (base.ordered, diff.ordered) {
            (Some(true), _) => Some(true),
            (base_ordered, diff_ordered) => diff_ordered.or(base_ordered),
        },
        rules: match (base.rules, diff.rules) {
            (_, SlicingRules::Closed) | (SlicingRules::Closed, _) => SlicingRules::Closed,
            (_, SlicingRules::OpenAtEnd) | (SlicingRules::OpenAtEnd, _) => SlicingRules::OpenAtEnd,
            (_, diff_rules) => diff_rules,
        },
    }
}
