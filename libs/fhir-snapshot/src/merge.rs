//! Applying one differential element onto its snapshot element.
//!
//! A differential may only narrow what it inherits. Attempts to widen keep
//! the inherited value and are reported as warnings.

use crate::slicing::merge_slicing;
use crate::warning::{SnapshotWarning, WarningKind};
use vigil_models::{parse_max, ElementDefinition, ElementDefinitionType};

const TYPED_VALUE_PREFIXES: &[&str] = &["fixed", "pattern", "defaultValue", "minValue", "maxValue"];

/// Merge `diff` into `target` in place.
pub fn merge_element(
    target: &mut ElementDefinition,
    diff: &ElementDefinition,
    warnings: &mut Vec<SnapshotWarning>,
) {
    let id = target.element_id();

    merge_cardinality(target, diff, &id, warnings);
    merge_types(target, diff, &id, warnings);
    merge_binding(target, diff, &id, warnings);

    if let Some(slicing) = &diff.slicing {
        target.slicing = Some(match &target.slicing {
            Some(base) => merge_slicing(base, slicing),
            None => slicing.clone(),
        });
    }

    if !diff.constraints().is_empty() {
        let constraints = target.constraint.get_or_insert_with(Vec::new);
        for constraint in diff.constraints() {
            match constraints.iter_mut().find(|c| c.key == constraint.key) {
                Some(existing) => *existing = constraint.clone(),
                None => constraints.push(constraint.clone()),
            }
        }
    }

    if let Some(conditions) = &diff.condition {
        let existing = target.condition.get_or_insert_with(Vec::new);
        for condition in conditions {
            if !existing.contains(condition) {
                existing.push(condition.clone());
            }
        }
    }

    merge_option(&mut target.short, &diff.short);
    merge_option(&mut target.definition, &diff.definition);
    merge_option(&mut target.comment, &diff.comment);
    merge_option(&mut target.must_support, &diff.must_support);
    merge_option(&mut target.is_modifier, &diff.is_modifier);
    merge_option(&mut target.is_summary, &diff.is_summary);
    merge_option(&mut target.max_length, &diff.max_length);
    merge_option(&mut target.slice_is_constraining, &diff.slice_is_constraining);

    for (key, value) in &diff.extras {
        if let Some(prefix) = TYPED_VALUE_PREFIXES
            .iter()
            .find(|prefix| is_typed_key(key, prefix))
        {
            target.remove_typed_value(prefix);
        }
        target.extras.insert(key.clone(), value.clone());
    }
}

fn merge_option<T: Clone>(target: &mut Option<T>, diff: &Option<T>) {
    if diff.is_some() {
        target.clone_from(diff);
    }
}

fn is_typed_key(key: &str, prefix: &str) -> bool {
    key.strip_prefix(prefix)
        .and_then(|rest| rest.chars().next())
        .map(|c| c.is_ascii_uppercase())
        .unwrap_or(false)
}

fn merge_cardinality(
    target: &mut ElementDefinition,
    diff: &ElementDefinition,
    id: &str,
    warnings: &mut Vec<SnapshotWarning>,
) {
    let base_min = target.min_cardinality();
    let base_max = target.max.clone();

    if let Some(min) = diff.min {
        if min < base_min {
            warnings.push(SnapshotWarning::new(
                id,
                WarningKind::CardinalityWidening,
                format!("min {min} is below the inherited min {base_min}; keeping {base_min}"),
            ));
        } else {
            target.min = Some(min);
        }
    }

    if let Some(max) = &diff.max {
        let widens = match (base_max.as_deref().and_then(parse_max), parse_max(max)) {
            (Some(_), None) => max == "*",
            (Some(inherited), Some(new)) => new > inherited,
            (None, _) => false,
        };
        if widens {
            warnings.push(SnapshotWarning::new(
                id,
                WarningKind::CardinalityWidening,
                format!(
                    "max {max} exceeds the inherited max {}; keeping it",
                    base_max.as_deref().unwrap_or("*")
                ),
            ));
        } else {
            target.max = Some(max.clone());
        }
    }

    if let Some(max) = target.max_bound() {
        if target.min_cardinality() > max {
            warnings.push(SnapshotWarning::new(
                id,
                WarningKind::CardinalityWidening,
                format!(
                    "min {} exceeds max {max}; keeping min {base_min}",
                    target.min_cardinality()
                ),
            ));
            target.min = Some(base_min);
        }
    }
}

fn merge_types(
    target: &mut ElementDefinition,
    diff: &ElementDefinition,
    id: &str,
    warnings: &mut Vec<SnapshotWarning>,
) {
    let Some(diff_types) = &diff.types else {
        return;
    };
    if target.types().is_empty() {
        target.types = Some(diff_types.clone());
        return;
    }

    let mut narrowed: Vec<ElementDefinitionType> = Vec::new();
    for diff_type in diff_types {
        if target.types().iter().any(|t| t.code == diff_type.code) {
            narrowed.push(diff_type.clone());
        } else {
            warnings.push(SnapshotWarning::new(
                id,
                WarningKind::TypeWidening,
                format!(
                    "type {} is not among the inherited types [{}]",
                    diff_type.code,
                    target.type_codes().join(", ")
                ),
            ));
        }
    }
    if !narrowed.is_empty() {
        target.types = Some(narrowed);
    }
}

fn merge_binding(
    target: &mut ElementDefinition,
    diff: &ElementDefinition,
    id: &str,
    warnings: &mut Vec<SnapshotWarning>,
) {
    let Some(binding) = &diff.binding else {
        return;
    };
    match &target.binding {
        Some(base) if binding.strength < base.strength => {
            warnings.push(SnapshotWarning::new(
                id,
                WarningKind::BindingWeakening,
                format!(
                    "binding strength {} is weaker than the inherited {}",
                    binding.strength.as_str(),
                    base.strength.as_str()
                ),
            ));
        }
        Some(base) => {
            let mut merged = binding.clone();
            if merged.value_set.is_none() {
                merged.value_set.clone_from(&base.value_set);
            }
            target.binding = Some(merged);
        }
        None => target.binding = Some(binding.clone()),
    }
}
