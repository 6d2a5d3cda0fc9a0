//! Choice-type (`value[x]`) resolution over instance JSON.
//!
//! A choice group is one logical element that appears in an instance under
//! exactly one of several keys (`valueString`, `valueQuantity`, ...). The
//! group is resolved into a [`ChoiceValue`] by looking at which keys are
//! present, instead of probing the object dynamically.

use serde_json::{Map, Value};

/// FHIR primitive type codes. These are spelled lower-camel in type codes but
/// upper-camel as choice suffixes (`dateTime` / `valueDateTime`).
pub const PRIMITIVE_TYPES: &[&str] = &[
    "base64Binary",
    "boolean",
    "canonical",
    "code",
    "date",
    "dateTime",
    "decimal",
    "id",
    "instant",
    "integer",
    "integer64",
    "markdown",
    "oid",
    "positiveInt",
    "string",
    "time",
    "unsignedInt",
    "uri",
    "url",
    "uuid",
    "xhtml",
];

pub fn is_primitive_type(code: &str) -> bool {
    PRIMITIVE_TYPES.contains(&code)
}

/// Resolved state of a choice group in one instance object.
#[derive(Debug, Clone, PartialEq)]
pub enum ChoiceValue<'a> {
    /// No key of the group is present.
    Absent,
    /// Exactly one type of the group is present, as its value key, its
    /// `_` shadow (primitive id/extensions), or both. `key` is always the
    /// unprefixed name.
    One {
        key: &'a str,
        type_code: String,
        value: Option<&'a Value>,
        shadow: Option<&'a Value>,
    },
    /// More than one type is present; holds every unprefixed key found.
    Many(Vec<&'a str>),
}

/// Type code for a choice suffix (`DateTime` -> `dateTime`, `Quantity` -> `Quantity`).
pub fn type_code_for_suffix(suffix: &str) -> String {
    let mut chars = suffix.chars();
    let lowered = match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => return String::new(),
    };
    if is_primitive_type(&lowered) {
        lowered
    } else {
        suffix.to_string()
    }
}

/// Choice suffix for a type code (`dateTime` -> `DateTime`).
pub fn suffix_for_type_code(code: &str) -> String {
    let mut chars = code.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// The suffix of `key` if it belongs to the choice group `base`.
pub fn choice_suffix<'k>(key: &'k str, base: &str) -> Option<&'k str> {
    let suffix = key.strip_prefix(base)?;
    if suffix.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
        Some(suffix)
    } else {
        None
    }
}

/// Resolve the choice group `base` in `object`. Keys for which
/// `is_other_element` returns true belong to sibling elements that share the
/// prefix and are skipped. `valueString` and `_valueString` are the same
/// member of the group.
pub fn resolve_choice<'a>(
    object: &'a Map<String, Value>,
    base: &str,
    is_other_element: impl Fn(&str) -> bool,
) -> ChoiceValue<'a> {
    let mut found: Vec<Member<'a>> = Vec::new();
    for (key, entry) in object {
        let (name, is_shadow) = match key.strip_prefix('_') {
            Some(name) => (name, true),
            None => (key.as_str(), false),
        };
        if is_other_element(name) {
            continue;
        }
        let Some(suffix) = choice_suffix(name, base) else {
            continue;
        };
        let index = match found.iter().position(|m| m.key == name) {
            Some(index) => index,
            None => {
                found.push(Member {
                    key: name,
                    suffix,
                    value: None,
                    shadow: None,
                });
                found.len() - 1
            }
        };
        if is_shadow {
            found[index].shadow = Some(entry);
        } else {
            found[index].value = Some(entry);
        }
    }

    match found.len() {
        0 => ChoiceValue::Absent,
        1 => {
            let member = found.remove(0);
            ChoiceValue::One {
                key: member.key,
                type_code: type_code_for_suffix(member.suffix),
                value: member.value,
                shadow: member.shadow,
            }
        }
        _ => ChoiceValue::Many(found.into_iter().map(|m| m.key).collect()),
    }
}

struct Member<'a> {
    key: &'a str,
    suffix: &'a str,
    value: Option<&'a Value>,
    shadow: Option<&'a Value>,
}
