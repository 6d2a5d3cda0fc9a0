//! JSON representation and lexical checks for primitive values.

use crate::outcome::IssueCode;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Lexical forms of the string-valued primitive types.
const LEXICAL_FORMS: &[(&str, &str)] = &[
    (
        "date",
        r"^([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)(-(0[1-9]|1[0-2])(-(0[1-9]|[1-2][0-9]|3[0-1]))?)?$",
    ),
    (
        "dateTime",
        r"^([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)(-(0[1-9]|1[0-2])(-(0[1-9]|[1-2][0-9]|3[0-1])(T([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?(Z|(\+|-)((0[0-9]|1[0-3]):[0-5][0-9]|14:00)))?)?)?$",
    ),
    (
        "instant",
        r"^([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)-(0[1-9]|1[0-2])-(0[1-9]|[1-2][0-9]|3[0-1])T([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?(Z|(\+|-)((0[0-9]|1[0-3]):[0-5][0-9]|14:00))$",
    ),
    ("time", r"^([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?$"),
    ("id", r"^[A-Za-z0-9\-\.]{1,64}$"),
    ("code", r"^[^\s]+( [^\s]+)*$"),
    ("uri", r"^\S*$"),
    ("url", r"^\S*$"),
    ("canonical", r"^\S*$"),
    ("oid", r"^urn:oid:[0-2](\.(0|[1-9][0-9]*))+$"),
    (
        "uuid",
        r"^urn:uuid:[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$",
    ),
    ("base64Binary", r"^(\s*([0-9a-zA-Z\+/=]){4}\s*)+$"),
    ("integer64", r"^(0|[-+]?[1-9][0-9]*)$"),
];

fn lexical_form(type_code: &str) -> Option<&'static Regex> {
    static FORMS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    let forms = FORMS.get_or_init(|| {
        LEXICAL_FORMS
            .iter()
            .map(|(code, pattern)| {
                (
                    *code,
                    Regex::new(pattern).expect("primitive lexical regex must compile"),
                )
            })
            .collect()
    });
    forms
        .iter()
        .find(|(code, _)| *code == type_code)
        .map(|(_, regex)| regex)
}

/// FHIRPath system types used as the type of primitive `value` elements.
fn normalize(type_code: &str) -> &str {
    match type_code.strip_prefix("http://hl7.org/fhirpath/System.") {
        Some("Boolean") => "boolean",
        Some("Integer") => "integer",
        Some("Decimal") => "decimal",
        Some("Date") => "date",
        Some("DateTime") => "dateTime",
        Some("Time") => "time",
        Some("String") => "string",
        Some(_) => "string",
        None => type_code,
    }
}

/// Problem with a primitive value, if any.
pub fn check_primitive(type_code: &str, value: &Value) -> Option<(IssueCode, String)> {
    let type_code = normalize(type_code);
    let kind_error = |expected: &str| {
        Some((
            IssueCode::Structure,
            format!("Value of type '{type_code}' must be a JSON {expected}, found {value}"),
        ))
    };

    match type_code {
        "boolean" if !value.is_boolean() => kind_error("boolean"),
        "boolean" => None,
        "integer" | "unsignedInt" | "positiveInt" => {
            let Some(number) = value.as_i64() else {
                return kind_error("integer");
            };
            let (low, label) = match type_code {
                "unsignedInt" => (0, "non-negative"),
                "positiveInt" => (1, "positive"),
                _ => (i64::from(i32::MIN), "32-bit"),
            };
            if number < low || number > i64::from(i32::MAX) {
                return Some((
                    IssueCode::Value,
                    format!("Value {number} is not a valid {label} integer for type '{type_code}'"),
                ));
            }
            None
        }
        "decimal" if !value.is_number() => kind_error("number"),
        "decimal" => None,
        "xhtml" if !value.is_string() => kind_error("string"),
        "xhtml" => None,
        _ => {
            let Some(text) = value.as_str() else {
                return kind_error("string");
            };
            if text.is_empty() {
                return Some((
                    IssueCode::Value,
                    format!("Value of type '{type_code}' must not be empty"),
                ));
            }
            match lexical_form(type_code) {
                Some(form) if !form.is_match(text) => Some((
                    IssueCode::Value,
                    format!("The value '{text}' is not a valid {type_code}"),
                )),
                _ => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_kinds() {
        assert!(check_primitive("boolean", &json!(true)).is_none());
        assert!(check_primitive("boolean", &json!("true")).is_some());
        assert!(check_primitive("integer", &json!(1.5)).is_some());
        assert!(check_primitive("decimal", &json!(1.5)).is_none());
        assert!(check_primitive("string", &json!(12)).is_some());
    }

    #[test]
    fn integer_ranges() {
        assert!(check_primitive("unsignedInt", &json!(0)).is_none());
        assert!(check_primitive("unsignedInt", &json!(-1)).is_some());
        assert!(check_primitive("positiveInt", &json!(0)).is_some());
        assert!(check_primitive("integer", &json!(3_000_000_000i64)).is_some());
    }

    #[test]
    fn lexical_forms() {
        assert!(check_primitive("date", &json!("1970-01-01")).is_none());
        assert!(check_primitive("date", &json!("1970")).is_none());
        assert!(check_primitive("date", &json!("1970-13-01")).is_some());
        assert!(check_primitive("dateTime", &json!("2024-02-29T10:00:00Z")).is_none());
        assert!(check_primitive("dateTime", &json!("2024-02-29T10:00")).is_some());
        assert!(check_primitive("instant", &json!("2024-02-29")).is_some());
        assert!(check_primitive("id", &json!("a_b")).is_some());
        assert!(check_primitive("code", &json!(" male")).is_some());
        assert!(check_primitive("uri", &json!("http://x y")).is_some());
        assert!(check_primitive("string", &json!("")).is_some());
        assert!(check_primitive("http://hl7.org/fhirpath/System.String", &json!("x")).is_none());
    }
}
