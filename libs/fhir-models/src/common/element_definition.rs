//! FHIR ElementDefinition model
//!
//! Version-agnostic model for ElementDefinition (used in StructureDefinition snapshots and differentials)

use super::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// FHIR ElementDefinition - defines an element in a resource or data type structure
///
/// Typed-suffix properties (`fixed[x]`, `pattern[x]`, `defaultValue[x]`,
/// `minValue[x]`, `maxValue[x]`) can't be expressed as struct fields, so they
/// live in `extras` and are read through [`ElementDefinition::fixed_value`]
/// and friends.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinition {
    /// Unique id for inter-element referencing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Path of the element in the hierarchy (e.g., "Patient.name")
    pub path: String,

    /// Name for this particular element (in a slice)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice_name: Option<String>,

    /// If this slice definition constrains an inherited slice
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice_is_constraining: Option<bool>,

    /// Short label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short: Option<String>,

    /// Full formal definition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Minimum cardinality
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,

    /// Maximum cardinality (can be "*")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,

    /// Base definition information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<ElementDefinitionBase>,

    /// Reference to definition of content if present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_reference: Option<String>,

    /// Data type and profile for this element
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<ElementDefinitionType>>,

    /// Max length for strings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i32>,

    /// Reference to invariant about presence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Vec<String>>,

    /// Condition that must evaluate to true
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Vec<ElementDefinitionConstraint>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_modifier: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_summary: Option<bool>,

    /// ValueSet details if this is coded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<ElementDefinitionBinding>,

    /// This element is sliced - slices follow
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slicing: Option<ElementDefinitionSlicing>,

    /// If this element must be supported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub must_support: Option<bool>,

    /// Additional content beyond core fields, including typed-suffix values
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

/// Base definition information for an element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementDefinitionBase {
    /// Path that identifies the base element
    pub path: String,

    /// Min cardinality of the base element
    pub min: u32,

    /// Max cardinality of the base element
    pub max: String,
}

/// Data type for an element
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinitionType {
    /// Data type code
    pub code: String,

    /// Profile (StructureDefinition canonical URLs) that apply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Vec<String>>,

    /// Profile (StructureDefinition) for Reference/canonical target types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_profile: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Vec<String>>,
}

impl ElementDefinitionType {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Default::default()
        }
    }

    pub fn profiles(&self) -> &[String] {
        self.profile.as_deref().unwrap_or(&[])
    }
}

/// Constraint on an element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementDefinitionConstraint {
    /// Target of 'condition' reference
    pub key: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,

    /// Severity (error | warning)
    pub severity: ConstraintSeverity,

    /// Human description of constraint
    pub human: String,

    /// FHIRPath expression of constraint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,

    /// Reference to original source of constraint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Severity of a constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintSeverity {
    Error,
    Warning,
}

/// ValueSet binding for a coded element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinitionBinding {
    /// Binding strength (required | extensible | preferred | example)
    pub strength: BindingStrength,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Source of value set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_set: Option<String>,
}

/// Binding strength, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingStrength {
    Example,
    Preferred,
    Extensible,
    Required,
}

impl BindingStrength {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingStrength::Example => "example",
            BindingStrength::Preferred => "preferred",
            BindingStrength::Extensible => "extensible",
            BindingStrength::Required => "required",
        }
    }
}

/// Slicing information for an element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementDefinitionSlicing {
    /// Element values that are used to distinguish slices
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<Vec<ElementDefinitionDiscriminator>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// If elements must be in same order as slices
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordered: Option<bool>,

    /// Slicing rules (closed | open | openAtEnd)
    pub rules: SlicingRules,
}

impl ElementDefinitionSlicing {
    pub fn discriminators(&self) -> &[ElementDefinitionDiscriminator] {
        self.discriminator.as_deref().unwrap_or(&[])
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered.unwrap_or(false)
    }
}

/// Discriminator for slicing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ElementDefinitionDiscriminator {
    /// Type of discriminator (value | exists | pattern | type | profile)
    #[serde(rename = "type")]
    pub discriminator_type: DiscriminatorType,

    /// Path to element value
    pub path: String,
}

/// Type of slicing discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscriminatorType {
    Value,
    Exists,
    Pattern,
    Type,
    Profile,
}

/// Slicing rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SlicingRules {
    Closed,
    Open,
    OpenAtEnd,
}

/// Snapshot - a set of elements that define the structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub element: Vec<ElementDefinition>,
}

/// Differential - a set of elements that define changes from the base
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Differential {
    pub element: Vec<ElementDefinition>,
}

impl Snapshot {
    pub fn new(element: Vec<ElementDefinition>) -> Self {
        Self { element }
    }

    /// Parse from JSON Value
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(Error::from)
    }

    /// Get an element by id
    pub fn get_element(&self, id: &str) -> Option<&ElementDefinition> {
        self.element.iter().find(|e| e.element_id() == id)
    }
}

impl Differential {
    pub fn new(element: Vec<ElementDefinition>) -> Self {
        Self { element }
    }

    /// Parse from JSON Value
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(Error::from)
    }
}

/// Parse a `max` cardinality. `None` means unbounded (`*`) or unparseable.
pub fn parse_max(max: &str) -> Option<u32> {
    if max == "*" {
        None
    } else {
        max.parse::<u32>().ok()
    }
}

impl ElementDefinition {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Get the key for this element (path:sliceName for slices, just path otherwise)
    pub fn key(&self) -> String {
        if let Some(ref slice_name) = self.slice_name {
            format!("{}:{}", self.path, slice_name)
        } else {
            self.path.clone()
        }
    }

    /// The element id, falling back to the key when the id is missing.
    pub fn element_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| self.key())
    }

    /// Check if this element has a slice name
    pub fn is_slice(&self) -> bool {
        self.slice_name.is_some()
    }

    /// Get the parent path (everything before the last '.')
    pub fn parent_path(&self) -> Option<String> {
        self.path.rfind('.').map(|pos| self.path[..pos].to_string())
    }

    /// Last path segment (`Patient.name` -> `name`).
    pub fn name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    /// Check if this element is a descendant of the given path
    pub fn is_descendant_of(&self, parent_path: &str) -> bool {
        self.path.starts_with(parent_path)
            && self.path.len() > parent_path.len()
            && self.path.as_bytes().get(parent_path.len()) == Some(&b'.')
    }

    /// Check if this is a choice type element (ends with [x])
    pub fn is_choice_type(&self) -> bool {
        self.path.ends_with("[x]")
    }

    /// Name without the `[x]` suffix for choice elements.
    pub fn choice_base_name(&self) -> Option<&str> {
        self.name().strip_suffix("[x]")
    }

    pub fn types(&self) -> &[ElementDefinitionType] {
        self.types.as_deref().unwrap_or(&[])
    }

    /// Get type codes for this element
    pub fn type_codes(&self) -> Vec<String> {
        self.types().iter().map(|t| t.code.clone()).collect()
    }

    /// Check if element is required (min > 0)
    pub fn is_required(&self) -> bool {
        self.min.unwrap_or(0) > 0
    }

    pub fn min_cardinality(&self) -> u32 {
        self.min.unwrap_or(0)
    }

    /// Upper bound, `None` when unbounded.
    pub fn max_bound(&self) -> Option<u32> {
        self.max.as_deref().and_then(parse_max)
    }

    pub fn is_prohibited(&self) -> bool {
        self.max.as_deref() == Some("0")
    }

    /// Whether the element repeats in instances. Uses the base cardinality
    /// when known, since a profile restricting `max` to 1 doesn't change the
    /// JSON shape.
    pub fn is_array(&self) -> bool {
        let max = self
            .base
            .as_ref()
            .map(|b| b.max.as_str())
            .or(self.max.as_deref());
        match max {
            Some("*") => true,
            Some(m) => m.parse::<u32>().map(|n| n > 1).unwrap_or(false),
            None => false,
        }
    }

    /// Get the cardinality as a string (e.g., "0..1", "1..*")
    pub fn cardinality_string(&self) -> String {
        let min = self.min.unwrap_or(0);
        let max = self.max.as_deref().unwrap_or("*");
        format!("{}..{}", min, max)
    }

    /// `fixed[x]` value with its type suffix, if any.
    pub fn fixed_value(&self) -> Option<(&str, &Value)> {
        self.typed_value("fixed")
    }

    /// `pattern[x]` value with its type suffix, if any.
    pub fn pattern_value(&self) -> Option<(&str, &Value)> {
        self.typed_value("pattern")
    }

    /// Find a typed-suffix property like `fixedUri` for the given prefix.
    pub fn typed_value(&self, prefix: &str) -> Option<(&str, &Value)> {
        self.extras.iter().find_map(|(key, value)| {
            typed_suffix(key, prefix).map(|suffix| (suffix, value))
        })
    }

    /// Replace any `prefix[x]` property with `prefix{suffix}`.
    pub fn set_typed_value(&mut self, prefix: &str, suffix: &str, value: Value) {
        self.remove_typed_value(prefix);
        self.extras.insert(format!("{prefix}{suffix}"), value);
    }

    pub fn remove_typed_value(&mut self, prefix: &str) {
        self.extras.retain(|key, _| typed_suffix(key, prefix).is_none());
    }

    pub fn constraints(&self) -> &[ElementDefinitionConstraint] {
        self.constraint.as_deref().unwrap_or(&[])
    }

    pub fn is_must_support(&self) -> bool {
        self.must_support.unwrap_or(false)
    }
}

fn typed_suffix<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    let suffix = key.strip_prefix(prefix)?;
    if suffix.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
        Some(suffix)
    } else {
        None
    }
}
