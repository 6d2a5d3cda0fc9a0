//! ValueSet model: compose and expansion, as far as membership needs them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// FHIR ValueSet resource. Properties not modelled here are kept in
/// `extras`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValueSet {
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose: Option<ValueSetCompose>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expansion: Option<ValueSetExpansion>,

    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetCompose {
    #[serde(default)]
    pub include: Vec<ValueSetInclude>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude: Option<Vec<ValueSetInclude>>,

    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

/// One `include` or `exclude` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetInclude {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<Vec<ValueSetConcept>>,

    /// Property filters; kept raw, they are not evaluated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Vec<Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_set: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValueSetConcept {
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetExpansion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contains: Option<Vec<ValueSetExpansionContains>>,

    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

/// Expansion entry; entries without a code only group their children.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetExpansionContains {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contains: Option<Vec<ValueSetExpansionContains>>,
}

impl ValueSet {
    /// Code systems this value set draws from, via compose or expansion.
    pub fn included_systems(&self) -> Vec<&str> {
        let mut systems: Vec<&str> = Vec::new();
        if let Some(compose) = &self.compose {
            for include in &compose.include {
                if let Some(system) = include.system.as_deref() {
                    if !systems.contains(&system) {
                        systems.push(system);
                    }
                }
            }
        }
        for entry in self.expansion_codes() {
            if let Some(system) = entry.system.as_deref() {
                if !systems.contains(&system) {
                    systems.push(system);
                }
            }
        }
        systems
    }

    /// All expansion entries, flattening nested `contains`.
    pub fn expansion_codes(&self) -> Vec<&ValueSetExpansionContains> {
        fn collect<'a>(
            entries: &'a [ValueSetExpansionContains],
            out: &mut Vec<&'a ValueSetExpansionContains>,
        ) {
            for entry in entries {
                out.push(entry);
                if let Some(children) = &entry.contains {
                    collect(children, out);
                }
            }
        }

        let mut out = Vec::new();
        if let Some(contains) = self.expansion.as_ref().and_then(|e| e.contains.as_ref()) {
            collect(contains, &mut out);
        }
        out
    }

    pub fn has_expansion(&self) -> bool {
        self.expansion
            .as_ref()
            .and_then(|e| e.contains.as_ref())
            .is_some()
    }
}

impl ValueSetInclude {
    /// Whether the include lists explicit concepts rather than a whole system.
    pub fn is_enumerated(&self) -> bool {
        self.concept.as_ref().is_some_and(|c| !c.is_empty())
    }

    pub fn has_filters(&self) -> bool {
        self.filter.as_ref().is_some_and(|f| !f.is_empty())
    }

    pub fn value_sets(&self) -> &[String] {
        self.value_set.as_deref().unwrap_or(&[])
    }
}
