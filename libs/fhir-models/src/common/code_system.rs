//! CodeSystem model: the parts membership checks read.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// FHIR CodeSystem resource. Properties not modelled here are kept in
/// `extras`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeSystem {
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Code comparison is case sensitive unless this is `false`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<CodeSystemContentMode>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<Vec<CodeSystemConcept>>,

    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

/// How much of the system the resource lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodeSystemContentMode {
    NotPresent,
    Example,
    Fragment,
    Complete,
    Supplement,
}

/// A concept and its children.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeSystemConcept {
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<Vec<CodeSystemConcept>>,

    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl CodeSystem {
    /// Look up a concept anywhere in the hierarchy.
    pub fn find_concept(&self, code: &str) -> Option<&CodeSystemConcept> {
        let case_sensitive = self.case_sensitive.unwrap_or(true);
        find_in(self.concept.as_deref().unwrap_or(&[]), code, case_sensitive)
    }

    /// Whether the resource lists every concept of the system.
    pub fn is_complete(&self) -> bool {
        self.content == Some(CodeSystemContentMode::Complete)
    }
}

fn find_in<'a>(
    concepts: &'a [CodeSystemConcept],
    code: &str,
    case_sensitive: bool,
) -> Option<&'a CodeSystemConcept> {
    for concept in concepts {
        let matches = if case_sensitive {
            concept.code == code
        } else {
            concept.code.eq_ignore_ascii_case(code)
        };
        if matches {
            return Some(concept);
        }
        if let Some(found) = concept
            .concept
            .as_deref()
            .and_then(|children| find_in(children, code, case_sensitive))
        {
            return Some(found);
        }
    }
    None
}
