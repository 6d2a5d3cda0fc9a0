//! FHIR conformance models
//!
//! Strongly-typed structures for the conformance resources the validator
//! works with: StructureDefinition, ElementDefinition, ValueSet and
//! CodeSystem. Instances being validated are not modelled here; they stay
//! ordered `serde_json::Value` trees and choice groups are resolved through
//! [`common::choice`].
//!
//! # Example
//!
//! ```rust
//! use vigil_models::common::{StructureDefinition, StructureDefinitionKind};
//! use serde_json::json;
//!
//! let sd_json = json!({
//!     "resourceType": "StructureDefinition",
//!     "id": "Patient",
//!     "url": "http://hl7.org/fhir/StructureDefinition/Patient",
//!     "version": "4.0.1",
//!     "name": "Patient",
//!     "status": "active",
//!     "kind": "resource",
//!     "abstract": false,
//!     "type": "Patient"
//! });
//!
//! let sd: StructureDefinition = serde_json::from_value(sd_json).unwrap();
//! assert_eq!(sd.name, "Patient");
//! assert_eq!(sd.kind, StructureDefinitionKind::Resource);
//! ```

pub mod common;

pub use common::*;
