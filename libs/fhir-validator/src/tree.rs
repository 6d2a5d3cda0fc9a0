//! Parent/child and slice indexes over a resolved snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use vigil_models::{ElementDefinition, StructureDefinition, StructureDefinitionKind};
use vigil_snapshot::slicing::slice_owner_id;
use vigil_snapshot::ResolvedProfile;

/// A snapshot indexed by element id.
///
/// Children of `X` are the unsliced elements whose id is `X.<name>`;
/// slices of `X` are the elements cut from it (`X:<slice>`, or for a
/// re-slice the slice it refines).
#[derive(Debug)]
pub struct ElementTree {
    profile: Arc<ResolvedProfile>,
    by_id: HashMap<String, usize>,
    children: HashMap<String, Vec<usize>>,
    slices: HashMap<String, Vec<usize>>,
}

impl ElementTree {
    pub fn new(profile: Arc<ResolvedProfile>) -> Self {
        let mut by_id = HashMap::new();
        let mut children: HashMap<String, Vec<usize>> = HashMap::new();
        let mut slices: HashMap<String, Vec<usize>> = HashMap::new();

        for (index, element) in profile.elements().iter().enumerate() {
            let id = element.element_id();
            if let Some(slice_name) = element.slice_name.as_deref() {
                let owner = slice_owner_id(&id, slice_name).unwrap_or_else(|| element.path.clone());
                slices.entry(owner).or_default().push(index);
            } else if let Some((parent, _)) = id.rsplit_once('.') {
                children.entry(parent.to_string()).or_default().push(index);
            }
            by_id.insert(id, index);
        }

        Self {
            profile,
            by_id,
            children,
            slices,
        }
    }

    pub fn profile(&self) -> &Arc<ResolvedProfile> {
        &self.profile
    }

    pub fn definition(&self) -> &StructureDefinition {
        &self.profile.definition
    }

    pub fn url(&self) -> &str {
        &self.profile.definition.url
    }

    pub fn root(&self) -> Option<&ElementDefinition> {
        self.elements().first()
    }

    pub fn root_id(&self) -> Option<String> {
        self.root().map(ElementDefinition::element_id)
    }

    pub fn get(&self, id: &str) -> Option<&ElementDefinition> {
        self.by_id.get(id).map(|&index| &self.elements()[index])
    }

    /// Direct unsliced children of `id`, in snapshot order.
    pub fn children(&self, id: &str) -> Vec<&ElementDefinition> {
        self.indexed(self.children.get(id))
    }

    pub fn has_children(&self, id: &str) -> bool {
        self.children.get(id).is_some_and(|c| !c.is_empty())
    }

    /// Slices cut from `id`, in declaration order.
    pub fn slices(&self, id: &str) -> Vec<&ElementDefinition> {
        self.indexed(self.slices.get(id))
    }

    pub fn is_resource(&self) -> bool {
        self.definition().kind == StructureDefinitionKind::Resource
    }

    pub fn is_extension(&self) -> bool {
        self.definition().is_extension()
    }

    fn elements(&self) -> &[ElementDefinition] {
        self.profile.elements()
    }

    fn indexed(&self, indexes: Option<&Vec<usize>>) -> Vec<&ElementDefinition> {
        let elements = self.elements();
        indexes
            .map(|indexes| indexes.iter().map(|&i| &elements[i]).collect())
            .unwrap_or_default()
    }
}
