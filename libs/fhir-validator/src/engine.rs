//! Profile-conformance validation.
//!
//! A [`Validator`] resolves the profiles that apply to a resource, walks the
//! resource against each profile's snapshot and afterwards checks the
//! bindings it collected along the way through the terminology provider.
//! The walk itself is synchronous; only binding checks await.

use crate::binding::{carries_codes, check_binding, coded_values, PendingBinding};
use crate::compare::{matches_pattern, values_equal};
use crate::config::ValidatorConfig;
use crate::constraints::{check_constraint, ConstraintEvaluator, NoopConstraintEvaluator};
use crate::error::{ConfigError, ValidateError};
use crate::outcome::{dedupe_issues, IssueCode, ValidationIssue, ValidationOutcome};
use crate::plan::ValidationPlan;
use crate::primitive::check_primitive;
use crate::slicing::{evaluate_slicing, SliceContext};
use crate::terminology::{PermissiveTerminology, TerminologyProvider};
use crate::tree::ElementTree;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use vigil_context::{type_definition_url, FhirContext};
use vigil_models::{
    is_primitive_type, resolve_choice, ChoiceValue, ElementDefinition, EXTENSION_TYPE,
};
use vigil_snapshot::{Error as SnapshotError, ExpandedFhirContext};

const FHIRPATH_SYSTEM_PREFIX: &str = "http://hl7.org/fhirpath/System.";

/// Per-call options for [`Validator::validate`].
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Validate against this profile only, instead of `meta.profile` plus
    /// the base definition of the resource type.
    pub profile: Option<String>,
    /// Overrides the configured `include_warnings`.
    pub include_warnings: Option<bool>,
}

impl ValidateOptions {
    pub fn with_profile(profile: impl Into<String>) -> Self {
        Self {
            profile: Some(profile.into()),
            ..Default::default()
        }
    }
}

/// Reusable validator: owns the plan, the snapshot-expanding context and
/// the terminology and constraint capabilities.
pub struct Validator<C: FhirContext> {
    plan: ValidationPlan,
    context: Arc<ExpandedFhirContext<C>>,
    terminology: Arc<dyn TerminologyProvider>,
    constraints: Arc<dyn ConstraintEvaluator>,
}

impl<C: FhirContext> Validator<C> {
    pub fn new(plan: ValidationPlan, context: C) -> Self {
        Self {
            plan,
            context: Arc::new(ExpandedFhirContext::new(context)),
            terminology: Arc::new(PermissiveTerminology),
            constraints: Arc::new(NoopConstraintEvaluator),
        }
    }

    pub fn from_config(config: &ValidatorConfig, context: C) -> Result<Self, ConfigError> {
        let plan = config.compile()?;
        Ok(Self::new(plan, context))
    }

    pub fn with_terminology(mut self, provider: Arc<dyn TerminologyProvider>) -> Self {
        self.terminology = provider;
        self
    }

    pub fn with_constraint_evaluator(mut self, evaluator: Arc<dyn ConstraintEvaluator>) -> Self {
        self.constraints = evaluator;
        self
    }

    pub fn plan(&self) -> &ValidationPlan {
        &self.plan
    }

    pub fn context(&self) -> &Arc<ExpandedFhirContext<C>> {
        &self.context
    }

    pub fn terminology(&self) -> &Arc<dyn TerminologyProvider> {
        &self.terminology
    }

    /// Validate one resource.
    ///
    /// Problems with the resource are issues in the outcome. The only errors
    /// are an explicitly requested profile that is not known and, through
    /// the session, a session that was never initialized.
    pub async fn validate(
        &self,
        resource: &Value,
        options: &ValidateOptions,
    ) -> Result<ValidationOutcome, ValidateError> {
        let resource_type = resource
            .get("resourceType")
            .and_then(Value::as_str)
            .map(str::to_string);

        let walked = self.walk(resource, options)?;
        let mut issues = walked.issues;
        for binding in &walked.bindings {
            if let Some(issue) =
                check_binding(self.terminology.as_ref(), self.plan.terminology.timeout, binding)
                    .await
            {
                issues.push(issue);
            }
        }

        let mut issues = dedupe_issues(issues);
        if !options.include_warnings.unwrap_or(self.plan.include_warnings) {
            issues.retain(|i| i.severity.is_error());
        }
        if issues.len() > self.plan.max_issues {
            debug!(found = issues.len(), max = self.plan.max_issues, "truncating issues");
            issues.truncate(self.plan.max_issues);
        }
        Ok(ValidationOutcome::new(resource_type, issues))
    }

    fn walk(&self, resource: &Value, options: &ValidateOptions) -> Result<Walked, ValidateError> {
        let state = RunState::default();
        let resolver = Resolver {
            validator: self,
            state: &state,
            root: resource,
        };
        let mut run = ValidationRun::new(resolver);
        run.execute(resource, options)?;
        Ok(run.finish())
    }
}

/// Findings of the synchronous walk.
struct Walked {
    issues: Vec<ValidationIssue>,
    bindings: Vec<PendingBinding>,
}

/// Definitions and profile passes of one `validate` call.
#[derive(Default)]
struct RunState {
    trees: RefCell<HashMap<String, Option<Arc<ElementTree>>>>,
    active: RefCell<Vec<String>>,
}

impl RunState {
    fn load<C: FhirContext>(
        &self,
        validator: &Validator<C>,
        canonical: &str,
    ) -> Result<Arc<ElementTree>, SnapshotError> {
        if let Some(Some(tree)) = self.trees.borrow().get(canonical) {
            return Ok(Arc::clone(tree));
        }
        let tree = validator
            .context
            .resolve_canonical(canonical)
            .map(|profile| Arc::new(ElementTree::new(profile)));
        self.trees
            .borrow_mut()
            .insert(canonical.to_string(), tree.as_ref().ok().cloned());
        tree
    }

    fn tree<C: FhirContext>(&self, validator: &Validator<C>, canonical: &str) -> Option<Arc<ElementTree>> {
        if let Some(cached) = self.trees.borrow().get(canonical) {
            return cached.clone();
        }
        match self.load(validator, canonical) {
            Ok(tree) => Some(tree),
            Err(err) => {
                debug!(url = %canonical, error = %err, "definition unavailable");
                None
            }
        }
    }

    /// Mark a profile pass as running; false if it already is.
    fn enter(&self, url: &str) -> bool {
        let mut active = self.active.borrow_mut();
        if active.iter().any(|u| u == url) {
            return false;
        }
        active.push(url.to_string());
        true
    }

    fn leave(&self, url: &str) {
        let mut active = self.active.borrow_mut();
        if let Some(pos) = active.iter().rposition(|u| u == url) {
            active.remove(pos);
        }
    }
}

/// Read access shared by a run and the slice matcher.
struct Resolver<'a, C: FhirContext> {
    validator: &'a Validator<C>,
    state: &'a RunState,
    root: &'a Value,
}

impl<C: FhirContext> Clone for Resolver<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: FhirContext> Copy for Resolver<'_, C> {}

impl<C: FhirContext> SliceContext for Resolver<'_, C> {
    fn tree(&self, url: &str) -> Option<Arc<ElementTree>> {
        self.state.tree(self.validator, url)
    }

    fn conforms(&self, value: &Value, profile: &str) -> bool {
        let Some(tree) = self.tree(profile) else {
            return false;
        };
        let Some(root) = tree.root_id() else {
            return false;
        };
        if !self.state.enter(tree.url()) {
            debug!(profile = %profile, "profile already being checked, treating as non-conformant");
            return false;
        }
        let mut run = ValidationRun::new(*self);
        run.source = Some(tree.url().to_string());
        let path = tree.definition().type_.clone();
        run.validate_element(&tree, &root, value, &path, None, 0);
        self.state.leave(tree.url());
        !run.has_errors()
    }

    fn conforms_to_element(&self, value: &Value, tree: &Arc<ElementTree>, element_id: &str) -> bool {
        let mut run = ValidationRun::new(*self);
        run.validate_element(tree, element_id, value, element_id, None, 0);
        !run.has_errors()
    }

    fn root(&self) -> &Value {
        self.root
    }
}

/// Short-lived walk over one resource (or, for profile discriminators, one
/// value).
struct ValidationRun<'a, C: FhirContext> {
    resolver: Resolver<'a, C>,
    /// Profile whose pass is running.
    source: Option<String>,
    issues: Vec<ValidationIssue>,
    bindings: Vec<PendingBinding>,
}

impl<'a, C: FhirContext> ValidationRun<'a, C> {
    fn new(resolver: Resolver<'a, C>) -> Self {
        Self {
            resolver,
            source: None,
            issues: Vec::new(),
            bindings: Vec::new(),
        }
    }

    fn plan(&self) -> &'a ValidationPlan {
        let validator: &'a Validator<C> = self.resolver.validator;
        &validator.plan
    }

    fn tree(&self, canonical: &str) -> Option<Arc<ElementTree>> {
        self.resolver.tree(canonical)
    }

    fn push(&mut self, issue: ValidationIssue) {
        let issue = match (&issue.source, &self.source) {
            (None, Some(source)) => issue.with_source(source.clone()),
            _ => issue,
        };
        self.issues.push(issue);
    }

    fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity.is_error())
    }

    fn finish(self) -> Walked {
        Walked {
            issues: self.issues,
            bindings: self.bindings,
        }
    }

    fn execute(&mut self, resource: &Value, options: &ValidateOptions) -> Result<(), ValidateError> {
        if !resource.is_object() {
            self.push(ValidationIssue::error(
                IssueCode::Structure,
                "Resource must be a JSON object",
            ));
            return Ok(());
        }
        let Some(resource_type) = resource.get("resourceType").and_then(Value::as_str) else {
            self.push(
                ValidationIssue::error(IssueCode::Required, "Resource has no resourceType")
                    .at("resourceType"),
            );
            return Ok(());
        };

        let trees = self.applicable_profiles(resource, resource_type, options)?;
        debug!(resource_type = %resource_type, profiles = trees.len(), "validating resource");

        for tree in trees {
            let url = tree.url().to_string();
            self.source = Some(url.clone());

            for warning in &tree.profile().warnings {
                self.push(
                    ValidationIssue::warning(
                        IssueCode::BusinessRule,
                        format!("Snapshot of '{url}': {warning}"),
                    )
                    .at(resource_type),
                );
            }

            let profile_type = &tree.definition().type_;
            if profile_type != resource_type {
                self.push(
                    ValidationIssue::error(
                        IssueCode::Invalid,
                        format!(
                            "Profile '{url}' constrains '{profile_type}', but the resource is a '{resource_type}'"
                        ),
                    )
                    .at(resource_type),
                );
                continue;
            }

            let Some(root) = tree.root_id() else {
                continue;
            };
            let entered = self.resolver.state.enter(&url);
            self.validate_element(&tree, &root, resource, resource_type, None, 0);
            if entered {
                self.resolver.state.leave(&url);
            }
        }
        self.source = None;
        Ok(())
    }

    /// The explicit profile, or the base definition plus every
    /// `meta.profile` entry.
    fn applicable_profiles(
        &mut self,
        resource: &Value,
        resource_type: &str,
        options: &ValidateOptions,
    ) -> Result<Vec<Arc<ElementTree>>, ValidateError> {
        let validator = self.resolver.validator;
        let state = self.resolver.state;

        if let Some(profile) = &options.profile {
            return match state.load(validator, profile) {
                Ok(tree) => Ok(vec![tree]),
                Err(SnapshotError::NotFound(_)) => Err(ValidateError::UnknownProfile(profile.clone())),
                Err(err) => {
                    self.push(
                        ValidationIssue::warning(
                            IssueCode::Processing,
                            format!("Profile '{profile}' could not be used: {err}"),
                        )
                        .at(resource_type),
                    );
                    Ok(Vec::new())
                }
            };
        }

        let mut trees = Vec::new();
        let base = type_definition_url(resource_type);
        match state.load(validator, &base) {
            Ok(tree) => trees.push(tree),
            Err(err) => self.push(
                ValidationIssue::error(
                    IssueCode::NotFound,
                    format!("No definition for resource type '{resource_type}': {err}"),
                )
                .at(resource_type),
            ),
        }

        let mut seen: HashSet<&str> = HashSet::from([base.as_str()]);
        let declared = resource.pointer("/meta/profile").and_then(Value::as_array);
        for (index, entry) in declared.into_iter().flatten().enumerate() {
            let Some(canonical) = entry.as_str() else {
                continue;
            };
            if !seen.insert(canonical) {
                continue;
            }
            let path = format!("{resource_type}.meta.profile[{index}]");
            match state.load(validator, canonical) {
                Ok(tree) => trees.push(tree),
                Err(SnapshotError::NotFound(_)) => self.push(
                    ValidationIssue::error(
                        IssueCode::NotFound,
                        format!("Profile '{canonical}' is not known"),
                    )
                    .at(path),
                ),
                Err(err) => self.push(
                    ValidationIssue::warning(
                        IssueCode::Processing,
                        format!("Profile '{canonical}' could not be used: {err}"),
                    )
                    .at(path),
                ),
            }
        }
        Ok(trees)
    }

    /// Validate one occurrence of element `id`. `depth` counts instance
    /// nesting; walking the same value against another definition keeps it.
    fn validate_element(
        &mut self,
        tree: &Arc<ElementTree>,
        id: &str,
        value: &Value,
        path: &str,
        choice_type: Option<&str>,
        depth: usize,
    ) {
        let plan = self.plan();
        if depth > plan.max_depth {
            self.push(
                ValidationIssue::error(
                    IssueCode::TooCostly,
                    format!("Element '{path}' is nested more than {} levels deep", plan.max_depth),
                )
                .at(path),
            );
            return;
        }
        let Some(element) = tree.get(id) else {
            return;
        };

        if let Some((_, fixed)) = element.fixed_value() {
            if !values_equal(value, fixed) {
                self.push(
                    ValidationIssue::error(
                        IssueCode::Value,
                        format!("Value at '{path}' must be exactly {fixed}"),
                    )
                    .at(path),
                );
            }
        }
        if let Some((_, pattern)) = element.pattern_value() {
            if !matches_pattern(value, pattern) {
                self.push(
                    ValidationIssue::error(
                        IssueCode::Value,
                        format!("Value at '{path}' does not match the pattern {pattern}"),
                    )
                    .at(path),
                );
            }
        }

        if plan.constraints.enabled {
            let Resolver {
                validator, root, ..
            } = self.resolver;
            for constraint in element.constraints() {
                if let Some(issue) =
                    check_constraint(validator.constraints.as_ref(), constraint, value, root)
                {
                    self.push(issue.at(path));
                }
            }
        }

        if let Some(reference) = element.content_reference.as_deref() {
            let target = reference.rsplit_once('#').map_or(reference, |(_, id)| id);
            self.walk_children(tree, target, value, path, depth);
            return;
        }

        let type_code = choice_type.map(str::to_string).or_else(|| match element.types() {
            [only] => Some(only.code.clone()),
            _ => None,
        });

        if let (Some(binding), Some(type_code)) = (&element.binding, &type_code) {
            if let Some(value_set) = &binding.value_set {
                if carries_codes(type_code) {
                    self.bindings.push(PendingBinding {
                        path: path.to_string(),
                        value_set: value_set.clone(),
                        strength: binding.strength,
                        codings: coded_values(type_code, value),
                        source: self.source.clone(),
                    });
                }
            }
        }

        match type_code.as_deref() {
            Some(code) if is_primitive(code) => {
                if let Some((issue_code, message)) = check_primitive(code, value) {
                    self.push(ValidationIssue::error(issue_code, message).at(path));
                }
            }
            Some(EXTENSION_TYPE) => self.validate_extension(tree, element, value, path, depth),
            Some(code) if self.is_resource_typed(code, value) => {
                self.validate_resource_value(element, code, value, path, depth)
            }
            other => self.validate_complex(tree, element, other, value, path, depth),
        }
    }

    /// Children of `parent_id` against the properties of `value`.
    fn walk_children(
        &mut self,
        tree: &Arc<ElementTree>,
        parent_id: &str,
        value: &Value,
        path: &str,
        depth: usize,
    ) {
        let Some(object) = value.as_object() else {
            self.push(
                ValidationIssue::error(
                    IssueCode::Structure,
                    format!("Element '{path}' must be a JSON object"),
                )
                .at(path),
            );
            return;
        };

        let children = tree.children(parent_id);
        let siblings: HashSet<&str> = children
            .iter()
            .filter(|c| !c.is_choice_type())
            .map(|c| c.name())
            .collect();
        let mut known: HashSet<String> = HashSet::new();

        for child in &children {
            match child.choice_base_name() {
                Some(base) => {
                    self.validate_choice(tree, child, base, object, path, &siblings, &mut known, depth)
                }
                None => {
                    known.insert(child.name().to_string());
                    known.insert(format!("_{}", child.name()));
                    self.validate_child(tree, child, object, path, depth);
                }
            }
        }

        let at_resource_root = tree.is_resource() && !parent_id.contains('.');
        self.check_unknown_keys(tree, object, &known, at_resource_root, path);
    }

    fn validate_child(
        &mut self,
        tree: &Arc<ElementTree>,
        child: &ElementDefinition,
        object: &Map<String, Value>,
        path: &str,
        depth: usize,
    ) {
        let name = child.name();
        let child_path = format!("{path}.{name}");
        let value = object.get(name);
        let shadow = object.get(&format!("_{name}"));

        let items: Vec<&Value> = match value {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(single) => vec![single],
        };
        let count = items.len().max(occurrences(shadow));

        if let Some(value) = value {
            if child.is_array() && !value.is_array() {
                self.push(
                    ValidationIssue::error(
                        IssueCode::Structure,
                        format!("Element '{child_path}' repeats and must be a JSON array"),
                    )
                    .at(child_path.clone()),
                );
            } else if !child.is_array() && value.is_array() {
                self.push(
                    ValidationIssue::error(
                        IssueCode::Structure,
                        format!("Element '{child_path}' does not repeat and must not be a JSON array"),
                    )
                    .at(child_path.clone()),
                );
            }
        }

        self.check_cardinality(child, count, &child_path);
        if count == 0 {
            self.report_must_support(child, &child_path);
        }

        let in_array = value.is_some_and(Value::is_array);
        let entries: Vec<(String, &Value)> = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                let entry_path = if in_array {
                    format!("{child_path}[{i}]")
                } else {
                    child_path.clone()
                };
                (entry_path, item)
            })
            .collect();

        let child_id = child.element_id();
        let slices = tree.slices(&child_id);
        if let Some(slicing) = child.slicing.as_ref().filter(|_| !slices.is_empty()) {
            let outcome = evaluate_slicing(
                &self.resolver,
                tree,
                &entries,
                &child_path,
                slicing,
                &slices,
            );
            for issue in outcome.issues {
                self.push(issue);
            }
            for ((entry_path, item), assigned) in entries.iter().zip(outcome.assignments) {
                let target = assigned
                    .and_then(|name| {
                        slices
                            .iter()
                            .find(|s| s.slice_name.as_deref() == Some(name.as_str()))
                            .map(|s| s.element_id())
                    })
                    .unwrap_or_else(|| child_id.clone());
                self.validate_element(tree, &target, item, entry_path, None, depth + 1);
            }
            return;
        }

        for (entry_path, item) in &entries {
            self.validate_element(tree, &child_id, item, entry_path, None, depth + 1);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_choice(
        &mut self,
        tree: &Arc<ElementTree>,
        child: &ElementDefinition,
        base: &str,
        object: &Map<String, Value>,
        path: &str,
        siblings: &HashSet<&str>,
        known: &mut HashSet<String>,
        depth: usize,
    ) {
        let group_path = format!("{path}.{base}[x]");
        let allowed = child.type_codes();

        match resolve_choice(object, base, |key| siblings.contains(key)) {
            ChoiceValue::Absent => {
                self.check_cardinality(child, 0, &group_path);
                self.report_must_support(child, &group_path);
            }
            ChoiceValue::Many(keys) => {
                for key in &keys {
                    known.insert(key.to_string());
                    known.insert(format!("_{key}"));
                }
                self.push(
                    ValidationIssue::error(
                        IssueCode::Structure,
                        format!(
                            "Only one of {} may be present for '{group_path}'",
                            keys.join(", ")
                        ),
                    )
                    .at(group_path),
                );
            }
            ChoiceValue::One {
                key,
                type_code,
                value,
                ..
            } => {
                known.insert(key.to_string());
                known.insert(format!("_{key}"));
                let value_path = format!("{path}.{key}");

                if !allowed.is_empty() && !allowed.contains(&type_code) {
                    self.push(
                        ValidationIssue::error(
                            IssueCode::Structure,
                            format!(
                                "Type '{type_code}' is not allowed for '{group_path}' (allowed: {})",
                                allowed.join(", ")
                            ),
                        )
                        .at(value_path),
                    );
                    return;
                }
                self.check_cardinality(child, 1, &group_path);

                // Only the `_` shadow is present: nothing to walk.
                let Some(value) = value else {
                    return;
                };
                let child_id = child.element_id();
                let target = tree
                    .slices(&child_id)
                    .into_iter()
                    .find(|s| s.types().len() == 1 && s.types()[0].code == type_code)
                    .map(ElementDefinition::element_id)
                    .unwrap_or(child_id);
                self.validate_element(
                    tree,
                    &target,
                    value,
                    &value_path,
                    Some(type_code.as_str()),
                    depth + 1,
                );
            }
        }
    }

    /// Complex values: inline children when the snapshot has them, else
    /// the declared type profile or the data type's own definition.
    fn validate_complex(
        &mut self,
        tree: &Arc<ElementTree>,
        element: &ElementDefinition,
        type_code: Option<&str>,
        value: &Value,
        path: &str,
        depth: usize,
    ) {
        let id = element.element_id();
        if tree.has_children(&id) {
            self.walk_children(tree, &id, value, path, depth);
            return;
        }
        if !value.is_object() {
            self.push(
                ValidationIssue::error(
                    IssueCode::Structure,
                    format!("Element '{path}' must be a JSON object"),
                )
                .at(path),
            );
            return;
        }
        let Some(type_code) = type_code else {
            return;
        };

        let url = element
            .types()
            .iter()
            .find(|t| t.code == type_code)
            .and_then(|t| t.profiles().first().cloned())
            .unwrap_or_else(|| type_definition_url(type_code));
        match self.tree(&url) {
            Some(type_tree) => {
                if let Some(root) = type_tree.root_id() {
                    self.validate_element(&type_tree, &root, value, path, None, depth);
                }
            }
            None => debug!(url = %url, path = %path, "no definition to descend into"),
        }
    }

    /// Extensions are walked against their inline slice subtree, their
    /// declared profile, or the definition registered under their `url`.
    fn validate_extension(
        &mut self,
        tree: &Arc<ElementTree>,
        element: &ElementDefinition,
        value: &Value,
        path: &str,
        depth: usize,
    ) {
        let Some(object) = value.as_object() else {
            self.push(
                ValidationIssue::error(
                    IssueCode::Structure,
                    format!("Extension at '{path}' must be a JSON object"),
                )
                .at(path),
            );
            return;
        };
        let Some(url) = object.get("url").and_then(Value::as_str) else {
            self.push(
                ValidationIssue::error(IssueCode::Required, format!("Extension at '{path}' has no url"))
                    .at(path),
            );
            return;
        };

        let id = element.element_id();
        if tree.has_children(&id) {
            self.walk_children(tree, &id, value, path, depth);
            return;
        }

        let declared = element
            .types()
            .iter()
            .find(|t| t.code == EXTENSION_TYPE)
            .and_then(|t| t.profiles().first())
            .cloned();
        let definition = match declared {
            Some(profile) => {
                let found = self.tree(&profile);
                if found.is_none() {
                    self.push(
                        ValidationIssue::warning(
                            IssueCode::Extension,
                            format!("Extension definition '{profile}' is not known"),
                        )
                        .at(path),
                    );
                }
                found
            }
            None if element.slice_name.is_none() && is_absolute(url) => {
                let found = self.tree(url);
                if found.is_none() {
                    self.push(
                        ValidationIssue::warning(
                            IssueCode::Extension,
                            format!("Unknown extension '{url}'"),
                        )
                        .at(path),
                    );
                }
                found
            }
            None => None,
        };

        let definition = definition.or_else(|| self.tree(&type_definition_url(EXTENSION_TYPE)));
        if let Some(definition) = definition {
            if let Some(root) = definition.root_id() {
                self.validate_element(&definition, &root, value, path, None, depth);
            }
        }
    }

    fn is_resource_typed(&self, type_code: &str, value: &Value) -> bool {
        is_abstract_resource(type_code)
            || (value.get("resourceType").is_some()
                && self
                    .tree(&type_definition_url(type_code))
                    .is_some_and(|t| t.is_resource()))
    }

    /// Resources nested in an element (`contained`, `Bundle.entry.resource`)
    /// are walked against their own type's definition and any declared
    /// profiles.
    fn validate_resource_value(
        &mut self,
        element: &ElementDefinition,
        declared: &str,
        value: &Value,
        path: &str,
        depth: usize,
    ) {
        let Some(resource_type) = value.get("resourceType").and_then(Value::as_str) else {
            self.push(
                ValidationIssue::error(
                    IssueCode::Required,
                    format!("Resource at '{path}' has no resourceType"),
                )
                .at(path),
            );
            return;
        };
        if !is_abstract_resource(declared) && declared != resource_type {
            self.push(
                ValidationIssue::error(
                    IssueCode::Invalid,
                    format!("Resource at '{path}' must be a '{declared}', found '{resource_type}'"),
                )
                .at(path),
            );
            return;
        }

        let Some(base) = self.tree(&type_definition_url(resource_type)) else {
            self.push(
                ValidationIssue::error(
                    IssueCode::NotFound,
                    format!("Unknown resource type '{resource_type}' at '{path}'"),
                )
                .at(path),
            );
            return;
        };
        let mut trees = vec![base];
        for profile in element
            .types()
            .iter()
            .filter(|t| t.code == declared)
            .flat_map(|t| t.profiles())
        {
            match self.tree(profile) {
                Some(tree) => trees.push(tree),
                None => self.push(
                    ValidationIssue::error(
                        IssueCode::NotFound,
                        format!("Profile '{profile}' is not known"),
                    )
                    .at(path),
                ),
            }
        }

        for tree in trees {
            if let Some(root) = tree.root_id() {
                self.validate_element(&tree, &root, value, path, None, depth);
            }
        }
    }

    fn check_cardinality(&mut self, element: &ElementDefinition, count: usize, path: &str) {
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        let message = || {
            format!(
                "Element '{path}' has cardinality {}, but found {count} occurrence(s)",
                element.cardinality_string()
            )
        };
        if count < element.min_cardinality() {
            self.push(ValidationIssue::error(IssueCode::Required, message()).at(path));
        }
        if element.max_bound().is_some_and(|max| count > max) {
            self.push(ValidationIssue::error(IssueCode::Structure, message()).at(path));
        }
    }

    fn report_must_support(&mut self, element: &ElementDefinition, path: &str) {
        if element.is_must_support() && self.plan().must_support.report {
            self.push(
                ValidationIssue::information(
                    IssueCode::Informational,
                    format!("Must-support element '{path}' is absent"),
                )
                .at(path),
            );
        }
    }

    fn check_unknown_keys(
        &mut self,
        tree: &ElementTree,
        object: &Map<String, Value>,
        known: &HashSet<String>,
        at_resource_root: bool,
        path: &str,
    ) {
        let plan = self.plan();
        if plan.schema.allow_unknown_elements {
            return;
        }
        let closed = plan.profiles.is_closed(tree.url())
            || self
                .source
                .as_deref()
                .is_some_and(|source| plan.profiles.is_closed(source));

        for key in object.keys() {
            if known.contains(key) || (at_resource_root && key == "resourceType") {
                continue;
            }
            let message = format!("Unknown element '{key}' at '{path}'");
            let issue = if closed {
                ValidationIssue::error(IssueCode::Structure, message)
            } else {
                ValidationIssue::warning(IssueCode::Structure, message)
            };
            self.push(issue.at(format!("{path}.{key}")));
        }
    }
}

fn occurrences(value: Option<&Value>) -> usize {
    match value {
        Some(Value::Array(items)) => items.len(),
        Some(Value::Null) | None => 0,
        Some(_) => 1,
    }
}

fn is_primitive(type_code: &str) -> bool {
    is_primitive_type(type_code) || type_code.starts_with(FHIRPATH_SYSTEM_PREFIX)
}

fn is_abstract_resource(type_code: &str) -> bool {
    matches!(type_code, "Resource" | "DomainResource")
}

fn is_absolute(url: &str) -> bool {
    url.contains("://") || url.starts_with("urn:")
}
