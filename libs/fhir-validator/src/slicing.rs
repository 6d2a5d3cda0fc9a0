//! Slice matching for repeating elements.
//!
//! An array entry belongs to the first slice (in declaration order) whose
//! discriminators all match it. Discriminator paths use the FHIRPath subset
//! profiles are allowed to use there: `$this`, element names,
//! `extension('url')`, `ofType(T)` and `resolve()`. Only contained (`#id`)
//! references can be resolved to content; other references contribute their
//! type.
//!
//! Re-slices (`X:a/b`) are not matched; entries are assigned to top-level
//! slices only.

use crate::compare::{matches_pattern, values_equal};
use crate::outcome::{IssueCode, ValidationIssue};
use crate::tree::ElementTree;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use vigil_context::{split_canonical, type_definition_url};
use vigil_models::{
    resolve_choice, ChoiceValue, DiscriminatorType, ElementDefinition,
    ElementDefinitionDiscriminator, ElementDefinitionSlicing, SlicingRules, EXTENSION_TYPE,
};

/// Name of the slice that collects entries no other slice matches.
pub const DEFAULT_SLICE: &str = "@default";

/// What slice matching needs from the validator.
pub trait SliceContext {
    /// Indexed snapshot of the definition at `url`.
    fn tree(&self, url: &str) -> Option<Arc<ElementTree>>;

    /// Whether `value` conforms to the profile at `profile`.
    fn conforms(&self, value: &Value, profile: &str) -> bool;

    /// Whether `value` satisfies the element `element_id` of `tree` and its
    /// subtree.
    fn conforms_to_element(&self, value: &Value, tree: &Arc<ElementTree>, element_id: &str) -> bool;

    /// The resource being validated; `resolve()` looks up contained
    /// resources in it.
    fn root(&self) -> &Value;
}

/// One step of a discriminator path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    This,
    Field(String),
    Extension(String),
    OfType(String),
    Resolve,
}

/// Split a discriminator path into steps.
pub fn parse_discriminator_path(path: &str) -> Result<Vec<PathStep>, String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for c in path.trim().chars() {
        match (c, quote) {
            ('\'' | '"', None) => quote = Some(c),
            (q, Some(open)) if q == open => quote = None,
            ('(', None) => depth += 1,
            (')', None) => depth = depth.saturating_sub(1),
            ('.', None) if depth == 0 => {
                segments.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if quote.is_some() || depth != 0 {
        return Err(format!("unbalanced discriminator path '{path}'"));
    }
    segments.push(current);

    segments
        .into_iter()
        .map(|segment| parse_step(segment.trim(), path))
        .collect()
}

fn parse_step(segment: &str, path: &str) -> Result<PathStep, String> {
    if segment == "$this" {
        return Ok(PathStep::This);
    }
    if segment == "resolve()" {
        return Ok(PathStep::Resolve);
    }
    if let Some(argument) = function_argument(segment, "extension") {
        return Ok(PathStep::Extension(unquote(argument).to_string()));
    }
    if let Some(argument) = function_argument(segment, "ofType") {
        return Ok(PathStep::OfType(unquote(argument).to_string()));
    }
    let is_name = !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '[' || c == ']');
    if is_name {
        Ok(PathStep::Field(segment.trim_end_matches("[x]").to_string()))
    } else {
        Err(format!("unsupported step '{segment}' in discriminator path '{path}'"))
    }
}

fn function_argument<'s>(segment: &'s str, function: &str) -> Option<&'s str> {
    segment
        .strip_prefix(function)?
        .strip_prefix('(')?
        .strip_suffix(')')
        .map(str::trim)
}

fn unquote(argument: &str) -> &str {
    argument
        .strip_prefix('\'')
        .and_then(|a| a.strip_suffix('\''))
        .or_else(|| argument.strip_prefix('"').and_then(|a| a.strip_suffix('"')))
        .unwrap_or(argument)
}

// ============================================================================
// Instance side
// ============================================================================

static ABSENT: Value = Value::Null;

/// A value reached by a discriminator path, with its type when known.
#[derive(Debug, Clone)]
struct Node<'v> {
    value: &'v Value,
    type_code: Option<String>,
}

impl<'v> Node<'v> {
    fn new(value: &'v Value, type_code: Option<String>) -> Self {
        let type_code = type_code.or_else(|| {
            value
                .get("resourceType")
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        Self { value, type_code }
    }
}

fn push_items<'v>(out: &mut Vec<Node<'v>>, value: &'v Value, type_code: Option<String>) {
    match value {
        Value::Array(items) => out.extend(items.iter().map(|i| Node::new(i, type_code.clone()))),
        other => out.push(Node::new(other, type_code)),
    }
}

fn select<'v>(nodes: Vec<Node<'v>>, step: &PathStep, root: &'v Value) -> Vec<Node<'v>> {
    let mut out = Vec::new();
    match step {
        PathStep::This => return nodes,
        PathStep::Field(name) => {
            for node in nodes {
                let Some(object) = node.value.as_object() else {
                    continue;
                };
                if let Some(value) = object.get(name.as_str()) {
                    push_items(&mut out, value, None);
                } else if let ChoiceValue::One {
                    type_code,
                    value: Some(value),
                    ..
                } = resolve_choice(object, name, |_| false)
                {
                    push_items(&mut out, value, Some(type_code));
                }
            }
        }
        PathStep::Extension(url) => {
            for node in nodes {
                let extensions = node.value.get("extension").and_then(Value::as_array);
                for extension in extensions.into_iter().flatten() {
                    if extension.get("url").and_then(Value::as_str) == Some(url.as_str()) {
                        out.push(Node::new(extension, Some(EXTENSION_TYPE.to_string())));
                    }
                }
            }
        }
        PathStep::OfType(type_code) => {
            out = nodes
                .into_iter()
                .filter(|n| n.type_code.as_deref() == Some(type_code.as_str()))
                .collect();
        }
        PathStep::Resolve => {
            for node in nodes {
                if let Some(reference) = node.value.get("reference").and_then(Value::as_str) {
                    if let Some(target) = resolve_reference(reference, root) {
                        out.push(target);
                    }
                }
            }
        }
    }
    out
}

/// Contained targets resolve to their content; other references only to
/// the type named in the reference.
fn resolve_reference<'v>(reference: &str, root: &'v Value) -> Option<Node<'v>> {
    if let Some(id) = reference.strip_prefix('#') {
        let contained = root.get("contained").and_then(Value::as_array)?;
        return contained
            .iter()
            .find(|r| r.get("id").and_then(Value::as_str) == Some(id))
            .map(|r| Node::new(r, None));
    }
    let mut segments = reference.rsplit('/');
    let _id = segments.next()?;
    let type_name = segments.next()?;
    type_name
        .starts_with(|c: char| c.is_ascii_uppercase())
        .then(|| Node::new(&ABSENT, Some(type_name.to_string())))
}

fn select_path<'v>(candidate: &'v Value, steps: &[PathStep], root: &'v Value) -> Vec<Node<'v>> {
    steps
        .iter()
        .fold(vec![Node::new(candidate, None)], |nodes, step| select(nodes, step, root))
}

// ============================================================================
// Definition side
// ============================================================================

/// Position in some profile's element tree.
struct Cursor {
    tree: Arc<ElementTree>,
    id: String,
    of_type: Option<String>,
}

impl Cursor {
    fn element(&self) -> Option<&ElementDefinition> {
        self.tree.get(&self.id)
    }
}

/// Definition URL to descend into when an element has no inline children.
fn type_url(element: &ElementDefinition, of_type: Option<&str>) -> Option<String> {
    let types = element.types();
    let chosen = match of_type {
        Some(code) => types.iter().find(|t| t.code == code)?,
        None if types.len() == 1 => &types[0],
        None => return None,
    };
    Some(
        chosen
            .profiles()
            .first()
            .cloned()
            .unwrap_or_else(|| type_definition_url(&chosen.code)),
    )
}

fn child_cursor(ctx: &dyn SliceContext, cursor: &Cursor, name: &str) -> Option<Cursor> {
    let named = |e: &&ElementDefinition| e.name() == name || e.choice_base_name() == Some(name);

    let inline = cursor
        .tree
        .children(&cursor.id)
        .into_iter()
        .find(named)
        .map(ElementDefinition::element_id);
    if let Some(id) = inline {
        return Some(Cursor {
            tree: Arc::clone(&cursor.tree),
            id,
            of_type: None,
        });
    }

    let url = type_url(cursor.element()?, cursor.of_type.as_deref())?;
    let tree = ctx.tree(&url)?;
    let root = tree.root_id()?;
    let id = tree
        .children(&root)
        .into_iter()
        .find(named)
        .map(ElementDefinition::element_id)?;
    Some(Cursor {
        tree,
        id,
        of_type: None,
    })
}

fn declares_profile(element: &ElementDefinition, url: &str) -> bool {
    element
        .types()
        .iter()
        .flat_map(|t| t.profiles())
        .any(|p| split_canonical(p).0 == url)
}

fn target_profiles(element: &ElementDefinition) -> Vec<String> {
    element
        .types()
        .iter()
        .flat_map(|t| t.target_profile.iter().flatten())
        .cloned()
        .collect()
}

fn definition_at(
    ctx: &dyn SliceContext,
    tree: &Arc<ElementTree>,
    slice_id: &str,
    steps: &[PathStep],
) -> Option<Cursor> {
    let mut cursor = Cursor {
        tree: Arc::clone(tree),
        id: slice_id.to_string(),
        of_type: None,
    };
    for step in steps {
        cursor = match step {
            PathStep::This => cursor,
            PathStep::Field(name) => child_cursor(ctx, &cursor, name)?,
            PathStep::Extension(url) => {
                let extension = child_cursor(ctx, &cursor, "extension")?;
                let id = extension
                    .tree
                    .slices(&extension.id)
                    .into_iter()
                    .find(|s| declares_profile(s, url) || s.slice_name.as_deref() == Some(url))
                    .map(ElementDefinition::element_id)?;
                Cursor { id, ..extension }
            }
            PathStep::OfType(type_code) => {
                let narrowed = cursor
                    .tree
                    .slices(&cursor.id)
                    .into_iter()
                    .find(|s| s.types().len() == 1 && s.types()[0].code == *type_code)
                    .map(ElementDefinition::element_id);
                Cursor {
                    id: narrowed.unwrap_or(cursor.id),
                    of_type: Some(type_code.clone()),
                    tree: cursor.tree,
                }
            }
            PathStep::Resolve => {
                let targets = target_profiles(cursor.element()?);
                let tree = targets.iter().find_map(|url| ctx.tree(url))?;
                let id = tree.root_id()?;
                Cursor {
                    tree,
                    id,
                    of_type: None,
                }
            }
        };
    }
    Some(cursor)
}

// ============================================================================
// Matching
// ============================================================================

/// Result of matching one array entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliceMatch {
    Slice(String),
    Unmatched,
}

/// Match `candidate` against `slices` (declaration order, first match wins).
/// `tree` is the tree the slices belong to.
pub fn match_slice(
    ctx: &dyn SliceContext,
    tree: &Arc<ElementTree>,
    slices: &[&ElementDefinition],
    discriminators: &[ElementDefinitionDiscriminator],
    candidate: &Value,
) -> SliceMatch {
    let parsed: Vec<(DiscriminatorType, Option<Vec<PathStep>>)> = discriminators
        .iter()
        .map(|d| {
            let steps = parse_discriminator_path(&d.path)
                .map_err(|err| debug!(path = %d.path, error = %err, "discriminator not evaluated"))
                .ok();
            (d.discriminator_type, steps)
        })
        .collect();

    for slice in slices {
        let Some(name) = slice.slice_name.as_deref() else {
            continue;
        };
        if name == DEFAULT_SLICE {
            continue;
        }
        let slice_id = slice.element_id();
        let matched = if parsed.is_empty() {
            ctx.conforms_to_element(candidate, tree, &slice_id)
        } else {
            parsed.iter().all(|(kind, steps)| {
                steps.as_deref().is_some_and(|steps| {
                    discriminator_matches(ctx, tree, slice, &slice_id, *kind, steps, candidate)
                })
            })
        };
        if matched {
            return SliceMatch::Slice(name.to_string());
        }
    }
    SliceMatch::Unmatched
}

fn discriminator_matches(
    ctx: &dyn SliceContext,
    tree: &Arc<ElementTree>,
    slice: &ElementDefinition,
    slice_id: &str,
    kind: DiscriminatorType,
    steps: &[PathStep],
    candidate: &Value,
) -> bool {
    let nodes = select_path(candidate, steps, ctx.root());

    match kind {
        DiscriminatorType::Value | DiscriminatorType::Pattern => {
            let cursor = definition_at(ctx, tree, slice_id, steps);
            let element = cursor.as_ref().and_then(Cursor::element);
            let fixed = element.and_then(|e| e.fixed_value()).map(|(_, v)| v);
            let pattern = element.and_then(|e| e.pattern_value()).map(|(_, v)| v);

            let expected = match (kind, fixed, pattern) {
                (DiscriminatorType::Pattern, _, Some(pattern)) => Expected::Pattern(pattern),
                (_, Some(fixed), _) => Expected::Fixed(fixed),
                (_, None, Some(pattern)) => Expected::Pattern(pattern),
                _ => match implicit_extension_url(slice, steps) {
                    Some(url) => Expected::Url(url),
                    None => return false,
                },
            };
            nodes.iter().any(|node| match &expected {
                Expected::Fixed(fixed) => values_equal(node.value, fixed),
                Expected::Pattern(pattern) => matches_pattern(node.value, pattern),
                Expected::Url(url) => node.value.as_str() == Some(url.as_str()),
            })
        }
        DiscriminatorType::Exists => {
            let Some(cursor) = definition_at(ctx, tree, slice_id, steps) else {
                return true;
            };
            let Some(element) = cursor.element() else {
                return true;
            };
            if element.min_cardinality() >= 1 {
                !nodes.is_empty()
            } else if element.is_prohibited() {
                nodes.is_empty()
            } else {
                true
            }
        }
        DiscriminatorType::Type => {
            let declared = declared_types(ctx, tree, slice_id, steps);
            !declared.is_empty()
                && nodes.iter().any(|node| {
                    node.type_code
                        .as_ref()
                        .is_some_and(|t| declared.iter().any(|d| d == t))
                })
        }
        DiscriminatorType::Profile => {
            let profiles = declared_profiles(ctx, tree, slice_id, steps);
            !profiles.is_empty()
                && nodes.iter().any(|node| {
                    !node.value.is_null() && profiles.iter().any(|p| ctx.conforms(node.value, p))
                })
        }
    }
}

enum Expected<'d> {
    Fixed(&'d Value),
    Pattern(&'d Value),
    Url(String),
}

/// Extension slices are told apart by `url` even when no fixed value is
/// declared: a profiled slice's url is its profile, an inline sub-extension's
/// url is its slice name.
fn implicit_extension_url(slice: &ElementDefinition, steps: &[PathStep]) -> Option<String> {
    if steps != [PathStep::Field("url".to_string())] {
        return None;
    }
    let extension_type = slice.types().iter().find(|t| t.code == EXTENSION_TYPE)?;
    match extension_type.profiles().first() {
        Some(profile) => Some(split_canonical(profile).0.to_string()),
        None => slice.slice_name.clone(),
    }
}

/// Types a `type` discriminator expects at `steps`.
fn declared_types(
    ctx: &dyn SliceContext,
    tree: &Arc<ElementTree>,
    slice_id: &str,
    steps: &[PathStep],
) -> Vec<String> {
    if let Some((PathStep::Resolve, before)) = steps.split_last() {
        let Some(cursor) = definition_at(ctx, tree, slice_id, before) else {
            return Vec::new();
        };
        let Some(element) = cursor.element() else {
            return Vec::new();
        };
        return target_profiles(element)
            .iter()
            .map(|url| match ctx.tree(url) {
                Some(target) => target.definition().type_.clone(),
                None => url.rsplit('/').next().unwrap_or(url).to_string(),
            })
            .collect();
    }

    let Some(cursor) = definition_at(ctx, tree, slice_id, steps) else {
        return Vec::new();
    };
    if let Some(of_type) = &cursor.of_type {
        return vec![of_type.clone()];
    }
    cursor
        .element()
        .map(ElementDefinition::type_codes)
        .unwrap_or_default()
}

/// Profiles a `profile` discriminator expects at `steps`.
fn declared_profiles(
    ctx: &dyn SliceContext,
    tree: &Arc<ElementTree>,
    slice_id: &str,
    steps: &[PathStep],
) -> Vec<String> {
    if let Some((PathStep::Resolve, before)) = steps.split_last() {
        return definition_at(ctx, tree, slice_id, before)
            .and_then(|cursor| cursor.element().map(target_profiles))
            .unwrap_or_default();
    }
    let Some(cursor) = definition_at(ctx, tree, slice_id, steps) else {
        return Vec::new();
    };
    let Some(element) = cursor.element() else {
        return Vec::new();
    };
    element
        .types()
        .iter()
        .filter(|t| cursor.of_type.as_deref().map_or(true, |code| t.code == code))
        .flat_map(|t| t.profiles())
        .cloned()
        .collect()
}

// ============================================================================
// Whole-array evaluation
// ============================================================================

/// Slice assignments for a sliced array and the issues found on the way.
#[derive(Debug, Default)]
pub struct SlicingOutcome {
    /// Per entry, the slice it belongs to; `None` for unmatched entries of
    /// open slicing.
    pub assignments: Vec<Option<String>>,
    pub issues: Vec<ValidationIssue>,
}

/// Match every entry of a sliced array and check slicing rules, order and
/// per-slice cardinality.
///
/// `entries` pairs each entry with its instance path (`Patient.identifier[0]`).
pub fn evaluate_slicing(
    ctx: &dyn SliceContext,
    tree: &Arc<ElementTree>,
    entries: &[(String, &Value)],
    array_path: &str,
    slicing: &ElementDefinitionSlicing,
    slices: &[&ElementDefinition],
) -> SlicingOutcome {
    let mut outcome = SlicingOutcome::default();
    let has_default = slices
        .iter()
        .any(|s| s.slice_name.as_deref() == Some(DEFAULT_SLICE));
    let position = |name: &str| {
        slices
            .iter()
            .position(|s| s.slice_name.as_deref() == Some(name))
    };

    let mut seen_unmatched = false;
    let mut last_position: Option<usize> = None;

    for (path, entry) in entries {
        let matched = match match_slice(ctx, tree, slices, slicing.discriminators(), entry) {
            SliceMatch::Slice(name) => Some(name),
            SliceMatch::Unmatched if has_default => Some(DEFAULT_SLICE.to_string()),
            SliceMatch::Unmatched => None,
        };

        match &matched {
            None => {
                seen_unmatched = true;
                if slicing.rules == SlicingRules::Closed {
                    outcome.issues.push(
                        ValidationIssue::error(
                            IssueCode::Structure,
                            format!(
                                "Element '{path}' matches no slice of '{array_path}', and the slicing is closed"
                            ),
                        )
                        .at(path.clone()),
                    );
                }
            }
            Some(name) => {
                if seen_unmatched && slicing.rules == SlicingRules::OpenAtEnd {
                    outcome.issues.push(
                        ValidationIssue::error(
                            IssueCode::Structure,
                            format!(
                                "Element '{path}' matches slice '{name}' but follows an element that matches no slice (slicing is openAtEnd)"
                            ),
                        )
                        .at(path.clone()),
                    );
                }
                let current = position(name);
                if slicing.is_ordered() {
                    if let (Some(previous), Some(current)) = (last_position, current) {
                        if current < previous {
                            outcome.issues.push(
                                ValidationIssue::error(
                                    IssueCode::Structure,
                                    format!(
                                        "Element '{path}' matches slice '{name}', which is out of order (slicing of '{array_path}' is ordered)"
                                    ),
                                )
                                .at(path.clone()),
                            );
                        }
                    }
                }
                if let Some(current) = current {
                    last_position = Some(last_position.map_or(current, |p| p.max(current)));
                }
            }
        }
        outcome.assignments.push(matched);
    }

    for slice in slices {
        let Some(name) = slice.slice_name.as_deref() else {
            continue;
        };
        let count = outcome
            .assignments
            .iter()
            .filter(|a| a.as_deref() == Some(name))
            .count() as u32;
        let min = slice.min_cardinality();
        if count < min {
            outcome.issues.push(
                ValidationIssue::error(
                    IssueCode::Required,
                    format!(
                        "Slice '{name}' of '{array_path}' requires at least {min} occurrence(s), but found {count}"
                    ),
                )
                .at(array_path.to_string()),
            );
        }
        if let Some(max) = slice.max_bound() {
            if count > max {
                outcome.issues.push(
                    ValidationIssue::error(
                        IssueCode::Structure,
                        format!(
                            "Slice '{name}' of '{array_path}' allows at most {max} occurrence(s), but found {count}"
                        ),
                    )
                    .at(array_path.to_string()),
                );
            }
        }
    }

    outcome
}
