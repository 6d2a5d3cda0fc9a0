//! Value set membership.
//!
//! The engine asks a [`TerminologyProvider`] whether a code is in a value
//! set. [`PermissiveTerminology`] accepts everything, [`RegistryTerminology`]
//! answers from the ValueSets and CodeSystems of the loaded packages, and
//! [`CachedTerminology`] memoizes any provider.

use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use vigil_context::FhirContext;
use vigil_models::{ValueSet, ValueSetInclude};

/// Answer to a membership question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    Member,
    NotMember {
        /// The code's system is one the value set draws from.
        system_in_value_set: bool,
    },
    /// The value set could not be evaluated.
    Unknown(String),
}

impl Membership {
    pub fn is_member(&self) -> bool {
        matches!(self, Membership::Member)
    }

    fn and(self, other: Membership) -> Membership {
        match (self, other) {
            (n @ Membership::NotMember { .. }, _) | (_, n @ Membership::NotMember { .. }) => n,
            (u @ Membership::Unknown(_), _) | (_, u @ Membership::Unknown(_)) => u,
            _ => Membership::Member,
        }
    }
}

#[async_trait]
pub trait TerminologyProvider: Send + Sync {
    /// Whether `code` (from `system`, when known) is in `value_set`.
    async fn check_membership(
        &self,
        value_set: &str,
        system: Option<&str>,
        code: &str,
    ) -> Membership;
}

#[async_trait]
impl<T: TerminologyProvider + ?Sized> TerminologyProvider for Arc<T> {
    async fn check_membership(
        &self,
        value_set: &str,
        system: Option<&str>,
        code: &str,
    ) -> Membership {
        (**self).check_membership(value_set, system, code).await
    }
}

/// Treats every code as a member.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissiveTerminology;

#[async_trait]
impl TerminologyProvider for PermissiveTerminology {
    async fn check_membership(&self, _: &str, _: Option<&str>, _: &str) -> Membership {
        Membership::Member
    }
}

/// Membership from ValueSet and CodeSystem resources in a [`FhirContext`].
///
/// A pre-computed `expansion` is authoritative. Otherwise `compose` is
/// evaluated: enumerated concepts, whole code systems (complete ones only),
/// nested value sets and excludes. Filter-based includes are not evaluated
/// and make the answer [`Membership::Unknown`] unless another include
/// already contains the code.
pub struct RegistryTerminology<C: FhirContext> {
    context: C,
}

impl<C: FhirContext> RegistryTerminology<C> {
    pub fn new(context: C) -> Self {
        Self { context }
    }

    pub fn membership(&self, value_set: &str, system: Option<&str>, code: &str) -> Membership {
        self.membership_in(value_set, system, code, &mut Vec::new())
    }

    fn membership_in(
        &self,
        canonical: &str,
        system: Option<&str>,
        code: &str,
        stack: &mut Vec<String>,
    ) -> Membership {
        if stack.iter().any(|visited| visited == canonical) {
            debug!(value_set = %canonical, "value set includes itself");
            return Membership::NotMember {
                system_in_value_set: false,
            };
        }
        let Some(value_set) = self.context.get_value_set(canonical) else {
            return Membership::Unknown(format!("value set {canonical} is not available"));
        };

        stack.push(canonical.to_string());
        let result = self.evaluate(&value_set, system, code, stack);
        stack.pop();
        result
    }

    fn evaluate(
        &self,
        value_set: &ValueSet,
        system: Option<&str>,
        code: &str,
        stack: &mut Vec<String>,
    ) -> Membership {
        let system_in_value_set =
            system.is_some_and(|s| value_set.included_systems().contains(&s));
        let not_member = Membership::NotMember {
            system_in_value_set,
        };

        if value_set.has_expansion() {
            let found = value_set.expansion_codes().iter().any(|entry| {
                entry.code.as_deref() == Some(code)
                    && system_matches(entry.system.as_deref(), system)
            });
            return if found { Membership::Member } else { not_member };
        }

        let Some(compose) = &value_set.compose else {
            return Membership::Unknown(format!(
                "value set {} has neither expansion nor compose",
                value_set.url
            ));
        };

        let mut unknown: Option<String> = None;
        let mut included = false;
        for include in &compose.include {
            match self.include_contains(include, system, code, stack) {
                Membership::Member => {
                    included = true;
                    break;
                }
                Membership::Unknown(reason) => {
                    unknown.get_or_insert(reason);
                }
                Membership::NotMember { .. } => {}
            }
        }

        if included {
            let excluded = compose.exclude.iter().flatten().any(|exclude| {
                self.include_contains(exclude, system, code, stack) == Membership::Member
            });
            return if excluded { not_member } else { Membership::Member };
        }

        match unknown {
            Some(reason) => Membership::Unknown(reason),
            None => not_member,
        }
    }

    fn include_contains(
        &self,
        include: &ValueSetInclude,
        system: Option<&str>,
        code: &str,
        stack: &mut Vec<String>,
    ) -> Membership {
        let miss = Membership::NotMember {
            system_in_value_set: false,
        };

        let mut result = match include.system.as_deref() {
            Some(include_system) if !system_matches(Some(include_system), system) => {
                return miss;
            }
            Some(include_system) => self.system_contains(include, include_system, code),
            None if include.value_sets().is_empty() => return miss,
            None => Membership::Member,
        };

        for nested in include.value_sets() {
            if matches!(result, Membership::NotMember { .. }) {
                break;
            }
            result = result.and(self.membership_in(nested, system, code, stack));
        }
        result
    }

    fn system_contains(&self, include: &ValueSetInclude, system: &str, code: &str) -> Membership {
        let miss = Membership::NotMember {
            system_in_value_set: true,
        };

        if include.is_enumerated() {
            let listed = include.concept.iter().flatten().any(|c| c.code == code);
            return if listed { Membership::Member } else { miss };
        }
        if include.has_filters() {
            return Membership::Unknown(format!("filtered include of {system} is not evaluated"));
        }

        match self.context.get_code_system(system) {
            Some(code_system) if code_system.find_concept(code).is_some() => Membership::Member,
            Some(code_system) if code_system.is_complete() => miss,
            Some(_) => Membership::Unknown(format!("code system {system} is not complete")),
            None => Membership::Unknown(format!("code system {system} is not available")),
        }
    }
}

#[async_trait]
impl<C: FhirContext> TerminologyProvider for RegistryTerminology<C> {
    async fn check_membership(
        &self,
        value_set: &str,
        system: Option<&str>,
        code: &str,
    ) -> Membership {
        self.membership(value_set, system, code)
    }
}

/// A code without a system matches any system.
fn system_matches(declared: Option<&str>, system: Option<&str>) -> bool {
    match (declared, system) {
        (Some(declared), Some(system)) => declared == system,
        _ => true,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MembershipKey {
    value_set: String,
    system: Option<String>,
    code: String,
}

/// LRU memo in front of another provider. `Unknown` answers are not kept.
pub struct CachedTerminology<P> {
    inner: P,
    cache: Arc<Mutex<LruCache<MembershipKey, Membership>>>,
}

impl<P: TerminologyProvider> CachedTerminology<P> {
    pub fn new(inner: P, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }
}

#[async_trait]
impl<P: TerminologyProvider> TerminologyProvider for CachedTerminology<P> {
    async fn check_membership(
        &self,
        value_set: &str,
        system: Option<&str>,
        code: &str,
    ) -> Membership {
        let key = MembershipKey {
            value_set: value_set.to_string(),
            system: system.map(str::to_string),
            code: code.to_string(),
        };
        if let Some(hit) = self.cache.lock().ok().and_then(|mut c| c.get(&key).cloned()) {
            return hit;
        }

        let answer = self.inner.check_membership(value_set, system, code).await;
        if !matches!(answer, Membership::Unknown(_)) {
            if let Ok(mut cache) = self.cache.lock() {
                cache.put(key, answer.clone());
            }
        }
        answer
    }
}

/// Ask `provider`, giving up after `timeout`.
pub async fn check_with_timeout(
    provider: &dyn TerminologyProvider,
    timeout: Duration,
    value_set: &str,
    system: Option<&str>,
    code: &str,
) -> Membership {
    match tokio::time::timeout(timeout, provider.check_membership(value_set, system, code)).await {
        Ok(answer) => answer,
        Err(_) => {
            warn!(
                value_set = %value_set,
                code = %code,
                timeout_ms = timeout.as_millis() as u64,
                "terminology lookup timed out"
            );
            Membership::Unknown(format!("terminology lookup for {value_set} timed out"))
        }
    }
}
