//! Constraint validation
//!
//! At commit a session groups its involved elements by the constraint manager
//! of their domain and checks each group on the store's constraint pool. Any
//! error diagnostic aborts the session.

use crate::session::SessionHandle;
use crate::tracking::TrackedElement;
use hyperstore_core::{DiagnosticMessage, ExecutionResult, Identity};
use parking_lot::RwLock;

/// Validates the elements a session touched
pub trait ConstraintManager: Send + Sync {
    /// True when there is anything to check at commit
    fn has_implicit_constraints(&self) -> bool;

    /// Check a group of elements
    ///
    /// Runs on a constraint worker thread with the session bound to it, so
    /// `Store::current_session()` resolves inside the check.
    fn check_elements(&self, session: &SessionHandle, elements: &[TrackedElement]) -> ExecutionResult;
}

type RuleFn = dyn Fn(&SessionHandle, &TrackedElement) -> Option<DiagnosticMessage> + Send + Sync;

struct ConstraintRule {
    name: String,
    schema: Option<Identity>,
    check: Box<RuleFn>,
}

impl ConstraintRule {
    fn applies_to(&self, element: &TrackedElement) -> bool {
        self.schema.as_ref().map_or(true, |s| *s == element.schema)
    }
}

/// Closure-based constraint manager
///
/// A rule returns `Some(diagnostic)` when an element violates it. Rules
/// scoped to a schema only see elements of that schema.
///
/// # Example
///
/// ```ignore
/// let constraints = ImplicitConstraints::new().with_rule("named", |session, element| {
///     let name = domain.get_property(session, &element.id, "name").ok().flatten();
///     name.is_none().then(|| DiagnosticMessage::error("name is required"))
/// });
/// ```
#[derive(Default)]
pub struct ImplicitConstraints {
    rules: RwLock<Vec<ConstraintRule>>,
}

impl ImplicitConstraints {
    /// Manager without rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule applying to every element
    pub fn with_rule<F>(self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&SessionHandle, &TrackedElement) -> Option<DiagnosticMessage> + Send + Sync + 'static,
    {
        self.add_rule(name, None, check);
        self
    }

    /// Add a rule applying to elements of one schema
    pub fn with_schema_rule<F>(self, name: impl Into<String>, schema: Identity, check: F) -> Self
    where
        F: Fn(&SessionHandle, &TrackedElement) -> Option<DiagnosticMessage> + Send + Sync + 'static,
    {
        self.add_rule(name, Some(schema), check);
        self
    }

    /// Add a rule to a shared manager
    pub fn add_rule<F>(&self, name: impl Into<String>, schema: Option<Identity>, check: F)
    where
        F: Fn(&SessionHandle, &TrackedElement) -> Option<DiagnosticMessage> + Send + Sync + 'static,
    {
        self.rules.write().push(ConstraintRule {
            name: name.into(),
            schema,
            check: Box::new(check),
        });
    }

    /// Names of the registered rules
    pub fn rule_names(&self) -> Vec<String> {
        self.rules.read().iter().map(|r| r.name.clone()).collect()
    }
}

impl ConstraintManager for ImplicitConstraints {
    fn has_implicit_constraints(&self) -> bool {
        !self.rules.read().is_empty()
    }

    fn check_elements(&self, session: &SessionHandle, elements: &[TrackedElement]) -> ExecutionResult {
        let rules = self.rules.read();
        let mut result = ExecutionResult::new();
        for element in elements {
            for rule in rules.iter().filter(|r| r.applies_to(element)) {
                if let Some(mut message) = (rule.check)(session, element) {
                    if message.element.is_none() {
                        message = message.with_element(element.id.clone());
                    }
                    result.add(message);
                }
            }
        }
        result
    }
}

impl std::fmt::Debug for ImplicitConstraints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImplicitConstraints")
            .field("rules", &self.rule_names())
            .finish()
    }
}
