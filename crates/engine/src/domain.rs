//! Domain models and their registry
//!
//! A domain processes the commands addressed to its name. Data domains and
//! schema domains share one capability; the registry resolves a name against
//! data domains first, then schema domains.

use crate::command::DomainCommand;
use crate::constraints::ConstraintManager;
use crate::session::SessionHandle;
use hyperstore_core::{Error, ExecutionResult, Result};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::debug;

/// A named model that applies commands within a session
pub trait DomainModel: Send + Sync {
    /// Unique domain name
    fn name(&self) -> &str;

    /// Apply a group of commands addressed to this domain
    ///
    /// Returning `Err` (or panicking) aborts the session; error diagnostics
    /// in the returned result do too.
    fn process_commands(&self, session: &SessionHandle, commands: &[Box<dyn DomainCommand>]) -> Result<ExecutionResult>;

    /// Constraint manager validating this domain's elements at commit
    fn constraints(&self) -> Option<Arc<dyn ConstraintManager>> {
        None
    }
}

/// A resolved domain
#[derive(Clone)]
pub enum DomainKind {
    /// Holds model data
    Data(Arc<dyn DomainModel>),
    /// Holds schema definitions
    Schema(Arc<dyn DomainModel>),
}

impl DomainKind {
    /// The underlying model
    pub fn model(&self) -> &Arc<dyn DomainModel> {
        match self {
            DomainKind::Data(model) | DomainKind::Schema(model) => model,
        }
    }

    /// True for schema domains
    pub fn is_schema(&self) -> bool {
        matches!(self, DomainKind::Schema(_))
    }

    /// Domain name
    pub fn name(&self) -> &str {
        self.model().name()
    }
}

impl std::fmt::Debug for DomainKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DomainKind::Data(m) => f.debug_tuple("Data").field(&m.name()).finish(),
            DomainKind::Schema(m) => f.debug_tuple("Schema").field(&m.name()).finish(),
        }
    }
}

/// Name-to-domain lookup for one store
#[derive(Default)]
pub struct DomainRegistry {
    data: RwLock<FxHashMap<String, Arc<dyn DomainModel>>>,
    schemas: RwLock<FxHashMap<String, Arc<dyn DomainModel>>>,
}

impl DomainRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(
        map: &RwLock<FxHashMap<String, Arc<dyn DomainModel>>>,
        domain: Arc<dyn DomainModel>,
        kind: &str,
    ) -> Result<()> {
        let name = domain.name().to_string();
        if name.is_empty() {
            return Err(Error::InvalidArgument("domain name must not be empty".into()));
        }
        let mut map = map.write();
        if map.contains_key(&name) {
            return Err(Error::InvalidArgument(format!("{} domain '{}' already registered", kind, name)));
        }
        debug!(domain = %name, kind, "domain registered");
        map.insert(name, domain);
        Ok(())
    }

    /// Register a data domain
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the name is empty or already used by a data domain.
    pub fn register_domain(&self, domain: Arc<dyn DomainModel>) -> Result<()> {
        Self::insert(&self.data, domain, "data")
    }

    /// Register a schema domain
    pub fn register_schema(&self, schema: Arc<dyn DomainModel>) -> Result<()> {
        Self::insert(&self.schemas, schema, "schema")
    }

    /// Find a domain by name, data domains first
    pub fn resolve(&self, name: &str) -> Option<DomainKind> {
        if let Some(model) = self.data.read().get(name) {
            return Some(DomainKind::Data(Arc::clone(model)));
        }
        self.schemas
            .read()
            .get(name)
            .map(|model| DomainKind::Schema(Arc::clone(model)))
    }

    /// Remove a domain of either kind
    pub fn unregister(&self, name: &str) -> Option<DomainKind> {
        if let Some(model) = self.data.write().remove(name) {
            return Some(DomainKind::Data(model));
        }
        self.schemas.write().remove(name).map(DomainKind::Schema)
    }

    /// Names of all registered domains, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .data
            .read()
            .keys()
            .chain(self.schemas.read().keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Constraint manager responsible for an element
    ///
    /// Looks at the schema's domain first, then the element's own domain.
    /// Managers without implicit constraints are skipped.
    pub(crate) fn constraint_manager(&self, schema_domain: &str, element_domain: &str) -> Option<Arc<dyn ConstraintManager>> {
        [schema_domain, element_domain]
            .into_iter()
            .filter_map(|name| self.resolve(name))
            .filter_map(|kind| kind.model().constraints())
            .find(|manager| manager.has_implicit_constraints())
    }
}

impl std::fmt::Debug for DomainRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainRegistry").field("domains", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl DomainModel for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn process_commands(&self, _session: &SessionHandle, _commands: &[Box<dyn DomainCommand>]) -> Result<ExecutionResult> {
            Ok(ExecutionResult::new())
        }
    }

    #[test]
    fn test_data_resolves_before_schema() {
        let registry = DomainRegistry::new();
        registry.register_schema(Arc::new(Named("hr"))).unwrap();
        assert!(registry.resolve("hr").unwrap().is_schema());

        registry.register_domain(Arc::new(Named("hr"))).unwrap();
        assert!(!registry.resolve("hr").unwrap().is_schema());
        assert!(registry.resolve("missing").is_none());
        assert_eq!(registry.names(), vec!["hr".to_string()]);
    }

    #[test]
    fn test_duplicate_and_empty_names_rejected() {
        let registry = DomainRegistry::new();
        registry.register_domain(Arc::new(Named("hr"))).unwrap();
        assert!(matches!(
            registry.register_domain(Arc::new(Named("hr"))),
            Err(Error::InvalidArgument(_))
        ));
        assert!(registry.register_domain(Arc::new(Named(""))).is_err());
    }

    #[test]
    fn test_unregister() {
        let registry = DomainRegistry::new();
        registry.register_domain(Arc::new(Named("hr"))).unwrap();
        registry.register_schema(Arc::new(Named("hr"))).unwrap();

        assert!(!registry.unregister("hr").unwrap().is_schema());
        assert!(registry.unregister("hr").unwrap().is_schema());
        assert!(registry.unregister("hr").is_none());
    }

    #[test]
    fn test_no_constraint_manager_without_rules() {
        let registry = DomainRegistry::new();
        registry.register_domain(Arc::new(Named("hr"))).unwrap();
        assert!(registry.constraint_manager("hr", "hr").is_none());
    }
}
