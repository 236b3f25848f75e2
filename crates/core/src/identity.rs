//! Element identity
//!
//! An [`Identity`] addresses one node (entity, relationship, or property value)
//! uniquely across the store. It is composed of the owning domain-model name and
//! a local key, compares structurally, and never changes once created.
//!
//! Property values are stored as their own nodes. Their identity is derived
//! from the owner with [`Identity::create_attribute_identity`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between the domain name and the local key in the display form.
pub const DOMAIN_SEPARATOR: char = ':';

/// Separator between an owner key and a property name in attribute identities.
pub const ATTRIBUTE_SEPARATOR: char = '@';

/// Structural identity of a graph node
///
/// Ordered by domain name, then key, which is also the canonical order used
/// when several locks are requested at once.
///
/// # Examples
///
/// ```
/// use hyperstore_core::Identity;
///
/// let id = Identity::new("library", "book-1");
/// assert_eq!(id.domain_model(), "library");
/// assert_eq!(id.key(), "book-1");
/// assert_eq!(id.to_string(), "library:book-1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    domain_model: String,
    key: String,
}

impl Identity {
    /// Create an identity from a domain-model name and a local key
    pub fn new(domain_model: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            domain_model: domain_model.into(),
            key: key.into(),
        }
    }

    /// Create an identity, rejecting empty components
    ///
    /// Returns `Error::InvalidArgument` when either part is empty or when the
    /// domain name contains the domain separator.
    pub fn try_new(domain_model: impl Into<String>, key: impl Into<String>) -> Result<Self> {
        let domain_model = domain_model.into();
        let key = key.into();
        if domain_model.is_empty() {
            return Err(Error::InvalidArgument("identity domain name is empty".into()));
        }
        if domain_model.contains(DOMAIN_SEPARATOR) {
            return Err(Error::InvalidArgument(format!(
                "identity domain name '{}' contains '{}'",
                domain_model, DOMAIN_SEPARATOR
            )));
        }
        if key.is_empty() {
            return Err(Error::InvalidArgument("identity key is empty".into()));
        }
        Ok(Self { domain_model, key })
    }

    /// Parse the `domain:key` display form
    pub fn parse(s: &str) -> Result<Self> {
        match s.split_once(DOMAIN_SEPARATOR) {
            Some((domain, key)) => Self::try_new(domain, key),
            None => Err(Error::InvalidArgument(format!(
                "'{}' is not a valid identity (expected domain{}key)",
                s, DOMAIN_SEPARATOR
            ))),
        }
    }

    /// Name of the domain model owning this element
    pub fn domain_model(&self) -> &str {
        &self.domain_model
    }

    /// Local key within the domain model
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Derive the identity of a property value owned by this element
    ///
    /// ```
    /// use hyperstore_core::Identity;
    ///
    /// let owner = Identity::new("library", "book-1");
    /// let title = owner.create_attribute_identity("title");
    /// assert_eq!(title.to_string(), "library:book-1@title");
    /// assert_ne!(owner, title);
    /// ```
    pub fn create_attribute_identity(&self, property: &str) -> Identity {
        Identity {
            domain_model: self.domain_model.clone(),
            key: format!("{}{}{}", self.key, ATTRIBUTE_SEPARATOR, property),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.domain_model, DOMAIN_SEPARATOR, self.key)
    }
}

impl FromStr for Identity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Identity::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashSet};

    #[test]
    fn test_identity_accessors() {
        let id = Identity::new("hr", "emp-7");
        assert_eq!(id.domain_model(), "hr");
        assert_eq!(id.key(), "emp-7");
    }

    #[test]
    fn test_identity_structural_equality() {
        let a = Identity::new("hr", "emp-7");
        let b = Identity::new(String::from("hr"), String::from("emp-7"));
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_identity_display_and_parse() {
        let id = Identity::new("hr", "emp:7");
        let text = id.to_string();
        assert_eq!(text, "hr:emp:7");

        // Only the first separator splits the domain from the key
        let parsed: Identity = text.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_identity_parse_rejects_malformed() {
        assert!(Identity::parse("no-separator").is_err());
        assert!(Identity::parse(":key").is_err());
        assert!(Identity::parse("domain:").is_err());
    }

    #[test]
    fn test_try_new_rejects_separator_in_domain() {
        let err = Identity::try_new("a:b", "k").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_attribute_identity_differs_from_owner() {
        let owner = Identity::new("hr", "emp-7");
        let attr = owner.create_attribute_identity("name");
        assert_ne!(owner, attr);
        assert_eq!(attr.domain_model(), "hr");
        assert_eq!(attr.key(), "emp-7@name");
    }

    #[test]
    fn test_identity_ordering() {
        let mut set = BTreeSet::new();
        set.insert(Identity::new("b", "1"));
        set.insert(Identity::new("a", "2"));
        set.insert(Identity::new("a", "1"));

        let ordered: Vec<String> = set.iter().map(|i| i.to_string()).collect();
        assert_eq!(ordered, vec!["a:1", "a:2", "b:1"]);
    }

    #[test]
    fn test_identity_serialization() {
        let id = Identity::new("hr", "emp-7");
        let json = serde_json::to_string(&id).unwrap();
        let back: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
