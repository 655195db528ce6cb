//! Secondary index resolution.
//!
//! An [`IndexResolver`] derives named index values from a record's attributes.
//! The repository supports lookups by principal name: whenever the security
//! context attribute is written, the resolved principal is cached on the
//! record under [`PRINCIPAL_NAME_ATTRIBUTE`] so lookups can filter on it
//! without resolving every record again.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::record::Record;

/// Index name for lookups by authenticated principal.
pub const PRINCIPAL_NAME_INDEX_NAME: &str = "PRINCIPAL_NAME_INDEX_NAME";

/// Attribute holding the embedded security context.
pub const SECURITY_CONTEXT_ATTRIBUTE: &str = "SECURITY_CONTEXT";

/// Attribute holding the denormalized principal name.
pub const PRINCIPAL_NAME_ATTRIBUTE: &str = "principalName";

/// Maps a record to its named index values.
pub trait IndexResolver: Send + Sync {
    /// Resolve every index value for `record`, keyed by index name.
    fn resolve_indexes_for(&self, record: &Record) -> HashMap<String, String>;
}

impl<F> IndexResolver for F
where
    F: Fn(&Record) -> HashMap<String, String> + Send + Sync,
{
    fn resolve_indexes_for(&self, record: &Record) -> HashMap<String, String> {
        self(record)
    }
}

/// The authenticated principal carried by a security context.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Authentication {
    /// Principal name.
    pub name: String,

    /// Granted authorities.
    #[serde(default)]
    pub authorities: Vec<String>,
}

/// The value stored under [`SECURITY_CONTEXT_ATTRIBUTE`].
///
/// Stored as JSON: `{ "authentication": { "name": "alice", "authorities": [...] } }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SecurityContext {
    #[serde(default)]
    pub authentication: Option<Authentication>,
}

impl SecurityContext {
    /// A context authenticated as `name`.
    pub fn authenticated(name: impl Into<String>, authorities: Vec<String>) -> Self {
        Self {
            authentication: Some(Authentication {
                name: name.into(),
                authorities,
            }),
        }
    }

    /// Read a context back from an attribute value. Malformed values yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }

    /// Name of the authenticated principal, if any.
    pub fn principal_name(&self) -> Option<&str> {
        self.authentication.as_ref().map(|auth| auth.name.as_str())
    }
}

impl From<SecurityContext> for Value {
    fn from(context: SecurityContext) -> Self {
        match context.authentication {
            Some(auth) => json!({
                "authentication": {
                    "name": auth.name,
                    "authorities": auth.authorities,
                }
            }),
            None => json!({ "authentication": null }),
        }
    }
}

/// Resolves [`PRINCIPAL_NAME_INDEX_NAME`].
///
/// An explicit string attribute named [`PRINCIPAL_NAME_INDEX_NAME`] wins;
/// otherwise the name is taken from the security context attribute.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrincipalNameIndexResolver;

impl PrincipalNameIndexResolver {
    fn resolve_principal(record: &Record) -> Option<String> {
        if let Some(Value::String(name)) = record.attribute(PRINCIPAL_NAME_INDEX_NAME) {
            return Some(name.clone());
        }
        record
            .attribute(SECURITY_CONTEXT_ATTRIBUTE)
            .and_then(SecurityContext::from_value)
            .and_then(|context| context.principal_name().map(str::to_string))
    }
}

impl IndexResolver for PrincipalNameIndexResolver {
    fn resolve_indexes_for(&self, record: &Record) -> HashMap<String, String> {
        Self::resolve_principal(record)
            .map(|name| HashMap::from([(PRINCIPAL_NAME_INDEX_NAME.to_string(), name)]))
            .unwrap_or_default()
    }
}

/// Merges the indexes of several resolvers, in order.
///
/// When two resolvers produce the same index name, the later one wins.
#[derive(Clone)]
pub struct DelegatingIndexResolver {
    delegates: Vec<Arc<dyn IndexResolver>>,
}

impl DelegatingIndexResolver {
    pub fn new(delegates: Vec<Arc<dyn IndexResolver>>) -> Self {
        Self { delegates }
    }
}

impl Default for DelegatingIndexResolver {
    fn default() -> Self {
        Self::new(vec![Arc::new(PrincipalNameIndexResolver)])
    }
}

impl IndexResolver for DelegatingIndexResolver {
    fn resolve_indexes_for(&self, record: &Record) -> HashMap<String, String> {
        let mut indexes = HashMap::new();
        for delegate in &self.delegates {
            indexes.extend(delegate.resolve_indexes_for(record));
        }
        indexes
    }
}
