//! Invocation context values
//!
//! A [`Context`] is the key/value bag attached to one invocation. It holds the
//! protected runtime identifiers alongside any user fields. The type itself is a
//! plain value: it does not enforce write protection. That guard lives in
//! [`InvokeStore::set`](crate::InvokeStore::set), so a host can freely seed
//! protected fields when building the initial context.
//!
//! # Example
//!
//! ```rust
//! use invoke_store::{Context, REQUEST_ID};
//! use serde_json::json;
//!
//! let ctx = Context::new()
//!     .with_request_id("req-123")
//!     .with_tenant_id("tenant-a")
//!     .with_field("customField", json!("value"));
//!
//! assert_eq!(ctx.request_id().as_deref(), Some("req-123"));
//! assert_eq!(ctx.get(&REQUEST_ID.into()), Some(&json!("req-123")));
//! ```

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::keys::{ContextKey, ProtectedKey};

/// Key/value context for a single invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    fields: BTreeMap<ContextKey, Value>,
}

impl Context {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the request id
    pub fn with_request_id(self, request_id: impl Into<String>) -> Self {
        self.with_field(ProtectedKey::RequestId, Value::String(request_id.into()))
    }

    /// Seed the X-Ray trace id
    pub fn with_xray_trace_id(self, trace_id: impl Into<String>) -> Self {
        self.with_field(ProtectedKey::XRayTraceId, Value::String(trace_id.into()))
    }

    /// Seed the tenant id
    pub fn with_tenant_id(self, tenant_id: impl Into<String>) -> Self {
        self.with_field(ProtectedKey::TenantId, Value::String(tenant_id.into()))
    }

    /// Seed an arbitrary field, protected or user
    pub fn with_field(mut self, key: impl Into<ContextKey>, value: Value) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a field, returning the previous value
    pub fn insert(&mut self, key: impl Into<ContextKey>, value: Value) -> Option<Value> {
        self.fields.insert(key.into(), value)
    }

    /// Look up a field
    pub fn get(&self, key: &ContextKey) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Whether the field is present
    pub fn contains_key(&self, key: &ContextKey) -> bool {
        self.fields.contains_key(key)
    }

    /// Request id, if seeded
    ///
    /// Identifiers seeded as non-string JSON are rendered with their JSON text
    /// (`12345` reads as `"12345"`); `null` counts as unset.
    pub fn request_id(&self) -> Option<String> {
        self.protected_id(ProtectedKey::RequestId)
    }

    /// X-Ray trace id, if seeded
    pub fn xray_trace_id(&self) -> Option<String> {
        self.protected_id(ProtectedKey::XRayTraceId)
    }

    /// Tenant id, if seeded
    pub fn tenant_id(&self) -> Option<String> {
        self.protected_id(ProtectedKey::TenantId)
    }

    /// A protected field read as an identifier string
    pub fn protected_id(&self, key: ProtectedKey) -> Option<String> {
        self.fields
            .get(&ContextKey::Protected(key))
            .and_then(id_from_value)
    }

    /// Iterate over protected fields only
    pub fn protected_fields(&self) -> impl Iterator<Item = (ProtectedKey, &Value)> {
        self.fields
            .iter()
            .filter_map(|(key, value)| key.as_protected().map(|k| (k, value)))
    }

    /// Iterate over user fields only
    pub fn user_fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().filter_map(|(key, value)| match key {
            ContextKey::User(name) => Some((name.as_str(), value)),
            ContextKey::Protected(_) => None,
        })
    }

    /// Iterate over all fields
    pub fn iter(&self) -> impl Iterator<Item = (&ContextKey, &Value)> {
        self.fields.iter()
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the context has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Read an identifier value: strings as-is, other JSON as its text, `null` as unset
pub(crate) fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl<K: Into<ContextKey>> FromIterator<(K, Value)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl<K: Into<ContextKey>> Extend<(K, Value)> for Context {
    fn extend<I: IntoIterator<Item = (K, Value)>>(&mut self, iter: I) {
        self.fields
            .extend(iter.into_iter().map(|(k, v)| (k.into(), v)));
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Context {{ req_id: {}, trace: {}, tenant: {}, fields: {} }}",
            self.request_id().as_deref().unwrap_or("-"),
            self.xray_trace_id().as_deref().unwrap_or("-"),
            self.tenant_id().as_deref().unwrap_or("-"),
            self.len()
        )
    }
}
