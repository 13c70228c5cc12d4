//! Context keys
//!
//! Keys come in two disjoint spaces:
//!
//! - [`ProtectedKey`] - a closed set of identifiers established by the hosting
//!   runtime (request id, X-Ray trace id, tenant id). They can be seeded by
//!   [`InvokeStore::run`](crate::InvokeStore::run) but never overwritten through
//!   [`InvokeStore::set`](crate::InvokeStore::set).
//! - User keys - any string. A user key spelled like a protected key's name is
//!   still a user key, so downstream code cannot forge a protected field.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifiers reserved by the hosting runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProtectedKey {
    /// The invocation's request id
    RequestId,

    /// The X-Ray trace header for the invocation
    XRayTraceId,

    /// The tenant the invocation runs on behalf of
    TenantId,
}

impl ProtectedKey {
    /// Every protected key, in a stable order
    pub const ALL: [ProtectedKey; 3] = [
        ProtectedKey::RequestId,
        ProtectedKey::XRayTraceId,
        ProtectedKey::TenantId,
    ];

    /// Stable external name of this key
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtectedKey::RequestId => "requestId",
            ProtectedKey::XRayTraceId => "xRayTraceId",
            ProtectedKey::TenantId => "tenantId",
        }
    }

    /// Look up a protected key by its external name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == name)
    }
}

impl fmt::Display for ProtectedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request id key, for seeding [`Context`](crate::Context) values
pub const REQUEST_ID: ProtectedKey = ProtectedKey::RequestId;

/// X-Ray trace id key
pub const X_RAY_TRACE_ID: ProtectedKey = ProtectedKey::XRayTraceId;

/// Tenant id key
pub const TENANT_ID: ProtectedKey = ProtectedKey::TenantId;

/// A key into a [`Context`](crate::Context)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextKey {
    /// One of the reserved runtime identifiers
    Protected(ProtectedKey),

    /// Any application-defined field
    User(String),
}

impl ContextKey {
    /// Create a user key
    pub fn user(name: impl Into<String>) -> Self {
        ContextKey::User(name.into())
    }

    /// Whether this key is write-protected
    pub fn is_protected(&self) -> bool {
        matches!(self, ContextKey::Protected(_))
    }

    /// The protected key, if this is one
    pub fn as_protected(&self) -> Option<ProtectedKey> {
        match self {
            ContextKey::Protected(key) => Some(*key),
            ContextKey::User(_) => None,
        }
    }
}

impl From<ProtectedKey> for ContextKey {
    fn from(key: ProtectedKey) -> Self {
        ContextKey::Protected(key)
    }
}

impl From<&str> for ContextKey {
    fn from(name: &str) -> Self {
        ContextKey::User(name.to_string())
    }
}

impl From<String> for ContextKey {
    fn from(name: String) -> Self {
        ContextKey::User(name)
    }
}

impl From<&String> for ContextKey {
    fn from(name: &String) -> Self {
        ContextKey::User(name.clone())
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextKey::Protected(key) => write!(f, "{}", key),
            ContextKey::User(name) => f.write_str(name),
        }
    }
}
