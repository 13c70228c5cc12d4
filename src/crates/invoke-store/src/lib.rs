//! # invoke-store - Per-invocation context for tokio request handlers
//!
//! `invoke-store` attaches a mutable key/value [`Context`] to a single logical
//! unit of work (an invocation) and makes it visible to every piece of code that
//! runs as part of that work, across `.await` points, spawned timers and
//! deferred callbacks, while keeping concurrently running invocations isolated
//! from each other.
//!
//! ## Overview
//!
//! - **Scoped execution** - [`InvokeStore::run`] establishes a fresh context for
//!   the full causal extent of a future; [`InvokeStore::run_sync`] does the same
//!   for a closure.
//! - **Protected fields** - the request id, X-Ray trace id and tenant id
//!   ([`ProtectedKey`]) can be seeded by `run` but never overwritten through
//!   [`InvokeStore::set`].
//! - **User fields** - any string key can be added from anywhere inside the
//!   invocation, e.g. for log enrichment.
//! - **Singleton resolution** - [`global()`] returns one shared
//!   [`ContextStore`] per process, resolved through a [`Registry`] that hosts
//!   can pre-populate with their own implementation or opt out of.
//!
//! ## Quick Start
//!
//! ```rust
//! use invoke_store::{Context, REQUEST_ID};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), invoke_store::StoreError> {
//! let store = invoke_store::global();
//!
//! let ctx = Context::new()
//!     .with_request_id("c6af9ac6-7b61-11e6-9a41-93e812345678")
//!     .with_xray_trace_id("Root=1-5759e988-bd862e3fe1be46a994272793");
//!
//! store
//!     .run(ctx, async {
//!         store.set("customerId", json!("cust-42"))?;
//!         assert_eq!(store.get("customerId"), Some(json!("cust-42")));
//!
//!         // Protected fields are read-only once the invocation starts
//!         assert!(store.set(REQUEST_ID, "forged").is_err());
//!
//!         tokio::task::yield_now().await;
//!         assert_eq!(store.get_request_id(), "c6af9ac6-7b61-11e6-9a41-93e812345678");
//!         Ok::<(), invoke_store::StoreError>(())
//!     })
//!     .await??;
//!
//! // Outside any invocation
//! assert_eq!(store.get_request_id(), "-");
//! assert!(!store.has_context());
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! Setting `AWS_LAMBDA_NODEJS_NO_GLOBAL_AWSLAMBDA` to exactly `1` or `true`
//! stops [`global()`] from reading or publishing the process-wide slot; the
//! resolved store is then private to this crate instance. See [`config`].

pub mod config;
pub mod context;
pub mod error;
pub mod keys;
pub mod registry;
pub mod store;

// Re-export commonly used types
pub use config::{FromEnv, StoreConfig, NO_GLOBAL_ENV};
pub use context::Context;
pub use error::{Result, StoreError};
pub use keys::{ContextKey, ProtectedKey, REQUEST_ID, TENANT_ID, X_RAY_TRACE_ID};
pub use registry::{global, Registry, SharedStore, SingletonProvider, SlotName, WELL_KNOWN_SLOT};
pub use store::{ContextStore, InvokeStore, NO_REQUEST_ID};
