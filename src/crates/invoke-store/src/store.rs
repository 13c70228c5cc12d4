//! Context store with per-invocation propagation
//!
//! [`InvokeStore`] associates a mutable [`Context`] with one logical unit of
//! work. Inside [`InvokeStore::run`] the context is ambient: any code the work
//! reaches, across every `.await`, can read it and add user fields to it.
//! Concurrent invocations each see only their own context.
//!
//! # How propagation works
//!
//! The ambient state is a tokio task-local holding a chain of scope frames.
//! Each `run` pushes a frame `(store id, context cell)` on top of whatever
//! chain was ambient when it was called, and installs the new chain for the
//! duration of its work. Lookups walk the chain for the first frame belonging
//! to the querying store, so nested runs shadow their parents and independent
//! store instances never observe each other.
//!
//! Task-locals survive suspension of the same task but are not inherited by
//! `tokio::spawn`. Work scheduled onto another task (timers, deferred
//! callbacks, blocking jobs) must carry the chain explicitly:
//!
//! - [`InvokeStore::spawn`] / [`InvokeStore::bind`] for futures
//! - [`InvokeStore::spawn_blocking`] / [`InvokeStore::bind_fn`] for closures
//!
//! # Example
//!
//! ```rust
//! use invoke_store::{Context, InvokeStore};
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InvokeStore::new());
//!
//! let ctx = Context::new().with_request_id("req-123");
//! let inner = Arc::clone(&store);
//! store
//!     .run(ctx, async move {
//!         inner.set("step", json!("started"))?;
//!
//!         // A timer callback on another task still sees the invocation
//!         let task_store = Arc::clone(&inner);
//!         let handle = inner.spawn(async move {
//!             tokio::time::sleep(Duration::from_millis(1)).await;
//!             (task_store.get_request_id(), task_store.get("step"))
//!         });
//!         assert_eq!(handle.await?, ("req-123".to_string(), Some(json!("started"))));
//!         Ok::<_, Box<dyn std::error::Error>>(())
//!     })
//!     .await?;
//!
//! assert!(!store.has_context());
//! # Ok(())
//! # }
//! ```

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::context::{id_from_value, Context};
use crate::error::{Result, StoreError};
use crate::keys::{ContextKey, ProtectedKey};

/// Placeholder returned by [`InvokeStore::get_request_id`] outside an invocation
pub const NO_REQUEST_ID: &str = "-";

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// One entry of the ambient scope chain
#[derive(Debug)]
struct Frame {
    store_id: u64,
    context: Arc<Mutex<Context>>,
    parent: Option<Arc<Frame>>,
}

type Chain = Option<Arc<Frame>>;

// Task-local storage for the scope chain (the async analogue of a thread-local)
tokio::task_local! {
    static SCOPE: Chain;
}

/// The chain ambient in the current task, if any
fn current_chain() -> Chain {
    SCOPE.try_with(Clone::clone).ok().flatten()
}

fn bind<F>(fut: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    SCOPE.scope(current_chain(), fut)
}

fn bind_fn<F, T>(f: F) -> impl FnOnce() -> T
where
    F: FnOnce() -> T,
{
    let chain = current_chain();
    move || SCOPE.sync_scope(chain, f)
}

/// Object-safe interface of a context store
///
/// This is what gets published in the [`Registry`](crate::Registry) and what
/// [`global`](crate::global) hands out. [`InvokeStore`] is the built-in
/// implementation; a host may publish its own (a mock, an instrumented
/// wrapper) before the store is first resolved, and that implementation is
/// then used as-is.
///
/// Callers normally go through the generic helpers on `dyn ContextStore`
/// (`run`, `run_sync`, `get`, `set`, `spawn`) rather than the raw methods.
pub trait ContextStore: Send + Sync {
    /// Drive `work` to completion inside a fresh context seeded from `initial`
    fn run_boxed<'a>(&'a self, initial: Context, work: BoxFuture<'a, ()>) -> BoxFuture<'a, ()>;

    /// Call `work` once inside a fresh context seeded from `initial`
    fn run_sync_dyn(&self, initial: Context, work: &mut dyn FnMut());

    /// Snapshot of the full current context
    fn get_context(&self) -> Option<Context>;

    /// Value of `key` in the current context
    fn get_value(&self, key: &ContextKey) -> Option<Value>;

    /// Write `value` under `key`; protected keys must be rejected
    fn set_value(&self, key: ContextKey, value: Value) -> Result<()>;

    /// Whether a context is ambient
    fn has_context(&self) -> bool;

    /// Request id of the current invocation, or `"-"`
    fn get_request_id(&self) -> String {
        self.get_value(&ProtectedKey::RequestId.into())
            .as_ref()
            .and_then(id_from_value)
            .unwrap_or_else(|| NO_REQUEST_ID.to_string())
    }

    /// X-Ray trace id of the current invocation
    fn get_xray_trace_id(&self) -> Option<String> {
        self.get_value(&ProtectedKey::XRayTraceId.into())
            .as_ref()
            .and_then(id_from_value)
    }

    /// Tenant id of the current invocation
    fn get_tenant_id(&self) -> Option<String> {
        self.get_value(&ProtectedKey::TenantId.into())
            .as_ref()
            .and_then(id_from_value)
    }
}

impl dyn ContextStore {
    /// Execute `work` inside a fresh context seeded from `initial`
    ///
    /// Returns [`StoreError::WorkNotRun`] if the store implementation returned
    /// without driving `work` to completion.
    pub async fn run<F>(&self, initial: Context, work: F) -> Result<F::Output>
    where
        F: Future + Send,
        F::Output: Send,
    {
        let mut output = None;
        let slot = &mut output;
        self.run_boxed(
            initial,
            Box::pin(async move {
                *slot = Some(work.await);
            }),
        )
        .await;
        output.ok_or(StoreError::WorkNotRun)
    }

    /// Synchronous counterpart of [`run`](Self::run)
    pub fn run_sync<F, T>(&self, initial: Context, work: F) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        let mut work = Some(work);
        let mut output = None;
        self.run_sync_dyn(initial, &mut || {
            if let Some(work) = work.take() {
                output = Some(work());
            }
        });
        output.ok_or(StoreError::WorkNotRun)
    }

    /// Value of `key` in the current context
    pub fn get(&self, key: impl Into<ContextKey>) -> Option<Value> {
        self.get_value(&key.into())
    }

    /// Write a user field into the current context
    pub fn set(&self, key: impl Into<ContextKey>, value: impl Into<Value>) -> Result<()> {
        self.set_value(key.into(), value.into())
    }

    /// Attach the ambient scope chain to `fut`
    pub fn bind<F>(&self, fut: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        bind(fut)
    }

    /// Spawn `fut` on the tokio runtime, keeping the ambient context
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(bind(fut))
    }
}

/// Per-invocation context store
///
/// Most code shares one instance through [`global`](crate::global). Separate
/// instances are fully independent: a context established through one is not
/// visible through another.
#[derive(Debug)]
pub struct InvokeStore {
    id: u64,
}

impl InvokeStore {
    /// Create a new, independent store
    pub fn new() -> Self {
        Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Execute `work` with a fresh context seeded from `initial`
    ///
    /// The context is ambient for the whole of `work`, including everything it
    /// awaits and anything it schedules through [`spawn`](Self::spawn) or
    /// [`bind`](Self::bind). The output of `work` is returned unchanged, so
    /// `Err` values pass straight through. When the returned future completes,
    /// is dropped, or unwinds, the previous context (or none) is ambient again.
    ///
    /// The parent chain is captured when `run` is called, not when the
    /// returned future is first polled.
    pub fn run<F>(&self, initial: Context, work: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        let request_id = initial
            .request_id()
            .unwrap_or_else(|| NO_REQUEST_ID.to_string());
        let chain = self.push_frame(initial);
        let store_id = self.id;

        async move {
            debug!(store_id, request_id = %request_id, "Entering invocation scope");
            let output = SCOPE.scope(chain, work).await;
            debug!(store_id, request_id = %request_id, "Leaving invocation scope");
            output
        }
    }

    /// Synchronous counterpart of [`run`](Self::run)
    ///
    /// A panic in `work` unwinds through this call and the scope is still torn
    /// down.
    pub fn run_sync<F, T>(&self, initial: Context, work: F) -> T
    where
        F: FnOnce() -> T,
    {
        let request_id = initial
            .request_id()
            .unwrap_or_else(|| NO_REQUEST_ID.to_string());
        let chain = self.push_frame(initial);

        debug!(store_id = self.id, request_id = %request_id, "Entering invocation scope");
        let output = SCOPE.sync_scope(chain, work);
        debug!(store_id = self.id, request_id = %request_id, "Leaving invocation scope");
        output
    }

    fn push_frame(&self, initial: Context) -> Chain {
        Some(Arc::new(Frame {
            store_id: self.id,
            context: Arc::new(Mutex::new(initial)),
            parent: current_chain(),
        }))
    }

    /// The context cell ambient for this store, if any
    fn current(&self) -> Option<Arc<Mutex<Context>>> {
        SCOPE
            .try_with(|chain| {
                let mut frame = chain.as_ref();
                while let Some(f) = frame {
                    if f.store_id == self.id {
                        return Some(Arc::clone(&f.context));
                    }
                    frame = f.parent.as_ref();
                }
                None
            })
            .ok()
            .flatten()
    }

    /// Snapshot of the full current context, protected and user fields
    pub fn get_context(&self) -> Option<Context> {
        self.current().map(|cell| cell.lock().clone())
    }

    /// Value of `key` in the current context
    pub fn get(&self, key: impl Into<ContextKey>) -> Option<Value> {
        let key = key.into();
        self.current()
            .and_then(|cell| cell.lock().get(&key).cloned())
    }

    /// Write a user field into the current context
    ///
    /// Protected keys are always rejected with [`StoreError::ProtectedField`],
    /// whether or not a context is ambient.
    ///
    /// Outside any invocation the write is silently dropped and `Ok(())` is
    /// returned. Callers that need the value to stick should check
    /// [`has_context`](Self::has_context) first.
    pub fn set(&self, key: impl Into<ContextKey>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        if let Some(protected) = key.as_protected() {
            warn!(key = %protected, "Rejected write to protected context field");
            return Err(StoreError::ProtectedField { key: protected });
        }

        match self.current() {
            Some(cell) => {
                cell.lock().insert(key, value.into());
            }
            None => {
                trace!(key = %key, "No ambient context, dropping write");
            }
        }
        Ok(())
    }

    /// Request id of the current invocation, or `"-"`
    pub fn get_request_id(&self) -> String {
        self.get_id(ProtectedKey::RequestId)
            .unwrap_or_else(|| NO_REQUEST_ID.to_string())
    }

    /// X-Ray trace id of the current invocation
    pub fn get_xray_trace_id(&self) -> Option<String> {
        self.get_id(ProtectedKey::XRayTraceId)
    }

    /// Tenant id of the current invocation
    pub fn get_tenant_id(&self) -> Option<String> {
        self.get_id(ProtectedKey::TenantId)
    }

    fn get_id(&self, key: ProtectedKey) -> Option<String> {
        self.current().and_then(|cell| cell.lock().protected_id(key))
    }

    /// Whether a context is ambient for this store
    pub fn has_context(&self) -> bool {
        self.current().is_some()
    }

    /// Attach the ambient scope chain to `fut`
    ///
    /// The chain is captured now; `fut` sees it whenever and wherever it is
    /// polled. This carries the scopes of every store, not only this one.
    pub fn bind<F>(&self, fut: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        bind(fut)
    }

    /// Attach the ambient scope chain to a synchronous callback
    pub fn bind_fn<F, T>(&self, f: F) -> impl FnOnce() -> T
    where
        F: FnOnce() -> T,
    {
        bind_fn(f)
    }

    /// Spawn `fut` on the tokio runtime, keeping the ambient context
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(bind(fut))
    }

    /// Run `f` on the blocking pool, keeping the ambient context
    pub fn spawn_blocking<F, T>(&self, f: F) -> JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(bind_fn(f))
    }

    /// A `tracing` span carrying the current invocation's identifiers
    ///
    /// Enter it (or `.instrument()` a future with it) to correlate log lines
    /// with the invocation.
    pub fn current_span(&self) -> tracing::Span {
        let request_id = self.get_request_id();
        let trace_id = self.get_xray_trace_id();
        let tenant_id = self.get_tenant_id();
        tracing::info_span!(
            "invocation",
            request_id = %request_id,
            trace_id = %trace_id.as_deref().unwrap_or(NO_REQUEST_ID),
            tenant_id = %tenant_id.as_deref().unwrap_or(NO_REQUEST_ID),
        )
    }
}

impl Default for InvokeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextStore for InvokeStore {
    fn run_boxed<'a>(&'a self, initial: Context, work: BoxFuture<'a, ()>) -> BoxFuture<'a, ()> {
        Box::pin(self.run(initial, work))
    }

    fn run_sync_dyn(&self, initial: Context, work: &mut dyn FnMut()) {
        self.run_sync(initial, work)
    }

    fn get_context(&self) -> Option<Context> {
        InvokeStore::get_context(self)
    }

    fn get_value(&self, key: &ContextKey) -> Option<Value> {
        self.get(key.clone())
    }

    fn set_value(&self, key: ContextKey, value: Value) -> Result<()> {
        self.set(key, value)
    }

    fn has_context(&self) -> bool {
        InvokeStore::has_context(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{REQUEST_ID, TENANT_ID, X_RAY_TRACE_ID};
    use serde_json::json;

    #[test]
    fn test_outside_any_invocation() {
        let store = InvokeStore::new();

        assert!(!store.has_context());
        assert!(store.get_context().is_none());
        assert_eq!(store.get_request_id(), "-");
        assert_eq!(store.get_xray_trace_id(), None);
        assert_eq!(store.get_tenant_id(), None);
        assert_eq!(store.get("anything"), None);
    }

    #[test]
    fn test_set_outside_invocation_is_noop() {
        let store = InvokeStore::new();

        store.set("customField", json!("value")).unwrap();
        assert_eq!(store.get("customField"), None);
        assert!(!store.has_context());
    }

    #[test]
    fn test_protected_write_rejected_without_context() {
        let store = InvokeStore::new();

        let err = store.set(REQUEST_ID, "x").unwrap_err();
        assert_eq!(err, StoreError::ProtectedField { key: REQUEST_ID });
    }

    #[test]
    fn test_run_sync_seeds_context() {
        let store = InvokeStore::new();
        let initial = Context::new()
            .with_request_id("req-1")
            .with_xray_trace_id("trace-1")
            .with_tenant_id("tenant-1")
            .with_field("user", json!({"id": 7}));

        let seen = store.run_sync(initial.clone(), || store.get_context());

        assert_eq!(seen, Some(initial));
        assert!(!store.has_context());
    }

    #[test]
    fn test_run_sync_set_and_get() {
        let store = InvokeStore::new();

        store.run_sync(Context::new().with_request_id("req-1"), || {
            store.set("counter", 1).unwrap();
            store.set("counter", 2).unwrap();
            assert_eq!(store.get("counter"), Some(json!(2)));
            assert_eq!(store.get_request_id(), "req-1");
        });

        assert_eq!(store.get("counter"), None);
    }

    #[test]
    fn test_protected_write_rejected_inside_context() {
        let store = InvokeStore::new();

        store.run_sync(Context::new().with_request_id("req-1"), || {
            for key in [REQUEST_ID, X_RAY_TRACE_ID, TENANT_ID] {
                let err = store.set(key, "forged").unwrap_err();
                assert!(err.to_string().contains("cannot modify protected field"));
            }
            assert_eq!(store.get_request_id(), "req-1");
            assert_eq!(store.get_tenant_id(), None);
        });
    }

    #[test]
    fn test_user_key_named_like_protected() {
        let store = InvokeStore::new();

        store.run_sync(Context::new().with_request_id("req-1"), || {
            store.set("requestId", "shadow").unwrap();
            assert_eq!(store.get_request_id(), "req-1");
            assert_eq!(store.get("requestId"), Some(json!("shadow")));
        });
    }

    #[test]
    fn test_nested_run_sync_restores_parent() {
        let store = InvokeStore::new();

        store.run_sync(Context::new().with_request_id("outer"), || {
            store.set("outerField", "a").unwrap();

            store.run_sync(Context::new().with_request_id("inner"), || {
                assert_eq!(store.get_request_id(), "inner");
                assert_eq!(store.get("outerField"), None);
                store.set("innerField", "b").unwrap();
            });

            assert_eq!(store.get_request_id(), "outer");
            assert_eq!(store.get("outerField"), Some(json!("a")));
            assert_eq!(store.get("innerField"), None);
        });
    }

    #[test]
    fn test_independent_stores_do_not_share() {
        let a = InvokeStore::new();
        let b = InvokeStore::new();

        a.run_sync(Context::new().with_request_id("req-a"), || {
            assert!(a.has_context());
            assert!(!b.has_context());
            assert_eq!(b.get_request_id(), "-");

            b.run_sync(Context::new().with_request_id("req-b"), || {
                assert_eq!(a.get_request_id(), "req-a");
                assert_eq!(b.get_request_id(), "req-b");
            });
        });
    }

    #[test]
    fn test_non_string_ids() {
        let store = InvokeStore::new();
        let initial = Context::new()
            .with_field(REQUEST_ID, json!(12345))
            .with_field(TENANT_ID, Value::Null);

        store.run_sync(initial, || {
            assert_eq!(store.get_request_id(), "12345");
            assert_eq!(store.get_tenant_id(), None);
        });
    }

    #[test]
    fn test_numeric_request_id_agrees_with_context() {
        let store = InvokeStore::new();
        let initial = Context::new().with_field(REQUEST_ID, json!(12345));

        assert_eq!(initial.request_id(), Some("12345".to_string()));
        store.run_sync(initial, || {
            let ctx = store.get_context().unwrap();
            assert_eq!(ctx.request_id(), Some(store.get_request_id()));
        });
    }

    #[test]
    fn test_run_sync_teardown_after_panic() {
        let store = InvokeStore::new();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.run_sync(Context::new().with_request_id("req-1"), || {
                panic!("boom");
            })
        }));

        assert!(result.is_err());
        assert!(!store.has_context());
        assert_eq!(store.get_request_id(), "-");
    }

    #[test]
    fn test_bind_fn_carries_context() {
        let store = InvokeStore::new();

        let callback = store.run_sync(Context::new().with_request_id("req-1"), || {
            store.set("late", "yes").unwrap();
            store.bind_fn(|| (store.get_request_id(), store.get("late")))
        });

        assert!(!store.has_context());
        assert_eq!(callback(), ("req-1".to_string(), Some(json!("yes"))));
    }

    #[tokio::test]
    async fn test_run_returns_work_output() {
        let store = InvokeStore::new();

        let value = store
            .run(Context::new().with_request_id("req-1"), async { 42 })
            .await;
        assert_eq!(value, 42);

        let err: std::result::Result<(), String> = store
            .run(Context::new(), async { Err("failed".to_string()) })
            .await;
        assert_eq!(err, Err("failed".to_string()));
        assert!(!store.has_context());
    }

    #[tokio::test]
    async fn test_spawn_blocking_carries_context() {
        let store = Arc::new(InvokeStore::new());
        let inner = Arc::clone(&store);

        let seen = store
            .run(Context::new().with_request_id("req-blocking"), async move {
                let task_store = Arc::clone(&inner);
                inner
                    .spawn_blocking(move || task_store.get_request_id())
                    .await
                    .unwrap()
            })
            .await;

        assert_eq!(seen, "req-blocking");
    }

    /// Store that accepts work but never runs it
    struct SkippingStore;

    impl ContextStore for SkippingStore {
        fn run_boxed<'a>(&'a self, _initial: Context, _work: BoxFuture<'a, ()>) -> BoxFuture<'a, ()> {
            Box::pin(async {})
        }

        fn run_sync_dyn(&self, _initial: Context, _work: &mut dyn FnMut()) {}

        fn get_context(&self) -> Option<Context> {
            None
        }

        fn get_value(&self, _key: &ContextKey) -> Option<Value> {
            None
        }

        fn set_value(&self, _key: ContextKey, _value: Value) -> Result<()> {
            Ok(())
        }

        fn has_context(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_dyn_store_run_and_accessors() {
        let store: Arc<dyn ContextStore> = Arc::new(InvokeStore::new());
        let initial = Context::new()
            .with_request_id("req-dyn")
            .with_tenant_id("tenant-dyn");

        let seen = store
            .run(initial, async {
                store.set("step", "one").unwrap();
                assert!(store.set(TENANT_ID, "forged").unwrap_err().is_protected_field());
                (
                    store.get_request_id(),
                    store.get_tenant_id(),
                    store.get("step"),
                )
            })
            .await
            .unwrap();

        assert_eq!(
            seen,
            (
                "req-dyn".to_string(),
                Some("tenant-dyn".to_string()),
                Some(json!("one"))
            )
        );
        assert!(!store.has_context());
        assert_eq!(store.get_request_id(), "-");
    }

    #[tokio::test]
    async fn test_dyn_run_reports_skipped_work() {
        let store: Arc<dyn ContextStore> = Arc::new(SkippingStore);

        let err = store.run(Context::new(), async { 1 }).await.unwrap_err();
        assert_eq!(err, StoreError::WorkNotRun);

        let err = store.run_sync(Context::new(), || 1).unwrap_err();
        assert_eq!(err, StoreError::WorkNotRun);
        assert_eq!(store.get_request_id(), "-");
    }

    #[tokio::test]
    async fn test_current_span_outside_invocation() {
        let store = InvokeStore::new();
        let span = store.current_span();
        // Without a subscriber the span is disabled but still constructible
        let _entered = span.enter();
        assert!(!store.has_context());
    }
}
