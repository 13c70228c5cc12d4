//! Shared helpers for the integration tests

#![allow(dead_code)]

use futures::future::BoxFuture;
use invoke_store::{Context, ContextKey, ContextStore, Result, StoreError};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// Whether two handles point at the same store instance
pub fn same_store<A: ?Sized, B: ?Sized>(a: &Arc<A>, b: &Arc<B>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

/// Host-side store that reports a fixed request id and records every write
#[derive(Debug, Default)]
pub struct HostStore {
    pub request_id: String,
    pub runs: Mutex<Vec<Context>>,
    pub writes: Mutex<Vec<(ContextKey, Value)>>,
}

impl HostStore {
    pub fn new(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            ..Self::default()
        }
    }
}

impl ContextStore for HostStore {
    fn run_boxed<'a>(&'a self, initial: Context, work: BoxFuture<'a, ()>) -> BoxFuture<'a, ()> {
        self.runs.lock().push(initial);
        work
    }

    fn run_sync_dyn(&self, initial: Context, work: &mut dyn FnMut()) {
        self.runs.lock().push(initial);
        work();
    }

    fn get_context(&self) -> Option<Context> {
        Some(Context::new().with_request_id(self.request_id.as_str()))
    }

    fn get_value(&self, key: &ContextKey) -> Option<Value> {
        if key.is_protected() {
            return self.get_context().and_then(|ctx| ctx.get(key).cloned());
        }
        self.writes
            .lock()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    fn set_value(&self, key: ContextKey, value: Value) -> Result<()> {
        if let Some(protected) = key.as_protected() {
            return Err(StoreError::ProtectedField { key: protected });
        }
        self.writes.lock().push((key, value));
        Ok(())
    }

    fn has_context(&self) -> bool {
        true
    }
}
