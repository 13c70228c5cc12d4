//! Singleton resolution
//!
//! Every caller in the process should share one context store, even when the
//! store is resolved from several independent entry points (separately
//! initialized layers, plugins, test harnesses). The rendezvous point is a
//! [`Registry`]: a map from a well-known [`SlotName`] to a published
//! [`ContextStore`].
//!
//! [`SingletonProvider`] implements the resolution protocol:
//!
//! 1. If opt-out is not requested and the slot holds a store, adopt it by
//!    identity. Never construct a second one.
//! 2. Otherwise construct a new store.
//! 3. Unless opt-out is requested, publish it so later resolutions adopt it.
//!
//! With [`StoreConfig::no_global`] set, the registry is neither read nor
//! written and each resolution gets a private store.
//!
//! The process-wide [`Registry::global`] is the only global mutable state in
//! this crate. Each slot is written at most once (during initialization) and
//! never reassigned, so readers need no coordination beyond the lock.
//!
//! A host can pre-populate the well-known slot before anything resolves the
//! store. Whatever it publishes is used as-is, which is how a mock or an
//! instrumented store is swapped in:
//!
//! ```rust
//! use invoke_store::registry::{Registry, WELL_KNOWN_SLOT};
//! use invoke_store::{InvokeStore, StoreConfig};
//! use std::sync::Arc;
//!
//! let registry = Registry::new();
//! let mine = Arc::new(InvokeStore::new());
//! registry.publish(WELL_KNOWN_SLOT, mine.clone());
//!
//! let resolved = InvokeStore::resolve(&registry, StoreConfig::default());
//! assert_eq!(Arc::as_ptr(&mine).cast::<()>(), Arc::as_ptr(&resolved).cast::<()>());
//! ```

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use crate::config::{FromEnv, StoreConfig};
use crate::store::{ContextStore, InvokeStore};

/// Shared handle to a published store
pub type SharedStore = Arc<dyn ContextStore>;

/// Namespaced name of a registry slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotName {
    /// Namespace, e.g. `awslambda`
    pub namespace: &'static str,
    /// Member within the namespace, e.g. `InvokeStore`
    pub member: &'static str,
}

impl SlotName {
    /// Create a slot name
    pub const fn new(namespace: &'static str, member: &'static str) -> Self {
        Self { namespace, member }
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.member)
    }
}

/// Well-known slot the shared store is published under
pub const WELL_KNOWN_SLOT: SlotName = SlotName::new("awslambda", "InvokeStore");

/// Name-to-store map used as the singleton rendezvous point
#[derive(Default)]
pub struct Registry {
    slots: RwLock<HashMap<SlotName, SharedStore>>,
}

static GLOBAL_REGISTRY: OnceLock<Registry> = OnceLock::new();

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry
    pub fn global() -> &'static Registry {
        GLOBAL_REGISTRY.get_or_init(Registry::new)
    }

    /// Store published under `slot`
    pub fn get(&self, slot: &SlotName) -> Option<SharedStore> {
        self.slots.read().get(slot).cloned()
    }

    /// Whether anything is published under `slot`
    pub fn contains(&self, slot: &SlotName) -> bool {
        self.slots.read().contains_key(slot)
    }

    /// Publish `store` under `slot` unless the slot is already taken
    ///
    /// Returns whatever the slot holds afterwards: `store` on success, the
    /// earlier value otherwise. Published slots are never reassigned.
    pub fn publish(&self, slot: SlotName, store: SharedStore) -> SharedStore {
        Arc::clone(self.slots.write().entry(slot).or_insert(store))
    }

    /// Number of published slots
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Whether nothing has been published
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.read();
        let mut names: Vec<String> = slots.keys().map(ToString::to_string).collect();
        names.sort();
        f.debug_struct("Registry").field("slots", &names).finish()
    }
}

/// Factory that resolves the shared store through a [`Registry`]
#[derive(Debug, Clone, Copy)]
pub struct SingletonProvider<'r> {
    registry: &'r Registry,
    slot: SlotName,
    config: StoreConfig,
}

impl<'r> SingletonProvider<'r> {
    /// Create a provider over `registry`
    pub fn new(registry: &'r Registry, slot: SlotName, config: StoreConfig) -> Self {
        Self {
            registry,
            slot,
            config,
        }
    }

    /// Resolve the store, constructing it with `factory` if needed
    ///
    /// `factory` runs while the registry is write-locked, so two concurrent
    /// first resolutions cannot both publish. It must not access the registry.
    pub fn resolve_with<F>(&self, factory: F) -> SharedStore
    where
        F: FnOnce() -> SharedStore,
    {
        if self.config.no_global {
            debug!(slot = %self.slot, "Global publication disabled, constructing private store");
            return factory();
        }

        let mut slots = self.registry.slots.write();
        if let Some(existing) = slots.get(&self.slot) {
            info!(slot = %self.slot, "Adopting published store");
            return Arc::clone(existing);
        }

        let store = factory();
        slots.insert(self.slot, Arc::clone(&store));
        info!(slot = %self.slot, "Published new store");
        store
    }
}

impl InvokeStore {
    /// Resolve the shared store through `registry`
    ///
    /// Each call models one independent load of the store: with the default
    /// config all calls against the same registry return the same instance,
    /// whether that is an `InvokeStore` built here or a store the host
    /// published beforehand.
    pub fn resolve(registry: &Registry, config: StoreConfig) -> SharedStore {
        SingletonProvider::new(registry, WELL_KNOWN_SLOT, config)
            .resolve_with(|| Arc::new(InvokeStore::new()))
    }
}

static GLOBAL_STORE: OnceLock<SharedStore> = OnceLock::new();

/// The process-wide shared store
///
/// Resolved on first use against [`Registry::global`], honouring the
/// `AWS_LAMBDA_NODEJS_NO_GLOBAL_AWSLAMBDA` opt-out. Later calls return the
/// same instance.
pub fn global() -> SharedStore {
    Arc::clone(
        GLOBAL_STORE
            .get_or_init(|| InvokeStore::resolve(Registry::global(), StoreConfig::from_env())),
    )
}
