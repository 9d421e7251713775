//! Process-wide named server registry.
//!
//! Maps unique names to server handles. The registry holds no ownership:
//! a watcher task removes an entry as soon as its server exits, for any
//! reason, so lookups never yield a stopped server for long. Backed by
//! `DashMap` for lock-free concurrent access.

// Layer 1: Standard library imports
use std::any::Any;
use std::sync::{Arc, OnceLock};

// Layer 2: Third-party crate imports
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

// Layer 3: Internal module imports
use crate::server::handle::ServerShared;
use crate::server::{Caster, GenServer, ServerHandle};
use crate::util::ServerId;

/// Errors raised by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The name is taken by a live server.
    #[error("name '{name}' is already registered")]
    AlreadyRegistered { name: String },

    /// No live server is registered under the name.
    #[error("no server registered under name '{name}'")]
    NotRegistered { name: String },

    /// A server is registered under the name, but with a different
    /// behavior type than the caller asked for.
    #[error("server registered under name '{name}' has a different type")]
    WrongType { name: String },
}

struct RegistryEntry {
    shared: Arc<ServerShared>,
    handle: Box<dyn Any + Send + Sync>,
    caster: Box<dyn Any + Send + Sync>,
}

struct RegistryInner {
    entries: DashMap<String, RegistryEntry>,
}

/// Named lookup table for servers.
///
/// Cloning is cheap; all clones observe the same table. Most code uses
/// the process-wide [`Registry::global`] instance, which the engine also
/// registers named servers into; separate instances exist for tests.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Create an empty, independent registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: DashMap::new(),
            }),
        }
    }

    /// The lazily-initialized process-wide registry.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    /// Register `handle` under `name`.
    ///
    /// Fails with [`RegistryError::AlreadyRegistered`] if the name is
    /// taken. On success a watcher task is installed that unregisters
    /// the entry when the server exits, whatever the reason.
    pub fn register<B: GenServer>(
        &self,
        name: impl Into<String>,
        handle: &ServerHandle<B>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let shared = Arc::clone(handle.shared());

        match self.inner.entries.entry(name.clone()) {
            Entry::Occupied(_) => {
                return Err(RegistryError::AlreadyRegistered { name });
            }
            Entry::Vacant(slot) => {
                slot.insert(RegistryEntry {
                    shared: Arc::clone(&shared),
                    handle: Box::new(handle.clone()),
                    caster: Box::new(handle.caster()),
                });
            }
        }

        let registry = self.clone();
        let server_id = shared.id();
        tokio::spawn(async move {
            shared.wait_exit().await;
            registry.remove_entry(&name, server_id);
        });

        Ok(())
    }

    /// Look up a handle by name, with the behavior type supplied by the
    /// caller.
    pub fn lookup<B: GenServer>(&self, name: &str) -> Result<ServerHandle<B>, RegistryError> {
        let entry = self
            .inner
            .entries
            .get(name)
            .ok_or_else(|| RegistryError::NotRegistered { name: name.into() })?;

        // A just-exited server may linger until its watcher fires; never
        // hand it out.
        if !entry.shared.status().is_running() {
            return Err(RegistryError::NotRegistered { name: name.into() });
        }

        entry
            .handle
            .downcast_ref::<ServerHandle<B>>()
            .cloned()
            .ok_or_else(|| RegistryError::WrongType { name: name.into() })
    }

    /// Non-throwing lookup variant.
    pub fn whereis<B: GenServer>(&self, name: &str) -> Option<ServerHandle<B>> {
        self.lookup(name).ok()
    }

    /// Type-erased cast capability for the named server, if it is live
    /// and its cast payload type is `M`.
    pub fn caster<M: 'static>(&self, name: &str) -> Option<Caster<M>> {
        let entry = self.inner.entries.get(name)?;
        if !entry.shared.status().is_running() {
            return None;
        }
        entry.caster.downcast_ref::<Caster<M>>().cloned()
    }

    /// Remove the entry under `name`. Idempotent.
    pub fn unregister(&self, name: &str) {
        self.inner.entries.remove(name);
    }

    /// Whether any server is currently registered under `name`.
    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.entries.contains_key(name)
    }

    /// Snapshot of all registered names. May go stale immediately.
    pub fn names(&self) -> Vec<String> {
        self.inner
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of registered names.
    pub fn count(&self) -> usize {
        self.inner.entries.len()
    }

    /// Remove `name` only if it still belongs to `server_id`.
    ///
    /// Guards against deleting a newer registration that reused a name
    /// after the old server was manually unregistered.
    fn remove_entry(&self, name: &str, server_id: ServerId) {
        let removed = self
            .inner
            .entries
            .remove_if(name, |_, entry| entry.shared.id() == server_id);
        if removed.is_some() {
            debug!(name, %server_id, "unregistered exited server");
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
