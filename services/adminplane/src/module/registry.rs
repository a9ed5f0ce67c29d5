//! Lazy module registry.
//!
//! # Purpose
//! Maps module names to deferred initializers. Startup registers every
//! feature module, then a single [`ModuleRegistry::auto_register_all`] pass
//! initializes each pending module and binds its routes.
//!
//! # Key invariants
//! - Re-registering a name replaces the pending entry (last write wins). This
//!   is only meaningful before the auto-register pass.
//! - A module's initializer runs at most once; the live instance is cached and
//!   returned by later lookups.
//! - A failing initializer aborts the pass and, through `main`, startup.
//!
//! # Concurrency
//! One `RwLock` guards the table so registration is safe from any thread. The
//! lock is never held while an initializer or `register_routes` runs.
use crate::module::menus::{MenuProvider, MenuRegistry};
use crate::module::routes::RouteGroups;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// A feature unit that contributes routes.
pub trait AdminModule: Send + Sync {
    fn register_routes(&self, groups: &mut RouteGroups);
}

/// What a module contributes besides routes, resolved at registration.
#[derive(Clone)]
pub enum ModuleCapabilities {
    RoutesOnly,
    RoutesAndMenus(Arc<dyn MenuProvider>),
}

type ModuleInit = Box<dyn FnOnce() -> anyhow::Result<Arc<dyn AdminModule>> + Send + Sync>;

/// Deferred module entry handed to [`ModuleRegistry::register_module`].
pub struct ModuleDefinition {
    init: ModuleInit,
    capabilities: ModuleCapabilities,
}

impl ModuleDefinition {
    pub fn new<F>(capabilities: ModuleCapabilities, init: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<Arc<dyn AdminModule>> + Send + Sync + 'static,
    {
        Self {
            init: Box::new(init),
            capabilities,
        }
    }

    /// Definition for an already constructed module.
    pub fn ready(capabilities: ModuleCapabilities, module: Arc<dyn AdminModule>) -> Self {
        Self::new(capabilities, move || Ok(module))
    }

    pub fn capabilities(&self) -> &ModuleCapabilities {
        &self.capabilities
    }
}

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("module {name} failed to initialize")]
    Init {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("module {0} is not registered")]
    Unknown(String),
    /// Looked up while its own initializer is still running.
    #[error("module {0} is still initializing")]
    InProgress(String),
}

enum EntryState {
    Pending(ModuleInit),
    Initializing,
    Live(Arc<dyn AdminModule>),
}

enum Lookup {
    Ready(Arc<dyn AdminModule>),
    Init(ModuleInit),
}

#[derive(Default)]
struct RegistryInner {
    /// Names waiting for the next auto-register pass, in registration order.
    order: Vec<String>,
    pending: HashMap<String, EntryState>,
    /// Instances whose routes are bound.
    bound: HashMap<String, Arc<dyn AdminModule>>,
}

impl RegistryInner {
    /// Resolve `name`, claiming its initializer if it has not run yet.
    fn lookup(&mut self, name: &str) -> Result<Lookup, ModuleError> {
        if let Some(module) = self.bound.get(name) {
            return Ok(Lookup::Ready(Arc::clone(module)));
        }
        let slot = self
            .pending
            .get_mut(name)
            .ok_or_else(|| ModuleError::Unknown(name.to_string()))?;
        match std::mem::replace(slot, EntryState::Initializing) {
            EntryState::Pending(init) => Ok(Lookup::Init(init)),
            EntryState::Initializing => Err(ModuleError::InProgress(name.to_string())),
            EntryState::Live(module) => {
                *slot = EntryState::Live(Arc::clone(&module));
                Ok(Lookup::Ready(module))
            }
        }
    }

    /// Record the outcome of an initializer claimed by [`Self::lookup`]. A
    /// definition registered while it ran is left in place.
    fn settle(&mut self, name: &str, outcome: &Result<Arc<dyn AdminModule>, ModuleError>) {
        if !matches!(self.pending.get(name), Some(EntryState::Initializing)) {
            return;
        }
        match outcome {
            Ok(module) => {
                self.pending
                    .insert(name.to_string(), EntryState::Live(Arc::clone(module)));
            }
            Err(_) => {
                self.pending.remove(name);
            }
        }
    }
}

pub struct ModuleRegistry {
    inner: RwLock<RegistryInner>,
    menus: Arc<MenuRegistry>,
}

impl ModuleRegistry {
    /// Registry that forwards menu-providing modules to `menus`.
    pub fn new(menus: Arc<MenuRegistry>) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            menus,
        }
    }

    pub fn menus(&self) -> &Arc<MenuRegistry> {
        &self.menus
    }

    fn lock(&self) -> std::sync::RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register_module(&self, name: &str, definition: ModuleDefinition) {
        let ModuleDefinition { init, capabilities } = definition;
        match capabilities {
            ModuleCapabilities::RoutesAndMenus(provider) => {
                self.menus.register_provider(name, provider);
            }
            ModuleCapabilities::RoutesOnly => {
                // A replaced definition may have provided menus.
                self.menus.remove_provider(name);
            }
        }
        let mut inner = self.lock();
        if inner
            .pending
            .insert(name.to_string(), EntryState::Pending(init))
            .is_some()
        {
            tracing::warn!(module = name, "module re-registered; previous definition replaced");
        }
        if !inner.order.iter().any(|queued| queued == name) {
            inner.order.push(name.to_string());
        }
    }

    /// Live instance for `name`, initializing it on first use.
    ///
    /// The initializer runs without the registry lock held, so it may
    /// register further modules.
    pub fn instance(&self, name: &str) -> Result<Arc<dyn AdminModule>, ModuleError> {
        let init = match self.lock().lookup(name)? {
            Lookup::Ready(module) => return Ok(module),
            Lookup::Init(init) => init,
        };
        let outcome = init().map_err(|source| ModuleError::Init {
            name: name.to_string(),
            source,
        });
        self.lock().settle(name, &outcome);
        if outcome.is_ok() {
            tracing::debug!(module = name, "module initialized");
        }
        outcome
    }

    pub fn pending_modules(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.order.clone()
    }

    pub fn bound_modules(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = inner.bound.keys().cloned().collect();
        names.sort();
        names
    }

    /// Initialize every pending module (if needed), bind its routes, and drop
    /// it from the pending set. Modules registered by an initializer during
    /// the pass are bound by the same pass. Returns the number of modules
    /// bound.
    ///
    /// # Errors
    /// - [`ModuleError::Init`] for the first initializer that fails; modules
    ///   after it stay pending.
    pub fn auto_register_all(&self, groups: &mut RouteGroups) -> Result<usize, ModuleError> {
        let mut bound = 0;
        loop {
            let name = {
                let mut inner = self.lock();
                if inner.order.is_empty() {
                    break;
                }
                inner.order.remove(0)
            };
            let module = self.instance(&name)?;
            {
                let mut inner = self.lock();
                if matches!(inner.pending.get(&name), Some(EntryState::Pending(_))) {
                    // Replaced while initializing; the newer definition is queued.
                    continue;
                }
                inner.pending.remove(&name);
                inner.bound.insert(name.clone(), Arc::clone(&module));
            }
            module.register_routes(groups);
            tracing::info!(module = %name, "module routes registered");
            bound += 1;
        }
        Ok(bound)
    }
}
