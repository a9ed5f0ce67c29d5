//! Menu provider aggregation.
//!
//! # Purpose
//! Collects the static menu trees declared by modules so the reconciliation
//! pass can persist them. Purely in-memory; never touches storage.
//!
//! # Key invariants
//! - Providers are queried in registration order; re-registering a name keeps
//!   its original position.
//! - Trees are concatenated, never merged. A later subtree reusing an
//!   earlier `number` is skipped by reconciliation.
use crate::model::MenuNode;
use std::sync::{Arc, PoisonError, RwLock};

/// Source of a module's static menu declarations.
pub trait MenuProvider: Send + Sync {
    fn menus(&self) -> Vec<MenuNode>;
}

impl<F> MenuProvider for F
where
    F: Fn() -> Vec<MenuNode> + Send + Sync,
{
    fn menus(&self) -> Vec<MenuNode> {
        self()
    }
}

#[derive(Default)]
pub struct MenuRegistry {
    providers: RwLock<Vec<(String, Arc<dyn MenuProvider>)>>,
}

impl MenuRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_provider(&self, name: &str, provider: Arc<dyn MenuProvider>) {
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        match providers.iter_mut().find(|(existing, _)| existing == name) {
            Some(slot) => slot.1 = provider,
            None => providers.push((name.to_string(), provider)),
        }
    }

    /// Drop the provider registered under `name`, if any.
    pub fn remove_provider(&self, name: &str) -> bool {
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        let before = providers.len();
        providers.retain(|(existing, _)| existing != name);
        providers.len() != before
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Every provider's roots, concatenated in registration order.
    pub fn all_menus(&self) -> Vec<MenuNode> {
        // Clone the handles so providers run without holding the lock.
        let providers: Vec<Arc<dyn MenuProvider>> = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, provider)| Arc::clone(provider))
            .collect();
        providers
            .iter()
            .flat_map(|provider| provider.menus())
            .collect()
    }
}
