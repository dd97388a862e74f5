//! Provider registry - maps namespaces to connected tool providers
//!
//! The dispatcher resolves the namespace of every tool call through this
//! registry.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::tools::provider::ToolProvider;

/// Registry of connected tool providers
#[derive(Default)]
pub struct ProviderRegistry {
    /// Providers indexed by namespace
    providers: RwLock<BTreeMap<String, Arc<dyn ToolProvider>>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name; a later registration wins
    pub fn register(&self, provider: Arc<dyn ToolProvider>) {
        let name = provider.name().to_string();
        self.providers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, provider);
    }

    /// Remove a provider, returning it if it was registered
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn ToolProvider>> {
        self.providers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
    }

    /// Look up the provider for a namespace
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolProvider>> {
        self.providers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Registered namespaces in sorted order
    pub fn names(&self) -> Vec<String> {
        self.providers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.providers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Whether no provider is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unregister and close every provider
    pub async fn close_all(&self) {
        let drained: Vec<Arc<dyn ToolProvider>> = {
            let mut providers = self.providers.write().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *providers).into_values().collect()
        };
        for provider in drained {
            provider.close().await;
        }
    }
}
