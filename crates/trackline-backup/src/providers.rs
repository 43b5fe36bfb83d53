use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use trackline_migrate::SchemaRegistry;
use trackline_store::CollectionProvider;

use crate::error::BackupError;

/// Collection name → provider mapping, resolved once at startup.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<String, Arc<dyn CollectionProvider>>,
}

impl ProviderSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create one provider per registry collection.
    pub fn from_fn<F, P>(registry: &SchemaRegistry, mut make: F) -> Self
    where
        F: FnMut(&str) -> P,
        P: CollectionProvider + 'static,
    {
        let mut set = Self::new();
        for schema in registry.collections() {
            set.insert(Arc::new(make(schema.name())));
        }
        set
    }

    /// Add a provider, keyed by its name. Replaces any previous provider.
    pub fn insert(
        &mut self,
        provider: Arc<dyn CollectionProvider>,
    ) -> Option<Arc<dyn CollectionProvider>> {
        self.providers.insert(provider.name().to_string(), provider)
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, provider: Arc<dyn CollectionProvider>) -> Self {
        self.insert(provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn CollectionProvider> {
        self.providers.get(name).map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Fail with [`BackupError::MissingProvider`] for the first registry
    /// collection that has no provider.
    pub fn ensure_covers(&self, registry: &SchemaRegistry) -> Result<(), BackupError> {
        match registry
            .collections()
            .find(|schema| !self.providers.contains_key(schema.name()))
        {
            Some(schema) => Err(BackupError::MissingProvider(schema.name().to_string())),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ProviderSet").field("collections", &names).finish()
    }
}
