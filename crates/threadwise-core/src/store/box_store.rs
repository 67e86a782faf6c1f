//! Object-safe dynamic dispatch wrappers for the store ports.
//!
//! Same blanket-impl pattern for both ports:
//! 1. An object-safe `*Dyn` trait with boxed futures
//! 2. A blanket impl of the `*Dyn` trait for every implementor of the port
//! 3. A `Box*` wrapper that owns the trait object and delegates

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;

use threadwise_types::context::ContextCandidate;
use threadwise_types::error::StoreError;

use super::{MemoryStore, RelationshipStore, StoreQuery};

/// Object-safe version of [`MemoryStore`].
pub trait MemoryStoreDyn: Send + Sync {
    fn name_dyn(&self) -> &str;

    fn query_boxed<'a>(
        &'a self,
        query: &'a StoreQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ContextCandidate>, StoreError>> + Send + 'a>>;
}

impl<T: MemoryStore> MemoryStoreDyn for T {
    fn name_dyn(&self) -> &str {
        self.name()
    }

    fn query_boxed<'a>(
        &'a self,
        query: &'a StoreQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ContextCandidate>, StoreError>> + Send + 'a>>
    {
        Box::pin(self.query(query))
    }
}

/// Type-erased memory store, so the aggregator can hold heterogeneous
/// backends selected at runtime.
pub struct BoxMemoryStore {
    inner: Box<dyn MemoryStoreDyn + Send + Sync>,
}

impl BoxMemoryStore {
    pub fn new<T: MemoryStore + 'static>(store: T) -> Self {
        Self {
            inner: Box::new(store),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name_dyn()
    }

    pub async fn query(&self, query: &StoreQuery) -> Result<Vec<ContextCandidate>, StoreError> {
        self.inner.query_boxed(query).await
    }
}

impl std::fmt::Debug for BoxMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxMemoryStore")
            .field("name", &self.name())
            .finish()
    }
}

/// Object-safe version of [`RelationshipStore`].
pub trait RelationshipStoreDyn: Send + Sync {
    fn name_dyn(&self) -> &str;

    fn distances_boxed<'a>(
        &'a self,
        origins: &'a BTreeSet<String>,
        targets: &'a BTreeSet<String>,
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<String, u32>, StoreError>> + Send + 'a>>;
}

impl<T: RelationshipStore> RelationshipStoreDyn for T {
    fn name_dyn(&self) -> &str {
        self.name()
    }

    fn distances_boxed<'a>(
        &'a self,
        origins: &'a BTreeSet<String>,
        targets: &'a BTreeSet<String>,
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<String, u32>, StoreError>> + Send + 'a>>
    {
        Box::pin(self.distances(origins, targets))
    }
}

/// Type-erased relationship store.
pub struct BoxRelationshipStore {
    inner: Box<dyn RelationshipStoreDyn + Send + Sync>,
}

impl BoxRelationshipStore {
    pub fn new<T: RelationshipStore + 'static>(store: T) -> Self {
        Self {
            inner: Box::new(store),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name_dyn()
    }

    pub async fn distances(
        &self,
        origins: &BTreeSet<String>,
        targets: &BTreeSet<String>,
    ) -> Result<HashMap<String, u32>, StoreError> {
        self.inner.distances_boxed(origins, targets).await
    }
}

impl std::fmt::Debug for BoxRelationshipStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxRelationshipStore")
            .field("name", &self.name())
            .finish()
    }
}
