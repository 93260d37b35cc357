//! Shared types for the API layer.

use std::sync::Arc;

use serde::Serialize;

use crate::db::store::RecordStore;

/// Shared state for all routes: the record store plus the two upstream
/// collaborators. Generic over the collaborator traits so tests can mount
/// the router on fakes.
pub struct ApiContext<G, D> {
    pub store: RecordStore,
    pub scheduling: Arc<G>,
    pub dispatcher: Arc<D>,
}

impl<G, D> ApiContext<G, D> {
    pub fn new(store: RecordStore, scheduling: Arc<G>, dispatcher: Arc<D>) -> Self {
        Self {
            store,
            scheduling,
            dispatcher,
        }
    }
}

// Manual impl: `G`/`D` sit behind `Arc`, so no bounds are needed.
impl<G, D> Clone for ApiContext<G, D> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            scheduling: Arc::clone(&self.scheduling),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

/// Standard success envelope: `{"data": ...}`.
#[derive(Debug, Serialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}

impl<T> DataEnvelope<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}
