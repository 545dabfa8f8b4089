//! Application state shared by all handlers.

use facevault_db::FileRecordStore;
use facevault_services::{
    BatchDispatcher, DispatchQueue, FileQueryService, QuotaService, VectorizationPipeline,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// Used directly only by readiness checks.
    pub store: Arc<dyn FileRecordStore>,
    pub dispatcher: BatchDispatcher,
    pub files: FileQueryService,
    pub quota: QuotaService,
    pub queue: DispatchQueue,
}

impl AppState {
    pub fn new(store: Arc<dyn FileRecordStore>, pipeline: VectorizationPipeline) -> Self {
        let VectorizationPipeline {
            queue,
            dispatcher,
            files,
            quota,
        } = pipeline;
        Self {
            store,
            dispatcher,
            files,
            quota,
            queue,
        }
    }
}
