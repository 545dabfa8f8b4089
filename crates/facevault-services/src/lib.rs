//! FaceVault Services Layer
//!
//! Business services on top of the store, detector and worker crates: the
//! batch vectorization dispatcher, the job handler that turns a claimed file
//! into faces, quota accounting and pull-based file queries. The API crate
//! depends on this facade and keeps only thin HTTP handling.

pub mod dispatcher;
pub mod files;
pub mod pipeline;
pub mod quota;
pub mod vectorizer;

pub use dispatcher::BatchDispatcher;
pub use files::FileQueryService;
pub use pipeline::{create_detector, VectorizationPipeline};
pub use quota::QuotaService;
pub use vectorizer::FaceVectorizer;

pub use facevault_worker::{DispatchQueue, JobReport, QueueConfig};
