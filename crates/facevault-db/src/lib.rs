//! File record store
//!
//! The narrow persistence interface the vectorization pipeline reads and
//! writes through, with a PostgreSQL implementation and an in-memory one
//! for local runs and tests. Every status change goes through a guarded
//! compare-and-set; there is no unconditional status write.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::StoreError;
pub use memory::InMemoryFileRecordStore;
pub use postgres::PgFileRecordStore;
pub use store::{CasOutcome, FileRecordStore};
