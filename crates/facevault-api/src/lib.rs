//! FaceVault API Library
//!
//! This crate provides the HTTP handlers, application state and setup for the
//! face vectorization service.

pub mod constants;
pub mod error;
mod handlers;
pub mod setup;
pub mod state;
pub mod telemetry;

pub use error::{ErrorResponse, HttpAppError};
pub use state::AppState;
