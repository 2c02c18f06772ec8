//! Durable state: the artifact store and the project registry.
//!
//! Every status transition of a round is persisted before the orchestrator
//! proceeds to the next pipeline stage, so a crash mid-pipeline leaves a
//! resumable, inspectable record rather than a silently lost round.

pub mod db;
pub mod models;

pub use db::{DbHandle, Store};
pub use models::*;
