//! Top-level façade of the aviary orchestration core.
//!
//! Composes the executor crate's machinery into named-instance
//! operations: create, start, stop, delete, list and input injection.
//! Invoked by an external CRUD layer; progress is observed through the
//! reporter's event fan-out.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod error;
pub mod keys;
pub mod orchestrator;
pub mod provision;
pub mod slots;

pub use config::OrchestratorConfig;
pub use error::OrchestratorError;
pub use orchestrator::InstanceOrchestrator;
pub use provision::{ImageProvisioner, LocalImageProvisioner};
pub use slots::SlotRegistry;
