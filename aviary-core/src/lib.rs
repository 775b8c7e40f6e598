//! Core types for the aviary VM orchestration core.
//!
//! Defines the fundamental domain types shared by the executor and
//! orchestrator crates: instance identity and status, resource profiles,
//! deterministic port derivation, installation results, and progress
//! event payloads.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod install;
pub mod instance;
pub mod ports;
pub mod progress;

pub use error::CoreError;
pub use install::InstallationResult;
pub use instance::{InstanceState, InstanceStatus, ResourceProfile};
pub use ports::{PortLayout, PortMap, Slot};
pub use progress::{ProgressEvent, ProgressEventKind};
