//! Stresswatch Controller - Activates staged chaos experiments for test Pods
//!
//! This crate provides:
//! - A pure decision engine (resource matcher, idempotency tracker)
//! - A patch applier with optimistic-concurrency retry
//! - The `ObjectStore` abstraction with HTTP, embedded and mock backends
//! - A deduplicating dispatch queue and the controller loop
//! - Health endpoints and configuration

pub mod applier;
pub mod config;
pub mod controller;
pub mod decision;
pub mod error;
pub mod health;
pub mod idempotency;
pub mod matcher;
pub mod queue;
pub mod reconciler;
pub mod retry;
pub mod scope;
pub mod store;

// Re-export commonly used types
pub use applier::{ApplyReport, PatchApplier};
pub use config::ControllerConfig;
pub use controller::ChaosController;
pub use decision::{decide, Decision, SkipReason, Verdict};
pub use error::{ControllerError, Result};
pub use health::{HealthConfig, HealthServer, Readiness};
pub use idempotency::ActivationState;
pub use matcher::matching_fault_resources;
pub use queue::DispatchQueue;
pub use reconciler::{Action, Reconciler};
pub use retry::RetryConfig;
pub use scope::ReconcileScope;
pub use store::{ApiObjectStore, LocalObjectStore, MockObjectStore, ObjectStore};
