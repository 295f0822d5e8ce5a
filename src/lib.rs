//! podwarden: lifecycle orchestration for a two-pod GPU pipeline.
//!
//! One pod generates frames, the other drives it and feeds a downstream
//! consumer. [`orchestrator::PodOrchestrator`] keeps both alive on a rented
//! GPU provider: it discovers, starts, creates and recreates pods, registers
//! the generation endpoint with the consumer, and remembers the last error
//! per role.

pub mod cache;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod orchestrator;
pub mod pipeline;
pub mod pods;
pub mod provider;
pub mod state;
pub mod testing;
