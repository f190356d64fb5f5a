//! testfleet-coordinator - disposable AWS test-execution fleet coordinator
//!
//! This crate provides the coordinator binary that snapshots a template
//! instance into a worker image, distributes test cases through a task queue,
//! provisions a spot-priced worker fleet, and collects per-test result
//! artifacts until the run completes.

pub mod aws;
pub mod config;
pub mod orchestrator;
pub mod wait;
