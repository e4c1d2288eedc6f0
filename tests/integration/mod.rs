//! Integration test suite for the orchestration core.
//!
//! These tests exercise the full path from a raw plan to a terminal
//! report: planning, graph validation, worker selection, contract
//! validation, retries, failure cascades, and cancellation.
//!
//! # Test Categories
//!
//! - `plan_execution`: Full goal-to-report runs over multi-task graphs
//! - `failure_propagation`: Upstream failure cascades and partial results
//! - `retry_behavior`: Bounded retries with per-task backoff
//! - `concurrency`: Per-worker and global in-flight limits, cancellation
//!
//! # CI Compatibility
//!
//! All workers are in-process mocks with millisecond delays; the suite
//! makes no external calls.


mod concurrency;
mod failure_propagation;
mod retry_behavior;
