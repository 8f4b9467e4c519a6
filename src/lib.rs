//! # Operations Controller
//!
//! A Kubernetes controller that executes Operation custom resources against
//! external webhooks and reports outcomes to the Director system-of-record.
//!
//! ## Overview
//!
//! Callers create an `Operation` resource describing a desired lifecycle
//! action (Create/Update/Delete) against an external resource. The controller
//! drives each Operation through:
//!
//! 1. **Status initialization** - resets the status once per spec generation,
//!    validating that at most one webhook is declared
//! 2. **Application fetch** - reads the current external-resource state from
//!    the Director on every pass; an already-ready application short-circuits
//!    to a terminal phase
//! 3. **Webhook execution** - renders the Director-owned descriptor templates
//!    and performs the call, synchronously or asynchronously with polling
//! 4. **Timeout enforcement** - a per-call webhook deadline bounds each
//!    Do/Poll call and a reconciliation deadline bounds the whole Operation
//! 5. **Terminal reporting** - writes the final phase/conditions through the
//!    status sub-resource with optimistic-concurrency retry and reports the
//!    outcome back to the Director
//!
//! ## Features
//!
//! - **Crash tolerant**: every pass recomputes its state from the resource
//!   and the Director; nothing is cached across invocations
//! - **Bounded concurrency**: distinct Operation keys reconcile in parallel
//!   up to a configured limit; passes for one key are serialized
//! - **Typed failure taxonomy**: transient, fatal, gone, timeout, not-found,
//!   and validation failures each follow their own policy
//! - **Prometheus metrics**: pass counts, failures, durations, requeues
//! - **Health probes**: HTTP endpoints for liveness and readiness checks

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod director;
pub mod errors;
pub mod k8s;
pub mod observability;
pub mod runtime;
pub mod webhook;

pub use crd::{Operation, OperationSpec, OperationStatus, OperationType};
