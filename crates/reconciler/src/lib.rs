//! Reconciliation engine for AppService objects.
//!
//! This crate keeps a pair of managed children — a deployment and the
//! service exposing it — synchronized with a user-edited [`AppService`]:
//!
//! - **Builder**: pure, deterministic mapping from an `AppSpec` to the two
//!   child specs, used both to create and to compute update targets
//! - **History**: canonical snapshot of the last-applied spec, stored in an
//!   annotation on the object itself — the only memory between passes
//! - **Retry**: bounded retry of a single write on optimistic-concurrency
//!   conflicts
//! - **Reconciler**: one pass of fetch, branch, diff, apply
//!
//! # Key Concepts
//!
//! ## One pass
//!
//! A pass is triggered externally with nothing but an identity, and may be
//! repeated or re-ordered at will. Each pass:
//! 1. Fetches the object (gone or deleting means done)
//! 2. Probes for the child deployment
//! 3. Creates both children on first sight, recording a spec snapshot
//! 4. Otherwise diffs the snapshot against the current spec and rewrites
//!    drifted children, preserving platform-assigned fields
//!
//! ## Idempotence
//!
//! Reconciling twice with no intervening edit writes nothing the second
//! time, and a half-finished creation is completed by a later pass rather
//! than rolled back.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use appservice_core::InMemoryObjectStore;
//! use appservice_reconciler::Reconciler;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryObjectStore::new_arc();
//!     let reconciler = Reconciler::new(store);
//!
//!     // Invoked by the watch/work-queue scheduler:
//!     // reconciler.reconcile("default", "web").await;
//! }
//! ```
//!
//! [`AppService`]: appservice_core::AppService

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod builder;
pub mod error;
pub mod history;
pub mod reconciler;
pub mod retry;

// Re-export main types
pub use error::{Error, Result};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use retry::ConflictRetryer;
