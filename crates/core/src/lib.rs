//! Object model and store abstraction for the AppService operator.
//!
//! This crate holds everything the reconciler reads and writes:
//!
//! - **Types**: the user-authored [`AppService`] and the two child resources
//!   it owns, a [`Deployment`] and a [`Service`]
//! - **Store**: the [`ObjectStore`] trait, the seam between reconciliation
//!   logic and whatever object store backs it, plus an in-memory
//!   implementation with optimistic concurrency for tests
//! - **Errors**: store error kinds ([`Error`]) with helpers for the two
//!   conditions callers branch on, not-found and write conflicts
//!
//! Children always share their owner's (namespace, name). That invariant is
//! what lets the reconciler address them without any index of its own.

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod error;
pub mod store;
pub mod types;

// Re-export main types
pub use error::{Error, Result};
pub use store::{InMemoryObjectStore, ObjectStore, TracingObjectStore, Verb};
pub use types::{
    AppService, AppSpec, ContainerSpec, Deployment, DeploymentSpec, Kind, Object, ObjectMeta,
    OwnerReference, PodTemplate, Service, ServiceSpec,
};
