//! Core dispatch engine: schedule construction, submission/file dispatch
//! loops, and finalization, built around a small set of traits
//! ([`store::Store`], [`store::Queue`], [`store::TimeoutWatcher`],
//! [`datastore::Datastore`], [`classification::ClassificationLattice`])
//! rather than any one concrete backend.

pub mod classification;
pub mod clock;
pub mod config;
pub mod context;
pub mod datastore;
pub mod error;
pub mod file_dispatcher;
pub mod finalizer;
pub mod schedule;
pub mod store;
pub mod submission_dispatcher;
pub mod types;

pub use context::DispatchContext;
pub use error::{DispatchError, DispatchResult};
