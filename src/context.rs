//! Shared context bundling the dispatcher's external dependencies, in the
//! style of `CoreContext` (`core-new/src/context.rs`): one small `Clone`
//! struct of `Arc`s passed by value into each loop instead of threading
//! five separate parameters through every function.

use std::sync::Arc;

use crate::classification::ClassificationLattice;
use crate::clock::Clock;
use crate::config::DispatcherConfig;
use crate::datastore::Datastore;
use crate::store::{Queue, Store, TimeoutWatcher};

#[derive(Clone)]
pub struct DispatchContext {
    pub store: Arc<dyn Store>,
    pub queue: Arc<dyn Queue>,
    pub watcher: Arc<dyn TimeoutWatcher>,
    pub datastore: Arc<dyn Datastore>,
    pub lattice: Arc<dyn ClassificationLattice>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<DispatcherConfig>,
}

impl DispatchContext {
    pub fn now_secs(&self) -> u64 {
        self.clock.now_secs()
    }
}
