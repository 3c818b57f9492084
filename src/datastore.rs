//! Interface to the metadata datastore: explicitly out of scope per
//! spec.md §1 ("external collaborators, interfaces only"). The dispatcher
//! only ever reads file metadata and the current service catalog from it.

use async_trait::async_trait;

use crate::error::DispatchResult;
use crate::types::{FileInfo, ServiceCatalog};

#[async_trait]
pub trait Datastore: Send + Sync {
    /// Looks up cached metadata for a content id. Absence is a normal,
    /// logged condition (spec.md §7 "Missing reference"), not an error.
    async fn file_info(&self, sha256: &str) -> DispatchResult<Option<FileInfo>>;

    /// Snapshot of the currently enabled services. Read once per dispatch
    /// pass and treated as stable for that pass (spec.md §9).
    async fn service_catalog(&self) -> DispatchResult<ServiceCatalog>;
}

/// In-memory datastore double used by tests.
#[derive(Default)]
pub struct MemoryDatastore {
    pub files: std::collections::HashMap<String, FileInfo>,
    pub catalog: ServiceCatalog,
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn file_info(&self, sha256: &str) -> DispatchResult<Option<FileInfo>> {
        Ok(self.files.get(sha256).cloned())
    }

    async fn service_catalog(&self) -> DispatchResult<ServiceCatalog> {
        Ok(self.catalog.clone())
    }
}
