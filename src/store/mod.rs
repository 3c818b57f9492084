//! The capability set the dispatcher needs from the external in-memory
//! store and from named queues (spec.md §9 "Polymorphism over store
//! primitives"). Any backend implementing these two traits is acceptable;
//! see [`memory`] for the test double and [`redis`] for the production
//! backend.

pub mod memory;
#[cfg(feature = "redis-backend")]
pub mod redis;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::DispatchResult;
use crate::types::{FileScore, FinishRecord, Schedule, Sha256, SubmissionTask};

/// Per-submission shared Dispatch State plus the few cross-submission maps
/// named in spec.md §6 (quota hash, watcher sets, active-tasks hash,
/// FileScore cache, metric counter).
#[async_trait]
pub trait Store: Send + Sync {
    /// Write-once schedule cache. Returns the schedule that is now
    /// authoritative for (sid, sha) — either the one just written, or
    /// whatever a concurrent caller won the race to write first.
    async fn schedule_set_if_absent(
        &self,
        sid: &str,
        sha: &str,
        schedule: Schedule,
    ) -> DispatchResult<Schedule>;

    async fn schedule_get(&self, sid: &str, sha: &str) -> DispatchResult<Option<Schedule>>;

    /// Rewrites the cached schedule for (sid, sha) to just the stages
    /// already started, per spec.md §4.4 step 5 (a filtering short-circuit
    /// truncates the remainder). This is the one sanctioned mutation of an
    /// otherwise write-once cache.
    async fn schedule_truncate(&self, sid: &str, sha: &str, truncated: Schedule) -> DispatchResult<()>;

    /// Monotonic seconds of the most recent dispatch attempt, or 0 if the
    /// (sha, service) pair has never been dispatched.
    async fn dispatch_time(&self, sid: &str, sha: &str, svc: &str) -> DispatchResult<u64>;

    async fn mark_dispatched(&self, sid: &str, sha: &str, svc: &str, now_secs: u64) -> DispatchResult<()>;

    /// Written by the external service worker, not by the dispatcher. The
    /// dispatcher only ever reads through [`Store::finished`]; tests call
    /// this directly to simulate a service completing.
    async fn finish(&self, sid: &str, sha: &str, svc: &str, record: FinishRecord) -> DispatchResult<()>;

    async fn finished(&self, sid: &str, sha: &str, svc: &str) -> DispatchResult<Option<FinishRecord>>;

    /// Atomically admit `sha` to the submission's file set iff the set has
    /// fewer than `max_files` members (or `sha` is already present).
    /// Returns true iff admitted (including "already admitted").
    async fn add_file(&self, sid: &str, sha: &str, max_files: u32) -> DispatchResult<bool>;

    async fn files(&self, sid: &str) -> DispatchResult<HashSet<Sha256>>;

    /// Snapshot of every finish record written for the submission, keyed
    /// by (sha256, service_name).
    async fn all_results(&self, sid: &str) -> DispatchResult<Vec<((Sha256, String), FinishRecord)>>;

    /// Purge all Dispatch State for `sid` (schedules, dispatch timestamps,
    /// finish records, admitted file set).
    async fn delete(&self, sid: &str) -> DispatchResult<()>;

    async fn active_task_get(&self, sid: &str) -> DispatchResult<Option<SubmissionTask>>;
    async fn active_task_set(&self, sid: &str, task: SubmissionTask) -> DispatchResult<()>;
    async fn active_task_delete(&self, sid: &str) -> DispatchResult<()>;

    /// `submissions-<submitter>`: refresh the quota hash with an ISO
    /// timestamp for `sid`.
    async fn quota_touch(&self, submitter: &str, sid: &str, iso_ts: &str) -> DispatchResult<()>;
    async fn quota_release(&self, submitter: &str, sid: &str) -> DispatchResult<()>;

    /// `dispatch-watcher-list-<sid>`.
    async fn watcher_add(&self, sid: &str, queue_name: &str) -> DispatchResult<()>;
    async fn watchers(&self, sid: &str) -> DispatchResult<Vec<String>>;
    async fn watchers_delete(&self, sid: &str) -> DispatchResult<()>;

    /// Deletes the per-file and submission tag sets named in spec.md §6
    /// (`/<sid>/<sha256>/tags`, `st/<parent_hash>/<sha256>`) on file
    /// completion. `parent_hash` is `None` for root files, matching
    /// `FileTask.parent_hash` (spec.md §9 open question: left optional,
    /// wired through unchanged). The dispatcher never reads these back; it
    /// only clears them, so a single opaque op suffices.
    async fn clear_file_tags(&self, sid: &str, sha: &str, parent_hash: Option<&str>) -> DispatchResult<()>;

    async fn filescore_set(&self, key: &str, record: FileScore) -> DispatchResult<()>;

    async fn incr_counter(&self, name: &str) -> DispatchResult<()>;
}

/// Named FIFO queues (spec.md §6): `dispatch-submission`, `dispatch-file`,
/// `service-queue-<name>`, arbitrary watcher/completed queues.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn push(&self, queue: &str, payload: serde_json::Value) -> DispatchResult<()>;

    /// Best-effort, non-blocking pop; returns `None` if the queue is
    /// empty. Worker loops are expected to wrap this with their own
    /// polling/backoff, matching spec.md §5 ("queue pop (blocking with
    /// timeout)" is a property of the deployment, not of this trait).
    async fn pop(&self, queue: &str) -> DispatchResult<Option<serde_json::Value>>;
}

/// Idempotent "touch key with TTL; on expiry re-push message to queue"
/// primitive (spec.md §4.2 rationale, §6). The watchdog service itself is
/// an external collaborator (spec.md §1 out of scope); this trait is only
/// the touch/clear side the dispatcher calls.
#[async_trait]
pub trait TimeoutWatcher: Send + Sync {
    async fn touch(
        &self,
        key: &str,
        ttl_secs: u64,
        redeliver_queue: &str,
        redeliver_payload: serde_json::Value,
    ) -> DispatchResult<()>;

    async fn clear(&self, key: &str) -> DispatchResult<()>;
}
