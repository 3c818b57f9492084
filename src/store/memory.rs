//! In-memory `Store`/`Queue`/`TimeoutWatcher` used by every test in this
//! crate, grounded in the teacher's preference for an in-process
//! `RwLock<HashMap<..>>` over standing up real infrastructure for unit
//! tests (`infrastructure/jobs/manager.rs`'s `running_jobs` field).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::DispatchResult;
use crate::types::{FileScore, FinishRecord, Schedule, Sha256, SubmissionTask};

use super::{Queue, Store, TimeoutWatcher};

#[derive(Default)]
struct SubmissionState {
    schedules: HashMap<Sha256, Schedule>,
    dispatched: HashMap<(Sha256, String), u64>,
    finished: HashMap<(Sha256, String), FinishRecord>,
    files: HashSet<Sha256>,
}

/// Shared, process-local implementation of the dispatch store. Safe to
/// clone-via-`Arc` across as many simulated "workers" (tokio tasks) as a
/// test wants to spawn.
#[derive(Default)]
pub struct MemoryStore {
    submissions: RwLock<HashMap<String, SubmissionState>>,
    active_tasks: RwLock<HashMap<String, SubmissionTask>>,
    quota: RwLock<HashMap<String, HashMap<String, String>>>,
    watchers: RwLock<HashMap<String, Vec<String>>>,
    filescores: RwLock<HashMap<String, FileScore>>,
    counters: RwLock<HashMap<String, u64>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn counter(&self, name: &str) -> u64 {
        self.counters.read().await.get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn schedule_set_if_absent(
        &self,
        sid: &str,
        sha: &str,
        schedule: Schedule,
    ) -> DispatchResult<Schedule> {
        let mut submissions = self.submissions.write().await;
        let state = submissions.entry(sid.to_string()).or_default();
        Ok(state.schedules.entry(sha.to_string()).or_insert(schedule).clone())
    }

    async fn schedule_get(&self, sid: &str, sha: &str) -> DispatchResult<Option<Schedule>> {
        let submissions = self.submissions.read().await;
        Ok(submissions.get(sid).and_then(|s| s.schedules.get(sha).cloned()))
    }

    async fn schedule_truncate(&self, sid: &str, sha: &str, truncated: Schedule) -> DispatchResult<()> {
        let mut submissions = self.submissions.write().await;
        let state = submissions.entry(sid.to_string()).or_default();
        state.schedules.insert(sha.to_string(), truncated);
        Ok(())
    }

    async fn dispatch_time(&self, sid: &str, sha: &str, svc: &str) -> DispatchResult<u64> {
        let submissions = self.submissions.read().await;
        Ok(submissions
            .get(sid)
            .and_then(|s| s.dispatched.get(&(sha.to_string(), svc.to_string())))
            .copied()
            .unwrap_or(0))
    }

    async fn mark_dispatched(&self, sid: &str, sha: &str, svc: &str, now_secs: u64) -> DispatchResult<()> {
        let mut submissions = self.submissions.write().await;
        let state = submissions.entry(sid.to_string()).or_default();
        state.dispatched.insert((sha.to_string(), svc.to_string()), now_secs);
        Ok(())
    }

    async fn finish(&self, sid: &str, sha: &str, svc: &str, record: FinishRecord) -> DispatchResult<()> {
        let mut submissions = self.submissions.write().await;
        let state = submissions.entry(sid.to_string()).or_default();
        // Monotone: a finish record, once written, is never overwritten.
        state
            .finished
            .entry((sha.to_string(), svc.to_string()))
            .or_insert(record);
        Ok(())
    }

    async fn finished(&self, sid: &str, sha: &str, svc: &str) -> DispatchResult<Option<FinishRecord>> {
        let submissions = self.submissions.read().await;
        Ok(submissions
            .get(sid)
            .and_then(|s| s.finished.get(&(sha.to_string(), svc.to_string())).cloned()))
    }

    async fn add_file(&self, sid: &str, sha: &str, max_files: u32) -> DispatchResult<bool> {
        let mut submissions = self.submissions.write().await;
        let state = submissions.entry(sid.to_string()).or_default();
        if state.files.contains(sha) {
            return Ok(true);
        }
        if (state.files.len() as u32) < max_files {
            state.files.insert(sha.to_string());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn files(&self, sid: &str) -> DispatchResult<HashSet<Sha256>> {
        let submissions = self.submissions.read().await;
        Ok(submissions.get(sid).map(|s| s.files.clone()).unwrap_or_default())
    }

    async fn all_results(&self, sid: &str) -> DispatchResult<Vec<((Sha256, String), FinishRecord)>> {
        let submissions = self.submissions.read().await;
        Ok(submissions
            .get(sid)
            .map(|s| s.finished.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn delete(&self, sid: &str) -> DispatchResult<()> {
        self.submissions.write().await.remove(sid);
        Ok(())
    }

    async fn active_task_get(&self, sid: &str) -> DispatchResult<Option<SubmissionTask>> {
        Ok(self.active_tasks.read().await.get(sid).cloned())
    }

    async fn active_task_set(&self, sid: &str, task: SubmissionTask) -> DispatchResult<()> {
        self.active_tasks.write().await.insert(sid.to_string(), task);
        Ok(())
    }

    async fn active_task_delete(&self, sid: &str) -> DispatchResult<()> {
        self.active_tasks.write().await.remove(sid);
        Ok(())
    }

    async fn quota_touch(&self, submitter: &str, sid: &str, iso_ts: &str) -> DispatchResult<()> {
        let mut quota = self.quota.write().await;
        quota
            .entry(submitter.to_string())
            .or_default()
            .insert(sid.to_string(), iso_ts.to_string());
        Ok(())
    }

    async fn quota_release(&self, submitter: &str, sid: &str) -> DispatchResult<()> {
        if let Some(m) = self.quota.write().await.get_mut(submitter) {
            m.remove(sid);
        }
        Ok(())
    }

    async fn watcher_add(&self, sid: &str, queue_name: &str) -> DispatchResult<()> {
        let mut watchers = self.watchers.write().await;
        let list = watchers.entry(sid.to_string()).or_default();
        if !list.iter().any(|q| q == queue_name) {
            list.push(queue_name.to_string());
        }
        Ok(())
    }

    async fn watchers(&self, sid: &str) -> DispatchResult<Vec<String>> {
        Ok(self.watchers.read().await.get(sid).cloned().unwrap_or_default())
    }

    async fn watchers_delete(&self, sid: &str) -> DispatchResult<()> {
        self.watchers.write().await.remove(sid);
        Ok(())
    }

    async fn clear_file_tags(&self, _sid: &str, _sha: &str, _parent_hash: Option<&str>) -> DispatchResult<()> {
        Ok(())
    }

    async fn filescore_set(&self, key: &str, record: FileScore) -> DispatchResult<()> {
        self.filescores.write().await.insert(key.to_string(), record);
        Ok(())
    }

    async fn incr_counter(&self, name: &str) -> DispatchResult<()> {
        *self.counters.write().await.entry(name.to_string()).or_insert(0) += 1;
        Ok(())
    }
}

/// In-memory FIFO queues, one `VecDeque` per named queue.
#[derive(Default)]
pub struct MemoryQueue {
    queues: RwLock<HashMap<String, VecDeque<serde_json::Value>>>,
}

impl MemoryQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn len(&self, queue: &str) -> usize {
        self.queues.read().await.get(queue).map(|q| q.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn push(&self, queue: &str, payload: serde_json::Value) -> DispatchResult<()> {
        self.queues
            .write()
            .await
            .entry(queue.to_string())
            .or_default()
            .push_back(payload);
        Ok(())
    }

    async fn pop(&self, queue: &str) -> DispatchResult<Option<serde_json::Value>> {
        Ok(self
            .queues
            .write()
            .await
            .get_mut(queue)
            .and_then(|q| q.pop_front()))
    }
}

/// In-memory watchdog touch point. Since the watchdog service itself is an
/// external collaborator (spec.md §1), this double only records the most
/// recent touch per key; tests assert against it directly rather than
/// waiting for a real expiry loop.
#[derive(Default)]
pub struct MemoryWatcher {
    touches: RwLock<HashMap<String, (u64, String, serde_json::Value)>>,
}

impl MemoryWatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn touch_count(&self) -> usize {
        self.touches.read().await.len()
    }
}

#[async_trait]
impl TimeoutWatcher for MemoryWatcher {
    async fn touch(
        &self,
        key: &str,
        ttl_secs: u64,
        redeliver_queue: &str,
        redeliver_payload: serde_json::Value,
    ) -> DispatchResult<()> {
        self.touches.write().await.insert(
            key.to_string(),
            (ttl_secs, redeliver_queue.to_string(), redeliver_payload),
        );
        Ok(())
    }

    async fn clear(&self, key: &str) -> DispatchResult<()> {
        self.touches.write().await.remove(key);
        Ok(())
    }
}
