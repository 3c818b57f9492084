//! Redis-backed `Store`/`Queue`/`TimeoutWatcher`: the concrete instance of
//! spec.md's "external in-memory store". Connection handling follows
//! `RedisCache` in
//! `examples/Lowband21-ferrex/ferrex-core/src/database/cache.rs`
//! (`redis::Client::open` + `aio::ConnectionManager`, JSON-encoded
//! values); `ConnectionManager` is cheap to clone and safe to share across
//! tasks, so every op clones it rather than taking `&mut self`.

use std::collections::HashSet;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use crate::error::{DispatchError, DispatchResult};
use crate::types::{FileScore, FinishRecord, Schedule, Sha256, SubmissionTask};

use super::{Queue, Store, TimeoutWatcher};

fn map_err(e: redis::RedisError) -> DispatchError {
    DispatchError::store(e)
}

/// One shared connection manager backs the store, the queues, and the
/// watchdog touch points — they are all "the external in-memory store" per
/// spec.md §1/§9, just different key shapes against the same Redis.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> DispatchResult<Self> {
        info!(url, "connecting to dispatch store");
        let client = redis::Client::open(url).map_err(map_err)?;
        let conn = ConnectionManager::new(client).await.map_err(map_err)?;
        Ok(Self { conn })
    }

    fn schedule_key(sid: &str, sha: &str) -> String {
        format!("dispatch:{sid}:schedule:{sha}")
    }

    fn dispatched_key(sid: &str, sha: &str, svc: &str) -> String {
        format!("dispatch:{sid}:dispatched:{sha}:{svc}")
    }

    fn finished_key(sid: &str, sha: &str, svc: &str) -> String {
        format!("dispatch:{sid}:finished:{sha}:{svc}")
    }

    fn finished_index_key(sid: &str) -> String {
        format!("dispatch:{sid}:finished-index")
    }

    fn files_key(sid: &str) -> String {
        format!("dispatch:{sid}:files")
    }
}

#[async_trait]
impl Store for RedisBackend {
    async fn schedule_set_if_absent(
        &self,
        sid: &str,
        sha: &str,
        schedule: Schedule,
    ) -> DispatchResult<Schedule> {
        let mut conn = self.conn.clone();
        let key = Self::schedule_key(sid, sha);
        let encoded = serde_json::to_string(&schedule)?;

        let set: bool = redis::cmd("SET")
            .arg(&key)
            .arg(&encoded)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;

        if set {
            return Ok(schedule);
        }

        let existing: String = conn.get(&key).await.map_err(map_err)?;
        Ok(serde_json::from_str(&existing)?)
    }

    async fn schedule_get(&self, sid: &str, sha: &str) -> DispatchResult<Option<Schedule>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::schedule_key(sid, sha)).await.map_err(map_err)?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    async fn schedule_truncate(&self, sid: &str, sha: &str, truncated: Schedule) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        let encoded = serde_json::to_string(&truncated)?;
        conn.set::<_, _, ()>(Self::schedule_key(sid, sha), encoded)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn dispatch_time(&self, sid: &str, sha: &str, svc: &str) -> DispatchResult<u64> {
        let mut conn = self.conn.clone();
        let raw: Option<u64> = conn
            .get(Self::dispatched_key(sid, sha, svc))
            .await
            .map_err(map_err)?;
        Ok(raw.unwrap_or(0))
    }

    async fn mark_dispatched(&self, sid: &str, sha: &str, svc: &str, now_secs: u64) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(Self::dispatched_key(sid, sha, svc), now_secs)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn finish(&self, sid: &str, sha: &str, svc: &str, record: FinishRecord) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        let key = Self::finished_key(sid, sha, svc);
        let encoded = serde_json::to_string(&record)?;

        // Monotone: first writer wins.
        let set: bool = redis::cmd("SET")
            .arg(&key)
            .arg(&encoded)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;

        if set {
            conn.sadd::<_, _, ()>(Self::finished_index_key(sid), format!("{sha}:{svc}"))
                .await
                .map_err(map_err)?;
        }
        Ok(())
    }

    async fn finished(&self, sid: &str, sha: &str, svc: &str) -> DispatchResult<Option<FinishRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::finished_key(sid, sha, svc)).await.map_err(map_err)?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    async fn add_file(&self, sid: &str, sha: &str, max_files: u32) -> DispatchResult<bool> {
        // Atomic admit-under-cap via a server-side script: avoids a
        // SCARD/SADD race between concurrent dispatcher workers.
        const SCRIPT: &str = r#"
            if redis.call('SISMEMBER', KEYS[1], ARGV[1]) == 1 then
                return 1
            end
            if redis.call('SCARD', KEYS[1]) < tonumber(ARGV[2]) then
                redis.call('SADD', KEYS[1], ARGV[1])
                return 1
            end
            return 0
        "#;
        let mut conn = self.conn.clone();
        let admitted: i32 = redis::Script::new(SCRIPT)
            .key(Self::files_key(sid))
            .arg(sha)
            .arg(max_files)
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(admitted == 1)
    }

    async fn files(&self, sid: &str) -> DispatchResult<HashSet<Sha256>> {
        let mut conn = self.conn.clone();
        let members: HashSet<String> = conn.smembers(Self::files_key(sid)).await.map_err(map_err)?;
        Ok(members)
    }

    async fn all_results(&self, sid: &str) -> DispatchResult<Vec<((Sha256, String), FinishRecord)>> {
        let mut conn = self.conn.clone();
        let entries: HashSet<String> = conn
            .smembers(Self::finished_index_key(sid))
            .await
            .map_err(map_err)?;

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some((sha, svc)) = entry.split_once(':') else {
                debug!(entry, "malformed finished-index entry, skipping");
                continue;
            };
            if let Some(record) = self.finished(sid, sha, svc).await? {
                out.push(((sha.to_string(), svc.to_string()), record));
            }
        }
        Ok(out)
    }

    async fn delete(&self, sid: &str) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        let entries: HashSet<String> = conn
            .smembers(Self::finished_index_key(sid))
            .await
            .unwrap_or_default();
        let mut keys: Vec<String> = entries
            .iter()
            .flat_map(|e| e.split_once(':').map(|(sha, svc)| Self::finished_key(sid, sha, svc)))
            .collect();
        keys.push(Self::finished_index_key(sid));
        keys.push(Self::files_key(sid));

        let files: HashSet<String> = conn.smembers(Self::files_key(sid)).await.unwrap_or_default();
        for sha in &files {
            keys.push(format!("dispatch:{sid}:schedule:{sha}"));
        }

        if !keys.is_empty() {
            conn.del::<_, ()>(keys).await.map_err(map_err)?;
        }
        Ok(())
    }

    async fn active_task_get(&self, sid: &str) -> DispatchResult<Option<SubmissionTask>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget("dispatch-active-tasks", sid).await.map_err(map_err)?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    async fn active_task_set(&self, sid: &str, task: SubmissionTask) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        let encoded = serde_json::to_string(&task)?;
        conn.hset::<_, _, _, ()>("dispatch-active-tasks", sid, encoded)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn active_task_delete(&self, sid: &str) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        conn.hdel::<_, _, ()>("dispatch-active-tasks", sid).await.map_err(map_err)?;
        Ok(())
    }

    async fn quota_touch(&self, submitter: &str, sid: &str, iso_ts: &str) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(format!("submissions-{submitter}"), sid, iso_ts)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn quota_release(&self, submitter: &str, sid: &str) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        conn.hdel::<_, _, ()>(format!("submissions-{submitter}"), sid)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn watcher_add(&self, sid: &str, queue_name: &str) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(format!("dispatch-watcher-list-{sid}"), queue_name)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn watchers(&self, sid: &str) -> DispatchResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .smembers(format!("dispatch-watcher-list-{sid}"))
            .await
            .map_err(map_err)?;
        Ok(members)
    }

    async fn watchers_delete(&self, sid: &str) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(format!("dispatch-watcher-list-{sid}"))
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn clear_file_tags(&self, sid: &str, sha: &str, parent_hash: Option<&str>) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        let parent = parent_hash.unwrap_or("none");
        conn.del::<_, ()>(vec![format!("/{sid}/{sha}/tags"), format!("st/{parent}/{sha}")])
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn filescore_set(&self, key: &str, record: FileScore) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        let encoded = serde_json::to_string(&record)?;
        conn.set::<_, _, ()>(key, encoded).await.map_err(map_err)?;
        Ok(())
    }

    async fn incr_counter(&self, name: &str) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        conn.incr::<_, _, ()>(name, 1).await.map_err(map_err)?;
        Ok(())
    }
}

#[async_trait]
impl Queue for RedisBackend {
    async fn push(&self, queue: &str, payload: serde_json::Value) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        let encoded = serde_json::to_string(&payload)?;
        conn.rpush::<_, _, ()>(queue, encoded).await.map_err(map_err)?;
        Ok(())
    }

    async fn pop(&self, queue: &str) -> DispatchResult<Option<serde_json::Value>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.lpop(queue, None).await.map_err(map_err)?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }
}

#[async_trait]
impl TimeoutWatcher for RedisBackend {
    async fn touch(
        &self,
        key: &str,
        ttl_secs: u64,
        redeliver_queue: &str,
        redeliver_payload: serde_json::Value,
    ) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::json!({
            "queue": redeliver_queue,
            "payload": redeliver_payload,
        });
        let encoded = serde_json::to_string(&payload)?;
        conn.set_ex::<_, _, ()>(format!("watchdog:{key}"), encoded, ttl_secs)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn clear(&self, key: &str) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(format!("watchdog:{key}")).await.map_err(map_err)?;
        Ok(())
    }
}
