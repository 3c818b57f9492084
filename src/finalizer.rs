//! Finalizer: spec.md §4.5. Called once a submission's walk admits no new
//! pending files — rolls up results, writes the completed submission, and
//! tears down the submission's Dispatch State and watchers.

use tracing::{info, warn};

use crate::context::DispatchContext;
use crate::error::DispatchResult;
use crate::types::{Bucket, SubmissionTask};

pub async fn finalize(
    ctx: &DispatchContext,
    task: &SubmissionTask,
    walk_classifications: Vec<String>,
    walk_max_score: i64,
) -> DispatchResult<()> {
    let mut submission = task.submission.clone();
    let sid = submission.sid.clone();

    if let (Some(quota_item), Some(submitter)) =
        (submission.params.quota_item.as_ref(), submission.params.submitter.as_ref())
    {
        let _ = quota_item;
        ctx.store.quota_release(submitter, &sid).await?;
    }

    let all_results = ctx.store.all_results(&sid).await?;
    let mut results = Vec::new();
    let mut errors = Vec::new();
    let mut max_score = walk_max_score;
    let mut classification = submission.params.classification.clone();
    for c in &walk_classifications {
        classification = ctx.lattice.max(&classification, c);
    }

    for ((_sha, _svc), record) in &all_results {
        match record.bucket {
            Bucket::Result => {
                classification = ctx.lattice.max(&classification, &record.classification);
                max_score = max_score.max(record.score);
                results.push(record.key.clone());
            }
            Bucket::Error => errors.push(record.key.clone()),
            Bucket::Unknown => {
                warn!(sid = %sid, key = %record.key, "finish record in neither result nor error bucket");
            }
        }
    }

    submission.state = "completed".to_string();
    submission.completed_at = Some(chrono::Utc::now());
    submission.error_count = errors.len() as u32;
    submission.errors = errors;
    submission.results = results;
    submission.file_count = ctx.store.files(&sid).await?.len() as u32;
    submission.max_score = max_score;
    submission.classification = classification;

    if let Some(completed_queue) = &task.completed_queue {
        ctx.queue
            .push(completed_queue, serde_json::to_value(&submission)?)
            .await?;
    }

    for watcher_queue in ctx.store.watchers(&sid).await? {
        ctx.queue
            .push(&watcher_queue, serde_json::json!({"status": "STOP"}))
            .await?;
    }
    ctx.store.watchers_delete(&sid).await?;

    ctx.watcher.clear(&sid).await?;
    ctx.store.delete(&sid).await?;
    ctx.store.active_task_delete(&sid).await?;

    info!(sid = %sid, "submission finalized");
    Ok(())
}
