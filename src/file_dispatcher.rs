//! File Dispatcher: spec.md §4.4.

use serde_json::json;
use tracing::{info, warn};

use crate::context::DispatchContext;
use crate::error::DispatchResult;
use crate::schedule::build_schedule;
use crate::types::{FileScore, FileTask, ServiceDescriptor, ServiceTask, SubmissionRef};

#[derive(Debug, PartialEq, Eq)]
pub enum FileDispatchOutcome {
    /// These services were (re-)pushed to their service queues this pass.
    Outstanding(Vec<String>),
    /// Every applicable service has a finish record; the file is done.
    Complete,
    /// The file task referenced an `sid` with no active task.
    Untracked,
}

pub async fn dispatch_file(ctx: &DispatchContext, task: FileTask) -> DispatchResult<FileDispatchOutcome> {
    let sid = task.sid.clone();

    let Some(active_task) = ctx.store.active_task_get(&sid).await? else {
        warn!(sid = %sid, "file dispatch for untracked submission, dropping");
        return Ok(FileDispatchOutcome::Untracked);
    };

    ctx.watcher
        .touch(
            &sid,
            ctx.config.dispatcher_timeout_secs,
            "dispatch-submission",
            json!(SubmissionRef { sid: sid.clone() }),
        )
        .await?;

    let sha = task.file_info.sha256.clone();
    let submission = &active_task.submission;

    let schedule = match ctx.store.schedule_get(&sid, &sha).await? {
        Some(s) => s,
        None => {
            let catalog = ctx.datastore.service_catalog().await?;
            let built = build_schedule(
                &catalog,
                &submission.params,
                &task.file_info.file_type,
                &ctx.config.stages,
            );
            ctx.store.schedule_set_if_absent(&sid, &sha, built).await?
        }
    };

    let catalog = ctx.datastore.service_catalog().await?;
    let mut outstanding: Vec<&ServiceDescriptor> = Vec::new();
    let mut score = 0i64;
    let mut errors = 0u32;
    let mut started_stages: Vec<Vec<String>> = Vec::new();
    let mut truncated = false;

    'stages: for stage in &schedule {
        if truncated {
            break 'stages;
        }
        started_stages.push(stage.clone());

        let mut stage_outstanding = Vec::new();
        for svc_name in stage {
            match ctx.store.finished(&sid, &sha, svc_name).await? {
                None => {
                    if let Some(desc) = catalog.get(svc_name) {
                        stage_outstanding.push(desc);
                    } else {
                        warn!(sid = %sid, service = %svc_name, "outstanding service missing from catalog, skipping");
                    }
                }
                Some(record) if record.is_error() => errors += 1,
                Some(record) => {
                    score += record.score;
                    if record.drop && !submission.params.ignore_filtering {
                        truncated = true;
                    }
                }
            }
        }

        if !stage_outstanding.is_empty() {
            outstanding = stage_outstanding;
            break 'stages;
        }
    }

    if truncated {
        ctx.store.schedule_truncate(&sid, &sha, started_stages).await?;
    }

    if !outstanding.is_empty() {
        let mut dispatched_names = Vec::new();
        for svc in &outstanding {
            let last_dispatch = ctx.store.dispatch_time(&sid, &sha, &svc.name).await?;
            if ctx.now_secs().saturating_sub(last_dispatch) < svc.timeout_secs {
                continue; // already in flight within its own window
            }

            let config = build_service_config(svc, submission);
            let service_task = ServiceTask {
                sid: sid.clone(),
                service_name: svc.name.clone(),
                service_config: serde_json::to_string(&config)?,
                fileinfo: task.file_info.clone(),
                depth: task.depth,
                max_files: task.max_files,
            };
            ctx.queue
                .push(&format!("service-queue-{}", svc.name), serde_json::to_value(&service_task)?)
                .await?;
            ctx.store.mark_dispatched(&sid, &sha, &svc.name, ctx.now_secs()).await?;
            dispatched_names.push(svc.name.clone());
        }
        return Ok(FileDispatchOutcome::Outstanding(dispatched_names));
    }

    // No outstanding services: this file is done for the submission.
    let filescore = FileScore {
        psid: submission.params.psid.clone(),
        expiry_ts: submission.expiry_ts,
        score,
        errors,
        sid: sid.clone(),
        time: chrono::Utc::now(),
    };
    ctx.store
        .filescore_set(&submission.create_filescore_key(&sha), filescore)
        .await?;
    ctx.store
        .clear_file_tags(&sid, &sha, task.parent_hash.as_deref())
        .await?;
    ctx.store.incr_counter("dispatch.files_complete").await?;

    if all_finished(ctx, &sid).await? {
        ctx.queue
            .push("dispatch-submission", serde_json::to_value(&SubmissionRef { sid: sid.clone() })?)
            .await?;
    }

    info!(sid = %sid, sha = %sha, "file complete");
    Ok(FileDispatchOutcome::Complete)
}

fn build_service_config(svc: &ServiceDescriptor, submission: &crate::types::Submission) -> serde_json::Value {
    let mut config = serde_json::Map::new();
    for param in &svc.submission_params {
        config.insert(param.name.clone(), param.default.clone());
    }
    if let Some(overrides) = submission.params.service_spec.get(&svc.name) {
        for (key, value) in overrides {
            config.insert(key.clone(), value.clone());
        }
    }
    serde_json::Value::Object(config)
}

/// True iff every admitted file's cached schedule has a finish record for
/// every one of its services (spec.md §4.2 `all_finished`).
async fn all_finished(ctx: &DispatchContext, sid: &str) -> DispatchResult<bool> {
    let files = ctx.store.files(sid).await?;
    for sha in files {
        let Some(schedule) = ctx.store.schedule_get(sid, &sha).await? else {
            continue; // never scheduled: trivially has nothing outstanding
        };
        for stage in &schedule {
            for svc in stage {
                if ctx.store.finished(sid, &sha, svc).await?.is_none() {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}
