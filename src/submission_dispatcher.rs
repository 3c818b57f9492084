//! Submission Dispatcher: spec.md §4.3.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::json;
use tracing::{info, warn};

use crate::context::DispatchContext;
use crate::error::DispatchResult;
use crate::finalizer;
use crate::schedule::build_schedule;
use crate::types::{FileInfo, FileTask, Sha256, Submission, SubmissionRef, SubmissionTask};

/// Either the full payload (initial enqueue) or the minimal `{sid}`
/// re-check message described in spec.md §6.
pub enum SubmissionDispatchInput {
    Full(SubmissionTask),
    Ref(SubmissionRef),
}

/// What `dispatch_submission` decided to do, surfaced for callers/tests;
/// the on-the-wire effect (queue pushes) already happened by the time this
/// is returned.
#[derive(Debug, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// These files were (re-)pushed to the file queue.
    Dispatched(Vec<Sha256>),
    Finalized,
    /// The `{sid}` re-check referenced a submission with no active task
    /// (already finalized, or never started) — logged and dropped.
    Untracked,
}

struct WalkResult {
    pending: HashSet<Sha256>,
    pending_info: HashMap<Sha256, FileInfo>,
    parents_of: HashMap<Sha256, Vec<Sha256>>,
    roots: HashSet<Sha256>,
    max_score: i64,
    classifications: Vec<String>,
}

pub async fn dispatch_submission(
    ctx: &DispatchContext,
    input: SubmissionDispatchInput,
) -> DispatchResult<SubmissionOutcome> {
    let (sid, task) = match input {
        SubmissionDispatchInput::Full(task) => {
            let sid = task.submission.sid.clone();
            if ctx.store.active_task_get(&sid).await?.is_none() {
                ctx.store.active_task_set(&sid, task.clone()).await?;
            }
            (sid, task)
        }
        SubmissionDispatchInput::Ref(r) => match ctx.store.active_task_get(&r.sid).await? {
            Some(task) => (r.sid, task),
            None => {
                warn!(sid = %r.sid, "submission re-check for untracked submission, dropping");
                return Ok(SubmissionOutcome::Untracked);
            }
        },
    };

    ctx.watcher
        .touch(
            &sid,
            ctx.config.dispatcher_timeout_secs,
            "dispatch-submission",
            json!(SubmissionRef { sid: sid.clone() }),
        )
        .await?;

    let submission = &task.submission;

    if let (Some(quota_item), Some(submitter)) =
        (submission.params.quota_item.as_ref(), submission.params.submitter.as_ref())
    {
        let _ = quota_item;
        ctx.store
            .quota_touch(submitter, &sid, &chrono::Utc::now().to_rfc3339())
            .await?;
    }

    let max_files = submission.max_files();
    let catalog = ctx.datastore.service_catalog().await?;

    let mut walk = WalkResult {
        pending: HashSet::new(),
        pending_info: HashMap::new(),
        parents_of: HashMap::new(),
        roots: HashSet::new(),
        max_score: 0,
        classifications: Vec::new(),
    };

    let mut stack: VecDeque<FileInfo> = VecDeque::new();
    // Every declared root counts as encountered up front, independent of
    // whether its metadata lookup below succeeds, so a later extracted
    // child sharing a root's sha256 is treated as already seen.
    let mut encountered: HashSet<Sha256> = submission.files.iter().map(|f| f.sha256.clone()).collect();

    for root in &submission.files {
        walk.roots.insert(root.sha256.clone());
        match ctx.datastore.file_info(&root.sha256).await? {
            Some(info) => stack.push_back(info),
            None => warn!(sid = %sid, sha = %root.sha256, "no file info for root file, skipping"),
        }
    }

    while let Some(file_info) = stack.pop_front() {
        let sha = file_info.sha256.clone();

        let schedule = match ctx.store.schedule_get(&sid, &sha).await? {
            Some(s) => s,
            None => {
                let built = build_schedule(&catalog, &submission.params, &file_info.file_type, &ctx.config.stages);
                ctx.store.schedule_set_if_absent(&sid, &sha, built).await?
            }
        };

        let mut pending = false;
        let mut truncated = false;

        'stages: for stage in &schedule {
            if truncated {
                break 'stages;
            }
            for svc_name in stage {
                match ctx.store.finished(&sid, &sha, svc_name).await? {
                    None => pending = true,
                    Some(record) if record.is_error() => {
                        // Counted toward error_count at finalization via
                        // the all_results() snapshot; excluded here.
                    }
                    Some(record) => {
                        if record.drop && !submission.params.ignore_filtering {
                            truncated = true;
                        }
                        for child in &record.extracted {
                            walk.parents_of.entry(child.clone()).or_default().push(sha.clone());
                            if encountered.insert(child.clone()) {
                                match ctx.datastore.file_info(child).await? {
                                    Some(info) => stack.push_back(info),
                                    None => warn!(sid = %sid, sha = %child, "no file info for extracted child, skipping"),
                                }
                            }
                        }
                        walk.max_score = walk.max_score.max(record.score);
                        walk.classifications.push(record.classification.clone());
                    }
                }
            }
        }

        if pending {
            walk.pending.insert(sha.clone());
            walk.pending_info.insert(sha, file_info);
        }
    }

    // Depth recomputation (spec.md §4.3 step 7 / §9): fixed-point BFS from
    // roots at depth 0, bounded by max_extraction_depth iterations so a
    // (logically impossible) cycle in parents_of cannot loop forever.
    let depths = recompute_depths(&walk.roots, &walk.parents_of, ctx.config.max_extraction_depth);

    let mut admitted: Vec<Sha256> = Vec::new();
    for sha in walk.pending.iter() {
        let depth = *depths.get(sha).unwrap_or(&u32::MAX);
        if depth >= ctx.config.max_extraction_depth {
            continue;
        }
        if ctx.store.add_file(&sid, sha, max_files).await? {
            admitted.push(sha.clone());
        }
    }

    if admitted.is_empty() {
        finalizer::finalize(ctx, &task, walk.classifications, walk.max_score).await?;
        return Ok(SubmissionOutcome::Finalized);
    }

    for sha in &admitted {
        let depth = *depths.get(sha).unwrap_or(&0);
        let info = walk.pending_info.get(sha).expect("admitted file was walked").clone();
        let file_task = FileTask {
            sid: sid.clone(),
            parent_hash: None,
            file_info: info,
            depth,
            max_files,
        };
        ctx.queue.push("dispatch-file", serde_json::to_value(&file_task)?).await?;
    }

    info!(sid = %sid, count = admitted.len(), "dispatched pending files");
    Ok(SubmissionOutcome::Dispatched(admitted))
}

fn recompute_depths(
    roots: &HashSet<Sha256>,
    parents_of: &HashMap<Sha256, Vec<Sha256>>,
    max_depth: u32,
) -> HashMap<Sha256, u32> {
    let mut depths: HashMap<Sha256, u32> = roots.iter().map(|r| (r.clone(), 0)).collect();

    for _ in 0..=max_depth {
        let mut changed = false;
        for (child, parents) in parents_of {
            let Some(min_parent_depth) = parents.iter().filter_map(|p| depths.get(p)).min().copied() else {
                continue;
            };
            let candidate = min_parent_depth + 1;
            let entry = depths.entry(child.clone()).or_insert(u32::MAX);
            if candidate < *entry {
                *entry = candidate;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    depths
}
