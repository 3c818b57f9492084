//! Dispatch daemon entry point: runs the submission and file dispatch loops
//! as long-lived tokio tasks, in the spirit of `sd-core-new`'s thin
//! `src/bin/cli.rs` delegating straight into a library module.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dispatch_core::classification::RankedLattice;
use dispatch_core::clock::SystemClock;
use dispatch_core::config::DispatcherConfig;
use dispatch_core::context::DispatchContext;
use dispatch_core::datastore::Datastore;
use dispatch_core::error::DispatchResult;
use dispatch_core::file_dispatcher::dispatch_file;
use dispatch_core::submission_dispatcher::{dispatch_submission, SubmissionDispatchInput};
use dispatch_core::types::{FileTask, SubmissionRef, SubmissionTask};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dispatchd", about = "Runs the file-analysis dispatch loops")]
struct Args {
    /// Path to the dispatcher TOML config file.
    #[arg(long, default_value = "dispatch.toml")]
    config: PathBuf,

    /// How long to sleep between empty-queue poll attempts, in milliseconds.
    #[arg(long, default_value_t = 250)]
    poll_interval_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = DispatcherConfig::load_from(&args.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .init();

    info!(store_url = %config.store_url, "starting dispatch daemon");

    let store = Arc::new(dispatch_core::store::redis::RedisBackend::connect(&config.store_url).await?);
    let datastore: Arc<dyn Datastore> = Arc::new(NotConfiguredDatastore);
    let ctx = DispatchContext {
        store: store.clone(),
        queue: store.clone(),
        watcher: store,
        datastore,
        lattice: Arc::new(RankedLattice::new(vec![
            "UNCLASSIFIED".into(),
            "RESTRICTED".into(),
            "SECRET".into(),
        ])),
        clock: Arc::new(SystemClock::default()),
        config: Arc::new(config),
    };

    let poll_interval = Duration::from_millis(args.poll_interval_ms);

    let submission_ctx = ctx.clone();
    let submission_loop = tokio::spawn(async move {
        run_submission_loop(submission_ctx, poll_interval).await;
    });

    let file_loop = tokio::spawn(async move {
        run_file_loop(ctx, poll_interval).await;
    });

    tokio::select! {
        res = submission_loop => res?,
        res = file_loop => res?,
    }

    Ok(())
}

async fn run_submission_loop(ctx: DispatchContext, poll_interval: Duration) {
    loop {
        match ctx.queue.pop("dispatch-submission").await {
            Ok(Some(payload)) => {
                if let Err(e) = handle_submission_message(&ctx, payload).await {
                    error!(error = %e, "submission dispatch failed");
                }
            }
            Ok(None) => tokio::time::sleep(poll_interval).await,
            Err(e) => {
                error!(error = %e, "submission queue pop failed");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

async fn handle_submission_message(ctx: &DispatchContext, payload: serde_json::Value) -> DispatchResult<()> {
    let input = if payload.get("submission").is_some() {
        SubmissionDispatchInput::Full(serde_json::from_value::<SubmissionTask>(payload)?)
    } else {
        SubmissionDispatchInput::Ref(serde_json::from_value::<SubmissionRef>(payload)?)
    };
    dispatch_submission(ctx, input).await?;
    Ok(())
}

async fn run_file_loop(ctx: DispatchContext, poll_interval: Duration) {
    loop {
        match ctx.queue.pop("dispatch-file").await {
            Ok(Some(payload)) => match serde_json::from_value::<FileTask>(payload) {
                Ok(task) => {
                    if let Err(e) = dispatch_file(&ctx, task).await {
                        error!(error = %e, "file dispatch failed");
                    }
                }
                Err(e) => warn!(error = %e, "malformed file task, dropping"),
            },
            Ok(None) => tokio::time::sleep(poll_interval).await,
            Err(e) => {
                error!(error = %e, "file queue pop failed");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

/// Placeholder until a real metadata datastore is wired in; every lookup
/// logs and returns nothing rather than panicking, matching the "missing
/// reference" non-error posture of spec.md §7.
struct NotConfiguredDatastore;

#[async_trait::async_trait]
impl Datastore for NotConfiguredDatastore {
    async fn file_info(&self, sha256: &str) -> DispatchResult<Option<dispatch_core::types::FileInfo>> {
        warn!(sha256, "no metadata datastore backend configured");
        Ok(None)
    }

    async fn service_catalog(&self) -> DispatchResult<dispatch_core::types::ServiceCatalog> {
        warn!("no service catalog backend configured");
        Ok(dispatch_core::types::ServiceCatalog::default())
    }
}
