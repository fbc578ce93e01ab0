use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use coordination::{SchedulerError, Workflow, WorkflowId, WorkflowStatus};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::app::{Runtime, Submission};
use crate::cli::{RunArgs, SubmitArgs};
use crate::render;
use crate::session::{self, Session, SessionOptions};

/// What a batch run produced.
#[derive(Debug)]
pub struct BatchReport {
    pub workflows: Vec<Workflow>,
    /// Inputs the sentinel refused
    pub refused: usize,
    /// Workflows still running when the wait ran out
    pub unfinished: usize,
}

impl BatchReport {
    pub fn all_completed(&self) -> bool {
        self.unfinished == 0
            && self
                .workflows
                .iter()
                .all(|w| w.status == WorkflowStatus::Completed)
    }
}

fn submit_one(runtime: &Runtime, text: &str, args: &SubmitArgs) -> Result<Option<WorkflowId>> {
    match runtime.submit(text, args.purpose.as_deref(), args.max_levels)? {
        Submission::Accepted { id, .. } => Ok(Some(id)),
        Submission::Refused { verdict } => {
            eprintln!("refused {text:?}: {}", verdict.hint());
            Ok(None)
        }
    }
}

/// Submit `descriptions`, then every line of `feed`, and wait for all of
/// them.
///
/// Lines from `feed` are submitted as they arrive; a bad line is reported
/// and skipped.
pub async fn run_batch<R>(
    runtime: &Runtime,
    descriptions: &[String],
    feed: Option<R>,
    args: &SubmitArgs,
) -> Result<BatchReport>
where
    R: AsyncBufRead + Unpin,
{
    let mut ids = Vec::new();
    let mut refused = 0;

    for text in descriptions {
        match submit_one(runtime, text, args)? {
            Some(id) => ids.push(id),
            None => refused += 1,
        }
    }

    if let Some(feed) = feed {
        let mut lines = feed.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match submit_one(runtime, &line, args) {
                Ok(Some(id)) => ids.push(id),
                Ok(None) => refused += 1,
                Err(e) => {
                    warn!(error = %e, "Skipping input line");
                    eprintln!("error: {e}");
                }
            }
        }
    }

    info!(count = ids.len(), "Waiting for workflows");
    let deadline = Instant::now() + Duration::from_secs(args.wait_secs);
    let mut workflows = Vec::with_capacity(ids.len());
    let mut unfinished = 0;
    for id in &ids {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match runtime.scheduler.await_completion(id, remaining).await {
            Ok(workflow) => workflows.push(workflow),
            Err(SchedulerError::AwaitTimeout { .. }) => {
                warn!(workflow_id = %id, "Gave up waiting");
                runtime.scheduler.cancel(id);
                unfinished += 1;
                workflows.push(runtime.scheduler.get(id)?);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(BatchReport {
        workflows,
        refused,
        unfinished,
    })
}

/// `tierforge run`. Returns whether every workflow completed.
pub async fn run(runtime: Arc<Runtime>, args: RunArgs) -> Result<bool> {
    let mut progress = runtime.scheduler.subscribe();
    let to_stderr = args.json;
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

    let printer = tokio::spawn(async move {
        let emit = |line: String| {
            if to_stderr {
                eprintln!("{line}");
            } else {
                println!("{line}");
            }
        };
        loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => {
                    while let Some(event) = progress.try_recv() {
                        emit(render::progress_line(&event));
                    }
                    break;
                }
                event = progress.recv() => emit(render::progress_line(&event)),
            }
        }
    });

    let feed = args.stdin.then(|| BufReader::new(tokio::io::stdin()));
    let report = run_batch(&runtime, &args.descriptions, feed, &args.submit).await;

    runtime.scheduler.reporter().flush().await;
    let _ = stop_tx.send(());
    let _ = printer.await;
    let report = report?;

    if args.json {
        println!("{}", render::to_json(&report.workflows)?);
    } else {
        println!();
        print!("{}", render::summary_table(&report.workflows));
        if report.refused > 0 {
            println!("{} input(s) refused", report.refused);
        }
        if report.unfinished > 0 {
            println!("{} workflow(s) did not finish in time", report.unfinished);
        }
    }
    Ok(report.all_completed())
}

/// `tierforge session` on stdin/stdout.
pub async fn session(runtime: Arc<Runtime>, args: SubmitArgs) -> Result<()> {
    let session = Session::new(
        runtime,
        SessionOptions {
            purpose: args.purpose,
            max_levels: args.max_levels,
            default_wait: Duration::from_secs(args.wait_secs),
        },
    );
    session::run(
        &session,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
}

pub fn tiers(runtime: &Runtime) {
    print!("{}", render::tiers_table(&runtime.catalog));
}
