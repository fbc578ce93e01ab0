//! Interactive session
//!
//! Plain lines become background workflows; slash commands query and
//! control them. Progress events are interleaved with replies so the prompt
//! never blocks on a running workflow.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use coordination::WorkflowId;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::app::{Runtime, Submission};
use crate::render;
use crate::sentinel::Verdict;

pub const HELP: &str = "\
Type a task to start it in the background.
  /list                 all workflows
  /status <id>          one workflow with attempt history
  /cancel <id>          request cancellation
  /wait <id> [secs]     block until the workflow finishes
  /help                 this text
  /quit                 leave (in-flight workflows are cancelled)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Submit(String),
    List,
    Status(WorkflowId),
    Cancel(WorkflowId),
    Wait(WorkflowId, Option<u64>),
    Help,
    Quit,
    Empty,
    Invalid(String),
}

pub fn parse_line(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Submit(line.to_string());
    };

    let mut parts = rest.split_whitespace();
    let verb = parts.next().unwrap_or_default();
    let id = parts.next().map(WorkflowId::from);
    let extra = parts.next();

    match (verb, id, extra) {
        ("list" | "ls", None, None) => Command::List,
        ("help" | "?", _, _) => Command::Help,
        ("quit" | "exit" | "q", None, None) => Command::Quit,
        ("status", Some(id), None) => Command::Status(id),
        ("cancel", Some(id), None) => Command::Cancel(id),
        ("wait", Some(id), None) => Command::Wait(id, None),
        ("wait", Some(id), Some(secs)) => match secs.parse() {
            Ok(secs) => Command::Wait(id, Some(secs)),
            Err(_) => Command::Invalid(format!("not a number of seconds: {secs}")),
        },
        ("status" | "cancel" | "wait", None, _) => {
            Command::Invalid(format!("/{verb} needs a workflow id"))
        }
        _ => Command::Invalid(format!("unknown command: /{rest}")),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Quit,
}

/// Per-session defaults applied to every submission.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub purpose: Option<String>,
    pub max_levels: Option<u32>,
    pub default_wait: Duration,
}

pub struct Session {
    runtime: Arc<Runtime>,
    options: SessionOptions,
}

impl Session {
    pub fn new(runtime: Arc<Runtime>, options: SessionOptions) -> Self {
        Self { runtime, options }
    }

    pub async fn handle(&self, command: Command) -> Reply {
        let scheduler = &self.runtime.scheduler;
        let text = match command {
            Command::Empty => String::new(),
            Command::Help => HELP.to_string(),
            Command::Quit => return Reply::Quit,
            Command::Invalid(msg) => format!("error: {msg} (try /help)"),
            Command::Submit(text) => {
                match self.runtime.submit(
                    &text,
                    self.options.purpose.as_deref(),
                    self.options.max_levels,
                ) {
                    Ok(Submission::Accepted { id, verdict }) if verdict == Verdict::Vague => {
                        format!("started {id} (warning: {})", verdict.hint())
                    }
                    Ok(Submission::Accepted { id, .. }) => format!("started {id}"),
                    Ok(Submission::Refused { verdict }) => {
                        format!("refused: {}", verdict.hint())
                    }
                    Err(e) => format!("error: {e}"),
                }
            }
            Command::List => match scheduler.list() {
                Ok(workflows) if workflows.is_empty() => "no workflows yet".to_string(),
                Ok(workflows) => render::summary_table(&workflows),
                Err(e) => format!("error: {e}"),
            },
            Command::Status(id) => match scheduler.get(&id) {
                Ok(workflow) => render::workflow_detail(&workflow),
                Err(e) => format!("error: [{}] {e}", e.code()),
            },
            Command::Cancel(id) => {
                if scheduler.cancel(&id) {
                    format!("cancelling {id}")
                } else {
                    format!("{id} is unknown or already finished")
                }
            }
            Command::Wait(id, secs) => {
                let timeout = secs
                    .map(Duration::from_secs)
                    .unwrap_or(self.options.default_wait);
                match scheduler.await_completion(&id, timeout).await {
                    Ok(workflow) => render::workflow_detail(&workflow),
                    Err(e) => format!("error: [{}] {e}", e.code()),
                }
            }
        };
        Reply::Text(text)
    }
}

/// Drive a session over any line-oriented reader and writer.
///
/// Ends on `/quit` or end of input. Progress events for all workflows are
/// written as they arrive.
pub async fn run<R, W>(session: &Session, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut progress = session.runtime.scheduler.subscribe();
    writer.write_all(b"tierforge session, /help for commands\n").await?;
    writer.flush().await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("Session input closed");
                    break;
                };
                match session.handle(parse_line(&line)).await {
                    Reply::Quit => break,
                    Reply::Text(text) if text.is_empty() => {}
                    Reply::Text(text) => {
                        writer.write_all(text.trim_end().as_bytes()).await?;
                        writer.write_all(b"\n").await?;
                    }
                }
            }
            event = progress.recv() => {
                let line = render::progress_line(&event);
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
            }
        }
        writer.flush().await?;
    }
    writer.flush().await?;
    Ok(())
}
