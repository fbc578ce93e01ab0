//! Plain-text and JSON views of workflow records.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use coordination::{ProgressEvent, TierCatalog, Workflow, WorkflowStatus};

const DETAIL_WIDTH: usize = 60;

fn clip(text: &str, width: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= width {
        return line.to_string();
    }
    let mut out: String = line.chars().take(width.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

fn detail(workflow: &Workflow) -> String {
    match (&workflow.status, &workflow.error, &workflow.result) {
        (WorkflowStatus::Failed, Some(failure), _) => failure.to_string(),
        (WorkflowStatus::Completed, _, Some(result)) => result.clone(),
        _ => workflow.progress.clone().unwrap_or_default(),
    }
}

/// One row per workflow: `ID NAME STATUS TIER ATTEMPTS DETAIL`.
pub fn summary_table(workflows: &[Workflow]) -> String {
    let id_w = workflows
        .iter()
        .map(|w| w.id.as_str().len())
        .chain([2])
        .max()
        .unwrap_or(2);
    let name_w = workflows
        .iter()
        .map(|w| w.display_name().len())
        .chain([4])
        .max()
        .unwrap_or(4)
        .min(40);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<id_w$}  {:<name_w$}  {:<9}  {:<7}  {:>8}  DETAIL",
        "ID", "NAME", "STATUS", "TIER", "ATTEMPTS"
    );
    for w in workflows {
        let tier = w
            .current_tier()
            .map(|t| t.label())
            .unwrap_or_else(|| "-".into());
        let row = format!(
            "{:<id_w$}  {:<name_w$}  {:<9}  {:<7}  {:>8}  {}",
            w.id,
            clip(w.display_name(), name_w),
            w.status,
            tier,
            w.attempts.len(),
            clip(&detail(w), DETAIL_WIDTH),
        );
        let _ = writeln!(out, "{}", row.trim_end());
    }
    out
}

/// Full record with attempt history.
pub fn workflow_detail(w: &Workflow) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", w.id, w.display_name());
    let _ = writeln!(out, "  status:      {}", w.status);
    let _ = writeln!(out, "  purpose:     {}", w.purpose);
    let _ = writeln!(out, "  description: {}", w.description);
    if let Some(progress) = &w.progress {
        let _ = writeln!(out, "  progress:    {progress}");
    }
    let _ = writeln!(out, "  created:     {}", w.created_at.to_rfc3339());
    if let Some(started) = w.started_at {
        let _ = writeln!(out, "  started:     {}", started.to_rfc3339());
    }
    if let Some(ended) = w.ended_at {
        let _ = writeln!(out, "  ended:       {}", ended.to_rfc3339());
    }
    if let Some(elapsed) = w.elapsed() {
        let _ = writeln!(out, "  elapsed:     {}ms", elapsed.num_milliseconds());
    }
    if let Some(failure) = &w.error {
        let _ = writeln!(out, "  error:       {failure}");
        if let Some(tier) = &failure.final_tier {
            let _ = writeln!(out, "  final tier:  {tier}");
        }
    }

    if !w.attempts.is_empty() {
        let _ = writeln!(out, "  attempts:");
        for a in &w.attempts {
            let _ = write!(
                out,
                "    #{} {} {} {} {}ms",
                a.number,
                a.tier.label(),
                a.model_spec,
                a.outcome,
                a.duration_elapsed.as_millis()
            );
            if let Some(err) = &a.error_detail {
                let _ = write!(out, " ({})", clip(err, DETAIL_WIDTH));
            }
            out.push('\n');
        }
    }

    if let Some(result) = &w.result {
        let _ = writeln!(out, "  result:");
        for line in result.lines() {
            let _ = writeln!(out, "    {line}");
        }
    }
    out
}

pub fn progress_line(event: &ProgressEvent) -> String {
    event.to_string()
}

pub fn to_json(workflows: &[Workflow]) -> Result<String> {
    serde_json::to_string_pretty(workflows).context("Failed to serialize workflows")
}

/// The loaded catalog, one line per tier.
pub fn tiers_table(catalog: &TierCatalog) -> String {
    let mut out = String::new();
    for purpose in catalog.purposes() {
        let _ = writeln!(out, "{purpose}");
        let Ok(tiers) = catalog.tiers(purpose) else {
            continue;
        };
        for tier in tiers {
            let next = tier
                .escalates_to
                .map(|l| format!("-> tier_{l}"))
                .unwrap_or_else(|| "(top)".into());
            let _ = writeln!(
                out,
                "  {:<7} {:<40} budget={:<7} timeout={}s {}",
                tier.label(),
                tier.model_spec,
                tier.context_budget,
                tier.timeout.as_secs(),
                next
            );
        }
    }
    out
}
