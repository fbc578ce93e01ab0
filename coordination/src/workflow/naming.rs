//! Workflow naming: the namer collaborator and the deterministic fallback.

use async_trait::async_trait;
use thiserror::Error;

/// Longest slug we accept, from a namer or the fallback.
pub const MAX_SLUG_LEN: usize = 40;

/// Number of description words used by the fallback slug.
const FALLBACK_WORDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamingError {
    #[error("Naming failed: {0}")]
    Failed(String),

    #[error("Naming timed out after {0:?}")]
    TimedOut(std::time::Duration),

    #[error("Namer returned an unusable name: {0:?}")]
    Empty(String),
}

/// Produces a short slug for a workflow description.
///
/// Called at most once per workflow, bounded by the scheduler's naming
/// timeout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkflowNamer: Send + Sync {
    async fn name(&self, description: &str) -> Result<String, NamingError>;
}

/// Normalize a raw name to `[a-z0-9-]`, at most [`MAX_SLUG_LEN`] chars.
///
/// Returns `None` when nothing usable survives.
pub fn sanitize_slug(raw: &str) -> Option<String> {
    let mut slug = String::with_capacity(raw.len().min(MAX_SLUG_LEN));
    let mut pending_dash = false;
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    let slug = truncate_slug(&slug);
    (!slug.is_empty()).then_some(slug)
}

/// Name derived from the description alone; never fails.
pub fn fallback_slug(description: &str, seq: u64) -> String {
    let words: Vec<String> = description
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(char::is_ascii_alphanumeric)
                .map(|c| c.to_ascii_lowercase())
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .take(FALLBACK_WORDS)
        .collect();

    let slug = truncate_slug(&words.join("-"));
    if slug.is_empty() {
        format!("workflow-{}", seq)
    } else {
        slug
    }
}

fn truncate_slug(slug: &str) -> String {
    // Slugs are pure ASCII here, so byte slicing is safe.
    let cut = &slug[..slug.len().min(MAX_SLUG_LEN)];
    cut.trim_end_matches('-').to_string()
}
