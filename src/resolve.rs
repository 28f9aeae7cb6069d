//! Commit range resolution
//!
//! Each push event is classified once into a [`FetchStrategy`] by looking at
//! which payload fields are populated, then resolved into candidate shas.
//! Only the compare call touches the network, and its failure falls back to
//! the candidates the payload already named.

use futures::future::join_all;
use tracing::{debug, warn};

use crate::github::{Provider, PushEvent, PushPayload, RepoRef};

/// `before` value of a push that created its branch
pub const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

/// How the commits of one push event are determined
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStrategy {
    /// The payload lists the pushed commits
    Explicit(Vec<String>),
    /// Commit list redacted; only the head is known
    HeadOnly(String),
    /// Ask the provider for `base...head`, keep `fallback` if that fails
    CompareRange {
        base: String,
        head: String,
        fallback: Vec<String>,
    },
    /// Nothing to resolve
    Empty,
}

fn usable(sha: &Option<String>) -> Option<&str> {
    sha.as_deref().filter(|s| !s.is_empty())
}

/// Pick the strategy for a push payload.
pub fn classify(payload: &PushPayload) -> FetchStrategy {
    let listed: Vec<String> = payload
        .commits
        .iter()
        .flatten()
        .map(|c| c.sha.clone())
        .filter(|sha| !sha.is_empty())
        .collect();

    let head = usable(&payload.head);
    let provisional = if !listed.is_empty() {
        FetchStrategy::Explicit(listed)
    } else if let Some(head) = head {
        FetchStrategy::HeadOnly(head.to_string())
    } else {
        FetchStrategy::Empty
    };

    match (usable(&payload.before), head) {
        (Some(base), Some(head)) if base != ZERO_SHA => FetchStrategy::CompareRange {
            base: base.to_string(),
            head: head.to_string(),
            fallback: match provisional {
                FetchStrategy::Explicit(shas) => shas,
                _ => vec![head.to_string()],
            },
        },
        _ => provisional,
    }
}

/// Candidate shas of one push event, in the order the provider reported them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEvent {
    pub repo: RepoRef,
    pub is_private: bool,
    pub shas: Vec<String>,
}

/// Resolve one event. Never fails: a compare error degrades to the fallback.
pub async fn resolve_event(provider: &dyn Provider, event: &PushEvent) -> ResolvedEvent {
    let shas = match classify(&event.payload) {
        FetchStrategy::Explicit(shas) => shas,
        FetchStrategy::HeadOnly(head) => vec![head],
        FetchStrategy::Empty => Vec::new(),
        FetchStrategy::CompareRange {
            base,
            head,
            fallback,
        } => match provider.compare(&event.repo, &base, &head).await {
            Ok(range) if !range.is_empty() => {
                debug!(
                    "Compare {}...{} in {} yielded {} commits",
                    short(&base),
                    short(&head),
                    event.repo,
                    range.len()
                );
                range
            }
            Ok(_) => fallback,
            Err(e) => {
                warn!(
                    "Compare {}...{} in {} failed, keeping {} listed commits: {}",
                    short(&base),
                    short(&head),
                    event.repo,
                    fallback.len(),
                    e
                );
                fallback
            }
        },
    };

    ResolvedEvent {
        repo: event.repo.clone(),
        is_private: event.is_private,
        shas,
    }
}

/// Resolve every event concurrently.
pub async fn resolve_all(provider: &dyn Provider, events: &[PushEvent]) -> Vec<ResolvedEvent> {
    join_all(events.iter().map(|event| resolve_event(provider, event))).await
}

/// First seven characters of a sha, for logs
pub fn short(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}
