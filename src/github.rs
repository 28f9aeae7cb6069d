use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock;
use crate::error::{ProviderError, SyncError};
use crate::token::AccessCredential;

/// Event type of a push notification in the activity feed
pub const PUSH_EVENT: &str = "PushEvent";

/// `owner/name` pair identifying a repository
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parse a `owner/name` full name.
    pub fn parse(full_name: &str) -> Option<Self> {
        let (owner, name) = full_name.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// =============================================================================
// Provider payloads
// =============================================================================

/// One entry of the authenticated user's activity feed
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActivityEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub repo: EventRepo,
    #[serde(default)]
    pub public: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventRepo {
    pub name: String,
}

/// Push payload fields the resolver cares about. Organization-owned
/// repositories often omit `commits`, leaving only `head`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PushPayload {
    #[serde(default)]
    pub commits: Option<Vec<PushCommit>>,
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub head: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PushCommit {
    pub sha: String,
}

/// A push event that qualified for today's run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    pub repo: RepoRef,
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
    pub payload: PushPayload,
}

/// `GET /repos/{owner}/{repo}/commits/{sha}`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommitDetail {
    pub sha: String,
    #[serde(default)]
    pub html_url: Option<String>,
    pub commit: CommitMeta,
    #[serde(default)]
    pub stats: Option<CommitStats>,
    #[serde(default)]
    pub files: Option<Vec<CommitFile>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommitMeta {
    #[serde(default)]
    pub author: Option<GitActor>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitActor {
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct CommitStats {
    #[serde(default)]
    pub additions: i64,
    #[serde(default)]
    pub deletions: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommitFile {
    pub filename: String,
}

impl CommitDetail {
    pub fn author_date(&self) -> Option<DateTime<Utc>> {
        self.commit.author.as_ref().and_then(|a| a.date)
    }

    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.files.iter().flatten().map(|f| f.filename.as_str())
    }

    pub fn stats(&self) -> CommitStats {
        self.stats.unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    #[serde(default)]
    commits: Vec<PushCommit>,
}

#[derive(Serialize)]
struct PageParams {
    per_page: u8,
}

// =============================================================================
// Provider seam
// =============================================================================

/// The source-control provider calls a sync run depends on
#[async_trait]
pub trait Provider: Send + Sync {
    /// Most recent activity (public and private) of `login`, one page.
    async fn recent_events(
        &self,
        login: &str,
        per_page: u8,
    ) -> Result<Vec<ActivityEvent>, ProviderError>;

    /// Stats and changed files of one commit.
    async fn commit(&self, repo: &RepoRef, sha: &str) -> Result<CommitDetail, ProviderError>;

    /// Ordered shas in `base...head`.
    async fn compare(
        &self,
        repo: &RepoRef,
        base: &str,
        head: &str,
    ) -> Result<Vec<String>, ProviderError>;
}

/// Builds a provider authenticated with a run's credential
pub trait Connector: Send + Sync {
    fn connect(&self, credential: &AccessCredential) -> Result<Arc<dyn Provider>, SyncError>;
}

/// GitHub REST API client wrapper
pub struct GitHubProvider {
    client: Octocrab,
}

impl GitHubProvider {
    /// Create a client for `api_base` authenticated with the given token
    pub fn new(api_base: &str, credential: &AccessCredential) -> Result<Self, ProviderError> {
        let client = Octocrab::builder()
            .base_uri(api_base)?
            .personal_token(credential.access_token.clone())
            .build()?;

        Ok(Self { client })
    }
}

fn not_found_or(err: octocrab::Error, what: String) -> ProviderError {
    match err {
        octocrab::Error::GitHub { source, .. } if source.status_code.as_u16() == 404 => {
            ProviderError::NotFound(what)
        }
        other => ProviderError::Api(other),
    }
}

#[async_trait]
impl Provider for GitHubProvider {
    async fn recent_events(
        &self,
        login: &str,
        per_page: u8,
    ) -> Result<Vec<ActivityEvent>, ProviderError> {
        debug!("Fetching activity for: {}", login);

        let events: Vec<ActivityEvent> = self
            .client
            .get(
                format!("/users/{}/events", login),
                Some(&PageParams { per_page }),
            )
            .await
            .map_err(|e| not_found_or(e, format!("user {}", login)))?;

        debug!("Fetched {} activity events for {}", events.len(), login);
        Ok(events)
    }

    async fn commit(&self, repo: &RepoRef, sha: &str) -> Result<CommitDetail, ProviderError> {
        self.client
            .get(
                format!("/repos/{}/{}/commits/{}", repo.owner, repo.name, sha),
                None::<&()>,
            )
            .await
            .map_err(|e| not_found_or(e, format!("commit {}@{}", repo, sha)))
    }

    async fn compare(
        &self,
        repo: &RepoRef,
        base: &str,
        head: &str,
    ) -> Result<Vec<String>, ProviderError> {
        let response: CompareResponse = self
            .client
            .get(
                format!(
                    "/repos/{}/{}/compare/{}...{}",
                    repo.owner, repo.name, base, head
                ),
                None::<&()>,
            )
            .await
            .map_err(|e| not_found_or(e, format!("range {}...{} in {}", base, head, repo)))?;

        Ok(response.commits.into_iter().map(|c| c.sha).collect())
    }
}

/// Connects [`GitHubProvider`]s against one API base URL
#[derive(Debug, Clone)]
pub struct GitHubConnector {
    api_base: String,
}

impl GitHubConnector {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
        }
    }
}

impl Connector for GitHubConnector {
    fn connect(&self, credential: &AccessCredential) -> Result<Arc<dyn Provider>, SyncError> {
        let provider = GitHubProvider::new(&self.api_base, credential)
            .map_err(|e| SyncError::Config(format!("Failed to create GitHub client: {}", e)))?;
        Ok(Arc::new(provider))
    }
}

// =============================================================================
// Activity fetch
// =============================================================================

/// Today's push events from the activity feed.
///
/// Failure to list activity is fatal for the run: without it there is nothing
/// to process.
pub async fn recent_push_events(
    provider: &dyn Provider,
    login: &str,
    per_page: u8,
    today: NaiveDate,
) -> Result<Vec<PushEvent>, SyncError> {
    let events = provider
        .recent_events(login, per_page)
        .await
        .map_err(|e| SyncError::UpstreamUnavailable(e.to_string()))?;

    let total = events.len();
    let pushes = filter_push_events(events, today);

    info!(
        "{} of {} activity events are pushes on {}",
        pushes.len(),
        total,
        today
    );
    Ok(pushes)
}

/// Keep push events whose creation instant falls on `today`.
pub fn filter_push_events(events: Vec<ActivityEvent>, today: NaiveDate) -> Vec<PushEvent> {
    events
        .into_iter()
        .filter(|event| event.kind == PUSH_EVENT && clock::logical_day(event.created_at) == today)
        .filter_map(|event| {
            let Some(repo) = RepoRef::parse(&event.repo.name) else {
                warn!("Skipping push event with malformed repo name: {}", event.repo.name);
                return None;
            };
            let payload = match serde_json::from_value::<PushPayload>(event.payload) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Skipping push event in {} with unreadable payload: {}", repo, e);
                    return None;
                }
            };
            Some(PushEvent {
                repo,
                is_private: !event.public,
                created_at: event.created_at,
                payload,
            })
        })
        .collect()
}
