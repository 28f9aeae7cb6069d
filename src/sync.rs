//! Sync Engine - Orchestrates one commit synchronization run
//!
//! A run resolves a credential, reads today's push events, resolves every
//! event into candidate shas, fetches commit details in parallel, persists the
//! accepted commits in one batch and finally credits the streak.
//!
//! Only credential resolution, the activity listing and persistence can fail
//! a run. Everything per event or per commit is logged and skipped.

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::clock;
use crate::commits::{fetch_candidate, group_candidates, CommitRecord, DedupSet, FetchScope};
use crate::config::Config;
use crate::error::{SkipReason, SyncError};
use crate::github::{self, Connector, GitHubConnector};
use crate::resolve;
use crate::state::{DailyStat, Store};
use crate::streak::{StreakEngine, StreakState};
use crate::token::{DisabledTokenEndpoint, GitHubTokenEndpoint, TokenEndpoint, TokenSupplier};

/// Request-scoped inputs of one run
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub user_id: String,
    /// Provider token of the caller's live session, if any
    pub session_token: Option<String>,
    pub now: DateTime<Utc>,
}

impl SyncContext {
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            session_token: None,
            now,
        }
    }

    pub fn with_session_token(mut self, token: Option<String>) -> Self {
        self.session_token = token;
        self
    }
}

/// Outcome of a run, also used for the today view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub date: NaiveDate,
    pub commit_count: usize,
    pub total_changes: i64,
    pub languages: Vec<String>,
    pub is_success: bool,
    pub streak: StreakState,
}

impl SyncSummary {
    /// Aggregate a set of records for `date`.
    pub fn from_records(date: NaiveDate, records: &[CommitRecord], streak: StreakState) -> Self {
        let languages: BTreeSet<&String> = records.iter().flat_map(|r| &r.languages).collect();

        Self {
            date,
            commit_count: records.len(),
            total_changes: records.iter().map(|r| r.total_changes).sum(),
            languages: languages.into_iter().cloned().collect(),
            is_success: !records.is_empty(),
            streak,
        }
    }
}

/// True when a user never synced or the last sync is at least
/// `threshold_minutes` old.
pub fn should_run_auto_sync(
    last_sync: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    threshold_minutes: i64,
) -> bool {
    match last_sync {
        None => true,
        Some(last) => (now - last).num_minutes() >= threshold_minutes,
    }
}

/// The sync orchestrator
#[derive(Clone)]
pub struct SyncEngine {
    config: Arc<Config>,
    store: Arc<Store>,
    tokens: TokenSupplier,
    connector: Arc<dyn Connector>,
    streaks: StreakEngine,
}

impl SyncEngine {
    pub fn new(
        config: Arc<Config>,
        store: Arc<Store>,
        tokens: TokenSupplier,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let streaks = StreakEngine::new(store.clone());
        Self {
            config,
            store,
            tokens,
            connector,
            streaks,
        }
    }

    /// Create an engine wired to GitHub and the configured database
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        use anyhow::Context;

        let store = Store::open(Path::new(&config.database_path))
            .with_context(|| format!("Failed to open database at {}", config.database_path))?;

        let endpoint: Arc<dyn TokenEndpoint> =
            match (&config.github.client_id, &config.github.client_secret) {
                (Some(id), Some(secret)) => Arc::new(GitHubTokenEndpoint::new(
                    config.github.token_url.clone(),
                    id.clone(),
                    secret.clone(),
                )),
                _ => {
                    warn!("GitHub OAuth client not configured, token refresh disabled");
                    Arc::new(DisabledTokenEndpoint)
                }
            };

        let store = Arc::new(store);
        let tokens = TokenSupplier::new(store.clone(), endpoint, config.refresh_window());
        let connector = Arc::new(GitHubConnector::new(config.github.api_base.clone()));

        Ok(Self::new(Arc::new(config), store, tokens, connector))
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Run a complete sync for the context's user
    pub async fn run(&self, ctx: &SyncContext) -> Result<SyncSummary, SyncError> {
        let today = clock::logical_day(ctx.now);
        info!("Starting commit sync for {} on {}", ctx.user_id, today);

        let credential = self
            .tokens
            .current_token(&ctx.user_id, ctx.session_token.as_deref(), ctx.now)
            .await?;
        let login = self
            .store
            .github_login(&ctx.user_id)?
            .ok_or(SyncError::Unauthenticated)?;
        debug!("Token resolved for {} ({})", ctx.user_id, login);

        let provider = self.connector.connect(&credential)?;

        let events = github::recent_push_events(
            provider.as_ref(),
            &login,
            self.config.github.events_per_page,
            today,
        )
        .await?;

        if events.is_empty() {
            info!("No push activity for {} on {}", ctx.user_id, today);
            let streak = self.streaks.current(&ctx.user_id)?;
            return Ok(SyncSummary::from_records(today, &[], streak));
        }

        let resolved = resolve::resolve_all(provider.as_ref(), &events).await;
        debug!(
            "Resolved {} events into {} candidate shas",
            resolved.len(),
            resolved.iter().map(|r| r.shas.len()).sum::<usize>()
        );

        let dedup = DedupSet::new();
        let scope = FetchScope {
            user_id: &ctx.user_id,
            today,
            now: ctx.now,
            dedup: &dedup,
        };
        let semaphore = Semaphore::new(self.config.sync.max_concurrent_fetches.max(1));

        let candidates = group_candidates(&resolved);
        let mut fetches = FuturesUnordered::new();
        for candidate in &candidates {
            let provider = provider.as_ref();
            let scope = &scope;
            let semaphore = &semaphore;
            fetches.push(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => return Err(SkipReason::Upstream(e.to_string())),
                };
                fetch_candidate(provider, scope, candidate).await
            });
        }

        let mut records = Vec::new();
        let mut skipped = 0usize;
        while let Some(result) = fetches.next().await {
            match result {
                Ok(record) => records.push(record),
                Err(SkipReason::AlreadyClaimed) => {}
                Err(reason) => {
                    debug!("Candidate skipped: {}", reason);
                    skipped += 1;
                }
            }
        }
        drop(fetches);

        if skipped > 0 {
            warn!(
                "{} candidate commits skipped for {} on {}",
                skipped, ctx.user_id, today
            );
        }

        let persisted = self.store.upsert_commits(&records).map_err(|e| {
            error!("Failed to persist commits for {}: {}", ctx.user_id, e);
            e
        })?;

        let streak = if persisted > 0 {
            self.streaks.advance(&ctx.user_id, ctx.now)?
        } else {
            self.streaks.current(&ctx.user_id)?
        };

        let summary = SyncSummary::from_records(today, &records, streak);
        info!(
            "Sync completed for {}: {} commits, {} changes, streak {}/{}",
            ctx.user_id,
            summary.commit_count,
            summary.total_changes,
            summary.streak.current_streak,
            summary.streak.longest_streak
        );

        Ok(summary)
    }

    /// Ledger view of `now`'s logical day, without touching the provider
    pub fn today_summary(&self, user_id: &str, now: DateTime<Utc>) -> Result<SyncSummary, SyncError> {
        let today = clock::logical_day(now);
        let records = self.store.commits_on(user_id, today)?;
        let streak = self.streaks.current(user_id)?;
        Ok(SyncSummary::from_records(today, &records, streak))
    }

    pub fn commits_on(&self, user_id: &str, day: NaiveDate) -> Result<Vec<CommitRecord>, SyncError> {
        self.store.commits_on(user_id, day)
    }

    /// Per-day totals keyed by `YYYY-MM-DD` for days in `[from, to]` with commits
    pub fn history(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BTreeMap<String, DailyStat>, SyncError> {
        if from > to {
            return Err(SyncError::Validation(format!(
                "from ({}) is after to ({})",
                clock::format_day(from),
                clock::format_day(to)
            )));
        }

        Ok(self
            .store
            .history(user_id, from, to)?
            .into_iter()
            .map(|(day, stat)| (clock::format_day(day), stat))
            .collect())
    }

    /// Whether an automatic sync is due for `user_id`.
    pub fn should_auto_sync(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        group_view: bool,
    ) -> Result<bool, SyncError> {
        let threshold = if group_view {
            self.config.sync.group_auto_sync_threshold_minutes
        } else {
            self.config.sync.auto_sync_threshold_minutes
        };
        let last_sync = self.store.last_sync_at(user_id)?;
        Ok(should_run_auto_sync(last_sync, now, threshold))
    }
}
