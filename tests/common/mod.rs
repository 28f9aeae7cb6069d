//! Common test utilities and helpers for GitPoor tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use gitpoor::clock;
use gitpoor::config::Config;
use gitpoor::github::{ActivityEvent, CommitDetail, RepoRef};
use gitpoor::token::DisabledTokenEndpoint;
use gitpoor::{
    AccessCredential, Connector, Provider, ProviderError, Store, SyncEngine, SyncError,
    TokenSupplier,
};

pub const USER: &str = "user-1";
pub const LOGIN: &str = "octocat";

/// The logical day most tests run on
pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, 10).expect("valid date")
}

/// An instant `hours` into the logical day `day`
pub fn at(day: NaiveDate, hours: i64) -> DateTime<Utc> {
    clock::day_start(day) + Duration::hours(hours)
}

/// Mid-morning of `today()`
pub fn now() -> DateTime<Utc> {
    at(today(), 6)
}

/// Scripted in-memory GitHub
#[derive(Default)]
pub struct FakeProvider {
    events: Mutex<Vec<ActivityEvent>>,
    events_fail: Mutex<bool>,
    commits: Mutex<HashMap<String, CommitDetail>>,
    failing_commits: Mutex<HashSet<String>>,
    ranges: Mutex<HashMap<(String, String), Vec<String>>>,
    commit_calls: Mutex<HashMap<String, usize>>,
    compare_calls: Mutex<usize>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_event(&self, repo: &str, created_at: DateTime<Utc>, payload: serde_json::Value) {
        self.events.lock().unwrap().push(
            serde_json::from_value(json!({
                "id": "1",
                "type": "PushEvent",
                "repo": {"name": repo},
                "public": true,
                "created_at": created_at.to_rfc3339(),
                "payload": payload,
            }))
            .expect("valid event"),
        );
    }

    pub fn other_event(&self, kind: &str, repo: &str, created_at: DateTime<Utc>) {
        self.events.lock().unwrap().push(
            serde_json::from_value(json!({
                "type": kind,
                "repo": {"name": repo},
                "public": true,
                "created_at": created_at.to_rfc3339(),
                "payload": {},
            }))
            .expect("valid event"),
        );
    }

    pub fn fail_events(&self) {
        *self.events_fail.lock().unwrap() = true;
    }

    /// Register a commit with its authoring instant, line stats and changed files
    pub fn add_commit(
        &self,
        sha: &str,
        authored: DateTime<Utc>,
        additions: i64,
        deletions: i64,
        files: &[&str],
    ) {
        let files: Vec<_> = files.iter().map(|f| json!({"filename": f})).collect();
        let detail: CommitDetail = serde_json::from_value(json!({
            "sha": sha,
            "html_url": format!("https://github.com/o/r/commit/{}", sha),
            "commit": {"author": {"date": authored.to_rfc3339()}},
            "stats": {"additions": additions, "deletions": deletions},
            "files": files,
        }))
        .expect("valid commit");
        self.commits.lock().unwrap().insert(sha.to_string(), detail);
    }

    pub fn fail_commit(&self, sha: &str) {
        self.failing_commits.lock().unwrap().insert(sha.to_string());
    }

    pub fn add_range(&self, base: &str, head: &str, shas: &[&str]) {
        self.ranges.lock().unwrap().insert(
            (base.to_string(), head.to_string()),
            shas.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn commit_calls(&self, sha: &str) -> usize {
        self.commit_calls
            .lock()
            .unwrap()
            .get(sha)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_commit_calls(&self) -> usize {
        self.commit_calls.lock().unwrap().values().sum()
    }

    pub fn compare_calls(&self) -> usize {
        *self.compare_calls.lock().unwrap()
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn recent_events(
        &self,
        _login: &str,
        _per_page: u8,
    ) -> Result<Vec<ActivityEvent>, ProviderError> {
        if *self.events_fail.lock().unwrap() {
            return Err(ProviderError::Malformed("events unavailable".to_string()));
        }
        Ok(self.events.lock().unwrap().clone())
    }

    async fn commit(&self, _repo: &RepoRef, sha: &str) -> Result<CommitDetail, ProviderError> {
        *self
            .commit_calls
            .lock()
            .unwrap()
            .entry(sha.to_string())
            .or_insert(0) += 1;

        // let concurrent fetches interleave
        tokio::task::yield_now().await;

        if self.failing_commits.lock().unwrap().contains(sha) {
            return Err(ProviderError::Malformed(format!("boom for {}", sha)));
        }
        self.commits
            .lock()
            .unwrap()
            .get(sha)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(sha.to_string()))
    }

    async fn compare(
        &self,
        _repo: &RepoRef,
        base: &str,
        head: &str,
    ) -> Result<Vec<String>, ProviderError> {
        *self.compare_calls.lock().unwrap() += 1;
        self.ranges
            .lock()
            .unwrap()
            .get(&(base.to_string(), head.to_string()))
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("{}...{}", base, head)))
    }
}

pub struct FakeConnector(pub Arc<FakeProvider>);

impl Connector for FakeConnector {
    fn connect(&self, _credential: &AccessCredential) -> Result<Arc<dyn Provider>, SyncError> {
        Ok(self.0.clone())
    }
}

/// Engine over an in-memory store and a scripted provider
pub struct TestHarness {
    pub store: Arc<Store>,
    pub provider: Arc<FakeProvider>,
    pub engine: SyncEngine,
}

impl TestHarness {
    pub fn new() -> Self {
        let store = Arc::new(Store::open_in_memory().expect("in-memory store"));
        let provider = FakeProvider::new();
        let config = Config::default();
        let tokens = TokenSupplier::new(
            store.clone(),
            Arc::new(DisabledTokenEndpoint),
            config.refresh_window(),
        );
        let engine = SyncEngine::new(
            Arc::new(config),
            store.clone(),
            tokens,
            Arc::new(FakeConnector(provider.clone())),
        );

        Self {
            store,
            provider,
            engine,
        }
    }

    /// Harness with `USER` linked to `LOGIN`
    pub fn linked() -> Self {
        let harness = Self::new();
        harness
            .store
            .link_account(
                USER,
                LOGIN,
                &AccessCredential {
                    access_token: "gho_stored".to_string(),
                    refresh_token: None,
                    expires_at: None,
                },
            )
            .expect("link account");
        harness
    }
}
