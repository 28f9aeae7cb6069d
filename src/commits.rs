//! Commit detail fetching and deduplication

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::clock;
use crate::error::SkipReason;
use crate::github::{CommitDetail, Provider, RepoRef};
use crate::language;
use crate::resolve::{short, ResolvedEvent};

/// One ledger row, keyed by (user_id, commit_sha)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub user_id: String,
    pub commit_sha: String,
    pub repo_name: String,
    pub committed_at: DateTime<Utc>,
    pub commit_date: NaiveDate,
    pub change_files: i64,
    pub additions: i64,
    pub deletions: i64,
    pub total_changes: i64,
    pub languages: BTreeSet<String>,
    pub file_extensions: BTreeSet<String>,
    pub is_private: bool,
    pub commit_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CommitRecord {
    /// Build a record from a fetched commit authored at `committed_at`.
    ///
    /// `commit_date` and `total_changes` are always derived here.
    pub fn from_detail(
        user_id: &str,
        repo: &RepoRef,
        is_private: bool,
        detail: &CommitDetail,
        committed_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let stats = detail.stats();
        let mut languages = BTreeSet::new();
        let mut file_extensions = BTreeSet::new();
        let mut change_files = 0;

        for filename in detail.filenames() {
            change_files += 1;
            let Some(ext) = language::extension_of(filename) else {
                continue;
            };
            if let Some(lang) = language::language_for(&ext) {
                languages.insert(lang.to_string());
            }
            file_extensions.insert(ext);
        }

        Self {
            user_id: user_id.to_string(),
            commit_sha: detail.sha.clone(),
            repo_name: repo.full_name(),
            committed_at,
            commit_date: clock::logical_day(committed_at),
            change_files,
            additions: stats.additions,
            deletions: stats.deletions,
            total_changes: stats.additions + stats.deletions,
            languages,
            file_extensions,
            is_private,
            commit_url: detail.html_url.clone(),
            created_at,
        }
    }
}

/// Shas already claimed by some branch of the current run
#[derive(Debug, Default)]
pub struct DedupSet {
    seen: Mutex<HashSet<String>>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `sha` as taken. Returns false if it was already taken.
    pub fn claim(&self, sha: &str) -> bool {
        match self.seen.lock() {
            Ok(mut seen) => seen.insert(sha.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(sha.to_string()),
        }
    }

    /// Give a claim back so another candidate for the same sha may try.
    pub fn release(&self, sha: &str) {
        match self.seen.lock() {
            Ok(mut seen) => seen.remove(sha),
            Err(poisoned) => poisoned.into_inner().remove(sha),
        };
    }

    pub fn len(&self) -> usize {
        match self.seen.lock() {
            Ok(seen) => seen.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Inputs shared by every detail fetch of one run
pub struct FetchScope<'a> {
    pub user_id: &'a str,
    pub today: NaiveDate,
    pub now: DateTime<Utc>,
    pub dedup: &'a DedupSet,
}

/// Fetch one candidate commit and turn it into a record, or say why not.
///
/// A sha is claimed before the lookup. A failed lookup gives the claim back;
/// a commit from another day keeps it, since every copy would be rejected.
pub async fn fetch_commit(
    provider: &dyn Provider,
    scope: &FetchScope<'_>,
    repo: &RepoRef,
    is_private: bool,
    sha: &str,
) -> Result<CommitRecord, SkipReason> {
    if !scope.dedup.claim(sha) {
        return Err(SkipReason::AlreadyClaimed);
    }

    let detail = match provider.commit(repo, sha).await {
        Ok(detail) => detail,
        Err(e) => {
            scope.dedup.release(sha);
            warn!("Commit lookup failed for {}@{}: {}", repo, short(sha), e);
            return Err(SkipReason::Upstream(e.to_string()));
        }
    };

    let committed_at = detail.author_date().ok_or(SkipReason::MissingAuthorDate)?;
    let day = clock::logical_day(committed_at);
    if day != scope.today {
        debug!("Skipping {}@{}: authored on {}", repo, short(sha), day);
        return Err(SkipReason::NotToday(day));
    }

    Ok(CommitRecord::from_detail(
        scope.user_id,
        repo,
        is_private,
        &detail,
        committed_at,
        scope.now,
    ))
}

/// A sha and every event that named it, in feed order
#[derive(Debug)]
pub struct Candidate<'a> {
    pub sha: &'a str,
    pub sources: Vec<&'a ResolvedEvent>,
}

/// Group resolved shas by sha, keeping first-seen order for both the shas and
/// the events naming each one.
pub fn group_candidates(events: &[ResolvedEvent]) -> Vec<Candidate<'_>> {
    let mut candidates: Vec<Candidate<'_>> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for event in events {
        for sha in &event.shas {
            match index.get(sha.as_str()) {
                Some(&i) => {
                    let sources = &mut candidates[i].sources;
                    if !sources.iter().any(|s| std::ptr::eq(*s, event)) {
                        sources.push(event);
                    }
                }
                None => {
                    index.insert(sha.as_str(), candidates.len());
                    candidates.push(Candidate {
                        sha: sha.as_str(),
                        sources: vec![event],
                    });
                }
            }
        }
    }

    candidates
}

/// Fetch a candidate through its sources in feed order.
///
/// The first source whose lookup succeeds owns the record, so a sha pushed to
/// a fork and to upstream in one run always lands under the same repo. A
/// rejection other than a failed lookup ends the attempt.
pub async fn fetch_candidate(
    provider: &dyn Provider,
    scope: &FetchScope<'_>,
    candidate: &Candidate<'_>,
) -> Result<CommitRecord, SkipReason> {
    let mut outcome = Err(SkipReason::AlreadyClaimed);
    for source in &candidate.sources {
        outcome = fetch_commit(
            provider,
            scope,
            &source.repo,
            source.is_private,
            candidate.sha,
        )
        .await;
        if !matches!(outcome, Err(SkipReason::Upstream(_))) {
            break;
        }
    }
    outcome
}
