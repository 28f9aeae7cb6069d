mod common;

use assert_matches::assert_matches;
use chrono::Duration;
use serde_json::json;

use common::{at, now, today, TestHarness, USER};
use gitpoor::clock;
use gitpoor::{StreakEngine, StreakState, SyncContext, SyncError};

fn ctx() -> SyncContext {
    SyncContext::new(USER, now())
}

/// Credit each of the `days` logical days before today, oldest first
fn seed_streak(harness: &TestHarness, days: i64) {
    let streaks = StreakEngine::new(harness.store.clone());
    for back in (1..=days).rev() {
        streaks
            .advance(USER, at(today() - Duration::days(back), 3))
            .unwrap();
    }
}

#[tokio::test]
async fn test_compare_range_persists_every_commit() {
    let h = TestHarness::linked();
    h.provider.push_event(
        "owner/repo",
        at(today(), 2),
        json!({"before": "A", "head": "D", "commits": [{"sha": "D"}]}),
    );
    h.provider.add_range("A", "D", &["B", "C", "D"]);
    h.provider.add_commit("B", at(today(), 1), 10, 2, &["src/lib.rs"]);
    h.provider.add_commit("C", at(today(), 1), 5, 5, &["web/app.ts", "README.md"]);
    h.provider.add_commit("D", at(today(), 2), 1, 0, &["Makefile"]);

    let summary = h.engine.run(&ctx()).await.unwrap();

    assert_eq!(summary.date, today());
    assert_eq!(summary.commit_count, 3);
    assert_eq!(summary.total_changes, 23);
    assert_eq!(summary.languages, vec!["Markdown", "Rust", "TypeScript"]);
    assert!(summary.is_success);
    assert_eq!(
        summary.streak,
        StreakState {
            current_streak: 1,
            longest_streak: 1
        }
    );

    let stored = h.store.commits_on(USER, today()).unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|c| c.repo_name == "owner/repo"));
    assert!(stored
        .iter()
        .all(|c| c.total_changes == c.additions + c.deletions));
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let h = TestHarness::linked();
    h.provider.push_event(
        "owner/repo",
        at(today(), 2),
        json!({"head": "B", "commits": [{"sha": "B"}]}),
    );
    h.provider.add_commit("B", at(today(), 1), 3, 1, &["main.go"]);

    let first = h.engine.run(&ctx()).await.unwrap();
    let rows_after_first = h.store.commits_on(USER, today()).unwrap();

    let second = h
        .engine
        .run(&SyncContext::new(USER, now() + Duration::minutes(10)))
        .await
        .unwrap();
    let rows_after_second = h.store.commits_on(USER, today()).unwrap();

    assert_eq!(rows_after_first.len(), 1);
    assert_eq!(rows_after_first, rows_after_second);
    assert_eq!(first.streak, second.streak);
    assert_eq!(second.streak.current_streak, 1);
    assert_eq!(
        h.store.last_sync_at(USER).unwrap(),
        Some(now() + Duration::minutes(10))
    );
}

#[tokio::test]
async fn test_consecutive_day_extends_streak() {
    let h = TestHarness::linked();
    seed_streak(&h, 3);
    assert_eq!(h.store.streak(USER).unwrap().current_streak, 3);

    h.provider
        .push_event("owner/repo", at(today(), 1), json!({"head": "B"}));
    h.provider.add_commit("B", at(today(), 1), 1, 1, &["a.py"]);

    let summary = h.engine.run(&ctx()).await.unwrap();
    assert_eq!(
        summary.streak,
        StreakState {
            current_streak: 4,
            longest_streak: 4
        }
    );
}

#[tokio::test]
async fn test_missed_day_resets_streak() {
    let h = TestHarness::linked();
    // credited D-6 .. D-2, D-1 missed
    let streaks = StreakEngine::new(h.store.clone());
    for back in (2..=6).rev() {
        streaks
            .advance(USER, at(today() - Duration::days(back), 3))
            .unwrap();
    }

    h.provider
        .push_event("owner/repo", at(today(), 1), json!({"head": "B"}));
    h.provider.add_commit("B", at(today(), 1), 1, 1, &["a.py"]);

    let summary = h.engine.run(&ctx()).await.unwrap();
    assert_eq!(
        summary.streak,
        StreakState {
            current_streak: 1,
            longest_streak: 5
        }
    );
}

#[tokio::test]
async fn test_overlapping_ranges_store_shared_commit_once() {
    let h = TestHarness::linked();
    h.provider.push_event(
        "owner/repo",
        at(today(), 1),
        json!({"before": "A", "head": "C"}),
    );
    h.provider.push_event(
        "owner/repo",
        at(today(), 2),
        json!({"before": "B", "head": "D"}),
    );
    h.provider.add_range("A", "C", &["B", "C"]);
    h.provider.add_range("B", "D", &["C", "D"]);
    for sha in ["B", "C", "D"] {
        h.provider.add_commit(sha, at(today(), 1), 2, 2, &["x.rs"]);
    }

    let summary = h.engine.run(&ctx()).await.unwrap();

    assert_eq!(summary.commit_count, 3);
    assert_eq!(h.provider.commit_calls("C"), 1);
    let shas: Vec<_> = h
        .store
        .commits_on(USER, today())
        .unwrap()
        .into_iter()
        .map(|c| c.commit_sha)
        .collect();
    assert_eq!(shas.iter().filter(|s| s.as_str() == "C").count(), 1);
    assert_eq!(shas.len(), 3);
}

#[tokio::test]
async fn test_sha_pushed_to_fork_and_upstream_keeps_feed_order_owner() {
    let h = TestHarness::linked();
    h.provider.push_event(
        "me/fork",
        at(today(), 2),
        json!({"head": "S", "commits": [{"sha": "S"}]}),
    );
    h.provider.push_event(
        "org/upstream",
        at(today(), 1),
        json!({"head": "S", "commits": [{"sha": "S"}]}),
    );
    h.provider.add_commit("S", at(today(), 1), 4, 0, &["lib.rs"]);

    for _ in 0..3 {
        h.engine.run(&ctx()).await.unwrap();
        let stored = h.store.commits_on(USER, today()).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].repo_name, "me/fork");
    }
    assert_eq!(h.provider.commit_calls("S"), 3);
}

#[tokio::test]
async fn test_stale_head_only_commit_is_rejected() {
    let h = TestHarness::linked();
    h.provider
        .push_event("org/private", at(today(), 1), json!({"head": "OLD"}));
    h.provider
        .add_commit("OLD", at(today() - Duration::days(3), 5), 100, 0, &["a.rs"]);

    let summary = h.engine.run(&ctx()).await.unwrap();

    assert_eq!(summary.commit_count, 0);
    assert!(!summary.is_success);
    assert_eq!(summary.streak, StreakState::default());
    assert!(h.store.commits_on(USER, today()).unwrap().is_empty());
    assert_eq!(h.store.last_sync_at(USER).unwrap(), None);
}

#[tokio::test]
async fn test_no_activity_returns_stored_streak() {
    let h = TestHarness::linked();
    seed_streak(&h, 2);
    h.provider
        .other_event("WatchEvent", "owner/repo", at(today(), 1));
    h.provider.push_event(
        "owner/repo",
        at(today() - Duration::days(1), 5),
        json!({"head": "Y"}),
    );

    let summary = h.engine.run(&ctx()).await.unwrap();

    assert_eq!(summary.commit_count, 0);
    assert_eq!(summary.total_changes, 0);
    assert!(summary.languages.is_empty());
    assert!(!summary.is_success);
    assert_eq!(
        summary.streak,
        StreakState {
            current_streak: 2,
            longest_streak: 2
        }
    );
    assert_eq!(h.provider.total_commit_calls(), 0);
}

#[tokio::test]
async fn test_unlinked_user_is_unauthenticated() {
    let h = TestHarness::new();
    let result = h.engine.run(&ctx()).await;
    assert_matches!(result, Err(SyncError::Unauthenticated));
}

#[tokio::test]
async fn test_activity_listing_failure_is_fatal() {
    let h = TestHarness::linked();
    h.provider.fail_events();

    let result = h.engine.run(&ctx()).await;
    let err = result.unwrap_err();
    assert_matches!(err, SyncError::UpstreamUnavailable(_));
    assert_eq!(err.status_code(), 500);
}

#[tokio::test]
async fn test_single_commit_failure_is_absorbed() {
    let h = TestHarness::linked();
    h.provider.push_event(
        "owner/repo",
        at(today(), 1),
        json!({"head": "C", "commits": [{"sha": "B"}, {"sha": "C"}]}),
    );
    h.provider.add_commit("B", at(today(), 1), 4, 0, &["lib.rb"]);
    h.provider.fail_commit("C");

    let summary = h.engine.run(&ctx()).await.unwrap();

    assert_eq!(summary.commit_count, 1);
    assert_eq!(summary.total_changes, 4);
    assert_eq!(summary.languages, vec!["Ruby"]);
    assert!(summary.is_success);
}

#[tokio::test]
async fn test_failed_compare_keeps_listed_commits() {
    let h = TestHarness::linked();
    h.provider.push_event(
        "owner/repo",
        at(today(), 1),
        json!({"before": "A", "head": "C", "commits": [{"sha": "C"}]}),
    );
    h.provider.add_commit("C", at(today(), 1), 1, 1, &["main.swift"]);

    let summary = h.engine.run(&ctx()).await.unwrap();

    assert_eq!(h.provider.compare_calls(), 1);
    assert_eq!(summary.commit_count, 1);
    assert_eq!(summary.languages, vec!["Swift"]);
}

#[tokio::test]
async fn test_branch_creation_does_not_compare() {
    let h = TestHarness::linked();
    h.provider.push_event(
        "owner/repo",
        at(today(), 1),
        json!({
            "before": "0000000000000000000000000000000000000000",
            "head": "N",
            "commits": [{"sha": "N"}]
        }),
    );
    h.provider.add_commit("N", at(today(), 1), 1, 0, &["n.kt"]);

    let summary = h.engine.run(&ctx()).await.unwrap();

    assert_eq!(h.provider.compare_calls(), 0);
    assert_eq!(summary.commit_count, 1);
}

#[tokio::test]
async fn test_read_views_follow_the_ledger() {
    let h = TestHarness::linked();
    h.provider.push_event(
        "owner/repo",
        at(today(), 1),
        json!({"commits": [{"sha": "B"}, {"sha": "C"}]}),
    );
    h.provider.add_commit("B", at(today(), 1), 3, 0, &["a.rs"]);
    h.provider.add_commit("C", at(today(), 2), 0, 2, &["b.go"]);

    let synced = h.engine.run(&ctx()).await.unwrap();

    let today_view = h.engine.today_summary(USER, now()).unwrap();
    assert_eq!(today_view, synced);

    let commits = h.engine.commits_on(USER, today()).unwrap();
    assert_eq!(commits[0].commit_sha, "C");
    assert_eq!(commits[1].commit_sha, "B");

    let history = h
        .engine
        .history(USER, today() - Duration::days(7), today())
        .unwrap();
    let key = clock::format_day(today());
    assert_eq!(history.len(), 1);
    assert_eq!(history[&key].commit_count, 2);
    assert_eq!(history[&key].total_changes, 5);

    let inverted = h.engine.history(USER, today(), today() - Duration::days(1));
    assert_matches!(inverted, Err(SyncError::Validation(_)));
}

#[tokio::test]
async fn test_auto_sync_gate_uses_last_sync() {
    let h = TestHarness::linked();
    assert!(h.engine.should_auto_sync(USER, now(), false).unwrap());

    h.provider
        .push_event("owner/repo", at(today(), 1), json!({"head": "B"}));
    h.provider.add_commit("B", at(today(), 1), 1, 0, &["a.rs"]);
    h.engine.run(&ctx()).await.unwrap();

    let later = now() + Duration::minutes(90);
    assert!(h.engine.should_auto_sync(USER, later, false).unwrap());
    assert!(!h.engine.should_auto_sync(USER, later, true).unwrap());
}
