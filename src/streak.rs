//! Streak accounting
//!
//! The streak advances at most once per logical day. Re-running on a day that
//! has already been credited only refreshes the last-sync instant, so any
//! number of same-day syncs converge on the same state.
//!
//! The state row and the last-sync cursor are written in one transaction: a
//! failure on either write leaves both untouched.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock;
use crate::error::SyncError;
use crate::state::{self, Store};

/// Consecutive-day counters for one user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakState {
    pub current_streak: u32,
    pub longest_streak: u32,
}

/// What an advance did to the stored state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakTransition {
    /// The day was already credited; only the cursor moves
    SameDay,
    /// The previous day was credited; the streak grows by one
    Extended,
    /// First sync ever, or at least one day was missed
    Restarted,
}

/// Decide the next state from the stored state and the last credited day.
pub fn next_streak(
    state: StreakState,
    last_sync_day: Option<NaiveDate>,
    today: NaiveDate,
) -> (StreakTransition, StreakState) {
    match last_sync_day {
        // A cursor ahead of today (clock skew between writers) is treated as
        // already credited rather than as a gap.
        Some(last) if last >= today => (StreakTransition::SameDay, state),
        Some(last) if last == clock::previous_day(today) => {
            let current = state.current_streak.saturating_add(1);
            (
                StreakTransition::Extended,
                StreakState {
                    current_streak: current,
                    longest_streak: current.max(state.longest_streak),
                },
            )
        }
        _ => (
            StreakTransition::Restarted,
            StreakState {
                current_streak: 1,
                longest_streak: state.longest_streak.max(1),
            },
        ),
    }
}

/// Applies [`next_streak`] against the store
#[derive(Clone)]
pub struct StreakEngine {
    store: Arc<Store>,
}

impl StreakEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Credit `now`'s logical day for `user_id` and return the resulting state.
    pub fn advance(&self, user_id: &str, now: DateTime<Utc>) -> Result<StreakState, SyncError> {
        let today = clock::logical_day(now);

        let (transition, next) = self.store.transaction(|tx| {
            let current = state::read_streak(tx, user_id)?;
            let last_sync_day = state::read_last_sync(tx, user_id)?.map(clock::logical_day);

            let (transition, next) = next_streak(current, last_sync_day, today);
            if transition != StreakTransition::SameDay {
                state::write_streak(tx, user_id, next)?;
            }
            state::write_last_sync(tx, user_id, now)?;

            Ok((transition, next))
        })?;

        match transition {
            StreakTransition::SameDay => {
                debug!("Streak already credited for {} on {}", user_id, today)
            }
            StreakTransition::Extended | StreakTransition::Restarted => info!(
                "Streak {:?} for {}: current={} longest={}",
                transition, user_id, next.current_streak, next.longest_streak
            ),
        }

        Ok(next)
    }

    /// Current stored state without any mutation.
    pub fn current(&self, user_id: &str) -> Result<StreakState, SyncError> {
        self.store.streak(user_id)
    }
}
