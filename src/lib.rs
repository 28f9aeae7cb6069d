//! GitPoor - Commit synchronization and streak accounting
//!
//! GitPoor pulls a user's recent GitHub push activity, resolves it into a
//! deduplicated set of commits, buckets them into a logical day that starts at
//! 05:00 KST, persists them exactly once and advances a consecutive-day streak.
//!
//! ## Core Features
//!
//! - **Day Boundary**: One shared clock for every "which day is it" decision
//! - **Range Resolution**: Explicit commit lists, compare ranges and head-only fallback
//! - **Partial Failure Tolerance**: One failed commit lookup never fails the run
//! - **Idempotent Streaks**: Same-day re-runs never double-advance the streak
//! - **Token Refresh**: Expiring GitHub tokens are refreshed before use
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`github`]: GitHub API integration and activity filtering
//! - [`sync`]: The sync orchestrator
//! - [`state`]: SQLite ledger, streak and token storage
//! - [`server`]: HTTP trigger and read endpoints

pub mod clock;
pub mod commits;
pub mod config;
pub mod error;
pub mod github;
pub mod language;
pub mod resolve;
pub mod server;
pub mod state;
pub mod streak;
pub mod sync;
pub mod token;

pub use commits::CommitRecord;
pub use config::Config;
pub use error::{ProviderError, SkipReason, SyncError};
pub use github::{Connector, GitHubConnector, GitHubProvider, Provider};
pub use state::Store;
pub use streak::{StreakEngine, StreakState};
pub use sync::{SyncContext, SyncEngine, SyncSummary};
pub use token::{AccessCredential, GitHubTokenEndpoint, TokenEndpoint, TokenSupplier};
