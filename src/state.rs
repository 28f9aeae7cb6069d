//! State Management - SQLite-backed persistence for the sync engine
//!
//! This module provides persistent storage for:
//! - The commit ledger, keyed by (user, commit sha)
//! - Per-user streak state
//! - Per-user GitHub token record and last-sync cursor
//!
//! The database is stored in XDG_DATA_HOME/gitpoor/gitpoor.db by default.
//! The connection lives behind a mutex and is never held across an await.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::clock;
use crate::commits::CommitRecord;
use crate::error::SyncError;
use crate::streak::StreakState;
use crate::token::AccessCredential;

/// Per-day aggregate used by the history calendar
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyStat {
    pub commit_date: NaiveDate,
    pub commit_count: u32,
    pub total_changes: i64,
}

/// State database manager
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database at a specific path
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::Storage(format!("Failed to create database directory: {}", e))
            })?;
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;

        info!("State database opened at {}", path.display());
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, SyncError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SyncError> {
        self.conn
            .lock()
            .map_err(|_| SyncError::Storage("database connection lock poisoned".to_string()))
    }

    /// Initialize the database schema
    fn initialize(&self) -> Result<(), SyncError> {
        self.lock()?.execute_batch(
            r#"
            -- Streak state, one row per user
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                current_streak INTEGER NOT NULL DEFAULT 0,
                longest_streak INTEGER NOT NULL DEFAULT 0
            );

            -- Token record and sync cursor, one row per user
            CREATE TABLE IF NOT EXISTS github_infos (
                user_id TEXT PRIMARY KEY,
                github_login TEXT,
                access_token TEXT,
                refresh_token TEXT,
                token_expires_at TEXT,
                last_sync_date TEXT,
                updated_at TEXT NOT NULL
            );

            -- Commit ledger
            CREATE TABLE IF NOT EXISTS commits (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                commit_sha TEXT NOT NULL,
                repo_name TEXT NOT NULL,
                committed_at TEXT NOT NULL,
                commit_date TEXT NOT NULL,
                change_files INTEGER NOT NULL DEFAULT 0,
                additions INTEGER NOT NULL DEFAULT 0,
                deletions INTEGER NOT NULL DEFAULT 0,
                total_changes INTEGER NOT NULL DEFAULT 0,
                languages TEXT NOT NULL DEFAULT '[]',
                file_extensions TEXT NOT NULL DEFAULT '[]',
                is_private INTEGER NOT NULL DEFAULT 0,
                commit_url TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (user_id, commit_sha)
            );

            CREATE INDEX IF NOT EXISTS idx_commits_user_date ON commits(user_id, commit_date);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Run `f` inside one IMMEDIATE transaction; commits on `Ok`, rolls back on `Err`.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // =========================================================================
    // Account / token record
    // =========================================================================

    /// Persist the GitHub login and token pair for a user.
    pub fn link_account(
        &self,
        user_id: &str,
        github_login: &str,
        credential: &AccessCredential,
    ) -> Result<(), SyncError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;

        conn.execute(
            "INSERT OR IGNORE INTO users (id, current_streak, longest_streak) VALUES (?1, 0, 0)",
            params![user_id],
        )?;
        conn.execute(
            r#"
            INSERT INTO github_infos (user_id, github_login, access_token, refresh_token, token_expires_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id) DO UPDATE SET
                github_login = ?2,
                access_token = ?3,
                refresh_token = ?4,
                token_expires_at = ?5,
                updated_at = ?6
            "#,
            params![
                user_id,
                github_login,
                credential.access_token,
                credential.refresh_token,
                credential.expires_at.map(|t| t.to_rfc3339()),
                now,
            ],
        )?;

        debug!("Linked GitHub account {} to user {}", github_login, user_id);
        Ok(())
    }

    pub fn github_login(&self, user_id: &str) -> Result<Option<String>, SyncError> {
        let login = self
            .lock()?
            .query_row(
                "SELECT github_login FROM github_infos WHERE user_id = ?1",
                params![user_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(login.flatten())
    }

    /// The persisted token record, if any access token was ever stored.
    pub fn token_record(&self, user_id: &str) -> Result<Option<AccessCredential>, SyncError> {
        let record = self
            .lock()?
            .query_row(
                r#"
                SELECT access_token, refresh_token, token_expires_at
                FROM github_infos
                WHERE user_id = ?1
                "#,
                params![user_id],
                |row| {
                    let access_token: Option<String> = row.get(0)?;
                    let refresh_token: Option<String> = row.get(1)?;
                    let expires_at = match row.get::<_, Option<String>>(2)? {
                        Some(s) => Some(parse_instant(2, &s)?),
                        None => None,
                    };
                    Ok(access_token.map(|access_token| AccessCredential {
                        access_token,
                        refresh_token,
                        expires_at,
                    }))
                },
            )
            .optional()?;
        Ok(record.flatten())
    }

    /// Store a refreshed token pair. The refresh token is kept when the
    /// provider did not reissue one.
    pub fn save_token(
        &self,
        user_id: &str,
        credential: &AccessCredential,
    ) -> Result<(), SyncError> {
        let updated = self.lock()?.execute(
            r#"
            UPDATE github_infos SET
                access_token = ?2,
                refresh_token = COALESCE(?3, refresh_token),
                token_expires_at = ?4,
                updated_at = ?5
            WHERE user_id = ?1
            "#,
            params![
                user_id,
                credential.access_token,
                credential.refresh_token,
                credential.expires_at.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )?;

        if updated == 0 {
            return Err(SyncError::Storage(format!(
                "no token record for user {}",
                user_id
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Streak state / cursor
    // =========================================================================

    pub fn streak(&self, user_id: &str) -> Result<StreakState, SyncError> {
        let conn = self.lock()?;
        read_streak(&conn, user_id)
    }

    pub fn last_sync_at(&self, user_id: &str) -> Result<Option<DateTime<Utc>>, SyncError> {
        let conn = self.lock()?;
        read_last_sync(&conn, user_id)
    }

    // =========================================================================
    // Commit ledger
    // =========================================================================

    /// Upsert a batch keyed by (user_id, commit_sha) in one transaction.
    ///
    /// Conflicting rows take the newly fetched values; `created_at` keeps the
    /// first insertion instant. Returns the number of rows written.
    pub fn upsert_commits(&self, records: &[CommitRecord]) -> Result<usize, SyncError> {
        if records.is_empty() {
            return Ok(0);
        }

        self.transaction(|tx| {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO commits (
                    user_id, commit_sha, repo_name, committed_at, commit_date,
                    change_files, additions, deletions, total_changes,
                    languages, file_extensions, is_private, commit_url, created_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                ON CONFLICT(user_id, commit_sha) DO UPDATE SET
                    repo_name = ?3,
                    committed_at = ?4,
                    commit_date = ?5,
                    change_files = ?6,
                    additions = ?7,
                    deletions = ?8,
                    total_changes = ?9,
                    languages = ?10,
                    file_extensions = ?11,
                    is_private = ?12,
                    commit_url = ?13
                "#,
            )?;

            for record in records {
                let languages = encode_set(&record.languages)?;
                let file_extensions = encode_set(&record.file_extensions)?;
                stmt.execute(params![
                    record.user_id,
                    record.commit_sha,
                    record.repo_name,
                    record.committed_at.to_rfc3339(),
                    clock::format_day(record.commit_date),
                    record.change_files,
                    record.additions,
                    record.deletions,
                    record.total_changes,
                    languages,
                    file_extensions,
                    record.is_private,
                    record.commit_url,
                    record.created_at.to_rfc3339(),
                ])?;
            }

            Ok(records.len())
        })
    }

    /// Ledger rows for one logical day, newest first.
    pub fn commits_on(&self, user_id: &str, day: NaiveDate) -> Result<Vec<CommitRecord>, SyncError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT user_id, commit_sha, repo_name, committed_at, commit_date,
                   change_files, additions, deletions, total_changes,
                   languages, file_extensions, is_private, commit_url, created_at
            FROM commits
            WHERE user_id = ?1 AND commit_date = ?2
            ORDER BY committed_at DESC
            "#,
        )?;

        let rows = stmt
            .query_map(params![user_id, clock::format_day(day)], |row| {
                Ok(CommitRecord {
                    user_id: row.get(0)?,
                    commit_sha: row.get(1)?,
                    repo_name: row.get(2)?,
                    committed_at: parse_instant(3, &row.get::<_, String>(3)?)?,
                    commit_date: parse_date(4, &row.get::<_, String>(4)?)?,
                    change_files: row.get(5)?,
                    additions: row.get(6)?,
                    deletions: row.get(7)?,
                    total_changes: row.get(8)?,
                    languages: decode_set(9, &row.get::<_, String>(9)?)?,
                    file_extensions: decode_set(10, &row.get::<_, String>(10)?)?,
                    is_private: row.get(11)?,
                    commit_url: row.get(12)?,
                    created_at: parse_instant(13, &row.get::<_, String>(13)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Per-day commit counts and change totals for days in `[from, to]`.
    pub fn history(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, DailyStat>, SyncError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT commit_date, COUNT(*), COALESCE(SUM(total_changes), 0)
            FROM commits
            WHERE user_id = ?1 AND commit_date >= ?2 AND commit_date <= ?3
            GROUP BY commit_date
            "#,
        )?;

        let stats = stmt
            .query_map(
                params![user_id, clock::format_day(from), clock::format_day(to)],
                |row| {
                    Ok(DailyStat {
                        commit_date: parse_date(0, &row.get::<_, String>(0)?)?,
                        commit_count: row.get(1)?,
                        total_changes: row.get(2)?,
                    })
                },
            )?
            .map(|stat| stat.map(|s| (s.commit_date, s)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        Ok(stats)
    }
}

// =============================================================================
// Row helpers shared with the streak engine's transaction
// =============================================================================

pub(crate) fn read_streak(conn: &Connection, user_id: &str) -> Result<StreakState, SyncError> {
    let state = conn
        .query_row(
            "SELECT current_streak, longest_streak FROM users WHERE id = ?1",
            params![user_id],
            |row| {
                Ok(StreakState {
                    current_streak: row.get(0)?,
                    longest_streak: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(state.unwrap_or_default())
}

pub(crate) fn read_last_sync(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<DateTime<Utc>>, SyncError> {
    let raw = conn
        .query_row(
            "SELECT last_sync_date FROM github_infos WHERE user_id = ?1",
            params![user_id],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?
        .flatten();

    match raw {
        Some(s) => Ok(Some(parse_instant(0, &s)?)),
        None => Ok(None),
    }
}

pub(crate) fn write_streak(
    conn: &Connection,
    user_id: &str,
    state: StreakState,
) -> Result<(), SyncError> {
    conn.execute(
        r#"
        INSERT INTO users (id, current_streak, longest_streak) VALUES (?1, ?2, ?3)
        ON CONFLICT(id) DO UPDATE SET current_streak = ?2, longest_streak = ?3
        "#,
        params![user_id, state.current_streak, state.longest_streak],
    )?;
    Ok(())
}

pub(crate) fn write_last_sync(
    conn: &Connection,
    user_id: &str,
    synced_at: DateTime<Utc>,
) -> Result<(), SyncError> {
    let stamp = synced_at.to_rfc3339();
    conn.execute(
        r#"
        INSERT INTO github_infos (user_id, last_sync_date, updated_at) VALUES (?1, ?2, ?2)
        ON CONFLICT(user_id) DO UPDATE SET last_sync_date = ?2, updated_at = ?2
        "#,
        params![user_id, stamp],
    )?;
    Ok(())
}

fn parse_instant(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_date(idx: usize, s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn encode_set(set: &BTreeSet<String>) -> Result<String, SyncError> {
    serde_json::to_string(set).map_err(|e| SyncError::Storage(e.to_string()))
}

fn decode_set(idx: usize, s: &str) -> rusqlite::Result<BTreeSet<String>> {
    serde_json::from_str(s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
