use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use super::models::*;
use crate::errors::StoreError;

/// Async-safe handle to the pagesmith database.
///
/// Wraps `Store` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads. Rounds for different projects
/// share this handle safely; writes to a given round are only ever issued
/// by the one orchestrator invocation holding that project's guard.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<Store>>,
}

impl DbHandle {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(store)),
        }
    }

    /// Run a closure with access to the store on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Store) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = store
                .lock()
                .map_err(|e| StoreError::Other(anyhow::anyhow!("Store lock poisoned: {}", e)))?;
            f(&guard)
        })
        .await
        .context("Store task panicked")
        .map_err(StoreError::Other)?
    }
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .context("Failed to open SQLite database")
            .map_err(StoreError::Other)?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .context("Failed to open in-memory SQLite database")
            .map_err(StoreError::Other)?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.run_migrations()?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                published_target TEXT
            );

            CREATE TABLE IF NOT EXISTS rounds (
                project_id TEXT NOT NULL REFERENCES projects(id),
                number INTEGER NOT NULL,
                instruction TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                bundle_ref TEXT,
                published_target TEXT,
                failure_reason TEXT,
                error TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                PRIMARY KEY (project_id, number)
            );

            CREATE TABLE IF NOT EXISTS round_transitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id TEXT NOT NULL,
                round_number INTEGER NOT NULL,
                status TEXT NOT NULL,
                at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS bundles (
                reference TEXT PRIMARY KEY,
                files TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_rounds_project ON rounds(project_id);
            CREATE INDEX IF NOT EXISTS idx_transitions_round
                ON round_transitions(project_id, round_number);
            ",
        )?;
        Ok(())
    }

    // ── Project registry ──────────────────────────────────────────────

    pub fn get_or_create_project(&self, id: &str) -> Result<Project, StoreError> {
        if let Some(project) = self.get_project(id)? {
            return Ok(project);
        }
        let created_at = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO projects (id, created_at, published_target) VALUES (?1, ?2, NULL)",
            params![id, created_at],
        )?;
        Ok(Project {
            id: id.to_string(),
            created_at,
            published_target: None,
        })
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>, StoreError> {
        let project = self
            .conn
            .query_row(
                "SELECT id, created_at, published_target FROM projects WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Project {
                        id: row.get(0)?,
                        created_at: row.get(1)?,
                        published_target: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(project)
    }

    /// Record the project's current published target. Written only on round
    /// completion, so it always equals the target of the most recent
    /// completed round.
    pub fn update_published_target(&self, id: &str, target: &str) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE projects SET published_target = ?1 WHERE id = ?2",
            params![target, id],
        )?;
        if updated == 0 {
            return Err(StoreError::ProjectNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Allocate the next round number for a project. Fails with
    /// `RoundInFlight` if the latest round has not reached a terminal
    /// status: round N may not be created until round N−1 is terminal.
    pub fn next_round_number(&self, project_id: &str) -> Result<i64, StoreError> {
        let last: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT number, status FROM rounds
                 WHERE project_id = ?1 ORDER BY number DESC LIMIT 1",
                params![project_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match last {
            None => Ok(1),
            Some((number, status)) => {
                let status = RoundStatus::from_str(&status)
                    .map_err(StoreError::InvariantViolation)?;
                if !status.is_terminal() {
                    return Err(StoreError::RoundInFlight {
                        project_id: project_id.to_string(),
                        number,
                    });
                }
                Ok(number + 1)
            }
        }
    }

    // ── Artifact store: rounds ────────────────────────────────────────

    /// Persist a round and append its current status to the transition log.
    ///
    /// Terminal rounds are append-only: saving over a round already in
    /// `completed` or `failed` fails with `InvariantViolation`.
    pub fn save(&self, round: &Round) -> Result<(), StoreError> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM rounds WHERE project_id = ?1 AND number = ?2",
                params![round.project_id, round.number],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(status) = existing {
            let status =
                RoundStatus::from_str(&status).map_err(StoreError::InvariantViolation)?;
            if status.is_terminal() {
                return Err(StoreError::InvariantViolation(format!(
                    "round {}/{} is {} and may not be mutated",
                    round.project_id, round.number, status
                )));
            }
        }

        self.conn.execute(
            "INSERT INTO rounds
                (project_id, number, instruction, status, bundle_ref,
                 published_target, failure_reason, error, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (project_id, number) DO UPDATE SET
                status = excluded.status,
                bundle_ref = excluded.bundle_ref,
                published_target = excluded.published_target,
                failure_reason = excluded.failure_reason,
                error = excluded.error,
                completed_at = excluded.completed_at",
            params![
                round.project_id,
                round.number,
                round.instruction,
                round.status.as_str(),
                round.bundle_ref,
                round.published_target,
                round.failure_reason.map(|r| r.as_str()),
                round.error,
                round.started_at,
                round.completed_at,
            ],
        )?;

        self.conn.execute(
            "INSERT INTO round_transitions (project_id, round_number, status, at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                round.project_id,
                round.number,
                round.status.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    pub fn load(&self, project_id: &str, number: i64) -> Result<Round, StoreError> {
        self.conn
            .query_row(
                "SELECT project_id, number, instruction, status, bundle_ref,
                        published_target, failure_reason, error, started_at, completed_at
                 FROM rounds WHERE project_id = ?1 AND number = ?2",
                params![project_id, number],
                round_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::RoundNotFound {
                project_id: project_id.to_string(),
                number,
            })
    }

    pub fn list(&self, project_id: &str) -> Result<Vec<Round>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT project_id, number, instruction, status, bundle_ref,
                    published_target, failure_reason, error, started_at, completed_at
             FROM rounds WHERE project_id = ?1 ORDER BY number ASC",
        )?;
        let rounds = stmt
            .query_map(params![project_id], round_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rounds)
    }

    /// Bundle reference of the most recent round that produced one. Used as
    /// revision context for the next round; covers the publication-failed
    /// case where a bundle was generated but never went live.
    pub fn latest_bundle_ref(&self, project_id: &str) -> Result<Option<String>, StoreError> {
        let bundle_ref = self
            .conn
            .query_row(
                "SELECT bundle_ref FROM rounds
                 WHERE project_id = ?1 AND bundle_ref IS NOT NULL
                 ORDER BY number DESC LIMIT 1",
                params![project_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(bundle_ref)
    }

    pub fn list_transitions(
        &self,
        project_id: &str,
        round_number: i64,
    ) -> Result<Vec<StatusTransition>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT project_id, round_number, status, at FROM round_transitions
             WHERE project_id = ?1 AND round_number = ?2 ORDER BY id ASC",
        )?;
        let transitions = stmt
            .query_map(params![project_id, round_number], |row| {
                let status: String = row.get(2)?;
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, status, row.get::<_, String>(3)?))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(project_id, round_number, status, at)| {
                Ok(StatusTransition {
                    project_id,
                    round_number,
                    status: RoundStatus::from_str(&status)
                        .map_err(StoreError::InvariantViolation)?,
                    at,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(transitions)
    }

    // ── Artifact store: bundles ───────────────────────────────────────

    /// Bundles are content-addressed, so re-saving an existing reference is
    /// a no-op rather than an error.
    pub fn save_bundle(&self, bundle: &Bundle) -> Result<(), StoreError> {
        let files = serde_json::to_string(&bundle.files)
            .context("Failed to serialize bundle files")
            .map_err(StoreError::Other)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO bundles (reference, files, created_at) VALUES (?1, ?2, ?3)",
            params![bundle.reference, files, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn load_bundle(&self, reference: &str) -> Result<Bundle, StoreError> {
        let files: Option<String> = self
            .conn
            .query_row(
                "SELECT files FROM bundles WHERE reference = ?1",
                params![reference],
                |row| row.get(0),
            )
            .optional()?;
        let files = files.ok_or_else(|| StoreError::BundleNotFound {
            reference: reference.to_string(),
        })?;
        let files = serde_json::from_str(&files)
            .context("Failed to deserialize bundle files")
            .map_err(StoreError::Other)?;
        Ok(Bundle {
            reference: reference.to_string(),
            files,
        })
    }
}

fn round_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Round> {
    let status: String = row.get(3)?;
    let failure_reason: Option<String> = row.get(6)?;
    Ok(Round {
        project_id: row.get(0)?,
        number: row.get(1)?,
        instruction: row.get(2)?,
        status: RoundStatus::from_str(&status).unwrap_or(RoundStatus::Failed),
        bundle_ref: row.get(4)?,
        published_target: row.get(5)?,
        failure_reason: failure_reason.and_then(|r| FailureReason::from_str(&r).ok()),
        error: row.get(7)?,
        started_at: row.get(8)?,
        completed_at: row.get(9)?,
    })
}
