//! State store: durable actual state and revision history.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use verge_lang::Policy;

use crate::instance::{ComponentInstance, ComponentKey};
use crate::state::{ActualState, DesiredState};

/// Errors from state store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("state record not found: {0}")]
    NotFound(String),

    #[error("invalid state record '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// Identifier of one persisted revision. Monotonically increasing.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RevisionId(pub u64);

impl std::fmt::Display for RevisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A previously persisted revision: its id, the policy snapshot it was
/// computed from, and when it was saved. The policy serves as the "actual
/// policy" when deleting instances that snapshot created.
#[derive(Debug, Clone)]
pub struct SavedRevision {
    pub id: RevisionId,
    pub policy: Policy,
    pub created_at: DateTime<Utc>,
}

/// Durable storage for actual state and revisions.
///
/// Every single-instance mutation must be durable before the call
/// returns; there is no rollback on partial failure, the next revision
/// re-diffs and catches up. The store is the authority for `created_at`:
/// updates preserve it from the prior record no matter what the caller
/// passes in.
pub trait StateStore: Send + Sync {
    fn load_actual(&self) -> Result<ActualState, StoreError>;

    /// Persist one revision. `now` comes from the revision's clock so a
    /// fixed clock controls every timestamp a revision writes.
    fn save_revision(
        &self,
        policy: &Policy,
        desired: &DesiredState,
        now: DateTime<Utc>,
    ) -> Result<RevisionId, StoreError>;

    fn last_revision(&self) -> Result<Option<SavedRevision>, StoreError>;

    fn create(&self, instance: &ComponentInstance) -> Result<(), StoreError>;

    fn update(&self, instance: &ComponentInstance) -> Result<(), StoreError>;

    fn delete(&self, key: &ComponentKey) -> Result<(), StoreError>;
}

/// SQLite-backed state store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS instances (
                key TEXT PRIMARY KEY,
                record TEXT NOT NULL,
                created_at TEXT,
                updated_at TEXT
            );

            CREATE TABLE IF NOT EXISTS revisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                policy_json TEXT NOT NULL,
                desired_json TEXT NOT NULL
            );
            "#,
        )?;
        debug!("State store schema initialized");
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_instance(
        conn: &Connection,
        instance: &ComponentInstance,
    ) -> Result<(), StoreError> {
        let key = instance.key.to_string();
        let record = serde_json::to_string(instance).map_err(|err| StoreError::Corrupt {
            key: key.clone(),
            reason: err.to_string(),
        })?;
        conn.execute(
            r#"
            INSERT INTO instances (key, record, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(key) DO UPDATE SET
                record = excluded.record,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            "#,
            params![
                key,
                record,
                instance.created_at.map(|t| t.to_rfc3339()),
                instance.updated_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn read_instance(
        conn: &Connection,
        key: &str,
    ) -> Result<Option<ComponentInstance>, StoreError> {
        let record: Option<String> = conn
            .query_row("SELECT record FROM instances WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        match record {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|err| StoreError::Corrupt {
                    key: key.to_string(),
                    reason: err.to_string(),
                }),
        }
    }
}

impl StateStore for SqliteStore {
    fn load_actual(&self) -> Result<ActualState, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key, record FROM instances ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut instances = Vec::new();
        for row in rows {
            let (key, json) = row?;
            let instance: ComponentInstance =
                serde_json::from_str(&json).map_err(|err| StoreError::Corrupt {
                    key,
                    reason: err.to_string(),
                })?;
            instances.push(instance);
        }
        Ok(instances.into_iter().collect())
    }

    fn save_revision(
        &self,
        policy: &Policy,
        desired: &DesiredState,
        now: DateTime<Utc>,
    ) -> Result<RevisionId, StoreError> {
        let policy_json = serde_json::to_string(policy).map_err(|err| StoreError::Corrupt {
            key: "revision/policy".to_string(),
            reason: err.to_string(),
        })?;
        let instances: Vec<&ComponentInstance> = desired.iter_ordered().collect();
        let desired_json =
            serde_json::to_string(&instances).map_err(|err| StoreError::Corrupt {
                key: "revision/desired".to_string(),
                reason: err.to_string(),
            })?;

        let conn = self.conn();
        conn.execute(
            "INSERT INTO revisions (created_at, policy_json, desired_json) VALUES (?1, ?2, ?3)",
            params![now.to_rfc3339(), policy_json, desired_json],
        )?;
        let id = conn.last_insert_rowid();
        debug!(revision = id, instances = instances.len(), "Revision persisted");
        Ok(RevisionId(id as u64))
    }

    fn last_revision(&self) -> Result<Option<SavedRevision>, StoreError> {
        let conn = self.conn();
        let row: Option<(i64, String, String)> = conn
            .query_row(
                "SELECT id, policy_json, created_at FROM revisions ORDER BY id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((id, policy_json, created_at)) => {
                let policy =
                    serde_json::from_str(&policy_json).map_err(|err| StoreError::Corrupt {
                        key: format!("revision/{id}"),
                        reason: err.to_string(),
                    })?;
                let created_at = DateTime::parse_from_rfc3339(&created_at)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|err| StoreError::Corrupt {
                        key: format!("revision/{id}"),
                        reason: err.to_string(),
                    })?;
                Ok(Some(SavedRevision {
                    id: RevisionId(id as u64),
                    policy,
                    created_at,
                }))
            }
        }
    }

    fn create(&self, instance: &ComponentInstance) -> Result<(), StoreError> {
        Self::write_instance(&self.conn(), instance)
    }

    fn update(&self, instance: &ComponentInstance) -> Result<(), StoreError> {
        let conn = self.conn();
        let key = instance.key.to_string();
        let prior = Self::read_instance(&conn, &key)?
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        let mut merged = instance.clone();
        // The store is the authority for created_at.
        merged.created_at = prior.created_at;
        Self::write_instance(&conn, &merged)
    }

    fn delete(&self, key: &ComponentKey) -> Result<(), StoreError> {
        self.conn().execute(
            "DELETE FROM instances WHERE key = ?1",
            params![key.to_string()],
        )?;
        Ok(())
    }
}
