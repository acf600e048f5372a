use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::idempotency::{IdempotencyKey, IdempotencyRecord, IdempotencyStore, PutOutcome};
use crate::progression::{LevelThreshold, ProgressionSource};
use crate::state::{EngagementState, SaveOutcome, StateStore};

/// The engagement state row always lives under this id.
const STATE_ROW_ID: i64 = 1;

/// SQLite-backed store for engagement state, processed-post records and the
/// progression table.
pub struct EngagementDatabase {
    conn: Mutex<Connection>,
}

impl EngagementDatabase {
    /// Helper to lock the connection
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))
    }

    /// Create or open the database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS engagement_state (
                id INTEGER PRIMARY KEY,
                version INTEGER NOT NULL,
                state_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS processed_posts (
                post_id TEXT NOT NULL,
                action_kind TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (post_id, action_kind)
            );

            CREATE INDEX IF NOT EXISTS idx_processed_posts_expiry
                ON processed_posts(expires_at);

            CREATE TABLE IF NOT EXISTS progression_levels (
                level INTEGER PRIMARY KEY,
                threshold INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub fn get_engagement_state(&self) -> Result<Option<EngagementState>> {
        let conn = self.lock_conn()?;
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT version, state_json FROM engagement_state WHERE id = ?1",
                [STATE_ROW_ID],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((version, json)) = row else {
            return Ok(None);
        };
        let mut state: EngagementState =
            serde_json::from_str(&json).context("Stored engagement state is not valid JSON")?;
        state.version = version as u64;
        Ok(Some(state))
    }

    fn stored_version(conn: &Connection) -> Result<u64> {
        let version: Option<i64> = conn
            .query_row(
                "SELECT version FROM engagement_state WHERE id = ?1",
                [STATE_ROW_ID],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version.unwrap_or(0) as u64)
    }

    /// Write the state if the stored version equals `expected_version`.
    pub fn put_engagement_state(
        &self,
        state: &EngagementState,
        expected_version: u64,
    ) -> Result<SaveOutcome> {
        let new_version = expected_version + 1;
        let mut record = state.clone();
        record.version = new_version;
        let json = serde_json::to_string(&record)?;
        let updated_at = record.last_updated.to_rfc3339();

        let conn = self.lock_conn()?;
        let changed = if expected_version == 0 {
            conn.execute(
                "INSERT INTO engagement_state (id, version, state_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO NOTHING",
                params![STATE_ROW_ID, new_version as i64, json, updated_at],
            )?
        } else {
            conn.execute(
                "UPDATE engagement_state SET version = ?1, state_json = ?2, updated_at = ?3
                 WHERE id = ?4 AND version = ?5",
                params![
                    new_version as i64,
                    json,
                    updated_at,
                    STATE_ROW_ID,
                    expected_version as i64
                ],
            )?
        };

        if changed == 0 {
            return Ok(SaveOutcome::Stale {
                current: Self::stored_version(&conn)?,
            });
        }
        Ok(SaveOutcome::Saved {
            version: new_version,
        })
    }

    pub fn insert_processed_post(
        &self,
        key: &IdempotencyKey,
        record: &IdempotencyRecord,
    ) -> Result<PutOutcome> {
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "INSERT INTO processed_posts (post_id, action_kind, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(post_id, action_kind) DO NOTHING",
            params![
                key.post_id,
                key.action_kind.as_str(),
                record.created_at.timestamp(),
                record.expires_at.timestamp()
            ],
        )?;
        Ok(if changed == 0 {
            PutOutcome::AlreadyExists
        } else {
            PutOutcome::Inserted
        })
    }

    pub fn delete_expired_posts(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock_conn()?;
        let removed = conn.execute(
            "DELETE FROM processed_posts WHERE expires_at <= ?1",
            [now.timestamp()],
        )?;
        Ok(removed)
    }

    #[cfg(test)]
    fn count_processed_posts(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM processed_posts", [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }

    pub fn get_progression_levels(&self) -> Result<Vec<LevelThreshold>> {
        let conn = self.lock_conn()?;
        let mut stmt =
            conn.prepare("SELECT level, threshold FROM progression_levels ORDER BY level ASC")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LevelThreshold {
                    level: row.get::<_, i64>(0)? as u32,
                    threshold: row.get::<_, i64>(1)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Replace the whole progression table in one transaction.
    pub fn seed_progression_table(&self, rows: &[LevelThreshold]) -> Result<usize> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM progression_levels", [])?;
        for row in rows {
            tx.execute(
                "INSERT INTO progression_levels (level, threshold) VALUES (?1, ?2)",
                params![row.level as i64, row.threshold as i64],
            )?;
        }
        tx.commit()?;
        Ok(rows.len())
    }
}

#[async_trait]
impl StateStore for EngagementDatabase {
    async fn load_state(&self) -> Result<Option<EngagementState>> {
        self.get_engagement_state()
    }

    async fn save_state(
        &self,
        state: &EngagementState,
        expected_version: u64,
    ) -> Result<SaveOutcome> {
        self.put_engagement_state(state, expected_version)
    }
}

#[async_trait]
impl IdempotencyStore for EngagementDatabase {
    async fn put_if_absent(
        &self,
        key: &IdempotencyKey,
        record: &IdempotencyRecord,
    ) -> Result<PutOutcome> {
        self.insert_processed_post(key, record)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.delete_expired_posts(now)
    }
}

#[async_trait]
impl ProgressionSource for EngagementDatabase {
    async fn load_progression_table(&self) -> Result<Vec<LevelThreshold>> {
        self.get_progression_levels()
    }
}
