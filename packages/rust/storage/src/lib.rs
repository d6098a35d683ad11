//! Session State Store on embedded libSQL.
//!
//! The [`Storage`] struct keeps one checkpoint row per research session.
//! Each row holds a self-describing [`CheckpointRecord`] as JSON; a save is a
//! single upsert statement, so readers never observe a half-written record.
//!
//! **Access rules:**
//! - Research runs: read-write via [`Storage::open`]
//! - Inspection (`deepdive sessions list`): read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::Utc;
use deepdive_shared::{
    CURRENT_SCHEMA_VERSION, CheckpointRecord, DeepDiveError, Result, Session, SessionId,
};
use libsql::{Connection, Database, params};

/// Default database file name inside the data directory.
pub const DB_FILE_NAME: &str = "checkpoints.db";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

fn storage_err(e: impl std::fmt::Display) -> DeepDiveError {
    DeepDiveError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DeepDiveError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DeepDiveError::Storage(format!(
                "no checkpoint database at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        DeepDiveError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(DeepDiveError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Checkpoint operations
    // -----------------------------------------------------------------------

    /// Whether a checkpoint row exists for `id`, usable or not.
    pub async fn exists(&self, id: &SessionId) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM checkpoints WHERE session_id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        Ok(rows.next().await.map_err(storage_err)?.is_some())
    }

    /// Overwrite the checkpoint for `session`, stamping its update time.
    #[tracing::instrument(skip_all, fields(session_id = %session.id, step = session.last_completed_step()))]
    pub async fn save(&self, session: &mut Session) -> Result<()> {
        self.check_writable()?;
        session.updated_at = Utc::now();

        let record = CheckpointRecord::from(&*session);
        let json = serde_json::to_string(&record)
            .map_err(|e| DeepDiveError::Storage(format!("failed to serialize checkpoint: {e}")))?;

        self.conn
            .execute(
                "INSERT INTO checkpoints (session_id, topic, state_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(session_id) DO UPDATE SET
                    topic = excluded.topic,
                    state_json = excluded.state_json,
                    updated_at = excluded.updated_at",
                params![
                    session.id.to_string(),
                    session.topic.as_str(),
                    json,
                    session.updated_at.to_rfc3339()
                ],
            )
            .await
            .map_err(storage_err)?;

        tracing::debug!("checkpoint saved");
        Ok(())
    }

    /// Load the checkpoint for `id`.
    ///
    /// A missing row, unparseable JSON, a schema version other than
    /// [`CURRENT_SCHEMA_VERSION`], or an inconsistent record all yield
    /// `Ok(None)`. Only database failures are errors.
    pub async fn load(&self, id: &SessionId) -> Result<Option<Session>> {
        let mut rows = self
            .conn
            .query(
                "SELECT state_json FROM checkpoints WHERE session_id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        let Some(row) = rows.next().await.map_err(storage_err)? else {
            tracing::debug!(session_id = %id, "no checkpoint");
            return Ok(None);
        };
        let json = row.get::<String>(0).map_err(storage_err)?;

        Ok(decode_checkpoint(id, &json))
    }

    /// Remove the checkpoint for `id`. Deleting a missing row is a no-op.
    pub async fn delete(&self, id: &SessionId) -> Result<()> {
        self.check_writable()?;
        let affected = self
            .conn
            .execute(
                "DELETE FROM checkpoints WHERE session_id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        tracing::debug!(session_id = %id, affected, "checkpoint deleted");
        Ok(())
    }

    /// All usable checkpoints, most recently updated first.
    ///
    /// Rows that would not load are skipped.
    pub async fn list(&self) -> Result<Vec<Session>> {
        let mut rows = self
            .conn
            .query(
                "SELECT session_id, state_json FROM checkpoints ORDER BY updated_at DESC",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut sessions = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let raw_id = row.get::<String>(0).map_err(storage_err)?;
            let json = row.get::<String>(1).map_err(storage_err)?;
            let Ok(id) = SessionId::parse(&raw_id) else {
                tracing::warn!(session_id = %raw_id, "skipping checkpoint with malformed id");
                continue;
            };
            if let Some(session) = decode_checkpoint(&id, &json) {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }
}

/// Decode a stored checkpoint, treating every kind of damage as "absent".
fn decode_checkpoint(id: &SessionId, json: &str) -> Option<Session> {
    let value: serde_json::Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(session_id = %id, error = %e, "corrupt checkpoint payload");
            return None;
        }
    };

    let version = value.get("version").and_then(serde_json::Value::as_u64);
    if version != Some(u64::from(CURRENT_SCHEMA_VERSION)) {
        tracing::warn!(
            session_id = %id,
            ?version,
            expected = CURRENT_SCHEMA_VERSION,
            "checkpoint schema version mismatch"
        );
        return None;
    }

    let record: CheckpointRecord = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(session_id = %id, error = %e, "checkpoint does not match schema");
            return None;
        }
    };

    if record.session_id != *id {
        tracing::warn!(session_id = %id, stored = %record.session_id, "checkpoint id mismatch");
        return None;
    }

    match Session::try_from(record) {
        Ok(session) => Some(session),
        Err(e) => {
            tracing::warn!(session_id = %id, error = %e, "inconsistent checkpoint");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepdive_shared::{Depth, Finding, SearchHit, StepOutcome, SubQuestion};
    use uuid::Uuid;

    async fn test_storage() -> Storage {
        let dir = std::env::temp_dir().join(format!("dd-storage-{}", Uuid::now_v7()));
        Storage::open(&dir.join(DB_FILE_NAME))
            .await
            .expect("open test db")
    }

    fn searched_session() -> Session {
        let mut session = Session::new("renewable energy storage", Depth::Quick);
        session
            .advance(
                StepOutcome::Planned(vec![SubQuestion {
                    question: "What is grid storage?".into(),
                    search_queries: vec!["grid storage".into()],
                }]),
                [],
            )
            .unwrap();
        session
            .advance(
                StepOutcome::Searched(vec![SearchHit {
                    question: "What is grid storage?".into(),
                    title: "Grid storage".into(),
                    url: "https://example.com/grid".into(),
                    snippet: "batteries".into(),
                }]),
                [],
            )
            .unwrap();
        session
            .advance(
                StepOutcome::Extracted(vec![Finding {
                    url: "https://example.com/grid".into(),
                    title: "Grid storage".into(),
                    facts: vec!["Lithium-ion dominates new installs".into()],
                }]),
                ["https://example.com/grid".to_string()],
            )
            .unwrap();
        session
    }

    async fn write_raw(storage: &Storage, id: &SessionId, json: &str) {
        storage
            .conn
            .execute(
                "INSERT INTO checkpoints (session_id, topic, state_json, updated_at)
                 VALUES (?1, 'raw', ?2, ?3)",
                params![id.to_string(), json, Utc::now().to_rfc3339()],
            )
            .await
            .expect("insert raw row");
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn save_then_load_roundtrip() {
        let storage = test_storage().await;
        let mut session = searched_session();
        let before = session.updated_at;

        storage.save(&mut session).await.expect("save");
        assert!(session.updated_at >= before);
        assert!(storage.exists(&session.id).await.unwrap());

        let loaded = storage
            .load(&session.id)
            .await
            .expect("load")
            .expect("checkpoint present");
        assert_eq!(loaded.topic, session.topic);
        assert_eq!(loaded.depth, Depth::Quick);
        assert_eq!(loaded.last_completed_step(), 3);
        assert_eq!(loaded.stage, session.stage);
        assert_eq!(loaded.visited_urls, session.visited_urls);
    }

    #[tokio::test]
    async fn save_overwrites_previous_record() {
        let storage = test_storage().await;
        let mut session = Session::new("topic", Depth::Standard);
        storage.save(&mut session).await.unwrap();

        session
            .advance(StepOutcome::Planned(Vec::new()), [])
            .unwrap();
        storage.save(&mut session).await.unwrap();

        let loaded = storage.load(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.last_completed_step(), 1);
        assert_eq!(storage.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_corrupt_and_mismatched_all_load_as_none() {
        let storage = test_storage().await;

        let missing = SessionId::new();
        assert!(storage.load(&missing).await.unwrap().is_none());

        let corrupt = SessionId::new();
        write_raw(&storage, &corrupt, "{not json").await;
        assert!(storage.load(&corrupt).await.unwrap().is_none());

        let mut session = searched_session();
        let mut record = serde_json::to_value(CheckpointRecord::from(&session)).unwrap();
        record["version"] = serde_json::json!(CURRENT_SCHEMA_VERSION + 1);
        write_raw(&storage, &session.id, &record.to_string()).await;
        assert!(storage.load(&session.id).await.unwrap().is_none());

        // the row is still there; it is only unusable
        assert!(storage.exists(&session.id).await.unwrap());
        storage.save(&mut session).await.unwrap();
        assert!(storage.load(&session.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn inconsistent_record_loads_as_none() {
        let storage = test_storage().await;
        let session = searched_session();
        let mut record = serde_json::to_value(CheckpointRecord::from(&session)).unwrap();
        record["lastCompletedStep"] = serde_json::json!(5);
        write_raw(&storage, &session.id, &record.to_string()).await;

        assert!(storage.load(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_is_noop_when_absent() {
        let storage = test_storage().await;
        let mut session = Session::new("topic", Depth::Deep);
        storage.save(&mut session).await.unwrap();

        storage.delete(&session.id).await.expect("delete");
        assert!(!storage.exists(&session.id).await.unwrap());
        storage.delete(&session.id).await.expect("second delete");
    }

    #[tokio::test]
    async fn list_skips_unusable_rows() {
        let storage = test_storage().await;
        let mut a = Session::new("first", Depth::Quick);
        let mut b = searched_session();
        storage.save(&mut a).await.unwrap();
        storage.save(&mut b).await.unwrap();
        write_raw(&storage, &SessionId::new(), "garbage").await;

        let sessions = storage.list().await.expect("list");
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, b.id);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let dir = std::env::temp_dir().join(format!("dd-storage-ro-{}", Uuid::now_v7()));
        let path = dir.join(DB_FILE_NAME);
        let mut session = Session::new("topic", Depth::Quick);
        {
            let rw = Storage::open(&path).await.unwrap();
            rw.save(&mut session).await.unwrap();
        }

        let ro = Storage::open_readonly(&path).await.unwrap();
        assert!(ro.load(&session.id).await.unwrap().is_some());
        let result = ro.delete(&session.id).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
