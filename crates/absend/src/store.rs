//! SQLite persistence for enrolled identities and attendance records.
//!
//! Nearest-neighbour search runs inside SQLite through a registered
//! `cosine_distance(blob, blob)` scalar function.

use absen_core::types::cosine_similarity;
use absen_core::{Candidate, Embedding};
use chrono::Utc;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, ErrorCode};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS identities (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id       TEXT NOT NULL UNIQUE,
        embedding     BLOB NOT NULL,
        model_version TEXT,
        created_at    TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS attendance (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id    TEXT NOT NULL,
        confidence REAL NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS attendance_user ON attendance (user_id);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("user already enrolled: {0}")]
    DuplicateIdentity(String),
    #[error("database: {0}")]
    Database(#[from] tokio_rusqlite::Error),
}

/// One appended attendance row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub user_id: String,
    pub confidence: f64,
    pub created_at: String,
}

/// Async handle to the identity/attendance database.
#[derive(Clone)]
pub struct FaceStore {
    conn: Connection,
}

impl FaceStore {
    /// Open (creating if needed) the database file.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!(dir = %parent.display(), error = %e, "could not create database directory");
            }
        }
        let conn = Connection::open(path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|c| {
            register_cosine_distance(c)?;
            c.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Persist one identity. A second enrollment of the same user id is
    /// rejected, never overwritten.
    pub async fn insert_identity(&self, user_id: &str, embedding: &Embedding) -> Result<(), StoreError> {
        let uid = user_id.to_string();
        let blob = embedding.to_le_bytes();
        let model_version = embedding.model_version.clone();
        let created_at = Utc::now().to_rfc3339();

        let inserted = self
            .conn
            .call(move |c| {
                let result = c.execute(
                    "INSERT INTO identities (user_id, embedding, model_version, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![uid, blob, model_version, created_at],
                );
                match result {
                    Ok(_) => Ok(true),
                    Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                        Ok(false)
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await?;

        if inserted {
            Ok(())
        } else {
            Err(StoreError::DuplicateIdentity(user_id.to_string()))
        }
    }

    /// The `limit` closest identities by cosine distance, nearest first.
    pub async fn nearest(&self, embedding: &Embedding, limit: usize) -> Result<Vec<Candidate>, StoreError> {
        let probe = embedding.to_le_bytes();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let candidates = self
            .conn
            .call(move |c| {
                let mut stmt = c.prepare_cached(
                    "SELECT user_id, cosine_distance(embedding, ?1) AS distance
                     FROM identities
                     ORDER BY distance ASC
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![probe, limit], |row| {
                    Ok(Candidate { user_id: row.get(0)?, distance: row.get(1)? })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;
        Ok(candidates)
    }

    /// Append an attendance record; returns its row id.
    pub async fn log_attendance(&self, user_id: &str, confidence: f64) -> Result<i64, StoreError> {
        let uid = user_id.to_string();
        let created_at = Utc::now().to_rfc3339();
        let id = self
            .conn
            .call(move |c| {
                c.execute(
                    "INSERT INTO attendance (user_id, confidence, created_at) VALUES (?1, ?2, ?3)",
                    params![uid, confidence, created_at],
                )?;
                Ok(c.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn identity_count(&self) -> Result<u64, StoreError> {
        let count = self
            .conn
            .call(|c| Ok(c.query_row("SELECT COUNT(*) FROM identities", [], |row| row.get::<_, i64>(0))?))
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Attendance rows for one user, oldest first.
    pub async fn attendance_for(&self, user_id: &str) -> Result<Vec<AttendanceRecord>, StoreError> {
        let uid = user_id.to_string();
        let records = self
            .conn
            .call(move |c| {
                let mut stmt = c.prepare_cached(
                    "SELECT id, user_id, confidence, created_at FROM attendance
                     WHERE user_id = ?1 ORDER BY id ASC",
                )?;
                let rows = stmt.query_map(params![uid], |row| {
                    Ok(AttendanceRecord {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        confidence: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;
        Ok(records)
    }
}

/// `cosine_distance(a, b)` = 1 − cosine similarity over little-endian f32 blobs.
fn register_cosine_distance(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "cosine_distance",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let a: Vec<u8> = ctx.get(0)?;
            let b: Vec<u8> = ctx.get(1)?;
            match (Embedding::from_le_bytes(&a, None), Embedding::from_le_bytes(&b, None)) {
                (Some(a), Some(b)) if a.dimension() == b.dimension() => {
                    Ok(1.0 - cosine_similarity(&a.values, &b.values))
                }
                _ => Err(rusqlite::Error::UserFunctionError(
                    "cosine_distance: malformed or mismatched embedding blobs".into(),
                )),
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding::normalized(values, Some("test".into()))
    }

    #[tokio::test]
    async fn test_insert_and_count() {
        let store = FaceStore::open_in_memory().await.unwrap();
        assert_eq!(store.identity_count().await.unwrap(), 0);
        store.insert_identity("alice", &emb(vec![1.0, 0.0])).await.unwrap();
        assert_eq!(store.identity_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_identity_rejected() {
        let store = FaceStore::open_in_memory().await.unwrap();
        store.insert_identity("alice", &emb(vec![1.0, 0.0])).await.unwrap();
        let again = store.insert_identity("alice", &emb(vec![0.0, 1.0])).await;
        assert!(matches!(again, Err(StoreError::DuplicateIdentity(ref u)) if u == "alice"));
        assert_eq!(store.identity_count().await.unwrap(), 1);

        // Original embedding survives.
        let hit = store.nearest(&emb(vec![1.0, 0.0]), 1).await.unwrap();
        assert!(hit[0].distance.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_nearest_orders_by_cosine_distance() {
        let store = FaceStore::open_in_memory().await.unwrap();
        store.insert_identity("alice", &emb(vec![1.0, 0.0, 0.0])).await.unwrap();
        store.insert_identity("bob", &emb(vec![0.0, 1.0, 0.0])).await.unwrap();
        store.insert_identity("carol", &emb(vec![0.7, 0.7, 0.0])).await.unwrap();

        let hits = store.nearest(&emb(vec![0.9, 0.1, 0.0]), 2).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|c| c.user_id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "carol"]);
        assert!(hits[0].distance < hits[1].distance);
    }

    #[tokio::test]
    async fn test_nearest_on_empty_table() {
        let store = FaceStore::open_in_memory().await.unwrap();
        assert!(store.nearest(&emb(vec![1.0, 0.0]), 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_distance_matches_similarity() {
        let store = FaceStore::open_in_memory().await.unwrap();
        store.insert_identity("alice", &emb(vec![1.0, 0.0])).await.unwrap();
        let probe = emb(vec![0.85, (1.0f32 - 0.85 * 0.85).sqrt()]);
        let hit = &store.nearest(&probe, 1).await.unwrap()[0];
        assert!((hit.similarity() - 0.85).abs() < 1e-5, "similarity = {}", hit.similarity());
    }

    #[tokio::test]
    async fn test_mismatched_dimensions_fail_the_query() {
        let store = FaceStore::open_in_memory().await.unwrap();
        store.insert_identity("alice", &emb(vec![1.0, 0.0])).await.unwrap();
        assert!(store.nearest(&emb(vec![1.0, 0.0, 0.0]), 1).await.is_err());
    }

    #[tokio::test]
    async fn test_attendance_is_append_only_log() {
        let store = FaceStore::open_in_memory().await.unwrap();
        let first = store.log_attendance("alice", 0.91).await.unwrap();
        let second = store.log_attendance("alice", 0.88).await.unwrap();
        store.log_attendance("bob", 0.75).await.unwrap();
        assert!(second > first);

        let rows = store.attendance_for("alice").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].confidence, 0.91);
        assert_eq!(rows[1].confidence, 0.88);
        assert!(store.attendance_for("nobody").await.unwrap().is_empty());
    }
}
