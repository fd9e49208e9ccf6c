// crates/loka-storage/src/memory.rs

//! Session-scoped conversation memory
//!
//! Append-only rows per session, with an optional dense vector per entry.
//! Entries without a vector are invisible to similarity queries. Vectors are
//! stored as little-endian f32 blobs; similarity is cosine, computed over
//! the session's working set after loading.

use anyhow::Result;
use chrono::Utc;
use loka_core::types::Role;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio_rusqlite::Connection;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MemoryEntry {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub summary: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub created_at: String,
}

pub struct MemoryStore {
    conn: Connection,
}

impl MemoryStore {
    pub async fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).await?;
        Self::init(conn).await
    }

    pub async fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS memory_entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id TEXT NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    summary TEXT,
                    embedding BLOB,
                    created_at TEXT NOT NULL
                )
                "#,
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_memory_session ON memory_entries(session_id, id)",
                [],
            )?;
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS memory_sessions (
                    session_id TEXT PRIMARY KEY,
                    started_at TEXT NOT NULL
                )
                "#,
                [],
            )?;
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS user_profiles (
                    session_id TEXT PRIMARY KEY,
                    profile TEXT NOT NULL
                )
                "#,
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(MemoryStore { conn })
    }

    pub async fn add(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        embedding: Option<Vec<f32>>,
    ) -> Result<i64> {
        let session_id = session_id.to_string();
        let content = content.to_string();
        let role_str = serde_json::to_value(role)?
            .as_str()
            .unwrap_or("user")
            .to_string();
        let id = self
            .conn
            .call(move |conn| {
                let now = Utc::now().to_rfc3339();
                conn.execute(
                    "INSERT OR IGNORE INTO memory_sessions (session_id, started_at) VALUES (?1, ?2)",
                    rusqlite::params![session_id, now],
                )?;
                conn.execute(
                    "INSERT INTO memory_entries (session_id, role, content, embedding, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        session_id,
                        role_str,
                        content,
                        embedding.map(|v| vector_to_blob(&v)),
                        now
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    /// The most recent `limit` entries, returned in chronological order
    pub async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<MemoryEntry>> {
        let session_id = session_id.to_string();
        let mut rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, session_id, role, content, summary, embedding, created_at
                     FROM memory_entries WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![session_id, limit as i64], row_to_entry)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        rows.reverse();
        Ok(rows)
    }

    /// Cosine-similarity recall over the session's vectorised entries,
    /// descending by score
    pub async fn similar(
        &self,
        query_vector: &[f32],
        top_k: usize,
        session_id: &str,
    ) -> Result<Vec<(MemoryEntry, f32)>> {
        let session_id = session_id.to_string();
        let entries = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, session_id, role, content, summary, embedding, created_at
                     FROM memory_entries WHERE session_id = ?1 AND embedding IS NOT NULL",
                )?;
                let rows = stmt
                    .query_map([&session_id], row_to_entry)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        let mut scored: Vec<(MemoryEntry, f32)> = entries
            .into_iter()
            .filter_map(|entry| {
                let score = entry
                    .embedding
                    .as_deref()
                    .map(|v| cosine_similarity(query_vector, v))?;
                Some((entry, score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    pub async fn clear_session(&self, session_id: &str) -> Result<usize> {
        let session_id = session_id.to_string();
        let deleted = self
            .conn
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM memory_entries WHERE session_id = ?1",
                    [&session_id],
                )?;
                conn.execute(
                    "DELETE FROM memory_sessions WHERE session_id = ?1",
                    [&session_id],
                )?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted)
    }
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryEntry> {
    let role: String = row.get(2)?;
    let blob: Option<Vec<u8>> = row.get(5)?;
    Ok(MemoryEntry {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: serde_json::from_value(serde_json::Value::String(role)).unwrap_or(Role::User),
        content: row.get(3)?,
        summary: row.get(4)?,
        embedding: blob.map(|b| blob_to_vector(&b)),
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recent_is_chronological() {
        let store = MemoryStore::in_memory().await.unwrap();
        store.add("s1", Role::User, "first", None).await.unwrap();
        store.add("s1", Role::Assistant, "second", None).await.unwrap();
        store.add("s1", Role::User, "third", None).await.unwrap();

        let recent = store.recent("s1", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "second");
        assert_eq!(recent[1].content, "third");
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = MemoryStore::in_memory().await.unwrap();
        store.add("s1", Role::User, "one", None).await.unwrap();
        store.add("s2", Role::User, "two", None).await.unwrap();

        let recent = store.recent("s1", 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "one");
    }

    #[tokio::test]
    async fn test_similar_ranks_by_cosine() {
        let store = MemoryStore::in_memory().await.unwrap();
        store
            .add("s1", Role::User, "about cats", Some(vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        store
            .add("s1", Role::User, "about dogs", Some(vec![0.0, 1.0, 0.0]))
            .await
            .unwrap();
        store
            .add("s1", Role::User, "mixed", Some(vec![0.7, 0.7, 0.0]))
            .await
            .unwrap();

        let hits = store.similar(&[1.0, 0.0, 0.0], 2, "s1").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.content, "about cats");
        assert_eq!(hits[1].0.content, "mixed");
        assert!(hits[0].1 > hits[1].1);
    }

    #[tokio::test]
    async fn test_entries_without_vectors_are_invisible_to_similar() {
        let store = MemoryStore::in_memory().await.unwrap();
        store.add("s1", Role::User, "no vector", None).await.unwrap();
        store
            .add("s1", Role::User, "with vector", Some(vec![0.5, 0.5]))
            .await
            .unwrap();

        let hits = store.similar(&[0.5, 0.5], 10, "s1").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.content, "with vector");
    }

    #[tokio::test]
    async fn test_clear_session() {
        let store = MemoryStore::in_memory().await.unwrap();
        store.add("s1", Role::User, "one", None).await.unwrap();
        store.add("s1", Role::User, "two", None).await.unwrap();
        let deleted = store.clear_session("s1").await.unwrap();
        assert_eq!(deleted, 2);
        assert!(store.recent("s1", 10).await.unwrap().is_empty());
    }

    #[test]
    fn test_vector_blob_round_trip() {
        let vector = vec![0.25_f32, -1.5, 3.75];
        assert_eq!(blob_to_vector(&vector_to_blob(&vector)), vector);
    }
}
