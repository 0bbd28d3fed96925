//! Relational Store (C1, §4.1) — the source-of-truth catalog.
//!
//! Backed by SQLite via `tokio_rusqlite`, with write-ahead journaling and
//! foreign keys enforced at connection open. One writer at a time per
//! connection; multiple readers observe committed state through WAL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use super::{Health, StorageBackend};
use crate::error::{Backend as BackendKind, MnemoError, MnemoResult};
use crate::types::{
    ChatMessage, ChatRole, Chunk, CompactionSnapshot, Link, PatternRecord, Resource, StorageType,
    TodoRecord, TodoStatus,
};

fn storage_err(err: impl std::fmt::Display) -> MnemoError {
    MnemoError::backend_failed(BackendKind::Rs, err.to_string())
}

/// A direction filter for [`RelationalStore::list_links`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    Outgoing,
    Incoming,
    Both,
}

pub struct RelationalStore {
    conn: Connection,
}

impl RelationalStore {
    pub async fn open(path: impl AsRef<Path>) -> MnemoResult<Self> {
        let conn = Connection::open(path).await.map_err(storage_err)?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn open_in_memory() -> MnemoResult<Self> {
        let conn = Connection::open_in_memory().await.map_err(storage_err)?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> MnemoResult<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode = WAL;
                    PRAGMA foreign_keys = ON;

                    CREATE TABLE IF NOT EXISTS Resources (
                        resource_id INTEGER PRIMARY KEY AUTOINCREMENT,
                        file_name TEXT NOT NULL UNIQUE,
                        resource_type TEXT NOT NULL,
                        created_at TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS ResourceChunks (
                        chunk_id INTEGER PRIMARY KEY AUTOINCREMENT,
                        resource_id INTEGER NOT NULL REFERENCES Resources(resource_id) ON DELETE CASCADE,
                        chunk_text TEXT NOT NULL,
                        vector_id INTEGER NOT NULL UNIQUE
                    );
                    CREATE INDEX IF NOT EXISTS idx_chunks_resource ON ResourceChunks(resource_id);
                    CREATE INDEX IF NOT EXISTS idx_chunks_vector ON ResourceChunks(vector_id);

                    CREATE TABLE IF NOT EXISTS ResourceLinks (
                        link_id INTEGER PRIMARY KEY AUTOINCREMENT,
                        source_resource_id INTEGER NOT NULL REFERENCES Resources(resource_id) ON DELETE CASCADE,
                        target_resource_id INTEGER NOT NULL REFERENCES Resources(resource_id) ON DELETE CASCADE,
                        link_type TEXT NOT NULL,
                        weight REAL NOT NULL,
                        metadata TEXT NOT NULL,
                        created_at TEXT NOT NULL,
                        UNIQUE(source_resource_id, target_resource_id, link_type)
                    );
                    CREATE INDEX IF NOT EXISTS idx_links_source ON ResourceLinks(source_resource_id);
                    CREATE INDEX IF NOT EXISTS idx_links_target ON ResourceLinks(target_resource_id);

                    CREATE TABLE IF NOT EXISTS ChatHistory (
                        message_id INTEGER PRIMARY KEY AUTOINCREMENT,
                        conversation_id TEXT NOT NULL,
                        role TEXT NOT NULL,
                        content TEXT NOT NULL,
                        timestamp TEXT NOT NULL,
                        agent_name TEXT,
                        source_tool TEXT,
                        metadata TEXT
                    );
                    CREATE INDEX IF NOT EXISTS idx_chat_conversation ON ChatHistory(conversation_id);
                    CREATE INDEX IF NOT EXISTS idx_chat_source_tool ON ChatHistory(source_tool);

                    CREATE TABLE IF NOT EXISTS ContextLinks (
                        message_id INTEGER NOT NULL REFERENCES ChatHistory(message_id) ON DELETE CASCADE,
                        chunk_id INTEGER NOT NULL REFERENCES ResourceChunks(chunk_id) ON DELETE CASCADE,
                        PRIMARY KEY (message_id, chunk_id)
                    );

                    CREATE TABLE IF NOT EXISTS Summaries (
                        session_id TEXT PRIMARY KEY,
                        full_context TEXT NOT NULL,
                        active_todos TEXT NOT NULL,
                        active_file TEXT,
                        goal TEXT,
                        created_at TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS Todos (
                        todo_id INTEGER PRIMARY KEY AUTOINCREMENT,
                        resource_id INTEGER NOT NULL REFERENCES Resources(resource_id) ON DELETE CASCADE,
                        title TEXT NOT NULL,
                        status TEXT NOT NULL,
                        priority INTEGER NOT NULL,
                        created_at TEXT NOT NULL,
                        completed_at TEXT
                    );

                    CREATE TABLE IF NOT EXISTS Patterns (
                        pattern_id INTEGER PRIMARY KEY AUTOINCREMENT,
                        resource_id INTEGER NOT NULL REFERENCES Resources(resource_id) ON DELETE CASCADE,
                        name TEXT NOT NULL,
                        description TEXT NOT NULL,
                        attempt_count INTEGER NOT NULL DEFAULT 0,
                        success_count INTEGER NOT NULL DEFAULT 0,
                        last_seen_at TEXT NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS VectorIdSequence (
                        id INTEGER PRIMARY KEY CHECK (id = 1),
                        next_value INTEGER NOT NULL
                    );
                    INSERT OR IGNORE INTO VectorIdSequence (id, next_value) VALUES (1, 1);
                    ",
                )?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    /// Allocates a strictly increasing vector id (I2). Implemented as a
    /// single atomic `UPDATE ... RETURNING` against the dedicated sequence
    /// table so concurrent callers never observe or synthesize the same id.
    #[tracing::instrument(skip(self))]
    pub async fn allocate_vector_id(&self) -> MnemoResult<i64> {
        self.conn
            .call(|conn| {
                let tx = conn.transaction()?;
                let allocated: i64 = tx.query_row(
                    "UPDATE VectorIdSequence SET next_value = next_value + 1 WHERE id = 1 RETURNING next_value - 1",
                    [],
                    |row| row.get(0),
                )?;
                tx.commit()?;
                Ok(allocated)
            })
            .await
            .map_err(storage_err)
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_resource(&self, file_name: &str, resource_type: StorageType) -> MnemoResult<Resource> {
        let file_name = file_name.to_string();
        let type_str = resource_type.as_str().to_string();
        let now = Utc::now();

        self.conn
            .call(move |conn| {
                let existing: Option<i64> = conn
                    .query_row(
                        "SELECT resource_id FROM Resources WHERE file_name = ?1",
                        [&file_name],
                        |row| row.get(0),
                    )
                    .optional()?;
                if existing.is_some() {
                    return Err(tokio_rusqlite::Error::Other(
                        "file_name already exists".into(),
                    ));
                }

                conn.execute(
                    "INSERT INTO Resources (file_name, resource_type, created_at) VALUES (?1, ?2, ?3)",
                    (&file_name, &type_str, now.to_rfc3339()),
                )?;
                let resource_id = conn.last_insert_rowid();
                Ok(Resource {
                    resource_id,
                    file_name,
                    resource_type,
                    created_at: now,
                })
            })
            .await
            .map_err(|err| match &err {
                tokio_rusqlite::Error::Other(msg) if msg.to_string() == "file_name already exists" => {
                    MnemoError::conflict("resource with file_name already exists".to_string())
                }
                _ => storage_err(err),
            })
    }

    pub async fn get_resource_by_file_name(&self, file_name: &str) -> MnemoResult<Option<Resource>> {
        let file_name = file_name.to_string();
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT resource_id, file_name, resource_type, created_at FROM Resources WHERE file_name = ?1",
                    [&file_name],
                    row_to_resource,
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(storage_err)
    }

    pub async fn get_resource(&self, resource_id: i64) -> MnemoResult<Option<Resource>> {
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT resource_id, file_name, resource_type, created_at FROM Resources WHERE resource_id = ?1",
                    [resource_id],
                    row_to_resource,
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(storage_err)
    }

    /// Appends chunks for a resource; each `(text, vector_id)` pair must
    /// carry a vector id already allocated via [`Self::allocate_vector_id`].
    #[tracing::instrument(skip(self, chunks))]
    pub async fn append_chunks(
        &self,
        resource_id: i64,
        chunks: Vec<(String, i64)>,
    ) -> MnemoResult<Vec<Chunk>> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut result = Vec::with_capacity(chunks.len());
                for (text, vector_id) in chunks {
                    tx.execute(
                        "INSERT INTO ResourceChunks (resource_id, chunk_text, vector_id) VALUES (?1, ?2, ?3)",
                        (resource_id, &text, vector_id),
                    )?;
                    let chunk_id = tx.last_insert_rowid();
                    result.push(Chunk {
                        chunk_id,
                        resource_id,
                        chunk_text: text,
                        vector_id,
                    });
                }
                tx.commit()?;
                Ok(result)
            })
            .await
            .map_err(storage_err)
    }

    pub async fn get_chunks_by_vector_ids(&self, vector_ids: Vec<i64>) -> MnemoResult<Vec<Chunk>> {
        self.conn
            .call(move |conn| {
                let mut results = Vec::new();
                for vid in vector_ids {
                    if let Some(chunk) = conn
                        .query_row(
                            "SELECT chunk_id, resource_id, chunk_text, vector_id FROM ResourceChunks WHERE vector_id = ?1",
                            [vid],
                            row_to_chunk,
                        )
                        .optional()?
                    {
                        results.push(chunk);
                    }
                }
                Ok(results)
            })
            .await
            .map_err(storage_err)
    }

    pub async fn get_chunks_by_resource(&self, resource_id: i64) -> MnemoResult<Vec<Chunk>> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT chunk_id, resource_id, chunk_text, vector_id FROM ResourceChunks WHERE resource_id = ?1 ORDER BY chunk_id",
                )?;
                let rows = stmt.query_map([resource_id], row_to_chunk)?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
            .map_err(storage_err)
    }

    /// Creates a link, idempotent on `(source, target, link_type)` (AC
    /// idempotence requirement; re-applying the same payload reports
    /// success and leaves the row unchanged but for `weight`/`metadata`,
    /// which are refreshed to the latest call's values).
    #[tracing::instrument(skip(self, metadata))]
    pub async fn create_link(
        &self,
        source_resource_id: i64,
        target_resource_id: i64,
        link_type: &str,
        weight: f64,
        metadata: &str,
    ) -> MnemoResult<Link> {
        let link_type = link_type.to_string();
        let metadata = metadata.to_string();
        let now = Utc::now();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO ResourceLinks (source_resource_id, target_resource_id, link_type, weight, metadata, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(source_resource_id, target_resource_id, link_type)
                     DO UPDATE SET weight = excluded.weight, metadata = excluded.metadata",
                    (source_resource_id, target_resource_id, &link_type, weight, &metadata, now.to_rfc3339()),
                )?;
                conn.query_row(
                    "SELECT link_id, source_resource_id, target_resource_id, link_type, weight, metadata, created_at
                     FROM ResourceLinks WHERE source_resource_id = ?1 AND target_resource_id = ?2 AND link_type = ?3",
                    (source_resource_id, target_resource_id, &link_type),
                    row_to_link,
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(storage_err)
    }

    pub async fn delete_link(&self, link_id: i64) -> MnemoResult<()> {
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM ResourceLinks WHERE link_id = ?1", [link_id])?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    pub async fn list_links(&self, resource_id: i64, direction: LinkDirection) -> MnemoResult<Vec<Link>> {
        self.conn
            .call(move |conn| {
                let query = match direction {
                    LinkDirection::Outgoing => {
                        "SELECT link_id, source_resource_id, target_resource_id, link_type, weight, metadata, created_at
                         FROM ResourceLinks WHERE source_resource_id = ?1"
                    }
                    LinkDirection::Incoming => {
                        "SELECT link_id, source_resource_id, target_resource_id, link_type, weight, metadata, created_at
                         FROM ResourceLinks WHERE target_resource_id = ?1"
                    }
                    LinkDirection::Both => {
                        "SELECT link_id, source_resource_id, target_resource_id, link_type, weight, metadata, created_at
                         FROM ResourceLinks WHERE source_resource_id = ?1 OR target_resource_id = ?1"
                    }
                };
                let mut stmt = conn.prepare(query)?;
                let rows = stmt.query_map([resource_id], row_to_link)?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
            .map_err(storage_err)
    }

    #[tracing::instrument(skip(self, content, metadata))]
    pub async fn log_chat_message(
        &self,
        conversation_id: &str,
        role: ChatRole,
        content: &str,
        agent_name: Option<&str>,
        source_tool: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) -> MnemoResult<ChatMessage> {
        let conversation_id = conversation_id.to_string();
        let role_str = role.as_str().to_string();
        let content = content.to_string();
        let agent_name = agent_name.map(|s| s.to_string());
        let source_tool = source_tool.map(|s| s.to_string());
        let metadata = metadata.cloned();
        let metadata_str = metadata.as_ref().map(|m| m.to_string());
        let now = Utc::now();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO ChatHistory (conversation_id, role, content, timestamp, agent_name, source_tool, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    (&conversation_id, &role_str, &content, now.to_rfc3339(), &agent_name, &source_tool, &metadata_str),
                )?;
                let message_id = conn.last_insert_rowid();
                Ok(ChatMessage {
                    message_id,
                    conversation_id,
                    role,
                    content,
                    timestamp: now,
                    agent_name,
                    source_tool,
                    metadata,
                })
            })
            .await
            .map_err(storage_err)
    }

    pub async fn get_chat_by_tool(&self, tool: &str, limit: usize) -> MnemoResult<Vec<ChatMessage>> {
        let tool = tool.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT message_id, conversation_id, role, content, timestamp, agent_name, source_tool, metadata
                     FROM ChatHistory WHERE source_tool = ?1 ORDER BY message_id DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map((tool, limit as i64), row_to_chat_message)?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
            .map_err(storage_err)
    }

    /// Vector ids reachable from a conversation through its logged messages'
    /// context links, used to scope VI's conversation-filtered search.
    pub async fn vector_ids_for_conversation(&self, conversation_id: &str) -> MnemoResult<Vec<i64>> {
        let conversation_id = conversation_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT DISTINCT rc.vector_id
                     FROM ChatHistory ch
                     JOIN ContextLinks cl ON cl.message_id = ch.message_id
                     JOIN ResourceChunks rc ON rc.chunk_id = cl.chunk_id
                     WHERE ch.conversation_id = ?1",
                )?;
                let rows = stmt.query_map([&conversation_id], |row| row.get(0))?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
            .map_err(storage_err)
    }

    pub async fn store_context_links(&self, message_id: i64, chunk_ids: Vec<i64>) -> MnemoResult<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for chunk_id in chunk_ids {
                    tx.execute(
                        "INSERT OR IGNORE INTO ContextLinks (message_id, chunk_id) VALUES (?1, ?2)",
                        (message_id, chunk_id),
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    pub async fn store_compaction_snapshot(&self, snapshot: &CompactionSnapshot) -> MnemoResult<()> {
        let snapshot = snapshot.clone();
        self.conn
            .call(move |conn| {
                let todos_json = serde_json::to_string(&snapshot.active_todos)
                    .map_err(|e| tokio_rusqlite::Error::Other(e.to_string().into()))?;
                conn.execute(
                    "INSERT INTO Summaries (session_id, full_context, active_todos, active_file, goal, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(session_id) DO UPDATE SET full_context = excluded.full_context,
                        active_todos = excluded.active_todos, active_file = excluded.active_file,
                        goal = excluded.goal, created_at = excluded.created_at",
                    (
                        &snapshot.session_id,
                        &snapshot.full_context,
                        &todos_json,
                        &snapshot.active_file,
                        &snapshot.goal,
                        snapshot.created_at.to_rfc3339(),
                    ),
                )?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    pub async fn record_pattern_attempt(&self, pattern_id: i64, success: bool) -> MnemoResult<PatternRecord> {
        let now = Utc::now();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE Patterns SET attempt_count = attempt_count + 1,
                        success_count = success_count + ?2, last_seen_at = ?3 WHERE pattern_id = ?1",
                    (pattern_id, success as i64, now.to_rfc3339()),
                )?;
                conn.query_row(
                    "SELECT pattern_id, resource_id, name, description, attempt_count, success_count, last_seen_at
                     FROM Patterns WHERE pattern_id = ?1",
                    [pattern_id],
                    row_to_pattern,
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(storage_err)
    }

    pub async fn create_pattern(&self, resource_id: i64, name: &str, description: &str) -> MnemoResult<PatternRecord> {
        let name = name.to_string();
        let description = description.to_string();
        let now = Utc::now();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO Patterns (resource_id, name, description, attempt_count, success_count, last_seen_at)
                     VALUES (?1, ?2, ?3, 0, 0, ?4)",
                    (resource_id, &name, &description, now.to_rfc3339()),
                )?;
                let pattern_id = conn.last_insert_rowid();
                Ok(PatternRecord {
                    pattern_id,
                    resource_id,
                    name,
                    description,
                    attempt_count: 0,
                    success_count: 0,
                    last_seen_at: now,
                })
            })
            .await
            .map_err(storage_err)
    }

    pub async fn create_todo(&self, resource_id: i64, title: &str, priority: i64) -> MnemoResult<TodoRecord> {
        let title = title.to_string();
        let now = Utc::now();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO Todos (resource_id, title, status, priority, created_at, completed_at)
                     VALUES (?1, ?2, 'open', ?3, ?4, NULL)",
                    (resource_id, &title, priority, now.to_rfc3339()),
                )?;
                let todo_id = conn.last_insert_rowid();
                Ok(TodoRecord {
                    todo_id,
                    resource_id,
                    title,
                    status: TodoStatus::Open,
                    priority,
                    created_at: now,
                    completed_at: None,
                })
            })
            .await
            .map_err(storage_err)
    }

    /// Deletes a resource, cascading to its chunks, links, and context links
    /// in one commit (I3). Foreign keys with `ON DELETE CASCADE` do the
    /// cascading; this wraps it in an explicit transaction so the statement
    /// count (and therefore the atomicity story) is visible at the call site.
    #[tracing::instrument(skip(self))]
    pub async fn delete_resource(&self, resource_id: i64) -> MnemoResult<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("PRAGMA foreign_keys = ON", [])?;
                tx.execute("DELETE FROM Resources WHERE resource_id = ?1", [resource_id])?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }
}

fn row_to_resource(row: &rusqlite::Row<'_>) -> rusqlite::Result<Resource> {
    let type_str: String = row.get(2)?;
    let created_at: String = row.get(3)?;
    Ok(Resource {
        resource_id: row.get(0)?,
        file_name: row.get(1)?,
        resource_type: type_str.parse().unwrap_or(StorageType::Document),
        created_at: parse_timestamp(&created_at),
    })
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    Ok(Chunk {
        chunk_id: row.get(0)?,
        resource_id: row.get(1)?,
        chunk_text: row.get(2)?,
        vector_id: row.get(3)?,
    })
}

fn row_to_link(row: &rusqlite::Row<'_>) -> rusqlite::Result<Link> {
    let created_at: String = row.get(6)?;
    Ok(Link {
        link_id: row.get(0)?,
        source_resource_id: row.get(1)?,
        target_resource_id: row.get(2)?,
        link_type: row.get(3)?,
        weight: row.get(4)?,
        metadata: row.get(5)?,
        created_at: parse_timestamp(&created_at),
    })
}

fn row_to_chat_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let role_str: String = row.get(2)?;
    let timestamp: String = row.get(4)?;
    let metadata_str: Option<String> = row.get(7)?;
    Ok(ChatMessage {
        message_id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: role_str.parse().unwrap_or(ChatRole::User),
        content: row.get(3)?,
        timestamp: parse_timestamp(&timestamp),
        agent_name: row.get(5)?,
        source_tool: row.get(6)?,
        metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

fn row_to_pattern(row: &rusqlite::Row<'_>) -> rusqlite::Result<PatternRecord> {
    let last_seen: String = row.get(6)?;
    Ok(PatternRecord {
        pattern_id: row.get(0)?,
        resource_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        attempt_count: row.get(4)?,
        success_count: row.get(5)?,
        last_seen_at: parse_timestamp(&last_seen),
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl StorageBackend for RelationalStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Rs
    }

    async fn exists(&self, key: &str) -> MnemoResult<bool> {
        let resource_id: i64 = key
            .parse()
            .map_err(|_| MnemoError::invalid_input("RS key must be a resource id"))?;
        Ok(self.get_resource(resource_id).await?.is_some())
    }

    async fn delete(&self, key: &str) -> MnemoResult<()> {
        let resource_id: i64 = key
            .parse()
            .map_err(|_| MnemoError::invalid_input("RS key must be a resource id"))?;
        self.delete_resource(resource_id).await
    }

    async fn health(&self) -> Health {
        match self.conn.call(|conn| conn.query_row("SELECT 1", [], |_| Ok(())).map_err(tokio_rusqlite::Error::Rusqlite)).await {
            Ok(_) => Health::Up,
            Err(err) => Health::Down(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> RelationalStore {
        RelationalStore::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn create_and_fetch_resource_round_trips() {
        let rs = store().await;
        let resource = rs.create_resource("ml_intro.md", StorageType::Document).await.unwrap();
        assert_eq!(resource.file_name, "ml_intro.md");

        let fetched = rs.get_resource_by_file_name("ml_intro.md").await.unwrap().unwrap();
        assert_eq!(fetched.resource_id, resource.resource_id);
    }

    #[tokio::test]
    async fn duplicate_file_name_conflicts() {
        let rs = store().await;
        rs.create_resource("dup.md", StorageType::Document).await.unwrap();
        let err = rs.create_resource("dup.md", StorageType::Document).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn vector_id_allocation_is_strictly_increasing() {
        let rs = store().await;
        let a = rs.allocate_vector_id().await.unwrap();
        let b = rs.allocate_vector_id().await.unwrap();
        let c = rs.allocate_vector_id().await.unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[tokio::test]
    async fn vector_id_allocation_is_unique_under_concurrency() {
        let rs = std::sync::Arc::new(store().await);
        let mut handles = Vec::new();
        for _ in 0..10 {
            let rs = rs.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..100 {
                    ids.push(rs.allocate_vector_id().await.unwrap());
                }
                ids
            }));
        }
        let mut all_ids = Vec::new();
        for handle in handles {
            all_ids.extend(handle.await.unwrap());
        }
        all_ids.sort_unstable();
        let before = all_ids.len();
        all_ids.dedup();
        assert_eq!(all_ids.len(), before, "allocate_vector_id produced a duplicate");
        assert_eq!(all_ids.len(), 1000);
    }

    #[tokio::test]
    async fn delete_resource_cascades_to_chunks_and_links() {
        let rs = store().await;
        let a = rs.create_resource("a.md", StorageType::Document).await.unwrap();
        let b = rs.create_resource("b.md", StorageType::Document).await.unwrap();

        let vid = rs.allocate_vector_id().await.unwrap();
        rs.append_chunks(a.resource_id, vec![("hello".to_string(), vid)]).await.unwrap();
        rs.create_link(a.resource_id, b.resource_id, "related", 0.5, "{}").await.unwrap();

        rs.delete_resource(a.resource_id).await.unwrap();

        assert!(rs.get_resource(a.resource_id).await.unwrap().is_none());
        assert!(rs.get_chunks_by_resource(a.resource_id).await.unwrap().is_empty());
        assert!(rs.list_links(b.resource_id, LinkDirection::Incoming).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_link_is_idempotent() {
        let rs = store().await;
        let a = rs.create_resource("a.md", StorageType::Document).await.unwrap();
        let b = rs.create_resource("b.md", StorageType::Document).await.unwrap();

        let first = rs.create_link(a.resource_id, b.resource_id, "semantic_similarity_test", 0.85, r#"{"k":"v"}"#).await.unwrap();
        let second = rs.create_link(a.resource_id, b.resource_id, "semantic_similarity_test", 0.85, r#"{"k":"v"}"#).await.unwrap();

        assert_eq!(first.link_id, second.link_id);
        let links = rs.list_links(a.resource_id, LinkDirection::Outgoing).await.unwrap();
        assert_eq!(links.len(), 1);
    }
}
