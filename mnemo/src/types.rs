//! Shared data model (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MnemoError;

/// The semantic category of a stored item; determines routing (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    Document,
    Code,
    Note,
    Chat,
    Blueprint,
    Task,
    Pattern,
    CacheEntry,
    ChainOfThought,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Document => "document",
            StorageType::Code => "code",
            StorageType::Note => "note",
            StorageType::Chat => "chat",
            StorageType::Blueprint => "blueprint",
            StorageType::Task => "task",
            StorageType::Pattern => "pattern",
            StorageType::CacheEntry => "cache_entry",
            StorageType::ChainOfThought => "chain_of_thought",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = MnemoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "document" => StorageType::Document,
            "code" => StorageType::Code,
            "note" => StorageType::Note,
            "chat" => StorageType::Chat,
            "blueprint" => StorageType::Blueprint,
            "task" | "tasks" | "todo" => StorageType::Task,
            "pattern" => StorageType::Pattern,
            "cache_entry" => StorageType::CacheEntry,
            "chain_of_thought" => StorageType::ChainOfThought,
            other => {
                return Err(MnemoError::invalid_input(format!(
                    "unknown resource type '{other}'"
                )))
            }
        })
    }
}

/// A top-level stored item (§3 Resource). Owned by RS; never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub resource_id: i64,
    pub file_name: String,
    pub resource_type: StorageType,
    pub created_at: DateTime<Utc>,
}

/// A sub-range of a resource's text, with its own vector (§3 Chunk).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: i64,
    pub resource_id: i64,
    pub chunk_text: String,
    pub vector_id: i64,
}

/// A `(vector_id, embedding)` pair held in VI.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub vector_id: i64,
    pub embedding: Vec<f32>,
}

/// The UIL view of any stored item (§3 Universal document).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniversalDocument {
    pub universal_id: String,
    pub content_preview: String,
    pub content_hash: String,
    pub storage_type: StorageType,
    pub source_database: String,
    pub indexed_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl UniversalDocument {
    /// `"<type>:<primary_db>:<original_id>"`.
    pub fn make_universal_id(storage_type: StorageType, source_database: &str, original_id: &str) -> String {
        format!("{storage_type}:{source_database}:{original_id}")
    }

    /// Splits a universal id back into its three parts.
    pub fn parse_universal_id(universal_id: &str) -> Option<(StorageType, String, String)> {
        let mut parts = universal_id.splitn(3, ':');
        let storage_type = StorageType::from_str(parts.next()?).ok()?;
        let source_database = parts.next()?.to_string();
        let original_id = parts.next()?.to_string();
        Some((storage_type, source_database, original_id))
    }
}

/// A typed directed edge between two resources (§3 Link).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub link_id: i64,
    pub source_resource_id: i64,
    pub target_resource_id: i64,
    pub link_type: String,
    pub weight: f64,
    pub metadata: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::System => "system",
        }
    }
}

impl FromStr for ChatRole {
    type Err = MnemoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "user" => ChatRole::User,
            "assistant" => ChatRole::Assistant,
            "system" => ChatRole::System,
            other => {
                return Err(MnemoError::invalid_input(format!("unknown chat role '{other}'")))
            }
        })
    }
}

/// `(message_id, conversation_id, role, content, timestamp, ...)` (§3 Chat message).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: i64,
    pub conversation_id: String,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub agent_name: Option<String>,
    pub source_tool: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Records which chunks contributed to which message's context (§3 Context link).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextLink {
    pub message_id: i64,
    pub chunk_id: i64,
}

/// `(session_id, full_context, active_todos, active_file, goal, created_at)` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionSnapshot {
    pub session_id: String,
    pub full_context: String,
    pub active_todos: Vec<String>,
    pub active_file: Option<String>,
    pub goal: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Derived record containing only what is needed to resume a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeanContext {
    pub session_id: String,
    pub goal: Option<String>,
    pub active_file: Option<String>,
    pub active_todos: Vec<String>,
    pub summary: String,
}

impl LeanContext {
    pub fn derive_from(snapshot: &CompactionSnapshot, summary: String) -> Self {
        Self {
            session_id: snapshot.session_id.clone(),
            goal: snapshot.goal.clone(),
            active_file: snapshot.active_file.clone(),
            active_todos: snapshot.active_todos.clone(),
            summary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Open,
    InProgress,
    Done,
    Cancelled,
}

/// Supplemented: tracked repeated-solution patterns (§3 Pattern record).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRecord {
    pub pattern_id: i64,
    pub resource_id: i64,
    pub name: String,
    pub description: String,
    pub attempt_count: i64,
    pub success_count: i64,
    pub last_seen_at: DateTime<Utc>,
}

/// Supplemented: a tracked task/todo item (§3 Todo record).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoRecord {
    pub todo_id: i64,
    pub resource_id: i64,
    pub title: String,
    pub status: TodoStatus,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn universal_id_round_trips() {
        let id = UniversalDocument::make_universal_id(StorageType::Document, "rs", "42");
        assert_eq!(id, "document:rs:42");
        let (st, db, original) = UniversalDocument::parse_universal_id(&id).unwrap();
        assert_eq!(st, StorageType::Document);
        assert_eq!(db, "rs");
        assert_eq!(original, "42");
    }

    #[test]
    fn storage_type_round_trips_through_str() {
        for st in [
            StorageType::Document,
            StorageType::Code,
            StorageType::Note,
            StorageType::Chat,
            StorageType::Blueprint,
            StorageType::Task,
            StorageType::Pattern,
            StorageType::CacheEntry,
            StorageType::ChainOfThought,
        ] {
            let parsed: StorageType = st.as_str().parse().unwrap();
            assert_eq!(parsed, st);
        }
    }
}
