//! Graph Store (C3, §4.3) — a labeled property graph over `Document` nodes.
//!
//! Traversal lives in an in-process [`petgraph::stable_graph::StableDiGraph`]
//! for O(1) neighbor lookups; durability comes from a dedicated SQLite table
//! the graph is rebuilt from on open, so a restart never loses adjacency
//! state without needing a second class of database process (§4.3,
//! supplemented). `StableDiGraph` (rather than `petgraph::graph::DiGraph`)
//! is load-bearing: plain `DiGraph::remove_node` swap-removes, which would
//! invalidate `node_index`'s entries for whichever node used to be last.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tokio_rusqlite::Connection;

use super::{Health, StorageBackend};
use crate::error::{Backend as BackendKind, MnemoError, MnemoResult};

fn relationship_type_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("relationship type regex is valid"))
}

/// Validates a relationship type against the allowed character set (G1)
/// before it is ever interpolated into a query or used as a structural key.
pub fn validate_relationship_type(link_type: &str) -> MnemoResult<()> {
    if relationship_type_pattern().is_match(link_type) {
        Ok(())
    } else {
        Err(MnemoError::invalid_input(format!(
            "relationship type '{link_type}' must match ^[A-Za-z_][A-Za-z0-9_]*$"
        )))
    }
}

#[derive(Debug, Clone)]
struct NodeData {
    resource_id: i64,
    properties: serde_json::Value,
}

#[derive(Debug, Clone)]
struct EdgeData {
    link_type: String,
    weight: f64,
    metadata: String,
    created_at: DateTime<Utc>,
}

/// A relationship as returned by [`GraphStore::get_relationships`].
#[derive(Debug, Clone)]
pub struct Relationship {
    pub source_resource_id: i64,
    pub target_resource_id: i64,
    pub link_type: String,
    pub weight: f64,
    pub metadata: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipDirection {
    Outgoing,
    Incoming,
    Both,
}

struct GraphInner {
    // `StableDiGraph` keeps a node's `NodeIndex` valid across removal of any
    // other node (unlike `petgraph::graph::DiGraph`, which swap-removes and
    // would silently invalidate `node_index`'s entries).
    graph: StableDiGraph<NodeData, EdgeData>,
    node_index: HashMap<i64, NodeIndex>,
}

pub struct GraphStore {
    inner: RwLock<GraphInner>,
    conn: Connection,
}

fn storage_err(err: impl std::fmt::Display) -> MnemoError {
    MnemoError::backend_failed(BackendKind::Gs, err.to_string())
}

impl GraphStore {
    pub async fn open(path: impl AsRef<Path>) -> MnemoResult<Self> {
        let conn = Connection::open(path).await.map_err(storage_err)?;
        Self::from_connection(conn).await
    }

    pub async fn open_in_memory() -> MnemoResult<Self> {
        let conn = Connection::open_in_memory().await.map_err(storage_err)?;
        Self::from_connection(conn).await
    }

    async fn from_connection(conn: Connection) -> MnemoResult<Self> {
        conn.call(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS GraphNodes (
                    resource_id INTEGER PRIMARY KEY,
                    properties TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS GraphEdges (
                    source_resource_id INTEGER NOT NULL,
                    target_resource_id INTEGER NOT NULL,
                    link_type TEXT NOT NULL,
                    weight REAL NOT NULL,
                    metadata TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (source_resource_id, target_resource_id, link_type)
                );
                ",
            )?;
            Ok(())
        })
        .await
        .map_err(storage_err)?;

        let (nodes, edges) = conn
            .call(|conn| {
                let mut node_stmt = conn.prepare("SELECT resource_id, properties FROM GraphNodes")?;
                let nodes: Vec<(i64, String)> = node_stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<_>>()?;

                let mut edge_stmt = conn.prepare(
                    "SELECT source_resource_id, target_resource_id, link_type, weight, metadata, created_at FROM GraphEdges",
                )?;
                let edges: Vec<(i64, i64, String, f64, String, String)> = edge_stmt
                    .query_map([], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
                    })?
                    .collect::<rusqlite::Result<_>>()?;

                Ok((nodes, edges))
            })
            .await
            .map_err(storage_err)?;

        let mut graph = StableDiGraph::new();
        let mut node_index = HashMap::new();
        for (resource_id, properties_raw) in nodes {
            let properties: serde_json::Value = serde_json::from_str(&properties_raw).unwrap_or(serde_json::Value::Null);
            let idx = graph.add_node(NodeData { resource_id, properties });
            node_index.insert(resource_id, idx);
        }
        for (source, target, link_type, weight, metadata, created_at) in edges {
            if let (Some(&s), Some(&t)) = (node_index.get(&source), node_index.get(&target)) {
                graph.add_edge(
                    s,
                    t,
                    EdgeData {
                        link_type,
                        weight,
                        metadata,
                        created_at: parse_timestamp(&created_at),
                    },
                );
            }
        }

        Ok(Self {
            inner: RwLock::new(GraphInner { graph, node_index }),
            conn,
        })
    }

    /// Creates the node if absent, otherwise refreshes its properties (G2).
    #[tracing::instrument(skip(self, properties))]
    pub async fn upsert_document_node(&self, resource_id: i64, properties: serde_json::Value) -> MnemoResult<()> {
        {
            let mut inner = self.inner.write();
            match inner.node_index.get(&resource_id).copied() {
                Some(idx) => inner.graph[idx].properties = properties.clone(),
                None => {
                    let idx = inner.graph.add_node(NodeData {
                        resource_id,
                        properties: properties.clone(),
                    });
                    inner.node_index.insert(resource_id, idx);
                }
            }
        }

        let properties_str = properties.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO GraphNodes (resource_id, properties) VALUES (?1, ?2)
                     ON CONFLICT(resource_id) DO UPDATE SET properties = excluded.properties",
                    (resource_id, &properties_str),
                )?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    pub async fn delete_document_node(&self, resource_id: i64) -> MnemoResult<()> {
        {
            let mut inner = self.inner.write();
            if let Some(idx) = inner.node_index.remove(&resource_id) {
                inner.graph.remove_node(idx);
            }
        }

        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM GraphEdges WHERE source_resource_id = ?1 OR target_resource_id = ?1", [resource_id])?;
                conn.execute("DELETE FROM GraphNodes WHERE resource_id = ?1", [resource_id])?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    /// Records `source -> target` typed `link_type`, idempotent on the
    /// triple (G3): re-applying with the same properties is a no-op that
    /// still reports success.
    #[tracing::instrument(skip(self, metadata))]
    pub async fn create_relationship(
        &self,
        source_resource_id: i64,
        target_resource_id: i64,
        link_type: &str,
        weight: f64,
        metadata: &str,
        created_at: DateTime<Utc>,
    ) -> MnemoResult<()> {
        validate_relationship_type(link_type)?;

        {
            let mut inner = self.inner.write();
            let source_idx = *inner
                .node_index
                .get(&source_resource_id)
                .ok_or_else(|| MnemoError::not_found(format!("graph node {source_resource_id} not found")))?;
            let target_idx = *inner
                .node_index
                .get(&target_resource_id)
                .ok_or_else(|| MnemoError::not_found(format!("graph node {target_resource_id} not found")))?;

            let existing = inner
                .graph
                .edges_connecting(source_idx, target_idx)
                .find(|e| e.weight().link_type == link_type)
                .map(|e| e.id());

            let data = EdgeData {
                link_type: link_type.to_string(),
                weight,
                metadata: metadata.to_string(),
                created_at,
            };
            match existing {
                Some(edge_id) => inner.graph[edge_id] = data,
                None => {
                    inner.graph.add_edge(source_idx, target_idx, data);
                }
            }
        }

        let link_type = link_type.to_string();
        let metadata = metadata.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO GraphEdges (source_resource_id, target_resource_id, link_type, weight, metadata, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(source_resource_id, target_resource_id, link_type)
                     DO UPDATE SET weight = excluded.weight, metadata = excluded.metadata, created_at = excluded.created_at",
                    (source_resource_id, target_resource_id, &link_type, weight, &metadata, created_at.to_rfc3339()),
                )?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    pub async fn get_relationships(
        &self,
        resource_id: i64,
        direction: RelationshipDirection,
    ) -> MnemoResult<Vec<Relationship>> {
        let inner = self.inner.read();
        let Some(&idx) = inner.node_index.get(&resource_id) else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        if matches!(direction, RelationshipDirection::Outgoing | RelationshipDirection::Both) {
            for edge in inner.graph.edges_directed(idx, Direction::Outgoing) {
                let target = inner.graph[edge.target()].resource_id;
                out.push(Relationship {
                    source_resource_id: resource_id,
                    target_resource_id: target,
                    link_type: edge.weight().link_type.clone(),
                    weight: edge.weight().weight,
                    metadata: edge.weight().metadata.clone(),
                    created_at: edge.weight().created_at,
                });
            }
        }
        if matches!(direction, RelationshipDirection::Incoming | RelationshipDirection::Both) {
            for edge in inner.graph.edges_directed(idx, Direction::Incoming) {
                let source = inner.graph[edge.source()].resource_id;
                out.push(Relationship {
                    source_resource_id: source,
                    target_resource_id: resource_id,
                    link_type: edge.weight().link_type.clone(),
                    weight: edge.weight().weight,
                    metadata: edge.weight().metadata.clone(),
                    created_at: edge.weight().created_at,
                });
            }
        }
        Ok(out)
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().graph.node_count()
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl StorageBackend for GraphStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Gs
    }

    async fn exists(&self, key: &str) -> MnemoResult<bool> {
        let resource_id: i64 = key
            .parse()
            .map_err(|_| MnemoError::invalid_input("GS key must be a resource id"))?;
        Ok(self.inner.read().node_index.contains_key(&resource_id))
    }

    async fn delete(&self, key: &str) -> MnemoResult<()> {
        let resource_id: i64 = key
            .parse()
            .map_err(|_| MnemoError::invalid_input("GS key must be a resource id"))?;
        self.delete_document_node(resource_id).await
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

    #[tokio::test]
    async fn upsert_then_relate_round_trips() {
        let gs = GraphStore::open_in_memory().await.unwrap();
        gs.upsert_document_node(1, serde_json::json!({"file_name": "a.md"})).await.unwrap();
        gs.upsert_document_node(2, serde_json::json!({"file_name": "b.md"})).await.unwrap();

        gs.create_relationship(1, 2, "REFERENCES", 0.9, "{}", Utc::now()).await.unwrap();

        let rels = gs.get_relationships(1, RelationshipDirection::Outgoing).await.unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].link_type, "REFERENCES");
        assert_eq!(rels[0].target_resource_id, 2);
    }

    #[tokio::test]
    async fn invalid_relationship_type_is_rejected() {
        let gs = GraphStore::open_in_memory().await.unwrap();
        gs.upsert_document_node(1, serde_json::json!({})).await.unwrap();
        gs.upsert_document_node(2, serde_json::json!({})).await.unwrap();

        let err = gs.create_relationship(1, 2, "relates-to; DROP TABLE", 1.0, "{}", Utc::now()).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn create_relationship_is_idempotent() {
        let gs = GraphStore::open_in_memory().await.unwrap();
        gs.upsert_document_node(1, serde_json::json!({})).await.unwrap();
        gs.upsert_document_node(2, serde_json::json!({})).await.unwrap();

        let now = Utc::now();
        gs.create_relationship(1, 2, "REFERENCES", 0.5, "{}", now).await.unwrap();
        gs.create_relationship(1, 2, "REFERENCES", 0.5, "{}", now).await.unwrap();

        let rels = gs.get_relationships(1, RelationshipDirection::Outgoing).await.unwrap();
        assert_eq!(rels.len(), 1);
    }

    #[tokio::test]
    async fn delete_document_node_removes_edges() {
        let gs = GraphStore::open_in_memory().await.unwrap();
        gs.upsert_document_node(1, serde_json::json!({})).await.unwrap();
        gs.upsert_document_node(2, serde_json::json!({})).await.unwrap();
        gs.create_relationship(1, 2, "REFERENCES", 0.5, "{}", Utc::now()).await.unwrap();

        gs.delete_document_node(1).await.unwrap();
        assert_eq!(gs.node_count(), 1);
    }

    /// A `DiGraph`'s `remove_node` swap-removes, silently invalidating the
    /// surviving node's index; `StableDiGraph` must not exhibit that.
    #[tokio::test]
    async fn surviving_node_index_stays_valid_after_a_sibling_is_deleted() {
        let gs = GraphStore::open_in_memory().await.unwrap();
        gs.upsert_document_node(1, serde_json::json!({})).await.unwrap();
        gs.upsert_document_node(2, serde_json::json!({})).await.unwrap();

        gs.delete_document_node(1).await.unwrap();

        gs.upsert_document_node(3, serde_json::json!({})).await.unwrap();
        gs.create_relationship(2, 3, "REFERENCES", 1.0, "{}", Utc::now()).await.unwrap();

        let rels = gs.get_relationships(2, RelationshipDirection::Outgoing).await.unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].target_resource_id, 3);
    }
}
