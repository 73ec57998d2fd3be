//! Entity graph store.
//!
//! A small SQLite-backed graph of entities mentioned across turns (people,
//! meetings, places) and their relations. Fed by `graph.entity_linked`
//! ingest, queried by the `bantz graph` ops commands. Importance decays over
//! time so stale entities eventually drop out.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;

/// Entities below this importance are dropped by decay.
const DECAY_DROP_THRESHOLD: f64 = 0.1;

/// One graph entity.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEntity {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub importance: f64,
}

/// Aggregate graph statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphStats {
    pub entity_count: u64,
    pub edge_count: u64,
    pub avg_importance: f64,
}

/// Result of a decay pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecayOutcome {
    pub decayed: u64,
    pub removed: u64,
}

/// SQLite-backed entity graph.
#[derive(Debug, Clone)]
pub struct GraphStore {
    pool: SqlitePool,
}

impl GraphStore {
    /// Open (and create) the store at the given path.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        info!(path = %path.display(), "graph store opened");
        Ok(store)
    }

    /// In-memory store (tests).
    pub async fn open_in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS graph_entities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL DEFAULT 'entity',
                importance REAL NOT NULL DEFAULT 1.0
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS graph_edges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id INTEGER NOT NULL REFERENCES graph_entities(id) ON DELETE CASCADE,
                target_id INTEGER NOT NULL REFERENCES graph_entities(id) ON DELETE CASCADE,
                relation TEXT NOT NULL DEFAULT 'related',
                UNIQUE(source_id, target_id, relation)
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entity_name ON graph_entities(name)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Upsert an entity; repeated mentions bump its importance.
    pub async fn upsert_entity(&self, name: &str, kind: &str) -> anyhow::Result<i64> {
        sqlx::query(
            "INSERT INTO graph_entities (name, kind, importance) VALUES (?1, ?2, 1.0)
             ON CONFLICT(name) DO UPDATE SET importance = importance + 0.1",
        )
        .bind(name)
        .bind(kind)
        .execute(&self.pool)
        .await?;
        let row = sqlx::query("SELECT id FROM graph_entities WHERE name = ?1")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("id"))
    }

    /// Link two entities (upserting both). Returns their ids.
    pub async fn link(
        &self,
        source: &str,
        target: &str,
        relation: &str,
    ) -> anyhow::Result<(i64, i64)> {
        let source_id = self.upsert_entity(source, "entity").await?;
        let target_id = self.upsert_entity(target, "entity").await?;
        sqlx::query(
            "INSERT OR IGNORE INTO graph_edges (source_id, target_id, relation) \
             VALUES (?1, ?2, ?3)",
        )
        .bind(source_id)
        .bind(target_id)
        .bind(relation)
        .execute(&self.pool)
        .await?;
        Ok((source_id, target_id))
    }

    /// Aggregate statistics.
    pub async fn stats(&self) -> anyhow::Result<GraphStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n, COALESCE(AVG(importance), 0.0) AS avg_imp \
             FROM graph_entities",
        )
        .fetch_one(&self.pool)
        .await?;
        let entity_count: i64 = row.get("n");
        let avg_importance: f64 = row.get("avg_imp");
        let edge_row = sqlx::query("SELECT COUNT(*) AS n FROM graph_edges")
            .fetch_one(&self.pool)
            .await?;
        let edge_count: i64 = edge_row.get("n");
        Ok(GraphStats {
            entity_count: u64::try_from(entity_count).unwrap_or(0),
            edge_count: u64::try_from(edge_count).unwrap_or(0),
            avg_importance,
        })
    }

    /// Entities whose name contains the query, by importance.
    pub async fn search(&self, query: &str) -> anyhow::Result<Vec<GraphEntity>> {
        let pattern = format!("%{query}%");
        let rows = sqlx::query(
            "SELECT * FROM graph_entities WHERE name LIKE ?1 ORDER BY importance DESC",
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_entity).collect())
    }

    /// Entities directly connected to the named one, either direction.
    pub async fn neighbors(&self, name: &str) -> anyhow::Result<Vec<GraphEntity>> {
        let rows = sqlx::query(
            "SELECT DISTINCT e.* FROM graph_entities e
             JOIN graph_edges g
               ON (g.target_id = e.id AND g.source_id =
                     (SELECT id FROM graph_entities WHERE name = ?1))
               OR (g.source_id = e.id AND g.target_id =
                     (SELECT id FROM graph_entities WHERE name = ?1))
             ORDER BY e.importance DESC",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_entity).collect())
    }

    /// Multiply every importance by `factor` and drop entities that fall
    /// below the threshold.
    pub async fn decay(&self, factor: f64) -> anyhow::Result<DecayOutcome> {
        let decayed = sqlx::query("UPDATE graph_entities SET importance = importance * ?1")
            .bind(factor)
            .execute(&self.pool)
            .await?
            .rows_affected();
        let removed = sqlx::query("DELETE FROM graph_entities WHERE importance < ?1")
            .bind(DECAY_DROP_THRESHOLD)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(DecayOutcome { decayed, removed })
    }
}

fn row_to_entity(row: &sqlx::sqlite::SqliteRow) -> GraphEntity {
    GraphEntity {
        id: row.get("id"),
        name: row.get("name"),
        kind: row.get("kind"),
        importance: row.get("importance"),
    }
}
