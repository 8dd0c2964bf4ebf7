//! Schema Registry (C1): a persisted catalog of data sources and their
//! table/collection schemas, with keyword and content search.
//!
//! Mirrors the read/write surface the core actually needs from a relational
//! store — not a general query layer. The default backend is in-memory; the
//! `postgres-registry` feature adds a `tokio-postgres`-backed implementation
//! against three tables: `data_sources`, `table_meta`, `ontology_mapping`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, StorageError};

/// The closed set of data-source kinds the core understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Row-oriented relational databases (Postgres, MySQL, ...).
    Relational,
    /// Document stores (MongoDB, Elasticsearch, ...).
    Document,
    /// Vector/embedding stores.
    Vector,
    /// Chat/message-log stores (Slack, support tickets, ...).
    ChatLog,
    /// E-commerce platform APIs.
    Ecommerce,
    /// Analytics platform APIs.
    AnalyticsApi,
    /// Any source kind the registry doesn't have a dedicated variant for.
    Other,
}

impl SourceKind {
    /// The default per-source concurrency limit the scheduler (C12) applies
    /// to this kind.
    #[must_use]
    pub fn default_concurrency_limit(self) -> usize {
        match self {
            SourceKind::Relational => 8,
            SourceKind::Document => 6,
            SourceKind::Vector => 4,
            SourceKind::ChatLog => 2,
            SourceKind::Ecommerce => 3,
            SourceKind::AnalyticsApi | SourceKind::Other => 4,
        }
    }
}

/// Identity and bookkeeping for one registered data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    /// Stable identifier, assigned by the caller at registration time.
    pub id: String,
    /// Connection URI. May rotate without changing `id`.
    pub uri: String,
    /// The source kind.
    pub kind: SourceKind,
    /// Monotonically increasing version, bumped on every upsert.
    pub version: u64,
    /// Last time this row was written.
    pub updated_at: DateTime<Utc>,
}

/// Schema for a single table/collection within a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    /// The owning data source's id.
    pub source_id: String,
    /// Table/collection name.
    pub table_name: String,
    /// Driver-defined schema payload; the registry treats this as opaque
    /// except for full-text search over its serialized form.
    pub schema_json: serde_json::Value,
    /// Monotonically increasing version, bumped on every upsert.
    pub version: u64,
    /// Last time this row was written.
    pub updated_at: DateTime<Utc>,
}

/// A business-level alias mapping a domain entity name to qualified tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OntologyMapping {
    /// The domain term, e.g. `"customer"`.
    pub entity_name: String,
    /// Qualified `source_id.table_name` strings this entity resolves to.
    pub tables: Vec<String>,
}

/// The Schema Registry's read/write surface (C1 operations).
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// List all registered data sources.
    async fn list_sources(&self) -> Result<Vec<DataSource>>;

    /// Fetch one data source by id.
    async fn get_source(&self, id: &str) -> Result<Option<DataSource>>;

    /// Insert or update a data source, keyed on `id`.
    async fn upsert_source(&self, id: &str, uri: &str, kind: SourceKind) -> Result<DataSource>;

    /// Delete a data source and cascade-delete its table metadata.
    async fn delete_source(&self, id: &str) -> Result<bool>;

    /// List all tables registered under a source.
    async fn list_tables(&self, source_id: &str) -> Result<Vec<TableMetadata>>;

    /// Insert or update a table's schema, keyed on `(source_id, table_name)`.
    async fn upsert_table(
        &self,
        source_id: &str,
        table_name: &str,
        schema: serde_json::Value,
    ) -> Result<TableMetadata>;

    /// Fetch one table's schema.
    async fn get_table(&self, source_id: &str, table_name: &str) -> Result<Option<TableMetadata>>;

    /// Delete one table's schema.
    async fn delete_table(&self, source_id: &str, table_name: &str) -> Result<bool>;

    /// Set (overwrite) the ontology mapping for a business entity.
    async fn set_ontology(&self, entity: &str, tables: Vec<String>) -> Result<()>;

    /// Get the ontology mapping for a business entity, if any.
    async fn get_ontology(&self, entity: &str) -> Result<Option<OntologyMapping>>;

    /// Case-insensitive substring search over table names, ordered by
    /// `(source_id, table_name)`.
    async fn search_tables_by_name(&self, pattern: &str) -> Result<Vec<TableMetadata>>;

    /// Case-insensitive substring search over serialized schema content,
    /// ordered by `(source_id, table_name)`.
    async fn search_schema_content(&self, pattern: &str) -> Result<Vec<TableMetadata>>;
}

/// In-memory [`SchemaRegistry`] implementation. Default backend; also used
/// in tests for every other backend-agnostic component.
#[derive(Default)]
pub struct InMemorySchemaRegistry {
    inner: parking_lot::RwLock<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    sources: BTreeMap<String, DataSource>,
    // Keyed by (source_id, table_name) via a composite string to preserve
    // the deterministic `(source_id, table_name)` ordering via BTreeMap.
    tables: BTreeMap<(String, String), TableMetadata>,
    ontology: BTreeMap<String, OntologyMapping>,
}

impl InMemorySchemaRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SchemaRegistry for InMemorySchemaRegistry {
    async fn list_sources(&self) -> Result<Vec<DataSource>> {
        Ok(self.inner.read().sources.values().cloned().collect())
    }

    async fn get_source(&self, id: &str) -> Result<Option<DataSource>> {
        Ok(self.inner.read().sources.get(id).cloned())
    }

    async fn upsert_source(&self, id: &str, uri: &str, kind: SourceKind) -> Result<DataSource> {
        let mut guard = self.inner.write();
        let version = guard.sources.get(id).map_or(1, |s| s.version + 1);
        let source = DataSource {
            id: id.to_string(),
            uri: uri.to_string(),
            kind,
            version,
            updated_at: Utc::now(),
        };
        guard.sources.insert(id.to_string(), source.clone());
        Ok(source)
    }

    async fn delete_source(&self, id: &str) -> Result<bool> {
        let mut guard = self.inner.write();
        let existed = guard.sources.remove(id).is_some();
        guard.tables.retain(|(sid, _), _| sid != id);
        Ok(existed)
    }

    async fn list_tables(&self, source_id: &str) -> Result<Vec<TableMetadata>> {
        Ok(self
            .inner
            .read()
            .tables
            .iter()
            .filter(|((sid, _), _)| sid == source_id)
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn upsert_table(
        &self,
        source_id: &str,
        table_name: &str,
        schema: serde_json::Value,
    ) -> Result<TableMetadata> {
        let mut guard = self.inner.write();
        let key = (source_id.to_string(), table_name.to_string());
        let version = guard.tables.get(&key).map_or(1, |t| t.version + 1);
        let table = TableMetadata {
            source_id: source_id.to_string(),
            table_name: table_name.to_string(),
            schema_json: schema,
            version,
            updated_at: Utc::now(),
        };
        guard.tables.insert(key, table.clone());
        Ok(table)
    }

    async fn get_table(&self, source_id: &str, table_name: &str) -> Result<Option<TableMetadata>> {
        Ok(self
            .inner
            .read()
            .tables
            .get(&(source_id.to_string(), table_name.to_string()))
            .cloned())
    }

    async fn delete_table(&self, source_id: &str, table_name: &str) -> Result<bool> {
        Ok(self
            .inner
            .write()
            .tables
            .remove(&(source_id.to_string(), table_name.to_string()))
            .is_some())
    }

    async fn set_ontology(&self, entity: &str, tables: Vec<String>) -> Result<()> {
        self.inner.write().ontology.insert(
            entity.to_string(),
            OntologyMapping {
                entity_name: entity.to_string(),
                tables,
            },
        );
        Ok(())
    }

    async fn get_ontology(&self, entity: &str) -> Result<Option<OntologyMapping>> {
        Ok(self.inner.read().ontology.get(entity).cloned())
    }

    async fn search_tables_by_name(&self, pattern: &str) -> Result<Vec<TableMetadata>> {
        let needle = pattern.to_lowercase();
        // BTreeMap iteration is already ordered by (source_id, table_name).
        Ok(self
            .inner
            .read()
            .tables
            .values()
            .filter(|t| t.table_name.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn search_schema_content(&self, pattern: &str) -> Result<Vec<TableMetadata>> {
        let needle = pattern.to_lowercase();
        Ok(self
            .inner
            .read()
            .tables
            .values()
            .filter(|t| t.schema_json.to_string().to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }
}

/// Wraps any backend error into a [`StorageError`] tagged with `backend`.
pub(crate) fn backend_error(backend: &str, detail: impl std::fmt::Display) -> StorageError {
    StorageError::Backend {
        backend: backend.to_string(),
        detail: detail.to_string(),
    }
}

#[cfg(feature = "postgres-registry")]
pub mod postgres {
    //! `tokio-postgres`-backed [`SchemaRegistry`] against three tables:
    //! `data_sources`, `table_meta`, `ontology_mapping`, pooled with
    //! `deadpool-postgres`.

    use super::{backend_error, DataSource, OntologyMapping, SchemaRegistry, SourceKind, TableMetadata};
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use chrono::Utc;
    use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
    use tokio_postgres::{NoTls, Row};

    const SCHEMA_SQL: &str = r#"
        CREATE TABLE IF NOT EXISTS data_sources (
            id TEXT PRIMARY KEY,
            uri TEXT NOT NULL,
            type TEXT NOT NULL,
            version BIGINT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        );
        CREATE TABLE IF NOT EXISTS table_meta (
            source_id TEXT NOT NULL,
            table_name TEXT NOT NULL,
            schema_json JSONB NOT NULL,
            version BIGINT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (source_id, table_name)
        );
        CREATE TABLE IF NOT EXISTS ontology_mapping (
            entity_name TEXT PRIMARY KEY,
            source_tables_json JSONB NOT NULL
        );
    "#;

    /// Postgres-backed schema registry.
    pub struct PostgresSchemaRegistry {
        pool: Pool,
    }

    impl PostgresSchemaRegistry {
        /// Connect and ensure the registry's tables exist.
        pub async fn connect(database_url: &str) -> Result<Self> {
            let pg_config: tokio_postgres::Config = database_url
                .parse()
                .map_err(|e| Error::Storage(backend_error("postgres", e)))?;

            let mut pool_config = Config::new();
            pool_config.host = pg_config.get_hosts().first().map(|h| match h {
                tokio_postgres::config::Host::Tcp(s) => s.clone(),
                #[cfg(unix)]
                tokio_postgres::config::Host::Unix(p) => p.to_string_lossy().to_string(),
            });
            pool_config.port = pg_config.get_ports().first().copied();
            pool_config.user = pg_config.get_user().map(String::from);
            pool_config.password = pg_config
                .get_password()
                .map(|p| String::from_utf8_lossy(p).to_string());
            pool_config.dbname = pg_config.get_dbname().map(String::from);
            pool_config.manager = Some(ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            });

            let pool = pool_config
                .create_pool(Some(Runtime::Tokio1), NoTls)
                .map_err(|e| Error::Storage(backend_error("postgres", e)))?;

            let registry = Self { pool };
            registry.ensure_schema().await?;
            Ok(registry)
        }

        /// Build a registry from an already-configured pool.
        #[must_use]
        pub fn with_pool(pool: Pool) -> Self {
            Self { pool }
        }

        async fn client(&self) -> Result<deadpool_postgres::Client> {
            self.pool.get().await.map_err(|e| Error::Storage(backend_error("postgres", e)))
        }

        async fn ensure_schema(&self) -> Result<()> {
            let client = self.client().await?;
            client
                .batch_execute(SCHEMA_SQL)
                .await
                .map_err(|e| Error::Storage(backend_error("postgres", e)))?;
            Ok(())
        }

        fn kind_to_str(kind: SourceKind) -> &'static str {
            match kind {
                SourceKind::Relational => "relational",
                SourceKind::Document => "document",
                SourceKind::Vector => "vector",
                SourceKind::ChatLog => "chat-log",
                SourceKind::Ecommerce => "e-commerce",
                SourceKind::AnalyticsApi => "analytics-api",
                SourceKind::Other => "other",
            }
        }

        fn str_to_kind(s: &str) -> SourceKind {
            match s {
                "relational" => SourceKind::Relational,
                "document" => SourceKind::Document,
                "vector" => SourceKind::Vector,
                "chat-log" => SourceKind::ChatLog,
                "e-commerce" => SourceKind::Ecommerce,
                "analytics-api" => SourceKind::AnalyticsApi,
                _ => SourceKind::Other,
            }
        }
    }

    #[async_trait]
    impl SchemaRegistry for PostgresSchemaRegistry {
        async fn list_sources(&self) -> Result<Vec<DataSource>> {
            let client = self.client().await?;
            let rows = client
                .query("SELECT id, uri, type, version, updated_at FROM data_sources ORDER BY id", &[])
                .await
                .map_err(|e| Error::Storage(backend_error("postgres", e)))?;
            Ok(rows.iter().map(row_to_source).collect())
        }

        async fn get_source(&self, id: &str) -> Result<Option<DataSource>> {
            let client = self.client().await?;
            let row = client
                .query_opt(
                    "SELECT id, uri, type, version, updated_at FROM data_sources WHERE id = $1",
                    &[&id],
                )
                .await
                .map_err(|e| Error::Storage(backend_error("postgres", e)))?;
            Ok(row.as_ref().map(row_to_source))
        }

        async fn upsert_source(&self, id: &str, uri: &str, kind: SourceKind) -> Result<DataSource> {
            let client = self.client().await?;
            let now = Utc::now();
            let kind_str = Self::kind_to_str(kind);
            let row = client
                .query_one(
                    r#"
                    INSERT INTO data_sources (id, uri, type, version, updated_at)
                    VALUES ($1, $2, $3, 1, $4)
                    ON CONFLICT (id) DO UPDATE SET
                        uri = EXCLUDED.uri,
                        type = EXCLUDED.type,
                        version = data_sources.version + 1,
                        updated_at = EXCLUDED.updated_at
                    RETURNING id, uri, type, version, updated_at
                    "#,
                    &[&id, &uri, &kind_str, &now],
                )
                .await
                .map_err(|e| Error::Storage(backend_error("postgres", e)))?;
            Ok(row_to_source(&row))
        }

        async fn delete_source(&self, id: &str) -> Result<bool> {
            let mut client = self.client().await?;
            let tx = client
                .transaction()
                .await
                .map_err(|e| Error::Storage(backend_error("postgres", e)))?;
            tx.execute("DELETE FROM table_meta WHERE source_id = $1", &[&id])
                .await
                .map_err(|e| Error::Storage(backend_error("postgres", e)))?;
            let affected = tx
                .execute("DELETE FROM data_sources WHERE id = $1", &[&id])
                .await
                .map_err(|e| Error::Storage(backend_error("postgres", e)))?;
            tx.commit().await.map_err(|e| Error::Storage(backend_error("postgres", e)))?;
            Ok(affected > 0)
        }

        async fn list_tables(&self, source_id: &str) -> Result<Vec<TableMetadata>> {
            let client = self.client().await?;
            let rows = client
                .query(
                    "SELECT source_id, table_name, schema_json, version, updated_at FROM table_meta \
                     WHERE source_id = $1 ORDER BY source_id, table_name",
                    &[&source_id],
                )
                .await
                .map_err(|e| Error::Storage(backend_error("postgres", e)))?;
            Ok(rows.iter().map(row_to_table).collect())
        }

        async fn upsert_table(
            &self,
            source_id: &str,
            table_name: &str,
            schema: serde_json::Value,
        ) -> Result<TableMetadata> {
            let client = self.client().await?;
            let now = Utc::now();
            let row = client
                .query_one(
                    r#"
                    INSERT INTO table_meta (source_id, table_name, schema_json, version, updated_at)
                    VALUES ($1, $2, $3, 1, $4)
                    ON CONFLICT (source_id, table_name) DO UPDATE SET
                        schema_json = EXCLUDED.schema_json,
                        version = table_meta.version + 1,
                        updated_at = EXCLUDED.updated_at
                    RETURNING source_id, table_name, schema_json, version, updated_at
                    "#,
                    &[&source_id, &table_name, &schema, &now],
                )
                .await
                .map_err(|e| Error::Storage(backend_error("postgres", e)))?;
            Ok(row_to_table(&row))
        }

        async fn get_table(&self, source_id: &str, table_name: &str) -> Result<Option<TableMetadata>> {
            let client = self.client().await?;
            let row = client
                .query_opt(
                    "SELECT source_id, table_name, schema_json, version, updated_at FROM table_meta \
                     WHERE source_id = $1 AND table_name = $2",
                    &[&source_id, &table_name],
                )
                .await
                .map_err(|e| Error::Storage(backend_error("postgres", e)))?;
            Ok(row.as_ref().map(row_to_table))
        }

        async fn delete_table(&self, source_id: &str, table_name: &str) -> Result<bool> {
            let client = self.client().await?;
            let affected = client
                .execute(
                    "DELETE FROM table_meta WHERE source_id = $1 AND table_name = $2",
                    &[&source_id, &table_name],
                )
                .await
                .map_err(|e| Error::Storage(backend_error("postgres", e)))?;
            Ok(affected > 0)
        }

        async fn set_ontology(&self, entity: &str, tables: Vec<String>) -> Result<()> {
            let client = self.client().await?;
            let payload = serde_json::to_value(&tables).unwrap_or(serde_json::Value::Array(vec![]));
            client
                .execute(
                    r#"
                    INSERT INTO ontology_mapping (entity_name, source_tables_json)
                    VALUES ($1, $2)
                    ON CONFLICT (entity_name) DO UPDATE SET source_tables_json = EXCLUDED.source_tables_json
                    "#,
                    &[&entity, &payload],
                )
                .await
                .map_err(|e| Error::Storage(backend_error("postgres", e)))?;
            Ok(())
        }

        async fn get_ontology(&self, entity: &str) -> Result<Option<OntologyMapping>> {
            let client = self.client().await?;
            let row = client
                .query_opt(
                    "SELECT entity_name, source_tables_json FROM ontology_mapping WHERE entity_name = $1",
                    &[&entity],
                )
                .await
                .map_err(|e| Error::Storage(backend_error("postgres", e)))?;
            Ok(row.map(|r| {
                let payload: serde_json::Value = r.get("source_tables_json");
                let tables: Vec<String> = serde_json::from_value(payload).unwrap_or_default();
                OntologyMapping {
                    entity_name: r.get("entity_name"),
                    tables,
                }
            }))
        }

        async fn search_tables_by_name(&self, pattern: &str) -> Result<Vec<TableMetadata>> {
            let client = self.client().await?;
            let like = format!("%{}%", pattern.to_lowercase());
            let rows = client
                .query(
                    "SELECT source_id, table_name, schema_json, version, updated_at FROM table_meta \
                     WHERE LOWER(table_name) LIKE $1 ORDER BY source_id, table_name",
                    &[&like],
                )
                .await
                .map_err(|e| Error::Storage(backend_error("postgres", e)))?;
            Ok(rows.iter().map(row_to_table).collect())
        }

        async fn search_schema_content(&self, pattern: &str) -> Result<Vec<TableMetadata>> {
            let client = self.client().await?;
            let like = format!("%{}%", pattern.to_lowercase());
            let rows = client
                .query(
                    "SELECT source_id, table_name, schema_json, version, updated_at FROM table_meta \
                     WHERE LOWER(schema_json::text) LIKE $1 ORDER BY source_id, table_name",
                    &[&like],
                )
                .await
                .map_err(|e| Error::Storage(backend_error("postgres", e)))?;
            Ok(rows.iter().map(row_to_table).collect())
        }
    }

    fn row_to_source(r: &Row) -> DataSource {
        DataSource {
            id: r.get("id"),
            uri: r.get("uri"),
            kind: PostgresSchemaRegistry::str_to_kind(r.get::<_, String>("type").as_str()),
            version: r.get::<_, i64>("version") as u64,
            updated_at: r.get("updated_at"),
        }
    }

    fn row_to_table(r: &Row) -> TableMetadata {
        TableMetadata {
            source_id: r.get("source_id"),
            table_name: r.get("table_name"),
            schema_json: r.get("schema_json"),
            version: r.get::<_, i64>("version") as u64,
            updated_at: r.get("updated_at"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let reg = InMemorySchemaRegistry::new();
        let created = reg
            .upsert_source("s1", "postgres://localhost/db", SourceKind::Relational)
            .await
            .unwrap();
        let fetched = reg.get_source("s1").await.unwrap().unwrap();
        assert_eq!(created.id, fetched.id);
        assert_eq!(created.uri, fetched.uri);
        assert_eq!(created.kind, fetched.kind);
    }

    #[tokio::test]
    async fn upsert_is_conflict_on_key_and_bumps_version() {
        let reg = InMemorySchemaRegistry::new();
        reg.upsert_source("s1", "uri-a", SourceKind::Relational).await.unwrap();
        let second = reg.upsert_source("s1", "uri-b", SourceKind::Relational).await.unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.uri, "uri-b");
        assert_eq!(reg.list_sources().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_source_cascades_to_tables() {
        let reg = InMemorySchemaRegistry::new();
        reg.upsert_source("s1", "uri", SourceKind::Document).await.unwrap();
        reg.upsert_table("s1", "t1", serde_json::json!({"cols": []}))
            .await
            .unwrap();
        assert!(reg.delete_source("s1").await.unwrap());
        assert!(reg.list_tables("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_is_case_insensitive_and_ordered() {
        let reg = InMemorySchemaRegistry::new();
        reg.upsert_source("b", "uri", SourceKind::Relational).await.unwrap();
        reg.upsert_source("a", "uri", SourceKind::Relational).await.unwrap();
        reg.upsert_table("b", "Users", serde_json::json!({})).await.unwrap();
        reg.upsert_table("a", "customer_users", serde_json::json!({})).await.unwrap();

        let results = reg.search_tables_by_name("USER").await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source_id, "a");
        assert_eq!(results[1].source_id, "b");
    }

    #[tokio::test]
    async fn search_schema_content_matches_serialized_json() {
        let reg = InMemorySchemaRegistry::new();
        reg.upsert_source("s1", "uri", SourceKind::Relational).await.unwrap();
        reg.upsert_table("s1", "orders", serde_json::json!({"columns": ["order_total"]}))
            .await
            .unwrap();
        let results = reg.search_schema_content("order_total").await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn ontology_set_and_get_round_trip() {
        let reg = InMemorySchemaRegistry::new();
        reg.set_ontology("customer", vec!["s1.users".to_string()])
            .await
            .unwrap();
        let mapping = reg.get_ontology("customer").await.unwrap().unwrap();
        assert_eq!(mapping.tables, vec!["s1.users".to_string()]);
    }

    #[test]
    fn default_concurrency_limits_match_spec() {
        assert_eq!(SourceKind::Relational.default_concurrency_limit(), 8);
        assert_eq!(SourceKind::Document.default_concurrency_limit(), 6);
        assert_eq!(SourceKind::Vector.default_concurrency_limit(), 4);
        assert_eq!(SourceKind::ChatLog.default_concurrency_limit(), 2);
        assert_eq!(SourceKind::Ecommerce.default_concurrency_limit(), 3);
        assert_eq!(SourceKind::Other.default_concurrency_limit(), 4);
    }
}
