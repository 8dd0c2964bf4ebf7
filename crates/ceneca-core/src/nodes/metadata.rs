//! Metadata Node: resolves `identified_sources` into a unified schema
//! bundle and the flat `source_id.table_name` list the Planning Node
//! consumes.
//!
//! Per §4.11, metadata is fetched from each identified source's adapter in
//! parallel, up to a bounded fan-out. The fan-out width is chosen adaptively
//! from the classification confidence and how many sources are in play: a
//! confident, narrow classification can afford to go wide per source
//! (`focused`), while a low-confidence or broad set of candidates is safer
//! fetched more conservatively (`exploratory`).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::adapter::{AdapterRegistry, Deadline, MetadataBundle, TableSummary};
use crate::error::Result;
use crate::registry::{SchemaRegistry, SourceKind};
use crate::workflow_state::{CommonPatterns, DatabaseInfo, StepRecord, UnifiedSchemaBundle, WorkflowState};

/// Which of the four fan-out strategies the Metadata Node used for one run
/// (§4.11: "focused, balanced, broad-parallel, exploratory").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataStrategy {
    /// High confidence, few targets: fetch every source's metadata at once.
    Focused,
    /// High confidence, many targets, or moderate confidence with few:
    /// a middling fan-out.
    Balanced,
    /// Many targets regardless of confidence: wide fan-out, since each
    /// individual fetch is likely cheap relative to the total count.
    BroadParallel,
    /// Low confidence: fetch conservatively, one source at a time, so a
    /// misidentified source doesn't waste parallel adapter capacity.
    Exploratory,
}

impl MetadataStrategy {
    /// Pick a strategy from the classifier's confidence (`[0, 1]`) and how
    /// many sources were identified.
    #[must_use]
    pub fn choose(confidence: f32, target_count: usize) -> Self {
        if confidence < 0.5 {
            MetadataStrategy::Exploratory
        } else if target_count > 4 {
            MetadataStrategy::BroadParallel
        } else if confidence >= 0.85 && target_count <= 2 {
            MetadataStrategy::Focused
        } else {
            MetadataStrategy::Balanced
        }
    }

    /// Maximum number of concurrent `get_metadata` calls this strategy
    /// permits.
    #[must_use]
    pub fn fan_out(self) -> usize {
        match self {
            MetadataStrategy::Focused => 8,
            MetadataStrategy::Balanced => 4,
            MetadataStrategy::BroadParallel => 6,
            MetadataStrategy::Exploratory => 1,
        }
    }
}

/// Fetches each identified source's table metadata from the registry and
/// (best-effort, bounded-fan-out) its adapter.
pub struct MetadataNode {
    registry: Arc<dyn SchemaRegistry>,
    adapters: Arc<AdapterRegistry>,
}

impl MetadataNode {
    /// Construct a node over the given registry and adapter registry.
    #[must_use]
    pub fn new(registry: Arc<dyn SchemaRegistry>, adapters: Arc<AdapterRegistry>) -> Self {
        Self { registry, adapters }
    }

    /// Populate `state.available_tables`, `state.schema_metadata`, and
    /// `state.unified_metadata` from the registry's current catalog and
    /// each source's adapter, for every identified source.
    pub async fn run(&self, state: &mut WorkflowState) -> Result<()> {
        let strategy = MetadataStrategy::choose(state.last_classification_confidence, state.identified_sources.len());
        self.fetch_adapter_metadata(&state.identified_sources, strategy).await;

        let mut available_tables = Vec::new();
        let mut schema_metadata: HashMap<String, MetadataBundle> = HashMap::new();
        let mut source_kinds: HashMap<String, SourceKind> = HashMap::new();

        for source_id in &state.identified_sources {
            let kind = self.registry.get_source(source_id).await?.map(|s| s.kind).unwrap_or(SourceKind::Other);
            source_kinds.insert(source_id.clone(), kind);

            let tables = self.registry.list_tables(source_id).await?;
            let summaries: Vec<TableSummary> = tables
                .iter()
                .map(|t| TableSummary {
                    name: t.table_name.clone(),
                    columns: extract_columns(&t.schema_json),
                    row_count: None,
                })
                .collect();
            for table in &tables {
                available_tables.push(format!("{source_id}.{}", table.table_name));
            }
            schema_metadata.insert(source_id.clone(), MetadataBundle { tables: summaries });
        }

        state.unified_metadata = Some(build_unified_bundle(&source_kinds, &schema_metadata, &available_tables));
        state.available_tables = available_tables;
        state.schema_metadata = schema_metadata;
        state.step_history.push(StepRecord {
            node_id: "metadata".to_string(),
            summary: format!(
                "resolved {} table(s) across {} source(s), strategy={strategy:?}",
                state.available_tables.len(),
                state.identified_sources.len()
            ),
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    /// Call each identified source's adapter's `get_metadata` in parallel,
    /// bounded by `strategy`'s fan-out. Results are discarded here (the
    /// registry remains the source of truth for table names/columns); this
    /// call exists so a live adapter can surface driver-side freshness or
    /// connectivity problems before planning commits to a source. A failing
    /// or missing adapter is not fatal — the registry-backed metadata still
    /// stands.
    async fn fetch_adapter_metadata(&self, source_ids: &[String], strategy: MetadataStrategy) {
        let semaphore = Arc::new(Semaphore::new(strategy.fan_out().max(1)));
        let deadline = Deadline::after(std::time::Duration::from_secs(30));
        let mut handles = Vec::with_capacity(source_ids.len());
        for source_id in source_ids {
            let Some(adapter) = self.adapters.get(source_id) else {
                continue;
            };
            let sem = semaphore.clone();
            let deadline = deadline.clone();
            let source_id = source_id.clone();
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await;
                if let Err(err) = adapter.get_metadata(None, &deadline).await {
                    tracing::warn!(%source_id, %err, "adapter metadata fetch failed; falling back to registry-only metadata");
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

fn build_unified_bundle(
    source_kinds: &HashMap<String, SourceKind>,
    schema_metadata: &HashMap<String, MetadataBundle>,
    global_tables: &[String],
) -> UnifiedSchemaBundle {
    let mut databases: HashMap<SourceKind, DatabaseInfo> = HashMap::new();
    let mut table_name_to_sources: HashMap<String, Vec<String>> = HashMap::new();

    for (source_id, kind) in source_kinds {
        let info = databases.entry(*kind).or_insert_with(|| DatabaseInfo {
            status: "unavailable".to_string(),
            key_tables: Vec::new(),
            column_type_histogram: HashMap::new(),
            indexing_info: Vec::new(),
        });
        if let Some(bundle) = schema_metadata.get(source_id) {
            info.status = "ok".to_string();
            for table in &bundle.tables {
                if info.key_tables.len() < 5 {
                    info.key_tables.push(table.name.clone());
                }
                for column in &table.columns {
                    *info.column_type_histogram.entry(column.clone()).or_insert(0) += 1;
                    let lower = column.to_lowercase();
                    let hint = format!("{}.{column}", table.name);
                    if (lower == "id" || lower.ends_with("_id")) && !info.indexing_info.contains(&hint) {
                        info.indexing_info.push(hint);
                    }
                }
                table_name_to_sources.entry(table.name.clone()).or_default().push(source_id.clone());
            }
        }
    }

    let mut common_table_names: Vec<String> = table_name_to_sources
        .iter()
        .filter(|(_, sources)| sources.len() > 1)
        .map(|(name, _)| name.clone())
        .collect();
    common_table_names.sort();

    let mut relationship_pairs: std::collections::HashSet<(String, String)> = std::collections::HashSet::new();
    for sources in table_name_to_sources.values().filter(|s| s.len() > 1) {
        let mut sorted = sources.clone();
        sorted.sort();
        sorted.dedup();
        for i in 0..sorted.len() {
            for j in (i + 1)..sorted.len() {
                relationship_pairs.insert((sorted[i].clone(), sorted[j].clone()));
            }
        }
    }
    let mut cross_database_relationships: Vec<(String, String)> = relationship_pairs.into_iter().collect();
    cross_database_relationships.sort();

    UnifiedSchemaBundle {
        databases,
        global_tables: global_tables.to_vec(),
        common_patterns: CommonPatterns {
            common_table_names,
            cross_database_relationships,
        },
    }
}

/// Best-effort column extraction from a driver-defined schema blob: looks
/// for a top-level `columns` array of strings, otherwise reports none.
fn extract_columns(schema_json: &serde_json::Value) -> Vec<String> {
    schema_json
        .get("columns")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}
