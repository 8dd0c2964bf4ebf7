//! Workflow State & Bridge (C8): the typed state bag threaded through every
//! phase node, plus the legacy-session bridge.
//!
//! Uses a typed record plus a small `patch` helper in place of a
//! heterogeneous dict-shaped state, keeping the same incremental-update
//! ergonomics without the loss of type safety.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::adapter::MetadataBundle;
use crate::completion::StreamEvent;
use crate::error::{Error, Result, StorageError};
use crate::registry::SourceKind;
use crate::scheduler::{OperationResult, Plan};

/// Maximum number of streaming events retained in a [`WorkflowState`]'s
/// buffer before the oldest is dropped (§3, §5 "Backpressure").
pub const STREAMING_BUFFER_CAPACITY: usize = 100;

/// User-tunable knobs threaded through a request (§3's "user preferences").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferences {
    /// Caller-requested cap on concurrent operations, independent of the
    /// scheduler's per-source/global caps.
    pub max_parallel_operations: usize,
    /// Whether the caller wants streamed progress at all.
    pub streaming: bool,
    /// Whether the Planning Node may apply optimization passes.
    pub auto_optimize: bool,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            max_parallel_operations: 4,
            streaming: true,
            auto_optimize: true,
        }
    }
}

/// Minimum acceptable quality for a finished workflow (§3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityThresholds {
    /// Minimum fraction of requested data considered "complete".
    pub completeness: f64,
    /// Minimum acceptable classification/planning confidence.
    pub confidence: f64,
    /// Minimum acceptable tool success rate.
    pub performance: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            completeness: 0.8,
            confidence: 0.7,
            performance: 0.9,
        }
    }
}

/// Per-request timeout settings (§3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Per-operation deadline.
    pub per_op: std::time::Duration,
    /// Whole-workflow deadline.
    pub total: std::time::Duration,
    /// How long a streaming consumer may go without a new event before the
    /// stream is considered idle.
    pub streaming_idle: std::time::Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            per_op: std::time::Duration::from_secs(60),
            total: std::time::Duration::from_secs(300),
            streaming_idle: std::time::Duration::from_secs(5),
        }
    }
}

/// One entry in a workflow's error history (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Which phase/node raised this error.
    pub node_id: String,
    /// Human-readable detail.
    pub detail: String,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
}

/// One entry in the per-step history recorded as nodes run (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// The node that ran.
    pub node_id: String,
    /// A short human-readable summary of what it did.
    pub summary: String,
    /// When the step completed.
    pub timestamp: DateTime<Utc>,
}

/// A single tool (adapter operation) invocation, recorded for the audit
/// trail independent of the scheduler's own [`OperationResult`] (the
/// aggregator's `tool_execution` capture mirrors this).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionRecord {
    /// The tool/operation id.
    pub tool_id: String,
    /// Whether it succeeded.
    pub success: bool,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Performance metrics accumulated over a workflow's lifetime (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Total wall-clock time spent in phase nodes, in milliseconds.
    pub total_node_time_ms: u64,
    /// Total wall-clock time spent in the scheduler, in milliseconds.
    pub total_execution_time_ms: u64,
    /// Number of operations dispatched.
    pub operations_dispatched: u64,
    /// Number of operations that failed (any reason).
    pub operations_failed: u64,
}

/// Per-source-kind rollup within the Metadata Node's unified bundle
/// (§4.11).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseInfo {
    /// `"ok"` if metadata was resolved for at least one source of this
    /// kind, `"unavailable"` otherwise.
    pub status: String,
    /// Up to five representative table names for this kind.
    pub key_tables: Vec<String>,
    /// Column name frequency across every resolved table of this kind,
    /// standing in for a type histogram where the driver's `schema_json`
    /// carries no machine-checkable type tag (the registry treats it as
    /// opaque content, per §4.1).
    pub column_type_histogram: HashMap<String, u32>,
    /// Columns observed under an `"id"`-suffixed or `"id"`-named key, as a
    /// best-effort index hint — the registry's opaque `schema_json` carries
    /// no real index metadata, so this is a naming heuristic, not a driver
    /// fact.
    pub indexing_info: Vec<String>,
}

/// Cross-source structural overlap observed while building the Metadata
/// Node's bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommonPatterns {
    /// Table names that appear under more than one source.
    pub common_table_names: Vec<String>,
    /// `(source_a, source_b)` pairs sharing at least one table name.
    pub cross_database_relationships: Vec<(String, String)>,
}

/// The Metadata Node's unified schema bundle (§4.11): `{databases: {kind →
/// {status, key_tables, column_type_histogram, indexing_info}},
/// global_tables, common_patterns}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedSchemaBundle {
    /// Per-source-kind rollup.
    pub databases: HashMap<SourceKind, DatabaseInfo>,
    /// Every `source_id.table_name` resolved across all identified sources.
    pub global_tables: Vec<String>,
    /// Cross-source structural overlap.
    pub common_patterns: CommonPatterns,
}

/// Which high-level kind of workflow this state represents. Distinct from
/// the [`crate::orchestrator`] route (`traditional`/`hybrid`/`langgraph`):
/// this tags the request itself, the route tags how it was served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowKind {
    /// A cross-data-source analysis request — the normal case.
    DataAnalysis,
    /// A caller-specified custom workflow kind, for extension points that
    /// don't warrant a new variant here.
    Custom(String),
}

/// The per-in-flight-request state bag threaded through every phase node
/// (§3's Workflow State).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    /// This state's own (graph) session id.
    pub session_id: String,
    /// The natural-language question being answered.
    pub question: String,
    /// What kind of workflow this is.
    pub workflow_kind: WorkflowKind,

    /// Source ids the Classification Node identified as relevant.
    pub identified_sources: Vec<String>,
    /// Why each identified source was picked, keyed by source id (§4.11
    /// "per-source reasoning").
    pub source_reasoning: HashMap<String, String>,
    /// Whether the identified sources span more than one distinct source
    /// kind (§4.11 "cross-source flag").
    pub cross_source: bool,
    /// `source_id.table_name` strings available across identified sources.
    pub available_tables: Vec<String>,
    /// The Metadata Node's per-source schema bundle, keyed by source id.
    pub schema_metadata: HashMap<String, MetadataBundle>,
    /// The Metadata Node's cross-source unified bundle (§4.11), once it has
    /// run.
    pub unified_metadata: Option<UnifiedSchemaBundle>,
    /// The Classification Node's most recent confidence, used by the
    /// Metadata Node to pick an adaptive fan-out strategy (§4.11).
    pub last_classification_confidence: f32,

    /// The Planning Node's output.
    pub execution_plan: Option<Plan>,

    /// One entry per completed phase node.
    pub step_history: Vec<StepRecord>,
    /// Per-operation results, keyed by operation id.
    pub operation_results: HashMap<String, OperationResult>,
    /// Rows captured so far, before final synthesis.
    pub partial_results: Vec<serde_json::Value>,
    /// The final synthesized result, once available.
    pub final_result: Option<serde_json::Value>,

    /// Bounded FIFO streaming buffer; oldest events are dropped once
    /// [`STREAMING_BUFFER_CAPACITY`] is exceeded.
    pub streaming_buffer: VecDeque<StreamEvent>,

    /// Errors raised by any phase, in order.
    pub error_history: Vec<ErrorRecord>,
    /// How many times this workflow has been retried end-to-end.
    pub retry_count: u32,

    /// Tool (adapter operation) ids selected by planning.
    pub selected_tools: Vec<String>,
    /// Audit history of tool invocations.
    pub tool_execution_history: Vec<ToolExecutionRecord>,

    /// Accumulated performance metrics.
    pub performance_metrics: PerformanceMetrics,
    /// Caller preferences.
    pub user_preferences: UserPreferences,
    /// Minimum acceptable quality.
    pub quality_thresholds: QualityThresholds,
    /// Deadlines for this workflow.
    pub timeout_settings: TimeoutSettings,

    /// Classification confidence cache, keyed by a hash of the question, so
    /// repeated classification within a session is a cache hit (§4.11).
    pub classification_cache: HashMap<u64, crate::classifier::ClassificationDecision>,

    /// When this state was created.
    pub created_at: DateTime<Utc>,
    /// When this state was last updated by any phase.
    pub last_update_timestamp: DateTime<Utc>,
}

impl WorkflowState {
    /// A fresh state for a new request, with every default from §3/§9
    /// applied.
    #[must_use]
    pub fn new(session_id: impl Into<String>, question: impl Into<String>, kind: WorkflowKind) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            question: question.into(),
            workflow_kind: kind,
            identified_sources: Vec::new(),
            source_reasoning: HashMap::new(),
            cross_source: false,
            available_tables: Vec::new(),
            schema_metadata: HashMap::new(),
            unified_metadata: None,
            last_classification_confidence: 0.0,
            execution_plan: None,
            step_history: Vec::new(),
            operation_results: HashMap::new(),
            partial_results: Vec::new(),
            final_result: None,
            streaming_buffer: VecDeque::new(),
            error_history: Vec::new(),
            retry_count: 0,
            selected_tools: Vec::new(),
            tool_execution_history: Vec::new(),
            performance_metrics: PerformanceMetrics::default(),
            user_preferences: UserPreferences::default(),
            quality_thresholds: QualityThresholds::default(),
            timeout_settings: TimeoutSettings::default(),
            classification_cache: HashMap::new(),
            created_at: now,
            last_update_timestamp: now,
        }
    }

    /// Push a streaming event, dropping the oldest if the buffer is full.
    pub fn push_streaming_event(&mut self, event: StreamEvent) {
        if self.streaming_buffer.len() >= STREAMING_BUFFER_CAPACITY {
            self.streaming_buffer.pop_front();
        }
        self.streaming_buffer.push_back(event);
    }

    /// Record an operation result, mirroring it into `partial_results` when
    /// it succeeded.
    pub fn record_operation_result(&mut self, op_id: String, result: OperationResult) {
        if let crate::scheduler::OperationOutcome::Success { rows } = &result.outcome {
            self.partial_results.extend(rows.iter().cloned());
        }
        self.operation_results.insert(op_id, result);
    }

    /// Record an error without losing any state already mutated (§4.11's
    /// node contract: fail without leaving partial mutations is about the
    /// *caller's* mutation, not about losing the error itself).
    pub fn record_error(&mut self, node_id: impl Into<String>, detail: impl Into<String>) {
        self.error_history.push(ErrorRecord {
            node_id: node_id.into(),
            detail: detail.into(),
            timestamp: Utc::now(),
        });
    }
}

/// A sparse set of field updates applied atomically by
/// [`WorkflowStateStore::update`], per §9's "heterogeneous dict-shaped
/// state" re-architecture note: a typed record plus a small patch helper.
#[derive(Debug, Clone, Default)]
pub struct WorkflowStatePatch {
    /// New identified sources, if classification ran.
    pub identified_sources: Option<Vec<String>>,
    /// New available tables, if metadata ran.
    pub available_tables: Option<Vec<String>>,
    /// New schema metadata entries to merge in.
    pub schema_metadata: Option<HashMap<String, MetadataBundle>>,
    /// A new execution plan, if planning ran.
    pub execution_plan: Option<Plan>,
    /// A step to append to the history.
    pub append_step: Option<StepRecord>,
    /// A new final result.
    pub final_result: Option<serde_json::Value>,
    /// A tool execution to append to the audit history.
    pub append_tool_execution: Option<ToolExecutionRecord>,
}

impl WorkflowStatePatch {
    /// Apply this patch to `state` in place.
    pub fn apply(self, state: &mut WorkflowState) {
        if let Some(sources) = self.identified_sources {
            state.identified_sources = sources;
        }
        if let Some(tables) = self.available_tables {
            state.available_tables = tables;
        }
        if let Some(metadata) = self.schema_metadata {
            state.schema_metadata.extend(metadata);
        }
        if let Some(plan) = self.execution_plan {
            state.execution_plan = Some(plan);
        }
        if let Some(step) = self.append_step {
            state.step_history.push(step);
        }
        if let Some(result) = self.final_result {
            state.final_result = Some(result);
        }
        if let Some(tool_exec) = self.append_tool_execution {
            state.tool_execution_history.push(tool_exec);
        }
        state.last_update_timestamp = Utc::now();
    }
}

/// A minimal mirror of a legacy (pre-graph) session, updated by
/// [`WorkflowStateStore::update`] when `sync_legacy = true`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacySessionMirror {
    /// The final result, mirrored from the bridged graph session.
    pub final_result: Option<serde_json::Value>,
    /// The tool execution history, mirrored from the bridged graph session.
    pub tool_execution_history: Vec<ToolExecutionRecord>,
}

/// Owns every in-flight [`WorkflowState`] plus the bidirectional bridge to
/// legacy session ids (§4.8's `HybridStateManager`).
#[derive(Default)]
pub struct WorkflowStateStore {
    states: dashmap::DashMap<String, WorkflowState>,
    legacy_mirrors: dashmap::DashMap<String, LegacySessionMirror>,
    legacy_to_graph: dashmap::DashMap<String, String>,
    graph_to_legacy: dashmap::DashMap<String, String>,
}

impl WorkflowStateStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new graph session for `question`, optionally bridged to an
    /// existing legacy session id. Returns the new graph session id.
    pub fn create_graph_session(
        &self,
        question: impl Into<String>,
        kind: WorkflowKind,
        legacy_session_id: Option<String>,
    ) -> String {
        let graph_id = uuid::Uuid::new_v4().to_string();
        let state = WorkflowState::new(graph_id.clone(), question, kind);
        self.states.insert(graph_id.clone(), state);

        if let Some(legacy_id) = legacy_session_id {
            self.legacy_to_graph.insert(legacy_id.clone(), graph_id.clone());
            self.graph_to_legacy.insert(graph_id.clone(), legacy_id.clone());
            self.legacy_mirrors.entry(legacy_id).or_default();
        }
        graph_id
    }

    /// Resolve either a graph session id or a bridged legacy session id to
    /// its graph session id.
    fn resolve_graph_id(&self, id: &str) -> Option<String> {
        if self.states.contains_key(id) {
            return Some(id.to_string());
        }
        self.legacy_to_graph.get(id).map(|e| e.value().clone())
    }

    /// Fetch a state by either id flavor.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<WorkflowState> {
        let graph_id = self.resolve_graph_id(id)?;
        self.states.get(&graph_id).map(|e| e.value().clone())
    }

    /// Apply a patch to the state for `id` (either id flavor), refresh its
    /// timestamp, and optionally mirror the final result / tool executions
    /// into the bridged legacy session.
    pub fn update(&self, id: &str, patch: WorkflowStatePatch, sync_legacy: bool) -> Result<()> {
        let graph_id = self
            .resolve_graph_id(id)
            .ok_or_else(|| Error::Storage(StorageError::NotFound(id.to_string())))?;

        let mirrored_result = patch.final_result.clone();
        let mirrored_tool_exec = patch.append_tool_execution.clone();

        let mut entry = self
            .states
            .get_mut(&graph_id)
            .ok_or_else(|| Error::Storage(StorageError::NotFound(graph_id.clone())))?;
        patch.apply(&mut entry);
        drop(entry);

        if sync_legacy {
            if let Some(legacy_id) = self.graph_to_legacy.get(&graph_id).map(|e| e.value().clone()) {
                let mut mirror = self.legacy_mirrors.entry(legacy_id).or_default();
                if let Some(result) = mirrored_result {
                    mirror.final_result = Some(result);
                }
                if let Some(tool_exec) = mirrored_tool_exec {
                    mirror.tool_execution_history.push(tool_exec);
                }
            }
        }
        Ok(())
    }

    /// Convenience wrapper: append a streaming event to the session's
    /// bounded buffer.
    pub fn add_streaming_event(&self, id: &str, event: StreamEvent) -> Result<()> {
        let graph_id = self
            .resolve_graph_id(id)
            .ok_or_else(|| Error::Storage(StorageError::NotFound(id.to_string())))?;
        let mut entry = self
            .states
            .get_mut(&graph_id)
            .ok_or_else(|| Error::Storage(StorageError::NotFound(graph_id)))?;
        entry.push_streaming_event(event);
        Ok(())
    }

    /// Convenience wrapper: record one operation's result.
    pub fn add_operation_result(&self, id: &str, op_id: String, result: OperationResult) -> Result<()> {
        let graph_id = self
            .resolve_graph_id(id)
            .ok_or_else(|| Error::Storage(StorageError::NotFound(id.to_string())))?;
        let mut entry = self
            .states
            .get_mut(&graph_id)
            .ok_or_else(|| Error::Storage(StorageError::NotFound(graph_id)))?;
        entry.record_operation_result(op_id, result);
        Ok(())
    }

    /// Convenience wrapper: append an error to the session's history.
    pub fn record_error(&self, id: &str, node_id: impl Into<String>, detail: impl Into<String>) -> Result<()> {
        let graph_id = self
            .resolve_graph_id(id)
            .ok_or_else(|| Error::Storage(StorageError::NotFound(id.to_string())))?;
        let mut entry = self
            .states
            .get_mut(&graph_id)
            .ok_or_else(|| Error::Storage(StorageError::NotFound(graph_id)))?;
        entry.record_error(node_id, detail);
        Ok(())
    }

    /// Remove a session's state (the request completed or the owning
    /// session ended).
    pub fn remove(&self, id: &str) -> Option<WorkflowState> {
        let graph_id = self.resolve_graph_id(id)?;
        if let Some(legacy_id) = self.graph_to_legacy.remove(&graph_id) {
            self.legacy_to_graph.remove(&legacy_id.1);
        }
        self.states.remove(&graph_id).map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_buffer_drops_oldest_past_capacity() {
        let mut state = WorkflowState::new("s1", "q", WorkflowKind::DataAnalysis);
        for i in 0..(STREAMING_BUFFER_CAPACITY + 10) {
            state.push_streaming_event(StreamEvent {
                event_type: crate::completion::StreamEventType::Progress,
                timestamp: Utc::now(),
                session_id: "s1".to_string(),
                content: None,
                chunk_index: Some(i as u32),
                is_final: false,
                extra: HashMap::new(),
            });
        }
        assert_eq!(state.streaming_buffer.len(), STREAMING_BUFFER_CAPACITY);
        assert_eq!(state.streaming_buffer.front().unwrap().chunk_index, Some(10));
    }

    #[test]
    fn get_resolves_legacy_id_to_graph_state() {
        let store = WorkflowStateStore::new();
        let graph_id = store.create_graph_session("q", WorkflowKind::DataAnalysis, Some("legacy-1".to_string()));
        let by_legacy = store.get("legacy-1").unwrap();
        assert_eq!(by_legacy.session_id, graph_id);
    }

    #[test]
    fn update_mirrors_final_result_into_legacy_session() {
        let store = WorkflowStateStore::new();
        let graph_id = store.create_graph_session("q", WorkflowKind::DataAnalysis, Some("legacy-1".to_string()));
        let patch = WorkflowStatePatch {
            final_result: Some(serde_json::json!({"ok": true})),
            ..Default::default()
        };
        store.update(&graph_id, patch, true).unwrap();
        let mirror = store.legacy_mirrors.get("legacy-1").unwrap();
        assert_eq!(mirror.final_result, Some(serde_json::json!({"ok": true})));
    }

    #[test]
    fn update_on_unknown_id_fails() {
        let store = WorkflowStateStore::new();
        let err = store.update("nope", WorkflowStatePatch::default(), false).unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::NotFound(_))));
    }

    #[test]
    fn classification_cache_hit_within_session() {
        use std::hash::{Hash, Hasher};
        let mut state = WorkflowState::new("s1", "what is 2+2", WorkflowKind::DataAnalysis);
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        state.question.hash(&mut hasher);
        let key = hasher.finish();
        let decision = crate::classifier::ClassificationDecision {
            tier: crate::classifier::Tier::Trivial,
            confidence: 0.9,
            reasoning: "cached".to_string(),
            estimated_time_ms: 1,
            operation_type: "noop".to_string(),
        };
        state.classification_cache.insert(key, decision.clone());
        assert!(state.classification_cache.contains_key(&key));
    }
}
