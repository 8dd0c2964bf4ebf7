//! Output Aggregator (C9): a per-session, append-only capture log. Each
//! capture is persisted to disk immediately, write-through, so a crash
//! mid-workflow loses at most the in-flight capture, not the session's
//! history.
//!
//! Uses a tagged [`Capture`] variant per entry rather than a single mutable
//! results dict, so retrieval is typed instead of keyed by a string the
//! caller has to know in advance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::adapter::Row;
use crate::completion::StreamEvent;
use crate::error::{Error, Result, StorageError};
use crate::scheduler::{OperationSpec, Plan};

/// One captured artifact. Tagged so each kind can be retrieved without the
/// caller guessing the shape of an opaque blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Capture {
    /// Rows fetched from a single source.
    RawData {
        /// Which source these rows came from.
        source_id: String,
        /// The rows themselves.
        rows: Vec<Row>,
    },
    /// The execution plan chosen for this workflow.
    Plan {
        /// The plan.
        plan: Plan,
    },
    /// Record of one tool (adapter operation) invocation.
    ToolExec {
        /// The tool/operation id.
        tool_id: String,
        /// Whether it succeeded.
        success: bool,
        /// Wall-clock duration in milliseconds.
        duration_ms: u64,
    },
    /// Synthesized natural-language output.
    Synthesis {
        /// The synthesized text.
        text: String,
    },
    /// A performance metric sample.
    Perf {
        /// Metric name.
        metric: String,
        /// Metric value.
        value: f64,
    },
    /// A streaming event, captured for replay/audit.
    StreamEvent {
        /// The event.
        event: StreamEvent,
    },
}

/// One entry in the capture log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRecord {
    /// A stable id for this capture, returned to the caller that made it.
    pub output_id: String,
    /// When this capture was recorded.
    pub captured_at: DateTime<Utc>,
    /// The captured artifact.
    pub capture: Capture,
}

/// Running metadata about the workflow this aggregator belongs to (§9's
/// `output_aggregator.py` running `workflow_metadata`): the question asked,
/// when the workflow started, and which route ultimately served it. Carried
/// as metadata on the record rather than a capture kind, per SPEC_FULL.md's
/// reading of spec.md's data model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowMetadata {
    /// The natural-language question this workflow answers, once known.
    pub question: Option<String>,
    /// When this aggregator (and the workflow it belongs to) started.
    pub start_time: DateTime<Utc>,
    /// The orchestrator route that served this workflow, once decided.
    pub route: Option<String>,
}

impl Default for WorkflowMetadata {
    fn default() -> Self {
        Self {
            question: None,
            start_time: Utc::now(),
            route: None,
        }
    }
}

/// Aggregated view over `ToolExec` captures (§4.9's `execution_details`),
/// distinct from the raw per-operation list in `operation_results`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ExecutionDetails {
    /// Total tool invocations captured.
    pub total_operations: usize,
    /// How many of those succeeded.
    pub successful_operations: usize,
    /// How many of those failed.
    pub failed_operations: usize,
    /// Summed wall-clock duration across all captured invocations, in
    /// milliseconds.
    pub total_duration_ms: u64,
}

/// One captured tool invocation, as surfaced in `UnifiedResult::operation_results`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolExecutionSummary {
    /// The tool/operation id.
    pub tool_id: String,
    /// Whether it succeeded.
    pub success: bool,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Coarse quality signals derived from what has been captured so far
/// (§4.9's `quality_indicators`).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct QualityIndicators {
    /// Whether at least one row has been captured.
    pub has_rows: bool,
    /// Fraction of captured tool executions that succeeded.
    pub tool_success_rate: f64,
    /// Whether `tool_success_rate` clears the §4.9 success threshold (0.5).
    pub meets_performance_threshold: bool,
}

/// The aggregator's single-shot synthesis of everything captured so far
/// (§4.9's `create_unified_result`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UnifiedResult {
    /// The session this result belongs to.
    pub session_id: String,
    /// Every row captured, across sources, in capture order.
    pub rows: Vec<Row>,
    /// Driver-defined query text pulled from the latest plan's `Targeted`
    /// operations, joined when there is more than one.
    pub sql: Option<String>,
    /// The most recent synthesis text captured, if any.
    #[serde(rename = "analysis")]
    pub synthesis: Option<String>,
    /// Whether this workflow meets the success criterion: at least one row
    /// captured and a tool success rate of at least 0.5.
    #[serde(rename = "success")]
    pub successful: bool,
    /// Running workflow-level metadata (question, start time, route).
    pub workflow_metadata: WorkflowMetadata,
    /// Aggregated rollup over captured tool executions.
    pub execution_details: ExecutionDetails,
    /// Per-metric average of captured performance samples.
    pub performance_metrics: HashMap<String, f64>,
    /// Coarse quality signals derived from rows and tool success rate.
    pub quality_indicators: QualityIndicators,
    /// Captured streaming events, in capture order, as an audit timeline.
    pub workflow_timeline: Vec<StreamEvent>,
    /// The most recently captured execution plan, if any.
    pub plan_info: Option<Plan>,
    /// Every captured tool execution, in capture order.
    pub operation_results: Vec<ToolExecutionSummary>,
}

/// The API-facing envelope returned to HTTP callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    /// The session this response belongs to.
    pub session_id: String,
    /// The unified result.
    pub result: UnifiedResult,
    /// Total number of captures recorded, for diagnostics.
    pub capture_count: usize,
}

/// The on-disk envelope for a session's aggregator file (§6 "Persisted
/// state layout"): `session_id`, `workflow_metadata`, `start_time`,
/// `finalized`, `outputs`, `saved_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedAggregator {
    session_id: String,
    workflow_metadata: WorkflowMetadata,
    start_time: DateTime<Utc>,
    finalized: bool,
    outputs: Vec<CaptureRecord>,
    saved_at: DateTime<Utc>,
}

/// A per-session capture log with write-through disk persistence and a
/// finalize-then-immutable lifecycle (§4.9).
pub struct OutputAggregator {
    session_id: String,
    records: parking_lot::RwLock<Vec<CaptureRecord>>,
    next_seq: AtomicU64,
    finalized: AtomicBool,
    persist_dir: Option<PathBuf>,
    metadata: parking_lot::Mutex<WorkflowMetadata>,
}

impl OutputAggregator {
    /// An aggregator with no disk persistence (tests, or a purely in-memory
    /// deployment).
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            records: parking_lot::RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            finalized: AtomicBool::new(false),
            persist_dir: None,
            metadata: parking_lot::Mutex::new(WorkflowMetadata::default()),
        }
    }

    /// An aggregator that writes `<session_id>_aggregator.json` under `dir`
    /// after every capture.
    #[must_use]
    pub fn with_persistence(session_id: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            persist_dir: Some(dir.into()),
            ..Self::new(session_id)
        }
    }

    /// Reload a previously persisted aggregator file for `session_id` from
    /// `dir` (§8's "aggregator file written and re-read" round-trip law).
    /// Further captures continue persisting to the same file.
    pub async fn load(dir: impl Into<PathBuf>, session_id: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        let session_id = session_id.into();
        let path = dir.join(format!("{session_id}_aggregator.json"));
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            Error::Storage(StorageError::Backend {
                backend: "file".to_string(),
                detail: format!("{}: {e}", path.display()),
            })
        })?;
        let envelope: PersistedAggregator = serde_json::from_slice(&bytes).map_err(|e| {
            Error::Storage(StorageError::Backend {
                backend: "file".to_string(),
                detail: e.to_string(),
            })
        })?;
        let next_seq = envelope.outputs.len() as u64;
        Ok(Self {
            session_id: envelope.session_id,
            records: parking_lot::RwLock::new(envelope.outputs),
            next_seq: AtomicU64::new(next_seq),
            finalized: AtomicBool::new(envelope.finalized),
            persist_dir: Some(dir),
            metadata: parking_lot::Mutex::new(envelope.workflow_metadata),
        })
    }

    /// Record the question this workflow is answering, surfaced in
    /// `workflow_metadata`.
    pub fn set_question(&self, question: impl Into<String>) {
        self.metadata.lock().question = Some(question.into());
    }

    /// Record which route ultimately served this workflow, surfaced in
    /// `workflow_metadata`.
    pub fn set_route(&self, route: impl Into<String>) {
        self.metadata.lock().route = Some(route.into());
    }

    /// A snapshot of this session's running workflow metadata.
    #[must_use]
    pub fn workflow_metadata(&self) -> WorkflowMetadata {
        self.metadata.lock().clone()
    }

    fn persist_path(&self) -> Option<PathBuf> {
        self.persist_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}_aggregator.json", self.session_id)))
    }

    async fn persist(&self, records: &[CaptureRecord]) -> Result<()> {
        let Some(path) = self.persist_path() else {
            return Ok(());
        };
        let metadata = self.metadata.lock().clone();
        let envelope = PersistedAggregator {
            session_id: self.session_id.clone(),
            start_time: metadata.start_time,
            workflow_metadata: metadata,
            finalized: self.finalized.load(Ordering::SeqCst),
            outputs: records.to_vec(),
            saved_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&envelope).map_err(|e| {
            Error::Storage(StorageError::Backend {
                backend: "file".to_string(),
                detail: e.to_string(),
            })
        })?;
        tokio::fs::write(&path, json).await.map_err(|e| {
            Error::Storage(StorageError::Backend {
                backend: "file".to_string(),
                detail: format!("{}: {e}", path.display()),
            })
        })
    }

    async fn push(&self, capture: Capture) -> Result<String> {
        if self.finalized.load(Ordering::SeqCst) {
            return Err(Error::Storage(StorageError::Conflict(format!(
                "aggregator for session {} is finalized",
                self.session_id
            ))));
        }
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let output_id = format!("{}-{seq}", self.session_id);
        let record = CaptureRecord {
            output_id: output_id.clone(),
            captured_at: Utc::now(),
            capture,
        };

        let snapshot = {
            let mut records = self.records.write();
            records.push(record);
            records.clone()
        };
        self.persist(&snapshot).await?;
        Ok(output_id)
    }

    /// Capture rows fetched from a single source.
    pub async fn capture_raw_data(&self, source_id: impl Into<String>, rows: Vec<Row>) -> Result<String> {
        self.push(Capture::RawData {
            source_id: source_id.into(),
            rows,
        })
        .await
    }

    /// Capture the execution plan.
    pub async fn capture_plan(&self, plan: Plan) -> Result<String> {
        self.push(Capture::Plan { plan }).await
    }

    /// Capture one tool invocation's outcome.
    pub async fn capture_tool_exec(&self, tool_id: impl Into<String>, success: bool, duration_ms: u64) -> Result<String> {
        self.push(Capture::ToolExec {
            tool_id: tool_id.into(),
            success,
            duration_ms,
        })
        .await
    }

    /// Capture synthesized text.
    pub async fn capture_synthesis(&self, text: impl Into<String>) -> Result<String> {
        self.push(Capture::Synthesis { text: text.into() }).await
    }

    /// Capture a performance metric sample.
    pub async fn capture_perf(&self, metric: impl Into<String>, value: f64) -> Result<String> {
        self.push(Capture::Perf {
            metric: metric.into(),
            value,
        })
        .await
    }

    /// Capture a streaming event for replay/audit.
    pub async fn capture_stream_event(&self, event: StreamEvent) -> Result<String> {
        self.push(Capture::StreamEvent { event }).await
    }

    /// Mark this aggregator immutable and persist a final snapshot (§4.9:
    /// "finalization ... triggers a last save"). Further captures return an
    /// error.
    pub async fn finalize(&self) -> Result<()> {
        self.finalized.store(true, Ordering::SeqCst);
        let snapshot = self.records.read().clone();
        self.persist(&snapshot).await
    }

    /// Whether [`Self::finalize`] has been called.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    /// Total captures recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether no captures have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All `RawData` captures, in capture order.
    #[must_use]
    pub fn raw_data(&self) -> Vec<(String, Vec<Row>)> {
        self.records
            .read()
            .iter()
            .filter_map(|r| match &r.capture {
                Capture::RawData { source_id, rows } => Some((source_id.clone(), rows.clone())),
                _ => None,
            })
            .collect()
    }

    /// The most recently captured plan, if any.
    #[must_use]
    pub fn latest_plan(&self) -> Option<Plan> {
        self.records.read().iter().rev().find_map(|r| match &r.capture {
            Capture::Plan { plan } => Some(plan.clone()),
            _ => None,
        })
    }

    /// All `ToolExec` captures, in capture order.
    #[must_use]
    pub fn tool_executions(&self) -> Vec<(String, bool, u64)> {
        self.records
            .read()
            .iter()
            .filter_map(|r| match &r.capture {
                Capture::ToolExec { tool_id, success, duration_ms } => {
                    Some((tool_id.clone(), *success, *duration_ms))
                }
                _ => None,
            })
            .collect()
    }

    /// All `Synthesis` captures, in capture order.
    #[must_use]
    pub fn synthesis_texts(&self) -> Vec<String> {
        self.records
            .read()
            .iter()
            .filter_map(|r| match &r.capture {
                Capture::Synthesis { text } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// All `Perf` captures, in capture order.
    #[must_use]
    pub fn perf_metrics(&self) -> Vec<(String, f64)> {
        self.records
            .read()
            .iter()
            .filter_map(|r| match &r.capture {
                Capture::Perf { metric, value } => Some((metric.clone(), *value)),
                _ => None,
            })
            .collect()
    }

    /// All `StreamEvent` captures, in capture order.
    #[must_use]
    pub fn stream_events(&self) -> Vec<StreamEvent> {
        self.records
            .read()
            .iter()
            .filter_map(|r| match &r.capture {
                Capture::StreamEvent { event } => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    /// Synthesize a [`UnifiedResult`] from everything captured so far. May
    /// be called before or after [`Self::finalize`].
    #[must_use]
    pub fn create_unified_result(&self) -> UnifiedResult {
        let rows: Vec<Row> = self.raw_data().into_iter().flat_map(|(_, rows)| rows).collect();
        let synthesis = self.synthesis_texts().into_iter().next_back();
        let tool_execs = self.tool_executions();
        let tool_success_rate = if tool_execs.is_empty() {
            0.0
        } else {
            tool_execs.iter().filter(|(_, success, _)| *success).count() as f64 / tool_execs.len() as f64
        };
        let successful = !rows.is_empty() && tool_success_rate >= 0.5;

        let plan_info = self.latest_plan();
        let sql = plan_info.as_ref().and_then(|plan| {
            let queries: Vec<&str> = plan
                .operations
                .iter()
                .filter_map(|op| match &op.params {
                    OperationSpec::Targeted { query } => Some(query.as_str()),
                    _ => None,
                })
                .collect();
            if queries.is_empty() {
                None
            } else {
                Some(queries.join("; "))
            }
        });

        let operation_results: Vec<ToolExecutionSummary> = tool_execs
            .iter()
            .map(|(tool_id, success, duration_ms)| ToolExecutionSummary {
                tool_id: tool_id.clone(),
                success: *success,
                duration_ms: *duration_ms,
            })
            .collect();
        let execution_details = ExecutionDetails {
            total_operations: tool_execs.len(),
            successful_operations: tool_execs.iter().filter(|(_, success, _)| *success).count(),
            failed_operations: tool_execs.iter().filter(|(_, success, _)| !*success).count(),
            total_duration_ms: tool_execs.iter().map(|(_, _, duration_ms)| duration_ms).sum(),
        };

        let mut perf_sums: HashMap<String, (f64, u64)> = HashMap::new();
        for (metric, value) in self.perf_metrics() {
            let entry = perf_sums.entry(metric).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
        let performance_metrics: HashMap<String, f64> = perf_sums
            .into_iter()
            .map(|(metric, (sum, count))| (metric, sum / count as f64))
            .collect();

        let quality_indicators = QualityIndicators {
            has_rows: !rows.is_empty(),
            tool_success_rate,
            meets_performance_threshold: tool_success_rate >= 0.5,
        };

        UnifiedResult {
            session_id: self.session_id.clone(),
            rows,
            sql,
            synthesis,
            successful,
            workflow_metadata: self.workflow_metadata(),
            execution_details,
            performance_metrics,
            quality_indicators,
            workflow_timeline: self.stream_events(),
            plan_info,
            operation_results,
        }
    }

    /// Wrap [`Self::create_unified_result`] in the envelope HTTP callers see.
    #[must_use]
    pub fn create_api_response(&self) -> ApiResponse {
        ApiResponse {
            session_id: self.session_id.clone(),
            capture_count: self.len(),
            result: self.create_unified_result(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capture_returns_monotonically_distinct_ids() {
        let agg = OutputAggregator::new("s1");
        let id1 = agg.capture_raw_data("src", vec![serde_json::json!({"a": 1})]).await.unwrap();
        let id2 = agg.capture_raw_data("src", vec![serde_json::json!({"a": 2})]).await.unwrap();
        assert_ne!(id1, id2);
        assert_eq!(agg.len(), 2);
    }

    #[tokio::test]
    async fn finalize_rejects_further_captures() {
        let agg = OutputAggregator::new("s1");
        agg.capture_synthesis("done").await.unwrap();
        agg.finalize().await.unwrap();
        let err = agg.capture_synthesis("more").await.unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn unified_result_is_successful_with_rows_and_good_tool_rate() {
        let agg = OutputAggregator::new("s1");
        agg.capture_raw_data("src", vec![serde_json::json!({"a": 1})]).await.unwrap();
        agg.capture_tool_exec("t1", true, 10).await.unwrap();
        agg.capture_tool_exec("t2", true, 20).await.unwrap();
        let result = agg.create_unified_result();
        assert!(result.successful);
        assert_eq!(result.quality_indicators.tool_success_rate, 1.0);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.execution_details.total_operations, 2);
        assert_eq!(result.operation_results.len(), 2);
    }

    #[tokio::test]
    async fn unified_result_fails_below_half_tool_success() {
        let agg = OutputAggregator::new("s1");
        agg.capture_raw_data("src", vec![serde_json::json!({"a": 1})]).await.unwrap();
        agg.capture_tool_exec("t1", true, 10).await.unwrap();
        agg.capture_tool_exec("t2", false, 10).await.unwrap();
        agg.capture_tool_exec("t3", false, 10).await.unwrap();
        let result = agg.create_unified_result();
        assert!(!result.successful);
        assert!(result.quality_indicators.tool_success_rate < 0.5);
    }

    #[tokio::test]
    async fn unified_result_fails_with_no_rows_even_if_tools_succeeded() {
        let agg = OutputAggregator::new("s1");
        agg.capture_tool_exec("t1", true, 10).await.unwrap();
        let result = agg.create_unified_result();
        assert!(!result.successful);
    }

    #[tokio::test]
    async fn latest_plan_returns_most_recent_capture() {
        let agg = OutputAggregator::new("s1");
        agg.capture_plan(Plan { operations: vec![] }).await.unwrap();
        let second = Plan {
            operations: vec![crate::scheduler::Operation {
                id: "a".to_string(),
                source_kind: crate::registry::SourceKind::Relational,
                source_id: "r1".to_string(),
                kind: crate::scheduler::OperationKind::SimpleSelect,
                params: crate::scheduler::OperationSpec::Targeted { query: "select 1".to_string() },
                depends_on: vec![],
            }],
        };
        agg.capture_plan(second.clone()).await.unwrap();
        let latest = agg.latest_plan().unwrap();
        assert_eq!(latest.operations.len(), second.operations.len());
    }

    #[tokio::test]
    async fn persists_to_disk_when_configured() {
        let dir = std::env::temp_dir().join(format!("ceneca-agg-test-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let agg = OutputAggregator::with_persistence("s1", dir.clone());
        agg.set_question("how many orders?");
        agg.capture_synthesis("hello").await.unwrap();
        let path = dir.join("s1_aggregator.json");
        assert!(path.exists());
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let envelope: serde_json::Value = serde_json::from_str(&contents).unwrap();
        // §6's envelope: session_id, workflow_metadata, start_time, finalized, outputs, saved_at.
        assert_eq!(envelope["session_id"], "s1");
        assert_eq!(envelope["workflow_metadata"]["question"], "how many orders?");
        assert!(envelope["start_time"].is_string());
        assert_eq!(envelope["finalized"], false);
        assert!(envelope["outputs"].is_array());
        assert!(envelope["saved_at"].is_string());
        assert!(contents.contains("hello"));
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn reloaded_aggregator_yields_identical_unified_result() {
        let dir = std::env::temp_dir().join(format!("ceneca-agg-test-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let original = OutputAggregator::with_persistence("s1", dir.clone());
        original.set_question("how many orders?");
        original.set_route("traditional");
        original.capture_raw_data("src", vec![serde_json::json!({"id": 1})]).await.unwrap();
        original
            .capture_plan(Plan {
                operations: vec![crate::scheduler::Operation {
                    id: "a".to_string(),
                    source_kind: crate::registry::SourceKind::Relational,
                    source_id: "r1".to_string(),
                    kind: crate::scheduler::OperationKind::SimpleSelect,
                    params: crate::scheduler::OperationSpec::Targeted { query: "select 1".to_string() },
                    depends_on: vec![],
                }],
            })
            .await
            .unwrap();
        original.capture_tool_exec("a", true, 15).await.unwrap();
        original.capture_synthesis("done").await.unwrap();
        original.capture_perf("latency_ms", 42.0).await.unwrap();
        original.finalize().await.unwrap();
        let before = original.create_unified_result();

        let reloaded = OutputAggregator::load(dir.clone(), "s1").await.unwrap();
        let after = reloaded.create_unified_result();

        assert_eq!(serde_json::to_value(&before).unwrap(), serde_json::to_value(&after).unwrap());
        assert!(reloaded.is_finalized());
        assert_eq!(reloaded.len(), original.len());

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn load_missing_file_is_a_storage_error() {
        let dir = std::env::temp_dir().join(format!("ceneca-agg-test-{}", uuid::Uuid::new_v4()));
        let err = OutputAggregator::load(dir, "does-not-exist").await.unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::Backend { .. })));
    }

    #[tokio::test]
    async fn api_response_reports_capture_count() {
        let agg = OutputAggregator::new("s1");
        agg.capture_synthesis("a").await.unwrap();
        agg.capture_synthesis("b").await.unwrap();
        let response = agg.create_api_response();
        assert_eq!(response.capture_count, 2);
        assert_eq!(response.session_id, "s1");
    }
}
