//! Execution Scheduler (C12): turns an Operation DAG into streamed results
//! while honoring per-source concurrency limits and per-batch complexity
//! weight caps (§4.12). The hardest subcomponent in the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::adapter::{Adapter, AdapterRegistry, Deadline, InsightKind, Row, SampleMethod};
use crate::error::{AdapterError, PlanError};
use crate::registry::SourceKind;

/// The complexity class of an [`Operation`], per §4.12's weight table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// A single-table select. Weight 1.
    SimpleSelect,
    /// A grouping/aggregation query. Weight 2.
    Aggregation,
    /// A nearest-neighbor or similarity search. Weight 3.
    VectorSearch,
    /// A join spanning multiple tables/sources. Weight 4.
    CrossJoin,
    /// Insight generation (outliers/trends/clusters/correlations). Weight 5.
    ComplexAnalytics,
}

impl OperationKind {
    /// This operation kind's complexity weight, counted against the
    /// per-batch weight cap.
    #[must_use]
    pub fn weight(self) -> u32 {
        match self {
            OperationKind::SimpleSelect => 1,
            OperationKind::Aggregation => 2,
            OperationKind::VectorSearch => 3,
            OperationKind::CrossJoin => 4,
            OperationKind::ComplexAnalytics => 5,
        }
    }
}

/// The concrete request an [`Operation`] makes of its adapter. A tagged
/// variant in place of an opaque params blob, so the scheduler can dispatch
/// without guessing a driver-defined shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationSpec {
    /// `Adapter::run_targeted`.
    Targeted {
        /// Driver-defined query text.
        query: String,
    },
    /// `Adapter::run_summary`.
    Summary {
        /// Table/collection name.
        table: String,
        /// Columns to summarize, or all if `None`.
        columns: Option<Vec<String>>,
    },
    /// `Adapter::sample_data`.
    Sample {
        /// Driver-defined query text.
        query: String,
        /// Number of rows to sample.
        n: usize,
        /// Sampling method.
        method: SampleMethod,
    },
    /// `Adapter::generate_insights`, over the concatenated row results of
    /// this operation's dependencies.
    Insights {
        /// Insight kind to generate.
        kind: InsightKind,
    },
}

/// A unit of work dispatched by the scheduler (§3's Operation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Unique id within the plan.
    pub id: String,
    /// Which source kind this operation targets (drives the per-source
    /// semaphore and default concurrency limit).
    pub source_kind: SourceKind,
    /// Which registered source id to dispatch to.
    pub source_id: String,
    /// Complexity class, for the per-batch weight cap.
    pub kind: OperationKind,
    /// The request to make of the adapter.
    pub params: OperationSpec,
    /// Operation ids that must complete (success or definitive failure)
    /// before this one may run.
    pub depends_on: Vec<String>,
}

/// A DAG of operations produced by the Planning Node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    /// The operations in this plan, in no particular order.
    pub operations: Vec<Operation>,
}

impl Plan {
    /// Validate the plan before any operation executes: non-empty, every
    /// referenced source is known, and the dependency graph has no cycle.
    pub fn validate(&self, known_sources: &HashSet<String>) -> Result<(), PlanError> {
        if self.operations.is_empty() {
            return Err(PlanError::Empty);
        }
        let ids: HashSet<&str> = self.operations.iter().map(|op| op.id.as_str()).collect();
        for op in &self.operations {
            if !known_sources.contains(&op.source_id) {
                return Err(PlanError::UnknownSource {
                    op_id: op.id.clone(),
                    source_id: op.source_id.clone(),
                });
            }
            for dep in &op.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(PlanError::UnknownSource {
                        op_id: op.id.clone(),
                        source_id: dep.clone(),
                    });
                }
            }
        }
        detect_cycle(&self.operations)?;
        Ok(())
    }
}

fn detect_cycle(operations: &[Operation]) -> Result<(), PlanError> {
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for op in operations {
        indegree.entry(op.id.as_str()).or_insert(0);
        for dep in &op.depends_on {
            *indegree.entry(op.id.as_str()).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(op.id.as_str());
        }
    }
    let mut queue: Vec<&str> = indegree.iter().filter(|(_, &d)| d == 0).map(|(id, _)| *id).collect();
    let mut visited = 0usize;
    while let Some(id) = queue.pop() {
        visited += 1;
        if let Some(ds) = dependents.get(id) {
            for d in ds {
                let entry = indegree.get_mut(d).expect("dependent present in indegree map");
                *entry -= 1;
                if *entry == 0 {
                    queue.push(d);
                }
            }
        }
    }
    if visited != operations.len() {
        let remaining: Vec<String> = indegree
            .into_iter()
            .filter(|(_, d)| *d > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        return Err(PlanError::Cycle(remaining));
    }
    Ok(())
}

/// The outcome of one dispatched operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperationOutcome {
    /// The adapter call succeeded.
    Success {
        /// Rows returned.
        rows: Vec<Row>,
    },
    /// The adapter call failed (retryable or not).
    Failed {
        /// The classified adapter error.
        error: AdapterError,
    },
    /// A non-retryable failure of a dependency caused this op to be skipped
    /// without being dispatched.
    SkippedDueToDependency,
}

impl OperationOutcome {
    /// Whether this outcome counts as a tool success for the aggregator's
    /// success-rate calculation.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Success { .. })
    }
}

/// The full record of one operation's execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    /// The operation id this result belongs to.
    pub op_id: String,
    /// What happened.
    pub outcome: OperationOutcome,
    /// When execution of this op started (absent if skipped).
    pub started_at: Option<DateTime<Utc>>,
    /// Wall-clock duration of this op's execution, in milliseconds.
    pub duration_ms: u64,
}

/// Progress events emitted during scheduling, for the Streaming Coordinator
/// to forward (after translation into the canonical [`crate::completion::StreamEvent`]
/// shape).
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// A new batch of operations was dispatched.
    BatchDispatched {
        /// Zero-based batch index.
        batch_index: usize,
        /// Operation ids in this batch.
        op_ids: Vec<String>,
    },
    /// One operation completed successfully.
    OperationComplete {
        /// The completed operation's id.
        op_id: String,
    },
    /// One operation failed.
    OperationError {
        /// The failed operation's id.
        op_id: String,
        /// The error it failed with.
        error: AdapterError,
    },
}

/// The final report for one plan's execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// Per-operation results, keyed by operation id.
    pub results: HashMap<String, OperationResult>,
    /// How many batches were dispatched.
    pub batch_count: usize,
}

impl ExecutionReport {
    /// All successfully returned rows, concatenated across operations, in
    /// operation-id order for determinism.
    #[must_use]
    pub fn all_rows(&self) -> Vec<Row> {
        let mut ids: Vec<&String> = self.results.keys().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| match &self.results[id].outcome {
                OperationOutcome::Success { rows } => Some(rows.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Fraction of dispatched (non-skipped) operations that succeeded, used
    /// by the aggregator's success criterion.
    #[must_use]
    pub fn tool_success_rate(&self) -> f64 {
        let dispatched: Vec<&OperationResult> = self
            .results
            .values()
            .filter(|r| !matches!(r.outcome, OperationOutcome::SkippedDueToDependency))
            .collect();
        if dispatched.is_empty() {
            return 0.0;
        }
        let successes = dispatched.iter().filter(|r| r.outcome.is_success()).count();
        successes as f64 / dispatched.len() as f64
    }
}

/// Batch the plan's remaining operations per §4.12's intelligent batching
/// algorithm. Returns batches of operation ids in dispatch order.
fn build_batches(operations: &[Operation], global_cap: usize, weight_cap: u32) -> Vec<Vec<String>> {
    let by_id: HashMap<&str, &Operation> = operations.iter().map(|op| (op.id.as_str(), op)).collect();
    let mut completed: HashSet<String> = HashSet::new();
    let mut remaining: HashSet<String> = operations.iter().map(|op| op.id.clone()).collect();
    let mut batches = Vec::new();

    // Stable kind priority, matching the order source kinds are listed in
    // §4.12's limit table.
    const KIND_ORDER: &[SourceKind] = &[
        SourceKind::Relational,
        SourceKind::Document,
        SourceKind::Vector,
        SourceKind::ChatLog,
        SourceKind::Ecommerce,
        SourceKind::AnalyticsApi,
        SourceKind::Other,
    ];

    while !remaining.is_empty() {
        let mut ready: Vec<&str> = remaining
            .iter()
            .filter(|id| {
                by_id[id.as_str()].depends_on.iter().all(|dep| completed.contains(dep))
            })
            .map(String::as_str)
            .collect();
        ready.sort_unstable();

        if ready.is_empty() {
            // No progress possible: the remaining ops form (or depend on) a
            // cycle. Plan::validate() should have caught this already; this
            // is the scheduler's own belt-and-braces guard.
            break;
        }

        let mut batch: Vec<String> = Vec::new();
        let mut per_kind_count: HashMap<SourceKind, usize> = HashMap::new();
        let mut weight_sum: u32 = 0;

        for kind in KIND_ORDER {
            for id in ready.iter().filter(|id| by_id[*id].source_kind == *kind) {
                if batch.len() >= global_cap {
                    break;
                }
                let op = by_id[id];
                let count = per_kind_count.entry(*kind).or_insert(0);
                if *count >= kind.default_concurrency_limit() {
                    continue;
                }
                if weight_sum + op.kind.weight() > weight_cap {
                    continue;
                }
                batch.push((*id).to_string());
                *count += 1;
                weight_sum += op.kind.weight();
            }
        }

        if batch.is_empty() {
            // Progress guarantee: force-add the first ready op even if it
            // alone exceeds the weight cap.
            batch.push(ready[0].to_string());
        }

        for id in &batch {
            remaining.remove(id);
            completed.insert(id.clone());
        }
        batches.push(batch);
    }

    batches
}

/// Turns an [`Plan`] into streamed, concurrency-bounded results.
pub struct ExecutionScheduler {
    adapters: Arc<AdapterRegistry>,
    global_cap: usize,
    weight_cap: u32,
}

impl ExecutionScheduler {
    /// A scheduler with the §4.12 defaults: global cap 16, weight cap 20.
    #[must_use]
    pub fn new(adapters: Arc<AdapterRegistry>) -> Self {
        Self {
            adapters,
            global_cap: 16,
            weight_cap: 20,
        }
    }

    /// Override the global parallelism cap and per-batch weight cap.
    #[must_use]
    pub fn with_limits(mut self, global_cap: usize, weight_cap: u32) -> Self {
        self.global_cap = global_cap;
        self.weight_cap = weight_cap;
        self
    }

    /// Execute every operation in `plan`, batch by batch, honoring
    /// per-source semaphores. `events`, if given, receives progress events
    /// as they happen; a send failure (no receiver) is ignored.
    pub async fn execute(
        &self,
        plan: &Plan,
        deadline: &Deadline,
        events: Option<tokio::sync::mpsc::UnboundedSender<SchedulerEvent>>,
    ) -> ExecutionReport {
        let batches = build_batches(&plan.operations, self.global_cap, self.weight_cap);
        let by_id: HashMap<String, Operation> =
            plan.operations.iter().map(|op| (op.id.clone(), op.clone())).collect();

        let mut semaphores: HashMap<SourceKind, Arc<Semaphore>> = HashMap::new();
        for op in &plan.operations {
            semaphores
                .entry(op.source_kind)
                .or_insert_with(|| Arc::new(Semaphore::new(op.source_kind.default_concurrency_limit())));
        }

        let mut report = ExecutionReport {
            results: HashMap::new(),
            batch_count: batches.len(),
        };

        for (batch_index, batch_ids) in batches.iter().enumerate() {
            if let Some(tx) = &events {
                let _ = tx.send(SchedulerEvent::BatchDispatched {
                    batch_index,
                    op_ids: batch_ids.clone(),
                });
            }

            let mut handles = Vec::with_capacity(batch_ids.len());
            for id in batch_ids {
                let op = by_id[id].clone();

                // A non-retryable failure among this op's deps skips it.
                if op
                    .depends_on
                    .iter()
                    .any(|dep| matches!(report.results.get(dep).map(|r| &r.outcome), Some(OperationOutcome::Failed { error }) if !error.retryable()))
                {
                    report.results.insert(
                        op.id.clone(),
                        OperationResult {
                            op_id: op.id.clone(),
                            outcome: OperationOutcome::SkippedDueToDependency,
                            started_at: None,
                            duration_ms: 0,
                        },
                    );
                    continue;
                }

                let adapter = self.adapters.get(&op.source_id);
                let sem = semaphores[&op.source_kind].clone();
                let deadline = deadline.clone();
                let tx = events.clone();

                handles.push(tokio::spawn(async move {
                    let _permit = sem.acquire().await;
                    let started_at = Utc::now();
                    let started_instant = std::time::Instant::now();
                    let outcome = match adapter {
                        Some(adapter) => run_operation(adapter.as_ref(), &op, &deadline).await,
                        None => OperationOutcome::Failed {
                            error: AdapterError::new(
                                crate::error::AdapterErrorKind::NotFound,
                                format!("no adapter registered for source {}", op.source_id),
                            ),
                        },
                    };
                    let duration_ms = started_instant.elapsed().as_millis() as u64;

                    if let Some(tx) = tx {
                        let event = match &outcome {
                            OperationOutcome::Success { .. } | OperationOutcome::SkippedDueToDependency => {
                                SchedulerEvent::OperationComplete { op_id: op.id.clone() }
                            }
                            OperationOutcome::Failed { error } => SchedulerEvent::OperationError {
                                op_id: op.id.clone(),
                                error: error.clone(),
                            },
                        };
                        let _ = tx.send(event);
                    }

                    OperationResult {
                        op_id: op.id,
                        outcome,
                        started_at: Some(started_at),
                        duration_ms,
                    }
                }));
            }

            for handle in handles {
                if let Ok(result) = handle.await {
                    report.results.insert(result.op_id.clone(), result);
                }
            }
        }

        report
    }
}

async fn run_operation(adapter: &dyn Adapter, op: &Operation, deadline: &Deadline) -> OperationOutcome {
    let result = match &op.params {
        OperationSpec::Targeted { query } => adapter.run_targeted(query, deadline).await,
        OperationSpec::Summary { table, columns } => adapter
            .run_summary(table, columns.as_deref(), deadline)
            .await
            .map(|stats| vec![serde_json::to_value(stats).unwrap_or_default()]),
        OperationSpec::Sample { query, n, method } => adapter.sample_data(query, *n, *method, deadline).await,
        OperationSpec::Insights { kind } => {
            // Insights operate over previously-fetched data; with no prior
            // rows wired through the plan, request over an empty set. The
            // Execution Node is responsible for materializing dependency
            // rows into `data` before dispatch when it matters.
            adapter
                .generate_insights(&[], *kind, deadline)
                .await
                .map(|insights| vec![serde_json::to_value(insights).unwrap_or_default()])
        }
    };
    match result {
        Ok(rows) => OperationOutcome::Success { rows },
        Err(error) => OperationOutcome::Failed { error },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::test_support::MockAdapter;
    use std::time::Duration;

    fn op(id: &str, kind: SourceKind, op_kind: OperationKind, deps: &[&str]) -> Operation {
        Operation {
            id: id.to_string(),
            source_kind: kind,
            source_id: format!("{id}-source"),
            kind: op_kind,
            params: OperationSpec::Targeted { query: "select *".to_string() },
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn empty_plan_is_rejected() {
        let plan = Plan::default();
        let err = plan.validate(&HashSet::new()).unwrap_err();
        assert!(matches!(err, PlanError::Cycle(_) | PlanError::Empty));
    }

    #[test]
    fn cycle_is_detected_before_execution() {
        let plan = Plan {
            operations: vec![
                op("a", SourceKind::Relational, OperationKind::SimpleSelect, &["b"]),
                op("b", SourceKind::Relational, OperationKind::SimpleSelect, &["a"]),
            ],
        };
        let known: HashSet<String> = ["a-source".to_string(), "b-source".to_string()].into_iter().collect();
        let err = plan.validate(&known).unwrap_err();
        assert!(matches!(err, PlanError::Cycle(_)));
    }

    #[test]
    fn unknown_source_is_rejected() {
        let plan = Plan {
            operations: vec![op("a", SourceKind::Relational, OperationKind::SimpleSelect, &[])],
        };
        let err = plan.validate(&HashSet::new()).unwrap_err();
        assert!(matches!(err, PlanError::UnknownSource { .. }));
    }

    #[test]
    fn batching_respects_per_source_limit_and_makes_progress() {
        let ops: Vec<Operation> = (0..20)
            .map(|i| Operation {
                id: format!("op{i}"),
                source_kind: SourceKind::Relational,
                source_id: "r1".to_string(),
                kind: OperationKind::SimpleSelect,
                params: OperationSpec::Targeted { query: "select *".to_string() },
                depends_on: vec![],
            })
            .collect();
        let batches = build_batches(&ops, 16, 1_000_000);
        assert!(batches.len() >= 3, "expected at least 3 batches for 20 ops at limit 8, got {}", batches.len());
        for batch in &batches {
            assert!(batch.len() <= 8);
        }
        let total: usize = batches.iter().map(Vec::len).sum();
        assert_eq!(total, 20);
    }

    #[test]
    fn weight_cap_forces_progress_even_when_exceeded_by_single_op() {
        let ops = vec![op("heavy", SourceKind::Relational, OperationKind::ComplexAnalytics, &[])];
        let batches = build_batches(&ops, 16, 1);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec!["heavy".to_string()]);
    }

    #[tokio::test]
    async fn partial_failure_skips_dependents_but_keeps_sibling_results() {
        let registry = Arc::new(AdapterRegistry::new());

        let failing = Arc::new(MockAdapter::new(SourceKind::Relational, vec![]));
        failing.fail_with(AdapterError::new(crate::error::AdapterErrorKind::BadRequest, "bad"));
        registry.register("x-source", failing);
        registry.register(
            "y-source",
            Arc::new(MockAdapter::new(SourceKind::Relational, vec![serde_json::json!({"id": 1})])),
        );

        let plan = Plan {
            operations: vec![
                op("x", SourceKind::Relational, OperationKind::SimpleSelect, &[]),
                op("y", SourceKind::Relational, OperationKind::SimpleSelect, &[]),
                op("z", SourceKind::Relational, OperationKind::SimpleSelect, &["x"]),
            ],
        };
        let scheduler = ExecutionScheduler::new(registry);
        let deadline = Deadline::after(Duration::from_secs(5));
        let report = scheduler.execute(&plan, &deadline, None).await;

        assert!(matches!(report.results["x"].outcome, OperationOutcome::Failed { .. }));
        assert!(matches!(report.results["y"].outcome, OperationOutcome::Success { .. }));
        assert!(matches!(report.results["z"].outcome, OperationOutcome::SkippedDueToDependency));
        assert!(report.tool_success_rate() < 1.0);
    }
}
