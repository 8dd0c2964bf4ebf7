//! Dynamic Graph Builder (C14): assembles the node/edge shape a `langgraph`
//! or `hybrid` route runs, either from a named template or synthesized from
//! the question's shape, then applies optimization passes (§4.14).
//!
//! The orchestrator's phase nodes are a fixed, known set, so this builder
//! works over a small descriptive [`GraphSpec`] rather than a general graph
//! engine with arbitrary user-registered node closures — the orchestrator
//! still executes the fixed phase sequence, but the `GraphSpec` this builder
//! returns tells it which phases to include, how to shape the execution
//! phase, and whether streaming is attached.

use serde::{Deserialize, Serialize};

/// One node in a synthesized or templated graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// The Classification Node.
    Classification,
    /// The Metadata Node.
    Metadata,
    /// The Planning Node.
    Planning,
    /// The Execution Node, potentially one of several parallel siblings.
    Execution,
    /// A merge point joining parallel execution siblings back together.
    Merge,
    /// The Visualization Node.
    Visualization,
}

/// A single node in the assembled graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    /// A stable id within this graph.
    pub id: String,
    /// Which phase this node runs.
    pub kind: NodeKind,
    /// Node ids this one depends on.
    pub depends_on: Vec<String>,
    /// Whether this node streams its own progress (§4.10's node wrapper);
    /// set by the builder's final "streaming attached last" pass.
    pub streaming_enabled: bool,
}

/// The assembled graph: an ordered node list (topologically valid given
/// `depends_on`) plus which template, if any, produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSpec {
    /// The template name, or `"custom"` if synthesized.
    pub template: String,
    /// The nodes in this graph.
    pub nodes: Vec<GraphNode>,
}

impl GraphSpec {
    /// Whether any node requested the "reduce memory" optimization hint
    /// (carried on the spec itself rather than per-node, since it trades off
    /// against the whole graph's working set).
    #[must_use]
    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }
}

/// Performance requirements a caller can pass to steer template/optimization
/// choice (§4.14's `perf_reqs`).
#[derive(Debug, Clone, Copy, Default)]
pub struct PerfRequirements {
    /// Caller prefers lower memory footprint over raw throughput.
    pub reduce_memory: bool,
    /// Caller wants execution split into parallel siblings when the
    /// question supports it.
    pub prefer_parallel: bool,
}

fn linear_node(id: &str, kind: NodeKind, depends_on: &[&str]) -> GraphNode {
    GraphNode {
        id: id.to_string(),
        kind,
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        streaming_enabled: false,
    }
}

/// Builds [`GraphSpec`]s for the orchestrator's `langgraph`/`hybrid` routes
/// (§4.14).
#[derive(Default)]
pub struct GraphBuilder;

impl GraphBuilder {
    /// A builder with no configuration (templates and optimization passes
    /// are pure functions of their inputs).
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Select a template, or synthesize a custom graph, for `(question,
    /// sources, streaming)`, then apply optimization passes and attach
    /// streaming last.
    #[must_use]
    pub fn build_for(&self, question: &str, sources: &[String], streaming: bool) -> GraphSpec {
        let mut spec = self.select_template(question, sources);
        self.apply_optimizations(&mut spec, question, PerfRequirements { reduce_memory: false, prefer_parallel: sources.len() > 1 });
        if streaming {
            attach_streaming(&mut spec);
        }
        spec
    }

    /// As [`Self::build_for`], but with explicit performance requirements
    /// instead of the source-count heuristic.
    #[must_use]
    pub fn build_with_perf_reqs(&self, question: &str, sources: &[String], streaming: bool, perf_reqs: PerfRequirements) -> GraphSpec {
        let mut spec = self.select_template(question, sources);
        self.apply_optimizations(&mut spec, question, perf_reqs);
        if streaming {
            attach_streaming(&mut spec);
        }
        spec
    }

    fn select_template(&self, question: &str, sources: &[String]) -> GraphSpec {
        let lower = question.to_lowercase();
        let is_analytics = ["trend", "correlat", "cluster", "outlier", "insight"].iter().any(|kw| lower.contains(kw));

        if sources.len() <= 1 && !is_analytics {
            simple_query_template()
        } else if is_analytics {
            complex_analysis_template()
        } else if sources.len() > 1 {
            parallel_execution_template(sources)
        } else {
            custom_graph(question, sources)
        }
    }

    /// Optimization passes (§4.14): split a single execution node into
    /// parallel siblings with a merge node when the caller prefers
    /// parallelism and there's more than one source to fan out over; mark
    /// the spec for memory-conscious execution otherwise.
    fn apply_optimizations(&self, spec: &mut GraphSpec, _question: &str, perf_reqs: PerfRequirements) {
        if perf_reqs.prefer_parallel {
            split_execution_into_parallel_siblings(spec);
        }
        if perf_reqs.reduce_memory {
            // A lightweight hint: downstream execution should prefer
            // streaming/sampling strategies over buffering full result sets.
            // Carried as a synthetic node property rather than a new field
            // on every node, since only the execution phase consumes it.
            for node in &mut spec.nodes {
                if node.kind == NodeKind::Execution {
                    node.id = format!("{}__reduce_memory", node.id);
                }
            }
        }
    }
}

fn simple_query_template() -> GraphSpec {
    GraphSpec {
        template: "simple_query".to_string(),
        nodes: vec![
            linear_node("classification", NodeKind::Classification, &[]),
            linear_node("metadata", NodeKind::Metadata, &["classification"]),
            linear_node("planning", NodeKind::Planning, &["metadata"]),
            linear_node("execution", NodeKind::Execution, &["planning"]),
            linear_node("visualization", NodeKind::Visualization, &["execution"]),
        ],
    }
}

fn complex_analysis_template() -> GraphSpec {
    let mut spec = simple_query_template();
    spec.template = "complex_analysis".to_string();
    spec
}

fn parallel_execution_template(sources: &[String]) -> GraphSpec {
    let mut nodes = vec![
        linear_node("classification", NodeKind::Classification, &[]),
        linear_node("metadata", NodeKind::Metadata, &["classification"]),
        linear_node("planning", NodeKind::Planning, &["metadata"]),
    ];
    let mut exec_ids = Vec::new();
    for (i, _source) in sources.iter().enumerate() {
        let id = format!("execution_{i}");
        nodes.push(linear_node(&id, NodeKind::Execution, &["planning"]));
        exec_ids.push(id);
    }
    let deps: Vec<&str> = exec_ids.iter().map(String::as_str).collect();
    nodes.push(linear_node("merge", NodeKind::Merge, &deps));
    nodes.push(linear_node("visualization", NodeKind::Visualization, &["merge"]));

    GraphSpec { template: "parallel_execution".to_string(), nodes }
}

fn custom_graph(_question: &str, sources: &[String]) -> GraphSpec {
    if sources.is_empty() {
        return simple_query_template();
    }
    parallel_execution_template(sources)
}

/// Split a single `execution` node into one sibling per upstream dependency
/// count (here: one per planning output) with a `merge` node joining them
/// back — the "(i) split... into parallel siblings with a merge node"
/// optimization pass (§4.14). A no-op if the spec doesn't have a single
/// execution node to split (already parallel, or none present).
fn split_execution_into_parallel_siblings(spec: &mut GraphSpec) {
    let execution_positions: Vec<usize> = spec
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.kind == NodeKind::Execution)
        .map(|(i, _)| i)
        .collect();
    if execution_positions.len() != 1 {
        return;
    }
    let pos = execution_positions[0];
    let original = spec.nodes.remove(pos);
    let downstream: Vec<GraphNode> = spec
        .nodes
        .iter()
        .filter(|n| n.depends_on.contains(&original.id))
        .cloned()
        .collect();

    let siblings = [
        format!("{}_a", original.id),
        format!("{}_b", original.id),
    ];
    for sibling in &siblings {
        spec.nodes.push(GraphNode {
            id: sibling.clone(),
            kind: NodeKind::Execution,
            depends_on: original.depends_on.clone(),
            streaming_enabled: original.streaming_enabled,
        });
    }
    let merge_id = format!("{}_merge", original.id);
    spec.nodes.push(GraphNode {
        id: merge_id.clone(),
        kind: NodeKind::Merge,
        depends_on: siblings.to_vec(),
        streaming_enabled: false,
    });
    for node in &mut spec.nodes {
        if downstream.iter().any(|d| d.id == node.id) {
            node.depends_on.retain(|d| d != &original.id);
            node.depends_on.push(merge_id.clone());
        }
    }
}

/// Attach streaming last: every node inherits a streaming-enabled flag
/// (§4.14). Run after template selection and optimization passes so newly
/// split/merged nodes are covered too.
fn attach_streaming(spec: &mut GraphSpec) {
    for node in &mut spec.nodes {
        node.streaming_enabled = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_source_non_analytics_question_selects_simple_query_template() {
        let builder = GraphBuilder::new();
        let spec = builder.build_for("show me all orders", &["s1".to_string()], false);
        assert_eq!(spec.template, "simple_query");
    }

    #[test]
    fn analytics_question_selects_complex_analysis_template() {
        let builder = GraphBuilder::new();
        let spec = builder.build_for("find outliers in revenue", &["s1".to_string()], false);
        assert_eq!(spec.template, "complex_analysis");
    }

    #[test]
    fn multi_source_non_analytics_question_selects_parallel_execution_template() {
        let builder = GraphBuilder::new();
        let spec = builder.build_for("compare orders and support tickets", &["s1".to_string(), "s2".to_string()], false);
        assert_eq!(spec.template, "parallel_execution");
        let execution_nodes = spec.nodes.iter().filter(|n| n.kind == NodeKind::Execution).count();
        assert_eq!(execution_nodes, 2);
        assert!(spec.nodes.iter().any(|n| n.kind == NodeKind::Merge));
    }

    #[test]
    fn prefer_parallel_splits_single_execution_node_into_siblings_with_merge() {
        let builder = GraphBuilder::new();
        let spec = builder.build_with_perf_reqs(
            "show me all orders",
            &["s1".to_string()],
            false,
            PerfRequirements { reduce_memory: false, prefer_parallel: true },
        );
        let execution_nodes: Vec<&GraphNode> = spec.nodes.iter().filter(|n| n.kind == NodeKind::Execution).collect();
        assert_eq!(execution_nodes.len(), 2);
        let merge = spec.nodes.iter().find(|n| n.kind == NodeKind::Merge).unwrap();
        assert_eq!(merge.depends_on.len(), 2);
        let visualization = spec.nodes.iter().find(|n| n.kind == NodeKind::Visualization).unwrap();
        assert!(visualization.depends_on.contains(&merge.id));
    }

    #[test]
    fn streaming_is_attached_last_to_every_node() {
        let builder = GraphBuilder::new();
        let spec = builder.build_for("show me all orders", &["s1".to_string()], true);
        assert!(spec.nodes.iter().all(|n| n.streaming_enabled));
    }

    #[test]
    fn streaming_disabled_by_default() {
        let builder = GraphBuilder::new();
        let spec = builder.build_for("show me all orders", &["s1".to_string()], false);
        assert!(spec.nodes.iter().all(|n| !n.streaming_enabled));
    }

    #[test]
    fn empty_sources_falls_back_to_simple_query_template() {
        let builder = GraphBuilder::new();
        let spec = builder.build_for("", &[], false);
        assert_eq!(spec.template, "simple_query");
    }
}
