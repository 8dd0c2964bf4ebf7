//! Planning Node: turns the resolved tables into an [`Operation`] DAG,
//! classifying the question into an [`OperationKind`] and, for analytics
//! questions, appending an `Insights` op that depends on every summary.

use std::collections::HashSet;
use std::sync::Arc;

use crate::adapter::InsightKind;
use crate::error::{Error, PlanError, Result};
use crate::registry::{SchemaRegistry, SourceKind};
use crate::scheduler::{Operation, OperationKind, OperationSpec, Plan};
use crate::workflow_state::{StepRecord, WorkflowState};

/// Which of the three planning strategies (§4.11) a plan was built under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanningStrategy {
    /// A single source kind, no independent subqueries: one linear batch.
    Simple,
    /// A single source kind, but the question decomposes into independent
    /// subqueries that can run without waiting on each other.
    Parallel,
    /// More than one source kind is in play: tables from different kinds
    /// have no implicit ordering relative to each other.
    CrossDatabase,
}

impl PlanningStrategy {
    /// Choose a strategy by the §4.11 rule: more than one distinct source
    /// kind always wins as `cross_database`; otherwise `parallel` when the
    /// question reads as independent subqueries, else `simple`.
    #[must_use]
    pub fn choose(source_kind_count: usize, question: &str) -> Self {
        if source_kind_count > 1 {
            PlanningStrategy::CrossDatabase
        } else if is_decomposable(question) {
            PlanningStrategy::Parallel
        } else {
            PlanningStrategy::Simple
        }
    }
}

/// A question "decomposes into independent subqueries" when it joins two or
/// more query-shaped clauses with a conjunction, e.g. "show me orders and
/// list customers". A single `and`-joined clause pair without a second
/// query-intent keyword is just a compound noun phrase ("name and email"),
/// not two subqueries, so both sides must carry their own intent keyword.
fn is_decomposable(question: &str) -> bool {
    const INTENT_KEYWORDS: [&str; 8] = ["show", "list", "count", "how many", "what", "compare", "find", "get"];
    let lower = question.to_lowercase();
    let Some((before, after)) = lower.split_once(" and ") else {
        return false;
    };
    let has_intent = |clause: &str| INTENT_KEYWORDS.iter().any(|kw| clause.contains(kw));
    has_intent(before) && has_intent(after)
}

/// Builds a [`Plan`] from a workflow state's resolved tables.
pub struct PlanningNode {
    registry: Arc<dyn SchemaRegistry>,
}

impl PlanningNode {
    /// Construct a node over the given registry (used to resolve each
    /// table's owning source kind).
    #[must_use]
    pub fn new(registry: Arc<dyn SchemaRegistry>) -> Self {
        Self { registry }
    }

    /// Build and record a plan, or fail with [`PlanError::Empty`] if no
    /// tables were resolved by the Metadata Node.
    pub async fn run(&self, state: &mut WorkflowState) -> Result<Plan> {
        if state.available_tables.is_empty() {
            return Err(Error::Plan(PlanError::Empty));
        }

        let op_kind = classify_operation_kind(&state.question);
        let mut operations = Vec::new();
        let mut summary_ids = Vec::new();
        let mut source_kinds = HashSet::new();

        let key_tables: HashSet<String> = state
            .unified_metadata
            .as_ref()
            .map(|bundle| bundle.common_patterns.common_table_names.iter().cloned().collect())
            .unwrap_or_default();
        let mut key_table_ops: std::collections::HashMap<String, String> = std::collections::HashMap::new();

        for (i, table_ref) in state.available_tables.iter().enumerate() {
            let Some((source_id, table_name)) = table_ref.split_once('.') else {
                continue;
            };
            let source_kind = self
                .registry
                .get_source(source_id)
                .await?
                .map(|s| s.kind)
                .unwrap_or(SourceKind::Other);
            source_kinds.insert(source_kind);

            // A key table shared across sources gets fetched once up front;
            // every op reading it depends on that single pre-step instead of
            // re-fetching the same table per source.
            let mut depends_on = Vec::new();
            if key_tables.contains(table_name) {
                let pre_step_id = key_table_ops.entry(table_name.to_string()).or_insert_with(|| {
                    let pre_step_id = format!("keytable_{table_name}");
                    operations.push(Operation {
                        id: pre_step_id.clone(),
                        source_kind,
                        source_id: source_id.to_string(),
                        kind: OperationKind::SimpleSelect,
                        params: OperationSpec::Summary {
                            table: table_name.to_string(),
                            columns: None,
                        },
                        depends_on: vec![],
                    });
                    pre_step_id
                });
                depends_on.push(pre_step_id.clone());
            }

            let id = format!("op{i}");
            operations.push(Operation {
                id: id.clone(),
                source_kind,
                source_id: source_id.to_string(),
                // A downstream Insights op carries the analytics weight;
                // its inputs stay simple summary fetches.
                kind: if op_kind == OperationKind::ComplexAnalytics { OperationKind::SimpleSelect } else { op_kind },
                params: OperationSpec::Summary {
                    table: table_name.to_string(),
                    columns: None,
                },
                depends_on,
            });
            summary_ids.push(id);
        }

        let strategy = PlanningStrategy::choose(source_kinds.len(), &state.question);

        if op_kind == OperationKind::ComplexAnalytics {
            let first_summary = summary_ids.first().and_then(|id| operations.iter().find(|op| &op.id == id).cloned());
            if let Some(first) = first_summary {
                operations.push(Operation {
                    id: "insights".to_string(),
                    source_kind: first.source_kind,
                    source_id: first.source_id,
                    kind: OperationKind::ComplexAnalytics,
                    params: OperationSpec::Insights {
                        kind: insight_kind_for(&state.question),
                    },
                    depends_on: summary_ids,
                });
            }
        }

        let plan = Plan { operations };
        state.execution_plan = Some(plan.clone());
        state.step_history.push(StepRecord {
            node_id: "planning".to_string(),
            summary: format!("built a plan with {} operation(s), strategy={strategy:?}", plan.operations.len()),
            timestamp: chrono::Utc::now(),
        });
        Ok(plan)
    }
}

/// Classify a question's operation complexity from keyword heuristics,
/// mirroring the coarse-grained approach the trivial classifier takes for
/// the trivial/data-analysis split.
fn classify_operation_kind(question: &str) -> OperationKind {
    let lower = question.to_lowercase();
    if lower.contains("join") {
        OperationKind::CrossJoin
    } else if ["trend", "correlat", "cluster", "outlier"].iter().any(|kw| lower.contains(kw)) {
        OperationKind::ComplexAnalytics
    } else if ["similar", "nearest", "embedding", "vector"].iter().any(|kw| lower.contains(kw)) {
        OperationKind::VectorSearch
    } else if ["aggregate", "sum", "average", "count", "group by"].iter().any(|kw| lower.contains(kw)) {
        OperationKind::Aggregation
    } else {
        OperationKind::SimpleSelect
    }
}

fn insight_kind_for(question: &str) -> InsightKind {
    let lower = question.to_lowercase();
    if lower.contains("outlier") {
        InsightKind::Outliers
    } else if lower.contains("trend") {
        InsightKind::Trends
    } else if lower.contains("cluster") {
        InsightKind::Clusters
    } else {
        InsightKind::Correlations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemorySchemaRegistry;
    use crate::workflow_state::WorkflowKind;

    async fn state_with_tables(question: &str) -> WorkflowState {
        let mut state = WorkflowState::new("sess", question, WorkflowKind::DataAnalysis);
        state.available_tables = vec!["s1.orders".to_string(), "s1.customers".to_string()];
        state
    }

    async fn registry_with_s1() -> Arc<InMemorySchemaRegistry> {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        registry.upsert_source("s1", "uri", SourceKind::Relational).await.unwrap();
        registry
    }

    #[tokio::test]
    async fn simple_question_yields_one_op_per_table() {
        let node = PlanningNode::new(registry_with_s1().await);
        let mut state = state_with_tables("show me all orders").await;
        let plan = node.run(&mut state).await.unwrap();
        assert_eq!(plan.operations.len(), 2);
        assert!(plan.operations.iter().all(|op| op.kind == OperationKind::SimpleSelect));
    }

    #[tokio::test]
    async fn analytics_question_appends_insights_op_depending_on_summaries() {
        let node = PlanningNode::new(registry_with_s1().await);
        let mut state = state_with_tables("find outliers in order totals").await;
        let plan = node.run(&mut state).await.unwrap();
        assert_eq!(plan.operations.len(), 3);
        let insights = plan.operations.iter().find(|op| op.id == "insights").unwrap();
        assert_eq!(insights.depends_on.len(), 2);
        assert!(matches!(insights.params, OperationSpec::Insights { kind: InsightKind::Outliers }));
    }

    #[tokio::test]
    async fn empty_tables_is_rejected() {
        let node = PlanningNode::new(registry_with_s1().await);
        let mut state = WorkflowState::new("sess", "q", WorkflowKind::DataAnalysis);
        let err = node.run(&mut state).await.unwrap_err();
        assert!(matches!(err, Error::Plan(PlanError::Empty)));
    }

    #[tokio::test]
    async fn key_table_shared_across_sources_gets_a_pre_step() {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        registry.upsert_source("s1", "uri", SourceKind::Relational).await.unwrap();
        let node = PlanningNode::new(registry);
        let mut state = state_with_tables("show me all orders").await;
        state.unified_metadata = Some(crate::workflow_state::UnifiedSchemaBundle {
            common_patterns: crate::workflow_state::CommonPatterns {
                common_table_names: vec!["orders".to_string()],
                cross_database_relationships: vec![],
            },
            ..Default::default()
        });

        let plan = node.run(&mut state).await.unwrap();
        let pre_step = plan.operations.iter().find(|op| op.id == "keytable_orders").expect("pre-step present");
        assert!(pre_step.depends_on.is_empty());
        let orders_op = plan.operations.iter().find(|op| op.id == "op0").unwrap();
        assert_eq!(orders_op.depends_on, vec!["keytable_orders".to_string()]);
        let customers_op = plan.operations.iter().find(|op| op.id == "op1").unwrap();
        assert!(customers_op.depends_on.is_empty());
    }

    #[test]
    fn strategy_is_cross_database_with_more_than_one_source_kind() {
        assert_eq!(PlanningStrategy::choose(2, "show me orders"), PlanningStrategy::CrossDatabase);
    }

    #[test]
    fn strategy_is_parallel_for_decomposable_question() {
        assert_eq!(
            PlanningStrategy::choose(1, "show me orders and list customers"),
            PlanningStrategy::Parallel
        );
    }

    #[test]
    fn strategy_is_simple_for_a_single_plain_question() {
        assert_eq!(PlanningStrategy::choose(1, "show me all orders"), PlanningStrategy::Simple);
    }

    #[test]
    fn conjunction_without_two_intents_is_not_decomposable() {
        // "name and email" is a compound noun phrase, not two subqueries.
        assert_eq!(PlanningStrategy::choose(1, "show me name and email"), PlanningStrategy::Simple);
    }
}
