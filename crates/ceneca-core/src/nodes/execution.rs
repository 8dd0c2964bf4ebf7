//! Execution Node: hands the planned DAG to the scheduler and folds its
//! report back into the workflow state.

use std::sync::Arc;

use crate::adapter::Deadline;
use crate::error::{Error, PlanError, Result};
use crate::scheduler::{ExecutionReport, ExecutionScheduler, OperationOutcome};
use crate::workflow_state::{StepRecord, WorkflowState};

/// Dispatches `state.execution_plan` through an [`ExecutionScheduler`].
pub struct ExecutionNode {
    scheduler: Arc<ExecutionScheduler>,
}

impl ExecutionNode {
    /// Construct a node over the given scheduler.
    #[must_use]
    pub fn new(scheduler: Arc<ExecutionScheduler>) -> Self {
        Self { scheduler }
    }

    /// Execute the state's current plan against its total timeout, folding
    /// every operation result back into the state and updating performance
    /// metrics. Fails if no plan has been set by the Planning Node.
    pub async fn run(&self, state: &mut WorkflowState) -> Result<ExecutionReport> {
        let plan = state
            .execution_plan
            .clone()
            .ok_or_else(|| Error::Plan(PlanError::Empty))?;
        let deadline = Deadline::after(state.timeout_settings.total);

        let report = self.scheduler.execute(&plan, &deadline, None).await;

        for (op_id, result) in &report.results {
            state.performance_metrics.operations_dispatched += 1;
            state.performance_metrics.total_execution_time_ms += result.duration_ms;
            if matches!(result.outcome, OperationOutcome::Failed { .. }) {
                state.performance_metrics.operations_failed += 1;
            }
            state.record_operation_result(op_id.clone(), result.clone());
        }

        state.step_history.push(StepRecord {
            node_id: "execution".to_string(),
            summary: format!(
                "dispatched {} batch(es), success rate {:.2}",
                report.batch_count,
                report.tool_success_rate()
            ),
            timestamp: chrono::Utc::now(),
        });
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterRegistry;
    use crate::adapter::test_support::MockAdapter;
    use crate::registry::SourceKind;
    use crate::scheduler::{Operation, OperationKind, OperationSpec, Plan};
    use crate::workflow_state::WorkflowKind;

    #[tokio::test]
    async fn folds_results_into_state_and_records_metrics() {
        let registry = Arc::new(AdapterRegistry::new());
        registry.register(
            "s1",
            Arc::new(MockAdapter::new(SourceKind::Relational, vec![serde_json::json!({"id": 1})])),
        );
        let scheduler = Arc::new(ExecutionScheduler::new(registry));
        let node = ExecutionNode::new(scheduler);

        let mut state = WorkflowState::new("sess", "q", WorkflowKind::DataAnalysis);
        state.execution_plan = Some(Plan {
            operations: vec![Operation {
                id: "op0".to_string(),
                source_kind: SourceKind::Relational,
                source_id: "s1".to_string(),
                kind: OperationKind::SimpleSelect,
                params: OperationSpec::Targeted { query: "select *".to_string() },
                depends_on: vec![],
            }],
        });

        let report = node.run(&mut state).await.unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(state.operation_results.len(), 1);
        assert_eq!(state.performance_metrics.operations_dispatched, 1);
        assert_eq!(state.performance_metrics.operations_failed, 0);
        assert_eq!(state.partial_results.len(), 1);
    }

    #[tokio::test]
    async fn missing_plan_is_rejected() {
        let scheduler = Arc::new(ExecutionScheduler::new(Arc::new(AdapterRegistry::new())));
        let node = ExecutionNode::new(scheduler);
        let mut state = WorkflowState::new("sess", "q", WorkflowKind::DataAnalysis);
        let err = node.run(&mut state).await.unwrap_err();
        assert!(matches!(err, Error::Plan(PlanError::Empty)));
    }
}
