//! Visualization Node: suggests a chart shape for the final result set from
//! the question's phrasing, and packages it alongside the row count into
//! the value the Synthesis stage embeds in its output.

use serde::{Deserialize, Serialize};

use crate::adapter::Row;
use crate::workflow_state::{StepRecord, WorkflowState};

/// The suggested chart shape for a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    /// Categorical comparison.
    Bar,
    /// A series over time.
    Line,
    /// Pairwise relationship between two numeric columns.
    Scatter,
    /// No chart suggested; render as a table.
    Table,
}

/// Chooses a [`ChartKind`] from the question's phrasing and renders a small
/// visualization spec the HTTP layer can hand to a front end as-is.
pub struct VisualizationNode;

impl VisualizationNode {
    /// Suggest a chart kind for `question` given the shape of `rows`.
    #[must_use]
    pub fn suggest_chart(&self, question: &str, rows: &[Row]) -> ChartKind {
        let lower = question.to_lowercase();
        if lower.contains("trend") || lower.contains("over time") {
            ChartKind::Line
        } else if lower.contains("correlat") || lower.contains("scatter") {
            ChartKind::Scatter
        } else if lower.contains("chart") || lower.contains("compare") || lower.contains("visuali") {
            ChartKind::Bar
        } else if rows.len() > 1 {
            ChartKind::Table
        } else {
            ChartKind::Table
        }
    }

    /// Build the visualization spec and record a step on `state`.
    pub fn run(&self, state: &mut WorkflowState, rows: &[Row]) -> serde_json::Value {
        let kind = self.suggest_chart(&state.question, rows);
        state.step_history.push(StepRecord {
            node_id: "visualization".to_string(),
            summary: format!("suggested {kind:?} chart for {} row(s)", rows.len()),
            timestamp: chrono::Utc::now(),
        });
        serde_json::json!({
            "chart_kind": kind,
            "row_count": rows.len(),
        })
    }
}
