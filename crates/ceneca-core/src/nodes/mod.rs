//! Phase Nodes (C11): the workflow's individual graph steps, each
//! transforming a [`WorkflowState`](crate::workflow_state::WorkflowState) by
//! exactly one phase of §4.11: classify, fetch metadata, plan, execute,
//! visualize.

pub mod classification;
pub mod execution;
pub mod metadata;
pub mod planning;
pub mod visualization;

pub use classification::ClassificationNode;
pub use execution::ExecutionNode;
pub use metadata::MetadataNode;
pub use planning::PlanningNode;
pub use visualization::{ChartKind, VisualizationNode};
