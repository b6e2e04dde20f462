use thiserror::Error;

use crate::domain::graph::task_graph::Stage;
use crate::domain::utils::id::{NodeId, TargetGroupId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("File not found or could not be read: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse infrastructure JSON: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Invalid bootstrap setup: {}", .0.join("; "))]
    SetupValidationError(Vec<String>),

    #[error("Cluster topology needs at least {required} control-plane nodes, got {actual}")]
    TopologyError { required: usize, actual: usize },

    #[error("Could not reach {host}:{port}: {reason}")]
    ConnectionError { host: String, port: u16, reason: String },

    #[error("Remote command '{command}' failed (exit {exit_code:?}): {stderr}")]
    RemoteExecutionError { command: String, exit_code: Option<i32>, stderr: String },

    #[error("Failed to attach {node} to target group {target_group} on port {port}: {reason}")]
    AttachmentError { target_group: TargetGroupId, node: NodeId, port: u16, reason: String },

    #[error("Invalid task graph: {0}")]
    GraphError(String),

    #[error("Bootstrap failed with {} task failure(s), {not_issued} task(s) never issued: {}", .failures.len(), summarize(.failures))]
    BootstrapFailed { failures: Vec<TaskFailure>, not_issued: usize },
}

/// A single failed task inside a bootstrap run.
#[derive(Debug)]
pub struct TaskFailure {
    pub task: String,
    pub node: NodeId,
    pub stage: Stage,
    pub error: Error,
}

fn summarize(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("[{} / {} / {}] {}", f.stage, f.node, f.task, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;
