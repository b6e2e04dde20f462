use serde::Serialize;
use slotmap::{SecondaryMap, SlotMap, new_key_type};
use std::collections::VecDeque;
use std::fmt;

use crate::domain::cluster::node::Node;
use crate::domain::remote::command::RemoteCommand;
use crate::domain::remote::connection::ConnectionDescriptor;
use crate::domain::utils::id::{NodeId, TargetGroupId};
use crate::error::{Error, Result};

new_key_type! {
    /// Completion handle of one task in a [`TaskGraph`].
    pub struct TaskToken;
}

/// Bootstrap stage a task belongs to, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Stage {
    LeaderBootstrap,
    LeaderAttachment,
    FollowerJoin,
    FollowerAttachment,
    WorkerAttachment,
    WorkerJoin,
    ArtifactCapture,
}

impl Stage {
    /// Waves run strictly one after another. The leader stages each get their own wave
    /// so nothing is attached or joined until the leader is up and reachable; every
    /// later stage shares the last wave and is ordered by its dependencies alone.
    pub fn wave(&self) -> u8 {
        match self {
            Stage::LeaderBootstrap => 0,
            Stage::LeaderAttachment => 1,
            _ => 2,
        }
    }

    /// A failure in a fail-fast stage aborts the run before the next wave is issued.
    pub fn is_fail_fast(&self) -> bool {
        self.wave() < 2
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::LeaderBootstrap => "1-leader-bootstrap",
            Stage::LeaderAttachment => "2-leader-attachment",
            Stage::FollowerJoin => "3-follower-join",
            Stage::FollowerAttachment => "4-follower-attachment",
            Stage::WorkerAttachment => "5a-worker-attachment",
            Stage::WorkerJoin => "5b-worker-join",
            Stage::ArtifactCapture => "6-artifact-capture",
        };
        write!(f, "{}", name)
    }
}

/// The side effect a task performs once its dependencies are complete.
#[derive(Debug, Clone)]
pub enum TaskAction {
    Remote { connection: ConnectionDescriptor, command: RemoteCommand },
    Attach { target_group: TargetGroupId, node: Node, port: u16 },
}

#[derive(Debug, Clone)]
pub struct TaskNode {
    pub name: String,
    pub stage: Stage,
    pub node: NodeId,
    pub action: TaskAction,

    /// Tokens that must complete successfully before this task is issued.
    pub depends_on: Vec<TaskToken>,
}

/// Append-only DAG of bootstrap tasks.
///
/// A task may only depend on tokens that already exist, so cycles cannot be built.
/// The graph is complete before anything runs and read-only while it runs.
#[derive(Debug, Default)]
pub struct TaskGraph {
    tasks: SlotMap<TaskToken, TaskNode>,

    /// Reverse edges, kept in step with `depends_on`.
    successors: SecondaryMap<TaskToken, Vec<TaskToken>>,

    /// Insertion order, used to keep every traversal deterministic.
    order: Vec<TaskToken>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task and returns its token.
    ///
    /// # Errors
    /// `GraphError` if a dependency is unknown or belongs to a later wave than the task.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        stage: Stage,
        node: NodeId,
        action: TaskAction,
        depends_on: &[TaskToken],
    ) -> Result<TaskToken> {
        let name = name.into();

        for dep in depends_on {
            let Some(dep_task) = self.tasks.get(*dep) else {
                return Err(Error::GraphError(format!("task '{}' depends on an unknown token {:?}", name, dep)));
            };
            if dep_task.stage.wave() > stage.wave() {
                return Err(Error::GraphError(format!(
                    "task '{}' ({}) cannot depend on '{}' ({}) from a later wave",
                    name, stage, dep_task.name, dep_task.stage
                )));
            }
        }

        let mut deps = depends_on.to_vec();
        deps.dedup();

        let token = self.tasks.insert(TaskNode { name, stage, node, action, depends_on: deps.clone() });
        self.successors.insert(token, Vec::new());
        for dep in deps {
            if let Some(succ) = self.successors.get_mut(dep) {
                succ.push(token);
            }
        }
        self.order.push(token);

        Ok(token)
    }

    pub fn get(&self, token: TaskToken) -> Option<&TaskNode> {
        self.tasks.get(token)
    }

    pub fn dependencies(&self, token: TaskToken) -> &[TaskToken] {
        self.tasks.get(token).map(|t| t.depends_on.as_slice()).unwrap_or(&[])
    }

    pub fn successors(&self, token: TaskToken) -> &[TaskToken] {
        self.successors.get(token).map(|s| s.as_slice()).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (TaskToken, &TaskNode)> {
        self.order.iter().filter_map(|token| self.tasks.get(*token).map(|task| (*token, task)))
    }

    /// True if `ancestor` is reachable from `token` by following dependencies.
    pub fn depends_transitively(&self, token: TaskToken, ancestor: TaskToken) -> bool {
        let mut stack: Vec<TaskToken> = self.dependencies(token).to_vec();
        let mut seen = SecondaryMap::new();

        while let Some(current) = stack.pop() {
            if current == ancestor {
                return true;
            }
            if seen.insert(current, ()).is_none() {
                stack.extend_from_slice(self.dependencies(current));
            }
        }
        false
    }

    /// Kahn's algorithm, ties broken by insertion order.
    pub fn topological_order(&self) -> Vec<TaskToken> {
        let mut remaining: SecondaryMap<TaskToken, usize> = SecondaryMap::new();
        for (token, task) in self.iter() {
            remaining.insert(token, task.depends_on.len());
        }

        let mut queue: VecDeque<TaskToken> = self.order.iter().copied().filter(|t| remaining.get(*t) == Some(&0)).collect();
        let mut sorted = Vec::with_capacity(self.tasks.len());

        while let Some(token) = queue.pop_front() {
            sorted.push(token);
            for succ in self.successors(token) {
                if let Some(count) = remaining.get_mut(*succ) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(*succ);
                    }
                }
            }
        }

        sorted
    }
}
