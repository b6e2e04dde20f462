use futures::stream::{FuturesUnordered, StreamExt};
use slotmap::SecondaryMap;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::domain::graph::task_graph::{Stage, TaskAction, TaskGraph, TaskNode, TaskToken};
use crate::domain::remote::attacher::LoadBalancerAttacher;
use crate::domain::remote::executor::{CommandOutput, RemoteCommandExecutor};
use crate::error::{Error, Result, TaskFailure};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutput {
    Command(CommandOutput),
    Attached,
}

#[derive(Debug)]
pub enum TaskOutcome {
    Completed(TaskOutput),
    Failed(Error),

    /// A dependency failed or was itself skipped.
    Skipped { blocked_by: TaskToken },

    /// An earlier fail-fast stage aborted the run before this task's wave.
    NotIssued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceEvent {
    Issued,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub token: TaskToken,
    pub name: String,
    pub event: TraceEvent,
}

/// Result of running a [`TaskGraph`]. Holds one outcome per task.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    outcomes: SecondaryMap<TaskToken, TaskOutcome>,

    /// Every state change, in the order the runner observed it.
    pub trace: Vec<TraceEntry>,

    /// The fail-fast stage whose failure stopped the run, if any.
    pub aborted_at: Option<Stage>,
}

impl ExecutionReport {
    pub fn outcome(&self, token: TaskToken) -> Option<&TaskOutcome> {
        self.outcomes.get(token)
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.values().all(|outcome| matches!(outcome, TaskOutcome::Completed(_)))
    }

    pub fn is_completed(&self, token: TaskToken) -> bool {
        matches!(self.outcomes.get(token), Some(TaskOutcome::Completed(_)))
    }

    /// Standard output of a completed remote command.
    pub fn stdout(&self, token: TaskToken) -> Option<&str> {
        match self.outcomes.get(token) {
            Some(TaskOutcome::Completed(TaskOutput::Command(output))) => Some(output.stdout.as_str()),
            _ => None,
        }
    }

    pub fn completed_count(&self) -> usize {
        self.outcomes.values().filter(|o| matches!(o, TaskOutcome::Completed(_))).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.values().filter(|o| matches!(o, TaskOutcome::Failed(_))).count()
    }

    /// Tasks that were never issued, whether skipped behind a failure or cut off by an abort.
    pub fn never_issued_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, TaskOutcome::Skipped { .. } | TaskOutcome::NotIssued))
            .count()
    }

    /// Index of the first trace entry for `token` with the given event.
    pub fn position(&self, token: TaskToken, event: TraceEvent) -> Option<usize> {
        self.trace.iter().position(|entry| entry.token == token && entry.event == event)
    }

    /// Moves every task error out of the report, in trace order.
    pub fn into_failures(mut self, graph: &TaskGraph) -> Vec<TaskFailure> {
        let failed: Vec<TaskToken> =
            self.trace.iter().filter(|entry| entry.event == TraceEvent::Failed).map(|entry| entry.token).collect();

        failed
            .into_iter()
            .filter_map(|token| {
                let task = graph.get(token)?;
                match self.outcomes.remove(token)? {
                    TaskOutcome::Failed(error) => Some(TaskFailure {
                        task: task.name.clone(),
                        node: task.node.clone(),
                        stage: task.stage,
                        error,
                    }),
                    _ => None,
                }
            })
            .collect()
    }

    fn record(&mut self, graph: &TaskGraph, token: TaskToken, event: TraceEvent) {
        let name = graph.get(token).map(|t| t.name.clone()).unwrap_or_default();
        self.trace.push(TraceEntry { token, name, event });
    }
}

/// Executes a [`TaskGraph`] against a command executor and a load-balancer attacher.
///
/// Waves run one after another. Inside a wave a task is issued as soon as all of its
/// dependencies completed, with at most `max_in_flight` tasks outstanding. A failed task
/// marks everything downstream of it skipped; if it belongs to a fail-fast stage, no
/// later wave is issued.
#[derive(Debug, Clone)]
pub struct GraphRunner {
    executor: Arc<dyn RemoteCommandExecutor>,
    attacher: Arc<dyn LoadBalancerAttacher>,
    max_in_flight: usize,
}

impl GraphRunner {
    pub fn new(
        executor: Arc<dyn RemoteCommandExecutor>,
        attacher: Arc<dyn LoadBalancerAttacher>,
        max_in_flight: usize,
    ) -> Self {
        GraphRunner { executor, attacher, max_in_flight: max_in_flight.max(1) }
    }

    pub async fn run(&self, graph: &TaskGraph) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        let mut waves: Vec<u8> = graph.iter().map(|(_, task)| task.stage.wave()).collect();
        waves.sort_unstable();
        waves.dedup();

        for wave in waves {
            if report.aborted_at.is_some() {
                for (token, task) in graph.iter().filter(|(_, task)| task.stage.wave() == wave) {
                    log::debug!("Not issuing '{}': run aborted", task.name);
                    report.outcomes.insert(token, TaskOutcome::NotIssued);
                }
                continue;
            }

            self.run_wave(graph, wave, &mut report).await;
        }

        report
    }

    async fn run_wave(&self, graph: &TaskGraph, wave: u8, report: &mut ExecutionReport) {
        let members: Vec<TaskToken> =
            graph.iter().filter(|(_, task)| task.stage.wave() == wave).map(|(token, _)| token).collect();

        // Dependencies from earlier waves are already resolved; only count unresolved ones.
        let mut remaining: SecondaryMap<TaskToken, usize> = SecondaryMap::new();
        let mut ready: VecDeque<TaskToken> = VecDeque::new();
        for token in &members {
            let blocker = graph.dependencies(*token).iter().copied().find(|dep| {
                matches!(report.outcomes.get(*dep), Some(TaskOutcome::Failed(_) | TaskOutcome::Skipped { .. }))
            });
            if let Some(blocker) = blocker {
                self.skip_downstream(graph, *token, blocker, report);
                continue;
            }

            let unresolved = graph.dependencies(*token).iter().filter(|dep| !report.outcomes.contains_key(**dep)).count();
            remaining.insert(*token, unresolved);
            if unresolved == 0 {
                ready.push_back(*token);
            }
        }

        let mut in_flight = FuturesUnordered::new();
        let mut fail_fast_stage: Option<Stage> = None;

        loop {
            while in_flight.len() < self.max_in_flight {
                let Some(token) = ready.pop_front() else { break };
                if report.outcomes.contains_key(token) {
                    continue;
                }
                let Some(task) = graph.get(token) else { continue };

                log::info!("[{}] issuing '{}' on {}", task.stage, task.name, task.node);
                report.record(graph, token, TraceEvent::Issued);
                in_flight.push(self.dispatch(token, task));
            }

            let Some((token, result)) = in_flight.next().await else { break };
            let Some(task) = graph.get(token) else { continue };

            match result {
                Ok(output) => {
                    log::info!("[{}] '{}' on {} completed", task.stage, task.name, task.node);
                    report.outcomes.insert(token, TaskOutcome::Completed(output));
                    report.record(graph, token, TraceEvent::Completed);

                    for succ in graph.successors(token) {
                        if let Some(count) = remaining.get_mut(*succ) {
                            *count = count.saturating_sub(1);
                            if *count == 0 {
                                ready.push_back(*succ);
                            }
                        }
                    }
                }
                Err(error) => {
                    log::error!("[{}] '{}' on {} failed: {}", task.stage, task.name, task.node, error);
                    report.outcomes.insert(token, TaskOutcome::Failed(error));
                    report.record(graph, token, TraceEvent::Failed);

                    if task.stage.is_fail_fast() && fail_fast_stage.is_none() {
                        fail_fast_stage = Some(task.stage);
                    }
                    for succ in graph.successors(token) {
                        self.skip_downstream(graph, *succ, token, report);
                    }
                }
            }
        }

        if let Some(stage) = fail_fast_stage {
            log::error!("Stage {} failed, aborting the remaining stages", stage);
            report.aborted_at = Some(stage);
        }
    }

    /// Marks `token` and every unresolved task downstream of it as skipped.
    fn skip_downstream(&self, graph: &TaskGraph, token: TaskToken, blocked_by: TaskToken, report: &mut ExecutionReport) {
        let mut stack = vec![(token, blocked_by)];

        while let Some((current, blocker)) = stack.pop() {
            if report.outcomes.contains_key(current) {
                continue;
            }
            if let Some(task) = graph.get(current) {
                log::warn!("[{}] skipping '{}' on {}: a dependency did not complete", task.stage, task.name, task.node);
            }
            report.outcomes.insert(current, TaskOutcome::Skipped { blocked_by: blocker });
            report.record(graph, current, TraceEvent::Skipped);

            for succ in graph.successors(current) {
                stack.push((*succ, current));
            }
        }
    }

    async fn dispatch(&self, token: TaskToken, task: &TaskNode) -> (TaskToken, Result<TaskOutput>) {
        let result = match &task.action {
            TaskAction::Remote { connection, command } => {
                self.executor.execute(connection, command).await.map(TaskOutput::Command)
            }
            TaskAction::Attach { target_group, node, port } => {
                self.attacher.attach(target_group, node, *port).await.map(|_| TaskOutput::Attached)
            }
        };
        (token, result)
    }
}
