use std::fmt::Write as _;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::BootstrapConfig;
use crate::domain::bootstrap::exports::ClusterExports;
use crate::domain::bootstrap::kubeconfig::KubeconfigRewriter;
use crate::domain::cluster::infrastructure::LoadBalancer;
use crate::domain::cluster::node::{MIN_CONTROL_PLANE_NODES, Node};
use crate::domain::cluster::request::BootstrapRequest;
use crate::domain::graph::runner::{ExecutionReport, GraphRunner};
use crate::domain::graph::task_graph::{Stage, TaskAction, TaskGraph, TaskToken};
use crate::domain::remote::attacher::LoadBalancerAttacher;
use crate::domain::remote::command::{CommandBuilder, CommandKind, RemoteCommand, ServerDirective};
use crate::domain::remote::connection::ConnectionResolver;
use crate::domain::remote::executor::RemoteCommandExecutor;
use crate::domain::utils::id::NodeId;
use crate::error::{Error, Result, TaskFailure};

/// Tokens of one node's join, enable and start commands. `start` doubles as the
/// node's "ready" token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSequence {
    pub join: TaskToken,
    pub enable: TaskToken,
    pub start: TaskToken,
}

impl NodeSequence {
    pub fn ready(&self) -> TaskToken {
        self.start
    }
}

/// The terminal tokens that together mean "the cluster is joined".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinedTokens {
    /// One per node: leader, followers, then workers.
    pub ready: Vec<TaskToken>,

    /// Leader first, then followers.
    pub control_plane_attachments: Vec<TaskToken>,
    pub worker_attachments: Vec<TaskToken>,
}

impl JoinedTokens {
    pub fn len(&self) -> usize {
        self.ready.len() + self.control_plane_attachments.len() + self.worker_attachments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = TaskToken> + '_ {
        self.ready.iter().chain(&self.control_plane_attachments).chain(&self.worker_attachments).copied()
    }
}

/// The fully constructed task graph of one bootstrap run, plus named handles into it.
#[derive(Debug)]
pub struct BootstrapPlan {
    pub graph: TaskGraph,
    pub leader: NodeSequence,
    pub leader_attached: TaskToken,
    pub followers: Vec<(NodeId, NodeSequence)>,
    pub follower_attachments: Vec<TaskToken>,
    pub workers: Vec<(NodeId, NodeSequence)>,
    pub worker_attachments: Vec<TaskToken>,
    pub capture: TaskToken,

    /// Exports known before anything runs. The access configuration is added after capture.
    pub exports: ClusterExports,
}

impl BootstrapPlan {
    pub fn leader_ready(&self) -> TaskToken {
        self.leader.ready()
    }

    pub fn joined(&self) -> JoinedTokens {
        let ready = std::iter::once(self.leader.ready())
            .chain(self.followers.iter().map(|(_, seq)| seq.ready()))
            .chain(self.workers.iter().map(|(_, seq)| seq.ready()))
            .collect();

        let control_plane_attachments =
            std::iter::once(self.leader_attached).chain(self.follower_attachments.iter().copied()).collect();

        JoinedTokens { ready, control_plane_attachments, worker_attachments: self.worker_attachments.clone() }
    }

    /// One line per task in topological order: stage, task, node and dependency names.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for token in self.graph.topological_order() {
            let Some(task) = self.graph.get(token) else { continue };
            let deps: Vec<&str> = task
                .depends_on
                .iter()
                .filter_map(|dep| self.graph.get(*dep).map(|d| d.name.as_str()))
                .collect();
            let _ = writeln!(out, "{:<24} {:<44} after [{}]", task.stage.to_string(), task.name, deps.join(", "));
        }
        out
    }
}

/// Outcome of a successful run.
#[derive(Debug)]
pub struct BootstrapResult {
    /// Access configuration pointing at the control-plane load balancer.
    pub kubeconfig: String,
    pub exports: ClusterExports,
    pub joined: JoinedTokens,
    pub report: ExecutionReport,
}

/// Builds and executes the staged bootstrap graph of an HA cluster.
///
/// 1. leader bootstrap (join, enable, start on the leader)
/// 2. leader attachment to the control-plane target group
/// 3. follower joins, each after the leader is ready and attached
/// 4. follower attachments, once every follower is ready
/// 5. worker attachment to the worker target group, and worker joins
/// 6. capture of the access configuration from the leader
#[derive(Debug)]
pub struct BootstrapOrchestrator {
    config: BootstrapConfig,
    resolver: ConnectionResolver,
    runner: GraphRunner,
}

impl BootstrapOrchestrator {
    pub fn new(
        config: BootstrapConfig,
        executor: Arc<dyn RemoteCommandExecutor>,
        attacher: Arc<dyn LoadBalancerAttacher>,
    ) -> Self {
        let resolver = ConnectionResolver::new(&config.ssh);
        let runner = GraphRunner::new(executor, attacher, config.runner.max_in_flight);
        BootstrapOrchestrator { config, resolver, runner }
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Builds the complete task graph without issuing anything.
    ///
    /// # Errors
    /// `TopologyError` when the control plane has fewer than two nodes.
    pub fn plan(&self, request: &BootstrapRequest) -> Result<BootstrapPlan> {
        request.topology.validate()?;
        let leader = request
            .topology
            .leader()
            .ok_or(Error::TopologyError { required: MIN_CONTROL_PLANE_NODES, actual: 0 })?;

        let commands = CommandBuilder::new(&self.config);
        let credentials = &request.credentials;
        let datastore_uri = request.database.connection_uri(&self.config.control_plane.datastore_database);
        let join_endpoint = request.control_plane_lb.endpoint();

        let mut graph = TaskGraph::new();

        let leader_command = commands.leader_bootstrap(
            &server_directive(request, leader, &datastore_uri),
            &[request.control_plane_lb.dns_name.as_str(), request.worker_lb.dns_name.as_str()],
        );
        let leader_seq = self.add_sequence(&mut graph, Stage::LeaderBootstrap, leader, request, leader_command, &[])?;

        let leader_attached =
            self.add_attachment(&mut graph, Stage::LeaderAttachment, "attach-control-plane", leader, &request.control_plane_lb, &[])?;
        let gate = [leader_seq.ready(), leader_attached];

        let mut followers = Vec::new();
        for follower in request.topology.followers() {
            let command = commands.follower_join(&server_directive(request, follower, &datastore_uri), &join_endpoint);
            let seq = self.add_sequence(&mut graph, Stage::FollowerJoin, follower, request, command, &gate)?;
            followers.push((follower.id.clone(), seq));
        }

        let followers_ready: Vec<TaskToken> = followers.iter().map(|(_, seq)| seq.ready()).collect();
        let mut follower_attachments = Vec::new();
        for follower in request.topology.followers() {
            let token = self.add_attachment(
                &mut graph,
                Stage::FollowerAttachment,
                "attach-control-plane",
                follower,
                &request.control_plane_lb,
                &followers_ready,
            )?;
            follower_attachments.push(token);
        }

        let mut workers = Vec::new();
        let mut worker_attachments = Vec::new();
        for worker in request.topology.workers() {
            let token =
                self.add_attachment(&mut graph, Stage::WorkerAttachment, "attach-worker", worker, &request.worker_lb, &[])?;
            worker_attachments.push(token);

            let command = commands.worker_join(&credentials.agent_token, &worker.public_ip, &join_endpoint);
            let seq = self.add_sequence(&mut graph, Stage::WorkerJoin, worker, request, command, &gate)?;
            workers.push((worker.id.clone(), seq));
        }

        let capture = graph.add(
            format!("{}:{}", CommandKind::ReadAccessConfig, leader.id),
            Stage::ArtifactCapture,
            leader.id.clone(),
            self.remote(leader, request, commands.read_access_config()),
            &[leader_seq.ready()],
        )?;

        let exports = ClusterExports::from_request(
            request,
            commands.worker_self_join(&join_endpoint, &credentials.agent_token),
            &self.config.worker.health_check,
        );

        log::debug!("Planned {} tasks for cluster '{}'", graph.len(), request.cluster_name);

        Ok(BootstrapPlan {
            graph,
            leader: leader_seq,
            leader_attached,
            followers,
            follower_attachments,
            workers,
            worker_attachments,
            capture,
            exports,
        })
    }

    /// Bootstraps the cluster described by `request`.
    ///
    /// Nothing is issued when the topology is invalid. Any task failure fails the
    /// whole call with `BootstrapFailed`; partially joined nodes are left as they are,
    /// and re-running is safe because every remote command is idempotent.
    pub async fn setup(&self, request: &BootstrapRequest) -> Result<BootstrapResult> {
        let plan = self.plan(request)?;
        let run_id = Uuid::new_v4();

        log::info!(
            "Run {}: bootstrapping cluster '{}' with {} control-plane node(s), {} worker(s), {} tasks",
            run_id,
            request.cluster_name,
            request.topology.control_plane().len(),
            request.topology.workers().len(),
            plan.graph.len()
        );

        let report = self.runner.run(&plan.graph).await;

        if !report.is_success() {
            let not_issued = report.never_issued_count();
            let failures = report.into_failures(&plan.graph);
            log::error!("Run {}: '{}' failed, {} task(s) failed, {} not issued", run_id, request.cluster_name, failures.len(), not_issued);
            return Err(Error::BootstrapFailed { failures, not_issued });
        }

        let raw = report
            .stdout(plan.capture)
            .ok_or_else(|| Error::GraphError("capture task completed without output".to_string()))?;

        if raw.trim().is_empty() {
            log::error!("Run {}: '{}' produced an empty access config", run_id, request.cluster_name);
            return Err(Error::BootstrapFailed { failures: vec![empty_capture(&plan)], not_issued: 0 });
        }

        let rewriter = KubeconfigRewriter::new(self.config.control_plane.loopback_endpoint(), request.control_plane_lb.endpoint());
        let kubeconfig = rewriter.apply(raw);

        let mut exports = plan.exports.clone();
        exports.set_kubeconfig(kubeconfig.clone());

        log::info!("Run {}: cluster '{}' is up, API reachable at {}", run_id, request.cluster_name, request.control_plane_lb.endpoint());

        Ok(BootstrapResult { kubeconfig, exports, joined: plan.joined(), report })
    }

    /// Adds the strictly ordered join, enable and start commands for one node.
    fn add_sequence(
        &self,
        graph: &mut TaskGraph,
        stage: Stage,
        node: &Node,
        request: &BootstrapRequest,
        join_command: RemoteCommand,
        depends_on: &[TaskToken],
    ) -> Result<NodeSequence> {
        let commands = CommandBuilder::new(&self.config);
        let name = |command: &RemoteCommand| format!("{}:{}", command.kind, node.id);

        let join_name = name(&join_command);
        let join = graph.add(join_name, stage, node.id.clone(), self.remote(node, request, join_command), depends_on)?;

        let enable_command = commands.enable_service();
        let enable =
            graph.add(name(&enable_command), stage, node.id.clone(), self.remote(node, request, enable_command), &[join])?;

        let start_command = commands.start_service();
        let start = graph.add(
            name(&start_command),
            stage,
            node.id.clone(),
            self.remote(node, request, start_command),
            &[join, enable],
        )?;

        Ok(NodeSequence { join, enable, start })
    }

    fn add_attachment(
        &self,
        graph: &mut TaskGraph,
        stage: Stage,
        label: &str,
        node: &Node,
        lb: &LoadBalancer,
        depends_on: &[TaskToken],
    ) -> Result<TaskToken> {
        let action = TaskAction::Attach { target_group: lb.target_group.clone(), node: node.clone(), port: lb.port };
        graph.add(format!("{}:{}", label, node.id), stage, node.id.clone(), action, depends_on)
    }

    fn remote(&self, node: &Node, request: &BootstrapRequest, command: RemoteCommand) -> TaskAction {
        TaskAction::Remote { connection: self.resolver.resolve(node, &request.credentials.ssh_private_key), command }
    }
}

fn server_directive<'a>(request: &'a BootstrapRequest, node: &'a Node, datastore_uri: &'a str) -> ServerDirective<'a> {
    ServerDirective {
        cluster_token: &request.credentials.cluster_token,
        agent_token: &request.credentials.agent_token,
        external_ip: &node.public_ip,
        datastore_uri,
    }
}

/// The capture task exited cleanly but handed back nothing to rewrite.
fn empty_capture(plan: &BootstrapPlan) -> TaskFailure {
    let (task, node) = match plan.graph.get(plan.capture) {
        Some(task) => (task.name.clone(), task.node.clone()),
        None => (CommandKind::ReadAccessConfig.to_string(), NodeId::new("unknown")),
    };
    TaskFailure {
        task,
        node,
        stage: Stage::ArtifactCapture,
        error: Error::RemoteExecutionError {
            command: CommandKind::ReadAccessConfig.to_string(),
            exit_code: Some(0),
            stderr: "access config is empty".to_string(),
        },
    }
}
