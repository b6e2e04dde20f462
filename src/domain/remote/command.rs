//! Rendering of every shell command sent to a node.
//!
//! Join and bootstrap commands rewrite the service unit in two steps: strip whatever
//! `ExecStart=` directive is currently at the tail of the unit file, then append the new
//! one. Running the same command twice leaves the unit in the same state, which is what
//! makes re-running a whole bootstrap against half-configured nodes safe.

use serde::Serialize;
use std::fmt;

use crate::config::BootstrapConfig;
use crate::domain::cluster::infrastructure::Secret;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CommandKind {
    LeaderBootstrap,
    FollowerJoin,
    WorkerJoin,
    EnableService,
    StartService,
    ReadAccessConfig,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::LeaderBootstrap => "leader-bootstrap",
            CommandKind::FollowerJoin => "follower-join",
            CommandKind::WorkerJoin => "worker-join",
            CommandKind::EnableService => "enable-service",
            CommandKind::StartService => "start-service",
            CommandKind::ReadAccessConfig => "read-access-config",
        };
        write!(f, "{}", name)
    }
}

/// A fully rendered shell command. The script embeds secrets, so `Debug` only shows the kind.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub kind: CommandKind,
    script: String,
}

impl RemoteCommand {
    pub fn script(&self) -> &str {
        &self.script
    }
}

impl fmt::Debug for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCommand").field("kind", &self.kind).finish_non_exhaustive()
    }
}

/// Per-node fields of a control-plane server directive.
#[derive(Debug, Clone)]
pub struct ServerDirective<'a> {
    pub cluster_token: &'a Secret,
    pub agent_token: &'a Secret,
    pub external_ip: &'a str,
    pub datastore_uri: &'a str,
}

pub struct CommandBuilder<'a> {
    config: &'a BootstrapConfig,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(config: &'a BootstrapConfig) -> Self {
        CommandBuilder { config }
    }

    /// Turns the node into the cluster initializer. `tls_sans` are extra names the API
    /// certificate must be valid for (the load balancers).
    pub fn leader_bootstrap(&self, server: &ServerDirective<'_>, tls_sans: &[&str]) -> RemoteCommand {
        let mut args = self.server_common_args(server);
        for san in tls_sans {
            args.push(format!("--tls-san {}", san));
        }
        args.extend(self.server_trailing_args());

        let exec_start = format!("{} server {}", self.config.control_plane.binary, args.join(" "));
        self.install_directive(CommandKind::LeaderBootstrap, &exec_start)
    }

    /// Joins a control-plane follower through `join_endpoint` (`host:port`).
    pub fn follower_join(&self, server: &ServerDirective<'_>, join_endpoint: &str) -> RemoteCommand {
        let mut args = vec![format!("--server https://{}", join_endpoint)];
        args.extend(self.server_common_args(server));
        args.extend(self.server_trailing_args());

        let exec_start = format!("{} server {}", self.config.control_plane.binary, args.join(" "));
        self.install_directive(CommandKind::FollowerJoin, &exec_start)
    }

    /// The agent keeps retrying its join on its own, so workers tolerate a join endpoint
    /// that is not serving yet.
    pub fn worker_join(&self, agent_token: &Secret, external_ip: &str, join_endpoint: &str) -> RemoteCommand {
        let exec_start = format!(
            "{} agent --server https://{} --token {} --node-label {} --node-external-ip={}",
            self.config.control_plane.binary,
            join_endpoint,
            agent_token.expose(),
            self.config.worker.node_label,
            external_ip
        );
        self.install_directive(CommandKind::WorkerJoin, &exec_start)
    }

    pub fn enable_service(&self) -> RemoteCommand {
        RemoteCommand {
            kind: CommandKind::EnableService,
            script: format!("sudo systemctl daemon-reload && sudo systemctl enable {}", self.config.control_plane.service_name),
        }
    }

    pub fn start_service(&self) -> RemoteCommand {
        RemoteCommand {
            kind: CommandKind::StartService,
            script: format!("sudo systemctl start {}", self.config.control_plane.service_name),
        }
    }

    /// Waits for the freshly started service to write its access config, then prints it.
    /// Fails (non-zero exit) if the file is still missing or empty once the poll budget is spent.
    pub fn read_access_config(&self) -> RemoteCommand {
        let capture = &self.config.capture;
        let path = &self.config.control_plane.access_config_path;
        RemoteCommand {
            kind: CommandKind::ReadAccessConfig,
            script: format!(
                "sleep {}; for i in $(seq 1 {}); do sudo test -s {} && break; sleep {}; done; sudo test -s {} && sudo cat {}",
                capture.settle_delay_secs, capture.max_polls, path, capture.poll_interval_secs, path, path
            ),
        }
    }

    /// Copy-paste command for machines outside the provisioned pool to join as workers.
    pub fn worker_self_join(&self, join_endpoint: &str, agent_token: &Secret) -> String {
        format!(
            "curl -sfL {} | K3S_URL=https://{} K3S_TOKEN={} sh -s - --node-external-ip=<your pub IPv4> --node-label \"{}\"",
            self.config.worker.install_script_url,
            join_endpoint,
            agent_token.expose(),
            self.config.worker.self_join_label
        )
    }

    fn server_common_args(&self, server: &ServerDirective<'_>) -> Vec<String> {
        vec![
            format!("--token {}", server.cluster_token.expose()),
            format!("--agent-token {}", server.agent_token.expose()),
            format!("--node-external-ip={}", server.external_ip),
            format!("--datastore-endpoint='{}'", server.datastore_uri),
        ]
    }

    fn server_trailing_args(&self) -> Vec<String> {
        let mut args = vec![format!("--node-taint {}", self.config.control_plane.node_taint)];
        args.extend(self.config.control_plane.extra_server_args.iter().cloned());
        args
    }

    fn install_directive(&self, kind: CommandKind, exec_start: &str) -> RemoteCommand {
        let unit = &self.config.control_plane.service_file;
        RemoteCommand {
            kind,
            script: format!(
                "sudo sed -i -e '/^ExecStart=/,$d' {unit} && echo \"ExecStart={exec_start}\" | sudo tee -a {unit} > /dev/null"
            ),
        }
    }
}
