use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Immutable settings for one bootstrap run.
///
/// Every field has a default matching a stock k3s install on Ubuntu images, so an
/// infrastructure file only has to name what differs. The value is handed by
/// reference to the components that need it; nothing here is global.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BootstrapConfig {
    pub ssh: SshConfig,
    pub control_plane: ControlPlaneConfig,
    pub worker: WorkerConfig,
    pub capture: CaptureConfig,
    pub runner: RunnerConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SshConfig {
    pub user: String,
    pub port: u16,
    pub connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        SshConfig { user: "ubuntu".to_string(), port: 22, connect_timeout_secs: 30 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlPlaneConfig {
    /// Port of the control-plane API, on the nodes and on the control-plane load balancer.
    pub api_port: u16,

    /// Host the generated access config points at before it is rewritten.
    pub loopback_host: String,

    pub binary: String,
    pub service_file: String,
    pub service_name: String,
    pub access_config_path: String,
    pub node_taint: String,

    /// Database name inside the shared datastore.
    pub datastore_database: String,

    /// Passed verbatim to every control-plane server directive.
    pub extra_server_args: Vec<String>,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        ControlPlaneConfig {
            api_port: 6443,
            loopback_host: "127.0.0.1".to_string(),
            binary: "/usr/local/bin/k3s".to_string(),
            service_file: "/etc/systemd/system/k3s.service".to_string(),
            service_name: "k3s.service".to_string(),
            access_config_path: "/etc/rancher/k3s/k3s.yaml".to_string(),
            node_taint: "CriticalAddonsOnly=true:NoExecute".to_string(),
            datastore_database: "k3s".to_string(),
            extra_server_args: vec![
                "--disable=traefik".to_string(),
                "--flannel-backend=wireguard-native".to_string(),
                "--flannel-external-ip".to_string(),
            ],
        }
    }
}

impl ControlPlaneConfig {
    pub fn loopback_endpoint(&self) -> String {
        format!("{}:{}", self.loopback_host, self.api_port)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerConfig {
    /// Port the worker load balancer forwards application traffic to.
    pub traffic_port: u16,
    pub node_label: String,

    /// Label used by the exported self-join command for machines outside the pool.
    pub self_join_label: String,
    pub install_script_url: String,
    pub health_check: HealthCheck,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            traffic_port: 32080,
            node_label: "cloud-worker=true".to_string(),
            self_join_label: "nvidia-worker=true".to_string(),
            install_script_url: "https://get.k3s.io".to_string(),
            health_check: HealthCheck::default(),
        }
    }
}

/// Health check the worker target group is expected to run against each target.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthCheck {
    pub path: String,
    pub timeout_secs: u64,
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheck {
    fn default() -> Self {
        HealthCheck { path: "/ping".to_string(), timeout_secs: 6, unhealthy_threshold: 4 }
    }
}

/// How long to wait for the leader to write its access config before reading it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureConfig {
    pub settle_delay_secs: u64,
    pub poll_interval_secs: u64,
    pub max_polls: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig { settle_delay_secs: 5, poll_interval_secs: 2, max_polls: 30 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RunnerConfig {
    /// Upper bound on remote operations in flight at the same time.
    pub max_in_flight: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig { max_in_flight: 8 }
    }
}

impl BootstrapConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh.connect_timeout_secs)
    }

    /// Collects every invalid value instead of stopping at the first one.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.ssh.user.trim().is_empty() {
            problems.push("config.ssh.user is empty".to_string());
        }
        if self.ssh.port == 0 {
            problems.push("config.ssh.port must be non-zero".to_string());
        }
        if self.control_plane.api_port == 0 {
            problems.push("config.controlPlane.apiPort must be non-zero".to_string());
        }
        if self.worker.traffic_port == 0 {
            problems.push("config.worker.trafficPort must be non-zero".to_string());
        }
        for (field, value) in [
            ("binary", &self.control_plane.binary),
            ("serviceFile", &self.control_plane.service_file),
            ("serviceName", &self.control_plane.service_name),
            ("accessConfigPath", &self.control_plane.access_config_path),
            ("loopbackHost", &self.control_plane.loopback_host),
        ] {
            if value.trim().is_empty() {
                problems.push(format!("config.controlPlane.{} is empty", field));
            }
        }
        if self.capture.max_polls == 0 {
            problems.push("config.capture.maxPolls must be at least 1".to_string());
        }
        if self.runner.max_in_flight == 0 {
            problems.push("config.runner.maxInFlight must be at least 1".to_string());
        }
        if self.worker.health_check.timeout_secs == 0 || self.worker.health_check.unhealthy_threshold == 0 {
            problems.push("config.worker.healthCheck needs a non-zero timeout and threshold".to_string());
        }

        problems
    }

    pub fn validate(&self) -> Result<()> {
        let problems = self.problems();
        if problems.is_empty() { Ok(()) } else { Err(Error::SetupValidationError(problems)) }
    }
}
