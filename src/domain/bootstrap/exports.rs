use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;

use crate::config::HealthCheck;
use crate::domain::cluster::node::Node;
use crate::domain::cluster::request::BootstrapRequest;

/// Key under which the rewritten access configuration is exported.
pub const KUBECONFIG_KEY: &str = "kubeconfig";

/// Values handed to the application-deployment stage, keyed by stable names.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ClusterExports {
    values: BTreeMap<String, Value>,
}

impl ClusterExports {
    /// Everything except the access configuration, which only exists after a successful run.
    ///
    /// The worker health check is exported so the stage that owns the worker target group
    /// can configure it to match the port the workers are attached on.
    pub fn from_request(request: &BootstrapRequest, worker_join_command: String, health_check: &HealthCheck) -> Self {
        let topology = &request.topology;

        let mut exports = ClusterExports::default();
        exports.insert_scoped(request, "leader", json!(topology.leader().map(|n| n.public_ip.clone())));
        exports.insert_scoped(request, "control_plane", json!(public_ips(topology.control_plane().iter())));
        exports.insert_scoped(request, "workers", json!(public_ips(topology.workers().iter())));
        exports.insert_scoped(request, "all", json!(public_ips(topology.all_nodes())));
        exports.insert_scoped(request, "databaseEndpoint", json!(request.database.endpoint));
        exports.insert_scoped(request, "networkloadbalancerDnsName", json!(request.control_plane_lb.dns_name));
        exports.insert_scoped(request, "applicationloadbalancerDnsName", json!(request.worker_lb.dns_name));
        exports.insert_scoped(request, "workerJoinCmd", json!(worker_join_command));
        exports.insert_scoped(
            request,
            "workerHealthCheck",
            json!({
                "port": request.worker_lb.port,
                "path": health_check.path,
                "timeoutSecs": health_check.timeout_secs,
                "unhealthyThreshold": health_check.unhealthy_threshold,
            }),
        );
        exports
    }

    pub fn set_kubeconfig(&mut self, kubeconfig: impl Into<String>) {
        self.values.insert(KUBECONFIG_KEY.to_string(), Value::String(kubeconfig.into()));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn kubeconfig(&self) -> Option<&str> {
        self.values.get(KUBECONFIG_KEY).and_then(Value::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    fn insert_scoped(&mut self, request: &BootstrapRequest, key: &str, value: Value) {
        self.values.insert(format!("{}:{}", request.cluster_name, key), value);
    }
}

fn public_ips<'a>(nodes: impl Iterator<Item = &'a Node>) -> Vec<String> {
    nodes.map(|node| node.public_ip.clone()).collect()
}
