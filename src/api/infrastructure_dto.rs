use serde::{Deserialize, Serialize};

use crate::config::BootstrapConfig;

/// Root of the infrastructure description file handed over by the provisioning step.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureDto {
    pub cluster_name: String,

    /// Forwarded to the load-balancer attacher.
    #[serde(default)]
    pub region: Option<String>,

    /// Index 0 becomes the leader.
    pub control_plane_nodes: Vec<NodeDto>,
    #[serde(default)]
    pub worker_nodes: Vec<NodeDto>,

    pub database: Option<DatabaseDto>,
    pub control_plane_load_balancer: Option<LoadBalancerDto>,
    pub worker_load_balancer: Option<LoadBalancerDto>,
    pub secrets: SecretsDto,

    #[serde(default)]
    pub config: BootstrapConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NodeDto {
    pub id: String,
    pub public_ip: String,
    #[serde(default)]
    pub subnet_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseDto {
    pub endpoint: String,
    pub username: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerDto {
    pub dns_name: String,
    pub target_group: String,
}

#[derive(Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SecretsDto {
    pub cluster_token: String,
    pub agent_token: String,
    pub database_password: String,

    /// Inline key material. Takes precedence over `ssh_private_key_file`.
    pub ssh_private_key: Option<String>,
    pub ssh_private_key_file: Option<String>,
}

impl std::fmt::Debug for SecretsDto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsDto")
            .field("ssh_private_key_file", &self.ssh_private_key_file)
            .finish_non_exhaustive()
    }
}
