use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use crate::domain::utils::id::NodeId;
use crate::error::{Error, Result};

/// Smallest control plane that can be bootstrapped: one leader plus one follower.
pub const MIN_CONTROL_PLANE_NODES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeRole {
    Leader,
    ControlPlaneFollower,
    Worker,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeRole::Leader => "leader",
            NodeRole::ControlPlaneFollower => "control-plane-follower",
            NodeRole::Worker => "worker",
        };
        write!(f, "{}", name)
    }
}

/// An already-provisioned compute node. Owned by the provisioning side, the
/// orchestrator only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub public_ip: String,

    /// Subnet or availability-zone identifier the node was placed in.
    pub subnet_id: String,
    pub role: NodeRole,
}

impl Node {
    pub fn new(id: impl Into<String>, public_ip: impl Into<String>, subnet_id: impl Into<String>) -> Self {
        Node { id: NodeId::new(id), public_ip: public_ip.into(), subnet_id: subnet_id.into(), role: NodeRole::Worker }
    }
}

/// Control-plane nodes in order (index 0 is the leader) plus the worker pool.
///
/// Roles are assigned on construction and never change afterwards, so the leader is
/// fixed for the lifetime of a bootstrap run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterTopology {
    control_plane: Vec<Node>,
    workers: Vec<Node>,
}

impl ClusterTopology {
    pub fn new(control_plane: Vec<Node>, workers: Vec<Node>) -> Self {
        let control_plane = control_plane
            .into_iter()
            .enumerate()
            .map(|(index, mut node)| {
                node.role = if index == 0 { NodeRole::Leader } else { NodeRole::ControlPlaneFollower };
                node
            })
            .collect();

        let workers = workers
            .into_iter()
            .map(|mut node| {
                node.role = NodeRole::Worker;
                node
            })
            .collect();

        ClusterTopology { control_plane, workers }
    }

    /// Fails with `TopologyError` when the control plane is too small to bootstrap.
    pub fn validate(&self) -> Result<()> {
        if self.control_plane.len() < MIN_CONTROL_PLANE_NODES {
            return Err(Error::TopologyError { required: MIN_CONTROL_PLANE_NODES, actual: self.control_plane.len() });
        }

        let subnets: HashSet<&str> = self.control_plane.iter().map(|n| n.subnet_id.as_str()).collect();
        if subnets.len() == 1 {
            log::warn!(
                "All {} control-plane nodes share subnet '{}'. The control plane will not survive the loss of that zone.",
                self.control_plane.len(),
                self.control_plane[0].subnet_id
            );
        }

        Ok(())
    }

    /// The leader, or `None` for an empty control plane.
    pub fn leader(&self) -> Option<&Node> {
        self.control_plane.first()
    }

    pub fn followers(&self) -> &[Node] {
        self.control_plane.get(1..).unwrap_or(&[])
    }

    pub fn control_plane(&self) -> &[Node] {
        &self.control_plane
    }

    pub fn workers(&self) -> &[Node] {
        &self.workers
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = &Node> {
        self.control_plane.iter().chain(self.workers.iter())
    }
}
