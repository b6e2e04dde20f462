use crate::config::SshConfig;
use crate::domain::cluster::infrastructure::Secret;
use crate::domain::cluster::node::Node;

/// Everything needed to open a remote session to one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub user: String,
    pub host: String,
    pub port: u16,
    pub private_key: Secret,
}

impl ConnectionDescriptor {
    /// `user@host`, as the ssh client expects it.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Maps provisioned nodes to connection descriptors. Pure; holds only the ssh user and port.
#[derive(Debug, Clone)]
pub struct ConnectionResolver {
    user: String,
    port: u16,
}

impl ConnectionResolver {
    pub fn new(config: &SshConfig) -> Self {
        ConnectionResolver { user: config.user.clone(), port: config.port }
    }

    pub fn resolve(&self, node: &Node, credential: &Secret) -> ConnectionDescriptor {
        ConnectionDescriptor {
            user: self.user.clone(),
            host: node.public_ip.clone(),
            port: self.port,
            private_key: credential.clone(),
        }
    }
}
