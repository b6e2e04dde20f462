use serde::Serialize;
use std::fmt;

use crate::domain::utils::id::TargetGroupId;

/// A credential or token that must never reach a log line.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<redacted>)")
    }
}

/// Handle to the shared relational datastore backing cluster state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    /// `host:port` of the database instance.
    pub endpoint: String,
    pub username: String,
    pub password: Secret,
}

impl Database {
    pub fn connection_uri(&self, database: &str) -> String {
        format!("postgres://{}:{}@{}/{}", self.username, self.password.expose(), self.endpoint, database)
    }
}

/// Handle to a load balancer together with the target group and port it forwards to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadBalancer {
    pub dns_name: String,
    pub target_group: TargetGroupId,
    pub port: u16,
}

impl LoadBalancer {
    pub fn new(dns_name: impl Into<String>, target_group: impl Into<String>, port: u16) -> Self {
        LoadBalancer { dns_name: dns_name.into(), target_group: TargetGroupId::new(target_group), port }
    }

    /// `dns:port`, the address peers use to reach whatever sits behind the balancer.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.dns_name, self.port)
    }
}

/// Shared secrets every node of one cluster is bootstrapped with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub cluster_token: Secret,
    pub agent_token: Secret,
    pub ssh_private_key: Secret,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        let rendered = format!("{:?}", secret);
        assert!(!rendered.contains("hunter2"));
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_database_connection_uri() {
        let db = Database { endpoint: "db.internal:5432".to_string(), username: "cluster".to_string(), password: Secret::new("pw") };
        assert_eq!(db.connection_uri("k3s"), "postgres://cluster:pw@db.internal:5432/k3s");
    }

    #[test]
    fn test_load_balancer_endpoint() {
        let lb = LoadBalancer::new("cp-lb.example.com", "arn:tg/cp", 6443);
        assert_eq!(lb.endpoint(), "cp-lb.example.com:6443");
        assert_eq!(lb.target_group.as_str(), "arn:tg/cp");
    }
}
