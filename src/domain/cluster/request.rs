use crate::api::infrastructure_dto::{InfrastructureDto, LoadBalancerDto, NodeDto};
use crate::config::BootstrapConfig;
use crate::domain::cluster::infrastructure::{Credentials, Database, LoadBalancer, Secret};
use crate::domain::cluster::node::{ClusterTopology, MIN_CONTROL_PLANE_NODES, Node};
use crate::domain::utils::id::ClusterName;
use crate::error::{Error, Result};
use crate::loader::parser::read_text_file;

/// Characters that would break out of the quoted service directive on the remote shell.
/// `%` is included because systemd expands it as a specifier inside `ExecStart=`.
const SHELL_UNSAFE: &[char] = &['"', '\'', '`', '$', '\\', '\n', '\r', ';', '|', '&', '<', '>', '%'];

/// Characters that delimit the userinfo part of the datastore connection URI.
const URI_RESERVED: &[char] = &['@', ':', '/', '?', '#'];

/// Everything one bootstrap run needs: the topology plus handles to the datastore,
/// both load balancers and the shared credentials.
///
/// Fields are public so callers (and tests) can assemble a request directly;
/// [`BootstrapRequestBuilder`] is the checked way to obtain one.
#[derive(Debug, Clone)]
pub struct BootstrapRequest {
    pub cluster_name: ClusterName,
    pub topology: ClusterTopology,
    pub database: Database,
    pub control_plane_lb: LoadBalancer,
    pub worker_lb: LoadBalancer,
    pub credentials: Credentials,
    pub region: Option<String>,
}

impl BootstrapRequest {
    pub fn builder(cluster_name: impl Into<String>) -> BootstrapRequestBuilder {
        BootstrapRequestBuilder { cluster_name: cluster_name.into(), ..Default::default() }
    }

    /// Builds a request from the infrastructure file, resolving the private key from
    /// disk when it is not given inline.
    pub fn from_dto(dto: InfrastructureDto) -> Result<(Self, BootstrapConfig)> {
        let config = dto.config;

        let ssh_private_key = match (dto.secrets.ssh_private_key, dto.secrets.ssh_private_key_file) {
            (Some(key), _) => key,
            (None, Some(path)) => read_text_file(&path)?,
            (None, None) => String::new(),
        };

        let to_nodes = |nodes: Vec<NodeDto>| -> Vec<Node> {
            nodes.into_iter().map(|n| Node::new(n.id, n.public_ip, n.subnet_id)).collect()
        };
        let to_lb = |lb: LoadBalancerDto, port: u16| LoadBalancer::new(lb.dns_name, lb.target_group, port);

        let mut builder = BootstrapRequest::builder(dto.cluster_name)
            .topology(ClusterTopology::new(to_nodes(dto.control_plane_nodes), to_nodes(dto.worker_nodes)))
            .credentials(Credentials {
                cluster_token: Secret::new(dto.secrets.cluster_token),
                agent_token: Secret::new(dto.secrets.agent_token),
                ssh_private_key: Secret::new(ssh_private_key),
            });

        if let Some(db) = dto.database {
            builder = builder.database(Database {
                endpoint: db.endpoint,
                username: db.username,
                password: Secret::new(dto.secrets.database_password),
            });
        }
        if let Some(lb) = dto.control_plane_load_balancer {
            builder = builder.control_plane_lb(to_lb(lb, config.control_plane.api_port));
        }
        if let Some(lb) = dto.worker_load_balancer {
            builder = builder.worker_lb(to_lb(lb, config.worker.traffic_port));
        }
        if let Some(region) = dto.region {
            builder = builder.region(region);
        }

        let request = builder.build(&config)?;
        Ok((request, config))
    }
}

#[derive(Debug, Default)]
pub struct BootstrapRequestBuilder {
    cluster_name: String,
    topology: Option<ClusterTopology>,
    database: Option<Database>,
    control_plane_lb: Option<LoadBalancer>,
    worker_lb: Option<LoadBalancer>,
    credentials: Option<Credentials>,
    region: Option<String>,
}

impl BootstrapRequestBuilder {
    pub fn topology(mut self, val: ClusterTopology) -> Self {
        self.topology = Some(val);
        self
    }

    pub fn database(mut self, val: Database) -> Self {
        self.database = Some(val);
        self
    }

    pub fn control_plane_lb(mut self, val: LoadBalancer) -> Self {
        self.control_plane_lb = Some(val);
        self
    }

    pub fn worker_lb(mut self, val: LoadBalancer) -> Self {
        self.worker_lb = Some(val);
        self
    }

    pub fn credentials(mut self, val: Credentials) -> Self {
        self.credentials = Some(val);
        self
    }

    pub fn region(mut self, val: impl Into<String>) -> Self {
        self.region = Some(val.into());
        self
    }

    /// Validates every precondition and reports all violations together in one
    /// `SetupValidationError`. A control plane that is too small and is the only problem
    /// is reported as `TopologyError` instead.
    pub fn build(self, config: &BootstrapConfig) -> Result<BootstrapRequest> {
        let mut problems = config.problems();

        if self.cluster_name.trim().is_empty() {
            problems.push("cluster name is empty".to_string());
        }

        let mut short_control_plane = None;
        match &self.topology {
            None => problems.push("cluster topology is missing".to_string()),
            Some(topology) => {
                if topology.control_plane().len() < MIN_CONTROL_PLANE_NODES {
                    short_control_plane = Some(topology.control_plane().len());
                    problems.push(format!(
                        "control plane needs at least {} nodes, got {}",
                        MIN_CONTROL_PLANE_NODES,
                        topology.control_plane().len()
                    ));
                }
                for node in topology.all_nodes() {
                    check_value(&mut problems, &format!("node {} id", node.id), node.id.as_str());
                    check_value(&mut problems, &format!("node {} public ip", node.id), &node.public_ip);
                }
            }
        }

        match &self.database {
            None => problems.push("database handle is missing".to_string()),
            Some(db) => {
                check_value(&mut problems, "database endpoint", &db.endpoint);
                check_credential(&mut problems, "database username", &db.username);
                check_credential(&mut problems, "database password", db.password.expose());
            }
        }

        for (label, lb) in [("control-plane load balancer", &self.control_plane_lb), ("worker load balancer", &self.worker_lb)] {
            match lb {
                None => problems.push(format!("{} is missing", label)),
                Some(lb) => {
                    check_value(&mut problems, &format!("{} dns name", label), &lb.dns_name);
                    check_value(&mut problems, &format!("{} target group", label), lb.target_group.as_str());
                }
            }
        }

        match &self.credentials {
            None => problems.push("credentials are missing".to_string()),
            Some(creds) => {
                check_value(&mut problems, "cluster token", creds.cluster_token.expose());
                check_value(&mut problems, "agent token", creds.agent_token.expose());
                if creds.ssh_private_key.is_empty() {
                    problems.push("ssh private key is empty".to_string());
                }
            }
        }

        match (self.topology, self.database, self.control_plane_lb, self.worker_lb, self.credentials) {
            (Some(topology), Some(database), Some(control_plane_lb), Some(worker_lb), Some(credentials)) if problems.is_empty() => {
                Ok(BootstrapRequest {
                    cluster_name: ClusterName::new(self.cluster_name),
                    topology,
                    database,
                    control_plane_lb,
                    worker_lb,
                    credentials,
                    region: self.region,
                })
            }
            _ => match short_control_plane {
                Some(actual) if problems.len() == 1 => Err(Error::TopologyError { required: MIN_CONTROL_PLANE_NODES, actual }),
                _ => Err(Error::SetupValidationError(problems)),
            },
        }
    }
}

/// Values end up inside a double-quoted remote shell line, so they must be non-empty
/// and free of quoting or control characters.
fn check_value(problems: &mut Vec<String>, label: &str, value: &str) {
    if value.trim().is_empty() {
        problems.push(format!("{} is empty", label));
    } else if value.contains(SHELL_UNSAFE) || value.chars().any(char::is_whitespace) {
        problems.push(format!("{} contains whitespace or shell metacharacters", label));
    }
}

/// Like [`check_value`], and the value also ends up verbatim in the userinfo of the datastore URI.
fn check_credential(problems: &mut Vec<String>, label: &str, value: &str) {
    let before = problems.len();
    check_value(problems, label, value);
    if problems.len() == before && value.contains(URI_RESERVED) {
        problems.push(format!("{} contains characters reserved in a connection URI", label));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            cluster_token: Secret::new("cluster-token"),
            agent_token: Secret::new("agent-token"),
            ssh_private_key: Secret::new("-----BEGIN KEY-----\nabc\n-----END KEY-----"),
        }
    }

    fn topology(control_plane: usize) -> ClusterTopology {
        let cp = (0..control_plane).map(|i| Node::new(format!("cp-{}", i), format!("10.0.1.{}", i), "subnet-a")).collect();
        ClusterTopology::new(cp, vec![Node::new("wk-0", "10.0.2.1", "subnet-b")])
    }

    #[test]
    fn test_builder_reports_all_missing_fields_at_once() {
        let result = BootstrapRequest::builder("demo").build(&BootstrapConfig::default());

        match result {
            Err(Error::SetupValidationError(problems)) => {
                assert_eq!(problems.len(), 5, "{:?}", problems);
                assert!(problems.iter().any(|p| p.contains("topology")));
                assert!(problems.iter().any(|p| p.contains("database")));
                assert!(problems.iter().any(|p| p.contains("control-plane load balancer")));
                assert!(problems.iter().any(|p| p.contains("worker load balancer")));
                assert!(problems.iter().any(|p| p.contains("credentials")));
            }
            other => panic!("Expected SetupValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_builder_rejects_small_control_plane_and_unsafe_values() {
        let mut creds = credentials();
        creds.agent_token = Secret::new("tok\"en");

        let result = BootstrapRequest::builder("demo")
            .topology(topology(1))
            .database(Database { endpoint: "db:5432".to_string(), username: "k3s".to_string(), password: Secret::new("pw") })
            .control_plane_lb(LoadBalancer::new("cp.lb", "tg-cp", 6443))
            .worker_lb(LoadBalancer::new("", "tg-wk", 32080))
            .credentials(creds)
            .build(&BootstrapConfig::default());

        match result {
            Err(Error::SetupValidationError(problems)) => {
                assert_eq!(problems.len(), 3, "{:?}", problems);
                assert!(problems.iter().any(|p| p.contains("at least 2 nodes, got 1")));
                assert!(problems.iter().any(|p| p.contains("worker load balancer dns name is empty")));
                assert!(problems.iter().any(|p| p.contains("agent token contains")));
            }
            other => panic!("Expected SetupValidationError, got {:?}", other),
        }
    }

    fn complete_builder(control_plane: usize) -> BootstrapRequestBuilder {
        BootstrapRequest::builder("demo")
            .topology(topology(control_plane))
            .database(Database { endpoint: "db:5432".to_string(), username: "k3s".to_string(), password: Secret::new("pw") })
            .control_plane_lb(LoadBalancer::new("cp.lb", "tg-cp", 6443))
            .worker_lb(LoadBalancer::new("wk.lb", "tg-wk", 32080))
            .credentials(credentials())
    }

    #[test]
    fn test_single_node_control_plane_is_a_topology_error() {
        match complete_builder(1).build(&BootstrapConfig::default()) {
            Err(Error::TopologyError { required, actual }) => {
                assert_eq!(required, 2);
                assert_eq!(actual, 1);
            }
            other => panic!("Expected TopologyError, got {:?}", other),
        }
    }

    #[test]
    fn test_credentials_that_would_corrupt_the_datastore_uri_are_rejected() {
        for password in ["p@ss", "a:b", "x/y", "q?r", "h#sh"] {
            let result = complete_builder(3)
                .database(Database { endpoint: "db:5432".to_string(), username: "k3s".to_string(), password: Secret::new(password) })
                .build(&BootstrapConfig::default());

            match result {
                Err(Error::SetupValidationError(problems)) => {
                    assert_eq!(problems, vec!["database password contains characters reserved in a connection URI".to_string()]);
                }
                other => panic!("Expected SetupValidationError for {:?}, got {:?}", password, other),
            }
        }

        let result = complete_builder(3)
            .database(Database { endpoint: "db:5432".to_string(), username: "admin@corp".to_string(), password: Secret::new("pw") })
            .build(&BootstrapConfig::default());
        assert!(matches!(result, Err(Error::SetupValidationError(p)) if p[0].starts_with("database username contains characters reserved")));
    }

    #[test]
    fn test_percent_is_rejected_everywhere() {
        let mut creds = credentials();
        creds.cluster_token = Secret::new("K10abc%hdef");

        let result = complete_builder(3)
            .database(Database { endpoint: "db:5432".to_string(), username: "k3s".to_string(), password: Secret::new("50%off") })
            .credentials(creds)
            .build(&BootstrapConfig::default());

        match result {
            Err(Error::SetupValidationError(problems)) => {
                assert_eq!(problems.len(), 2, "{:?}", problems);
                assert!(problems.iter().any(|p| p == "database password contains whitespace or shell metacharacters"));
                assert!(problems.iter().any(|p| p == "cluster token contains whitespace or shell metacharacters"));
            }
            other => panic!("Expected SetupValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_tokens_may_contain_colons() {
        let mut creds = credentials();
        creds.cluster_token = Secret::new("K10abcdef::server:0123456789");

        let request = complete_builder(2).credentials(creds).build(&BootstrapConfig::default()).unwrap();
        assert_eq!(request.credentials.cluster_token.expose(), "K10abcdef::server:0123456789");
    }

    #[test]
    fn test_builder_accepts_complete_setup() {
        let request = BootstrapRequest::builder("demo")
            .topology(topology(3))
            .database(Database { endpoint: "db:5432".to_string(), username: "k3s".to_string(), password: Secret::new("pw") })
            .control_plane_lb(LoadBalancer::new("cp.lb", "tg-cp", 6443))
            .worker_lb(LoadBalancer::new("wk.lb", "tg-wk", 32080))
            .credentials(credentials())
            .region("us-east-2")
            .build(&BootstrapConfig::default())
            .unwrap();

        assert_eq!(request.cluster_name.as_str(), "demo");
        assert_eq!(request.topology.control_plane().len(), 3);
        assert_eq!(request.region.as_deref(), Some("us-east-2"));
    }
}
