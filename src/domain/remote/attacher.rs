use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

use crate::domain::cluster::node::Node;
use crate::domain::utils::id::TargetGroupId;
use crate::error::{Error, Result};

/// Registers nodes as live targets of a load balancer's target group.
#[async_trait]
pub trait LoadBalancerAttacher: std::fmt::Debug + Send + Sync {
    async fn attach(&self, target_group: &TargetGroupId, node: &Node, port: u16) -> Result<()>;
}

/// Registers targets with `aws elbv2 register-targets`. Registration is idempotent
/// on the provider side, so a re-run simply re-registers.
#[derive(Debug, Clone)]
pub struct AwsCliAttacher {
    program: String,
    region: Option<String>,
}

impl AwsCliAttacher {
    pub fn new(region: Option<String>) -> Self {
        AwsCliAttacher { program: "aws".to_string(), region }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn register_args(&self, target_group: &TargetGroupId, node: &Node, port: u16) -> Vec<String> {
        let mut args = vec![
            "elbv2".to_string(),
            "register-targets".to_string(),
            "--target-group-arn".to_string(),
            target_group.to_string(),
            "--targets".to_string(),
            format!("Id={},Port={}", node.id, port),
        ];
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        args
    }
}

#[async_trait]
impl LoadBalancerAttacher for AwsCliAttacher {
    async fn attach(&self, target_group: &TargetGroupId, node: &Node, port: u16) -> Result<()> {
        let attachment_error = |reason: String| Error::AttachmentError {
            target_group: target_group.clone(),
            node: node.id.clone(),
            port,
            reason,
        };

        log::debug!("Registering {} on {} port {}", node.id, target_group, port);

        let output = Command::new(&self.program)
            .args(self.register_args(target_group, node, port))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| attachment_error(format!("failed to spawn '{}': {}", self.program, e)))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(attachment_error(format!("exit {:?}: {}", output.status.code(), stderr)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_args() {
        let attacher = AwsCliAttacher::new(Some("us-east-2".to_string()));
        let node = Node::new("i-0abc", "10.0.0.1", "subnet-a");
        let args = attacher.register_args(&TargetGroupId::new("arn:aws:tg/cp"), &node, 6443);

        assert_eq!(
            args,
            vec![
                "elbv2",
                "register-targets",
                "--target-group-arn",
                "arn:aws:tg/cp",
                "--targets",
                "Id=i-0abc,Port=6443",
                "--region",
                "us-east-2"
            ]
        );
    }

    #[tokio::test]
    async fn test_spawn_failure_is_an_attachment_error() {
        let attacher = AwsCliAttacher::new(None).with_program("/nonexistent/aws");
        let node = Node::new("i-0abc", "10.0.0.1", "subnet-a");

        match attacher.attach(&TargetGroupId::new("tg"), &node, 32080).await {
            Err(Error::AttachmentError { node, port, .. }) => {
                assert_eq!(node.as_str(), "i-0abc");
                assert_eq!(port, 32080);
            }
            other => panic!("Expected AttachmentError, got {:?}", other),
        }
    }
}
