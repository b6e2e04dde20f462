mod common;

use std::collections::HashSet;
use std::sync::Arc;

use cluster_bootstrap::BootstrapOrchestrator;
use cluster_bootstrap::config::BootstrapConfig;
use cluster_bootstrap::domain::graph::task_graph::{Stage, TaskAction, TaskToken};
use cluster_bootstrap::domain::remote::command::CommandKind;
use common::*;

fn planner() -> BootstrapOrchestrator {
    let log = new_log();
    BootstrapOrchestrator::new(
        BootstrapConfig::default(),
        Arc::new(RecordingExecutor::new(log.clone())),
        Arc::new(RecordingAttacher::new(log)),
    )
}

#[test]
fn test_every_join_depends_on_leader_ready_and_attached() {
    let plan = planner().plan(&request(4, 3)).unwrap();
    let gate = [plan.leader_ready(), plan.leader_attached];

    for (_, seq) in plan.followers.iter().chain(plan.workers.iter()) {
        let deps = plan.graph.dependencies(seq.join);
        assert!(gate.iter().all(|t| deps.contains(t)), "join is missing the leader gate");
        assert_eq!(plan.graph.dependencies(seq.enable), &[seq.join]);
        assert_eq!(plan.graph.dependencies(seq.start), &[seq.join, seq.enable]);
    }

    assert!(plan.graph.dependencies(plan.leader.join).is_empty());
    assert!(plan.graph.dependencies(plan.leader_attached).is_empty());
}

#[test]
fn test_follower_attachments_wait_for_all_followers() {
    let plan = planner().plan(&request(4, 0)).unwrap();
    let followers_ready: HashSet<_> = plan.followers.iter().map(|(_, seq)| seq.ready()).collect();

    assert_eq!(plan.follower_attachments.len(), 3);
    for token in &plan.follower_attachments {
        let deps: HashSet<_> = plan.graph.dependencies(*token).iter().copied().collect();
        assert_eq!(deps, followers_ready);
        assert_eq!(plan.graph.get(*token).unwrap().stage, Stage::FollowerAttachment);
    }
}

#[test]
fn test_worker_attachment_is_independent_of_the_control_plane() {
    let plan = planner().plan(&request(2, 2)).unwrap();

    for token in &plan.worker_attachments {
        assert!(plan.graph.dependencies(*token).is_empty());
        match &plan.graph.get(*token).unwrap().action {
            TaskAction::Attach { target_group, port, .. } => {
                assert_eq!(target_group.as_str(), WORKER_TARGET_GROUP);
                assert_eq!(*port, 32080);
            }
            other => panic!("Expected an attachment, got {:?}", other),
        }
    }
}

#[test]
fn test_capture_depends_only_on_leader_ready() {
    let plan = planner().plan(&request(3, 1)).unwrap();
    assert_eq!(plan.graph.dependencies(plan.capture), &[plan.leader_ready()]);

    match &plan.graph.get(plan.capture).unwrap().action {
        TaskAction::Remote { connection, command } => {
            assert_eq!(command.kind, CommandKind::ReadAccessConfig);
            assert_eq!(connection.host, control_plane_ip(0));
        }
        other => panic!("Expected a remote command, got {:?}", other),
    }
}

#[test]
fn test_plan_is_acyclic_and_fully_ordered() {
    let plan = planner().plan(&request(5, 4)).unwrap();
    let order = plan.graph.topological_order();

    // 3 commands per node, one attachment per node, one capture.
    assert_eq!(plan.graph.len(), 9 * 3 + 9 + 1);
    assert_eq!(order.len(), plan.graph.len());

    let position = |t: TaskToken| order.iter().position(|x| *x == t).unwrap();
    for (token, task) in plan.graph.iter() {
        for dep in &task.depends_on {
            assert!(position(*dep) < position(token), "'{}' ordered before a dependency", task.name);
        }
    }
    assert_eq!(plan.joined().len(), 9 + 5 + 4);
}

#[test]
fn test_connections_use_node_addresses_and_shared_key() {
    let plan = planner().plan(&request(2, 1)).unwrap();

    for (_, task) in plan.graph.iter() {
        if let TaskAction::Remote { connection, .. } = &task.action {
            assert_eq!(connection.user, "ubuntu");
            assert_eq!(connection.port, 22);
            assert!(connection.private_key.expose().contains("OPENSSH PRIVATE KEY"));
            assert!(connection.host.starts_with("10.0."));
        }
    }
}

#[test]
fn test_describe_lists_every_task() {
    let plan = planner().plan(&request(2, 1)).unwrap();
    let text = plan.describe();

    assert_eq!(text.lines().count(), plan.graph.len());
    assert!(text.lines().next().unwrap().contains("leader-bootstrap:cp-0"));
    assert!(text.contains("attach-worker:wk-0"));
    assert!(text.contains("after [start-service:cp-0, attach-control-plane:cp-0]"));
    assert!(!text.contains(AGENT_TOKEN));
}
