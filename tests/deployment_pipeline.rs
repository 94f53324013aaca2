//! Integration tests for playing scenarios end to end
//!
//! Scenario and template files live in a temp directory; the cloud is an
//! in-memory [`InfraClient`].

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use testvnf::config::{OpenStackParams, Settings};
use testvnf::deployment::play_scenario;
use testvnf::infra::{Connector, InfraClient, InfraError};
use testvnf::placement::ComputeNode;
use testvnf::report::RunStatus;
use testvnf::scenario::load_scenario;

const L2_TEMPLATE: &str = r#"heat_template_version: 2013-05-23
description: {{ unique }}
resources:
  master:
    type: OS::Nova::Server
    properties:
      availability_zone: {{ agents.pipe_master_0.availability_zone }}
"#;

#[derive(Default)]
struct FakeCloud {
    nodes: Option<Vec<ComputeNode>>,
    stack_fails: bool,
    /// Cancelled once the stack is being waited on; the wait never finishes
    cancel_on_wait: Option<CancellationToken>,
    hosts: HashMap<String, String>,
    templates: Mutex<Vec<String>>,
}

#[async_trait]
impl InfraClient for FakeCloud {
    async fn list_compute_nodes(&self, _flavor: &str) -> Result<Vec<ComputeNode>, InfraError> {
        self.nodes
            .clone()
            .ok_or_else(|| InfraError::Forbidden("os-services".to_string()))
    }

    async fn choose_external_net(&self) -> Result<String, InfraError> {
        Ok("ext-net".to_string())
    }

    async fn create_stack(
        &self,
        name: &str,
        template: &str,
        _parameters: &Map<String, Value>,
    ) -> Result<String, InfraError> {
        self.templates.lock().unwrap().push(template.to_string());
        if self.stack_fails {
            return Ok(format!("{}-partial", name));
        }
        Ok(format!("{}-id", name))
    }

    async fn wait_stack(&self, _name: &str, stack_id: &str) -> Result<(), InfraError> {
        if let Some(ref cancel) = self.cancel_on_wait {
            cancel.cancel();
            std::future::pending::<()>().await;
        }
        if self.stack_fails {
            return Err(InfraError::StackFailure {
                stack_id: Some(stack_id.to_string()),
                reason: "Resource CREATE failed".to_string(),
            });
        }
        Ok(())
    }

    async fn get_stack_outputs(
        &self,
        _stack_id: &str,
    ) -> Result<HashMap<String, String>, InfraError> {
        let mut outputs = HashMap::new();
        for (n, id) in ["pipe_master_0", "pipe_slave_0", "pipe_agent_0", "pipe_agent_1"]
            .iter()
            .enumerate()
        {
            outputs.insert(format!("{}_ip", id), format!("10.0.0.{}", n + 1));
            outputs.insert(format!("{}_pip", id), format!("172.24.4.{}", n + 1));
            outputs.insert(format!("{}_dmac", id), format!("fa:16:3e:00:00:{:02}", n));
        }
        Ok(outputs)
    }

    async fn get_server_host_id(&self, server_name: &str) -> Result<String, InfraError> {
        self.hosts
            .get(server_name)
            .cloned()
            .ok_or_else(|| InfraError::NotFound(server_name.to_string()))
    }

    async fn get_server_ip(&self, server_name: &str, _ip_type: &str) -> Result<String, InfraError> {
        Err(InfraError::NotFound(server_name.to_string()))
    }
}

struct FakeConnector {
    cloud: Option<Arc<FakeCloud>>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _params: &OpenStackParams) -> Result<Arc<dyn InfraClient>, InfraError> {
        match self.cloud {
            Some(ref cloud) => Ok(cloud.clone()),
            None => Err(InfraError::Http("connection refused".to_string())),
        }
    }
}

fn settings() -> Settings {
    Settings {
        stack_name: Some("pipe".to_string()),
        flavor_name: Some("m1.small".to_string()),
        image_name: Some("testvnf".to_string()),
        os_auth_url: Some("http://keystone:5000/v3".to_string()),
        ..Settings::default()
    }
}

fn write_scenario(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    fs::write(dir.join("l2.hot"), L2_TEMPLATE).unwrap();
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

const PAIR_SCENARIO: &str = r#"
title: L2 pair
deployment:
  template: l2.hot
  accommodation: [pair, single_room, compute_nodes: 2]
"#;

#[tokio::test]
async fn test_pair_scenario_end_to_end() {
    let dir = TempDir::new().unwrap();
    let path = write_scenario(dir.path(), "l2.yaml", PAIR_SCENARIO);
    let scenario = load_scenario(&path).unwrap();

    let cloud = Arc::new(FakeCloud {
        nodes: Some(vec![
            ComputeNode::new("c1", "nova"),
            ComputeNode::new("c2", "nova"),
        ]),
        ..FakeCloud::default()
    });
    let connector = FakeConnector {
        cloud: Some(cloud.clone()),
    };

    let output = play_scenario(&settings(), &scenario, &connector, &CancellationToken::new()).await;
    assert_eq!(output.status, RunStatus::Succeeded);
    assert_eq!(output.agents.len(), 2);
    assert_eq!(output.support_stacks[0].id.as_deref(), Some("pipe-id"));

    let json = serde_json::to_value(&output).unwrap();
    let master = &json["agents"]["pipe_master_0"];
    assert_eq!(master["mode"], "master");
    assert_eq!(master["slave_id"], "pipe_slave_0");
    assert_eq!(master["slave"]["ip"], "10.0.0.2");
    assert_eq!(json["agents"]["pipe_slave_0"]["master"]["pip"], "172.24.4.1");
    assert!(json["scenarios"]["L2 pair"].is_object());

    // the master's zone was rendered into the template
    let template = cloud.templates.lock().unwrap()[0].clone();
    assert!(template.contains("description: pipe\n"));
    let master_zone = master["availability_zone"].as_str().unwrap();
    assert!(template.ends_with(&format!("availability_zone: {}", master_zone)));
}

#[tokio::test]
async fn test_non_admin_scenario_redistributes() {
    let dir = TempDir::new().unwrap();
    let path = write_scenario(
        dir.path(),
        "alone.yaml",
        "deployment:\n  template: l2.hot\n  accommodation: [single_room, compute_nodes: 2]\n",
    );
    fs::write(
        dir.path().join("l2.hot"),
        "description: {{ unique }}\n",
    )
    .unwrap();
    let scenario = load_scenario(&path).unwrap();

    let cloud = Arc::new(FakeCloud {
        hosts: [("pipe_agent_0", "h1"), ("pipe_agent_1", "h2")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        ..FakeCloud::default()
    });
    let connector = FakeConnector { cloud: Some(cloud) };

    let output = play_scenario(&settings(), &scenario, &connector, &CancellationToken::new()).await;
    assert_eq!(output.status, RunStatus::Succeeded);
    let nodes: Vec<_> = output
        .plain_agents()
        .iter()
        .map(|a| a.node.clone().unwrap())
        .collect();
    assert_eq!(nodes, vec!["h1", "h2"]);
}

#[tokio::test]
async fn test_missing_auth_url_fails_scenario() {
    let dir = TempDir::new().unwrap();
    let path = write_scenario(dir.path(), "l2.yaml", PAIR_SCENARIO);
    let scenario = load_scenario(&path).unwrap();
    let settings = Settings {
        os_auth_url: None,
        ..settings()
    };

    let output = play_scenario(
        &settings,
        &scenario,
        &FakeConnector { cloud: None },
        &CancellationToken::new(),
    )
    .await;
    match output.status {
        RunStatus::Failed { ref error } => assert!(error.contains("OS_AUTH_URL")),
        ref other => panic!("Expected failure, got {:?}", other),
    }
    assert!(output.agents.is_empty());
}

#[tokio::test]
async fn test_unreachable_cloud_still_plays_local_scenario() {
    let dir = TempDir::new().unwrap();
    let path = write_scenario(dir.path(), "local.yaml", "title: local\n");
    let scenario = load_scenario(&path).unwrap();

    let output = play_scenario(
        &settings(),
        &scenario,
        &FakeConnector { cloud: None },
        &CancellationToken::new(),
    )
    .await;
    assert_eq!(output.status, RunStatus::Succeeded);
    assert_eq!(output.agents[0].agent.id, "local");
    assert_eq!(output.agents[0].agent.node.as_deref(), Some("localhost"));
}

#[tokio::test]
async fn test_unreachable_cloud_fails_template_scenario() {
    let dir = TempDir::new().unwrap();
    let path = write_scenario(dir.path(), "l2.yaml", PAIR_SCENARIO);
    let scenario = load_scenario(&path).unwrap();

    let output = play_scenario(
        &settings(),
        &scenario,
        &FakeConnector { cloud: None },
        &CancellationToken::new(),
    )
    .await;
    match output.status {
        RunStatus::Failed { ref error } => assert!(error.contains("not initialized")),
        ref other => panic!("Expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_stack_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = write_scenario(dir.path(), "l2.yaml", PAIR_SCENARIO);
    let scenario = load_scenario(&path).unwrap();

    let cloud = Arc::new(FakeCloud {
        nodes: Some(vec![
            ComputeNode::new("c1", "nova"),
            ComputeNode::new("c2", "nova"),
        ]),
        stack_fails: true,
        ..FakeCloud::default()
    });
    let output = play_scenario(
        &settings(),
        &scenario,
        &FakeConnector { cloud: Some(cloud) },
        &CancellationToken::new(),
    )
    .await;

    assert!(output.status.is_failed());
    assert_eq!(output.support_stacks.len(), 1);
    assert_eq!(output.support_stacks[0].id.as_deref(), Some("pipe-partial"));
}

#[tokio::test]
async fn test_not_enough_nodes() {
    let dir = TempDir::new().unwrap();
    let path = write_scenario(dir.path(), "l2.yaml", PAIR_SCENARIO);
    let scenario = load_scenario(&path).unwrap();

    let cloud = Arc::new(FakeCloud {
        nodes: Some(vec![ComputeNode::new("c1", "nova")]),
        ..FakeCloud::default()
    });
    let output = play_scenario(
        &settings(),
        &scenario,
        &FakeConnector { cloud: Some(cloud) },
        &CancellationToken::new(),
    )
    .await;

    match output.status {
        RunStatus::Failed { ref error } => assert!(error.contains("Insufficient capacity")),
        ref other => panic!("Expected failure, got {:?}", other),
    }
    assert!(output.support_stacks.is_empty());
}

#[tokio::test]
async fn test_interrupt_while_stack_builds_keeps_stack() {
    let dir = TempDir::new().unwrap();
    let path = write_scenario(dir.path(), "l2.yaml", PAIR_SCENARIO);
    let scenario = load_scenario(&path).unwrap();

    let cancel = CancellationToken::new();
    let cloud = Arc::new(FakeCloud {
        nodes: Some(vec![
            ComputeNode::new("c1", "nova"),
            ComputeNode::new("c2", "nova"),
        ]),
        cancel_on_wait: Some(cancel.clone()),
        ..FakeCloud::default()
    });
    let output = play_scenario(
        &settings(),
        &scenario,
        &FakeConnector { cloud: Some(cloud) },
        &cancel,
    )
    .await;

    assert_eq!(output.status, RunStatus::Interrupted);
    assert!(output.agents.is_empty());
    assert_eq!(output.support_stacks.len(), 1);
    assert_eq!(output.support_stacks[0].name, "pipe");
    assert_eq!(output.support_stacks[0].id.as_deref(), Some("pipe-id"));

    let json = serde_json::to_value(&output).unwrap();
    assert_eq!(json["status"], "interrupted");
    assert_eq!(json["support_stacks"][0]["id"], "pipe-id");
}

#[tokio::test]
async fn test_cancelled_before_start_is_interrupted() {
    let dir = TempDir::new().unwrap();
    let path = write_scenario(dir.path(), "local.yaml", "title: local\n");
    let scenario = load_scenario(&path).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let output = play_scenario(
        &settings(),
        &scenario,
        &FakeConnector { cloud: None },
        &cancel,
    )
    .await;

    assert_eq!(output.status, RunStatus::Interrupted);
    assert!(output.support_stacks.is_empty());
}
