//! Deployment driver
//!
//! Drives one scenario from settings to a set of reachable agents:
//!
//! ```text
//! Init -> ConnectedToInfra -> DeployedFromTemplate | SkipTemplate
//!      -> AgentsMerged -> Succeeded
//! ```
//!
//! Any error moves the run to `Failed`. Infrastructure lookups needed by the
//! filter and redistribution stages are resolved here up front, so the
//! placement stages stay synchronous.
//!
//! A stack is tracked as soon as infrastructure accepts it. A cancelled run
//! still reports every stack it created.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{pack_openstack_params, ConfigError, Settings};
use crate::infra::{Connector, InfraClient, InfraError};
use crate::placement::{
    distribute_agents, filter_agents, generate_agents, normalize_accommodation, Accommodation,
    AccommodationOverrides, Agent, AgentMap, AgentOverride, ComputeNode, OutputFields,
    PlacementError,
};
use crate::report::{extend_agents, RunOutput};
use crate::scenario::{DeploymentSpec, OverrideSpec, Scenario, ScenarioError};
use crate::template::{JinjaRenderer, TemplateContext, TemplateError, TemplateRenderer};

pub const STACK_NAME_PREFIX: &str = "testvnf_";
const STACK_NAME_ALPHABET: &[u8] = b"adefikmoprstuz";
const STACK_NAME_RANDOM_LEN: usize = 6;

/// Zone assumed for synthesized nodes when the scenario names none
pub const DEFAULT_ZONE: &str = "nova";

pub const LOCAL_AGENT_ID: &str = "local";

#[derive(Error, Debug)]
pub enum DeploymentError {
    #[error("Insufficient capacity: {0}")]
    InsufficientCapacity(String),

    #[error("Infrastructure error: {0}")]
    Infra(#[from] InfraError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Scenario error: {0}")]
    Scenario(#[from] ScenarioError),

    #[error("Configuration error: {0}")]
    Config(ConfigError),

    #[error("Required configuration '{0}' is missing")]
    ConfigurationMissing(String),

    #[error("Failed to read template {}: {}", .0.display(), .1)]
    Io(PathBuf, std::io::Error),

    #[error("OpenStack client is not initialized. Template-based deployment is ignored.")]
    ClientNotInitialized,

    #[error("No agents deployed.")]
    NoAgentsDeployed,
}

impl From<PlacementError> for DeploymentError {
    fn from(e: PlacementError) -> Self {
        match e {
            PlacementError::InsufficientCapacity(msg) => DeploymentError::InsufficientCapacity(msg),
        }
    }
}

impl From<ConfigError> for DeploymentError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::ConfigurationMissing(key) => DeploymentError::ConfigurationMissing(key),
            other => DeploymentError::Config(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeploymentPhase {
    Init,
    ConnectedToInfra,
    DeployedFromTemplate,
    SkipTemplate,
    AgentsMerged,
    Succeeded,
    Failed,
}

/// A stack created by this run; `id` is missing when creation failed early
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupportStack {
    pub name: String,
    pub id: Option<String>,
}

/// `testvnf_` followed by six distinct random letters
pub fn random_stack_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    let suffix: String = STACK_NAME_ALPHABET
        .choose_multiple(rng, STACK_NAME_RANDOM_LEN)
        .map(|&b| b as char)
        .collect();
    format!("{}{}", STACK_NAME_PREFIX, suffix)
}

/// The fake agent used when a scenario deploys nothing
pub fn local_agent() -> Agent {
    let mut agent = Agent::alone(LOCAL_AGENT_ID);
    agent.node = Some("localhost".to_string());
    agent
}

/// `count` nodes with unknown hosts, zones taken round-robin
pub fn synthesize_compute_nodes(count: usize, zones: &[String]) -> Vec<ComputeNode> {
    let default_zones = [DEFAULT_ZONE.to_string()];
    let zones = if zones.is_empty() { &default_zones[..] } else { zones };
    (0..count)
        .map(|n| ComputeNode::in_zone(zones[n % zones.len()].clone()))
        .collect()
}

pub struct Deployment {
    client: Option<Arc<dyn InfraClient>>,
    renderer: Box<dyn TemplateRenderer>,
    rng: StdRng,
    phase: DeploymentPhase,
    privileged_mode: bool,
    stack_name: String,
    stack_id: Option<String>,
    support_stacks: Vec<SupportStack>,
    flavor_name: Option<String>,
    image_name: Option<String>,
    external_net: Option<String>,
    dns_nameservers: Vec<String>,
    overrides: AccommodationOverrides,
}

impl Deployment {
    pub fn new(settings: &Settings) -> Self {
        Self::with_rng(settings, StdRng::from_entropy())
    }

    /// Deployment with a fixed random source, for reproducible placement
    pub fn with_rng(settings: &Settings, mut rng: StdRng) -> Self {
        let stack_name = settings
            .stack_name
            .clone()
            .unwrap_or_else(|| random_stack_name(&mut rng));
        Self {
            client: None,
            renderer: Box::new(JinjaRenderer::new()),
            rng,
            phase: DeploymentPhase::Init,
            privileged_mode: true,
            stack_name,
            stack_id: None,
            support_stacks: Vec::new(),
            flavor_name: settings.flavor_name.clone(),
            image_name: settings.image_name.clone(),
            external_net: settings.external_net.clone(),
            dns_nameservers: settings.dns_nameservers.clone(),
            overrides: settings.accommodation_overrides(),
        }
    }

    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    pub fn stack_id(&self) -> Option<&str> {
        self.stack_id.as_deref()
    }

    pub fn phase(&self) -> DeploymentPhase {
        self.phase
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged_mode
    }

    pub fn external_net(&self) -> Option<&str> {
        self.external_net.as_deref()
    }

    pub fn support_stacks(&self) -> &[SupportStack] {
        &self.support_stacks
    }

    fn enter(&mut self, phase: DeploymentPhase) {
        debug!("Deployment {}: {:?} -> {:?}", self.stack_name, self.phase, phase);
        self.phase = phase;
    }

    fn track_stack(&mut self, id: Option<String>) {
        self.stack_id = id.clone();
        self.support_stacks.push(SupportStack {
            name: self.stack_name.clone(),
            id,
        });
    }

    /// Attach an infrastructure client, then look up the external network
    /// when settings do not name one. The client stays attached when the
    /// lookup fails.
    pub async fn connect(&mut self, client: Arc<dyn InfraClient>) -> Result<(), InfraError> {
        debug!("Connecting to OpenStack");
        self.client = Some(client.clone());
        self.enter(DeploymentPhase::ConnectedToInfra);
        if self.external_net.is_none() {
            self.external_net = Some(client.choose_external_net().await?);
        }
        Ok(())
    }

    /// Deploy a scenario's deployment section. `base_dir` anchors relative
    /// template paths.
    pub async fn deploy(
        &mut self,
        spec: Option<&DeploymentSpec>,
        base_dir: &Path,
    ) -> Result<AgentMap, DeploymentError> {
        let result = self.deploy_agents(spec, base_dir).await;
        match result {
            Ok(ref agents) => {
                info!("Deployed {} agent(s)", agents.len());
                self.enter(DeploymentPhase::Succeeded);
            }
            Err(_) => self.enter(DeploymentPhase::Failed),
        }
        result
    }

    async fn deploy_agents(
        &mut self,
        spec: Option<&DeploymentSpec>,
        base_dir: &Path,
    ) -> Result<AgentMap, DeploymentError> {
        let spec = match spec {
            Some(spec) if !spec.is_empty() => spec,
            _ => {
                info!("No deployment specified, using local agent");
                self.enter(DeploymentPhase::AgentsMerged);
                return Ok([local_agent()].into_iter().collect());
            }
        };

        let mut agents = AgentMap::new();

        if let Some(ref template) = spec.template {
            let client = self
                .client
                .clone()
                .ok_or(DeploymentError::ClientNotInitialized)?;
            agents.extend(
                self.deploy_from_template(client.as_ref(), spec, template, base_dir)
                    .await?,
            );
            self.enter(DeploymentPhase::DeployedFromTemplate);
        } else {
            self.enter(DeploymentPhase::SkipTemplate);
        }

        agents.extend(spec.agents.iter().cloned());
        self.enter(DeploymentPhase::AgentsMerged);

        if agents.is_empty() {
            return Err(DeploymentError::NoAgentsDeployed);
        }
        Ok(agents)
    }

    async fn get_compute_nodes(
        &mut self,
        client: &dyn InfraClient,
        flavor_name: &str,
        accommodation: &Accommodation,
    ) -> Result<Vec<ComputeNode>, DeploymentError> {
        match client.list_compute_nodes(flavor_name).await {
            Ok(nodes) => Ok(nodes),
            Err(InfraError::Forbidden(reason)) => {
                info!(
                    "OpenStack user does not have permission to list compute nodes ({}), treating as non-admin",
                    reason
                );
                self.privileged_mode = false;

                let count = accommodation.compute_nodes().ok_or_else(|| {
                    DeploymentError::InsufficientCapacity(
                        "must specify compute node count for non-admin user".to_string(),
                    )
                })?;
                let zones = accommodation.zones().unwrap_or_default();
                Ok(synthesize_compute_nodes(count, &zones))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn stack_parameters(
        &self,
        flavor_name: &str,
        spec: &DeploymentSpec,
    ) -> Result<Map<String, Value>, DeploymentError> {
        let external_net = self
            .external_net
            .as_deref()
            .ok_or_else(|| DeploymentError::ConfigurationMissing("EXTERNAL_NET".to_string()))?;

        let mut parameters = Map::new();
        parameters.insert("external_net".to_string(), Value::from(external_net));
        if let Some(ref image) = self.image_name {
            parameters.insert("image".to_string(), Value::from(image.as_str()));
        }
        parameters.insert("flavor".to_string(), Value::from(flavor_name));
        parameters.insert(
            "dns_nameservers".to_string(),
            Value::from(self.dns_nameservers.clone()),
        );
        for (key, value) in &spec.template_parameters {
            parameters.insert(key.clone(), value.clone());
        }
        Ok(parameters)
    }

    async fn deploy_from_template(
        &mut self,
        client: &dyn InfraClient,
        spec: &DeploymentSpec,
        template: &str,
        base_dir: &Path,
    ) -> Result<AgentMap, DeploymentError> {
        let accommodation = normalize_accommodation(spec.accommodation_directives(), &self.overrides);
        debug!("Accommodation: {:?}", accommodation);

        let flavor_name = self
            .flavor_name
            .clone()
            .ok_or_else(|| DeploymentError::ConfigurationMissing("FLAVOR_NAME".to_string()))?;

        let compute_nodes = self
            .get_compute_nodes(client, &flavor_name, &accommodation)
            .await?;
        let agents = generate_agents(&compute_nodes, &accommodation, &self.stack_name, &mut self.rng)?;

        let template_path = base_dir.join(template);
        let source = tokio::fs::read_to_string(&template_path)
            .await
            .map_err(|e| DeploymentError::Io(template_path.clone(), e))?;
        let rendered = self.renderer.render(
            &source,
            &TemplateContext {
                agents: &agents,
                unique: &self.stack_name,
            },
        )?;
        info!("Rendered template: {}", rendered);

        let parameters = self.stack_parameters(&flavor_name, spec)?;
        let stack_id = match client
            .create_stack(&self.stack_name, &rendered, &parameters)
            .await
        {
            Ok(id) => id,
            Err(InfraError::StackFailure { stack_id, reason }) => {
                self.track_stack(stack_id.clone());
                return Err(InfraError::StackFailure { stack_id, reason }.into());
            }
            Err(e) => return Err(e.into()),
        };
        self.track_stack(Some(stack_id.clone()));
        client.wait_stack(&self.stack_name, &stack_id).await?;

        let outputs = client.get_stack_outputs(&stack_id).await?;
        debug!("Stack outputs: {:?}", outputs);

        let overrides = match spec.override_spec {
            Some(ref override_spec) => resolve_overrides(client, &agents, override_spec).await,
            None => None,
        };
        let mut agents = filter_agents(
            agents,
            &outputs,
            overrides.as_ref().map(|o| o as &dyn AgentOverride),
        );

        if !self.privileged_mode && accommodation.density() == 1 {
            let hosts = resolve_hosts(client, &agents).await;
            agents = distribute_agents(agents, &hosts);
        }

        Ok(agents)
    }
}

/// Server addresses of the requested type for every agent that has one
async fn resolve_overrides(
    client: &dyn InfraClient,
    agents: &AgentMap,
    override_spec: &OverrideSpec,
) -> Option<HashMap<String, OutputFields>> {
    let ip_type = override_spec.ip.as_deref()?;

    let mut overrides = HashMap::new();
    for agent in agents {
        match client.get_server_ip(&agent.id, ip_type).await {
            Ok(ip) => {
                overrides.insert(agent.id.clone(), OutputFields::ip(ip));
            }
            Err(e) => warn!("No {} address for agent {}: {}", ip_type, agent.id, e),
        }
    }
    Some(overrides)
}

/// Host id of every agent's server; agents whose server is unknown are left out
async fn resolve_hosts(client: &dyn InfraClient, agents: &AgentMap) -> HashMap<String, String> {
    let mut hosts = HashMap::new();
    for agent in agents {
        match client.get_server_host_id(&agent.id).await {
            Ok(host) => {
                hosts.insert(agent.id.clone(), host);
            }
            Err(e) => warn!("Host of agent {} is unknown: {}", agent.id, e),
        }
    }
    hosts
}

// ============================================================================
// Scenario runs
// ============================================================================

/// Play one scenario. Never fails: errors are logged and reported in the
/// returned [`RunOutput`]. Cancelling `cancel` stops the run and yields an
/// interrupted record.
pub async fn play_scenario(
    settings: &Settings,
    scenario: &Scenario,
    connector: &dyn Connector,
    cancel: &CancellationToken,
) -> RunOutput {
    play_deployment(Deployment::new(settings), settings, scenario, connector, cancel).await
}

/// [`play_scenario`] with a prepared [`Deployment`]
pub async fn play_deployment(
    mut deployment: Deployment,
    settings: &Settings,
    scenario: &Scenario,
    connector: &dyn Connector,
    cancel: &CancellationToken,
) -> RunOutput {
    let output = RunOutput::new(scenario);

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = run_scenario(&mut deployment, settings, scenario, connector) => Some(result),
    };
    let mut output = match result {
        None => {
            warn!("Scenario {} interrupted", scenario.title);
            output.interrupted()
        }
        Some(Ok(agents)) => {
            debug!("Deployed agents: {:?}", agents);
            let mut output = output;
            output.agents = extend_agents(&agents);
            output
        }
        Some(Err(e)) => {
            error!("Error while executing scenario {}: {}", scenario.title, e);
            output.failed(e)
        }
    };
    output.support_stacks = deployment.support_stacks().to_vec();
    output
}

async fn run_scenario(
    deployment: &mut Deployment,
    settings: &Settings,
    scenario: &Scenario,
    connector: &dyn Connector,
) -> Result<AgentMap, DeploymentError> {
    let params = pack_openstack_params(settings)?;

    match connector.connect(&params).await {
        Ok(client) => {
            if let Err(e) = deployment.connect(client).await {
                warn!("Failed to choose external network: {}", e);
            }
        }
        Err(e) => {
            warn!("Failed to connect to OpenStack: {}. Please verify parameters: {:?}", e, params);
        }
    }

    deployment
        .deploy(scenario.deployment.as_ref(), &scenario.base_dir())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::mock::MockInfraClient;
    use crate::placement::{AccommodationDirective, AgentMode, AgentRole};
    use std::fs;
    use tempfile::TempDir;

    const TEMPLATE: &str = "heat_template_version: 2013-05-23\ndescription: {{ unique }}\n";

    fn settings() -> Settings {
        Settings {
            stack_name: Some("t".to_string()),
            flavor_name: Some("m1.small".to_string()),
            image_name: Some("testvnf-image".to_string()),
            dns_nameservers: vec!["8.8.8.8".to_string()],
            ..Settings::default()
        }
    }

    fn deployment(settings: &Settings) -> Deployment {
        Deployment::with_rng(settings, StdRng::seed_from_u64(1))
    }

    fn template_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("l2.hot"), TEMPLATE).unwrap();
        dir
    }

    fn spec(directives: Vec<AccommodationDirective>) -> DeploymentSpec {
        DeploymentSpec {
            template: Some("l2.hot".to_string()),
            accommodation: Some(directives),
            ..DeploymentSpec::default()
        }
    }

    fn outputs_for(ids: &[&str]) -> HashMap<String, String> {
        let mut outputs = HashMap::new();
        for (n, id) in ids.iter().enumerate() {
            outputs.insert(format!("{}_ip", id), format!("10.0.0.{}", n + 1));
            outputs.insert(format!("{}_pip", id), format!("172.24.4.{}", n + 1));
            outputs.insert(format!("{}_dmac", id), format!("fa:16:3e:00:00:0{}", n + 1));
        }
        outputs
    }

    #[test]
    fn test_random_stack_name() {
        let mut rng = StdRng::seed_from_u64(3);
        let name = random_stack_name(&mut rng);
        let suffix = name.strip_prefix(STACK_NAME_PREFIX).unwrap();

        assert_eq!(suffix.len(), 6);
        assert!(suffix.bytes().all(|b| STACK_NAME_ALPHABET.contains(&b)));
        let mut chars: Vec<char> = suffix.chars().collect();
        chars.sort();
        chars.dedup();
        assert_eq!(chars.len(), 6);
    }

    #[test]
    fn test_stack_name_from_settings() {
        let d = deployment(&settings());
        assert_eq!(d.stack_name(), "t");
        assert_eq!(d.phase(), DeploymentPhase::Init);
    }

    #[test]
    fn test_synthesize_compute_nodes() {
        let nodes = synthesize_compute_nodes(3, &["az1".to_string(), "az2".to_string()]);
        let zones: Vec<&str> = nodes.iter().map(|n| n.zone.as_str()).collect();
        assert_eq!(zones, vec!["az1", "az2", "az1"]);
        assert!(nodes.iter().all(|n| n.host.is_none()));

        let nodes = synthesize_compute_nodes(2, &[]);
        assert!(nodes.iter().all(|n| n.zone == DEFAULT_ZONE));
    }

    #[tokio::test]
    async fn test_local_mode() {
        let mut d = deployment(&settings());
        let agents = d.deploy(None, Path::new(".")).await.unwrap();

        assert_eq!(agents.len(), 1);
        let local = agents.get(LOCAL_AGENT_ID).unwrap();
        assert_eq!(local.mode(), AgentMode::Alone);
        assert_eq!(local.node.as_deref(), Some("localhost"));
        assert_eq!(d.phase(), DeploymentPhase::Succeeded);
    }

    #[tokio::test]
    async fn test_template_without_client() {
        let mut d = deployment(&settings());
        let spec = spec(vec![AccommodationDirective::flag("single_room")]);

        let result = d.deploy(Some(&spec), Path::new(".")).await;
        assert!(matches!(result, Err(DeploymentError::ClientNotInitialized)));
        assert_eq!(d.phase(), DeploymentPhase::Failed);
    }

    #[tokio::test]
    async fn test_connect_chooses_external_net() {
        let mut d = deployment(&settings());
        d.connect(Arc::new(MockInfraClient::default())).await.unwrap();

        assert_eq!(d.external_net(), Some("public"));
        assert_eq!(d.phase(), DeploymentPhase::ConnectedToInfra);
    }

    #[tokio::test]
    async fn test_external_net_lookup_failure_keeps_client() {
        let dir = template_dir();
        let client = MockInfraClient {
            nodes: Some(vec![ComputeNode::new("c1", "nova")]),
            no_external_net: true,
            ..MockInfraClient::default()
        };

        let mut d = deployment(&settings());
        assert!(matches!(
            d.connect(Arc::new(client)).await,
            Err(InfraError::NotFound(_))
        ));
        assert_eq!(d.phase(), DeploymentPhase::ConnectedToInfra);

        let spec = spec(vec![AccommodationDirective::flag("single_room")]);
        let result = d.deploy(Some(&spec), dir.path()).await;
        assert!(matches!(
            result,
            Err(DeploymentError::ConfigurationMissing(ref key)) if key == "EXTERNAL_NET"
        ));
    }

    #[tokio::test]
    async fn test_external_net_from_settings_skips_lookup() {
        let settings = Settings {
            external_net: Some("provider".to_string()),
            ..settings()
        };
        let client = MockInfraClient {
            no_external_net: true,
            ..MockInfraClient::default()
        };

        let mut d = deployment(&settings);
        d.connect(Arc::new(client)).await.unwrap();
        assert_eq!(d.external_net(), Some("provider"));
    }

    #[tokio::test]
    async fn test_privileged_pair_deployment() {
        let dir = template_dir();
        let mut client = MockInfraClient::with_nodes(vec![
            ComputeNode::new("c1", "nova"),
            ComputeNode::new("c2", "nova"),
        ]);
        client.outputs = outputs_for(&["t_master_0", "t_slave_0"]);
        let client = Arc::new(client);

        let mut d = deployment(&settings());
        d.connect(client.clone()).await.unwrap();
        let spec = spec(vec![
            AccommodationDirective::flag("pair"),
            AccommodationDirective::flag("single_room"),
        ]);
        let agents = d.deploy(Some(&spec), dir.path()).await.unwrap();

        assert_eq!(agents.ids().collect::<Vec<_>>(), vec!["t_master_0", "t_slave_0"]);
        let master = agents.get("t_master_0").unwrap();
        assert_eq!(master.node.as_deref(), Some("c1"));
        assert_eq!(master.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(agents.get("t_slave_0").unwrap().node.as_deref(), Some("c2"));

        assert_eq!(
            client.last_template().unwrap(),
            "heat_template_version: 2013-05-23\ndescription: t"
        );
        let params = client.last_parameters().unwrap();
        assert_eq!(params["flavor"], "m1.small");
        assert_eq!(params["image"], "testvnf-image");
        assert_eq!(params["external_net"], "public");
        assert_eq!(params["dns_nameservers"][0], "8.8.8.8");

        assert!(d.is_privileged());
        assert_eq!(d.stack_id(), Some("stack-0"));
        assert_eq!(
            d.support_stacks(),
            &[SupportStack {
                name: "t".to_string(),
                id: Some("stack-0".to_string())
            }]
        );
    }

    #[tokio::test]
    async fn test_template_parameters_override_defaults() {
        let dir = template_dir();
        let mut client = MockInfraClient::with_nodes(vec![ComputeNode::new("c1", "nova")]);
        client.outputs = outputs_for(&["t_agent_0"]);
        let client = Arc::new(client);

        let mut d = deployment(&settings());
        d.connect(client.clone()).await.unwrap();
        let mut spec = spec(vec![AccommodationDirective::flag("single_room")]);
        spec.template_parameters
            .insert("flavor".to_string(), Value::from("m1.large"));
        spec.template_parameters
            .insert("mtu".to_string(), Value::from(9000));

        d.deploy(Some(&spec), dir.path()).await.unwrap();
        let params = client.last_parameters().unwrap();
        assert_eq!(params["flavor"], "m1.large");
        assert_eq!(params["mtu"], 9000);
    }

    #[tokio::test]
    async fn test_forbidden_requires_compute_node_count() {
        let dir = template_dir();
        let mut d = deployment(&settings());
        d.connect(Arc::new(MockInfraClient::forbidden())).await.unwrap();

        let spec = spec(vec![AccommodationDirective::flag("single_room")]);
        let result = d.deploy(Some(&spec), dir.path()).await;

        assert!(matches!(result, Err(DeploymentError::InsufficientCapacity(_))));
        assert!(!d.is_privileged());
    }

    #[tokio::test]
    async fn test_forbidden_redistributes_by_host() {
        let dir = template_dir();
        let mut client = MockInfraClient::forbidden();
        client.outputs = outputs_for(&["t_agent_0", "t_agent_1", "t_agent_2"]);
        client.hosts = [
            ("t_agent_0", "h-a"),
            ("t_agent_1", "h-a"),
            ("t_agent_2", "h-b"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let mut d = deployment(&settings());
        d.connect(Arc::new(client)).await.unwrap();
        let spec = spec(vec![
            AccommodationDirective::flag("single_room"),
            AccommodationDirective::option("compute_nodes", 3),
        ]);
        let agents = d.deploy(Some(&spec), dir.path()).await.unwrap();

        assert!(!d.is_privileged());
        assert_eq!(agents.ids().collect::<Vec<_>>(), vec!["t_agent_0", "t_agent_2"]);
        assert_eq!(agents.get("t_agent_2").unwrap().node.as_deref(), Some("h-b"));
    }

    #[tokio::test]
    async fn test_stack_failure_is_tracked() {
        let dir = template_dir();
        let mut client = MockInfraClient::with_nodes(vec![ComputeNode::new("c1", "nova")]);
        client.fail_stack = true;

        let mut d = deployment(&settings());
        d.connect(Arc::new(client)).await.unwrap();
        let spec = spec(vec![AccommodationDirective::flag("single_room")]);
        let result = d.deploy(Some(&spec), dir.path()).await;

        assert!(matches!(
            result,
            Err(DeploymentError::Infra(InfraError::StackFailure { .. }))
        ));
        assert_eq!(d.stack_id(), Some("stack-0"));
        assert_eq!(d.support_stacks().len(), 1);
    }

    #[tokio::test]
    async fn test_override_ip() {
        let dir = template_dir();
        let mut client = MockInfraClient::with_nodes(vec![ComputeNode::new("c1", "nova")]);
        client.outputs = outputs_for(&["t_agent_0"]);
        client.ips = [("t_agent_0".to_string(), "192.0.2.10".to_string())]
            .into_iter()
            .collect();

        let mut d = deployment(&settings());
        d.connect(Arc::new(client)).await.unwrap();
        let mut spec = spec(vec![AccommodationDirective::flag("single_room")]);
        spec.override_spec = Some(OverrideSpec {
            ip: Some("floating".to_string()),
        });

        let agents = d.deploy(Some(&spec), dir.path()).await.unwrap();
        assert_eq!(agents.get("t_agent_0").unwrap().ip.as_deref(), Some("192.0.2.10"));
    }

    #[tokio::test]
    async fn test_static_agents_merged_after_template() {
        let dir = template_dir();
        let mut client = MockInfraClient::with_nodes(vec![ComputeNode::new("c1", "nova")]);
        client.outputs = outputs_for(&["t_agent_0"]);

        let mut d = deployment(&settings());
        d.connect(Arc::new(client)).await.unwrap();
        let mut spec = spec(vec![AccommodationDirective::flag("single_room")]);
        spec.agents = vec![Agent::alone("tg")];

        let agents = d.deploy(Some(&spec), dir.path()).await.unwrap();
        assert_eq!(agents.ids().collect::<Vec<_>>(), vec!["t_agent_0", "tg"]);
    }

    #[tokio::test]
    async fn test_static_agents_only() {
        let mut d = deployment(&settings());
        let spec = DeploymentSpec {
            agents: vec![Agent::master("east", "west"), Agent::slave("west", "east")],
            ..DeploymentSpec::default()
        };

        let agents = d.deploy(Some(&spec), Path::new(".")).await.unwrap();
        assert_eq!(agents.len(), 2);
        assert_eq!(
            agents.get("west").unwrap().role,
            AgentRole::Slave {
                master_id: "east".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_missing_template_file() {
        let dir = TempDir::new().unwrap();
        let mut d = deployment(&settings());
        d.connect(Arc::new(MockInfraClient::with_nodes(vec![ComputeNode::new(
            "c1", "nova",
        )])))
        .await
        .unwrap();

        let spec = spec(vec![AccommodationDirective::flag("single_room")]);
        let result = d.deploy(Some(&spec), dir.path()).await;
        assert!(matches!(result, Err(DeploymentError::Io(_, _))));
    }

    #[tokio::test]
    async fn test_missing_flavor() {
        let dir = template_dir();
        let settings = Settings {
            flavor_name: None,
            ..settings()
        };
        let mut d = deployment(&settings);
        d.connect(Arc::new(MockInfraClient::with_nodes(vec![]))).await.unwrap();

        let spec = spec(vec![AccommodationDirective::flag("single_room")]);
        let result = d.deploy(Some(&spec), dir.path()).await;
        assert!(matches!(
            result,
            Err(DeploymentError::ConfigurationMissing(ref key)) if key == "FLAVOR_NAME"
        ));
    }

    #[tokio::test]
    async fn test_nothing_survives_filtering() {
        let dir = template_dir();
        let mut d = deployment(&settings());
        d.connect(Arc::new(MockInfraClient::with_nodes(vec![ComputeNode::new(
            "c1", "nova",
        )])))
        .await
        .unwrap();

        let spec = spec(vec![AccommodationDirective::flag("single_room")]);
        let result = d.deploy(Some(&spec), dir.path()).await;
        assert!(matches!(result, Err(DeploymentError::NoAgentsDeployed)));
    }
}
