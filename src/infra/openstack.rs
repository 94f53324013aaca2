//! OpenStack implementation of [`InfraClient`] over plain REST
//!
//! Authenticates against keystone v3 with a password, then talks to nova,
//! heat and neutron through the endpoints of the returned service catalog.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{Connector, InfraClient, InfraError};
use crate::config::OpenStackParams;
use crate::placement::ComputeNode;

/// Per-request timeout for API calls
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Interval between stack status polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

const AGGREGATE_SPEC_PREFIX: &str = "aggregate_instance_extra_specs:";

// ============================================================================
// Data structures (pure, no I/O)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEndpoint {
    pub interface: String,
    #[serde(default)]
    pub region_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComputeService {
    pub host: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Deserialize)]
struct ServicesResponse {
    services: Vec<ComputeService>,
}

#[derive(Debug, Deserialize)]
struct Flavor {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct FlavorsResponse {
    flavors: Vec<Flavor>,
}

#[derive(Debug, Deserialize)]
struct ExtraSpecsResponse {
    #[serde(default)]
    extra_specs: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Aggregate {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct AggregatesResponse {
    aggregates: Vec<Aggregate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerAddress {
    pub addr: String,
    #[serde(rename = "OS-EXT-IPS:type", default)]
    pub ip_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub name: String,
    #[serde(rename = "hostId", default)]
    pub host_id: String,
    #[serde(default)]
    pub addresses: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ServersResponse {
    servers: Vec<Server>,
}

#[derive(Debug, Deserialize)]
struct Network {
    name: String,
}

#[derive(Debug, Deserialize)]
struct NetworksResponse {
    networks: Vec<Network>,
}

#[derive(Debug, Deserialize)]
struct CreatedStack {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CreateStackResponse {
    stack: CreatedStack,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StackOutput {
    pub output_key: String,
    #[serde(default)]
    pub output_value: Value,
}

#[derive(Debug, Deserialize)]
struct StackBody {
    stack_status: String,
    #[serde(default)]
    stack_status_reason: Option<String>,
    #[serde(default)]
    outputs: Vec<StackOutput>,
}

#[derive(Debug, Deserialize)]
struct StackResponse {
    stack: StackBody,
}

// ============================================================================
// SBIO: Pure helpers
// ============================================================================

/// Keystone v3 base URL for an auth endpoint, with or without the version
pub fn identity_url(auth_url: &str) -> String {
    let trimmed = auth_url.trim_end_matches('/');
    if trimmed.ends_with("/v3") {
        trimmed.to_string()
    } else {
        format!("{}/v3", trimmed)
    }
}

/// Endpoint URL of a service for the given interface and optional region
pub fn select_endpoint(
    catalog: &[CatalogEntry],
    service_type: &str,
    interface: &str,
    region: Option<&str>,
) -> Option<String> {
    catalog
        .iter()
        .filter(|entry| entry.service_type == service_type)
        .flat_map(|entry| entry.endpoints.iter())
        .find(|ep| {
            ep.interface == interface
                && region.map_or(true, |r| {
                    ep.region_id.as_deref() == Some(r) || ep.region.as_deref() == Some(r)
                })
        })
        .map(|ep| ep.url.trim_end_matches('/').to_string())
}

/// Enabled and running compute services as nodes
pub fn available_nodes(services: &[ComputeService]) -> Vec<ComputeNode> {
    services
        .iter()
        .filter(|s| s.status == "enabled" && s.state == "up")
        .map(|s| ComputeNode::new(s.host.clone(), s.zone.clone()))
        .collect()
}

/// Aggregate metadata a flavor requires, keys stripped of their
/// `aggregate_instance_extra_specs:` prefix
pub fn aggregate_requirements(extra_specs: &HashMap<String, String>) -> HashMap<String, String> {
    extra_specs
        .iter()
        .filter_map(|(k, v)| {
            k.strip_prefix(AGGREGATE_SPEC_PREFIX)
                .map(|key| (key.to_string(), v.clone()))
        })
        .collect()
}

/// Hosts belonging to an aggregate whose metadata satisfies every requirement
pub fn hosts_matching(
    aggregates: &[Aggregate],
    requirements: &HashMap<String, String>,
) -> HashSet<String> {
    aggregates
        .iter()
        .filter(|agg| {
            requirements
                .iter()
                .all(|(k, v)| agg.metadata.get(k) == Some(v))
        })
        .flat_map(|agg| agg.hosts.iter().cloned())
        .collect()
}

/// First address of a server with the given `OS-EXT-IPS:type`
pub fn address_of_type(server: &Server, ip_type: &str) -> Option<String> {
    server
        .addresses
        .values()
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(|a| serde_json::from_value::<ServerAddress>(a.clone()).ok())
        .find(|a| a.ip_type.as_deref() == Some(ip_type))
        .map(|a| a.addr)
}

/// Stack outputs as strings; null outputs are omitted
pub fn outputs_to_strings(outputs: &[StackOutput]) -> HashMap<String, String> {
    outputs
        .iter()
        .filter_map(|o| {
            let value = match &o.output_value {
                Value::Null => return None,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((o.output_key.clone(), value))
        })
        .collect()
}

fn password_auth_body(params: &OpenStackParams) -> Value {
    let auth = &params.auth;
    let mut body = json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": {
                    "user": {
                        "name": auth.username,
                        "password": auth.password,
                        "domain": {
                            "name": auth.user_domain_name.as_deref().unwrap_or("Default")
                        }
                    }
                }
            }
        }
    });
    if let Some(ref project) = auth.project_name {
        body["auth"]["scope"] = json!({
            "project": {
                "name": project,
                "domain": {
                    "name": auth.project_domain_name.as_deref().unwrap_or("Default")
                }
            }
        });
    }
    body
}

fn http_error(e: reqwest::Error) -> InfraError {
    if e.is_timeout() {
        InfraError::Timeout(REQUEST_TIMEOUT_SECS)
    } else {
        InfraError::Http(e.to_string())
    }
}

async fn check_status(
    response: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response, InfraError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(match status {
        StatusCode::UNAUTHORIZED => InfraError::Auth(text),
        StatusCode::FORBIDDEN => InfraError::Forbidden(format!("{}: {}", what, text)),
        StatusCode::NOT_FOUND => InfraError::NotFound(what.to_string()),
        _ => InfraError::Api {
            status: status.as_u16(),
            message: text,
        },
    })
}

// ============================================================================
// SBIO: I/O implementation (real HTTP client)
// ============================================================================

#[derive(Clone)]
pub struct OpenStackClient {
    http: reqwest::Client,
    token: String,
    compute_url: String,
    orchestration_url: String,
    network_url: String,
    stack_timeout: Duration,
    poll_interval: Duration,
}

impl OpenStackClient {
    /// Authenticate and resolve service endpoints
    pub async fn connect(
        params: &OpenStackParams,
        stack_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self, InfraError> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .danger_accept_invalid_certs(params.insecure);
        if let Some(ref ca_cert) = params.ca_cert {
            let pem = std::fs::read(ca_cert)
                .map_err(|e| InfraError::Http(format!("CA certificate {}: {}", ca_cert, e)))?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(http_error)?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder.build().map_err(http_error)?;

        let url = format!("{}/auth/tokens", identity_url(&params.auth.auth_url));
        debug!("Authenticating at {}", url);
        let response = http
            .post(&url)
            .json(&password_auth_body(params))
            .send()
            .await
            .map_err(http_error)?;
        let response = check_status(response, "keystone token").await?;

        let token = response
            .headers()
            .get("X-Subject-Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| InfraError::Auth("no X-Subject-Token in response".to_string()))?;
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| InfraError::Parse(e.to_string()))?;

        let interface = params.interface.as_deref().unwrap_or("public");
        let region = params.region_name.as_deref();
        let endpoint = |service_type: &str| {
            select_endpoint(&body.token.catalog, service_type, interface, region).ok_or_else(|| {
                InfraError::NotFound(format!(
                    "{} endpoint ({} interface) in service catalog",
                    service_type, interface
                ))
            })
        };

        let client = Self {
            compute_url: endpoint("compute")?,
            orchestration_url: endpoint("orchestration")?,
            network_url: endpoint("network")?,
            http,
            token,
            stack_timeout,
            poll_interval,
        };
        info!("Connected to OpenStack at {}", params.auth.auth_url);
        Ok(client)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        what: &str,
    ) -> Result<T, InfraError> {
        let response = self
            .http
            .get(url)
            .query(query)
            .header("X-Auth-Token", &self.token)
            .send()
            .await
            .map_err(http_error)?;
        check_status(response, what)
            .await?
            .json()
            .await
            .map_err(|e| InfraError::Parse(e.to_string()))
    }

    async fn find_server(&self, server_name: &str) -> Result<Server, InfraError> {
        let url = format!("{}/servers/detail", self.compute_url);
        let pattern = format!("^{}$", server_name);
        let response: ServersResponse = self
            .get_json(&url, &[("name", pattern.as_str())], "servers")
            .await?;
        response
            .servers
            .into_iter()
            .find(|s| s.name == server_name)
            .ok_or_else(|| InfraError::NotFound(format!("server {}", server_name)))
    }

    async fn flavor_requirements(
        &self,
        flavor_name: &str,
    ) -> Result<HashMap<String, String>, InfraError> {
        let url = format!("{}/flavors/detail", self.compute_url);
        let flavors: FlavorsResponse = self.get_json(&url, &[], "flavors").await?;
        let flavor = flavors
            .flavors
            .into_iter()
            .find(|f| f.name == flavor_name)
            .ok_or_else(|| InfraError::NotFound(format!("flavor {}", flavor_name)))?;

        let url = format!("{}/flavors/{}/os-extra_specs", self.compute_url, flavor.id);
        let specs: ExtraSpecsResponse = self.get_json(&url, &[], "flavor extra specs").await?;
        Ok(aggregate_requirements(&specs.extra_specs))
    }
}

#[async_trait]
impl InfraClient for OpenStackClient {
    async fn list_compute_nodes(&self, flavor_name: &str) -> Result<Vec<ComputeNode>, InfraError> {
        let url = format!("{}/os-services", self.compute_url);
        let services: ServicesResponse = self
            .get_json(&url, &[("binary", "nova-compute")], "os-services")
            .await?;
        let nodes = available_nodes(&services.services);

        let requirements = self.flavor_requirements(flavor_name).await?;
        if requirements.is_empty() {
            debug!("Available compute nodes: {:?}", nodes);
            return Ok(nodes);
        }

        let url = format!("{}/os-aggregates", self.compute_url);
        let aggregates: AggregatesResponse = self.get_json(&url, &[], "os-aggregates").await?;
        let hosts = hosts_matching(&aggregates.aggregates, &requirements);
        let nodes: Vec<ComputeNode> = nodes
            .into_iter()
            .filter(|n| n.host.as_ref().is_some_and(|h| hosts.contains(h)))
            .collect();
        debug!(
            "Compute nodes matching flavor {}: {:?}",
            flavor_name, nodes
        );
        Ok(nodes)
    }

    async fn choose_external_net(&self) -> Result<String, InfraError> {
        let url = format!("{}/v2.0/networks", self.network_url);
        let response: NetworksResponse = self
            .get_json(&url, &[("router:external", "True")], "networks")
            .await?;
        let network = response
            .networks
            .into_iter()
            .next()
            .ok_or_else(|| InfraError::NotFound("external network".to_string()))?;
        info!("Using external network {}", network.name);
        Ok(network.name)
    }

    async fn create_stack(
        &self,
        name: &str,
        template: &str,
        parameters: &Map<String, Value>,
    ) -> Result<String, InfraError> {
        let url = format!("{}/stacks", self.orchestration_url);
        let body = json!({
            "stack_name": name,
            "template": template,
            "parameters": parameters,
        });

        info!("Creating stack {}", name);
        let response = self
            .http
            .post(&url)
            .header("X-Auth-Token", &self.token)
            .json(&body)
            .send()
            .await
            .map_err(http_error)?;
        let created: CreateStackResponse = check_status(response, "stacks")
            .await
            .map_err(|e| match e {
                InfraError::Api { status, message } => InfraError::StackFailure {
                    stack_id: None,
                    reason: format!("{} - {}", status, message),
                },
                other => other,
            })?
            .json()
            .await
            .map_err(|e| InfraError::Parse(e.to_string()))?;

        info!("Stack {} submitted with id {}", name, created.stack.id);
        Ok(created.stack.id)
    }

    async fn wait_stack(&self, stack_name: &str, stack_id: &str) -> Result<(), InfraError> {
        let url = format!("{}/stacks/{}/{}", self.orchestration_url, stack_name, stack_id);
        let deadline = tokio::time::Instant::now() + self.stack_timeout;

        loop {
            let response: StackResponse = self.get_json(&url, &[], "stack").await?;
            let status = response.stack.stack_status;
            debug!("Stack {} status: {}", stack_name, status);

            if status == "CREATE_COMPLETE" {
                info!("Stack {} created", stack_name);
                return Ok(());
            }
            if status.ends_with("_FAILED") {
                return Err(InfraError::StackFailure {
                    stack_id: Some(stack_id.to_string()),
                    reason: response.stack.stack_status_reason.unwrap_or(status),
                });
            }
            if tokio::time::Instant::now() + self.poll_interval > deadline {
                return Err(InfraError::StackFailure {
                    stack_id: Some(stack_id.to_string()),
                    reason: format!(
                        "still {} after {}s",
                        status,
                        self.stack_timeout.as_secs()
                    ),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn get_stack_outputs(
        &self,
        stack_id: &str,
    ) -> Result<HashMap<String, String>, InfraError> {
        let url = format!("{}/stacks/{}", self.orchestration_url, stack_id);
        let response: StackResponse = self.get_json(&url, &[], "stack").await?;
        Ok(outputs_to_strings(&response.stack.outputs))
    }

    async fn get_server_host_id(&self, server_name: &str) -> Result<String, InfraError> {
        let server = self.find_server(server_name).await?;
        if server.host_id.is_empty() {
            return Err(InfraError::NotFound(format!("host of server {}", server_name)));
        }
        Ok(server.host_id)
    }

    async fn get_server_ip(&self, server_name: &str, ip_type: &str) -> Result<String, InfraError> {
        let server = self.find_server(server_name).await?;
        address_of_type(&server, ip_type).ok_or_else(|| {
            InfraError::NotFound(format!("{} address of server {}", ip_type, server_name))
        })
    }
}

/// Opens [`OpenStackClient`] sessions
#[derive(Debug, Clone)]
pub struct OpenStackConnector {
    stack_timeout: Duration,
    poll_interval: Duration,
}

impl OpenStackConnector {
    pub fn new(stack_timeout: Duration) -> Self {
        Self {
            stack_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[async_trait]
impl Connector for OpenStackConnector {
    async fn connect(&self, params: &OpenStackParams) -> Result<Arc<dyn InfraClient>, InfraError> {
        let client = OpenStackClient::connect(params, self.stack_timeout, self.poll_interval).await?;
        Ok(Arc::new(client))
    }
}
