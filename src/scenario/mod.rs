//! Scenario files
//!
//! A scenario is a YAML document describing one deployment:
//!
//! ```yaml
//! title: L2 pair, one per compute node
//! deployment:
//!   template: l2.hot
//!   accommodation: [pair, single_room, {compute_nodes: 2}]
//!   override:
//!     ip: floating
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::placement::accommodation::{KNOWN_FLAGS, KNOWN_OPTIONS};
use crate::placement::{AccommodationDirective, Agent};

/// IP types a server address may be overridden with
pub const OVERRIDE_IP_TYPES: &[&str] = &["fixed", "floating"];

#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("Failed to read scenario {}: {}", .0.display(), .1)]
    Io(PathBuf, std::io::Error),

    #[error("YAML parse error: {0}")]
    Parse(String),

    #[error("Scenario does not conform to schema: {0}")]
    Schema(String),
}

/// How agent addresses are overridden after deployment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverrideSpec {
    /// Replace each agent's `ip` with the server address of this type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// The `deployment` section of a scenario
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    /// Heat template, relative to the scenario file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub template_parameters: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accommodation: Option<Vec<AccommodationDirective>>,

    /// Older name for `accommodation`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_accommodation: Option<Vec<AccommodationDirective>>,

    /// Agents that exist outside the stack
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<Agent>,

    #[serde(rename = "override", default, skip_serializing_if = "Option::is_none")]
    pub override_spec: Option<OverrideSpec>,
}

impl DeploymentSpec {
    /// Accommodation directives, falling back to the legacy key
    pub fn accommodation_directives(&self) -> &[AccommodationDirective] {
        self.accommodation
            .as_deref()
            .filter(|d| !d.is_empty())
            .or(self.vm_accommodation.as_deref())
            .unwrap_or_default()
    }

    /// Nothing to deploy: no template and no static agents
    pub fn is_empty(&self) -> bool {
        self.template.is_none() && self.agents.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentSpec>,

    /// Path the scenario was loaded from
    #[serde(default)]
    pub file_name: String,

    /// Sections this tool does not interpret (execution, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Scenario {
    /// Directory that relative template paths are resolved against
    pub fn base_dir(&self) -> PathBuf {
        Path::new(&self.file_name)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

// ============================================================================
// SBIO: Pure parsing and validation
// ============================================================================

/// Parse a scenario document and fill in `title` and `file_name`
pub fn parse_scenario(content: &str, file_name: &str) -> Result<Scenario, ScenarioError> {
    let mut scenario: Scenario =
        serde_yaml::from_str(content).map_err(|e| ScenarioError::Parse(e.to_string()))?;

    validate_scenario(&scenario)?;

    if scenario.title.is_empty() {
        scenario.title = file_name.to_string();
    }
    scenario.file_name = file_name.to_string();
    Ok(scenario)
}

/// Structural checks beyond what deserialization enforces
pub fn validate_scenario(scenario: &Scenario) -> Result<(), ScenarioError> {
    let Some(ref deployment) = scenario.deployment else {
        return Ok(());
    };

    let directives = deployment.accommodation_directives();
    if !directives.is_empty() && deployment.template.is_none() {
        return Err(ScenarioError::Schema(
            "accommodation requires a deployment template".to_string(),
        ));
    }

    for directive in directives {
        match directive {
            AccommodationDirective::Flag(flag) => {
                if !KNOWN_FLAGS.contains(&flag.as_str()) {
                    return Err(ScenarioError::Schema(format!(
                        "unknown accommodation flag '{}'",
                        flag
                    )));
                }
            }
            AccommodationDirective::Options(options) => {
                for (key, value) in options {
                    validate_option(key, value)?;
                }
            }
        }
    }

    let mut ids = HashSet::new();
    for agent in &deployment.agents {
        if agent.id.is_empty() {
            return Err(ScenarioError::Schema("static agent without id".to_string()));
        }
        if !ids.insert(agent.id.as_str()) {
            return Err(ScenarioError::Schema(format!(
                "duplicate static agent id '{}'",
                agent.id
            )));
        }
    }

    for agent in &deployment.agents {
        let Some(partner_id) = agent.role.partner_id() else {
            continue;
        };
        let paired = deployment
            .agents
            .iter()
            .find(|other| other.id == partner_id)
            .is_some_and(|partner| {
                partner.mode() != agent.mode()
                    && partner.role.partner_id() == Some(agent.id.as_str())
            });
        if !paired {
            return Err(ScenarioError::Schema(format!(
                "static agent '{}' ({}) has no matching partner '{}'",
                agent.id,
                agent.mode().as_str(),
                partner_id
            )));
        }
    }

    if let Some(ip_type) = deployment.override_spec.as_ref().and_then(|o| o.ip.as_deref()) {
        if !OVERRIDE_IP_TYPES.contains(&ip_type) {
            return Err(ScenarioError::Schema(format!(
                "override ip must be one of {:?}, got '{}'",
                OVERRIDE_IP_TYPES, ip_type
            )));
        }
    }

    Ok(())
}

fn validate_option(key: &str, value: &Value) -> Result<(), ScenarioError> {
    let valid = match key {
        "density" | "compute_nodes" => value.as_u64().is_some(),
        "zones" => match value {
            Value::Array(items) => items.iter().all(Value::is_string),
            Value::String(_) => true,
            _ => false,
        },
        "best_effort" => value.is_boolean(),
        k if KNOWN_FLAGS.contains(&k) => value.is_boolean(),
        _ => {
            return Err(ScenarioError::Schema(format!(
                "unknown accommodation option '{}' (expected one of {:?})",
                key, KNOWN_OPTIONS
            )))
        }
    };

    if valid {
        Ok(())
    } else {
        Err(ScenarioError::Schema(format!(
            "invalid value {} for accommodation option '{}'",
            value, key
        )))
    }
}

// ============================================================================
// I/O boundary
// ============================================================================

/// Load and validate a scenario file
pub fn load_scenario(path: &Path) -> Result<Scenario, ScenarioError> {
    let file_name = path.to_string_lossy().to_string();
    debug!("Scenario {} is resolved to {}", file_name, path.display());

    let content =
        std::fs::read_to_string(path).map_err(|e| ScenarioError::Io(path.to_path_buf(), e))?;
    parse_scenario(&content, &file_name)
}
