//! Filtering generated agents against real stack outputs
//!
//! A stack publishes one output per agent field, keyed `{agent_id}_{field}`.
//! Agents whose outputs never appeared did not come up; pairs lose both
//! halves when either half is missing.

use std::collections::{HashMap, HashSet};

use tracing::info;

use super::agent::{Agent, AgentMap, AgentRole};

/// Output-derived fields of one agent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputFields {
    pub ip: Option<String>,
    pub pip: Option<String>,
    pub dmac: Option<String>,
}

impl OutputFields {
    /// Only an `ip` value
    pub fn ip(ip: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            ..Self::default()
        }
    }

    /// Read the agent's fields from stack outputs; empty values count as missing
    pub fn lookup(stack_outputs: &HashMap<String, String>, agent_id: &str) -> Self {
        let get = |field: &str| {
            stack_outputs
                .get(&format!("{}_{}", agent_id, field))
                .filter(|v| !v.is_empty())
                .cloned()
        };
        Self {
            ip: get("ip"),
            pip: get("pip"),
            dmac: get("dmac"),
        }
    }

    /// Overlay `other` on top of `self`
    pub fn merge(self, other: OutputFields) -> Self {
        Self {
            ip: other.ip.filter(|v| !v.is_empty()).or(self.ip),
            pip: other.pip.filter(|v| !v.is_empty()).or(self.pip),
            dmac: other.dmac.filter(|v| !v.is_empty()).or(self.dmac),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.ip.is_some() && self.pip.is_some() && self.dmac.is_some()
    }
}

/// Supplies output values that take precedence over the stack's own
pub trait AgentOverride {
    fn override_fields(&self, agent: &Agent) -> OutputFields;
}

impl<F> AgentOverride for F
where
    F: Fn(&Agent) -> OutputFields,
{
    fn override_fields(&self, agent: &Agent) -> OutputFields {
        self(agent)
    }
}

/// Pre-resolved overrides keyed by agent id
impl AgentOverride for HashMap<String, OutputFields> {
    fn override_fields(&self, agent: &Agent) -> OutputFields {
        self.get(&agent.id).cloned().unwrap_or_default()
    }
}

/// Keep only agents that came up and whose partner came up too
pub fn filter_agents(
    agents: AgentMap,
    stack_outputs: &HashMap<String, String>,
    agent_override: Option<&dyn AgentOverride>,
) -> AgentMap {
    // first pass: drop agents without outputs
    let mut deployed = Vec::with_capacity(agents.len());
    for mut agent in agents {
        let mut fields = OutputFields::lookup(stack_outputs, &agent.id);
        if let Some(o) = agent_override {
            fields = fields.merge(o.override_fields(&agent));
        }

        if !fields.is_complete() {
            info!("Ignore non-deployed agent: {:?}", agent);
            continue;
        }

        // slaves without an address never count as deployed
        if matches!(agent.role, AgentRole::Slave { .. }) && fields.ip.is_none() {
            info!("IP address is missing in agent: {:?}", agent);
            continue;
        }

        agent.ip = fields.ip;
        agent.pip = fields.pip;
        agent.dmac = fields.dmac;
        deployed.push(agent);
    }

    // second pass: drop halves of broken pairs
    let deployed_ids: HashSet<String> = deployed.iter().map(|a| a.id.clone()).collect();
    deployed
        .into_iter()
        .filter(|agent| match &agent.role {
            AgentRole::Alone => true,
            AgentRole::Master { slave_id } => deployed_ids.contains(slave_id),
            AgentRole::Slave { master_id } => deployed_ids.contains(master_id),
        })
        .collect()
}
