//! Run output records
//!
//! One [`RunOutput`] is produced per scenario, whether it succeeded or not.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::deployment::SupportStack;
use crate::placement::{Agent, AgentMap, AgentRole};
use crate::scenario::Scenario;

/// An agent together with copies of its partner records
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtendedAgent {
    #[serde(flatten)]
    pub agent: Agent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master: Option<Agent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slave: Option<Agent>,
}

/// Attach each agent's partner. Partners missing from the map are left out.
pub fn extend_agents(agents: &AgentMap) -> Vec<ExtendedAgent> {
    agents
        .iter()
        .map(|agent| {
            let (master, slave) = match &agent.role {
                AgentRole::Alone => (None, None),
                AgentRole::Master { slave_id } => (None, agents.get(slave_id).cloned()),
                AgentRole::Slave { master_id } => (agents.get(master_id).cloned(), None),
            };
            ExtendedAgent {
                agent: agent.clone(),
                master,
                slave,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunStatus {
    Succeeded,
    Failed { error: String },
    Interrupted,
}

impl RunStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, RunStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub record_id: Uuid,

    #[serde(flatten)]
    pub status: RunStatus,

    /// The played scenario keyed by title
    pub scenarios: BTreeMap<String, Scenario>,

    #[serde(serialize_with = "agents_by_id")]
    pub agents: Vec<ExtendedAgent>,

    /// Stacks this run created, so they can be cleaned up
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub support_stacks: Vec<SupportStack>,
}

impl RunOutput {
    pub fn new(scenario: &Scenario) -> Self {
        let mut scenarios = BTreeMap::new();
        scenarios.insert(scenario.title.clone(), scenario.clone());
        Self {
            record_id: Uuid::new_v4(),
            status: RunStatus::Succeeded,
            scenarios,
            agents: Vec::new(),
            support_stacks: Vec::new(),
        }
    }

    pub fn failed(mut self, error: impl ToString) -> Self {
        self.status = RunStatus::Failed {
            error: error.to_string(),
        };
        self
    }

    pub fn interrupted(mut self) -> Self {
        self.status = RunStatus::Interrupted;
        self
    }

    /// Agents in deployment order, without partner copies
    pub fn plain_agents(&self) -> Vec<&Agent> {
        self.agents.iter().map(|e| &e.agent).collect()
    }
}

fn agents_by_id<S: Serializer>(agents: &[ExtendedAgent], serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(agents.len()))?;
    for extended in agents {
        map.serialize_entry(&extended.agent.id, extended)?;
    }
    map.end()
}
