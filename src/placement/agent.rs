//! Agent and compute-node records shared by every placement stage
//!
//! An agent is one test endpoint. Pairing is expressed through [`AgentRole`]
//! so that a `master_id` can only exist on a slave and a `slave_id` only on a
//! master. On the wire (scenario files, run output) agents keep the flat
//! `mode` / `slave_id` / `master_id` shape.

use std::collections::HashMap;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// A placement target reported by the infrastructure
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComputeNode {
    /// Hypervisor host name, unknown when the caller may not list hosts
    #[serde(default)]
    pub host: Option<String>,
    /// Availability zone
    pub zone: String,
}

impl ComputeNode {
    pub fn new(host: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            zone: zone.into(),
        }
    }

    /// A node whose host has not been discovered yet
    pub fn in_zone(zone: impl Into<String>) -> Self {
        Self {
            host: None,
            zone: zone.into(),
        }
    }

    /// `zone:host` when the host is known, otherwise just the zone
    pub fn qualified_zone(&self) -> String {
        qualify_zone(&self.zone, self.host.as_deref())
    }
}

pub(crate) fn qualify_zone(zone: &str, host: Option<&str>) -> String {
    match host {
        Some(host) if !host.is_empty() => format!("{}:{}", zone, host),
        _ => zone.to_string(),
    }
}

/// Mode name of an agent, without its pairing data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    Alone,
    Master,
    Slave,
}

impl AgentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::Alone => "alone",
            AgentMode::Master => "master",
            AgentMode::Slave => "slave",
        }
    }
}

/// Role of an agent within the topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentRole {
    Alone,
    Master { slave_id: String },
    Slave { master_id: String },
}

impl AgentRole {
    pub fn mode(&self) -> AgentMode {
        match self {
            AgentRole::Alone => AgentMode::Alone,
            AgentRole::Master { .. } => AgentMode::Master,
            AgentRole::Slave { .. } => AgentMode::Slave,
        }
    }

    /// Id of the other half of the pair, if any
    pub fn partner_id(&self) -> Option<&str> {
        match self {
            AgentRole::Alone => None,
            AgentRole::Master { slave_id } => Some(slave_id),
            AgentRole::Slave { master_id } => Some(master_id),
        }
    }
}

/// A deployed (or to-be-deployed) test endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AgentRecord", into = "AgentRecord")]
pub struct Agent {
    pub id: String,
    pub role: AgentRole,
    /// Host the agent is placed on; `None` until the host is known
    pub node: Option<String>,
    pub zone: String,
    /// `zone` or `zone:node`, as handed to the infrastructure
    pub availability_zone: Option<String>,
    /// Data-plane address
    pub ip: Option<String>,
    /// Public (management) address
    pub pip: Option<String>,
    /// Destination MAC used by the traffic generator
    pub dmac: Option<String>,
    /// Any other fields carried by statically declared agents
    pub extra: Map<String, Value>,
}

impl Agent {
    pub fn new(id: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id: id.into(),
            role,
            node: None,
            zone: String::new(),
            availability_zone: None,
            ip: None,
            pip: None,
            dmac: None,
            extra: Map::new(),
        }
    }

    pub fn alone(id: impl Into<String>) -> Self {
        Self::new(id, AgentRole::Alone)
    }

    pub fn master(id: impl Into<String>, slave_id: impl Into<String>) -> Self {
        Self::new(
            id,
            AgentRole::Master {
                slave_id: slave_id.into(),
            },
        )
    }

    pub fn slave(id: impl Into<String>, master_id: impl Into<String>) -> Self {
        Self::new(
            id,
            AgentRole::Slave {
                master_id: master_id.into(),
            },
        )
    }

    /// Place the agent on a compute node
    pub fn placed_on(mut self, node: &ComputeNode) -> Self {
        self.node = node.host.clone();
        self.zone = node.zone.clone();
        self
    }

    pub fn mode(&self) -> AgentMode {
        self.role.mode()
    }

    /// Recompute `availability_zone` from `zone` and `node`
    pub fn inject_availability_zone(&mut self) {
        self.availability_zone = Some(qualify_zone(&self.zone, self.node.as_deref()));
    }
}

/// Flat serde shape of an [`Agent`]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AgentRecord {
    id: String,
    mode: AgentMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    slave_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    master_id: Option<String>,
    #[serde(default)]
    node: Option<String>,
    #[serde(default)]
    zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    availability_zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dmac: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<AgentRecord> for Agent {
    type Error = String;

    fn try_from(record: AgentRecord) -> Result<Self, Self::Error> {
        let role = match record.mode {
            AgentMode::Alone => AgentRole::Alone,
            AgentMode::Master => AgentRole::Master {
                slave_id: record
                    .slave_id
                    .ok_or_else(|| format!("master agent '{}' has no slave_id", record.id))?,
            },
            AgentMode::Slave => AgentRole::Slave {
                master_id: record
                    .master_id
                    .ok_or_else(|| format!("slave agent '{}' has no master_id", record.id))?,
            },
        };

        Ok(Agent {
            id: record.id,
            role,
            node: record.node,
            zone: record.zone,
            availability_zone: record.availability_zone,
            ip: record.ip,
            pip: record.pip,
            dmac: record.dmac,
            extra: record.extra,
        })
    }
}

impl From<Agent> for AgentRecord {
    fn from(agent: Agent) -> Self {
        let mode = agent.mode();
        let (slave_id, master_id) = match agent.role {
            AgentRole::Alone => (None, None),
            AgentRole::Master { slave_id } => (Some(slave_id), None),
            AgentRole::Slave { master_id } => (None, Some(master_id)),
        };

        AgentRecord {
            id: agent.id,
            mode,
            slave_id,
            master_id,
            node: agent.node,
            zone: agent.zone,
            availability_zone: agent.availability_zone,
            ip: agent.ip,
            pip: agent.pip,
            dmac: agent.dmac,
            extra: agent.extra,
        }
    }
}

/// Agents keyed by id, iterated in insertion order
///
/// Iteration order matters: post-deployment redistribution claims hosts in
/// the order agents were generated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentMap {
    agents: Vec<Agent>,
    index: HashMap<String, usize>,
}

impl AgentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an agent under its own id. An agent with the same id is
    /// replaced in place and returned.
    pub fn insert(&mut self, agent: Agent) -> Option<Agent> {
        match self.index.get(&agent.id) {
            Some(&pos) => Some(std::mem::replace(&mut self.agents[pos], agent)),
            None => {
                self.index.insert(agent.id.clone(), self.agents.len());
                self.agents.push(agent);
                None
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Agent> {
        self.index.get(id).map(|&pos| &self.agents[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Agent> {
        self.agents.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.agents.iter().map(|a| a.id.as_str())
    }

    /// Check that every paired agent points at a partner of the opposite
    /// mode which points back at it
    pub fn pairs_consistent(&self) -> bool {
        self.agents.iter().all(|agent| match &agent.role {
            AgentRole::Alone => true,
            AgentRole::Master { slave_id } => matches!(
                self.get(slave_id).map(|s| &s.role),
                Some(AgentRole::Slave { master_id }) if *master_id == agent.id
            ),
            AgentRole::Slave { master_id } => matches!(
                self.get(master_id).map(|m| &m.role),
                Some(AgentRole::Master { slave_id }) if *slave_id == agent.id
            ),
        })
    }
}

impl FromIterator<Agent> for AgentMap {
    fn from_iter<I: IntoIterator<Item = Agent>>(iter: I) -> Self {
        let mut map = AgentMap::new();
        for agent in iter {
            map.insert(agent);
        }
        map
    }
}

impl Extend<Agent> for AgentMap {
    fn extend<I: IntoIterator<Item = Agent>>(&mut self, iter: I) {
        for agent in iter {
            self.insert(agent);
        }
    }
}

impl IntoIterator for AgentMap {
    type Item = Agent;
    type IntoIter = std::vec::IntoIter<Agent>;

    fn into_iter(self) -> Self::IntoIter {
        self.agents.into_iter()
    }
}

impl<'a> IntoIterator for &'a AgentMap {
    type Item = &'a Agent;
    type IntoIter = std::slice::Iter<'a, Agent>;

    fn into_iter(self) -> Self::IntoIter {
        self.agents.iter()
    }
}

impl Serialize for AgentMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.agents.len()))?;
        for agent in &self.agents {
            map.serialize_entry(&agent.id, agent)?;
        }
        map.end()
    }
}
