//! Redistribution of agents onto the hosts they actually landed on
//!
//! Without admin rights the compute hosts are unknown before deployment, so
//! several agents may end up on the same hypervisor. After deployment each
//! agent is resolved to its real host, at most one agent is kept per host,
//! and masters and slaves are paired up again.

use std::collections::{HashMap, HashSet};

use tracing::info;

use super::agent::{AgentMap, AgentRole};

/// Resolves an agent id to the id of the host it runs on
pub trait HostResolver {
    fn resolve_host(&self, agent_id: &str) -> Option<String>;
}

impl<F> HostResolver for F
where
    F: Fn(&str) -> Option<String>,
{
    fn resolve_host(&self, agent_id: &str) -> Option<String> {
        self(agent_id)
    }
}

/// Pre-resolved host ids keyed by agent id
impl HostResolver for HashMap<String, String> {
    fn resolve_host(&self, agent_id: &str) -> Option<String> {
        self.get(agent_id).cloned()
    }
}

/// Deduplicate agents by host and re-pair them.
///
/// Agents claim hosts in map order; an agent whose host is taken, or whose
/// host cannot be resolved, is dropped. If any solo agents survive the
/// result is exactly those. Otherwise masters and slaves are zipped in the
/// order they claimed their hosts and linked to each other; the surplus of
/// the longer side is dropped.
pub fn distribute_agents<H>(agents: AgentMap, resolver: &H) -> AgentMap
where
    H: HostResolver + ?Sized,
{
    let mut hosts = HashSet::new();
    let mut alone = Vec::new();
    let mut masters = Vec::new();
    let mut slaves = Vec::new();

    for mut agent in agents {
        let Some(host_id) = resolver.resolve_host(&agent.id) else {
            info!("Filter out agent {}, its host could not be resolved", agent.id);
            continue;
        };

        if !hosts.insert(host_id.clone()) {
            info!(
                "Filter out agent {}, host {} is already occupied",
                agent.id, host_id
            );
            continue;
        }

        agent.node = Some(host_id);
        match agent.role {
            AgentRole::Alone => alone.push(agent),
            AgentRole::Master { .. } => masters.push(agent),
            AgentRole::Slave { .. } => slaves.push(agent),
        }
    }

    if !alone.is_empty() {
        return alone.into_iter().collect();
    }

    let mut result = AgentMap::new();
    for (mut master, mut slave) in masters.into_iter().zip(slaves) {
        master.role = AgentRole::Master {
            slave_id: slave.id.clone(),
        };
        slave.role = AgentRole::Slave {
            master_id: master.id.clone(),
        };
        result.insert(master);
        result.insert(slave);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::agent::Agent;

    fn hosts(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(a, h)| (a.to_string(), h.to_string()))
            .collect()
    }

    #[test]
    fn test_duplicate_host_discards_later_agent() {
        let agents: AgentMap = ["a0", "a1"].into_iter().map(Agent::alone).collect();
        let result = distribute_agents(agents, &hosts(&[("a0", "hx"), ("a1", "hx")]));

        assert_eq!(result.ids().collect::<Vec<_>>(), vec!["a0"]);
        assert_eq!(result.get("a0").unwrap().node.as_deref(), Some("hx"));
    }

    #[test]
    fn test_alone_agents_win_over_pairs() {
        let agents: AgentMap = [
            Agent::master("m0", "s0"),
            Agent::slave("s0", "m0"),
            Agent::alone("a0"),
        ]
        .into_iter()
        .collect();
        let result = distribute_agents(agents, &hosts(&[("m0", "h1"), ("s0", "h2"), ("a0", "h3")]));

        assert_eq!(result.ids().collect::<Vec<_>>(), vec!["a0"]);
    }

    #[test]
    fn test_pairs_relinked_positionally() {
        // s1 lands on m0's host, which leaves m1 without a slave
        let agents: AgentMap = [
            Agent::master("m0", "s0"),
            Agent::slave("s0", "m0"),
            Agent::master("m1", "s1"),
            Agent::slave("s1", "m1"),
        ]
        .into_iter()
        .collect();
        let resolved = hosts(&[("m0", "h1"), ("s0", "h2"), ("m1", "h3"), ("s1", "h1")]);

        let result = distribute_agents(agents, &resolved);
        assert_eq!(result.len(), 2);
        assert_eq!(
            result.get("m0").unwrap().role,
            AgentRole::Master {
                slave_id: "s0".to_string()
            }
        );
        assert!(result.get("m1").is_none());
        assert!(result.pairs_consistent());
    }

    #[test]
    fn test_relinking_overwrites_original_pairing() {
        let agents: AgentMap = [
            Agent::master("m0", "s0"),
            Agent::slave("s0", "m0"),
            Agent::master("m1", "s1"),
            Agent::slave("s1", "m1"),
        ]
        .into_iter()
        .collect();
        // s0 shares a host with m0, so m0 pairs with s1 and m1 is surplus
        let resolved = hosts(&[("m0", "h1"), ("s0", "h1"), ("m1", "h2"), ("s1", "h3")]);

        let result = distribute_agents(agents, &resolved);
        assert_eq!(result.len(), 2);
        assert_eq!(
            result.get("m0").unwrap().role,
            AgentRole::Master {
                slave_id: "s1".to_string()
            }
        );
        assert_eq!(
            result.get("s1").unwrap().role,
            AgentRole::Slave {
                master_id: "m0".to_string()
            }
        );
        assert!(result.pairs_consistent());
    }

    #[test]
    fn test_unresolved_host_dropped() {
        let agents: AgentMap = ["a0", "a1"].into_iter().map(Agent::alone).collect();
        let resolver = |id: &str| (id == "a1").then(|| "h9".to_string());

        let result = distribute_agents(agents, &resolver);
        assert_eq!(result.ids().collect::<Vec<_>>(), vec!["a1"]);
    }

    #[test]
    fn test_hosts_exclusive_and_never_grows() {
        let agents: AgentMap = (0..6)
            .flat_map(|i| {
                [
                    Agent::master(format!("m{}", i), format!("s{}", i)),
                    Agent::slave(format!("s{}", i), format!("m{}", i)),
                ]
            })
            .collect();
        let before = agents.len();
        let resolver = |id: &str| Some(format!("h{}", id.len() + id.as_bytes()[1] as usize % 4));

        let result = distribute_agents(agents, &resolver);
        assert!(result.len() <= before);

        let mut seen = HashSet::new();
        for agent in &result {
            assert!(seen.insert(agent.node.clone().unwrap()));
        }
        assert!(result.pairs_consistent());
    }
}
