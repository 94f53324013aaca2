//! Agent generation from compute nodes and an accommodation
//!
//! The generator turns an [`Accommodation`] and a pool of compute nodes into
//! the set of agents a stack template has to realize. Nodes are walked
//! round-robin; room modes decide which round-robin slot each half of a pair
//! lands on.

use rand::seq::index;
use rand::Rng;
use tracing::{debug, warn};

use super::accommodation::Accommodation;
use super::agent::{Agent, AgentMap, ComputeNode};
use super::PlacementError;

// ============================================================================
// SBIO: Pure node selection helpers
// ============================================================================

/// Keep nodes whose zone, or `zone:host`, appears in `zones`
pub fn filter_by_zones(compute_nodes: &[ComputeNode], zones: &[String]) -> Vec<ComputeNode> {
    compute_nodes
        .iter()
        .filter(|c| zones.contains(&c.zone) || zones.contains(&c.qualified_zone()))
        .cloned()
        .collect()
}

/// Interleave nodes of two zones as master-zone, slave-zone pairs.
///
/// The master zone is `zones[0]` when it is one of the two zones present,
/// otherwise the first zone seen. Nodes past the shorter side are dropped.
/// With any number of distinct zones other than two the input is returned
/// unchanged.
pub fn prepare_for_cross_az(compute_nodes: Vec<ComputeNode>, zones: &[String]) -> Vec<ComputeNode> {
    let mut distinct: Vec<&str> = Vec::new();
    for node in &compute_nodes {
        if !distinct.contains(&node.zone.as_str()) {
            distinct.push(&node.zone);
        }
    }

    if distinct.len() != 2 {
        warn!(
            "cross_az is specified, but nodes span {} zone(s) instead of 2",
            distinct.len()
        );
        return compute_nodes;
    }

    let master_zone = match zones.first() {
        Some(z) if distinct.contains(&z.as_str()) => z.clone(),
        _ => distinct[0].to_string(),
    };

    let (masters, slaves): (Vec<ComputeNode>, Vec<ComputeNode>) = compute_nodes
        .into_iter()
        .partition(|node| node.zone == master_zone);

    masters
        .into_iter()
        .zip(slaves)
        .flat_map(|(m, s)| [m, s])
        .collect()
}

/// Apply the requested node count.
///
/// Asking for more nodes than available fails unless `best_effort`, in which
/// case every node is used. Otherwise a uniformly random subset of exactly
/// the requested size is returned.
pub fn select_compute_nodes<R: Rng + ?Sized>(
    compute_nodes: Vec<ComputeNode>,
    accommodation: &Accommodation,
    rng: &mut R,
) -> Result<Vec<ComputeNode>, PlacementError> {
    let Some(requested) = accommodation.compute_nodes() else {
        return Ok(compute_nodes);
    };

    if requested > compute_nodes.len() {
        if accommodation.best_effort() {
            warn!(
                "Allowing best_effort accommodation: compute nodes requested: {}: available: {}",
                requested,
                compute_nodes.len()
            );
            return Ok(compute_nodes);
        }
        return Err(PlacementError::InsufficientCapacity(format!(
            "not enough compute nodes {:?} for requested instance accommodation {:?}",
            compute_nodes, accommodation
        )));
    }

    Ok(index::sample(rng, compute_nodes.len(), requested)
        .into_iter()
        .map(|i| compute_nodes[i].clone())
        .collect())
}

/// Number of placement rounds for the accommodation on `node_count` nodes
pub fn iteration_count(
    node_count: usize,
    accommodation: &Accommodation,
) -> Result<usize, PlacementError> {
    let iterations = node_count
        .checked_mul(accommodation.density())
        .ok_or_else(|| {
            PlacementError::InsufficientCapacity(format!(
                "density {} on {} compute node(s) is out of range",
                accommodation.density(),
                node_count
            ))
        })?;

    if accommodation.single_room() && accommodation.pair() {
        // a single pair may share one node when best effort is allowed
        if accommodation.best_effort() && iterations == 1 {
            warn!("Allowing best_effort accommodation: single_room, pair on one compute node");
            return Ok(iterations);
        }
        return Ok(iterations / 2);
    }

    Ok(iterations)
}

// ============================================================================
// SBIO: Agent generation
// ============================================================================

/// Generate the agents for one deployment.
///
/// `unique` namespaces the agent ids and must differ between concurrent runs.
pub fn generate_agents<R: Rng + ?Sized>(
    compute_nodes: &[ComputeNode],
    accommodation: &Accommodation,
    unique: &str,
    rng: &mut R,
) -> Result<AgentMap, PlacementError> {
    debug!("Generating agents over {} compute node(s)", compute_nodes.len());

    let mut nodes = compute_nodes.to_vec();
    let zones = accommodation.zones();

    if let Some(ref zones) = zones {
        nodes = filter_by_zones(&nodes, zones);
    }
    if accommodation.cross_az() {
        nodes = prepare_for_cross_az(nodes, zones.as_deref().unwrap_or_default());
    }

    let nodes = select_compute_nodes(nodes, accommodation, rng)?;
    let iterations = iteration_count(nodes.len(), accommodation)?;
    let node_at = |x: usize| &nodes[x % nodes.len()];

    let mut agents = AgentMap::new();

    for i in 0..iterations {
        if accommodation.pair() {
            let master_id = format!("{}_master_{}", unique, i);
            let slave_id = format!("{}_slave_{}", unique, i);

            let (master_slot, slave_slot) = if accommodation.single_room() {
                (2 * i, 2 * i + 1)
            } else if accommodation.double_room() {
                (i, i)
            } else {
                // mixed_room
                (i, i + 1)
            };

            agents.insert(Agent::master(&master_id, &slave_id).placed_on(node_at(master_slot)));
            agents.insert(Agent::slave(&slave_id, &master_id).placed_on(node_at(slave_slot)));
        } else if accommodation.single_room() {
            let agent_id = format!("{}_agent_{}", unique, i);
            agents.insert(Agent::alone(agent_id).placed_on(node_at(i)));
        }
    }

    if agents.is_empty() {
        return Err(PlacementError::InsufficientCapacity(format!(
            "not enough compute nodes {:?} for requested instance accommodation {:?}",
            nodes, accommodation
        )));
    }

    let mut result = AgentMap::new();
    for mut agent in agents {
        agent.inject_availability_zone();
        result.insert(agent);
    }

    debug!("Generated {} agent(s)", result.len());
    Ok(result)
}
