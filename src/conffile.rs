//! VSPERF configuration for deployed traffic generators
//!
//! A run's agents become the east and west chassis of the traffic
//! generator. The base `vsperf-<tgen>.conf` is copied to a timestamped file
//! and the addresses are appended to the copy.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use thiserror::Error;
use tracing::{info, warn};

use crate::placement::Agent;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(Error, Debug)]
pub enum ConffileError {
    #[error("Failed to copy {}: {}", .0.display(), .1)]
    Copy(PathBuf, std::io::Error),

    #[error("Failed to write {}: {}", .0.display(), .1)]
    Write(PathBuf, std::io::Error),
}

/// East and west chassis addresses. West falls back to east unless there
/// are exactly two agents.
pub fn chassis_addresses(agents: &[&Agent]) -> Option<(String, String)> {
    let east = agents.first()?.pip.clone().unwrap_or_default();
    let west = match agents {
        [_, second] => second.pip.clone().unwrap_or_default(),
        _ => east.clone(),
    };
    Some((east, west))
}

/// Lines appended for a traffic generator; unknown generators get none
pub fn vsperf_lines(tgen: &str, east: &str, west: &str) -> Vec<String> {
    match tgen {
        "spirent" => vec![
            format!("TRAFFICGEN_STC_EAST_CHASSIS_ADDR = \"{}\"", east),
            format!("TRAFFICGEN_STC_WEST_CHASSIS_ADDR = \"{}\"", west),
        ],
        "ixnet" => vec![
            format!("TRAFFICGEN_EAST_IXIA_HOST = {}", east),
            format!("TRAFFICGEN_WEST_IXIA_HOST = {}", west),
        ],
        _ => Vec::new(),
    }
}

/// Write a timestamped VSPERF config for `tgen` into `dir`.
///
/// Returns the path of the new file, or `None` when there are no agents.
pub fn write_vsperf_conffile(
    agents: &[&Agent],
    tgen: &str,
    dir: &Path,
) -> Result<Option<PathBuf>, ConffileError> {
    let Some((east, west)) = chassis_addresses(agents) else {
        warn!("No agents provided, VSPERF configuration not written");
        return Ok(None);
    };

    let source = dir.join(format!("vsperf-{}.conf", tgen));
    let timestamp = Local::now().format(TIMESTAMP_FORMAT);
    let dest = dir.join(format!("vsperf-{}-{}.conf", tgen, timestamp));

    std::fs::copy(&source, &dest).map_err(|e| ConffileError::Copy(source.clone(), e))?;
    info!("Using file: {}", dest.display());

    let mut file = OpenOptions::new()
        .append(true)
        .open(&dest)
        .map_err(|e| ConffileError::Write(dest.clone(), e))?;
    for line in vsperf_lines(tgen, &east, &west) {
        writeln!(file, "{}", line).map_err(|e| ConffileError::Write(dest.clone(), e))?;
    }

    Ok(Some(dest))
}
