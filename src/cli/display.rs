//! Display formatting for CLI output
//!
//! Pure functions that format run records for display

use crate::report::{RunOutput, RunStatus};

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No runs.\n".to_string();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();
    let mut push_row = |cells: Vec<String>| {
        let line: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| match widths.get(i) {
                Some(&width) => format!("{:width$}", cell, width = width),
                None => cell.clone(),
            })
            .collect();
        output.push_str(line.join("   ").trim_end());
        output.push('\n');
    };

    push_row(headers.iter().map(|h| h.to_uppercase()).collect());
    for row in rows {
        push_row(row);
    }

    output
}

/// One run record as pretty JSON
pub fn format_run_output(output: &RunOutput) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(output)
}

fn status_label(status: &RunStatus) -> String {
    match status {
        RunStatus::Succeeded => "succeeded".to_string(),
        RunStatus::Failed { error } => format!("failed: {}", error),
        RunStatus::Interrupted => "interrupted".to_string(),
    }
}

/// One line per run: scenario, status, agent count, stacks
pub fn format_run_summary(outputs: &[RunOutput]) -> String {
    let rows = outputs
        .iter()
        .map(|output| {
            let stacks: Vec<String> = output
                .support_stacks
                .iter()
                .map(|s| match s.id {
                    Some(ref id) => format!("{} ({})", s.name, id),
                    None => s.name.clone(),
                })
                .collect();
            vec![
                output.scenarios.keys().cloned().collect::<Vec<_>>().join(", "),
                status_label(&output.status),
                output.agents.len().to_string(),
                if stacks.is_empty() {
                    "-".to_string()
                } else {
                    stacks.join(", ")
                },
            ]
        })
        .collect();

    format_table(&["scenario", "status", "agents", "stacks"], rows)
}

/// Agents of one run: id, mode, node, addresses
pub fn format_agent_list(output: &RunOutput) -> String {
    let dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    let rows = output
        .plain_agents()
        .into_iter()
        .map(|agent| {
            vec![
                agent.id.clone(),
                agent.mode().as_str().to_string(),
                dash(&agent.node),
                dash(&agent.ip),
                dash(&agent.pip),
            ]
        })
        .collect();

    format_table(&["id", "mode", "node", "ip", "pip"], rows)
}
