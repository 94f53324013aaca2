use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use testvnf::cli::{format_agent_list, format_run_output, format_run_summary, Args};
use testvnf::conffile::write_vsperf_conffile;
use testvnf::config::{default_config_dir, expand_path, load_settings};
use testvnf::deployment::play_scenario;
use testvnf::infra::OpenStackConnector;
use testvnf::report::RunStatus;
use testvnf::scenario::load_scenario;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter())),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    match run(&args).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            process::exit(1);
        }
    }
}

/// Play every scenario; `Ok(false)` when any of them failed or the run was
/// interrupted.
async fn run(args: &Args) -> anyhow::Result<bool> {
    let config_dir = expand_path(&args.config_dir.clone().unwrap_or_else(default_config_dir));
    let settings = load_settings(&config_dir)
        .with_context(|| format!("Failed to load settings from {}", config_dir.display()))?;

    let scenarios: Vec<PathBuf> = if args.scenarios.is_empty() {
        settings.scenarios.iter().map(PathBuf::from).collect()
    } else {
        args.scenarios.clone()
    };
    if scenarios.is_empty() {
        warn!("No scenarios to play, set SCENARIOS or pass scenario files");
    }

    let connector = OpenStackConnector::new(Duration::from_secs(settings.stack_create_timeout()));
    let mut outputs = Vec::new();
    let mut ok = true;

    let cancel = CancellationToken::new();
    let on_sigint = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Caught SIGINT. Terminating");
            on_sigint.cancel();
        }
    });

    for path in &scenarios {
        if cancel.is_cancelled() {
            ok = false;
            break;
        }
        info!("Play scenario: {}", path.display());
        let scenario = match load_scenario(&expand_path(path)) {
            Ok(scenario) => scenario,
            Err(e) => {
                error!("{}", e);
                ok = false;
                continue;
            }
        };

        let output = play_scenario(&settings, &scenario, &connector, &cancel).await;
        let interrupted = output.status == RunStatus::Interrupted;

        match output.status {
            RunStatus::Succeeded => {
                if let Some(ref tgen) = args.tgen {
                    if let Err(e) =
                        write_vsperf_conffile(&output.plain_agents(), tgen, &args.testconf_dir)
                    {
                        error!("{}", e);
                        ok = false;
                    }
                }
            }
            RunStatus::Failed { .. } | RunStatus::Interrupted => ok = false,
        }

        if !args.summary {
            println!("{}", format_run_output(&output)?);
        }
        outputs.push(output);

        if interrupted {
            break;
        }
    }

    if args.summary {
        print!("{}", format_run_summary(&outputs));
        for output in outputs.iter().filter(|o| !o.agents.is_empty()) {
            println!();
            print!("{}", format_agent_list(output));
        }
    }
    Ok(ok)
}
