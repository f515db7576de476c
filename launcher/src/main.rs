use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use subprocess::PopenError;
use thiserror::Error;

mod plan;
mod supervisor;

use plan::{ModelParams, Server};
use supervisor::{run_harness, Supervisor};

#[derive(Debug, Error)]
pub enum LauncherError {
    #[error("Could not read test plan {}: {source}", path.display())]
    Plan {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Could not parse test plan {}: {source}", path.display())]
    PlanJson {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{0}")]
    InvalidItem(String),
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: PopenError,
    },
}

/// App Configuration
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// JSON list of harness runs
    #[clap(default_value = "test_plan.json", long, env)]
    test_plan: PathBuf,
    #[clap(default_value = "text-generation-harness", long, env)]
    harness_bin: String,
    #[clap(long, env)]
    json_output: bool,
}

fn serve(supervisor: &mut Supervisor, params: Option<&ModelParams>) -> Result<(), LauncherError> {
    match params.map(|params| &params.server) {
        Some(Server::Local { argv, .. }) => supervisor.ensure(argv),
        // Remote or absent: nothing to supervise
        _ => {
            supervisor.stop();
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Filter events with LOG_LEVEL
    let env_filter = tracing_subscriber::EnvFilter::try_from_env("LOG_LEVEL")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if args.json_output {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .compact()
            .init();
    }
    tracing::info!("{:?}", args);

    let plan = match plan::load(&args.test_plan) {
        Ok(plan) => plan,
        Err(err) => {
            tracing::error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    // Signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    let mut primary_server = Supervisor::new("primary server");
    let mut secondary_server = Supervisor::new("secondary server");
    let mut exit_code = ExitCode::SUCCESS;

    for (index, item) in plan.iter().enumerate() {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let (primary, secondary) = match item
            .primary()
            .and_then(|primary| Ok((primary, item.secondary()?)))
        {
            Ok(params) => params,
            Err(err) => {
                tracing::error!("Skipping test plan item {index}: {err}");
                continue;
            }
        };

        let served = serve(&mut primary_server, Some(&primary))
            .and_then(|_| serve(&mut secondary_server, secondary.as_ref()));
        if let Err(err) = served {
            tracing::error!("Skipping test plan item {index}: {err}");
            exit_code = ExitCode::FAILURE;
            continue;
        }

        let argv = item.harness_argv(
            &args.harness_bin,
            &primary,
            secondary.as_ref(),
            args.json_output,
        );
        match run_harness(&argv, &running) {
            Ok(true) => tracing::info!("Test plan item {index} passed"),
            Ok(false) => {
                tracing::warn!("Test plan item {index} failed");
                exit_code = ExitCode::FAILURE;
            }
            Err(err) => {
                tracing::error!("{err}");
                exit_code = ExitCode::FAILURE;
            }
        }
    }

    // Graceful termination
    primary_server.stop();
    secondary_server.stop();

    if !running.load(Ordering::SeqCst) {
        tracing::info!("Interrupted");
        return ExitCode::FAILURE;
    }
    exit_code
}
