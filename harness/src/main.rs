use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use text_generation_harness::logging::init_logging;
use text_generation_harness::runner::{Auxiliary, Harness, RunOptions, Summary};
use text_generation_harness::{
    suite, HarnessError, InstructFormat, InstructPrompt, RoleplayFormat, RoleplayPrompt,
};
use text_generation_harness_client::{connect, Model, Role};

/// Context size of the auxiliary model
const AUXILIARY_CONTEXT_SIZE: u32 = 2048;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    Koboldcpp,
    Llamacpp,
    Ooba,
}

impl Backend {
    fn as_str(&self) -> &'static str {
        match self {
            Backend::Koboldcpp => "koboldcpp",
            Backend::Llamacpp => "llamacpp",
            Backend::Ooba => "ooba",
        }
    }
}

/// App Configuration
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Server dialect of the model under test
    #[clap(long, env, value_enum)]
    backend: Backend,
    /// Host of the model under test, e.g. `127.0.0.1:5000`
    #[clap(long, env)]
    host: String,
    #[clap(default_value = "default", long, env)]
    preset: String,
    #[clap(default_value = "2048", long, env)]
    context_size: u32,
    #[clap(default_value = "alpaca", long, env)]
    format: String,

    /// Server dialect of the model judging outputs
    #[clap(long, env, value_enum, requires = "auxiliary_host")]
    auxiliary_backend: Option<Backend>,
    #[clap(long, env, requires = "auxiliary_backend")]
    auxiliary_host: Option<String>,
    #[clap(default_value = "precise", long, env)]
    auxiliary_preset: String,
    #[clap(default_value = "alpaca", long, env)]
    auxiliary_format: String,

    /// Number of attempts per test; a majority of them must pass
    #[clap(default_value = "5", long, env, value_parser = clap::value_parser!(u32).range(1..))]
    passes: u32,
    /// Initial seed of the sampler seeds
    #[clap(long, env)]
    seed: Option<u32>,

    /// Only run this test suite
    #[clap(long, env)]
    test_suite: Option<String>,
    /// Only run this test
    #[clap(long, env)]
    test: Option<String>,

    #[clap(long, env)]
    verbose: bool,
    #[clap(long, env)]
    json_output: bool,

    #[clap(default_value = "presets", long, env)]
    presets_dir: PathBuf,
    #[clap(default_value = "formats", long, env)]
    formats_dir: PathBuf,
    #[clap(default_value = "tests", long, env)]
    tests_dir: PathBuf,
    #[clap(default_value = "logs", long, env)]
    log_dir: PathBuf,
}

fn json_file(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.json"))
}

fn connect_model(
    backend: Backend,
    host: &str,
    role: Role,
    context_size: u32,
    seed: Option<u32>,
    preset: &Path,
) -> Result<Model, HarnessError> {
    let mut model = Model::new(connect(backend.as_str(), host, role)?, context_size, seed);
    model.wait();
    model.load_preset(preset)?;
    Ok(model)
}

fn run(args: &Args, interrupted: &AtomicBool) -> Result<Summary, HarnessError> {
    let model = connect_model(
        args.backend,
        &args.host,
        Role::Primary,
        args.context_size,
        args.seed,
        &json_file(&args.presets_dir, &args.preset),
    )?;
    let format = RoleplayFormat::load(json_file(&args.formats_dir, &args.format))?;

    let auxiliary = match (args.auxiliary_backend, &args.auxiliary_host) {
        (Some(backend), Some(host)) => {
            let model = connect_model(
                backend,
                host,
                Role::Auxiliary,
                AUXILIARY_CONTEXT_SIZE,
                args.seed,
                &json_file(&args.presets_dir, &args.auxiliary_preset),
            )?;
            let format = InstructFormat::load(json_file(&args.formats_dir, &args.auxiliary_format))?;
            Some(Auxiliary::new(model, InstructPrompt::new(format)))
        }
        _ => {
            tracing::info!("Auxiliary model not specified, some tests will be skipped.");
            None
        }
    };

    let suites = suite::load_all(&args.tests_dir);
    let options = RunOptions {
        passes: args.passes,
        suite: args.test_suite.clone(),
        test: args.test.clone(),
    };

    let mut harness = Harness::new(model, RoleplayPrompt::new(format), auxiliary);
    Ok(harness.run(&suites, &options, interrupted))
}

fn main() -> ExitCode {
    let args: Args = Args::parse();

    let log_file = match init_logging(args.verbose, args.json_output, Some(args.log_dir.as_path())) {
        Ok(log_file) => log_file,
        Err(err) => {
            eprintln!("Could not create log file in {}: {err}", args.log_dir.display());
            return ExitCode::FAILURE;
        }
    };
    if let Some(log_file) = log_file {
        tracing::debug!("Logging to {}", log_file.display());
    }
    tracing::info!("{:?}", args);

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        tracing::warn!("Interrupted, stopping after the current test. Press Ctrl-C again to quit now.");
    })
    .expect("Error setting Ctrl-C handler");

    match run(&args, &interrupted) {
        Ok(summary) => {
            summary.log();
            match summary.success() {
                true => ExitCode::SUCCESS,
                false => ExitCode::FAILURE,
            }
        }
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
