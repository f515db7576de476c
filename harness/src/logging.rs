use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{filter::LevelFilter, EnvFilter, Layer};

/// `logs/log_<timestamp>.txt`
pub fn log_file_path(log_dir: &Path) -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    log_dir.join(format!("log_{timestamp}.txt"))
}

fn filter_directives(log_level: &str) -> &str {
    // Keep dependencies quiet on the shorthand levels
    match log_level {
        "warn" => "text_generation_harness=warn,text_generation_harness_client=warn",
        "info" => "text_generation_harness=info,text_generation_harness_client=info",
        "debug" => "text_generation_harness=debug,text_generation_harness_client=debug",
        "trace" => "text_generation_harness=trace,text_generation_harness_client=trace",
        log_level => log_level,
    }
}

/// Init logging using the LOG_LEVEL env variable:
///     - LOG_LEVEL may be TRACE, DEBUG, INFO, WARN or ERROR (default to INFO, DEBUG with `verbose`)
///     - LOG_COLORIZE may be "false" or "true" (default to "true" or ansi supported platforms)
///
/// Every event is also appended to a timestamped file in `log_dir`, when given.
/// Returns the path of that file.
pub fn init_logging(
    verbose: bool,
    json_output: bool,
    log_dir: Option<&Path>,
) -> io::Result<Option<PathBuf>> {
    let mut layers = Vec::new();

    // STDOUT/STDERR layer
    let ansi = std::env::var("LOG_COLORIZE") != Ok("false".to_string());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_ansi(ansi)
        .with_line_number(true);

    let fmt_layer = match json_output {
        true => fmt_layer.json().flatten_event(true).boxed(),
        false => fmt_layer.boxed(),
    };
    layers.push(fmt_layer);

    // Plain text log file
    let log_file = match log_dir {
        Some(log_dir) => {
            fs::create_dir_all(log_dir)?;
            let path = log_file_path(log_dir);
            let file = File::options().create(true).append(true).open(&path)?;
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file))
                    .boxed(),
            );
            Some(path)
        }
        None => None,
    };

    // Filter events with LOG_LEVEL
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = match std::env::var("LOG_LEVEL") {
        Ok(log_level) => EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse_lossy(filter_directives(&log_level.to_lowercase())),
        Err(_) => EnvFilter::new(filter_directives(default_level)),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .init();

    Ok(log_file)
}
