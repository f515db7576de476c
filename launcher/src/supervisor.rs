use crate::LauncherError;
use std::io::{self, BufRead, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, sleep, JoinHandle};
use std::time::Duration;
use subprocess::{ExitStatus, Popen, PopenConfig, PopenError, Redirection};

fn spawn(argv: &[String]) -> Result<Popen, LauncherError> {
    let Some(program) = argv.first() else {
        return Err(LauncherError::InvalidItem("empty command line".to_string()));
    };
    Popen::create(
        argv,
        PopenConfig {
            stdout: Redirection::Pipe,
            stderr: Redirection::Merge,
            // Needed for the shutdown procedure
            setpgid: true,
            ..Default::default()
        },
    )
    .map_err(|err| {
        if let PopenError::IoError(ref io_err) = err {
            if io_err.kind() == io::ErrorKind::NotFound {
                tracing::error!("{program} not found");
            }
        }
        LauncherError::Spawn {
            program: program.clone(),
            source: err,
        }
    })
}

fn terminate(name: &str, process: &mut Popen) {
    if process.poll().is_some() {
        return;
    }
    let _ = process.terminate();
    tracing::info!("Waiting for {name} to gracefully shutdown");
    match process.wait_timeout(Duration::from_secs(90)) {
        Ok(Some(_)) => tracing::info!("{name} terminated"),
        _ => {
            tracing::warn!("{name} did not shutdown in time, killing it");
            let _ = process.kill();
            let _ = process.wait();
        }
    }
}

/// Keeps at most one backend server process alive
pub struct Supervisor {
    name: &'static str,
    current: Option<(Vec<String>, Popen)>,
}

impl Supervisor {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            current: None,
        }
    }

    /// Make sure a server started with `argv` is running.
    /// A live process started with the same command line is reused.
    pub fn ensure(&mut self, argv: &[String]) -> Result<(), LauncherError> {
        if let Some((current, process)) = self.current.as_mut() {
            if current.as_slice() == argv && process.poll().is_none() {
                tracing::debug!("Reusing {}", self.name);
                return Ok(());
            }
        }
        self.stop();

        tracing::info!("Starting {}: {}", self.name, argv.join(" "));
        let mut process = spawn(argv)?;

        // Redirect server output to the logs
        if let Some(stdout) = process.stdout.take() {
            let name = self.name;
            thread::spawn(move || {
                let _span = tracing::span!(tracing::Level::INFO, "server", name).entered();
                for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                    tracing::debug!("{line}");
                }
            });
        }

        self.current = Some((argv.to_vec(), process));
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some((_, mut process)) = self.current.take() {
            terminate(self.name, &mut process);
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run the harness until it exits or `running` is cleared.
/// Returns whether every test passed.
pub fn run_harness(argv: &[String], running: &AtomicBool) -> Result<bool, LauncherError> {
    tracing::info!("Running {}", argv.join(" "));
    let mut process = spawn(argv)?;

    // Redirect harness output to the console
    let forward: Option<JoinHandle<()>> = process.stdout.take().map(|stdout| {
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                println!("{line}");
            }
        })
    });

    let passed = loop {
        if let Some(status) = process.poll() {
            break match status {
                ExitStatus::Exited(0) => true,
                ExitStatus::Exited(exit_code) => {
                    tracing::error!("Harness exited with code {exit_code}");
                    false
                }
                _ => {
                    tracing::error!("Harness exited with an unknown status.");
                    false
                }
            };
        }
        if !running.load(Ordering::SeqCst) {
            terminate("harness", &mut process);
            break false;
        }
        sleep(Duration::from_millis(100));
    };

    if let Some(forward) = forward {
        let _ = forward.join();
    }
    Ok(passed)
}
