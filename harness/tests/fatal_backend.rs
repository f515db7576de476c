use mockito::Server;
use std::path::PathBuf;
use subprocess::{Exec, ExitStatus, Redirection};

fn assets() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets")
}

#[test]
fn test_backend_error_exits_with_failure() {
    let mut server = Server::new();
    let probe = server.mock("GET", "/").with_status(200).create();
    let completion = server
        .mock("POST", "/completion")
        .with_status(500)
        .expect(1)
        .create();
    let log_dir = tempfile::tempdir().unwrap();

    let capture = Exec::cmd(env!("CARGO_BIN_EXE_text-generation-harness"))
        .args(&["--backend", "llamacpp", "--host", server.url().as_str()])
        .args(&["--passes", "1", "--test-suite", "basic_understanding"])
        .arg("--presets-dir")
        .arg(assets().join("presets"))
        .arg("--formats-dir")
        .arg(assets().join("formats"))
        .arg("--tests-dir")
        .arg(assets().join("tests"))
        .arg("--log-dir")
        .arg(log_dir.path())
        .env("LOG_COLORIZE", "false")
        .env_remove("LOG_LEVEL")
        .stdout(Redirection::Pipe)
        .stderr(Redirection::Merge)
        .capture()
        .unwrap();
    let output = capture.stdout_str();

    assert_eq!(capture.exit_status, ExitStatus::Exited(1), "{output}");
    let error = format!(
        "Model backend ({}) returned an error. HTTP status code: 500",
        server.url()
    );
    assert!(output.contains(&error), "{output}");
    // The run stops at the first failed call
    assert!(!output.contains("Completed"), "{output}");
    probe.assert();
    completion.assert();
}
