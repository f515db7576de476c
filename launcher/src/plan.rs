use crate::LauncherError;
use serde::Deserialize;
use std::path::Path;

/// Ports of the servers started by the launcher
pub const PRIMARY_PORT: u16 = 5000;
pub const SECONDARY_PORT: u16 = 5001;
/// Context size of the secondary server
pub const SECONDARY_CONTEXT_SIZE: u32 = 2048;

/// Backends the harness can talk to
const BACKENDS: &[&str] = &["koboldcpp", "llamacpp", "ooba"];

fn default_preset() -> String {
    "default".to_string()
}

fn default_context_size() -> u32 {
    2048
}

/// One harness run of a test plan
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PlanItem {
    pub model_backend: String,
    pub model_backend_host: Option<String>,
    pub model_backend_path: Option<String>,
    pub model_path: Option<String>,
    pub model_format: String,
    #[serde(default = "default_preset")]
    pub model_preset: String,
    #[serde(default)]
    pub model_backend_args: String,

    pub secondary_model_backend: Option<String>,
    pub secondary_model_backend_host: Option<String>,
    pub secondary_model_backend_path: Option<String>,
    pub secondary_model_path: Option<String>,
    pub secondary_model_format: Option<String>,
    #[serde(default = "default_preset")]
    pub secondary_model_preset: String,
    #[serde(default)]
    pub secondary_model_backend_args: String,

    #[serde(default = "default_context_size")]
    pub context_size: u32,
    pub thread_number: u32,
    /// Appended to the harness command line
    #[serde(default)]
    pub extra_args: String,
}

pub fn load(path: &Path) -> Result<Vec<PlanItem>, LauncherError> {
    let content = std::fs::read_to_string(path).map_err(|source| LauncherError::Plan {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| LauncherError::PlanJson {
        path: path.to_path_buf(),
        source,
    })
}

/// Where a model is served from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Server {
    /// Already running at this host
    Remote(String),
    /// Started by the launcher with this command line
    Local { argv: Vec<String>, port: u16 },
}

impl Server {
    pub fn host(&self) -> String {
        match self {
            Server::Remote(host) => host.clone(),
            Server::Local { port, .. } => format!("127.0.0.1:{port}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelParams {
    pub backend: String,
    pub format: String,
    pub preset: String,
    pub server: Server,
}

fn split_args(args: &str) -> impl Iterator<Item = String> + '_ {
    args.split_whitespace().map(str::to_string)
}

#[allow(clippy::too_many_arguments)]
fn model_params(
    backend: &str,
    host: Option<&str>,
    backend_path: Option<&str>,
    model_path: Option<&str>,
    format: &str,
    preset: &str,
    backend_args: &str,
    context_size: u32,
    thread_number: u32,
    port: u16,
) -> Result<ModelParams, LauncherError> {
    let invalid = |message: String| LauncherError::InvalidItem(message);
    if !BACKENDS.contains(&backend) {
        return Err(invalid(format!("Invalid model backend: {backend}")));
    }

    let server = match host.filter(|host| !host.is_empty()) {
        Some(host) => Server::Remote(host.to_string()),
        None => {
            let (Some(backend_path), Some(model_path)) = (backend_path, model_path) else {
                return Err(invalid(format!(
                    "{backend} needs either a host or both a backend path and a model path"
                )));
            };
            let (context, threads, port_arg) = (
                context_size.to_string(),
                thread_number.to_string(),
                port.to_string(),
            );
            let mut argv: Vec<String> = match backend {
                "koboldcpp" => vec![
                    backend_path,
                    "--model",
                    model_path,
                    "--contextsize",
                    context.as_str(),
                    "--threads",
                    threads.as_str(),
                    "--stream",
                    "--port",
                    port_arg.as_str(),
                ],
                "llamacpp" => vec![
                    backend_path,
                    "-m",
                    model_path,
                    "-t",
                    threads.as_str(),
                    "-c",
                    context.as_str(),
                    "--port",
                    port_arg.as_str(),
                ],
                _ => {
                    return Err(invalid(format!(
                        "{backend} servers can't be started by the launcher, give a host"
                    )))
                }
            }
            .into_iter()
            .map(str::to_string)
            .collect();
            argv.extend(split_args(backend_args));
            Server::Local { argv, port }
        }
    };

    Ok(ModelParams {
        backend: backend.to_string(),
        format: format.to_string(),
        preset: preset.to_string(),
        server,
    })
}

impl PlanItem {
    pub fn primary(&self) -> Result<ModelParams, LauncherError> {
        model_params(
            &self.model_backend,
            self.model_backend_host.as_deref(),
            self.model_backend_path.as_deref(),
            self.model_path.as_deref(),
            &self.model_format,
            &self.model_preset,
            &self.model_backend_args,
            self.context_size,
            self.thread_number,
            PRIMARY_PORT,
        )
    }

    pub fn secondary(&self) -> Result<Option<ModelParams>, LauncherError> {
        let Some(backend) = self
            .secondary_model_backend
            .as_deref()
            .filter(|backend| !backend.is_empty())
        else {
            return Ok(None);
        };
        let format = self.secondary_model_format.as_deref().ok_or_else(|| {
            LauncherError::InvalidItem("secondary_model_format is required".to_string())
        })?;
        model_params(
            backend,
            self.secondary_model_backend_host.as_deref(),
            self.secondary_model_backend_path.as_deref(),
            self.secondary_model_path.as_deref(),
            format,
            &self.secondary_model_preset,
            &self.secondary_model_backend_args,
            SECONDARY_CONTEXT_SIZE,
            self.thread_number,
            SECONDARY_PORT,
        )
        .map(Some)
    }

    /// Harness command line for this item
    pub fn harness_argv(
        &self,
        harness_bin: &str,
        primary: &ModelParams,
        secondary: Option<&ModelParams>,
        json_output: bool,
    ) -> Vec<String> {
        let mut argv = vec![
            harness_bin.to_string(),
            "--backend".to_string(),
            primary.backend.clone(),
            "--host".to_string(),
            primary.server.host(),
            "--format".to_string(),
            primary.format.clone(),
            "--context-size".to_string(),
            self.context_size.to_string(),
            "--preset".to_string(),
            primary.preset.clone(),
        ];
        if let Some(secondary) = secondary {
            argv.extend([
                "--auxiliary-backend".to_string(),
                secondary.backend.clone(),
                "--auxiliary-host".to_string(),
                secondary.server.host(),
                "--auxiliary-format".to_string(),
                secondary.format.clone(),
                "--auxiliary-preset".to_string(),
                secondary.preset.clone(),
            ]);
        }
        if json_output {
            argv.push("--json-output".to_string());
        }
        argv.extend(split_args(&self.extra_args));
        argv
    }
}
