//! Inference server dialects
//!
//! Every dialect implements [`Backend`]: a liveness probe, a translation of the
//! canonical request into the server's field names, one blocking call and the
//! extraction of the produced text from the server's response schema.
mod embedded;
mod koboldcpp;
mod llamacpp;
mod ooba;

pub use embedded::{Embedded, Engine, EngineError};
pub use koboldcpp::KoboldCpp;
pub use llamacpp::LlamaCpp;
pub use ooba::Ooba;

use crate::{ClientError, Endpoint, GenerationRequest, Result, Role};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Map, Value};

/// Request body in the target server's own field names
pub type WireRequest = Map<String, Value>;

/// Status and raw body of one generation call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Result of pulling the generated text out of a response
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Extracted {
    /// Produced text; empty text means "nothing yet" and is retried
    Text(String),
    /// The server deliberately stopped without producing anything
    EndOfOutput,
    /// Missing or malformed field
    Malformed(String),
}

pub trait Backend {
    /// Registry identifier of the dialect
    fn name(&self) -> &'static str;

    fn endpoint(&self) -> &Endpoint;

    /// Cheap liveness request; any response at all counts as alive
    fn probe(&self) -> Result<()>;

    /// Rename canonical fields into the server's names, without touching `request`
    fn translate(&self, request: &GenerationRequest) -> WireRequest;

    /// Single blocking call; `Err` only on transport or engine failure
    fn call(&self, wire: &WireRequest) -> Result<RawResponse>;

    fn extract(&self, response: &RawResponse) -> Extracted;

    /// Status codes meaning "server busy, try again later"
    fn is_busy(&self, status: u16) -> bool {
        status == 503
    }
}

type Constructor = fn(Endpoint) -> Result<Box<dyn Backend>>;

/// Dialects reachable over HTTP, keyed by backend identifier
pub const DIALECTS: &[(&str, Constructor)] = &[
    ("koboldcpp", koboldcpp_backend),
    ("llamacpp", llamacpp_backend),
    ("ooba", ooba_backend),
];

fn koboldcpp_backend(endpoint: Endpoint) -> Result<Box<dyn Backend>> {
    Ok(Box::new(KoboldCpp::new(endpoint)?))
}

fn llamacpp_backend(endpoint: Endpoint) -> Result<Box<dyn Backend>> {
    Ok(Box::new(LlamaCpp::new(endpoint)?))
}

fn ooba_backend(endpoint: Endpoint) -> Result<Box<dyn Backend>> {
    Ok(Box::new(Ooba::new(endpoint)?))
}

/// Build the adapter registered under `name` for `host`
pub fn connect(name: &str, host: &str, role: Role) -> Result<Box<dyn Backend>> {
    if host.trim().trim_matches('/').is_empty() {
        return Err(ClientError::InvalidHost(host.to_string()));
    }
    let (_, constructor) = DIALECTS
        .iter()
        .find(|(dialect, _)| dialect.eq_ignore_ascii_case(name))
        .ok_or_else(|| ClientError::UnknownBackend(name.to_string()))?;
    constructor(Endpoint::new(host, role))
}

/// Blocking HTTP plumbing shared by the HTTP dialects
#[derive(Clone, Debug)]
pub(crate) struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub(crate) fn new(endpoint: &Endpoint) -> Result<Self> {
        // No client-side timeout: the server is trusted to answer or fail
        let client = Client::builder()
            .timeout(None::<std::time::Duration>)
            .build()
            .map_err(|err| ClientError::Transport(endpoint.location(), err.to_string()))?;
        Ok(Self { client })
    }

    pub(crate) fn probe(&self, endpoint: &Endpoint) -> Result<()> {
        self.client
            .get(endpoint.url("/"))
            .send()
            .map(|_| ())
            .map_err(|err| ClientError::Transport(endpoint.location(), err.to_string()))
    }

    pub(crate) fn post(
        &self,
        endpoint: &Endpoint,
        path: &str,
        wire: &WireRequest,
    ) -> Result<RawResponse> {
        let transport_error = |err: reqwest::Error| ClientError::Transport(endpoint.location(), err.to_string());
        let body = serde_json::to_vec(wire)
            .map_err(|err| ClientError::Transport(endpoint.location(), err.to_string()))?;

        let response = self
            .client
            .post(endpoint.url(path))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let body = response.text().map_err(transport_error)?;
        Ok(RawResponse { status, body })
    }
}

/// Move values from canonical names to server names, in table order
pub(crate) fn rename_fields(wire: &mut WireRequest, table: &[(&str, &str)]) {
    for (canonical, server) in table {
        if let Some(value) = wire.remove(*canonical) {
            wire.insert(server.to_string(), value);
        }
    }
}

/// `results[0].text`, shared by the KoboldAI-style APIs
pub(crate) fn extract_results_text(response: &RawResponse) -> Extracted {
    let value: Value = match serde_json::from_str(&response.body) {
        Ok(value) => value,
        Err(err) => return Extracted::Malformed(err.to_string()),
    };
    match value
        .get("results")
        .and_then(|results| results.get(0))
        .and_then(|result| result.get("text"))
        .and_then(Value::as_str)
    {
        Some(text) => Extracted::Text(text.to_string()),
        None => Extracted::Malformed("missing `results[0].text`".to_string()),
    }
}
