use super::{RawResponse, WireRequest};
use crate::{Backend, ClientError, Endpoint, Extracted, GenerationRequest, Result};
use serde_json::{json, Value};

pub type EngineError = Box<dyn std::error::Error + Send + Sync>;

/// A completion engine linked into this process
pub trait Engine {
    /// Run one completion.
    /// The returned value follows the completion schema: `choices[0].text`.
    fn complete(&self, request: &WireRequest) -> std::result::Result<Value, EngineError>;
}

/// Canonical fields the engine understands, and their argument names.
/// Anything else is dropped: the engine rejects unknown arguments.
const ARGUMENTS: &[(&str, &str)] = &[
    ("prompt", "prompt"),
    ("max_tokens", "max_tokens"),
    ("max_length", "max_tokens"),
    ("temperature", "temperature"),
    ("top_p", "top_p"),
    ("top_k", "top_k"),
    ("rep_pen", "repeat_penalty"),
    ("tfs", "tfs_z"),
    ("stop_sequence", "stop"),
    ("sampler_seed", "seed"),
];

/// In-process backend: no network, so no probe and no busy state
pub struct Embedded<E> {
    endpoint: Endpoint,
    engine: E,
}

impl<E: Engine> Embedded<E> {
    pub fn new(engine: E, role: crate::Role) -> Self {
        Self {
            endpoint: Endpoint::in_process(role),
            engine,
        }
    }
}

impl<E: Engine> Backend for Embedded<E> {
    fn name(&self) -> &'static str {
        "embedded"
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn probe(&self) -> Result<()> {
        Ok(())
    }

    fn translate(&self, request: &GenerationRequest) -> WireRequest {
        let mut wire = WireRequest::new();
        for (canonical, argument) in ARGUMENTS {
            if let Some(value) = request.get(canonical) {
                wire.insert(argument.to_string(), value.clone());
            }
        }
        wire.insert("echo".to_string(), json!(false));
        wire
    }

    fn call(&self, wire: &WireRequest) -> Result<RawResponse> {
        let completion = self
            .engine
            .complete(wire)
            .map_err(|err| ClientError::Engine(self.endpoint.to_string(), err.to_string()))?;
        Ok(RawResponse {
            status: 200,
            body: completion.to_string(),
        })
    }

    fn extract(&self, response: &RawResponse) -> Extracted {
        let value: Value = match serde_json::from_str(&response.body) {
            Ok(value) => value,
            Err(err) => return Extracted::Malformed(err.to_string()),
        };
        match value
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("text"))
            .and_then(Value::as_str)
        {
            Some(text) => Extracted::Text(text.to_string()),
            None => Extracted::Malformed("missing `choices[0].text`".to_string()),
        }
    }

    fn is_busy(&self, _status: u16) -> bool {
        false
    }
}
