use super::{rename_fields, HttpTransport, RawResponse, WireRequest};
use crate::{Backend, Endpoint, Extracted, GenerationRequest, Result};
use serde_json::{json, Value};
use tracing::instrument;

const RENAMES: &[(&str, &str)] = &[
    ("max_context_length", "n_ctx"),
    ("max_tokens", "n_predict"),
    ("max_length", "n_predict"),
    ("rep_pen", "repeat_penalty"),
    ("rep_pen_range", "repeat_last_n"),
    ("tfs", "tfs_z"),
    ("typical", "typical_p"),
    ("sampler_seed", "seed"),
    ("stop_sequence", "stop"),
];

/// llama.cpp server `/completion`
#[derive(Clone, Debug)]
pub struct LlamaCpp {
    endpoint: Endpoint,
    transport: HttpTransport,
}

impl LlamaCpp {
    pub fn new(endpoint: Endpoint) -> Result<Self> {
        let transport = HttpTransport::new(&endpoint)?;
        Ok(Self {
            endpoint,
            transport,
        })
    }
}

impl Backend for LlamaCpp {
    fn name(&self) -> &'static str {
        "llamacpp"
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn probe(&self) -> Result<()> {
        self.transport.probe(&self.endpoint)
    }

    fn translate(&self, request: &GenerationRequest) -> WireRequest {
        let mut wire = request.to_map();
        rename_fields(&mut wire, RENAMES);
        wire.entry("stop").or_insert_with(|| json!([]));
        // Never let the server drop the start of the prompt on context overflow
        wire.insert("n_keep".to_string(), json!(-1));
        wire
    }

    #[instrument(skip_all, fields(backend = %self.endpoint))]
    fn call(&self, wire: &WireRequest) -> Result<RawResponse> {
        self.transport.post(&self.endpoint, "/completion", wire)
    }

    fn extract(&self, response: &RawResponse) -> Extracted {
        let value: Value = match serde_json::from_str(&response.body) {
            Ok(value) => value,
            Err(err) => return Extracted::Malformed(err.to_string()),
        };
        let content = match value.get("content").and_then(Value::as_str) {
            Some(content) => content,
            None => return Extracted::Malformed("missing `content`".to_string()),
        };
        if !content.is_empty() {
            return Extracted::Text(content.to_string());
        }
        match value.get("stopped_eos").and_then(Value::as_bool) {
            Some(true) => Extracted::EndOfOutput,
            Some(false) => Extracted::Text(String::new()),
            None => Extracted::Malformed("missing `stopped_eos`".to_string()),
        }
    }

    /// llama.cpp answers 400 while its slots are all taken.
    /// This may also hide genuine bad requests.
    fn is_busy(&self, status: u16) -> bool {
        status == 503 || status == 400
    }
}
