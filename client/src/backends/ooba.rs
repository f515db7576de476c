use super::{extract_results_text, rename_fields, HttpTransport, RawResponse, WireRequest};
use crate::{Backend, Endpoint, Extracted, GenerationRequest, Result};
use tracing::instrument;

const RENAMES: &[(&str, &str)] = &[
    ("max_context_length", "truncation_length"),
    ("max_tokens", "max_new_tokens"),
    ("max_length", "max_new_tokens"),
    ("rep_pen", "repetition_penalty"),
    ("rep_pen_range", "repetition_penalty_range"),
    ("typical", "typical_p"),
    ("sampler_seed", "seed"),
    ("stop_sequence", "stopping_strings"),
];

/// text-generation-webui blocking API `/api/v1/generate`
#[derive(Clone, Debug)]
pub struct Ooba {
    endpoint: Endpoint,
    transport: HttpTransport,
}

impl Ooba {
    pub fn new(endpoint: Endpoint) -> Result<Self> {
        let transport = HttpTransport::new(&endpoint)?;
        Ok(Self {
            endpoint,
            transport,
        })
    }
}

impl Backend for Ooba {
    fn name(&self) -> &'static str {
        "ooba"
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
        wire
    }

    #[instrument(skip_all, fields(backend = %self.endpoint))]
    fn call(&self, wire: &WireRequest) -> Result<RawResponse> {
        self.transport.post(&self.endpoint, "/api/v1/generate", wire)
    }

    fn extract(&self, response: &RawResponse) -> Extracted {
        extract_results_text(response)
    }
}
