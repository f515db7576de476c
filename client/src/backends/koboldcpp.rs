use super::{extract_results_text, rename_fields, HttpTransport, RawResponse, WireRequest};
use crate::{Backend, Endpoint, Extracted, GenerationRequest, Result};
use tracing::instrument;

/// Canonical names are KoboldAI's own; only the `max_tokens` alias is folded
const RENAMES: &[(&str, &str)] = &[("max_tokens", "max_length")];

/// KoboldCpp `/api/v1/generate`
#[derive(Clone, Debug)]
pub struct KoboldCpp {
    endpoint: Endpoint,
    transport: HttpTransport,
}

impl KoboldCpp {
    pub fn new(endpoint: Endpoint) -> Result<Self> {
        let transport = HttpTransport::new(&endpoint)?;
        Ok(Self {
            endpoint,
            transport,
        })
    }
}

impl Backend for KoboldCpp {
    fn name(&self) -> &'static str {
        "koboldcpp"
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn probe(&self) -> Result<()> {
        self.transport.probe(&self.endpoint)
    }

    fn translate(&self, request: &GenerationRequest) -> WireRequest {
        let mut wire = request.to_map();
        // `max_length` is native and takes precedence over its alias
        if wire.contains_key("max_length") {
            wire.remove("max_tokens");
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;
    use serde_json::json;

    #[test]
    fn test_translate_passes_native_fields() {
        let backend = KoboldCpp::new(Endpoint::new("localhost:5001", Role::Primary)).unwrap();
        let mut request = GenerationRequest::new();
        request
            .set("max_tokens", 40)
            .set("rep_pen", 1.1)
            .set("max_context_length", 2048)
            .set_stop_sequence(&["\n".to_string()]);

        let wire = backend.translate(&request);
        assert_eq!(wire.get("max_length"), Some(&json!(40)));
        assert_eq!(wire.get("rep_pen"), Some(&json!(1.1)));
        assert_eq!(wire.get("max_context_length"), Some(&json!(2048)));
        assert_eq!(wire.get("stop_sequence"), Some(&json!(["\n"])));
        assert!(!wire.contains_key("max_tokens"));
        // The canonical request is left alone
        assert!(request.contains("max_tokens"));
    }

    #[test]
    fn test_max_length_beats_alias() {
        let backend = KoboldCpp::new(Endpoint::new("localhost:5001", Role::Primary)).unwrap();
        let mut request = GenerationRequest::new();
        request.set("max_tokens", 40).set_max_length(8);

        let wire = backend.translate(&request);
        assert_eq!(wire.get("max_length"), Some(&json!(8)));
        assert!(!wire.contains_key("max_tokens"));
    }
}
