/// Canonical sampling parameters
use crate::ClientError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Opaque sampling preset loaded from a JSON object file
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Preset(Map<String, Value>);

impl Preset {
    pub fn new(values: Map<String, Value>) -> Self {
        Self(values)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let content =
            fs::read_to_string(path).map_err(|err| ClientError::Preset(name.clone(), err.to_string()))?;
        Self::from_json(&content).map_err(|err| match err {
            ClientError::Preset(_, message) => ClientError::Preset(name, message),
            err => err,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, ClientError> {
        match serde_json::from_str::<Value>(content) {
            Ok(Value::Object(values)) => Ok(Self(values)),
            Ok(_) => Err(ClientError::Preset(
                "<inline>".to_string(),
                "preset must be a JSON object".to_string(),
            )),
            Err(err) => Err(ClientError::Preset("<inline>".to_string(), err.to_string())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Backend-agnostic generation request.
///
/// Field names are canonical (`max_length`, `rep_pen`, `stop_sequence`, ...).
/// Dialect adapters translate a copy right before transmission, the canonical
/// record itself is never renamed.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct GenerationRequest {
    fields: Map<String, Value>,
}

impl GenerationRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a preset; later overrides always win
    pub fn from_preset(preset: &Preset) -> Self {
        Self {
            fields: preset.0.clone(),
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn prompt(&self) -> Option<&str> {
        self.fields.get("prompt").and_then(Value::as_str)
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) -> &mut Self {
        self.set("prompt", prompt.into())
    }

    pub fn set_max_length(&mut self, max_length: u32) -> &mut Self {
        self.set("max_length", max_length)
    }

    pub fn set_max_context_length(&mut self, max_context_length: u32) -> &mut Self {
        self.set("max_context_length", max_context_length)
    }

    pub fn set_stop_sequence(&mut self, stop_sequences: &[String]) -> &mut Self {
        self.set("stop_sequence", stop_sequences.to_vec())
    }

    /// An absent seed leaves the field out entirely
    pub fn set_sampler_seed(&mut self, seed: Option<u32>) -> &mut Self {
        match seed {
            Some(seed) => self.set("sampler_seed", seed),
            None => {
                self.fields.remove("sampler_seed");
                self
            }
        }
    }

    /// Copy of the underlying fields, the starting point of every translation
    pub fn to_map(&self) -> Map<String, Value> {
        self.fields.clone()
    }
}
