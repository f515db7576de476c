//! Text Generation Harness backend client library

pub mod backends;
mod endpoint;
mod model;
mod readiness;
mod request;
mod retry;
mod stream;

pub use backends::{connect, Backend, Extracted, RawResponse, WireRequest, DIALECTS};
pub use endpoint::{Endpoint, Role};
pub use model::{
    exit_on_fatal, FatalHandler, Model, PromptSource, Session, DEFAULT_STOP_SEQUENCES,
    DEFAULT_TOKENS_PER_ITER, MAX_ITER,
};
pub use readiness::{Pause, ReadinessGate, ReadinessState, ThreadPause};
pub use request::{GenerationRequest, Preset};
pub use retry::RetryPolicy;
pub use stream::{truncate_at_stop, GenerationStream, Generator};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{0} is offline: {1}")]
    Transport(String, String),
    #[error("{0} returned an error. HTTP status code: {1}")]
    Status(String, u16),
    #[error("{0} engine failure: {1}")]
    Engine(String, String),
    #[error("Could not load preset {0}: {1}")]
    Preset(String, String),
    #[error("Unknown model backend `{0}`")]
    UnknownBackend(String),
    #[error("Invalid host `{0}`")]
    InvalidHost(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
