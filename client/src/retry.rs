use crate::{Backend, ClientError, Extracted, GenerationRequest, Pause};
use std::time::Duration;
use tracing::instrument;

/// Bounded retry around one logical generation call.
///
/// `Err` is only returned for fatal conditions (transport failure, engine
/// failure, unexpected status). Busy servers and malformed or empty answers
/// are retried; running out of attempts yields empty text.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub busy_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            busy_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    #[instrument(skip_all, fields(backend = %backend.endpoint()))]
    pub fn run(
        &self,
        backend: &dyn Backend,
        request: &GenerationRequest,
        pause: &dyn Pause,
    ) -> Result<String, ClientError> {
        let wire = backend.translate(request);

        for attempt in 1..=self.max_attempts {
            let response = backend.call(&wire)?;

            if backend.is_busy(response.status) {
                tracing::debug!(
                    attempt,
                    status = response.status,
                    "{} is busy, trying again in {} seconds...",
                    backend.endpoint(),
                    self.busy_backoff.as_secs()
                );
                pause.pause(self.busy_backoff);
                continue;
            }

            if !response.is_success() {
                return Err(ClientError::Status(
                    backend.endpoint().location(),
                    response.status,
                ));
            }

            match backend.extract(&response) {
                Extracted::Text(text) if !text.is_empty() => return Ok(text),
                Extracted::Text(_) => {
                    tracing::warn!(attempt, "{} returned an empty response", backend.endpoint());
                }
                Extracted::EndOfOutput => return Ok(String::new()),
                Extracted::Malformed(err) => {
                    tracing::warn!(
                        attempt,
                        "{} returned an invalid response. Error while parsing: {err}",
                        backend.endpoint()
                    );
                }
            }
        }

        tracing::debug!(
            attempts = self.max_attempts,
            "{} produced no output",
            backend.endpoint()
        );
        Ok(String::new())
    }
}
