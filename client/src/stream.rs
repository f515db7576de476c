/// Incremental generation with stop sequence detection
use crate::GenerationRequest;
use std::iter::FusedIterator;

/// One stateless generation call: the full prompt is resent every time
pub trait Generator {
    /// Empty text means the backend produced nothing
    fn generate_once(&mut self, request: &GenerationRequest) -> String;
}

/// Byte offset of the earliest stop sequence in `text`.
///
/// Ties on position go to the sequence listed first. Empty sequences never match.
pub fn truncate_at_stop(text: &str, stop_sequences: &[String]) -> Option<usize> {
    stop_sequences
        .iter()
        .enumerate()
        .filter(|(_, stop)| !stop.is_empty())
        .filter_map(|(index, stop)| text.find(stop.as_str()).map(|position| (position, index)))
        .min()
        .map(|(position, _)| position)
}

/// Lazy sequence of `(increment, accumulated)` pairs.
///
/// Each step asks the generator for at most `increment_size` more tokens of
/// `prompt + accumulated`. The sequence ends on empty output, after the first
/// stop sequence match (yielded truncated) or after `max_increments` steps.
/// It cannot be restarted.
pub struct GenerationStream<G> {
    generator: G,
    request: GenerationRequest,
    prompt: String,
    output: String,
    stop_sequences: Vec<String>,
    remaining: u32,
    finished: bool,
}

impl<G: Generator> GenerationStream<G> {
    pub fn new(
        generator: G,
        mut request: GenerationRequest,
        prompt: String,
        stop_sequences: Vec<String>,
        increment_size: u32,
        max_increments: u32,
    ) -> Self {
        request
            .set_max_length(increment_size)
            .set_stop_sequence(&stop_sequences);
        Self {
            generator,
            request,
            prompt,
            output: String::new(),
            stop_sequences,
            remaining: max_increments,
            finished: false,
        }
    }

    /// Drain the stream and keep only the final accumulated text
    pub fn resolve(self) -> String {
        self.last().map(|(_, output)| output).unwrap_or_default()
    }

    pub fn output(&self) -> &str {
        &self.output
    }
}

impl<G: Generator> Iterator for GenerationStream<G> {
    type Item = (String, String);

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.remaining == 0 {
            self.finished = true;
            return None;
        }
        self.remaining -= 1;

        self.request
            .set_prompt(format!("{}{}", self.prompt, self.output));
        let increment = self.generator.generate_once(&self.request);

        // Couldn't generate anything
        if increment.is_empty() {
            self.finished = true;
            return None;
        }

        let previous = self.output.len();
        self.output.push_str(&increment);

        if let Some(cut) = truncate_at_stop(&self.output, &self.stop_sequences) {
            self.output.truncate(cut);
            self.finished = true;
            let increment = self.output[previous.min(cut)..].to_string();
            return Some((increment, self.output.clone()));
        }

        Some((increment, self.output.clone()))
    }
}

impl<G: Generator> FusedIterator for GenerationStream<G> {}
