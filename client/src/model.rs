use crate::stream::{GenerationStream, Generator};
use crate::{
    Backend, ClientError, GenerationRequest, Pause, Preset, ReadinessGate, RetryPolicy, Role,
    ThreadPause,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

/// Stop sequences used for prompts that don't bring their own
pub const DEFAULT_STOP_SEQUENCES: &[&str] = &["\n##"];
pub const DEFAULT_TOKENS_PER_ITER: u32 = 8;
pub const MAX_ITER: u32 = u32::MAX;

/// A rendered prompt and the stop sequences that go with it
pub trait PromptSource {
    fn text(&self) -> String;
    fn stop_sequences(&self) -> Vec<String>;
}

impl PromptSource for str {
    fn text(&self) -> String {
        self.to_string()
    }

    fn stop_sequences(&self) -> Vec<String> {
        DEFAULT_STOP_SEQUENCES.iter().map(|s| s.to_string()).collect()
    }
}

/// Called on unrecoverable backend failures; never returns
pub type FatalHandler = fn(ClientError) -> !;

/// Log the failure and terminate the process with a non-zero status
pub fn exit_on_fatal(err: ClientError) -> ! {
    tracing::error!("{err}");
    std::process::exit(1)
}

/// A language model behind one backend
pub struct Model {
    backend: Box<dyn Backend>,
    max_context: u32,
    preset: Preset,
    base_seed: Option<u32>,
    seed: Option<u32>,
    rng: StdRng,
    gate: ReadinessGate,
    policy: RetryPolicy,
    pause: Box<dyn Pause>,
    on_fatal: FatalHandler,
}

impl Model {
    /// A base seed of 0 still seeds the RNG but is never sent to the backend
    pub fn new(backend: Box<dyn Backend>, max_context: u32, base_seed: Option<u32>) -> Self {
        let rng = match base_seed {
            Some(seed) => StdRng::seed_from_u64(seed as u64),
            None => StdRng::from_entropy(),
        };
        let base_seed = base_seed.filter(|seed| *seed != 0);
        Self {
            backend,
            max_context,
            preset: Preset::default(),
            base_seed,
            seed: base_seed,
            rng,
            gate: ReadinessGate::default(),
            policy: RetryPolicy::default(),
            pause: Box::new(ThreadPause),
            on_fatal: exit_on_fatal,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_readiness_gate(mut self, gate: ReadinessGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_pause(mut self, pause: impl Pause + 'static) -> Self {
        self.pause = Box::new(pause);
        self
    }

    pub fn with_fatal_handler(mut self, on_fatal: FatalHandler) -> Self {
        self.on_fatal = on_fatal;
        self
    }

    pub fn identifier(&self) -> String {
        self.backend.endpoint().to_string()
    }

    pub fn role(&self) -> Role {
        self.backend.endpoint().role()
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Block until the backend is online
    pub fn wait(&mut self) {
        self.gate.wait(self.backend.as_ref(), self.pause.as_ref());
    }

    pub fn load_preset(&mut self, path: impl AsRef<Path>) -> crate::Result<()> {
        self.preset = Preset::load(path)?;
        Ok(())
    }

    pub fn set_preset(&mut self, preset: Preset) {
        self.preset = preset;
    }

    pub fn seed(&self) -> Option<u32> {
        self.seed
    }

    pub fn new_seed(&mut self) -> u32 {
        let seed = self.rng.gen_range(1..=u32::MAX);
        self.seed = Some(seed);
        tracing::debug!("New {} seed: {seed}", self.identifier().to_lowercase());
        seed
    }

    pub fn clear_seed(&mut self) {
        self.seed = self.base_seed;
    }

    /// Stream a reply to `prompt`, `max_tokens_per_iter` tokens at a time
    pub fn generate_iter<P: PromptSource + ?Sized>(
        &self,
        prompt: &P,
        max_tokens_per_iter: u32,
        max_iter: u32,
    ) -> GenerationStream<Session<'_>> {
        let mut request = GenerationRequest::from_preset(&self.preset);
        request
            .set_max_context_length(self.max_context)
            .set_sampler_seed(self.seed);

        GenerationStream::new(
            Session {
                backend: self.backend.as_ref(),
                policy: &self.policy,
                pause: self.pause.as_ref(),
                on_fatal: self.on_fatal,
            },
            request,
            prompt.text(),
            prompt.stop_sequences(),
            max_tokens_per_iter,
            max_iter,
        )
    }

    /// Final text of [`Model::generate_iter`]
    pub fn generate<P: PromptSource + ?Sized>(
        &self,
        prompt: &P,
        max_tokens_per_iter: u32,
        max_iter: u32,
    ) -> String {
        self.generate_iter(prompt, max_tokens_per_iter, max_iter)
            .resolve()
    }
}

/// Borrowed view of a model used while one stream is alive
pub struct Session<'a> {
    backend: &'a dyn Backend,
    policy: &'a RetryPolicy,
    pause: &'a dyn Pause,
    on_fatal: FatalHandler,
}

impl Generator for Session<'_> {
    fn generate_once(&mut self, request: &GenerationRequest) -> String {
        match self.policy.run(self.backend, request, self.pause) {
            Ok(text) => text,
            Err(err) => (self.on_fatal)(err),
        }
    }
}
