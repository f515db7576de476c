//! Test execution and pass/fail aggregation
use crate::suite::{Case, Judge, Sender, Suite};
use crate::{InstructPrompt, Result, RoleplayPrompt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use text_generation_harness_client::{Model, DEFAULT_TOKENS_PER_ITER};

/// Successes needed to pass a test run `passes` times
pub fn required_successes(passes: u32) -> u32 {
    passes / 2 + 1
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub passed: bool,
    pub successes: u32,
    pub attempts: u32,
}

impl Verdict {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        self.successes as f64 / self.attempts as f64 * 100.0
    }
}

/// Run `trial` up to `passes` times, stopping as soon as a majority passed
pub fn majority(passes: u32, mut trial: impl FnMut() -> bool) -> Verdict {
    let required = required_successes(passes);
    let mut successes = 0;
    for attempt in 1..=passes {
        if trial() {
            successes += 1;
            if successes >= required {
                return Verdict {
                    passed: true,
                    successes,
                    attempts: attempt,
                };
            }
        }
    }
    Verdict {
        passed: false,
        successes,
        attempts: passes,
    }
}

#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    pub passes: u32,
    /// Only run the suite with this display or canonical name
    pub suite: Option<String>,
    /// Only run tests with this description
    pub test: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub failed: usize,
    pub passed: usize,
    pub skipped: usize,
    pub elapsed: Duration,
    pub interrupted: bool,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.failed + self.passed + self.skipped
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }

    pub fn log(&self) {
        tracing::info!(
            "Completed {} tests in {} seconds.",
            self.total(),
            self.elapsed.as_secs()
        );
        tracing::info!(
            "{} failed / {} passed / {} skipped",
            self.failed,
            self.passed,
            self.skipped
        );
    }
}

/// Secondary model asked to judge outputs the textual checks can't decide
pub struct Auxiliary {
    pub model: Model,
    pub prompt: InstructPrompt,
}

impl Auxiliary {
    pub fn new(model: Model, prompt: InstructPrompt) -> Self {
        Self { model, prompt }
    }

    /// Majority vote of fresh-seeded answers, stopping once the outcome is settled
    fn ask(&mut self, judge: &Judge, output: &str) -> Result<bool> {
        tracing::debug!("Questioning auxiliary model about correctness of output: {output:?}");

        let mut yes = 0;
        for vote in 1..=judge.votes {
            self.model.new_seed();
            self.prompt.init();
            self.prompt.add_question(output, &judge.question);

            let answer = self
                .model
                .generate(&self.prompt.render()?, DEFAULT_TOKENS_PER_ITER, 1);
            tracing::debug!("Auxiliary model response {vote}: {}", answer.trim());

            if answer.to_lowercase().contains("yes") {
                yes += 1;
                if yes >= judge.threshold {
                    tracing::debug!("\"Yes\" threshold met.");
                    return Ok(true);
                }
            } else if yes + judge.votes - vote < judge.threshold {
                tracing::debug!("\"Yes\" threshold wasn't met.");
                return Ok(false);
            }
        }
        Ok(false)
    }
}

pub struct Harness {
    pub model: Model,
    pub prompt: RoleplayPrompt,
    pub auxiliary: Option<Auxiliary>,
}

impl Harness {
    pub fn new(model: Model, prompt: RoleplayPrompt, auxiliary: Option<Auxiliary>) -> Self {
        Self {
            model,
            prompt,
            auxiliary,
        }
    }

    /// One attempt at `case`, with a fresh seed
    pub fn run_case(&mut self, suite: &Suite, case: &Case) -> Result<bool> {
        let settings = &suite.settings;
        self.model.new_seed();
        self.prompt.init(&settings.user, &suite.card, settings.greeting);
        if let Some(log) = &suite.log {
            self.prompt.add_messages(log);
        }
        for message in &case.messages {
            match &message.sender {
                Sender::User => self.prompt.add_message(&settings.user, &message.text, Some(true)),
                Sender::Char => self.prompt.add_message(&suite.card.name, &message.text, Some(false)),
                Sender::Named(name) => self.prompt.add_message(name, &message.text, None),
            }
        }
        let rendered = self.prompt.render()?;

        let expectation = &case.expectation;
        let early = !expectation.is_empty() && expectation.decidable_early();
        let mut output = String::new();
        for (increment, accumulated) in
            self.model
                .generate_iter(&rendered, DEFAULT_TOKENS_PER_ITER, case.max_iter)
        {
            if early && expectation.is_met(&accumulated) {
                tracing::debug!("Success: {accumulated:?}");
                return Ok(true);
            }
            tracing::trace!("Increment: {increment:?}");
            output = accumulated;
        }
        if !early && !expectation.is_empty() && expectation.is_met(&output) {
            tracing::debug!("Success: {output:?}");
            return Ok(true);
        }
        tracing::debug!("Failure: {output:?}");

        match (&case.judge, self.auxiliary.as_mut()) {
            (Some(judge), Some(auxiliary)) => auxiliary.ask(judge, &output),
            _ => Ok(false),
        }
    }

    /// Run every selected test; `interrupted` is polled between tests
    pub fn run(&mut self, suites: &[Suite], options: &RunOptions, interrupted: &AtomicBool) -> Summary {
        let start = Instant::now();
        let mut summary = Summary::default();
        tracing::info!("Found {} test suites.", suites.len());

        'suites: for suite in suites {
            let filtered_out = options
                .suite
                .as_deref()
                .map_or(false, |filter| !suite.matches(filter));
            if suite.cases.is_empty() || filtered_out {
                tracing::info!("Skipped test suite \"{}\".", suite.name);
                summary.skipped += suite.cases.len();
                continue;
            }

            tracing::info!("Running test suite \"{}\":", suite.name);
            for case in &suite.cases {
                if interrupted.load(Ordering::SeqCst) {
                    summary.interrupted = true;
                    break 'suites;
                }

                let selected = options
                    .test
                    .as_deref()
                    .map_or(true, |filter| case.description.eq_ignore_ascii_case(filter));
                if !selected {
                    tracing::info!("\t[SKIP] {}", case.description);
                    summary.skipped += 1;
                    continue;
                }
                if case.needs_auxiliary() && self.auxiliary.is_none() {
                    tracing::info!("\t[SKIP] {} (no auxiliary model)", case.description);
                    summary.skipped += 1;
                    continue;
                }

                tracing::debug!("Running test \"{}\":", case.description);
                let verdict = majority(options.passes, || match self.run_case(suite, case) {
                    Ok(passed) => passed,
                    Err(err) => {
                        tracing::error!("Test \"{}\" errored: {err}", case.description);
                        false
                    }
                });

                if verdict.passed {
                    tracing::info!(
                        "\t[PASS] {} (success rate: {:.0}%)",
                        case.description,
                        verdict.success_rate()
                    );
                    summary.passed += 1;
                } else {
                    tracing::info!(
                        "\t[FAIL] {} (success rate: {:.0}%)",
                        case.description,
                        verdict.success_rate()
                    );
                    summary.failed += 1;
                }
            }
        }

        summary.elapsed = start.elapsed();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::{Expectation, Message, Settings};
    use crate::{CharacterCard, InstructFormat, RoleplayFormat};
    use serde_json::{json, Value};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::rc::Rc;
    use text_generation_harness_client::backends::{Embedded, Engine, EngineError, WireRequest};
    use text_generation_harness_client::{ClientError, Role};

    /// Replies in order, then nothing
    #[derive(Clone, Default)]
    struct Script {
        replies: Rc<RefCell<VecDeque<String>>>,
        prompts: Rc<RefCell<Vec<String>>>,
    }

    impl Script {
        fn new(replies: &[&str]) -> Self {
            let script = Self::default();
            script
                .replies
                .borrow_mut()
                .extend(replies.iter().map(|reply| reply.to_string()));
            script
        }

        fn calls(&self) -> usize {
            self.prompts.borrow().len()
        }
    }

    impl Engine for Script {
        fn complete(&self, request: &WireRequest) -> std::result::Result<Value, EngineError> {
            let prompt = request.get("prompt").and_then(Value::as_str).unwrap_or_default();
            self.prompts.borrow_mut().push(prompt.to_string());
            let text = self.replies.borrow_mut().pop_front().unwrap_or_default();
            Ok(json!({"choices": [{"text": text}]}))
        }
    }

    fn panic_on_fatal(err: ClientError) -> ! {
        panic!("fatal: {err}")
    }

    fn model(script: &Script, role: Role) -> Model {
        Model::new(Box::new(Embedded::new(script.clone(), role)), 2048, Some(7))
            .with_fatal_handler(panic_on_fatal)
    }

    fn roleplay_format() -> RoleplayFormat {
        RoleplayFormat {
            system: String::new(),
            card: "{{ desc }}\n".to_string(),
            example_chats: String::new(),
            new_example_chat: String::new(),
            new_chat: String::new(),
            user_msg: "{{ name }}:{{ maybe_space }}{{ msg }}\n".to_string(),
            char_msg: "{{ name }}:{{ maybe_space }}{{ msg }}".to_string(),
            stop_sequences: vec!["\n{{user}}:".to_string()],
        }
    }

    fn instruct_format() -> InstructFormat {
        InstructFormat {
            system: String::new(),
            instruction: "Q: {{ text }}\n".to_string(),
            response: "A:{{ maybe_space }}{{ text }}".to_string(),
            stop_sequences: vec!["\n".to_string()],
        }
    }

    fn case(description: &str, expectation: Expectation, judge: Option<Judge>) -> Case {
        Case {
            description: description.to_string(),
            messages: vec![
                Message {
                    sender: Sender::User,
                    text: "What's our school?".to_string(),
                },
                Message {
                    sender: Sender::Char,
                    text: "It's".to_string(),
                },
            ],
            expectation,
            max_iter: 2,
            judge,
        }
    }

    fn contains(word: &str) -> Expectation {
        Expectation {
            contains: Some(word.to_string()),
            ..Default::default()
        }
    }

    fn suite(name: &str, cases: Vec<Case>) -> Suite {
        Suite {
            name: name.to_string(),
            canonical_name: name.to_lowercase(),
            settings: Settings {
                card: PathBuf::from("characters/Rin.json"),
                user: "Jin".to_string(),
                greeting: false,
                log: None,
                max_iter: 1,
            },
            card: CharacterCard::from_json(r#"{"name": "Rin", "description": "A mage."}"#).unwrap(),
            log: None,
            cases,
        }
    }

    fn harness(primary: &Script, auxiliary: Option<&Script>) -> Harness {
        Harness::new(
            model(primary, Role::Primary),
            RoleplayPrompt::new(roleplay_format()),
            auxiliary.map(|script| {
                Auxiliary::new(
                    model(script, Role::Auxiliary),
                    InstructPrompt::new(instruct_format()),
                )
            }),
        )
    }

    fn options(passes: u32) -> RunOptions {
        RunOptions {
            passes,
            ..Default::default()
        }
    }

    #[test]
    fn test_majority() {
        assert_eq!(required_successes(5), 3);
        assert_eq!(required_successes(4), 3);
        assert_eq!(required_successes(1), 1);

        let mut results = vec![true, false, true, true, true].into_iter();
        let verdict = majority(5, || results.next().unwrap());
        assert_eq!(
            verdict,
            Verdict {
                passed: true,
                successes: 3,
                attempts: 4
            }
        );
        assert_eq!(verdict.success_rate(), 75.0);

        let mut calls = 0;
        let verdict = majority(5, || {
            calls += 1;
            calls == 1
        });
        assert!(!verdict.passed);
        assert_eq!((verdict.successes, verdict.attempts), (1, 5));
        assert_eq!(verdict.success_rate(), 20.0);
    }

    #[test]
    fn test_run_case_streams_until_expected() {
        let primary = Script::new(&[" called", " Homurahara", " Academy"]);
        let mut harness = harness(&primary, None);
        let suite = suite("School", vec![case("School name", contains("Homura"), None)]);

        assert!(harness.run_case(&suite, &suite.cases[0]).unwrap());
        assert_eq!(
            *primary.prompts.borrow(),
            vec![
                "A mage.\nJin: What's our school?\nRin: It's",
                "A mage.\nJin: What's our school?\nRin: It's called",
            ]
        );
    }

    #[test]
    fn test_run_case_respects_max_iter() {
        let primary = Script::new(&[" called", " the", " Homurahara"]);
        let mut harness = harness(&primary, None);
        let suite = suite("School", vec![case("School name", contains("Homura"), None)]);

        assert!(!harness.run_case(&suite, &suite.cases[0]).unwrap());
        assert_eq!(primary.calls(), 2);
    }

    #[test]
    fn test_forbidden_words_checked_on_final_output() {
        let primary = Script::new(&[" at my", " house, not your house"]);
        let mut harness = harness(&primary, None);
        let expectation = Expectation {
            any_of: vec!["my".to_string()],
            none_of: vec!["your".to_string()],
            ..Default::default()
        };
        let suite = suite("Location", vec![case("Location", expectation, None)]);

        assert!(!harness.run_case(&suite, &suite.cases[0]).unwrap());
        assert_eq!(primary.calls(), 2);
    }

    #[test]
    fn test_judge_votes() {
        let primary = Script::new(&[" a smirk"]);
        let auxiliary = Script::new(&["No", " Yes.", "yes", "YES", "never asked"]);
        let mut harness = harness(&primary, Some(&auxiliary));
        let judge = Judge {
            question: "Is Rin smiling? Answer with Yes or No.".to_string(),
            votes: 5,
            threshold: 3,
        };
        let suite = suite("Options", vec![case("Options", Expectation::default(), Some(judge))]);

        assert!(harness.run_case(&suite, &suite.cases[0]).unwrap());
        assert_eq!(auxiliary.calls(), 4);
        assert_eq!(
            auxiliary.prompts.borrow()[0],
            "Q: Read the following message:\na smirk\n\nQuestion: Is Rin smiling? Answer with Yes or No.\nA:"
        );
    }

    #[test]
    fn test_judge_stops_when_threshold_unreachable() {
        let primary = Script::new(&[" nothing"]);
        let auxiliary = Script::new(&["No", "No", "No", "Yes", "Yes"]);
        let mut harness = harness(&primary, Some(&auxiliary));
        let judge = Judge {
            question: "Yes or No?".to_string(),
            votes: 5,
            threshold: 3,
        };
        let suite = suite("Options", vec![case("Options", contains("smile"), Some(judge))]);

        assert!(!harness.run_case(&suite, &suite.cases[0]).unwrap());
        assert_eq!(auxiliary.calls(), 3);
    }

    #[test]
    fn test_run_filters_and_skips() {
        let primary = Script::new(&[" Homurahara"; 6]);
        let mut harness = harness(&primary, None);
        let judge = Judge {
            question: "?".to_string(),
            votes: 5,
            threshold: 3,
        };
        let suites = vec![
            suite(
                "School",
                vec![
                    case("School name", contains("Homura"), None),
                    case("Other", contains("Homura"), None),
                    case("Judged", Expectation::default(), Some(judge)),
                ],
            ),
            suite("Ignored", vec![case("School name", contains("x"), None)]),
        ];
        let options = RunOptions {
            passes: 5,
            suite: Some("school".to_string()),
            test: None,
        };

        let summary = harness.run(&suites, &options, &AtomicBool::new(false));
        assert_eq!((summary.passed, summary.failed, summary.skipped), (2, 0, 2));
        assert_eq!(summary.total(), 4);
        assert!(summary.success());
        // Three passing attempts per test, each decided by its first increment
        assert_eq!(primary.calls(), 6);
    }

    #[test]
    fn test_run_counts_failures() {
        let primary = Script::new(&[]);
        let mut harness = harness(&primary, None);
        let suites = vec![suite("School", vec![case("School name", contains("Homura"), None)])];
        let options = RunOptions {
            test: Some("SCHOOL NAME".to_string()),
            ..options(3)
        };

        let summary = harness.run(&suites, &options, &AtomicBool::new(false));
        assert_eq!((summary.passed, summary.failed, summary.skipped), (0, 1, 0));
        assert!(!summary.success());
    }

    #[test]
    fn test_run_interrupted() {
        let primary = Script::new(&[" Homurahara"]);
        let mut harness = harness(&primary, None);
        let suites = vec![suite("School", vec![case("School name", contains("Homura"), None)])];

        let summary = harness.run(&suites, &options(5), &AtomicBool::new(true));
        assert!(summary.interrupted);
        assert_eq!(summary.total(), 0);
        assert_eq!(primary.calls(), 0);
    }
}
