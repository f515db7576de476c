use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use text_generation_harness::runner::{Harness, RunOptions};
use text_generation_harness::{suite, InstructFormat, RoleplayFormat, RoleplayPrompt};
use text_generation_harness_client::backends::{Embedded, Engine, EngineError, WireRequest};
use text_generation_harness_client::{Model, Preset, Role};

fn assets() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets")
}

/// Answers every prompt with the same text
#[derive(Clone)]
struct Parrot {
    reply: &'static str,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl Engine for Parrot {
    fn complete(&self, request: &WireRequest) -> Result<Value, EngineError> {
        let prompt = request.get("prompt").and_then(Value::as_str).unwrap_or_default();
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(json!({"choices": [{"text": self.reply}]}))
    }
}

#[test]
fn test_shipped_suites_load() {
    let suites = suite::load_all(&assets().join("tests"));
    let names: Vec<_> = suites.iter().map(|suite| suite.name.as_str()).collect();
    assert_eq!(names, vec!["Basic Understanding", "Context Coherency"]);

    let coherency = &suites[1];
    assert_eq!(coherency.card.name, "Aiko Mizuno");
    assert_eq!(coherency.card.examples.len(), 2);
    assert_eq!(coherency.log.as_ref().map(|log| log.len()), Some(4));
    assert_eq!(coherency.cases[0].max_iter, 8);
    assert_eq!(coherency.cases[1].max_iter, 1);
    assert!(coherency.cases[2].judge.is_some());
}

#[test]
fn test_shipped_formats_and_presets_load() {
    let formats = assets().join("formats");
    let roleplay = RoleplayFormat::load(formats.join("alpaca.json")).unwrap();
    let instruct = InstructFormat::load(formats.join("alpaca.json")).unwrap();
    assert_eq!(roleplay.stop_sequences, instruct.stop_sequences);

    for preset in ["default", "precise"] {
        let preset = Preset::load(assets().join("presets").join(format!("{preset}.json"))).unwrap();
        assert!(preset.get("temperature").is_some());
    }
}

#[test]
fn test_run_shipped_suite() {
    let parrot = Parrot {
        reply: " eighteen, and my eyes are green. Seiran, obviously.",
        prompts: Arc::default(),
    };
    let model = Model::new(
        Box::new(Embedded::new(parrot.clone(), Role::Primary)),
        2048,
        Some(1),
    );
    let format = RoleplayFormat::load(assets().join("formats/alpaca.json")).unwrap();
    let mut harness = Harness::new(model, RoleplayPrompt::new(format), None);

    let suites = suite::load_all(&assets().join("tests"));
    let options = RunOptions {
        passes: 3,
        suite: Some("basic_understanding".to_string()),
        test: None,
    };
    let summary = harness.run(&suites, &options, &AtomicBool::new(false));

    assert_eq!((summary.passed, summary.failed), (3, 0));
    // The whole coherency suite is filtered out
    assert_eq!(summary.skipped, 3);

    let prompts = parrot.prompts.lock().unwrap();
    // Two passing attempts per test
    assert_eq!(prompts.len(), 6);
    let first = &prompts[0];
    assert!(first.starts_with("Below is an instruction"));
    assert!(first.contains("Write Aiko Mizuno's next reply in a fictional roleplay chat between Ren and Aiko Mizuno."));
    assert!(first.contains("Aiko Mizuno is an 18 year old student"));
    assert!(first.contains("\n<START>\nRen: \"Good morning, Aiko.\""));
    assert!(first.ends_with(
        "\nRen: \"Hey, how old are you again?\"\nAiko Mizuno: \"Huh, what kind of question is this? I'm"
    ));
}
