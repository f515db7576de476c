//! Declarative test suites
//!
//! Suites are JSON files found under `<tests dir>/*.json` and
//! `<tests dir>/*/*.json`. Card and chat log paths inside a suite are relative
//! to the tests directory.
use crate::{read_file, CharacterCard, ChatLog, HarnessError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_VOTES: u32 = 5;
const DEFAULT_THRESHOLD: u32 = 3;

fn default_greeting() -> bool {
    true
}

fn default_max_iter() -> u32 {
    1
}

fn default_votes() -> u32 {
    DEFAULT_VOTES
}

fn default_threshold() -> u32 {
    DEFAULT_THRESHOLD
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub card: PathBuf,
    pub user: String,
    #[serde(default = "default_greeting")]
    pub greeting: bool,
    pub log: Option<PathBuf>,
    #[serde(default = "default_max_iter")]
    pub max_iter: u32,
}

/// Who sent a scripted message
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sender {
    User,
    Char,
    Named(String),
}

impl<'de> Deserialize<'de> for Sender {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let sender = String::deserialize(deserializer)?;
        Ok(match sender.as_str() {
            "user" => Sender::User,
            "char" => Sender::Char,
            _ => Sender::Named(sender),
        })
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub sender: Sender,
    #[serde(default)]
    pub text: String,
}

/// Second opinion asked from the auxiliary model
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Judge {
    pub question: String,
    #[serde(default = "default_votes")]
    pub votes: u32,
    #[serde(default = "default_threshold")]
    pub threshold: u32,
}

/// Textual checks on the generated reply
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Expectation {
    /// Case-sensitive substring
    pub contains: Option<String>,
    /// Case-insensitive, at least one must appear
    pub any_of: Vec<String>,
    /// Case-insensitive, none may appear
    pub none_of: Vec<String>,
}

impl Expectation {
    pub fn is_empty(&self) -> bool {
        self.contains.is_none() && self.any_of.is_empty() && self.none_of.is_empty()
    }

    /// Forbidden words can still show up later, so partial output can't pass
    pub fn decidable_early(&self) -> bool {
        self.none_of.is_empty()
    }

    pub fn is_met(&self, output: &str) -> bool {
        let lowercase = output.to_lowercase();
        self.contains
            .as_ref()
            .map_or(true, |expected| output.contains(expected.as_str()))
            && (self.any_of.is_empty()
                || self
                    .any_of
                    .iter()
                    .any(|word| lowercase.contains(&word.to_lowercase())))
            && !self
                .none_of
                .iter()
                .any(|word| lowercase.contains(&word.to_lowercase()))
    }
}

#[derive(Deserialize)]
struct CaseFile {
    description: String,
    #[serde(default)]
    messages: Vec<Message>,
    message_input: Option<String>,
    message_output: Option<String>,
    expected_output: Option<String>,
    #[serde(default)]
    any_of: Vec<String>,
    #[serde(default)]
    none_of: Vec<String>,
    max_iter: Option<u32>,
    judge: Option<Judge>,
}

#[derive(Deserialize)]
struct SuiteFile {
    name: Option<String>,
    settings: Settings,
    tests: Vec<CaseFile>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Case {
    pub description: String,
    pub messages: Vec<Message>,
    pub expectation: Expectation,
    pub max_iter: u32,
    pub judge: Option<Judge>,
}

impl Case {
    fn from_file(case: CaseFile, settings: &Settings) -> std::result::Result<Self, String> {
        let mut messages = case.messages;
        if let Some(input) = case.message_input {
            messages.push(Message {
                sender: Sender::User,
                text: input,
            });
        }
        if let Some(output) = case.message_output {
            messages.push(Message {
                sender: Sender::Char,
                text: output,
            });
        }

        let expectation = Expectation {
            contains: case.expected_output,
            any_of: case.any_of,
            none_of: case.none_of,
        };
        if expectation.is_empty() && case.judge.is_none() {
            return Err(format!("test \"{}\" has nothing to check", case.description));
        }
        if let Some(judge) = &case.judge {
            if judge.threshold == 0 || judge.threshold > judge.votes {
                return Err(format!(
                    "test \"{}\" needs 1 <= threshold <= votes",
                    case.description
                ));
            }
        }

        Ok(Self {
            description: case.description,
            messages,
            expectation,
            max_iter: case.max_iter.unwrap_or(settings.max_iter),
            judge: case.judge,
        })
    }

    pub fn needs_auxiliary(&self) -> bool {
        self.judge.is_some() && self.expectation.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct Suite {
    pub name: String,
    pub canonical_name: String,
    pub settings: Settings,
    pub card: CharacterCard,
    pub log: Option<ChatLog>,
    pub cases: Vec<Case>,
}

/// `context_coherency` -> `Context Coherency`
pub fn display_name(canonical_name: &str) -> String {
    canonical_name
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

impl Suite {
    /// `None` for JSON files that aren't suites, such as character cards
    pub fn load(path: &Path, tests_dir: &Path) -> Result<Option<Self>> {
        let canonical_name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();
        let invalid = |message: String| HarnessError::Suite(canonical_name.clone(), message);

        let json_error = |source| HarnessError::Json {
            path: path.to_path_buf(),
            source,
        };
        let value: serde_json::Value = serde_json::from_str(&read_file(path)?).map_err(json_error)?;
        if value.get("tests").is_none() {
            return Ok(None);
        }
        let file: SuiteFile = serde_json::from_value(value).map_err(json_error)?;

        let card = CharacterCard::load(tests_dir.join(&file.settings.card))?;
        let log = match &file.settings.log {
            Some(log) => Some(ChatLog::load(tests_dir.join(log), &card.name)?),
            None => None,
        };
        let cases = file
            .tests
            .into_iter()
            .map(|case| Case::from_file(case, &file.settings).map_err(invalid))
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(Self {
            name: file.name.unwrap_or_else(|| display_name(&canonical_name)),
            canonical_name,
            settings: file.settings,
            card,
            log,
            cases,
        }))
    }

    /// Case-insensitive match on either name
    pub fn matches(&self, filter: &str) -> bool {
        self.name.eq_ignore_ascii_case(filter) || self.canonical_name.eq_ignore_ascii_case(filter)
    }
}

/// Suite files in discovery order: top level first, then one level down
pub fn discover(tests_dir: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for pattern in ["*.json", "*/*.json"] {
        let pattern = tests_dir.join(pattern);
        let Some(pattern) = pattern.to_str() else {
            tracing::warn!("Skipping non UTF-8 tests directory {}", tests_dir.display());
            continue;
        };
        match glob::glob(pattern) {
            Ok(entries) => {
                let mut found: Vec<PathBuf> = entries.filter_map(|entry| entry.ok()).collect();
                found.sort();
                paths.extend(found);
            }
            Err(err) => tracing::warn!("Invalid tests pattern {pattern}: {err}"),
        }
    }
    paths
}

/// Load every suite under `tests_dir`; broken suites are logged and skipped
pub fn load_all(tests_dir: &Path) -> Vec<Suite> {
    discover(tests_dir)
        .iter()
        .filter_map(|path| match Suite::load(path, tests_dir) {
            Ok(suite) => suite,
            Err(err) => {
                tracing::error!("Failed to load test suite {}: {err}", path.display());
                None
            }
        })
        .collect()
}
