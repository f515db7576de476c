use crate::format::{maybe_space, render};
use crate::{read_file, HarnessError, Result};
use minijinja::context;
use serde::Deserialize;
use std::fmt;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: String,
    pub is_user: bool,
    pub message: String,
}

impl ChatMessage {
    pub fn new(sender: impl Into<String>, is_user: bool, message: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            is_user,
            message: message.into(),
        }
    }

    fn render(&self, template: &str, char_name: &str, user_name: &str) -> Result<String> {
        render(
            template,
            context! {
                name => self.sender,
                msg => self.message,
                maybe_space => maybe_space(&self.message),
                char => char_name,
                user => user_name,
            },
        )
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.sender, self.message)
    }
}

/// Anyone but the character (or its placeholder) is a user
pub(crate) fn is_user(sender: &str, char_name: &str) -> bool {
    sender != char_name && sender != "{{char}}"
}

/// One line of a SillyTavern `.jsonl` chat export
#[derive(Deserialize)]
struct JsonlEntry {
    name: Option<String>,
    #[serde(default)]
    is_user: bool,
    #[serde(default)]
    mes: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatLog {
    pub entries: Vec<ChatMessage>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `sender: message` transcript.
    ///
    /// A line containing `:` starts a new message, any other line continues
    /// the current one.
    pub fn read(text: &str, char_name: &str) -> Self {
        let mut log = Self::new();
        let mut current: Option<(String, String)> = None;

        for line in text.lines() {
            match line.split_once(':') {
                Some((sender, message)) => {
                    if let Some((sender, message)) = current.take() {
                        log.push_read(sender, &message, char_name);
                    }
                    current = Some((sender.trim().to_string(), message.trim().to_string()));
                }
                None => {
                    if let Some((_, message)) = current.as_mut() {
                        message.push(' ');
                        message.push_str(line.trim());
                    }
                }
            }
        }
        if let Some((sender, message)) = current {
            log.push_read(sender, &message, char_name);
        }
        log
    }

    fn push_read(&mut self, sender: String, message: &str, char_name: &str) {
        let is_user = is_user(&sender, char_name);
        self.entries
            .push(ChatMessage::new(sender, is_user, message.trim()));
    }

    /// Load a `.txt` transcript or a `.jsonl` chat export
    pub fn load(path: impl AsRef<Path>, char_name: &str) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("txt") => Ok(Self::read(&read_file(path)?, char_name)),
            Some("jsonl") => Self::read_jsonl(&read_file(path)?, path),
            _ => Err(HarnessError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    fn read_jsonl(content: &str, path: &Path) -> Result<Self> {
        let mut log = Self::new();
        for line in content.lines().filter(|line| !line.trim().is_empty()) {
            let entry: JsonlEntry =
                serde_json::from_str(line).map_err(|source| HarnessError::Json {
                    path: path.to_path_buf(),
                    source,
                })?;
            // Metadata lines carry no name
            if let Some(name) = entry.name {
                log.entries
                    .push(ChatMessage::new(name, entry.is_user, entry.mes));
            }
        }
        Ok(log)
    }

    /// Append a message; `is_user` is inferred from the sender when absent
    pub fn add_message(
        &mut self,
        sender: &str,
        message: &str,
        is_user: Option<bool>,
        char_name: &str,
    ) {
        let is_user = is_user.unwrap_or_else(|| self::is_user(sender, char_name));
        self.entries.push(ChatMessage::new(sender, is_user, message));
    }

    pub fn add_messages(&mut self, log: &ChatLog) {
        self.entries.extend(log.entries.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn render(
        &self,
        user_msg: &str,
        char_msg: &str,
        char_name: &str,
        user_name: &str,
    ) -> Result<String> {
        let mut value = String::new();
        for entry in &self.entries {
            let template = if entry.is_user { user_msg } else { char_msg };
            value.push_str(&entry.render(template, char_name, user_name)?);
        }
        Ok(value)
    }

    /// Plain `sender: message` transcript, one message per line
    pub fn to_transcript(&self) -> String {
        self.entries
            .iter()
            .map(ChatMessage::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
