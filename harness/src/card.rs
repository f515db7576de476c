use crate::chat_log::{ChatLog, ChatMessage};
use crate::format::{render, RoleplayFormat};
use crate::{read_json, HarnessError, Result};
use minijinja::context;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;

/// TavernAI character card fields used by the harness
#[derive(Deserialize)]
struct CardFile {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    first_mes: String,
    #[serde(default)]
    mes_example: String,
}

fn example_separator() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| Regex::new(r"(?i)<start>").expect("valid regex"))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CharacterCard {
    pub name: String,
    pub description: String,
    pub greeting: ChatMessage,
    pub examples: Vec<ChatLog>,
}

impl CharacterCard {
    /// Only JSON cards are supported
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::from_card(read_json(path)?)),
            _ => Err(HarnessError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        Ok(Self::from_card(serde_json::from_str(content)?))
    }

    fn from_card(card: CardFile) -> Self {
        let name = card.name.trim().to_string();
        let examples = example_separator()
            .split(&card.mes_example)
            .map(str::trim)
            .filter(|example| !example.is_empty())
            .map(|example| ChatLog::read(example, &name))
            .collect();

        Self {
            greeting: ChatMessage::new(name.clone(), false, card.first_mes.trim()),
            description: card.description.trim().to_string(),
            examples,
            name,
        }
    }

    /// Card section of a roleplay prompt, example chats included
    pub(crate) fn render(&self, format: &RoleplayFormat, user_name: &str) -> Result<String> {
        let mut value = render(
            &format.card,
            context! { desc => self.description, char => self.name, user => user_name },
        )?;

        if !self.examples.is_empty() {
            let mut examples = String::new();
            for log in &self.examples {
                examples.push_str(&format.new_example_chat);
                examples.push_str(&log.render(
                    &format.user_msg,
                    &format.char_msg,
                    &self.name,
                    user_name,
                )?);
            }
            value.push_str(&render(
                &format.example_chats,
                context! { examples => examples, char => self.name, user => user_name },
            )?);
        }
        Ok(value)
    }
}
