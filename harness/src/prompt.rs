/// Roleplay and instruct prompt builders
use crate::chat_log::ChatLog;
use crate::format::{maybe_space, render, InstructFormat, RoleplayFormat};
use crate::{CharacterCard, Result};
use minijinja::context;
use std::path::Path;
use text_generation_harness_client::PromptSource;

/// A prompt rendered to text along with its stop sequences
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub text: String,
    pub stop_sequences: Vec<String>,
}

impl PromptSource for RenderedPrompt {
    fn text(&self) -> String {
        self.text.clone()
    }

    fn stop_sequences(&self) -> Vec<String> {
        self.stop_sequences.clone()
    }
}

fn substitute_names(text: &str, char_name: &str, user_name: &str) -> String {
    text.replace("{{char}}", char_name)
        .replace("<BOT>", char_name)
        .replace("{{user}}", user_name)
        .replace("<USER>", user_name)
}

/// Chat between a user and the character of a card
#[derive(Clone, Debug)]
pub struct RoleplayPrompt {
    format: RoleplayFormat,
    user_name: String,
    card: Option<CharacterCard>,
    chat_log: ChatLog,
}

impl RoleplayPrompt {
    pub fn new(format: RoleplayFormat) -> Self {
        Self {
            format,
            user_name: String::new(),
            card: None,
            chat_log: ChatLog::new(),
        }
    }

    /// Start a new chat, optionally opened by the card's greeting
    pub fn init(&mut self, user_name: &str, card: &CharacterCard, add_greeting: bool) {
        self.user_name = user_name.to_string();
        self.chat_log = ChatLog::new();
        if add_greeting {
            self.chat_log.entries.push(card.greeting.clone());
        }
        self.card = Some(card.clone());
    }

    fn char_name(&self) -> &str {
        self.card.as_ref().map(|card| card.name.as_str()).unwrap_or_default()
    }

    pub fn add_message(&mut self, sender: &str, message: &str, is_user: Option<bool>) {
        let char_name = self.char_name().to_string();
        self.chat_log
            .add_message(sender, message, is_user, &char_name);
    }

    pub fn add_messages(&mut self, log: &ChatLog) {
        self.chat_log.add_messages(log);
    }

    pub fn add_messages_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let log = ChatLog::load(path, self.char_name())?;
        self.add_messages(&log);
        Ok(())
    }

    pub fn chat_log(&self) -> &ChatLog {
        &self.chat_log
    }

    pub fn render(&self) -> Result<RenderedPrompt> {
        let char_name = self.char_name();
        let user_name = self.user_name.as_str();
        let names = context! { char => char_name, user => user_name };

        let mut text = render(&self.format.system, names.clone())?;
        if let Some(card) = &self.card {
            text.push_str(&card.render(&self.format, user_name)?);
        }
        text.push_str(&render(&self.format.new_chat, names)?);
        text.push_str(&self.chat_log.render(
            &self.format.user_msg,
            &self.format.char_msg,
            char_name,
            user_name,
        )?);

        Ok(RenderedPrompt {
            text: substitute_names(&text, char_name, user_name),
            stop_sequences: self
                .format
                .stop_sequences
                .iter()
                .map(|stop| substitute_names(stop, char_name, user_name))
                .collect(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct ExchangeItem {
    is_response: bool,
    text: String,
}

/// Instruction/response exchange, used to question the auxiliary model
#[derive(Clone, Debug)]
pub struct InstructPrompt {
    format: InstructFormat,
    exchange: Vec<ExchangeItem>,
}

impl InstructPrompt {
    pub fn new(format: InstructFormat) -> Self {
        Self {
            format,
            exchange: Vec::new(),
        }
    }

    pub fn init(&mut self) {
        self.exchange.clear();
    }

    pub fn add_instruction(&mut self, text: &str) {
        self.exchange.push(ExchangeItem {
            is_response: false,
            text: text.to_string(),
        });
    }

    pub fn add_question(&mut self, text: &str, question: &str) {
        self.add_instruction(&format!(
            "Read the following message:\n{}\n\nQuestion: {question}",
            text.trim()
        ));
    }

    pub fn add_response(&mut self, text: &str) {
        self.exchange.push(ExchangeItem {
            is_response: true,
            text: text.to_string(),
        });
    }

    /// An exchange not ending on a response gets an empty one for the model to fill
    pub fn render(&self) -> Result<RenderedPrompt> {
        let mut text = render(&self.format.system, context! {})?;
        let open_response = ExchangeItem {
            is_response: true,
            text: String::new(),
        };
        let needs_response = self
            .exchange
            .last()
            .map_or(false, |item| !item.is_response);

        for item in self
            .exchange
            .iter()
            .chain(needs_response.then_some(&open_response))
        {
            let template = if item.is_response {
                &self.format.response
            } else {
                &self.format.instruction
            };
            text.push_str(&render(
                template,
                context! { text => item.text, maybe_space => maybe_space(&item.text) },
            )?);
        }

        Ok(RenderedPrompt {
            text,
            stop_sequences: self
                .format
                .stop_sequences
                .iter()
                .filter(|stop| !stop.contains("{{char}}") && !stop.contains("{{user}}"))
                .cloned()
                .collect(),
        })
    }
}
