/// Prompt formats loaded from `formats/<name>.json`
use crate::{read_json, Result};
use minijinja::{Environment, Value};
use serde::Deserialize;
use std::path::Path;

/// Layout of a roleplay chat prompt.
///
/// Every field is a template. Besides the per-field variables listed below,
/// all templates can use `char` and `user`.
///   - `card`: `desc`
///   - `example_chats`: `examples`
///   - `user_msg` / `char_msg`: `name`, `msg`, `maybe_space`
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RoleplayFormat {
    #[serde(default)]
    pub system: String,
    pub card: String,
    #[serde(default)]
    pub example_chats: String,
    #[serde(default)]
    pub new_example_chat: String,
    #[serde(default)]
    pub new_chat: String,
    pub user_msg: String,
    pub char_msg: String,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

impl RoleplayFormat {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }
}

/// Layout of an instruction/response exchange.
///
/// `instruction` and `response` use `text` and `maybe_space`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct InstructFormat {
    #[serde(default)]
    pub system: String,
    pub instruction: String,
    pub response: String,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

impl InstructFormat {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }
}

/// `" "` in front of non-empty text
pub(crate) fn maybe_space(text: &str) -> &'static str {
    if text.is_empty() {
        ""
    } else {
        " "
    }
}

pub(crate) fn render(template: &str, context: Value) -> Result<String> {
    let mut env = Environment::new();
    // Formats rely on their trailing newlines
    env.set_keep_trailing_newline(true);
    Ok(env.render_str(template, context)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;
    use std::io::Write;

    #[test]
    fn test_render_keeps_trailing_newline() {
        let rendered = render(
            "{{ name }}:{{ maybe_space }}{{ msg }}\n",
            context! { name => "Jin", maybe_space => maybe_space("Hi"), msg => "Hi" },
        )
        .unwrap();
        assert_eq!(rendered, "Jin: Hi\n");

        let rendered = render(
            "{{ name }}:{{ maybe_space }}{{ msg }}",
            context! { name => "Rin", maybe_space => maybe_space(""), msg => "" },
        )
        .unwrap();
        assert_eq!(rendered, "Rin:");
    }

    #[test]
    fn test_values_are_not_rendered() {
        // Card text may carry its own `{{char}}` placeholders
        let rendered = render("{{ desc }}", context! { desc => "{{char}} is tall" }).unwrap();
        assert_eq!(rendered, "{{char}} is tall");
    }

    #[test]
    fn test_load_roleplay_format() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{
                "card": "{{{{ char }}}}'s persona: {{{{ desc }}}}\n",
                "user_msg": "\n{{{{ name }}}}:{{{{ maybe_space }}}}{{{{ msg }}}}",
                "char_msg": "\n{{{{ name }}}}:{{{{ maybe_space }}}}{{{{ msg }}}}",
                "stop_sequences": ["\n{{{{user}}}}:"]
            }}"#
        )
        .unwrap();

        let format = RoleplayFormat::load(file.path()).unwrap();
        assert_eq!(format.card, "{{ char }}'s persona: {{ desc }}\n");
        assert_eq!(format.system, "");
        assert_eq!(format.stop_sequences, vec!["\n{{user}}:"]);
    }

    #[test]
    fn test_load_missing_field() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"system": "", "instruction": "x"}}"#).unwrap();
        assert!(matches!(
            InstructFormat::load(file.path()),
            Err(crate::HarnessError::Json { .. })
        ));
    }
}
