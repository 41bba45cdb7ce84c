use serde::Serialize;
use tera::{Context, Error as TeraError, Tera};

const TEMPLATE_NAME: &str = "instructions";

/// Built-in instruction block: the system prompt followed by the earlier turns.
pub const DEFAULT_INSTRUCTION_TEMPLATE: &str = "\
{% if system %}{{ system }}{% endif %}\
{% if history %}{% if system %}\n\n{% endif %}Bisheriger Gesprächsverlauf:\
{% for turn in history %}\n{{ turn.label }}: {{ turn.content }}{% endfor %}\
{% endif %}";

/// A compiled instruction template, parsed once and rendered per request.
pub struct InstructionTemplate {
    tera: Tera,
}

impl InstructionTemplate {
    pub fn new(template: &str) -> Result<Self, TeraError> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, template)?;
        Ok(Self { tera })
    }

    pub fn render<T: Serialize>(&self, context_data: &T) -> Result<String, TeraError> {
        let context = Context::from_serialize(context_data)?;
        self.tera.render(TEMPLATE_NAME, &context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_template_with_system_and_history() {
        let rendered = InstructionTemplate::new(DEFAULT_INSTRUCTION_TEMPLATE)
            .unwrap()
            .render(&json!({
                "system": "Du bist REX.",
                "history": [
                    {"label": "Benutzer", "content": "Hallo"},
                    {"label": "Assistent", "content": "Hallo! Wie kann ich helfen?"}
                ]
            }))
            .unwrap();

        assert_eq!(
            rendered,
            "Du bist REX.\n\nBisheriger Gesprächsverlauf:\nBenutzer: Hallo\nAssistent: Hallo! Wie kann ich helfen?"
        );
    }

    #[test]
    fn test_default_template_edge_cases() {
        let template = InstructionTemplate::new(DEFAULT_INSTRUCTION_TEMPLATE).unwrap();

        let only_system = template
            .render(&json!({"system": "S", "history": []}))
            .unwrap();
        assert_eq!(only_system, "S");

        let only_history = template
            .render(&json!({"system": "", "history": [{"label": "Benutzer", "content": "x"}]}))
            .unwrap();
        assert_eq!(only_history, "Bisheriger Gesprächsverlauf:\nBenutzer: x");

        let nothing = template
            .render(&json!({"system": "", "history": []}))
            .unwrap();
        assert_eq!(nothing, "");
    }

    #[test]
    fn test_invalid_custom_template_is_rejected() {
        assert!(InstructionTemplate::new("{% for turn in history %}").is_err());
    }

    #[test]
    fn test_custom_template_does_not_escape_markup() {
        let template = InstructionTemplate::new("<{{ system }}>").unwrap();
        let rendered = template.render(&json!({"system": "a & b"})).unwrap();
        assert_eq!(rendered, "<a & b>");
    }
}
