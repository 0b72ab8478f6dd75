//! Template-based prompt builder.
//!
//! Placeholders: `{id}`, `{name}`, `{payload}` (compact JSON) and
//! `{payload.<field>}` (dotted path into the payload; string values are
//! inserted raw, anything else as JSON). `{{` and `}}` are literal braces.

use crate::domain::WorkItem;
use crate::ports::{PromptBuilder, PromptError};

#[derive(Debug, Clone)]
pub struct TemplatePrompt {
    template: String,
}

impl TemplatePrompt {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl PromptBuilder for TemplatePrompt {
    fn build(&self, item: &WorkItem) -> Result<String, PromptError> {
        render(&self.template, item)
    }
}

/// Render any template against an item (also used for verifier paths and argv).
pub fn render(template: &str, item: &WorkItem) -> Result<String, PromptError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("{{") {
            out.push('{');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("}}") {
            out.push('}');
            rest = after;
        } else if let Some(after) = tail.strip_prefix('{') {
            let end = after.find('}').ok_or(PromptError::Unterminated)?;
            out.push_str(&lookup(&after[..end], item)?);
            rest = &after[end + 1..];
        } else {
            // lone '}'
            out.push('}');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn lookup(placeholder: &str, item: &WorkItem) -> Result<String, PromptError> {
    let missing = || PromptError::MissingField {
        placeholder: placeholder.to_string(),
        item_id: item.id.to_string(),
    };
    match placeholder {
        "id" => Ok(item.id.to_string()),
        "name" => Ok(item.name.clone()),
        "payload" => Ok(item.payload.to_string()),
        other => {
            let path = other.strip_prefix("payload.").ok_or_else(missing)?;
            let value = path
                .split('.')
                .try_fold(&item.payload, |v, key| v.get(key))
                .ok_or_else(missing)?;
            Ok(match value {
                serde_json::Value::String(s) => s.clone(),
                v => v.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn item() -> WorkItem {
        WorkItem::new(
            "chat-7",
            "Refund request",
            json!({ "path": "/data/7.json", "meta": { "lang": "ja", "pages": 3 } }),
        )
    }

    #[rstest]
    #[case("Process {name} ({id})", "Process Refund request (chat-7)")]
    #[case("read {payload.path}", "read /data/7.json")]
    #[case("lang={payload.meta.lang} pages={payload.meta.pages}", "lang=ja pages=3")]
    #[case("literal {{braces}}", "literal {braces}")]
    #[case("no placeholders", "no placeholders")]
    fn renders_placeholders(#[case] template: &str, #[case] expected: &str) {
        assert_eq!(TemplatePrompt::new(template).build(&item()).unwrap(), expected);
    }

    #[test]
    fn payload_placeholder_is_compact_json() {
        let rendered = render("{payload}", &WorkItem::new("a", "A", json!({ "k": 1 }))).unwrap();
        assert_eq!(rendered, r#"{"k":1}"#);
    }

    #[rstest]
    #[case("{payload.nope}")]
    #[case("{payload.meta.lang.deeper}")]
    #[case("{unknown}")]
    fn missing_fields_are_errors(#[case] template: &str) {
        let err = render(template, &item()).unwrap_err();
        assert!(matches!(err, PromptError::MissingField { .. }));
    }

    #[test]
    fn unterminated_placeholder_is_an_error() {
        assert!(matches!(render("oops {name", &item()), Err(PromptError::Unterminated)));
    }
}
