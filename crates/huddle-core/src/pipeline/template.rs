//! `{key}` placeholder rendering for step prompts

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Missing template key '{0}'")]
    MissingKey(String),

    #[error("Unbalanced brace at byte {0}")]
    UnbalancedBrace(usize),
}

/// Substitute every `{key}` in `template` from `context`.
///
/// String values are inserted as-is, anything else as compact JSON. `{{` and
/// `}}` produce literal braces. Rendering is all or nothing: the first missing
/// key or stray brace fails the whole template.
pub fn render(template: &str, context: &Map<String, Value>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' if chars.peek().is_some_and(|(_, next)| *next == '{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek().is_some_and(|(_, next)| *next == '}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(TemplateError::UnbalancedBrace(pos)),
            '{' => {
                let mut key = String::new();
                let mut closed = false;
                for (_, k) in chars.by_ref() {
                    match k {
                        '}' => {
                            closed = true;
                            break;
                        }
                        '{' => return Err(TemplateError::UnbalancedBrace(pos)),
                        _ => key.push(k),
                    }
                }
                if !closed {
                    return Err(TemplateError::UnbalancedBrace(pos));
                }

                let key = key.trim();
                match context.get(key) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(other) => out.push_str(&other.to_string()),
                    None => return Err(TemplateError::MissingKey(key.to_string())),
                }
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_substitutes_strings_and_json() {
        let context = ctx(json!({"feature": "login", "limit": 3, "tags": ["a", "b"]}));
        let rendered = render("Build {feature} (max {limit}) tagged {tags}", &context).unwrap();
        assert_eq!(rendered, "Build login (max 3) tagged [\"a\",\"b\"]");
    }

    #[test]
    fn test_escaped_braces() {
        let rendered = render("fn main() {{ {body} }}", &ctx(json!({"body": "run()"}))).unwrap();
        assert_eq!(rendered, "fn main() { run() }");
    }

    #[test]
    fn test_missing_key_fails_whole_render() {
        let err = render("{known} then {unknown}", &ctx(json!({"known": "x"}))).unwrap_err();
        assert_eq!(err, TemplateError::MissingKey("unknown".to_string()));
    }

    #[test]
    fn test_unbalanced_braces() {
        assert_eq!(
            render("open {never", &Map::new()).unwrap_err(),
            TemplateError::UnbalancedBrace(5)
        );
        assert_eq!(
            render("stray } here", &Map::new()).unwrap_err(),
            TemplateError::UnbalancedBrace(6)
        );
    }

    #[test]
    fn test_no_placeholders() {
        assert_eq!(render("plain text", &Map::new()).unwrap(), "plain text");
    }
}
