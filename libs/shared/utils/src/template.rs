use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").unwrap())
}

/// Substitutes `{{name}}` and `{{path.to.field}}` placeholders against a JSON
/// scope. Unknown paths render as the empty string; there is no expression
/// evaluation here, conditions live in the state-machine AST.
pub fn render_template(template: &str, scope: &Value) -> String {
    placeholder_re()
        .replace_all(template, |caps: &regex::Captures| {
            let path = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            lookup_path(scope, path)
                .map(value_to_display)
                .unwrap_or_default()
        })
        .into_owned()
}

/// Resolves a dotted path (`slots.service_id`) inside a JSON value.
pub fn lookup_path<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = scope;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
