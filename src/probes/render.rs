//! Templated config rendering
//!
//! Probe definitions may reference their target through `{machine}` inside
//! any string field of the config document. Rendering substitutes the
//! target's machine id; any other identifier-shaped placeholder is a
//! [`Error::TemplateRender`] failure. Brace sequences that do not look
//! like an identifier (regex quantifiers, JSON snippets) pass through
//! untouched.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};

/// The only supported template variable
pub const MACHINE_VAR: &str = "machine";

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex"))
}

/// Substitute the target machine id into every string of a config document
pub fn render_config(config: &Value, machine: &str) -> Result<Value> {
    match config {
        Value::String(s) => Ok(Value::String(render_str(s, machine)?)),
        Value::Array(items) => items
            .iter()
            .map(|item| render_config(item, machine))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(fields) => fields
            .iter()
            .map(|(key, value)| Ok((key.clone(), render_config(value, machine)?)))
            .collect::<Result<serde_json::Map<_, _>>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn render_str(input: &str, machine: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;

    for caps in placeholder().captures_iter(input) {
        let var = caps.get(1).expect("placeholder capture");
        if var.as_str() != MACHINE_VAR {
            return Err(Error::TemplateRender(format!(
                "unknown template variable \"{}\" in \"{input}\"",
                var.as_str()
            )));
        }
        let whole = caps.get(0).expect("placeholder match");
        out.push_str(&input[last..whole.start()]);
        out.push_str(machine);
        last = whole.end();
    }

    out.push_str(&input[last..]);
    Ok(out)
}
