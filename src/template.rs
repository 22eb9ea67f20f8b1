//! Flat text-substitution rendering for build context files
//!
//! Templates use `{{ key }}` placeholders filled from an explicit
//! key-value context. Nothing leaks in from the process environment:
//! every value a template needs is passed by the calling stage. Loops and
//! conditionals do not exist here; stages precompute any multi-line
//! directive blocks (volume/port/env lines) as plain values.

use std::collections::BTreeMap;

/// Context for one render call
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    values: BTreeMap<String, String>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, replacing any previous one for the key
    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Render a template by substituting every `{{ key }}` placeholder.
///
/// Unknown placeholders render as empty strings: a stage that omits a
/// value gets an empty directive, not a leftover marker in a Dockerfile.
pub fn render(template: &str, context: &TemplateContext) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                if let Some(value) = context.get(key) {
                    output.push_str(value);
                }
                rest = &after[end + 2..];
            }
            None => {
                // unterminated marker, emit verbatim
                output.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    output.push_str(rest);
    output
}
