//! Message template rendering.
//!
//! Templates carry free-form `{name}` placeholders substituted from a
//! per-recipient context map. Unresolved placeholders stay verbatim — a
//! typo in a template degrades the message, it never fails the send.

use std::collections::HashMap;

/// Render a template against a context map.
pub fn render(template: &str, context: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in context {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// Convenience for building a context from string pairs.
pub fn context<const N: usize>(pairs: [(&str, String); N]) -> HashMap<String, String> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}
