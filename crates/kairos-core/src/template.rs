//! Placeholder substitution for notification templates
//!
//! Templates use `{name}` tokens resolved against a per-definition context
//! owned by the module adapter. `{{` and `}}` escape literal braces, an
//! unknown placeholder renders as an empty string, and an unterminated token
//! passes through unchanged.

use std::collections::HashMap;

/// Render a template against a placeholder context
pub fn render(template: &str, context: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if closed {
                    if let Some(value) = context.get(name.trim()) {
                        out.push_str(value);
                    }
                } else {
                    out.push('{');
                    out.push_str(&name);
                }
            }
            _ => out.push(c),
        }
    }

    out
}
