//! Message template rendering using `{{variable}}` syntax.
//!
//! A placeholder may carry a fallback: `{{first_name|there}}` renders
//! `there` when `first_name` is missing or empty. Unknown placeholders
//! without a fallback render as the empty string.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub html_body: String,
}

/// Render a subject line and HTML body. Values substituted into the body are
/// HTML-escaped; the subject is plain text.
pub fn render_message(
    subject_template: &str,
    body_template: &str,
    variables: &HashMap<String, String>,
) -> RenderedMessage {
    RenderedMessage {
        subject: substitute(subject_template, variables, false),
        html_body: substitute(body_template, variables, true),
    }
}

/// Replace every `{{name}}` / `{{name|fallback}}` placeholder in `template`.
pub fn substitute(template: &str, variables: &HashMap<String, String>, escape: bool) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            // Unterminated placeholder, keep the text as written.
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };

        let token = after[..end].trim();
        let (name, fallback) = match token.split_once('|') {
            Some((name, fallback)) => (name.trim(), Some(fallback.trim())),
            None => (token, None),
        };

        let value = variables
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .or(fallback)
            .unwrap_or_default();

        if escape {
            out.push_str(&escape_html(value));
        } else {
            out.push_str(value);
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
