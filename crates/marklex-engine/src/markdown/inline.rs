//! Inline spans, rendered to an HTML subset.

use crate::lexer::{Capture, InlineLexer, InlineSpec, LexError, Macros};

/// Characters a backslash makes literal.
pub(crate) const ESCAPABLE: &str = r"\\`*_~\[\]()!#|>%<&+=:.-";

/// Escapes the five characters HTML cares about.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn wrap(
    open: &'static str,
    close: &'static str,
) -> impl Fn(&Capture) -> String + Send + Sync + 'static {
    move |cap| format!("{open}{}{close}", cap.inner())
}

/// The inline grammar: escapes, code, line breaks, emphasis, links and
/// images. Anything else is passed through, HTML-escaped.
pub fn inline_lexer() -> Result<InlineLexer, LexError> {
    let macros = Macros::new([("esc", ESCAPABLE)])?;
    InlineLexer::new(
        "inline",
        vec![
            InlineSpec::new(r"\\([{{esc}}])")
                .kind("escape")
                .render(|cap| escape(cap.get(1)))
                .into(),
            InlineSpec::new(r"`([^`\n]+)`")
                .kind("code")
                .render(|cap| format!("<code>{}</code>", escape(cap.get(1))))
                .into(),
            InlineSpec::new(r"[ \t]*\n[ \t]*")
                .kind("br")
                .literal("<br/>")
                .into(),
            InlineSpec::new(r"\*\*(.+?)\*\*")
                .kind("strong")
                .inner()
                .render(wrap("<strong>", "</strong>"))
                .into(),
            InlineSpec::new(r"\*([^*\n]+)\*")
                .kind("em")
                .inner()
                .render(wrap("<em>", "</em>"))
                .into(),
            InlineSpec::new(r"~~(.+?)~~")
                .kind("del")
                .inner()
                .render(wrap("<del>", "</del>"))
                .into(),
            InlineSpec::new(r"__(.+?)__")
                .kind("underline")
                .inner()
                .render(wrap(
                    r#"<span style="text-decoration: underline">"#,
                    "</span>",
                ))
                .into(),
            InlineSpec::new(r"%%(.+?)%%")
                .kind("comment")
                .inner()
                .render(wrap(r#"<span class="comment">"#, "</span>"))
                .into(),
            InlineSpec::new(r"!\[([^\]\n]*)\]\(([^)\s]*)\)")
                .kind("image")
                .render(|cap| {
                    format!(
                        r#"<img src="{}" alt="{}"/>"#,
                        escape(cap.get(2)),
                        escape(cap.get(1))
                    )
                })
                .into(),
            InlineSpec::new(r"\[([^\]\n]+)\]\(([^)\s]*)\)")
                .kind("link")
                .inner_group(1)
                .render(|cap| format!(r#"<a href="{}">{}</a>"#, escape(cap.get(2)), cap.inner()))
                .into(),
            InlineSpec::new(r#"[&<>"']"#)
                .kind("special")
                .render(|cap| escape(&cap.text))
                .into(),
            InlineSpec::new(r#"[^\\`*_~\[\]!%&<>"'\n]+"#)
                .kind("text")
                .into(),
        ],
        &macros,
    )
}
