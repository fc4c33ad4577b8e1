//! Turning a token tree back into markup.
//!
//! Block tokens are written from their attributes. Inline text is stored as
//! rendered HTML, so it goes through a second, reverse inline grammar that
//! maps the HTML subset back to markup and backslash-escapes anything that
//! would otherwise be read as markup.

use html_escape::decode_html_entities;
use marklex_config::Config;

use crate::lexer::{Capture, InlineLexer, InlineSpec, LexError, Macros, Node, Token};

fn wrap(mark: &'static str) -> impl Fn(&Capture) -> String + Send + Sync + 'static {
    move |cap| format!("{mark}{}{mark}", cap.inner())
}

fn markup_lexer() -> Result<InlineLexer, LexError> {
    let macros = Macros::new([("mark", r"\\`*_~\[\]!%#|+=:.-")])?;
    InlineLexer::new(
        "markup",
        vec![
            InlineSpec::new("<br/>").kind("br").literal("\n").into(),
            InlineSpec::new("<code>(.*?)</code>")
                .kind("code")
                .render(|cap| format!("`{}`", decode_html_entities(cap.get(1))))
                .into(),
            InlineSpec::new("<strong>(.*?)</strong>")
                .kind("strong")
                .inner()
                .render(wrap("**"))
                .into(),
            InlineSpec::new("<em>(.*?)</em>")
                .kind("em")
                .inner()
                .render(wrap("*"))
                .into(),
            InlineSpec::new("<del>(.*?)</del>")
                .kind("del")
                .inner()
                .render(wrap("~~"))
                .into(),
            InlineSpec::new(r#"<span style="text-decoration: underline">(.*?)</span>"#)
                .kind("underline")
                .inner()
                .render(wrap("__"))
                .into(),
            InlineSpec::new(r#"<span class="comment">(.*?)</span>"#)
                .kind("comment")
                .inner()
                .render(wrap("%%"))
                .into(),
            InlineSpec::new(r#"<img src="([^"]*)" alt="([^"]*)"/>"#)
                .kind("image")
                .render(|cap| {
                    format!(
                        "![{}]({})",
                        decode_html_entities(cap.get(2)),
                        decode_html_entities(cap.get(1))
                    )
                })
                .into(),
            InlineSpec::new(r#"<a href="([^"]*)">(.*?)</a>"#)
                .kind("link")
                .inner_group(2)
                .render(|cap| format!("[{}]({})", cap.inner(), decode_html_entities(cap.get(1))))
                .into(),
            // A bare `>` opening a line would start a quote.
            InlineSpec::new("&gt;").kind("gt").literal(r"\>").into(),
            InlineSpec::new("&(?:amp|lt|quot|#39);")
                .kind("entity")
                .render(|cap| decode_html_entities(&cap.text).into_owned())
                .into(),
            InlineSpec::new("[{{mark}}]")
                .kind("mark")
                .render(|cap| format!(r"\{}", cap.text))
                .into(),
            InlineSpec::new("[^<&{{mark}}]+").kind("text").into(),
        ],
        &macros,
    )
}

/// Canonical camel-case name of a token type: `list-item` is `listItem`.
pub fn canonical_kind(kind: &str) -> String {
    let mut out = String::with_capacity(kind.len());
    let mut upper = false;
    for ch in kind.chars() {
        match ch {
            '-' | '_' => upper = true,
            _ if upper => {
                out.extend(ch.to_uppercase());
                upper = false;
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Whether two token trees have the same structure: canonical types,
/// text, attributes and children. Bounds are ignored.
pub fn same_shape(left: &[Token], right: &[Token]) -> bool {
    left.len() == right.len()
        && left.iter().zip(right).all(|pair| match pair {
            (Token::Text(a), Token::Text(b)) => a == b,
            (Token::Node(a), Token::Node(b)) => {
                canonical_kind(&a.kind) == canonical_kind(&b.kind)
                    && a.text == b.text
                    && a.attrs == b.attrs
                    && same_shape(a.children(), b.children())
            }
            _ => false,
        })
}

/// Writes `tokens` back as markup that parses to the same shape.
pub fn detokenize(tokens: &[Token]) -> Result<String, LexError> {
    let markup = markup_lexer()?;
    Writer {
        markup: &markup,
        config: Config::default(),
    }
    .blocks(tokens, "\n\n")
}

struct Writer<'a> {
    markup: &'a InlineLexer,
    config: Config,
}

impl Writer<'_> {
    fn span(&self, html: &str) -> Result<String, LexError> {
        self.markup.lex(html, &self.config)
    }

    fn text(&self, node: &Node) -> Result<String, LexError> {
        self.span(node.text.as_deref().unwrap_or(""))
    }

    fn blocks(&self, tokens: &[Token], separator: &str) -> Result<String, LexError> {
        let blocks = tokens
            .iter()
            .map(|token| self.block(token))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(blocks
            .into_iter()
            .filter(|block| !block.is_empty())
            .collect::<Vec<_>>()
            .join(separator))
    }

    fn block(&self, token: &Token) -> Result<String, LexError> {
        let node = match token {
            Token::Text(text) => return Ok(text.clone()),
            Token::Node(node) => node,
        };
        match node.kind.as_str() {
            "heading" => {
                let hashes = "#".repeat(level(node));
                let text = self.text(node)?;
                Ok(match node.bool_attr("center") {
                    Some(true) => format!("{hashes} {text} {hashes}"),
                    _ => format!("{hashes} {text}"),
                })
            }
            "section" => {
                let marker = if node.bool_attr("open").unwrap_or(true) {
                    '+'
                } else {
                    '-'
                };
                let head = format!("{}{marker} {}", "#".repeat(level(node)), self.text(node)?);
                let body = self.blocks(node.children(), "\n\n")?;
                Ok(if body.is_empty() {
                    head
                } else {
                    format!("{head}\n\n{body}")
                })
            }
            "quote" => {
                let style = match node.str_attr("style") {
                    Some("normal") | None => String::new(),
                    Some(style) => format!("[{style}]"),
                };
                let body = self.blocks(node.children(), "\n")?;
                let mut lines = body.split('\n');
                let first = lines.next().unwrap_or("");
                let mut out = format!(">{style} {first}");
                for line in lines {
                    out.push_str("\n> ");
                    out.push_str(line);
                }
                Ok(out)
            }
            "separator" => {
                let thick = node.bool_attr("thick").unwrap_or(false);
                let mark = match (node.str_attr("style"), thick) {
                    (Some("dashed"), false) => "- - -",
                    (Some("dashed"), true) => "= = =",
                    (Some("dotted"), false) => "...",
                    (Some("dotted"), true) => ":::",
                    (_, false) => "---",
                    (_, true) => "===",
                };
                Ok(mark.to_string())
            }
            "codeblock" => {
                let lang = node.str_attr("lang").unwrap_or("");
                Ok(match node.text.as_deref() {
                    Some(text) if !text.is_empty() => format!("```{lang}\n{text}\n```"),
                    _ => format!("```{lang}\n```"),
                })
            }
            "list" => self.list(node),
            "table" => self.table(node),
            "usages" => {
                let lines = node
                    .children()
                    .iter()
                    .filter_map(Token::as_node)
                    .map(|usage| {
                        let desc = self.span(usage.str_attr("desc").unwrap_or(""))?;
                        Ok(format!("{} :: {desc}", self.text(usage)?))
                    })
                    .collect::<Result<Vec<_>, LexError>>()?;
                Ok(lines.join("\n"))
            }
            "inlinelist" => {
                let items = node
                    .children()
                    .iter()
                    .filter_map(Token::as_node)
                    .map(|item| self.text(item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!(":: {}", items.join(" | ")))
            }
            "paragraph" => self.text(node),
            _ => Ok(node.text.clone().unwrap_or_default()),
        }
    }

    fn list(&self, list: &Node) -> Result<String, LexError> {
        let depth = list
            .int_attr("indent")
            .and_then(|indent| usize::try_from(indent).ok())
            .unwrap_or(0);
        let pad = "  ".repeat(depth);
        let ordered = list.bool_attr("ordered").unwrap_or(false);

        let mut lines = Vec::new();
        for (n, item) in list.children().iter().filter_map(Token::as_node).enumerate() {
            let marker = if ordered {
                format!("{}.", n + 1)
            } else {
                "-".to_string()
            };
            lines.push(format!("{pad}{marker} {}", self.text(item)?));
            for sub in item.children().iter().filter_map(Token::as_node) {
                lines.push(self.list(sub)?);
            }
        }
        Ok(lines.join("\n"))
    }

    fn table(&self, table: &Node) -> Result<String, LexError> {
        let rows: Vec<&Node> = table.children().iter().filter_map(Token::as_node).collect();
        let Some(head) = rows.first() else {
            return Ok(String::new());
        };

        let mut lines = vec![self.row(head)?];
        let rule = head
            .children()
            .iter()
            .filter_map(Token::as_node)
            .map(|cell| {
                let fill = match cell.bool_attr("bold") {
                    Some(true) => "===",
                    _ => "---",
                };
                match cell.str_attr("align") {
                    Some("center") => format!(":{fill}:"),
                    Some("right") => format!("{fill}:"),
                    _ => fill.to_string(),
                }
            })
            .collect::<Vec<_>>()
            .join("|");
        lines.push(format!("|{rule}|"));
        for row in &rows[1..] {
            lines.push(self.row(row)?);
        }
        Ok(lines.join("\n"))
    }

    fn row(&self, row: &Node) -> Result<String, LexError> {
        let cells = row
            .children()
            .iter()
            .filter_map(Token::as_node)
            .map(|cell| self.text(cell))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(format!("| {} |", cells.join(" | ")))
    }
}

fn level(node: &Node) -> usize {
    node.int_attr("level")
        .and_then(|level| usize::try_from(level).ok())
        .unwrap_or(1)
}
