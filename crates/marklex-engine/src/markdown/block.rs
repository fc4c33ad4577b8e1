//! Block contexts: headings, sections, quotes, separators, code blocks,
//! lists, tables, usages and paragraphs.
//!
//! Rules are tried in the order they are listed here. Anything that is not
//! a recognized block becomes a paragraph, which runs until a blank line or
//! a heading.

use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;

use crate::lexer::{
    BlockEntry, BlockSpec, Capture, ContextDef, Emit, Entry, LexError, Macros, Node, Scope, Test,
    Token, text_of,
};
use marklex_config::Flag;

pub(crate) const MAX_LEVEL: usize = 6;

/// Columns one tab counts for when measuring list indentation.
const TAB_WIDTH: usize = 4;

static LIST_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([ \t]*)([-*+]|\d+\.)[ \t]+(.*)$").unwrap());

static QUOTE_MARK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[ \t]*>[ \t]?").unwrap());

static USAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ \t]*(.+?)[ \t]+::[ \t]+(.*)$").unwrap());

/// Header row, alignment row, then any number of body rows.
const TABLE: &str = concat!(
    r"([^\n]*\|[^\n]*)\n",
    r"(\|?(?:{{ws}}*{{align}}{{ws}}*\|)+(?:{{ws}}*{{align}}{{ws}}*)?)",
    r"((?:\n[^\n]*\|[^\n]*)*)",
);

/// What may come after the newline that ends a paragraph.
const PARAGRAPH_END: &str = r"{{ws}}*(?:\n|$)|{{head}}{{ws}}";
const PARAGRAPH_END_SECTIONS: &str = r"{{ws}}*(?:\n|$)|{{head}}[>+-]?{{ws}}";

pub(crate) fn macros() -> Result<Macros, LexError> {
    Macros::new([
        ("ws", r"[ \t]"),
        ("blank", r"[ \t]*\n"),
        ("marker", r"(?:[-*+]|\d+\.)"),
        ("head", r"#{1,6}"),
        ("align", r":?[-=]+:?"),
    ])
}

pub(crate) fn contexts() -> Vec<(String, ContextDef)> {
    let mut contexts = vec![
        ("root".to_string(), ContextDef::Rules(vec![Entry::include("block")])),
        ("block".to_string(), ContextDef::Rules(block_rules())),
    ];
    for level in 1..=MAX_LEVEL {
        contexts.push((
            format!("section{level}"),
            ContextDef::Rules(section_rules(level)),
        ));
    }
    contexts
}

fn block_rules() -> Vec<BlockEntry> {
    vec![
        BlockSpec::new("(?:{{blank}})+")
            .kind("blank")
            .suppress()
            .into(),
        BlockSpec::new(r"```([^\n`]*)\n(?s:(.*?)\n)??```")
            .kind("codeblock")
            .flags("e")
            .produce(codeblock)
            .into(),
        BlockSpec::new(r"(-{3,}|={3,}|(?:- ){2,}-|(?:= ){2,}=|\.{3,}|:{3,})")
            .kind("separator")
            .flags("e")
            .produce(separator)
            .into(),
        BlockSpec::new(r"({{head}})([>+-]){{ws}}+([^\n]*)")
            .kind("section")
            .flags("e")
            .when(Test::Flag(Flag::AllowSection))
            .push_with(|cap, _| format!("section{}", cap.get(1).len()))
            .produce(section)
            .into(),
        BlockSpec::new(r"({{head}}){{ws}}+([^\n]*?){{ws}}+#+")
            .kind("heading")
            .flags("e")
            .when(Test::Flag(Flag::HeaderAlign))
            .produce(|cap, _, scope| heading(cap, scope, true))
            .into(),
        BlockSpec::new(r"({{head}}){{ws}}+([^\n]*)")
            .kind("heading")
            .flags("e")
            .produce(|cap, _, scope| heading(cap, scope, false))
            .into(),
        BlockSpec::new(r">(?:\[(\w+)\])?{{ws}}?([^\n]*(?:\n[ \t]*[^ \t\n][^\n]*)*)")
            .kind("quote")
            .produce(quote)
            .into(),
        BlockSpec::new(TABLE)
            .kind("table")
            .flags("e")
            .when(Test::Flag(Flag::AllowTable))
            .produce(table)
            .into(),
        BlockSpec::new(r"(?:{{ws}}*{{marker}}{{ws}}+[^\n]*(?:\n|$))+")
            .kind("list")
            .produce(list)
            .into(),
        BlockSpec::new(r"(?:{{ws}}*[^\s:][^\n]*?{{ws}}+::{{ws}}+[^\n]*(?:\n|$))+")
            .kind("usages")
            .produce(usages)
            .into(),
        BlockSpec::new(r"::{{ws}}+([^\n]*)")
            .kind("inlinelist")
            .flags("e")
            .produce(inline_list)
            .into(),
        BlockSpec::fallback()
            .kind("paragraph")
            .when(Test::Flag(Flag::AllowSection))
            .push("inline")
            .prefix_before(r"\n", PARAGRAPH_END_SECTIONS)
            .produce(paragraph)
            .into(),
        BlockSpec::fallback()
            .kind("paragraph")
            .push("inline")
            .prefix_before(r"\n", PARAGRAPH_END)
            .produce(paragraph)
            .into(),
    ]
}

/// A section runs until a heading or section of its own level or above.
fn section_rules(level: usize) -> Vec<BlockEntry> {
    vec![
        BlockSpec::fallback()
            .kind("section-end")
            .followed_by(format!(r"#{{1,{level}}}[>+-]?[ \t]"))
            .flags("p")
            .suppress()
            .into(),
        Entry::include("block"),
    ]
}

/// Lines of `text` with the span each covers, newline included, starting
/// at offset `start`.
fn lines_at(text: &str, start: usize) -> impl Iterator<Item = (Range<usize>, &str)> {
    text.split_inclusive('\n').scan(start, |at, line| {
        let span = *at..*at + line.len();
        *at += line.len();
        Some((span, line.trim_end_matches('\n')))
    })
}

fn codeblock(cap: &Capture, _: Vec<Token>, scope: &Scope<'_>) -> Result<Emit, LexError> {
    let lang = match cap.get(1).trim() {
        "" => scope.config().default_lang.as_str(),
        lang => lang,
    };
    Ok(Emit::Node(
        Node::new("")
            .with_attr("lang", lang)
            .with_text(cap.get(2)),
    ))
}

fn separator(cap: &Capture, _: Vec<Token>, _: &Scope<'_>) -> Result<Emit, LexError> {
    let mark = cap.get(1);
    let thick = mark.starts_with(['=', ':']);
    let style = if mark.contains(' ') {
        "dashed"
    } else if mark.starts_with(['.', ':']) {
        "dotted"
    } else {
        "normal"
    };
    Ok(Emit::Node(
        Node::new("")
            .with_attr("thick", thick)
            .with_attr("style", style),
    ))
}

fn heading(cap: &Capture, scope: &Scope<'_>, center: bool) -> Result<Emit, LexError> {
    Ok(Emit::Node(
        Node::new("")
            .with_attr("level", cap.get(1).len())
            .with_text(scope.inline(cap.get(2).trim())?)
            .with_attr("center", center),
    ))
}

fn section(cap: &Capture, content: Vec<Token>, scope: &Scope<'_>) -> Result<Emit, LexError> {
    let open = match cap.get(2) {
        "+" => true,
        "-" => false,
        _ => scope.config().section_open,
    };
    Ok(Emit::Node(
        Node::new("")
            .with_attr("level", cap.get(1).len())
            .with_text(scope.inline(cap.get(3).trim())?)
            .with_attr("open", open)
            .with_content(content),
    ))
}

// Continuation lines lose one leading `>`; the first line already has.
fn quote(cap: &Capture, _: Vec<Token>, scope: &Scope<'_>) -> Result<Emit, LexError> {
    let raw = cap.get(2);
    let mut at = cap.end() - raw.len();
    let mut lines = Vec::new();
    for (i, line) in raw.split('\n').enumerate() {
        let mark = match i {
            0 => 0,
            _ => QUOTE_MARK.find(line).map_or(0, |mark| mark.end()),
        };
        lines.push((at + mark, &line[mark..]));
        at += line.len() + 1;
    }
    Ok(Emit::Node(
        Node::new("")
            .with_attr("style", cap.group(1).unwrap_or("normal"))
            .with_content(scope.parse_lines(&lines)?),
    ))
}

struct Column {
    align: &'static str,
    bold: bool,
}

impl Column {
    fn parse(cell: &str) -> Self {
        let left = cell.starts_with(':');
        let right = cell.ends_with(':');
        let align = match (left, right) {
            (true, true) => "center",
            (false, true) => "right",
            _ => "left",
        };
        Self {
            align,
            bold: cell.contains('='),
        }
    }
}

/// A trimmed cell and where it sits in its line.
struct Cell<'a> {
    text: &'a str,
    span: Range<usize>,
}

/// Cells of a `|`-separated line; `\|` does not split and outer pipes are
/// optional.
fn split_cells(line: &str) -> Vec<Cell<'_>> {
    let lead = line.len() - line.trim_start().len();
    let body = line.trim();

    let mut ranges = Vec::new();
    let mut from = 0;
    let mut escaped = false;
    for (i, ch) in body.char_indices() {
        if ch == '|' && !escaped {
            ranges.push(from..i);
            from = i + 1;
        }
        escaped = ch == '\\' && !escaped;
    }
    ranges.push(from..body.len());
    if body.starts_with('|') {
        ranges.remove(0);
    }
    if ranges.len() > 1 && ranges.last().is_some_and(|last| last.is_empty()) {
        ranges.pop();
    }

    ranges
        .into_iter()
        .map(|range| {
            let raw = &body[range.clone()];
            let text = raw.trim();
            let start = lead + range.start + (raw.len() - raw.trim_start().len());
            Cell {
                text,
                span: start..start + text.len(),
            }
        })
        .collect()
}

fn table_row(
    (span, line): (Range<usize>, &str),
    head: bool,
    columns: &[Column],
    scope: &Scope<'_>,
) -> Result<Token, LexError> {
    let cells = split_cells(line);
    let line_end = span.start + line.len();
    let content = columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            // Missing cells are empty, at the end of the line.
            let (text, at) = match cells.get(i) {
                Some(cell) => {
                    let at = span.start + cell.span.start..span.start + cell.span.end;
                    (cell.text, at)
                }
                None => ("", line_end..line_end),
            };
            let cell = Node::new("table-cell")
                .with_text(scope.inline(text)?)
                .with_attr("align", column.align)
                .with_attr("bold", column.bold);
            Ok(Token::Node(scope.bounded(cell, at)))
        })
        .collect::<Result<_, LexError>>()?;
    let row = Node::new("table-row")
        .with_attr("head", head)
        .with_content(content);
    Ok(Token::Node(scope.bounded(row, span)))
}

fn table(cap: &Capture, _: Vec<Token>, scope: &Scope<'_>) -> Result<Emit, LexError> {
    let mut lines = lines_at(&cap.text, cap.start);
    let (Some(head), Some((_, align))) = (lines.next(), lines.next()) else {
        return Ok(Emit::Nothing);
    };
    let columns: Vec<Column> = split_cells(align)
        .iter()
        .map(|cell| Column::parse(cell.text))
        .collect();
    let mut rows = vec![table_row(head, true, &columns, scope)?];
    for line in lines.filter(|(_, line)| !line.trim().is_empty()) {
        rows.push(table_row(line, false, &columns, scope)?);
    }
    Ok(Emit::Node(
        Node::new("")
            .with_attr("cols", columns.len())
            .with_content(rows),
    ))
}

struct Item {
    indent: usize,
    ordered: bool,
    text: String,
    span: Range<usize>,
}

fn width(indent: &str) -> usize {
    indent
        .chars()
        .map(|ch| if ch == '\t' { TAB_WIDTH } else { 1 })
        .sum()
}

/// Builds the list starting at `items[*pos]`, nesting deeper items under
/// the item before them.
fn nest(items: &[Item], pos: &mut usize, depth: usize, scope: &Scope<'_>) -> Node {
    let first = &items[*pos];
    let indent = first.indent;
    let start = first.span.start;
    let list = Node::new("list")
        .with_attr("ordered", first.ordered)
        .with_attr("indent", depth);

    let mut children: Vec<Token> = Vec::new();
    while let Some(item) = items.get(*pos) {
        if item.indent < indent {
            break;
        }
        if item.indent > indent {
            let sub = nest(items, pos, depth + 1, scope);
            if let Some(Token::Node(last)) = children.last_mut() {
                last.end = sub.end.or(last.end);
                last.content.get_or_insert_with(Vec::new).push(Token::Node(sub));
            }
            continue;
        }
        let node = Node::new("list-item").with_text(item.text.clone());
        children.push(Token::Node(scope.bounded(node, item.span.clone())));
        *pos += 1;
    }

    let end = pos
        .checked_sub(1)
        .and_then(|last| items.get(last))
        .map_or(start, |last| last.span.end);
    scope.bounded(list.with_content(children), start..end)
}

fn list(cap: &Capture, _: Vec<Token>, scope: &Scope<'_>) -> Result<Emit, LexError> {
    let mut items = Vec::new();
    for (span, line) in lines_at(&cap.text, cap.start) {
        if let Some(item) = LIST_ITEM.captures(line) {
            items.push(Item {
                indent: width(&item[1]),
                ordered: item[2].ends_with('.'),
                text: scope.inline(item[3].trim())?,
                span,
            });
        }
    }
    let Some(floor) = items.first().map(|item| item.indent) else {
        return Ok(Emit::Nothing);
    };
    for item in &mut items {
        item.indent = item.indent.max(floor);
    }
    Ok(Emit::Node(nest(&items, &mut 0, 0, scope)))
}

fn usages(cap: &Capture, _: Vec<Token>, scope: &Scope<'_>) -> Result<Emit, LexError> {
    let mut content = Vec::new();
    for (span, line) in lines_at(&cap.text, cap.start) {
        let Some(usage) = USAGE.captures(line) else {
            continue;
        };
        let node = Node::new("usage")
            .with_text(scope.inline(usage[1].trim())?)
            .with_attr("desc", scope.inline(usage[2].trim())?);
        content.push(Token::Node(scope.bounded(node, span)));
    }
    Ok(Emit::Node(Node::new("").with_content(content)))
}

fn inline_list(cap: &Capture, _: Vec<Token>, scope: &Scope<'_>) -> Result<Emit, LexError> {
    let body = cap.get(1);
    let after_mark = &cap.text[2..];
    let at = cap.start + cap.text.len() - after_mark.trim_start().len();
    let items = split_cells(body)
        .into_iter()
        .filter(|cell| !cell.text.is_empty())
        .map(|cell| {
            let item = Node::new("list-item").with_text(scope.inline(cell.text)?);
            let span = at + cell.span.start..at + cell.span.end;
            Ok(Token::Node(scope.bounded(item, span)))
        })
        .collect::<Result<_, LexError>>()?;
    Ok(Emit::Node(Node::new("").with_content(items)))
}

fn paragraph(_: &Capture, content: Vec<Token>, _: &Scope<'_>) -> Result<Emit, LexError> {
    let text = text_of(&content);
    let text = text.trim();
    if text.is_empty() {
        return Ok(Emit::Nothing);
    }
    Ok(Emit::Node(Node::new("").with_text(text)))
}
