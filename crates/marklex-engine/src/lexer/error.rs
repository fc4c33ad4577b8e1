use thiserror::Error;

use super::registry::TraceEntry;

/// Errors raised while building a grammar or lexing with it.
///
/// None of them are recoverable for the current call: a failed parse has no
/// partial result.
#[derive(Debug, Error)]
pub enum LexError {
    #[error("invalid flag `{flag}` on rule `{kind}`")]
    InvalidFlag { flag: char, kind: String },

    #[error("invalid pattern `{pattern}` on rule `{kind}`: {source}")]
    InvalidPattern {
        kind: String,
        pattern: String,
        source: regex::Error,
    },

    #[error("unknown macro `{name}`")]
    UnknownMacro { name: String },

    #[error("context `{name}` does not exist")]
    UnknownContext { name: String },

    #[error("context `{name}` is an inline lexer and cannot be included")]
    IncludeInline { name: String },

    #[error("context `{name}` includes itself")]
    IncludeCycle { name: String },

    #[error("include of `{name}` cannot be resolved outside a document grammar")]
    UnresolvedInclude { name: String },

    #[error("context `{name}` is not an inline lexer")]
    NotInline { name: String },

    #[error("inline rule `{kind}` cannot push a context")]
    InlinePush { kind: String },

    #[error("endless loop in context `{context}` at {preview:?}")]
    EndlessLoop { context: String, preview: String },

    #[error("context `{context}` is nested more than {limit} levels deep")]
    TooDeep { context: String, limit: usize },
}

/// A [`LexError`] together with the contexts that were active when it
/// happened, outermost first.
#[derive(Debug, Error)]
#[error("{source} (context trail: {})", render_trace(.trace))]
pub struct TracedError {
    pub source: LexError,
    pub trace: Vec<TraceEntry>,
}

impl From<LexError> for TracedError {
    fn from(source: LexError) -> Self {
        Self {
            source,
            trace: Vec::new(),
        }
    }
}

fn render_trace(trace: &[TraceEntry]) -> String {
    if trace.is_empty() {
        return "empty".to_string();
    }
    trace
        .iter()
        .map(|entry| format!("{} ({})", entry.name, entry.reason))
        .collect::<Vec<_>>()
        .join(" > ")
}
