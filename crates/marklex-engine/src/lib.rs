//! # marklex-engine
//!
//! A rule-driven, context-switching lexer and the Markdown-like grammar built
//! on top of it.
//!
//! ## Architecture Overview
//!
//! ```text
//! RuleSpec ─compile─▶ Rule ─┐
//!                           ├─▶ Registry (named contexts, forks) ─▶ DocumentLexer ─▶ Vec<Token>
//! InlineLexer (flat rules) ─┘                                      └▶ InlineLexer ─▶ String
//! ```
//!
//! - [`lexer`] holds the engine: rule compilation, the first-match loop,
//!   the context registry and both lexer flavors.
//! - [`markdown`] is a consumer of the engine: it supplies rule tables for a
//!   Markdown-like language, renders inline spans to an HTML subset, and can
//!   turn a token tree back into markup.
//!
//! ## Quick Start
//!
//! ```
//! use marklex_engine::{markdown, Config};
//!
//! let lexer = markdown::lexer(Config::default()).unwrap();
//! let tokens = lexer.parse("# Title\n\nSome **bold** text").unwrap();
//! assert_eq!(tokens.len(), 2);
//! ```

pub mod lexer;
pub mod markdown;

pub use lexer::{
    BlockEntry, BlockSpec, Boundary, Capture, ContextDef, DocumentLexer, DocumentOptions, Emit,
    Entry, InlineEntry, InlineLexer, InlineSpec, LexError, Lexed, MAX_DEPTH, Macros, Node,
    RuleSpec, Scope, Test, Token, TracedError,
};
pub use marklex_config::{Config, Flag};
