//! # Lexer Engine
//!
//! A grammar is a set of named **contexts**. A context is an ordered list of
//! rules, or an [`InlineLexer`] that produces a string instead of tokens.
//!
//! ## Matching
//!
//! At every cursor position the rules of the active context are tried in
//! declaration order and the **first** one that applies wins. Rule order is
//! the only precedence mechanism; there is no longest-match.
//!
//! A rule may push a sub-context. The sub-context runs on the remaining
//! input until one of its rules pops (or the input ends), and whatever it
//! produced becomes the content of the pushing rule's token.
//!
//! Characters no rule accepts are collected and flushed as a plain text
//! token right before the next emitted token, so nothing is ever dropped.
//! A rule that matches nothing, pushes nothing useful and does not pop is
//! reported as an endless loop instead of hanging.
//!
//! ## Modules
//!
//! - **`rule`**: declarative [`RuleSpec`]s and their compiled form
//! - **`engine`**: the matching loop shared by both lexer flavors
//! - **`registry`**: named contexts, include flattening, forks
//! - **`inline`**: [`InlineLexer`], the flat string-producing flavor
//! - **`document`**: [`DocumentLexer`], the token-tree flavor

pub mod capture;
pub mod document;
mod engine;
pub mod error;
pub mod inline;
pub mod registry;
pub mod rule;
pub mod token;

pub use capture::Capture;
pub use document::{DocumentLexer, DocumentOptions, Lexed, MAX_DEPTH, Scope};
pub use error::{LexError, TracedError};
pub use inline::InlineLexer;
pub use registry::{ContextDef, ContextId, Reason, TraceEntry};
pub use rule::{
    BlockEntry, BlockProducer, BlockRule, BlockSpec, Boundary, Entry, Flags, Inner, InlineEntry,
    InlineProducer, InlineRule, InlineSpec, Macros, Pop, PushSpec, Rule, RuleSpec, Target, Test,
    TokenSpec,
};
pub use token::{Attr, Emit, Node, Token, text_of};
