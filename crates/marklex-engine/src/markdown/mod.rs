//! # Markdown-like Grammar
//!
//! A consumer of the lexer engine. It supplies the block contexts, the
//! inline grammar and a detokenizer for a small Markdown dialect with
//! collapsible sections, styled quotes and aligned tables.
//!
//! ## Token Types
//!
//! | type        | attributes                      | content          |
//! |-------------|---------------------------------|------------------|
//! | `heading`   | `level`, `text`, `center`       |                  |
//! | `section`   | `level`, `text`, `open`         | blocks           |
//! | `quote`     | `style`                         | blocks           |
//! | `separator` | `thick`, `style`                |                  |
//! | `codeblock` | `lang`, `text`                  |                  |
//! | `list`      | `ordered`, `indent`             | `list-item`s     |
//! | `list-item` | `text`                          | nested `list`s   |
//! | `table`     | `cols`                          | `table-row`s     |
//! | `table-row` | `head`                          | `table-cell`s    |
//! | `table-cell`| `text`, `align`, `bold`         |                  |
//! | `usages`    |                                 | `usage`s         |
//! | `usage`     | `text`, `desc`                  |                  |
//! | `inlinelist`|                                 | `list-item`s     |
//! | `paragraph` | `text`                          |                  |
//!
//! Every `text` and `desc` attribute holds inline markup already rendered
//! to HTML.

mod block;
mod detokenize;
mod inline;

pub use detokenize::{canonical_kind, detokenize, same_shape};
pub use inline::{escape, inline_lexer};

use crate::lexer::{ContextDef, DocumentLexer, DocumentOptions, TracedError};
use marklex_config::Config;

/// Builds the document lexer for the grammar under `config`.
pub fn lexer(config: Config) -> Result<DocumentLexer, TracedError> {
    let mut contexts = block::contexts();
    contexts.push(("inline".to_string(), ContextDef::Inline(inline_lexer()?)));
    DocumentLexer::new(
        contexts,
        DocumentOptions {
            macros: block::macros()?,
            config,
            ..DocumentOptions::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_section_level_has_a_context() {
        let lexer = lexer(Config::default()).unwrap();
        for level in 1..=block::MAX_LEVEL {
            assert!(lexer.registry().lookup(&format!("section{level}")).is_ok());
        }
        // One paragraph fork with sections allowed, one without.
        assert_eq!(lexer.registry().fork_count(), 2);
    }
}
