//! The matching loop shared by [`DocumentLexer`] and [`InlineLexer`].
//!
//! Each call owns its own [`State`]; a push is a plain recursive call, so
//! nested invocations never see each other's cursor or buffers.
//!
//! [`DocumentLexer`]: super::DocumentLexer
//! [`InlineLexer`]: super::InlineLexer

use marklex_config::Config;
use std::ops::Range;

use super::{
    capture::Capture,
    error::LexError,
    rule::Rule,
    token::Token,
};

/// Characters of unconsumed input shown in an endless-loop error.
const PREVIEW_LEN: usize = 24;

/// The outcome of one invocation: how much input it consumed and what it
/// produced.
#[derive(Debug)]
pub(crate) struct Run<O> {
    pub index: usize,
    pub output: O,
}

/// The flavor-specific half of the loop.
pub(crate) trait Machine {
    type Producer;
    type Output: Default;

    fn config(&self) -> &Config;

    /// Appends characters that matched no rule.
    fn flush(&mut self, output: &mut Self::Output, text: String, span: Range<usize>);

    /// Runs the sub-context of `rule` on `rest`, if it has one.
    fn descend(
        &mut self,
        rule: &Rule<Self::Producer>,
        capture: &Capture,
        rest: &str,
        index: usize,
    ) -> Result<Option<Run<Vec<Token>>>, LexError>;

    fn emit(
        &mut self,
        rule: &Rule<Self::Producer>,
        capture: Capture,
        content: Option<Vec<Token>>,
        span: Range<usize>,
        output: &mut Self::Output,
    ) -> Result<(), LexError>;
}

struct State<O> {
    index: usize,
    unmatch: String,
    unmatch_start: usize,
    output: O,
}

impl<O> State<O> {
    fn flush<M>(&mut self, machine: &mut M, base: usize)
    where
        M: Machine<Output = O>,
    {
        if self.unmatch.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.unmatch);
        let span = base + self.unmatch_start..base + self.unmatch_start + text.len();
        machine.flush(&mut self.output, text, span);
    }
}

pub(crate) fn preview(rest: &str) -> String {
    rest.chars().take(PREVIEW_LEN).collect()
}

/// Lexes `source` with `rules` until the input ends or a rule pops.
///
/// `base` is the absolute offset of `source` in the whole input.
pub(crate) fn run<M: Machine>(
    machine: &mut M,
    rules: &[Rule<M::Producer>],
    context: &str,
    source: &str,
    base: usize,
    top_level: bool,
) -> Result<Run<M::Output>, LexError> {
    let mut state = State {
        index: 0,
        unmatch: String::new(),
        unmatch_start: 0,
        output: M::Output::default(),
    };

    'input: while state.index < source.len() {
        let rest = &source[state.index..];

        for rule in rules {
            if (rule.flags.top && !top_level) || (rule.flags.begin && state.index != 0) {
                continue;
            }
            if !rule.test.passes(machine.config()) {
                continue;
            }
            let Some(caps) = rule.pattern.captures(rest) else {
                continue;
            };
            let len = caps.get(0).map_or(0, |m| m.end());
            if let Some(lookahead) = &rule.lookahead
                && !lookahead.is_match(&rest[len..])
            {
                continue;
            }

            let start = base + state.index;
            let capture = Capture::from_regex(&caps, start);
            state.index += len;
            let popping = rule.pop.applies(&capture);

            let content = machine
                .descend(rule, &capture, &source[state.index..], base + state.index)?
                .map(|pushed| {
                    state.index += pushed.index;
                    pushed.output
                });

            if !popping && base + state.index == start {
                return Err(LexError::EndlessLoop {
                    context: context.to_string(),
                    preview: preview(rest),
                });
            }

            state.flush(machine, base);
            let end = base + state.index;
            machine.emit(rule, capture, content, start..end, &mut state.output)?;

            if popping {
                break 'input;
            }
            continue 'input;
        }

        // No rule applies here: keep the character for the next flush.
        if let Some(ch) = rest.chars().next() {
            if state.unmatch.is_empty() {
                state.unmatch_start = state.index;
            }
            state.unmatch.push(ch);
            state.index += ch.len_utf8();
        }
    }

    state.flush(machine, base);
    Ok(Run {
        index: state.index,
        output: state.output,
    })
}
