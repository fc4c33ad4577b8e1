//! # Inline Lexer
//!
//! A single flat rule list whose output is a string. There is no context
//! stack: nested styling is handled by re-lexing a rule's inner group with
//! the same lexer (see [`RuleSpec::inner`]).
//!
//! [`RuleSpec::inner`]: super::rule::RuleSpec::inner

use marklex_config::Config;
use std::ops::Range;

use super::{
    capture::Capture,
    engine::{self, Machine, Run, preview},
    error::LexError,
    rule::{
        Boundary, Inner, InlineEntry, InlineProducer, InlineRule, InlineSpec, Macros, PushRequest,
        Target, TokenSpec,
    },
    token::Token,
};

#[derive(Clone)]
pub struct InlineLexer {
    name: String,
    rules: Vec<InlineRule>,
}

fn refuse_push(request: PushRequest) -> Result<Target, LexError> {
    Err(LexError::InlinePush { kind: request.kind })
}

impl InlineLexer {
    pub fn new(
        name: impl Into<String>,
        entries: Vec<InlineEntry>,
        macros: &Macros,
    ) -> Result<Self, LexError> {
        let rules = entries
            .into_iter()
            .map(|entry| entry.compile(macros, &mut refuse_push))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            name: name.into(),
            rules,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[InlineRule] {
        &self.rules
    }

    /// Lexes a complete string.
    pub fn lex(&self, source: &str, config: &Config) -> Result<String, LexError> {
        let source = source.replace("\r\n", "\n");
        Ok(self.run(&source, 0, true, config)?.output)
    }

    pub(crate) fn run(
        &self,
        source: &str,
        base: usize,
        top_level: bool,
        config: &Config,
    ) -> Result<Run<String>, LexError> {
        let mut machine = InlineMachine {
            lexer: self,
            config,
        };
        engine::run(&mut machine, &self.rules, &self.name, source, base, top_level)
    }

    /// A copy of this lexer that pops on `prefix` before trying its own
    /// rules and, when `strict`, pops instead of collecting a character no
    /// rule accepts. Neither boundary consumes more than the prefix pattern.
    pub fn fork(&self, prefix: Option<&Boundary>, strict: bool) -> Result<Self, LexError> {
        let macros = Macros::default();
        let mut rules = Vec::with_capacity(self.rules.len() + 2);
        if let Some(prefix) = prefix {
            let mut guard = InlineSpec::new(prefix.pattern.as_str())
                .kind("fork-prefix")
                .flags("p")
                .suppress();
            if let Some(next) = &prefix.followed_by {
                guard = guard.followed_by(next.as_str());
            }
            rules.push(guard.compile(&macros, &mut refuse_push)?);
        }
        rules.extend(self.rules.iter().cloned());
        if strict {
            rules.push(
                InlineSpec::fallback()
                    .kind("fork-strict")
                    .followed_by("(?s).")
                    .flags("p")
                    .suppress()
                    .compile(&macros, &mut refuse_push)?,
            );
        }
        Ok(Self {
            name: self.name.clone(),
            rules,
        })
    }
}

struct InlineMachine<'a> {
    lexer: &'a InlineLexer,
    config: &'a Config,
}

impl InlineMachine<'_> {
    fn relex_inner(&self, rule: &InlineRule, capture: &mut Capture) -> Result<(), LexError> {
        let group = match rule.inner {
            Inner::None => return Ok(()),
            Inner::Last => capture.last_group(),
            Inner::Group(index) => capture.group(index),
        };
        let Some(group) = group.map(str::to_string) else {
            capture.inner = Some(String::new());
            return Ok(());
        };
        if group.len() == capture.text.len() {
            return Err(LexError::EndlessLoop {
                context: self.lexer.name.clone(),
                preview: preview(&group),
            });
        }
        capture.inner = Some(self.lexer.run(&group, 0, false, self.config)?.output);
        Ok(())
    }
}

impl Machine for InlineMachine<'_> {
    type Producer = InlineProducer;
    type Output = String;

    fn config(&self) -> &Config {
        self.config
    }

    fn flush(&mut self, output: &mut String, text: String, _span: Range<usize>) {
        output.push_str(&text);
    }

    fn descend(
        &mut self,
        _rule: &InlineRule,
        _capture: &Capture,
        _rest: &str,
        _index: usize,
    ) -> Result<Option<Run<Vec<Token>>>, LexError> {
        Ok(None)
    }

    fn emit(
        &mut self,
        rule: &InlineRule,
        mut capture: Capture,
        _content: Option<Vec<Token>>,
        _span: Range<usize>,
        output: &mut String,
    ) -> Result<(), LexError> {
        self.relex_inner(rule, &mut capture)?;
        match &rule.token {
            TokenSpec::Default => output.push_str(&capture.text),
            TokenSpec::Literal(text) => output.push_str(text),
            TokenSpec::Suppressed => {}
            TokenSpec::Computed(render) => output.push_str(&render(&capture)),
        }
        Ok(())
    }
}
