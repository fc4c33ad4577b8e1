//! # Document Lexer
//!
//! Runs a grammar of named block contexts over a whole document and returns
//! a token tree. Inline contexts are delegated to their [`InlineLexer`] and
//! contribute a single text token.
//!
//! Every context entered during a call is recorded in a trail. When lexing
//! fails, the trail at the point of failure is returned with the error as a
//! [`TracedError`].

use log::trace;
use marklex_config::Config;
use std::cell::RefCell;
use std::ops::Range;

use super::{
    capture::Capture,
    engine::{self, Machine, Run},
    error::{LexError, TracedError},
    inline::InlineLexer,
    registry::{Context, ContextDef, ContextId, Reason, Registry, Resolved, TraceEntry},
    rule::{BlockProducer, BlockRule, Macros, Target, TokenSpec},
    token::{Emit, Node, Token},
};

/// Construction options of a [`DocumentLexer`].
#[derive(Debug, Clone)]
pub struct DocumentOptions {
    pub macros: Macros,
    /// Context `parse` starts in.
    pub entry: String,
    /// Context `inline` delegates to.
    pub inline: String,
    pub config: Config,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        Self {
            macros: Macros::default(),
            entry: "root".to_string(),
            inline: "inline".to_string(),
            config: Config::default(),
        }
    }
}

/// Result of a top-level run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexed {
    /// Bytes consumed; equals the normalized input length unless the entry
    /// context popped early.
    pub index: usize,
    pub tokens: Vec<Token>,
}

pub struct DocumentLexer {
    registry: Registry,
    entry: ContextId,
    inline: String,
    config: Config,
}

impl DocumentLexer {
    pub fn new<I, S>(contexts: I, options: DocumentOptions) -> Result<Self, TracedError>
    where
        I: IntoIterator<Item = (S, ContextDef)>,
        S: Into<String>,
    {
        let contexts = contexts
            .into_iter()
            .map(|(name, def)| (name.into(), def))
            .collect();
        let registry = Registry::build(contexts, &options.macros)?;
        let entry = registry.lookup(&options.entry).map_err(TracedError::from)?;
        Ok(Self {
            registry,
            entry,
            inline: options.inline,
            config: options.config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Lexes `source` from `context`, or from the entry context.
    pub fn run(&self, source: &str, context: Option<&str>) -> Result<Lexed, TracedError> {
        let source = source.replace("\r\n", "\n");
        let id = match context {
            Some(name) => self.registry.lookup(name).map_err(TracedError::from)?,
            None => self.entry,
        };
        let mut session = Session::new(self);
        match session.enter(id, &source, 0, true, Reason::Entry) {
            Ok(run) => Ok(Lexed {
                index: run.index,
                tokens: run.output,
            }),
            Err(source) => Err(TracedError {
                source,
                trace: session.trace,
            }),
        }
    }

    pub fn parse(&self, source: &str) -> Result<Vec<Token>, TracedError> {
        Ok(self.run(source, None)?.tokens)
    }

    pub fn parse_in(&self, source: &str, context: &str) -> Result<Vec<Token>, TracedError> {
        Ok(self.run(source, Some(context))?.tokens)
    }

    /// Renders `source` with the default inline context.
    pub fn inline(&self, source: &str) -> Result<String, TracedError> {
        self.inline_in(source, &self.inline)
    }

    pub fn inline_in(&self, source: &str, context: &str) -> Result<String, TracedError> {
        let trace = vec![TraceEntry::new(context, Reason::Inline)];
        let traced = |source: LexError| TracedError {
            source,
            trace: trace.clone(),
        };
        let id = self.registry.lookup(context).map_err(traced)?;
        match &self.registry.slot(id).context {
            Context::Inline(lexer) => lexer.lex(source, &self.config).map_err(traced),
            Context::Rules(_) => Err(traced(LexError::NotInline {
                name: context.to_string(),
            })),
        }
    }
}

/// Contexts one call may have open at once, counting those opened by
/// producers through [`Scope::parse`].
pub const MAX_DEPTH: usize = 64;

/// What a block token producer can reach while it runs.
pub struct Scope<'a> {
    lexer: &'a DocumentLexer,
    trail: &'a [TraceEntry],
    /// Trail of a nested call that failed, outermost first.
    failed: RefCell<Option<Vec<TraceEntry>>>,
}

impl Scope<'_> {
    pub fn config(&self) -> &Config {
        &self.lexer.config
    }

    /// `node` with `span` as its bounds, when bounds are tracked.
    pub fn bounded(&self, mut node: Node, span: Range<usize>) -> Node {
        if self.lexer.config.require_bound {
            node.start = Some(span.start);
            node.end = Some(span.end);
        }
        node
    }

    /// Renders `source` with the default inline context.
    pub fn inline(&self, source: &str) -> Result<String, LexError> {
        self.lexer.inline(source).map_err(|err| {
            let mut trail = self.trail.to_vec();
            trail.extend(err.trace);
            self.failed.replace(Some(trail));
            err.source
        })
    }

    /// Block-parses `source` from the entry context. `base` is the offset
    /// of `source` in the whole input, used for bounds.
    pub fn parse(&self, source: &str, base: usize) -> Result<Vec<Token>, LexError> {
        let mut session = Session {
            lexer: self.lexer,
            trace: self.trail.to_vec(),
        };
        match session.enter(self.lexer.entry, source, base, false, Reason::Push) {
            Ok(run) => Ok(run.output),
            Err(err) => {
                self.failed.replace(Some(session.trace));
                Err(err)
            }
        }
    }

    /// Block-parses `lines` joined with newlines. Each line carries its
    /// absolute offset, so bounds point back into the input even when the
    /// lines were cut out of it.
    pub fn parse_lines(&self, lines: &[(usize, &str)]) -> Result<Vec<Token>, LexError> {
        let mut map = LineMap::default();
        let mut source = String::new();
        for (i, (at, line)) in lines.iter().enumerate() {
            if i > 0 {
                source.push('\n');
            }
            map.lines.push((source.len(), *at));
            source.push_str(line);
        }
        let mut tokens = self.parse(&source, 0)?;
        if self.lexer.config.require_bound {
            for token in &mut tokens {
                if let Token::Node(node) = token {
                    map.rebase(node);
                }
            }
        }
        Ok(tokens)
    }
}

/// Offsets in text joined from separate lines, mapped back to the input.
#[derive(Default)]
struct LineMap {
    /// Start of each line in the joined text and in the input.
    lines: Vec<(usize, usize)>,
}

impl LineMap {
    fn position(&self, at: usize) -> usize {
        let line = self.lines.partition_point(|(joined, _)| *joined <= at);
        match line.checked_sub(1).and_then(|i| self.lines.get(i)) {
            Some((joined, input)) => input + (at - joined),
            None => at,
        }
    }

    /// An end offset belongs to the line of the character before it.
    fn end(&self, at: usize) -> usize {
        match at.checked_sub(1) {
            Some(last) => self.position(last) + 1,
            None => self.position(at),
        }
    }

    fn rebase(&self, node: &mut Node) {
        let start = node.start.map(|at| self.position(at));
        node.end = node.end.map(|at| self.end(at).max(start.unwrap_or(0)));
        node.start = start;
        for child in node.content.iter_mut().flatten() {
            if let Token::Node(child) = child {
                self.rebase(child);
            }
        }
    }
}

/// One call into the document lexer.
struct Session<'a> {
    lexer: &'a DocumentLexer,
    trace: Vec<TraceEntry>,
}

impl<'a> Session<'a> {
    fn new(lexer: &'a DocumentLexer) -> Self {
        Self {
            lexer,
            trace: Vec::new(),
        }
    }

    fn enter(
        &mut self,
        id: ContextId,
        source: &str,
        base: usize,
        top_level: bool,
        reason: Reason,
    ) -> Result<Run<Vec<Token>>, LexError> {
        let lexer = self.lexer;
        let slot = lexer.registry.slot(id);
        let run = match &slot.context {
            Context::Rules(rules) => {
                self.open(&slot.name, reason, base)?;
                engine::run(self, rules, &slot.name, source, base, top_level)?
            }
            Context::Inline(inline) => {
                self.open(&slot.name, Reason::Inline, base)?;
                self.delegate(inline, source, base)?
            }
        };
        self.trace.pop();
        Ok(run)
    }

    fn open(&mut self, name: &str, reason: Reason, base: usize) -> Result<(), LexError> {
        if self.trace.len() >= MAX_DEPTH {
            return Err(LexError::TooDeep {
                context: name.to_string(),
                limit: MAX_DEPTH,
            });
        }
        trace!("entering context `{name}` ({reason}) at {base}");
        self.trace.push(TraceEntry::new(name, reason));
        Ok(())
    }

    fn delegate(
        &self,
        lexer: &InlineLexer,
        source: &str,
        base: usize,
    ) -> Result<Run<Vec<Token>>, LexError> {
        let run = lexer.run(source, base, false, &self.lexer.config)?;
        let output = if run.output.is_empty() {
            Vec::new()
        } else {
            vec![Token::Text(run.output)]
        };
        Ok(Run {
            index: run.index,
            output,
        })
    }

    /// Fills in what a producer left out: the rule's type and, when bounds
    /// are tracked, the span of the match.
    fn finish(&self, mut node: Node, kind: &str, span: &Range<usize>) -> Node {
        if node.kind.is_empty() {
            node.kind = kind.to_string();
        }
        if self.lexer.config.require_bound {
            stamp(&mut node, span);
        }
        node
    }
}

/// Sets bounds on `node` and on every nested node that has none yet.
fn stamp(node: &mut Node, span: &Range<usize>) {
    node.start.get_or_insert(span.start);
    node.end.get_or_insert(span.end);
    let inner = node.start.unwrap_or(span.start)..node.end.unwrap_or(span.end);
    for child in node.content.iter_mut().flatten() {
        if let Token::Node(child) = child {
            stamp(child, &inner);
        }
    }
}

impl Machine for Session<'_> {
    type Producer = BlockProducer;
    type Output = Vec<Token>;

    fn config(&self) -> &Config {
        &self.lexer.config
    }

    fn flush(&mut self, output: &mut Vec<Token>, text: String, _span: Range<usize>) {
        output.push(Token::Text(text));
    }

    fn descend(
        &mut self,
        rule: &BlockRule,
        capture: &Capture,
        rest: &str,
        index: usize,
    ) -> Result<Option<Run<Vec<Token>>>, LexError> {
        let Some(target) = &rule.push else {
            return Ok(None);
        };
        let run = match target {
            Target::Context(id) => self.enter(*id, rest, index, false, Reason::Push)?,
            Target::Dynamic {
                pick,
                prefix,
                strict,
            } => {
                let name = pick(capture, &self.lexer.config);
                match self
                    .lexer
                    .registry
                    .resolve_dynamic(&name, prefix.as_ref(), *strict)?
                {
                    Resolved::Slot(id) => self.enter(id, rest, index, false, Reason::Push)?,
                    Resolved::Fork(name, lexer) => {
                        self.open(&name, Reason::Inline, index)?;
                        let run = self.delegate(&lexer, rest, index)?;
                        self.trace.pop();
                        run
                    }
                }
            }
        };
        Ok(Some(run))
    }

    fn emit(
        &mut self,
        rule: &BlockRule,
        capture: Capture,
        content: Option<Vec<Token>>,
        span: Range<usize>,
        output: &mut Vec<Token>,
    ) -> Result<(), LexError> {
        let emitted = match &rule.token {
            TokenSpec::Suppressed => Emit::Nothing,
            TokenSpec::Literal(text) => Emit::Text(text.clone()),
            TokenSpec::Default => {
                let node = Node::new(&rule.kind);
                Emit::Node(match content {
                    Some(content) => node.with_content(content),
                    None => node.with_text(capture.text),
                })
            }
            TokenSpec::Computed(produce) => {
                let scope = Scope {
                    lexer: self.lexer,
                    trail: &self.trace,
                    failed: RefCell::new(None),
                };
                let produced = produce(&capture, content.unwrap_or_default(), &scope);
                let failed = scope.failed.into_inner();
                match produced {
                    Ok(emitted) => emitted,
                    Err(err) => {
                        if let Some(trail) = failed {
                            self.trace = trail;
                        }
                        return Err(err);
                    }
                }
            }
        };

        match emitted {
            Emit::Nothing => {}
            Emit::Text(text) => {
                if !text.is_empty() {
                    output.push(Token::Text(text));
                }
            }
            Emit::Node(node) => output.push(Token::Node(self.finish(node, &rule.kind, &span))),
            Emit::Many(tokens) => {
                let node = Node::new(&rule.kind).with_content(tokens);
                output.push(Token::Node(self.finish(node, &rule.kind, &span)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::rule::{BlockEntry, BlockSpec, Entry, InlineSpec, Test};
    use marklex_config::Flag;
    use pretty_assertions::assert_eq;

    fn text(s: &str) -> Token {
        Token::Text(s.to_string())
    }

    fn node(kind: &str, s: &str) -> Token {
        Token::Node(Node::new(kind).with_text(s))
    }

    fn rules(entries: Vec<BlockEntry>) -> ContextDef {
        ContextDef::Rules(entries)
    }

    fn lexer(contexts: Vec<(&str, ContextDef)>) -> DocumentLexer {
        DocumentLexer::new(contexts, DocumentOptions::default()).unwrap()
    }

    fn words() -> InlineLexer {
        InlineLexer::new(
            "words",
            vec![
                InlineSpec::new(r"\*(\w+)\*")
                    .inner()
                    .render(|cap| format!("<em>{}</em>", cap.inner()))
                    .into(),
                InlineSpec::new(r"\w+").into(),
            ],
            &Macros::default(),
        )
        .unwrap()
    }

    #[test]
    fn unmatched_text_is_flushed_before_next_token() {
        let lexer = lexer(vec![(
            "root",
            rules(vec![BlockSpec::new(r"\d+").kind("num").into()]),
        )]);
        let lexed = lexer.run("ab12c", None).unwrap();
        assert_eq!(lexed.tokens, vec![text("ab"), node("num", "12"), text("c")]);
        assert_eq!(lexed.index, 5);
    }

    #[test]
    fn zero_width_rule_without_pop_is_an_endless_loop() {
        let lexer = lexer(vec![(
            "root",
            rules(vec![BlockSpec::fallback().kind("nothing").into()]),
        )]);
        let err = lexer.parse("abc").unwrap_err();
        assert!(matches!(
            err.source,
            LexError::EndlessLoop { ref context, ref preview } if context == "root" && preview == "abc"
        ));
        assert_eq!(err.trace, vec![TraceEntry::new("root", Reason::Entry)]);
    }

    #[test]
    fn push_collects_content_until_pop() {
        let lexer = lexer(vec![
            (
                "root",
                rules(vec![BlockSpec::new(r"\(").kind("group").push("group").into()]),
            ),
            (
                "group",
                rules(vec![
                    BlockSpec::new(r"\)").flags("p").suppress().into(),
                    BlockSpec::new(r"\w+").kind("word").into(),
                    BlockSpec::new(" ").suppress().into(),
                ]),
            ),
        ]);
        let tokens = lexer.parse("(a b)c").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Node(
                    Node::new("group").with_content(vec![node("word", "a"), node("word", "b")])
                ),
                text("c"),
            ]
        );
    }

    #[test]
    fn anonymous_push_rules_get_their_own_context() {
        let lexer = lexer(vec![(
            "root",
            rules(vec![
                BlockSpec::new("<")
                    .kind("angle")
                    .push_rules(vec![
                        BlockSpec::new(">").flags("p").suppress().into(),
                        BlockSpec::new("[a-z]").kind("letter").into(),
                    ])
                    .into(),
            ]),
        )]);
        assert_eq!(lexer.registry().len(), 2);
        let tokens = lexer.parse("<ab>").unwrap();
        assert_eq!(tokens[0].as_node().unwrap().children().len(), 2);
    }

    #[test]
    fn producer_output_is_normalized() {
        let lexer = lexer(vec![(
            "root",
            rules(vec![
                BlockSpec::new("m")
                    .kind("many")
                    .produce(|_, _, _| Ok(Emit::Many(vec![text("x"), text("y")])))
                    .into(),
                BlockSpec::new("n")
                    .kind("named")
                    .produce(|cap, _, _| Ok(Emit::Node(Node::new("").with_text(&cap.text))))
                    .into(),
                BlockSpec::new("z").produce(|_, _, _| Ok(Emit::Nothing)).into(),
                BlockSpec::new("t").literal("T").into(),
            ]),
        )]);
        let tokens = lexer.parse("mnzt").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Node(Node::new("many").with_content(vec![text("x"), text("y")])),
                node("named", "n"),
                text("T"),
            ]
        );
    }

    #[test]
    fn rule_order_decides_precedence() {
        let first = lexer(vec![(
            "root",
            rules(vec![
                BlockSpec::new("a").kind("short").into(),
                BlockSpec::new("ab").kind("long").into(),
            ]),
        )]);
        assert_eq!(first.parse("ab").unwrap(), vec![node("short", "a"), text("b")]);

        let second = lexer(vec![(
            "root",
            rules(vec![
                BlockSpec::new("ab").kind("long").into(),
                BlockSpec::new("a").kind("short").into(),
            ]),
        )]);
        assert_eq!(second.parse("ab").unwrap(), vec![node("long", "ab")]);
    }

    #[test]
    fn begin_and_top_flags_restrict_matches() {
        let lexer = lexer(vec![
            (
                "root",
                rules(vec![
                    BlockSpec::new("x").kind("first").flags("b").into(),
                    BlockSpec::new("y").kind("top").flags("t").into(),
                    BlockSpec::new(r"\[").kind("nest").push("nest").into(),
                ]),
            ),
            (
                "nest",
                rules(vec![
                    BlockSpec::new(r"\]").flags("p").suppress().into(),
                    Entry::include("root"),
                ]),
            ),
        ]);
        let tokens = lexer.parse("xxy[xy]").unwrap();
        assert_eq!(
            tokens,
            vec![
                node("first", "x"),
                text("x"),
                node("top", "y"),
                Token::Node(
                    Node::new("nest").with_content(vec![node("first", "x"), text("y")])
                ),
            ]
        );
    }

    #[test]
    fn tests_consult_configuration() {
        let contexts = || {
            vec![(
                "root",
                rules(vec![
                    BlockSpec::new("a")
                        .kind("aligned")
                        .when(Test::Flag(Flag::HeaderAlign))
                        .into(),
                    BlockSpec::new("a").kind("plain").into(),
                ]),
            )]
        };
        let plain = DocumentLexer::new(contexts(), DocumentOptions::default()).unwrap();
        assert_eq!(plain.parse("a").unwrap(), vec![node("plain", "a")]);

        let options = DocumentOptions {
            config: Config {
                header_align: true,
                ..Config::default()
            },
            ..DocumentOptions::default()
        };
        let aligned = DocumentLexer::new(contexts(), options).unwrap();
        assert_eq!(aligned.parse("a").unwrap(), vec![node("aligned", "a")]);
    }

    #[test]
    fn including_an_inline_context_is_rejected() {
        let result = DocumentLexer::new(
            vec![
                ("root", rules(vec![Entry::include("words")])),
                ("words", ContextDef::Inline(words())),
            ],
            DocumentOptions::default(),
        );
        let err = result.err().unwrap();
        assert!(matches!(err.source, LexError::IncludeInline { ref name } if name == "words"));
        assert_eq!(
            err.trace,
            vec![
                TraceEntry::new("root", Reason::Entry),
                TraceEntry::new("words", Reason::Include),
            ]
        );
    }

    #[test]
    fn include_of_unknown_context_is_rejected() {
        let result = DocumentLexer::new(
            vec![("root", rules(vec![Entry::include("missing")]))],
            DocumentOptions::default(),
        );
        assert!(matches!(
            result.err().unwrap().source,
            LexError::UnknownContext { ref name } if name == "missing"
        ));
    }

    #[test]
    fn include_cycle_is_rejected() {
        let result = DocumentLexer::new(
            vec![
                ("root", rules(vec![Entry::include("a")])),
                ("a", rules(vec![Entry::include("root")])),
            ],
            DocumentOptions::default(),
        );
        assert!(matches!(
            result.err().unwrap().source,
            LexError::IncludeCycle { .. }
        ));
    }

    #[test]
    fn missing_entry_context_is_rejected() {
        let result = DocumentLexer::new(
            vec![("main", rules(vec![]))],
            DocumentOptions::default(),
        );
        assert!(matches!(
            result.err().unwrap().source,
            LexError::UnknownContext { ref name } if name == "root"
        ));
    }

    #[test]
    fn forks_are_shared_between_identical_requests() {
        let lexer = lexer(vec![
            (
                "root",
                rules(vec![
                    BlockSpec::new(">").kind("a").push("words").prefix(r"\n").into(),
                    BlockSpec::new("<").kind("b").push("words").prefix(r"\n").into(),
                    BlockSpec::new("!").kind("c").push("words").flags("s").into(),
                    BlockSpec::new(r"\n").suppress().into(),
                ]),
            ),
            ("words", ContextDef::Inline(words())),
        ]);
        assert_eq!(lexer.registry().fork_count(), 2);

        let tokens = lexer.parse(">*hi*\n<yo\n!ab cd").unwrap();
        let contents: Vec<&[Token]> = tokens
            .iter()
            .filter_map(Token::as_node)
            .map(Node::children)
            .collect();
        assert_eq!(
            contents,
            vec![
                &[text("<em>hi</em>")][..],
                &[text("yo")][..],
                &[text("ab")][..],
            ]
        );
        assert_eq!(tokens.last(), Some(&text(" cd")));
    }

    #[test]
    fn dynamic_push_resolves_at_match_time() {
        let lexer = lexer(vec![
            (
                "root",
                rules(vec![
                    BlockSpec::new(r"@(\w+):")
                        .kind("tagged")
                        .push_with(|cap, _| cap.get(1).to_string())
                        .into(),
                ]),
            ),
            ("upper", rules(vec![BlockSpec::new("[A-Z]+").kind("caps").flags("p").into()])),
        ]);
        let tokens = lexer.parse("@upper:AB").unwrap();
        assert_eq!(
            tokens,
            vec![Token::Node(Node::new("tagged").with_content(vec![node("caps", "AB")]))]
        );

        let err = lexer.parse("@lower:ab").unwrap_err();
        assert!(matches!(err.source, LexError::UnknownContext { ref name } if name == "lower"));
        assert_eq!(err.trace, vec![TraceEntry::new("root", Reason::Entry)]);
    }

    #[test]
    fn dynamic_push_into_inline_context_forks_at_match_time() {
        let lexer = lexer(vec![
            (
                "root",
                rules(vec![
                    BlockSpec::new("@")
                        .kind("tag")
                        .push_with(|_, _| "words".to_string())
                        .prefix(";")
                        .into(),
                ]),
            ),
            ("words", ContextDef::Inline(words())),
        ]);
        assert_eq!(lexer.registry().fork_count(), 0);

        let tokens = lexer.parse("@*a*;b").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Node(Node::new("tag").with_content(vec![text("<em>a</em>")])),
                text("b"),
            ]
        );
    }

    #[test]
    fn error_trail_names_nested_contexts() {
        let lexer = lexer(vec![
            ("root", rules(vec![BlockSpec::new("<").push("inner").into()])),
            ("inner", rules(vec![BlockSpec::fallback().kind("stuck").into()])),
        ]);
        let err = lexer.parse("<x").unwrap_err();
        assert_eq!(
            err.trace,
            vec![
                TraceEntry::new("root", Reason::Entry),
                TraceEntry::new("inner", Reason::Push),
            ]
        );
    }

    #[test]
    fn bounds_are_absolute_when_required() {
        let options = DocumentOptions {
            config: Config {
                require_bound: true,
                ..Config::default()
            },
            ..DocumentOptions::default()
        };
        let lexer = DocumentLexer::new(
            vec![
                (
                    "root",
                    rules(vec![BlockSpec::new(r"\(").kind("group").push("group").into()]),
                ),
                (
                    "group",
                    rules(vec![
                        BlockSpec::new(r"\)").flags("p").suppress().into(),
                        BlockSpec::new(r"\w+").kind("word").into(),
                    ]),
                ),
            ],
            options,
        )
        .unwrap();

        let tokens = lexer.parse("ab(cd)").unwrap();
        let group = tokens[1].as_node().unwrap();
        assert_eq!((group.start, group.end), (Some(2), Some(6)));
        let word = group.children()[0].as_node().unwrap();
        assert_eq!((word.start, word.end), (Some(3), Some(5)));
    }

    #[test]
    fn crlf_is_normalized() {
        let lexer = lexer(vec![(
            "root",
            rules(vec![BlockSpec::new(r"\n").kind("nl").into()]),
        )]);
        let lexed = lexer.run("a\r\nb", None).unwrap();
        assert_eq!(lexed.index, 3);
        assert_eq!(lexed.tokens, vec![text("a"), node("nl", "\n"), text("b")]);
    }

    #[test]
    fn inline_delegates_to_inline_context() {
        let lexer = lexer(vec![
            ("root", rules(vec![])),
            ("inline", ContextDef::Inline(words())),
        ]);
        assert_eq!(lexer.inline("*a* b").unwrap(), "<em>a</em> b");

        let err = lexer.inline_in("x", "root").unwrap_err();
        assert!(matches!(err.source, LexError::NotInline { .. }));
        assert_eq!(err.trace, vec![TraceEntry::new("root", Reason::Inline)]);
    }

    #[test]
    fn producers_can_reparse_through_scope() {
        let lexer = lexer(vec![
            (
                "root",
                rules(vec![
                    BlockSpec::new(r"\{([^}]*)\}")
                        .kind("nested")
                        .produce(|cap, _, scope| {
                            let inner = scope.parse(cap.get(1), cap.start + 1)?;
                            Ok(Emit::Many(inner))
                        })
                        .into(),
                    BlockSpec::new(r"\d").kind("digit").into(),
                    BlockSpec::new(r"_(\w+)_")
                        .kind("styled")
                        .produce(|cap, _, scope| {
                            Ok(Emit::Node(Node::new("").with_text(scope.inline(cap.get(1))?)))
                        })
                        .into(),
                ]),
            ),
            ("inline", ContextDef::Inline(words())),
        ]);
        let tokens = lexer.parse("{1}_ab_").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Node(Node::new("nested").with_content(vec![node("digit", "1")])),
                node("styled", "ab"),
            ]
        );
    }

    #[test]
    fn failure_inside_a_producer_keeps_the_outer_trail() {
        let lexer = lexer(vec![
            (
                "root",
                rules(vec![
                    BlockSpec::new(r"\{([^}]*)\}")
                        .kind("nested")
                        .produce(|cap, _, scope| {
                            Ok(Emit::Many(scope.parse(cap.get(1), cap.start + 1)?))
                        })
                        .into(),
                    BlockSpec::new("<").push("angle").into(),
                    BlockSpec::new("!").push("stuck").into(),
                ]),
            ),
            (
                "angle",
                rules(vec![
                    BlockSpec::new(">").flags("p").suppress().into(),
                    Entry::include("root"),
                ]),
            ),
            ("stuck", rules(vec![BlockSpec::fallback().kind("stuck").into()])),
        ]);
        let err = lexer.parse("<{!x}>").unwrap_err();
        assert!(matches!(
            err.source,
            LexError::EndlessLoop { ref context, .. } if context == "stuck"
        ));
        assert_eq!(
            err.trace,
            vec![
                TraceEntry::new("root", Reason::Entry),
                TraceEntry::new("angle", Reason::Push),
                TraceEntry::new("root", Reason::Push),
                TraceEntry::new("stuck", Reason::Push),
            ]
        );
    }

    #[test]
    fn nesting_deeper_than_the_cap_is_rejected() {
        let lexer = lexer(vec![(
            "root",
            rules(vec![BlockSpec::new(r"\(").kind("group").push("root").into()]),
        )]);
        assert!(lexer.parse(&"(".repeat(MAX_DEPTH - 1)).is_ok());

        let err = lexer.parse(&"(".repeat(MAX_DEPTH * 2)).unwrap_err();
        assert!(matches!(err.source, LexError::TooDeep { limit, .. } if limit == MAX_DEPTH));
        assert_eq!(err.trace.len(), MAX_DEPTH);
    }

    #[test]
    fn parse_lines_maps_bounds_back_to_each_line() {
        let options = DocumentOptions {
            config: Config {
                require_bound: true,
                ..Config::default()
            },
            ..DocumentOptions::default()
        };
        let lexer = DocumentLexer::new(
            vec![(
                "root",
                rules(vec![
                    BlockSpec::new(r"\[([^\]]*)\]")
                        .kind("box")
                        .produce(|cap, _, scope| {
                            // Every line of the body is prefixed with `|`.
                            let mut lines = Vec::new();
                            let mut at = cap.start + 1;
                            for line in cap.get(1).split('\n') {
                                let body = line.strip_prefix('|').unwrap_or(line);
                                lines.push((at + line.len() - body.len(), body));
                                at += line.len() + 1;
                            }
                            Ok(Emit::Many(scope.parse_lines(&lines)?))
                        })
                        .into(),
                    BlockSpec::new(r"\w+").kind("word").into(),
                    BlockSpec::new(r"\s+").suppress().into(),
                ]),
            )],
            options,
        )
        .unwrap();

        let tokens = lexer.parse("[|ab\n|cd]").unwrap();
        let boxed = tokens[0].as_node().unwrap();
        assert_eq!((boxed.start, boxed.end), (Some(0), Some(9)));
        let bounds: Vec<_> = boxed
            .children()
            .iter()
            .filter_map(Token::as_node)
            .map(|word| (word.start, word.end))
            .collect();
        assert_eq!(bounds, vec![(Some(2), Some(4)), (Some(6), Some(8))]);
    }
}
