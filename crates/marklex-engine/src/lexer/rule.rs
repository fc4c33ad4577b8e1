//! Rule descriptions and the rule compiler.
//!
//! A [`RuleSpec`] is what grammar authors write. Compiling it resolves macros,
//! applies the flag string, anchors the pattern at the cursor and hands any
//! `push` to a resolver supplied by the caller (the context registry for
//! document grammars, a refusal for inline ones).

use marklex_config::{Config, Flag};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use super::{
    capture::Capture,
    document::Scope,
    error::LexError,
    registry::ContextId,
    token::{Emit, Token},
};

/// Type given to rules that don't name one.
pub const DEFAULT_KIND: &str = "default";

/// Appended by the `e` flag: trailing blanks, then a newline or the end.
const EOL_SUFFIX: &str = r"[ \t]*(?:\n|$)";

static MACRO_REF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").unwrap());

pub type BlockProducer =
    Arc<dyn Fn(&Capture, Vec<Token>, &Scope<'_>) -> Result<Emit, LexError> + Send + Sync>;
pub type InlineProducer = Arc<dyn Fn(&Capture) -> String + Send + Sync>;
pub type ConfigPredicate = Arc<dyn Fn(&Config) -> bool + Send + Sync>;
pub type PopPredicate = Arc<dyn Fn(&Capture) -> bool + Send + Sync>;
pub type ContextPicker = Arc<dyn Fn(&Capture, &Config) -> String + Send + Sync>;

pub type BlockSpec = RuleSpec<BlockProducer>;
pub type InlineSpec = RuleSpec<InlineProducer>;
pub type BlockRule = Rule<BlockProducer>;
pub type InlineRule = Rule<InlineProducer>;
pub type BlockEntry = Entry<BlockProducer>;
pub type InlineEntry = Entry<InlineProducer>;

/// Whether a rule is eligible under the current configuration.
#[derive(Clone)]
pub enum Test {
    Static(bool),
    Flag(Flag),
    NotFlag(Flag),
    Predicate(ConfigPredicate),
}

impl Test {
    pub fn passes(&self, config: &Config) -> bool {
        match self {
            Test::Static(value) => *value,
            Test::Flag(flag) => config.flag(*flag),
            Test::NotFlag(flag) => !config.flag(*flag),
            Test::Predicate(predicate) => predicate(config),
        }
    }
}

/// What a rule emits when it matches.
#[derive(Clone)]
pub enum TokenSpec<P> {
    /// A node of the rule's type: pushed content if the rule pushes,
    /// otherwise the matched text. Inline rules append the matched text.
    Default,
    /// Plain text, regardless of the match.
    Literal(String),
    /// Nothing.
    Suppressed,
    /// Whatever the producer returns.
    Computed(P),
}

/// Whether a match ends the current context.
#[derive(Clone)]
pub enum Pop {
    Static(bool),
    When(PopPredicate),
}

impl Pop {
    pub fn applies(&self, capture: &Capture) -> bool {
        match self {
            Pop::Static(value) => *value,
            Pop::When(predicate) => predicate(capture),
        }
    }
}

/// Which group an inline rule re-lexes into [`Capture::inner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inner {
    None,
    /// The last non-empty numbered group.
    Last,
    Group(usize),
}

/// The sub-context a rule enters, as written.
#[derive(Clone)]
pub enum PushSpec {
    Named(String),
    /// An anonymous context declared in place.
    Rules(Vec<BlockEntry>),
    /// A context named at match time.
    Dynamic(ContextPicker),
}

/// Where a pushed inline context ends. `pattern` is consumed; when
/// `followed_by` is set, it must match right after and is left in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Boundary {
    pub pattern: String,
    pub followed_by: Option<String>,
}

impl Boundary {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            followed_by: None,
        }
    }

    pub fn before(mut self, pattern: impl Into<String>) -> Self {
        self.followed_by = Some(pattern.into());
        self
    }

    fn expand(self, macros: &Macros) -> Result<Self, LexError> {
        Ok(Self {
            pattern: macros.expand(&self.pattern)?,
            followed_by: self
                .followed_by
                .map(|next| macros.expand(&next))
                .transpose()?,
        })
    }
}

/// The sub-context a compiled rule enters.
#[derive(Clone)]
pub enum Target {
    Context(ContextId),
    Dynamic {
        pick: ContextPicker,
        prefix: Option<Boundary>,
        strict: bool,
    },
}

/// A `push` handed to the resolver during compilation.
pub struct PushRequest {
    pub spec: PushSpec,
    pub kind: String,
    pub prefix: Option<Boundary>,
    pub strict: bool,
}

pub type Resolver<'r> = dyn FnMut(PushRequest) -> Result<Target, LexError> + 'r;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    /// `p`: leave the context after this match.
    pub pop: bool,
    /// `b`: only match at the start of the context.
    pub begin: bool,
    /// `t`: only match in the outermost invocation.
    pub top: bool,
    /// `e`: the match must run to the end of the line.
    pub eol: bool,
    /// `i`: case-insensitive.
    pub ignore_case: bool,
    /// `s`: when pushing into an inline lexer, leave it on the first
    /// character it has no rule for.
    pub strict: bool,
}

impl Flags {
    pub fn parse(flags: &str, kind: &str) -> Result<Self, LexError> {
        let mut parsed = Self::default();
        for flag in flags.chars() {
            match flag {
                'p' => parsed.pop = true,
                'b' => parsed.begin = true,
                't' => parsed.top = true,
                'e' => parsed.eol = true,
                'i' => parsed.ignore_case = true,
                's' => parsed.strict = true,
                other => {
                    return Err(LexError::InvalidFlag {
                        flag: other,
                        kind: kind.to_string(),
                    });
                }
            }
        }
        Ok(parsed)
    }
}

/// A pattern as written: source text or an already built regex.
#[derive(Debug, Clone)]
pub enum Pattern {
    Source(String),
    Regex(Regex),
}

impl From<&str> for Pattern {
    fn from(source: &str) -> Self {
        Pattern::Source(source.to_string())
    }
}

impl From<String> for Pattern {
    fn from(source: String) -> Self {
        Pattern::Source(source)
    }
}

impl From<Regex> for Pattern {
    fn from(regex: Regex) -> Self {
        Pattern::Regex(regex)
    }
}

/// Named pattern fragments, referenced from patterns as `{{name}}`.
///
/// Values may reference other macros; they are expanded in one pass over
/// the table when it is built, and the result is not rescanned.
#[derive(Debug, Clone, Default)]
pub struct Macros {
    table: HashMap<String, String>,
}

impl Macros {
    pub fn new<I, K, V>(entries: I) -> Result<Self, LexError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let raw: HashMap<String, String> = entries
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        let table = raw
            .iter()
            .map(|(name, value)| Ok((name.clone(), substitute(value, &raw)?)))
            .collect::<Result<_, LexError>>()?;
        Ok(Self { table })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.table.get(name).map(String::as_str)
    }

    pub fn expand(&self, pattern: &str) -> Result<String, LexError> {
        substitute(pattern, &self.table)
    }
}

fn substitute(text: &str, table: &HashMap<String, String>) -> Result<String, LexError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in MACRO_REF.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = table
            .get(name.as_str())
            .ok_or_else(|| LexError::UnknownMacro {
                name: name.as_str().to_string(),
            })?;
        out.push_str(&text[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

fn anchored(kind: &str, source: &str, eol: bool, ignore_case: bool) -> Result<Regex, LexError> {
    let mut body = format!("(?:{source})");
    if eol {
        body.push_str(EOL_SUFFIX);
    }
    let full = if ignore_case {
        format!("^(?i:{body})")
    } else {
        format!("^{body}")
    };
    Regex::new(&full).map_err(|source| LexError::InvalidPattern {
        kind: kind.to_string(),
        pattern: full,
        source,
    })
}

/// A rule as written by a grammar author.
#[derive(Clone)]
pub struct RuleSpec<P> {
    kind: Option<String>,
    pattern: Option<Pattern>,
    followed_by: Option<String>,
    flags: String,
    test: Test,
    token: TokenSpec<P>,
    push: Option<PushSpec>,
    pop: Option<PopPredicate>,
    prefix: Option<Boundary>,
    inner: Inner,
}

impl<P> RuleSpec<P> {
    pub fn new(pattern: impl Into<Pattern>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Self::fallback()
        }
    }

    /// A rule without a pattern. It matches the empty string anywhere.
    pub fn fallback() -> Self {
        Self {
            kind: None,
            pattern: None,
            followed_by: None,
            flags: String::new(),
            test: Test::Static(true),
            token: TokenSpec::Default,
            push: None,
            pop: None,
            prefix: None,
            inner: Inner::None,
        }
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn flags(mut self, flags: impl Into<String>) -> Self {
        self.flags = flags.into();
        self
    }

    pub fn when(mut self, test: Test) -> Self {
        self.test = test;
        self
    }

    pub fn literal(mut self, text: impl Into<String>) -> Self {
        self.token = TokenSpec::Literal(text.into());
        self
    }

    pub fn suppress(mut self) -> Self {
        self.token = TokenSpec::Suppressed;
        self
    }

    pub fn push(mut self, context: impl Into<String>) -> Self {
        self.push = Some(PushSpec::Named(context.into()));
        self
    }

    pub fn push_rules(mut self, rules: Vec<BlockEntry>) -> Self {
        self.push = Some(PushSpec::Rules(rules));
        self
    }

    pub fn push_with<F>(mut self, pick: F) -> Self
    where
        F: Fn(&Capture, &Config) -> String + Send + Sync + 'static,
    {
        self.push = Some(PushSpec::Dynamic(Arc::new(pick)));
        self
    }

    pub fn pop_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Capture) -> bool + Send + Sync + 'static,
    {
        self.pop = Some(Arc::new(predicate));
        self
    }

    /// Pattern that ends a pushed inline context.
    pub fn prefix(mut self, pattern: impl Into<String>) -> Self {
        self.prefix = Some(Boundary::new(pattern));
        self
    }

    /// Like [`prefix`](Self::prefix), but the pushed context only ends on
    /// `pattern` when `next` comes right after it. `next` stays unconsumed.
    pub fn prefix_before(mut self, pattern: impl Into<String>, next: impl Into<String>) -> Self {
        self.prefix = Some(Boundary::new(pattern).before(next));
        self
    }

    /// Pattern that must follow the match without being consumed.
    pub fn followed_by(mut self, pattern: impl Into<String>) -> Self {
        self.followed_by = Some(pattern.into());
        self
    }

    pub fn compile(self, macros: &Macros, resolve: &mut Resolver<'_>) -> Result<Rule<P>, LexError> {
        let kind = self.kind.unwrap_or_else(|| DEFAULT_KIND.to_string());
        let flags = Flags::parse(&self.flags, &kind)?;

        let source = match self.pattern {
            None => String::new(),
            Some(Pattern::Source(source)) => source,
            Some(Pattern::Regex(regex)) => regex.as_str().to_string(),
        };
        let pattern = anchored(&kind, &macros.expand(&source)?, flags.eol, flags.ignore_case)?;
        let lookahead = self
            .followed_by
            .map(|look| anchored(&kind, &macros.expand(&look)?, false, flags.ignore_case))
            .transpose()?;
        let prefix = self.prefix.map(|p| p.expand(macros)).transpose()?;

        let push = match self.push {
            Some(spec) => Some(resolve(PushRequest {
                spec,
                kind: kind.clone(),
                prefix,
                strict: flags.strict,
            })?),
            None => None,
        };
        let pop = if flags.pop {
            Pop::Static(true)
        } else {
            self.pop.map_or(Pop::Static(false), Pop::When)
        };

        Ok(Rule {
            kind,
            pattern,
            lookahead,
            flags,
            test: self.test,
            token: self.token,
            push,
            pop,
            inner: self.inner,
        })
    }
}

impl RuleSpec<BlockProducer> {
    pub fn produce<F>(mut self, producer: F) -> Self
    where
        F: Fn(&Capture, Vec<Token>, &Scope<'_>) -> Result<Emit, LexError> + Send + Sync + 'static,
    {
        self.token = TokenSpec::Computed(Arc::new(producer));
        self
    }
}

impl RuleSpec<InlineProducer> {
    pub fn render<F>(mut self, producer: F) -> Self
    where
        F: Fn(&Capture) -> String + Send + Sync + 'static,
    {
        self.token = TokenSpec::Computed(Arc::new(producer));
        self
    }

    /// Re-lex the last non-empty group into [`Capture::inner`].
    pub fn inner(mut self) -> Self {
        self.inner = Inner::Last;
        self
    }

    /// Re-lex group `index` into [`Capture::inner`].
    pub fn inner_group(mut self, index: usize) -> Self {
        self.inner = Inner::Group(index);
        self
    }
}

/// A compiled rule.
#[derive(Clone)]
pub struct Rule<P> {
    pub kind: String,
    pub pattern: Regex,
    pub lookahead: Option<Regex>,
    pub flags: Flags,
    pub test: Test,
    pub token: TokenSpec<P>,
    pub push: Option<Target>,
    pub pop: Pop,
    pub inner: Inner,
}

impl<P> Rule<P> {
    /// The final anchored pattern source.
    pub fn source(&self) -> &str {
        self.pattern.as_str()
    }
}

impl<P> fmt::Debug for Rule<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("kind", &self.kind)
            .field("pattern", &self.pattern.as_str())
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// One item of a context's rule list.
#[derive(Clone)]
pub enum Entry<P> {
    /// Splice in the rules of another context.
    Include(String),
    Spec(RuleSpec<P>),
    /// Already compiled; compiling it again returns it unchanged.
    Rule(Rule<P>),
}

impl<P> Entry<P> {
    pub fn include(context: impl Into<String>) -> Self {
        Entry::Include(context.into())
    }

    pub fn compile(self, macros: &Macros, resolve: &mut Resolver<'_>) -> Result<Rule<P>, LexError> {
        match self {
            Entry::Include(name) => Err(LexError::UnresolvedInclude { name }),
            Entry::Spec(spec) => spec.compile(macros, resolve),
            Entry::Rule(rule) => Ok(rule),
        }
    }
}

impl<P> From<RuleSpec<P>> for Entry<P> {
    fn from(spec: RuleSpec<P>) -> Self {
        Entry::Spec(spec)
    }
}

impl<P> From<Rule<P>> for Entry<P> {
    fn from(rule: Rule<P>) -> Self {
        Entry::Rule(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn refuse(request: PushRequest) -> Result<Target, LexError> {
        Err(LexError::InlinePush { kind: request.kind })
    }

    fn compile(spec: InlineSpec) -> Result<InlineRule, LexError> {
        spec.compile(&Macros::default(), &mut refuse)
    }

    #[test]
    fn flags_set_their_attribute() {
        let flags = Flags::parse("pbteis", "x").unwrap();
        assert_eq!(
            flags,
            Flags {
                pop: true,
                begin: true,
                top: true,
                eol: true,
                ignore_case: true,
                strict: true,
            }
        );
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let err = compile(InlineSpec::new("a").kind("word").flags("pq")).unwrap_err();
        assert!(matches!(err, LexError::InvalidFlag { flag: 'q', ref kind } if kind == "word"));
    }

    #[test]
    fn pattern_is_anchored() {
        let rule = compile(InlineSpec::new("b+")).unwrap();
        assert_eq!(rule.source(), "^(?:b+)");
        assert!(rule.pattern.find("abb").is_none());
        assert_eq!(rule.pattern.find("bba").map(|m| m.end()), Some(2));
    }

    #[test]
    fn fallback_matches_empty_with_default_kind() {
        let rule = compile(InlineSpec::fallback()).unwrap();
        assert_eq!(rule.kind, DEFAULT_KIND);
        assert_eq!(rule.pattern.find("anything").map(|m| m.end()), Some(0));
    }

    #[test]
    fn eol_flag_requires_line_end() {
        let rule = compile(InlineSpec::new("---").flags("e")).unwrap();
        assert_eq!(rule.pattern.find("---  \nnext").map(|m| m.end()), Some(6));
        assert_eq!(rule.pattern.find("---").map(|m| m.end()), Some(3));
        assert!(rule.pattern.find("--- x").is_none());
    }

    #[test]
    fn ignore_case_flag() {
        let rule = compile(InlineSpec::new("todo").flags("i")).unwrap();
        assert!(rule.pattern.is_match("TODO: x"));
    }

    #[test]
    fn regex_pattern_uses_its_source() {
        let rule = compile(InlineSpec::new(Regex::new(r"\d+").unwrap())).unwrap();
        assert_eq!(rule.source(), r"^(?:\d+)");
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let err = compile(InlineSpec::new("(unclosed").kind("bad")).unwrap_err();
        assert!(matches!(err, LexError::InvalidPattern { ref kind, .. } if kind == "bad"));
    }

    #[test]
    fn pop_flag_wins_over_predicate() {
        let rule = compile(InlineSpec::new("x").flags("p").pop_when(|_| false)).unwrap();
        assert!(matches!(rule.pop, Pop::Static(true)));
    }

    #[test]
    fn macros_expand_one_level() {
        let macros = Macros::new([("ws", r"[ \t]"), ("gap", r"{{ws}}+")]).unwrap();
        assert_eq!(macros.get("gap"), Some(r"[ \t]+"));
        assert_eq!(macros.expand(r"#{{gap}}x").unwrap(), r"#[ \t]+x");
    }

    #[test]
    fn unknown_macro_is_rejected() {
        let err = Macros::default().expand("{{nope}}").unwrap_err();
        assert!(matches!(err, LexError::UnknownMacro { ref name } if name == "nope"));
    }

    #[test]
    fn compiling_compiled_rules_is_a_no_op() {
        let macros = Macros::new([("ws", r"[ \t]")]).unwrap();
        let specs = vec![
            InlineSpec::new(r"a{{ws}}*").flags("e"),
            InlineSpec::new("b").flags("i"),
            InlineSpec::fallback(),
        ];
        let first: Vec<InlineRule> = specs
            .into_iter()
            .map(|spec| Entry::from(spec).compile(&macros, &mut refuse))
            .collect::<Result<_, _>>()
            .unwrap();
        let second: Vec<InlineRule> = first
            .iter()
            .cloned()
            .map(|rule| Entry::from(rule).compile(&macros, &mut refuse))
            .collect::<Result<_, _>>()
            .unwrap();

        let sources = |rules: &[InlineRule]| -> Vec<String> {
            rules.iter().map(|r| r.source().to_string()).collect()
        };
        assert_eq!(sources(&first), sources(&second));
    }

    #[test]
    fn include_outside_registry_is_unresolved() {
        let err = InlineEntry::include("other")
            .compile(&Macros::default(), &mut refuse)
            .unwrap_err();
        assert!(matches!(err, LexError::UnresolvedInclude { .. }));
    }

    #[test]
    fn push_is_handed_to_resolver() {
        let err = compile(InlineSpec::new("x").kind("span").push("elsewhere")).unwrap_err();
        assert!(matches!(err, LexError::InlinePush { ref kind } if kind == "span"));
    }

    #[test]
    fn tests_read_config() {
        let config = Config {
            header_align: true,
            ..Config::default()
        };
        assert!(Test::Flag(Flag::HeaderAlign).passes(&config));
        assert!(!Test::NotFlag(Flag::HeaderAlign).passes(&config));
        assert!(!Test::Static(false).passes(&config));
        assert!(Test::Predicate(Arc::new(|c: &Config| c.default_lang == "plaintext")).passes(&config));
    }
}
