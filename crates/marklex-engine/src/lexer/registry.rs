//! Named contexts.
//!
//! The registry is built once per grammar. Building it flattens every
//! `include`, compiles every rule, turns anonymous `push` rule lists into
//! their own contexts and creates the inline forks that pushes ask for.
//! After that it is only read.

use log::debug;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{
    error::{LexError, TracedError},
    inline::InlineLexer,
    rule::{BlockEntry, BlockRule, Boundary, Entry, Macros, PushRequest, PushSpec, Target},
};

/// Handle of a context inside its [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(usize);

/// A context as supplied by the grammar author.
pub enum ContextDef {
    Rules(Vec<BlockEntry>),
    Inline(InlineLexer),
}

pub(crate) enum Context {
    Rules(Vec<BlockRule>),
    Inline(Arc<InlineLexer>),
}

pub(crate) struct Slot {
    pub name: String,
    pub context: Context,
}

/// Why a context was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// Its rules were spliced into another context.
    Include,
    /// A rule pushed it.
    Push,
    /// It is an inline lexer and lexing was delegated to it.
    Inline,
    /// It is where lexing started.
    Entry,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Reason::Include => "include",
            Reason::Push => "push",
            Reason::Inline => "inline",
            Reason::Entry => "entry",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub name: String,
    pub reason: Reason,
}

impl TraceEntry {
    pub fn new(name: impl Into<String>, reason: Reason) -> Self {
        Self {
            name: name.into(),
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ForkKey {
    base: ContextId,
    prefix: Option<Boundary>,
    strict: bool,
}

/// A context resolved at match time.
pub(crate) enum Resolved {
    Slot(ContextId),
    /// A fork nobody asked for at build time.
    Fork(String, InlineLexer),
}

#[derive(Default)]
pub struct Registry {
    slots: Vec<Slot>,
    names: HashMap<String, ContextId>,
    forks: HashMap<ForkKey, ContextId>,
}

impl Registry {
    pub(crate) fn build(
        contexts: Vec<(String, ContextDef)>,
        macros: &Macros,
    ) -> Result<Self, TracedError> {
        let mut builder = Builder {
            registry: Registry::default(),
            raw: HashMap::new(),
            macros,
            trace: Vec::new(),
        };
        builder.build(contexts).map_err(|source| TracedError {
            source,
            trace: std::mem::take(&mut builder.trace),
        })?;
        Ok(builder.registry)
    }

    pub(crate) fn slot(&self, id: ContextId) -> &Slot {
        &self.slots[id.0]
    }

    pub fn lookup(&self, name: &str) -> Result<ContextId, LexError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| LexError::UnknownContext {
                name: name.to_string(),
            })
    }

    pub fn name(&self, id: ContextId) -> &str {
        &self.slot(id).name
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of distinct forks created at build time.
    pub fn fork_count(&self) -> usize {
        self.forks.len()
    }

    /// Resolves a context named at match time, forking it when the pushing
    /// rule asks for a boundary and no such fork exists yet.
    pub(crate) fn resolve_dynamic(
        &self,
        name: &str,
        prefix: Option<&Boundary>,
        strict: bool,
    ) -> Result<Resolved, LexError> {
        let id = self.lookup(name)?;
        let Context::Inline(lexer) = &self.slot(id).context else {
            return Ok(Resolved::Slot(id));
        };
        if prefix.is_none() && !strict {
            return Ok(Resolved::Slot(id));
        }
        let key = ForkKey {
            base: id,
            prefix: prefix.cloned(),
            strict,
        };
        if let Some(fork) = self.forks.get(&key) {
            return Ok(Resolved::Slot(*fork));
        }
        debug!("forking inline context `{name}` at match time");
        Ok(Resolved::Fork(
            format!("{name}#fork"),
            lexer.fork(prefix, strict)?,
        ))
    }
}

struct Builder<'m> {
    registry: Registry,
    raw: HashMap<String, Vec<BlockEntry>>,
    macros: &'m Macros,
    trace: Vec<TraceEntry>,
}

impl Builder<'_> {
    fn build(&mut self, contexts: Vec<(String, ContextDef)>) -> Result<(), LexError> {
        let mut pending = Vec::new();
        for (name, def) in contexts {
            let context = match def {
                ContextDef::Rules(entries) => {
                    self.raw.insert(name.clone(), entries);
                    pending.push(name.clone());
                    Context::Rules(Vec::new())
                }
                ContextDef::Inline(lexer) => Context::Inline(Arc::new(lexer)),
            };
            self.alloc(name, context);
        }

        for name in pending {
            self.trace.push(TraceEntry::new(&name, Reason::Entry));
            let flat = self.flatten(&name, &mut Vec::new())?;
            let rules = self.compile(flat, &name)?;
            self.trace.pop();
            let id = self.registry.lookup(&name)?;
            debug!("context `{name}` resolved to {} rules", rules.len());
            self.registry.slots[id.0].context = Context::Rules(rules);
        }
        Ok(())
    }

    fn alloc(&mut self, name: String, context: Context) -> ContextId {
        let id = ContextId(self.registry.slots.len());
        self.registry.names.insert(name.clone(), id);
        self.registry.slots.push(Slot { name, context });
        id
    }

    /// Rules of `name` with every include spliced in place.
    fn flatten(&mut self, name: &str, stack: &mut Vec<String>) -> Result<Vec<BlockEntry>, LexError> {
        if stack.iter().any(|open| open == name) {
            return Err(LexError::IncludeCycle {
                name: name.to_string(),
            });
        }
        let Some(entries) = self.raw.get(name).cloned() else {
            return Err(match self.registry.names.get(name) {
                Some(_) => LexError::IncludeInline {
                    name: name.to_string(),
                },
                None => LexError::UnknownContext {
                    name: name.to_string(),
                },
            });
        };
        stack.push(name.to_string());
        let flat = self.flatten_entries(entries, stack)?;
        stack.pop();
        Ok(flat)
    }

    fn flatten_entries(
        &mut self,
        entries: Vec<BlockEntry>,
        stack: &mut Vec<String>,
    ) -> Result<Vec<BlockEntry>, LexError> {
        let mut flat = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry {
                Entry::Include(included) => {
                    self.trace.push(TraceEntry::new(&included, Reason::Include));
                    flat.extend(self.flatten(&included, stack)?);
                    self.trace.pop();
                }
                other => flat.push(other),
            }
        }
        Ok(flat)
    }

    fn compile(&mut self, entries: Vec<BlockEntry>, owner: &str) -> Result<Vec<BlockRule>, LexError> {
        let macros = self.macros;
        entries
            .into_iter()
            .map(|entry| entry.compile(macros, &mut |request| self.resolve(request, owner)))
            .collect()
    }

    fn resolve(&mut self, request: PushRequest, owner: &str) -> Result<Target, LexError> {
        match request.spec {
            PushSpec::Dynamic(pick) => Ok(Target::Dynamic {
                pick,
                prefix: request.prefix,
                strict: request.strict,
            }),
            PushSpec::Named(name) => {
                let id = self.registry.lookup(&name)?;
                let wants_fork = request.prefix.is_some() || request.strict;
                let inline = match &self.registry.slot(id).context {
                    Context::Inline(lexer) if wants_fork => Some(Arc::clone(lexer)),
                    _ => None,
                };
                match inline {
                    Some(lexer) => self.fork(id, &lexer, request.prefix, request.strict),
                    None => Ok(Target::Context(id)),
                }
            }
            PushSpec::Rules(entries) => {
                let name = format!(
                    "{owner}/{}#{}",
                    request.kind,
                    self.registry.slots.len()
                );
                let flat = self.flatten_entries(entries, &mut vec![owner.to_string()])?;
                let rules = self.compile(flat, &name)?;
                let id = self.alloc(name, Context::Rules(rules));
                Ok(Target::Context(id))
            }
        }
    }

    fn fork(
        &mut self,
        base: ContextId,
        lexer: &InlineLexer,
        prefix: Option<Boundary>,
        strict: bool,
    ) -> Result<Target, LexError> {
        let key = ForkKey {
            base,
            prefix,
            strict,
        };
        if let Some(id) = self.registry.forks.get(&key) {
            return Ok(Target::Context(*id));
        }
        let forked = lexer.fork(key.prefix.as_ref(), key.strict)?;
        let name = format!(
            "{}#fork{}",
            self.registry.name(base),
            self.registry.forks.len() + 1
        );
        debug!("created fork `{name}`");
        let id = self.alloc(name, Context::Inline(Arc::new(forked)));
        self.registry.forks.insert(key, id);
        Ok(Target::Context(id))
    }
}
