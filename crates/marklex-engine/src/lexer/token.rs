use serde::Serialize;
use std::collections::BTreeMap;

/// A scalar attribute value on a [`Node`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Attr {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<bool> for Attr {
    fn from(value: bool) -> Self {
        Attr::Bool(value)
    }
}

impl From<i64> for Attr {
    fn from(value: i64) -> Self {
        Attr::Int(value)
    }
}

impl From<usize> for Attr {
    fn from(value: usize) -> Self {
        Attr::Int(value as i64)
    }
}

impl From<&str> for Attr {
    fn from(value: &str) -> Self {
        Attr::Str(value.to_string())
    }
}

impl From<String> for Attr {
    fn from(value: String) -> Self {
        Attr::Str(value)
    }
}

/// A structured token.
///
/// An empty `kind` means "use the type of the rule that emitted me"; the
/// engine fills it in before the node reaches the output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Node {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub attrs: BTreeMap<String, Attr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<Token>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<usize>,
}

impl Node {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<Attr>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    pub fn with_content(mut self, content: Vec<Token>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&Attr> {
        self.attrs.get(key)
    }

    pub fn bool_attr(&self, key: &str) -> Option<bool> {
        match self.attrs.get(key)? {
            Attr::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn int_attr(&self, key: &str) -> Option<i64> {
        match self.attrs.get(key)? {
            Attr::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn str_attr(&self, key: &str) -> Option<&str> {
        match self.attrs.get(key)? {
            Attr::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Child tokens, empty when the node has no content.
    pub fn children(&self) -> &[Token] {
        self.content.as_deref().unwrap_or_default()
    }
}

/// One unit of lexer output: unstructured text or a [`Node`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Token {
    Text(String),
    Node(Node),
}

impl Token {
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Token::Node(node) => Some(node),
            Token::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Token::Text(text) => Some(text),
            Token::Node(_) => None,
        }
    }

    pub fn kind(&self) -> Option<&str> {
        self.as_node().map(|node| node.kind.as_str())
    }
}

/// What a token producer hands back to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emit {
    /// Emit nothing for this match.
    Nothing,
    /// Emit unstructured text.
    Text(String),
    /// Emit a structured token.
    Node(Node),
    /// Emit several tokens, wrapped in a node of the rule's type.
    Many(Vec<Token>),
}

/// Concatenates the plain text items of `tokens`, ignoring nodes.
pub fn text_of(tokens: &[Token]) -> String {
    tokens.iter().filter_map(Token::as_text).collect()
}
