use regex::Captures;

/// The result of one successful rule match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    /// The matched text.
    pub text: String,
    /// Numbered sub-groups; index 0 is group 1.
    pub groups: Vec<Option<String>>,
    /// Re-lexed inner text, for inline rules that ask for it.
    pub inner: Option<String>,
    /// Absolute offset of the match.
    pub start: usize,
}

impl Capture {
    pub(crate) fn from_regex(caps: &Captures<'_>, start: usize) -> Self {
        Self {
            text: caps
                .get(0)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            groups: caps
                .iter()
                .skip(1)
                .map(|group| group.map(|m| m.as_str().to_string()))
                .collect(),
            inner: None,
            start,
        }
    }

    /// Group `index`; 0 is the whole match.
    pub fn group(&self, index: usize) -> Option<&str> {
        if index == 0 {
            return Some(&self.text);
        }
        self.groups.get(index - 1)?.as_deref()
    }

    /// Group `index`, or `""` when it did not participate.
    pub fn get(&self, index: usize) -> &str {
        self.group(index).unwrap_or("")
    }

    /// The last numbered group that matched something non-empty.
    pub fn last_group(&self) -> Option<&str> {
        self.groups
            .iter()
            .rev()
            .filter_map(|group| group.as_deref())
            .find(|group| !group.is_empty())
    }

    pub fn inner(&self) -> &str {
        self.inner.as_deref().unwrap_or("")
    }

    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }
}
