//! Literal prompt markers.

use memchr::memmem::Finder;

/// A fixed text marker an interactive program prints when it is ready for
/// input, such as `"(spike) "`.
///
/// Matching is a literal substring search, not a pattern language. The
/// searcher is built once, so the same prompt can be reused across waits.
#[derive(Debug, Clone)]
pub struct Prompt {
    finder: Finder<'static>,
}

impl Prompt {
    /// Create a prompt from its literal text.
    ///
    /// An empty prompt matches immediately at the start of any buffer.
    pub fn new(text: impl AsRef<[u8]>) -> Self {
        Self {
            finder: Finder::new(text.as_ref()).into_owned(),
        }
    }

    /// The prompt bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.finder.needle()
    }

    /// Prompt length in bytes.
    pub fn len(&self) -> usize {
        self.finder.needle().len()
    }

    /// Whether the prompt is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Byte offset of the first occurrence in `haystack`.
    pub fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        self.finder.find(haystack)
    }

    /// Whether `haystack` contains the prompt.
    pub fn is_in(&self, haystack: &[u8]) -> bool {
        self.find_in(haystack).is_some()
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl std::fmt::Display for Prompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        let prompt = Prompt::new("(spike) ");
        assert_eq!(prompt.find_in(b"core   0: 0x0\n(spike) "), Some(14));
        assert!(!prompt.is_in(b"(spike)"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let prompt = Prompt::new("a.b*");
        assert!(!prompt.is_in(b"axbbb"));
        assert!(prompt.is_in(b"xx a.b* yy"));
    }

    #[test]
    fn test_display_and_len() {
        let prompt = Prompt::from("(spike) ");
        assert_eq!(prompt.len(), 8);
        assert_eq!(prompt.to_string(), "(spike) ");
        assert!(!prompt.is_empty());
    }
}
