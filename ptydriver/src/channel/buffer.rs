//! Output buffer with prompt splitting.
//!
//! Bytes read from the child accumulate here until a prompt is found. The
//! text before the prompt is split off and handed to the caller, the prompt
//! itself is discarded, and anything after it stays for the next wait.

use bytes::{Buf, Bytes, BytesMut};

use super::patterns::Prompt;

/// Buffer for accumulating child output and splitting it at prompts.
#[derive(Debug)]
pub struct PromptBuffer {
    /// Output accumulated since the last prompt match.
    buffer: BytesMut,
}

impl PromptBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Append data read from the child.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Find `prompt` at or after byte offset `from`.
    ///
    /// Returns the offset from the start of the buffer.
    pub fn find(&self, prompt: &Prompt, from: usize) -> Option<usize> {
        let from = from.min(self.buffer.len());
        prompt.find_in(&self.buffer[from..]).map(|pos| pos + from)
    }

    /// Search for `prompt` and, if present, split the buffer around it.
    ///
    /// Returns the bytes before the prompt. The prompt is dropped and the
    /// bytes after it remain buffered.
    pub fn split_at_prompt(&mut self, prompt: &Prompt, from: usize) -> Option<Bytes> {
        let pos = self.find(prompt, from)?;
        let preface = self.buffer.split_to(pos).freeze();
        self.buffer.advance(prompt.len());
        Some(preface)
    }

    /// Offset a later search for `prompt` can resume from without missing a
    /// match that straddles the end of the current contents.
    pub fn resume_offset(&self, prompt: &Prompt) -> usize {
        self.buffer.len().saturating_sub(prompt.len().saturating_sub(1))
    }

    /// Take ownership of the buffer contents and reset.
    pub fn take(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    /// Get a reference to the buffer contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for PromptBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_extend() {
        let mut buffer = PromptBuffer::new();
        buffer.extend(b"Hello, ");
        buffer.extend(b"world!");
        assert_eq!(buffer.as_slice(), b"Hello, world!");
    }

    #[test]
    fn test_escape_sequences_are_kept_verbatim() {
        let mut buffer = PromptBuffer::new();
        buffer.extend(b"\x1b[32mGreen\x1b[0m");
        assert_eq!(buffer.as_slice(), b"\x1b[32mGreen\x1b[0m");
    }

    #[test]
    fn test_split_keeps_trailing_bytes() {
        let prompt = Prompt::new("(spike) ");
        let mut buffer = PromptBuffer::new();
        buffer.extend(b"core   0: 0x80000000\n(spike) leftover");

        let preface = buffer.split_at_prompt(&prompt, 0).unwrap();
        assert_eq!(&preface[..], b"core   0: 0x80000000\n");
        assert_eq!(buffer.as_slice(), b"leftover");
    }

    #[test]
    fn test_split_without_prompt_leaves_buffer_alone() {
        let prompt = Prompt::new("(spike) ");
        let mut buffer = PromptBuffer::new();
        buffer.extend(b"(spike");
        assert!(buffer.split_at_prompt(&prompt, 0).is_none());
        assert_eq!(buffer.as_slice(), b"(spike");
    }

    #[test]
    fn test_resume_offset_catches_straddling_prompt() {
        let prompt = Prompt::new("(spike) ");
        let mut buffer = PromptBuffer::new();
        buffer.extend(b"xxxxxxxxxx(spi");
        let from = buffer.resume_offset(&prompt);
        assert!(buffer.find(&prompt, from).is_none());

        buffer.extend(b"ke) ");
        assert_eq!(buffer.find(&prompt, from), Some(10));
    }

    #[test]
    fn test_find_from_past_end() {
        let prompt = Prompt::new("x");
        let mut buffer = PromptBuffer::new();
        buffer.extend(b"x");
        assert!(buffer.find(&prompt, 10).is_none());
    }

    #[test]
    fn test_take_clears_buffer() {
        let mut buffer = PromptBuffer::new();
        buffer.extend(b"test data");
        assert_eq!(&buffer.take()[..], b"test data");
        assert!(buffer.is_empty());
    }
}
