//! Channel layer for prompt-synchronized reads.
//!
//! This module turns the raw byte stream of a PTY into "everything the
//! child printed before its next prompt".

mod buffer;
mod patterns;
mod reader;

pub use buffer::PromptBuffer;
pub use patterns::Prompt;
pub use reader::{ByteSource, PromptReader, WaitOutcome};
