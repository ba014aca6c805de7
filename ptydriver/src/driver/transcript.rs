//! Verbatim log of everything read from the child.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use log::warn;

use crate::error::{DriverError, Result};

/// Append-only sink receiving a copy of all child output.
///
/// A sink that fails is reported once and then dropped; losing the log
/// never ends a session.
#[derive(Default)]
pub struct Transcript {
    sink: Option<Box<dyn Write + Send>>,
}

impl Transcript {
    /// A transcript that records nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Record into an arbitrary writer.
    pub fn to_writer(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Some(Box::new(sink)),
        }
    }

    /// Record into `path`, appending if it exists.
    pub fn to_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| DriverError::Transcript {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::to_writer(file))
    }

    /// Whether a sink is attached.
    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Append `data`.
    pub fn record(&mut self, data: &[u8]) {
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.write_all(data).and_then(|()| sink.flush()) {
                warn!("Transcript write failed, disabling transcript: {}", e);
                self.sink = None;
            }
        }
    }
}

impl std::fmt::Debug for Transcript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcript")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
