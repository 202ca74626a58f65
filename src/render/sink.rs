use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context as _;

use crate::foundation::error::{MosaicError, MosaicResult};

/// Destination for encoded composites.
///
/// Contract: `write` either stores the whole artifact or leaves the previous one untouched.
/// Readers never observe a partially written composite.
pub trait CompositeSink: Send {
    fn write(&mut self, generation: u64, bytes: &[u8]) -> MosaicResult<()>;
    /// Opaque reference handed to viewers.
    fn location(&self) -> String;
}

/// Writes the composite to a single file, replacing it atomically via rename.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
    public_location: String,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>, public_location: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            public_location: public_location.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "composite".to_string());
        self.path.with_file_name(format!(".{name}.partial"))
    }
}

impl CompositeSink for FileSink {
    fn write(&mut self, generation: u64, bytes: &[u8]) -> MosaicResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create output dir '{}'", parent.display()))?;
        }
        let staging = self.staging_path();
        std::fs::write(&staging, bytes)
            .with_context(|| format!("write staging file '{}'", staging.display()))?;
        std::fs::rename(&staging, &self.path).with_context(|| {
            format!(
                "replace composite '{}' (generation {generation})",
                self.path.display()
            )
        })?;
        Ok(())
    }

    fn location(&self) -> String {
        self.public_location.clone()
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    frames: Vec<(u64, Vec<u8>)>,
    fail_next: u32,
    attempts: u64,
}

/// In-memory sink for tests and embedding. Clones share the same storage, so a test can keep
/// a handle after giving one to a session.
#[derive(Debug, Clone, Default)]
pub struct InMemorySink {
    inner: Arc<Mutex<MemoryInner>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail.
    pub fn fail_next(&self, n: u32) {
        self.lock().fail_next = n;
    }

    /// Committed frames in write order.
    pub fn frames(&self) -> Vec<(u64, Vec<u8>)> {
        self.lock().frames.clone()
    }

    pub fn latest(&self) -> Option<(u64, Vec<u8>)> {
        self.lock().frames.last().cloned()
    }

    /// Write calls seen, failed ones included.
    pub fn attempts(&self) -> u64 {
        self.lock().attempts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CompositeSink for InMemorySink {
    fn write(&mut self, generation: u64, bytes: &[u8]) -> MosaicResult<()> {
        let mut inner = self.lock();
        inner.attempts += 1;
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(MosaicError::render(format!(
                "injected write failure (generation {generation})"
            )));
        }
        inner.frames.push((generation, bytes.to_vec()));
        Ok(())
    }

    fn location(&self) -> String {
        "memory://composite".to_string()
    }
}
