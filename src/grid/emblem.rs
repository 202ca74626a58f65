use std::path::PathBuf;
use std::sync::Arc;

use crate::foundation::error::{MosaicError, MosaicResult};

/// Where the emblem image comes from.
#[derive(Clone, Debug)]
pub enum EmblemSource {
    /// Read from disk each time the grid is configured.
    Path(PathBuf),
    /// Already-loaded encoded bytes (PNG, JPEG, ...).
    Bytes(Arc<[u8]>),
}

impl EmblemSource {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Bytes(bytes.into())
    }

    /// Decode the emblem. Any failure is a configuration error: a grid cannot exist without it.
    pub fn decode(&self) -> MosaicResult<image::DynamicImage> {
        match self {
            Self::Path(path) => {
                let bytes = std::fs::read(path).map_err(|e| {
                    MosaicError::configuration(format!(
                        "read emblem '{}': {e}",
                        path.display()
                    ))
                })?;
                decode_emblem_bytes(&bytes)
            }
            Self::Bytes(bytes) => decode_emblem_bytes(bytes),
        }
    }

    /// Human-readable origin for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Bytes(bytes) => format!("<{} bytes in memory>", bytes.len()),
        }
    }
}

fn decode_emblem_bytes(bytes: &[u8]) -> MosaicResult<image::DynamicImage> {
    image::load_from_memory(bytes)
        .map_err(|e| MosaicError::configuration(format!("decode emblem: {e}")))
}
