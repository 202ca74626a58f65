use std::io::Cursor;
use std::time::Duration;

use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;

use crate::config::{ArtifactConfig, ArtifactFormat};
use crate::foundation::error::{MosaicError, MosaicResult};
use crate::render::sink::{CompositeSink, FileSink};

/// What viewers receive instead of pixels: where to fetch the composite and which frame it is.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CompositeRef {
    pub location: String,
    /// Render generation; increases with every committed change.
    pub generation: u64,
    /// xxh3 of the encoded bytes. Doubles as a cache-busting token.
    pub digest: u64,
}

/// Encode a frame in the configured format.
pub fn encode(frame: &RgbImage, format: ArtifactFormat) -> MosaicResult<Vec<u8>> {
    let mut buf = Vec::new();
    match format {
        ArtifactFormat::Jpeg { quality } => {
            JpegEncoder::new_with_quality(&mut buf, quality)
                .encode_image(frame)
                .map_err(|e| MosaicError::render(format!("jpeg encode: {e}")))?;
        }
        ArtifactFormat::Png => {
            frame
                .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
                .map_err(|e| MosaicError::render(format!("png encode: {e}")))?;
        }
    }
    Ok(buf)
}

/// Owns the composite artifact. All writes go through here, one at a time.
pub struct ArtifactWriter {
    sink: Box<dyn CompositeSink>,
    format: ArtifactFormat,
    attempts: u32,
    backoff: Duration,
    last_good: Option<CompositeRef>,
    failures: u64,
}

impl std::fmt::Debug for ArtifactWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactWriter")
            .field("location", &self.sink.location())
            .field("format", &self.format)
            .field("attempts", &self.attempts)
            .field("last_good", &self.last_good)
            .field("failures", &self.failures)
            .finish()
    }
}

impl ArtifactWriter {
    pub fn new(sink: Box<dyn CompositeSink>, format: ArtifactFormat, attempts: u32) -> Self {
        Self {
            sink,
            format,
            attempts: attempts.max(1),
            backoff: Duration::from_millis(5),
            last_good: None,
            failures: 0,
        }
    }

    /// File-backed writer as described by `cfg`.
    pub fn from_config(cfg: &ArtifactConfig) -> Self {
        Self::new(
            Box::new(FileSink::new(&cfg.path, cfg.public_location.clone())),
            cfg.format,
            cfg.write_attempts,
        )
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Encode and store `frame`, retrying the write a bounded number of times.
    ///
    /// On exhaustion the previous composite stays authoritative, the failure is logged at error
    /// level and counted, and the error is returned.
    pub fn commit(&mut self, generation: u64, frame: &RgbImage) -> MosaicResult<CompositeRef> {
        let bytes = encode(frame, self.format)?;
        let digest = xxhash_rust::xxh3::xxh3_64(&bytes);

        let mut last_err = None;
        for attempt in 1..=self.attempts {
            match self.sink.write(generation, &bytes) {
                Ok(()) => {
                    let r = CompositeRef {
                        location: self.sink.location(),
                        generation,
                        digest,
                    };
                    self.last_good = Some(r.clone());
                    return Ok(r);
                }
                Err(e) => {
                    tracing::warn!(generation, attempt, error = %e, "composite write failed");
                    last_err = Some(e);
                    if attempt < self.attempts && !self.backoff.is_zero() {
                        std::thread::sleep(self.backoff * attempt);
                    }
                }
            }
        }

        self.failures += 1;
        let cause = last_err.map(|e| e.to_string()).unwrap_or_default();
        tracing::error!(
            generation,
            attempts = self.attempts,
            stale = ?self.last_good.as_ref().map(|r| r.generation),
            "composite write retries exhausted, keeping previous composite"
        );
        Err(MosaicError::render(format!(
            "composite generation {generation} not written after {} attempts: {cause}",
            self.attempts
        )))
    }

    /// Most recent successfully written composite.
    pub fn last_good(&self) -> Option<&CompositeRef> {
        self.last_good.as_ref()
    }

    /// Commits that exhausted their retries.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn location(&self) -> String {
        self.sink.location()
    }
}
