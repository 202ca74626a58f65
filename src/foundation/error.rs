pub type MosaicResult<T> = Result<T, MosaicError>;

#[derive(thiserror::Error, Debug)]
pub enum MosaicError {
    /// Invalid grid/output dimensions or an unreadable emblem. The previous grid stays active.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The uploaded bytes are not a raster image we can decode.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("empty image: {0}")]
    EmptyImage(String),

    /// Composite artifact could not be produced or written.
    #[error("render error: {0}")]
    Render(String),

    /// The session's render worker is gone (runtime shut down or session dropped).
    #[error("session closed: {0}")]
    Closed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MosaicError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn empty_image(msg: impl Into<String>) -> Self {
        Self::EmptyImage(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        Self::Closed(msg.into())
    }

    /// Rejections are per-photo problems; everything else concerns the session.
    pub fn is_photo_rejection(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::EmptyImage(_))
    }
}
