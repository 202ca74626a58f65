#![forbid(unsafe_code)]

pub mod assign;
pub mod broadcast;
pub mod config;
pub mod features;
pub mod foundation;
pub mod grid;
pub mod render;
pub mod session;

pub use assign::engine::{AssignmentEngine, AssignmentResult, CellState, SessionPhase};
pub use broadcast::event::{EventKind, MosaicEvent};
pub use broadcast::hub::{Broadcaster, ViewerFeed};
pub use config::{ArtifactConfig, ArtifactFormat, EngineConfig, MosaicSettings, SettingsLimits};
pub use features::prepare::{PhotoPreparer, PreparedPhoto};
pub use foundation::core::{CellCoord, GridDims, OutputDims, PhotoId, PixelRect};
pub use foundation::error::{MosaicError, MosaicResult};
pub use grid::emblem::EmblemSource;
pub use grid::target::{GridCell, TargetGrid};
pub use render::artifact::{ArtifactWriter, CompositeRef};
pub use render::compositor::{CompositionSnapshot, render};
pub use render::sink::{CompositeSink, FileSink, InMemorySink};
pub use session::mosaic::{IngestOutcome, MosaicSession, MosaicStats, SettingsUpdate};
