//! Engine configuration.
//!
//! Everything here is plain serde data: an operator can keep an `EngineConfig` as JSON next to
//! the binary and the engine validates it once at startup. `MosaicSettings` is the subset an
//! administrator changes during an event; it can be persisted separately so the last layout
//! survives a restart.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::foundation::core::{GridDims, OutputDims};
use crate::foundation::error::{MosaicError, MosaicResult};
use crate::grid::partition::validate_layout;

/// Administrator-controlled mosaic layout.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MosaicSettings {
    pub grid: GridDims,
    pub output: OutputDims,
    /// Emblem image the mosaic approximates.
    pub emblem_path: PathBuf,
}

impl Default for MosaicSettings {
    fn default() -> Self {
        Self {
            grid: GridDims { cols: 20, rows: 20 },
            output: OutputDims::new(1000, 1000),
            emblem_path: PathBuf::from("static/base/emblem.png"),
        }
    }
}

impl MosaicSettings {
    pub fn load_json(path: &Path) -> MosaicResult<Self> {
        let f = File::open(path).with_context(|| format!("open settings '{}'", path.display()))?;
        let settings = serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("parse settings '{}'", path.display()))?;
        Ok(settings)
    }

    /// Write settings as pretty JSON, creating parent directories as needed.
    pub fn save_json(&self, path: &Path) -> MosaicResult<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create settings dir '{}'", parent.display()))?;
        }
        let f =
            File::create(path).with_context(|| format!("create settings '{}'", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(f), self)
            .with_context(|| format!("write settings '{}'", path.display()))?;
        Ok(())
    }
}

/// Upper bounds on what a settings update may request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SettingsLimits {
    pub max_grid_axis: u32,
    pub max_output_axis: u32,
}

impl Default for SettingsLimits {
    fn default() -> Self {
        Self {
            max_grid_axis: 100,
            max_output_axis: 5000,
        }
    }
}

impl SettingsLimits {
    /// Validate a `(grid, output)` pair: positive grid, output at least one pixel per cell on
    /// each axis, and both inside the configured bounds.
    pub fn check(&self, grid: GridDims, output: OutputDims) -> MosaicResult<()> {
        validate_layout(grid, output)?;
        if grid.cols > self.max_grid_axis || grid.rows > self.max_grid_axis {
            return Err(MosaicError::configuration(format!(
                "grid {}x{} exceeds limit of {} cells per axis",
                grid.cols, grid.rows, self.max_grid_axis
            )));
        }
        if output.width > self.max_output_axis || output.height > self.max_output_axis {
            return Err(MosaicError::configuration(format!(
                "output {}x{} exceeds limit of {} pixels per axis",
                output.width, output.height, self.max_output_axis
            )));
        }
        Ok(())
    }
}

/// Encoding of the composite artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactFormat {
    Jpeg { quality: u8 },
    Png,
}

impl Default for ArtifactFormat {
    fn default() -> Self {
        Self::Jpeg { quality: 95 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Where the composite is written on disk.
    pub path: PathBuf,
    /// Opaque location handed to viewers (e.g. the URL path the file is served under).
    pub public_location: String,
    pub format: ArtifactFormat,
    /// Bounded attempts per artifact write before the failure is reported.
    pub write_attempts: u32,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("static/output/current_mosaic.jpg"),
            public_location: "/static/output/current_mosaic.jpg".to_string(),
            format: ArtifactFormat::default(),
            write_attempts: 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub settings: MosaicSettings,
    pub limits: SettingsLimits,
    /// Events kept for late-joining viewers.
    pub history_capacity: usize,
    /// Live events buffered per viewer before it is considered lagging.
    pub viewer_buffer: usize,
    pub artifact: ArtifactConfig,
    /// Prepared photos are square tiles of at most this edge.
    pub photo_tile_edge: u32,
    /// Feature extraction downsamples photos larger than this edge.
    pub feature_sample_edge: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settings: MosaicSettings::default(),
            limits: SettingsLimits::default(),
            history_capacity: 10,
            viewer_buffer: 64,
            artifact: ArtifactConfig::default(),
            photo_tile_edge: 256,
            feature_sample_edge: 128,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: &Path) -> MosaicResult<Self> {
        let f = File::open(path).with_context(|| format!("open config '{}'", path.display()))?;
        let cfg: Self = serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("parse config '{}'", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> MosaicResult<()> {
        self.limits
            .check(self.settings.grid, self.settings.output)?;
        if self.history_capacity == 0 {
            return Err(MosaicError::configuration("history_capacity must be > 0"));
        }
        if self.viewer_buffer == 0 {
            return Err(MosaicError::configuration("viewer_buffer must be > 0"));
        }
        if self.artifact.write_attempts == 0 {
            return Err(MosaicError::configuration(
                "artifact.write_attempts must be > 0",
            ));
        }
        if let ArtifactFormat::Jpeg { quality } = self.artifact.format
            && !(1..=100).contains(&quality)
        {
            return Err(MosaicError::configuration(
                "artifact jpeg quality must be in 1..=100",
            ));
        }
        if self.photo_tile_edge == 0 || self.feature_sample_edge == 0 {
            return Err(MosaicError::configuration(
                "photo_tile_edge and feature_sample_edge must be > 0",
            ));
        }
        Ok(())
    }
}
