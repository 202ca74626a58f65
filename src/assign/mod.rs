//! Assignment engine: binds photos to grid cells.

pub mod engine;
