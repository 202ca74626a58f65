//! Target grid model: per-cell brightness targets derived from the emblem.

pub mod emblem;
pub mod partition;
pub mod target;
