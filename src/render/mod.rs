//! Composition renderer and the artifact it produces.

pub mod artifact;
pub mod compositor;
pub mod sink;
