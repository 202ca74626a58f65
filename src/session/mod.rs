//! The single coordination point: owns the assignment state and feeds the render worker.

pub mod mosaic;
pub mod worker;
