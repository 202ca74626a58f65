//! Fan-out of composite updates to viewers, with a bounded replay log for late joiners.

pub mod event;
pub mod history;
pub mod hub;
