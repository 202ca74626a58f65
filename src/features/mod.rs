//! Feature extraction: photos reduced to a brightness signature plus a render tile.

pub mod extract;
pub mod prepare;
