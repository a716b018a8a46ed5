//! CLI command implementations.

pub mod evaluate;
pub mod flush;
pub mod prune;
pub mod status;
pub mod sync;
pub mod track;
