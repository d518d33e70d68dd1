//! Command-level entry points

pub mod options;
pub mod run;
pub mod summary;
