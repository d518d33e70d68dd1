//! Operator host prerequisites

pub mod checks;

pub use checks::SystemCheck;
