//! Disk safety and data-disk preparation

pub mod inspector;
pub mod prepare;

pub use inspector::SafetyInspector;
pub use prepare::{fstab_contains, fstab_entry, DiskRequest};
