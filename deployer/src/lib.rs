//! MinIO deployment orchestrator
//!
//! Provisions a standalone or clustered MinIO deployment over SSH, refusing
//! any destructive step against operating system storage or an existing
//! installation.

pub mod app;
pub mod config;
pub mod deploy;
pub mod disk;
pub mod errors;
pub mod filesys;
pub mod firewall;
pub mod health;
pub mod logs;
pub mod service;
pub mod shell;
pub mod ssh;
pub mod system;
pub mod utils;
