//! Packet-filter configuration

pub mod manager;

pub use manager::{FirewallBackend, NetworkPolicyManager};
