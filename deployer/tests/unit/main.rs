//! Integration tests against scripted hosts

mod test_disk;
mod test_firewall;
mod test_health;
mod test_service;
mod test_system;
