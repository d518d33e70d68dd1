//! Remote execution over SSH

pub mod client;
pub mod params;
pub mod transport;
pub mod trust;

pub use client::{RemoteClient, RemoteTask};
pub use params::SshConnectionParams;
pub use transport::{AuthMethod, RusshTransport, SshTransport};
pub use trust::TrustBootstrapper;
