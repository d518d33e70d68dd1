//! Liveness probes and the post-start health report

pub mod probe;
pub mod report;
pub mod verifier;

pub use probe::{
    probe_health_endpoint, probe_health_endpoint_with, probe_port, probe_port_with,
    probe_service_active, RetryPolicy, HEALTH_PATH,
};
pub use report::{HealthReport, ProbeResult};
pub use verifier::{probe_client, HealthVerifier, ServiceEndpoint};
