//! Per-node health report and its overall verdict

use serde::Serialize;

/// Outcome of one check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub ok: bool,
    pub detail: String,
}

impl ProbeResult {
    pub fn pass(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
        }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }

    pub fn from_bool(ok: bool, pass: impl Into<String>, fail: impl Into<String>) -> Self {
        if ok {
            Self::pass(pass)
        } else {
            Self::fail(fail)
        }
    }
}

/// Per-node health. Only the service state, the server port and the
/// liveness endpoint decide the overall status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub host: String,
    pub service_active: ProbeResult,
    pub port_listening: ProbeResult,
    pub console_port_listening: ProbeResult,
    pub health_endpoint: ProbeResult,
    pub client_available: ProbeResult,
    pub bucket_access: ProbeResult,
}

impl HealthReport {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn overall_status(&self) -> bool {
        self.service_active.ok && self.port_listening.ok && self.health_endpoint.ok
    }

    /// Checks in execution order, with whether each one gates the status
    pub fn checks(&self) -> [(&'static str, &ProbeResult, bool); 6] {
        [
            ("service active", &self.service_active, true),
            ("port listening", &self.port_listening, true),
            ("console port listening", &self.console_port_listening, false),
            ("health endpoint", &self.health_endpoint, true),
            ("client tool available", &self.client_available, false),
            ("bucket access", &self.bucket_access, false),
        ]
    }

    /// Names of the gating checks that failed
    pub fn failures(&self) -> Vec<&'static str> {
        self.checks()
            .iter()
            .filter(|(_, result, gating)| *gating && !result.ok)
            .map(|(name, _, _)| *name)
            .collect()
    }
}
