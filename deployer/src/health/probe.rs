//! Fixed-interval retry probes. There is no backoff: every attempt waits the
//! same delay, and no delay follows the last attempt.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::shell::HostShell;

/// Liveness path served without authentication
pub const HEALTH_PATH: &str = "/minio/health/live";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    /// Bound on a single attempt
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration, timeout: Duration) -> Self {
        Self {
            attempts,
            delay,
            timeout,
        }
    }

    /// One attempt, no waiting
    pub fn single(timeout: Duration) -> Self {
        Self::new(1, Duration::ZERO, timeout)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(5), Duration::from_secs(5))
    }
}

async fn retry_fixed<T, E, P, PF, S, F>(policy: &RetryPolicy, sleep_fn: &S, mut probe: P) -> Result<T, E>
where
    E: fmt::Display,
    P: FnMut(u32) -> PF,
    PF: Future<Output = Result<T, E>>,
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match probe(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                debug!("attempt {}/{} failed: {}", attempt, attempts, e);
                sleep_fn(policy.delay).await;
                attempt += 1;
            }
        }
    }
}

/// TCP connectivity probe with an injectable sleep
pub async fn probe_port_with<S, F>(host: &str, port: u16, policy: &RetryPolicy, sleep_fn: S) -> bool
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let result = retry_fixed(policy, &sleep_fn, |_| async move {
        match tokio::time::timeout(policy.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", policy.timeout)),
        }
    })
    .await;

    match result {
        Ok(()) => {
            info!(host, port, "port is listening");
            true
        }
        Err(e) => {
            warn!(host, port, "port not listening after {} attempts: {}", policy.attempts.max(1), e);
            false
        }
    }
}

pub async fn probe_port(host: &str, port: u16, policy: &RetryPolicy) -> bool {
    probe_port_with(host, port, policy, tokio::time::sleep).await
}

/// GET the liveness path. Only HTTP 200 counts. Returns the last body or
/// error detail alongside the verdict.
pub async fn probe_health_endpoint_with<S, F>(
    client: &Client,
    host: &str,
    port: u16,
    secure: bool,
    policy: &RetryPolicy,
    sleep_fn: S,
) -> (bool, String)
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let scheme = if secure { "https" } else { "http" };
    let url = format!("{}://{}:{}{}", scheme, host, port, HEALTH_PATH);

    let result = retry_fixed(policy, &sleep_fn, |_| {
        let request = client.get(&url).timeout(policy.timeout);
        async move {
            let response = request.send().await.map_err(|e| e.to_string())?;
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 200 {
                Ok(body)
            } else {
                Err(format!("HTTP {}: {}", status.as_u16(), body.trim()))
            }
        }
    })
    .await;

    match result {
        Ok(body) => {
            info!(host, port, "health endpoint returned 200");
            (true, body)
        }
        Err(e) => {
            warn!(host, port, "health endpoint failed: {}", e);
            (false, e)
        }
    }
}

pub async fn probe_health_endpoint(
    client: &Client,
    host: &str,
    port: u16,
    secure: bool,
    policy: &RetryPolicy,
) -> (bool, String) {
    probe_health_endpoint_with(client, host, port, secure, policy, tokio::time::sleep).await
}

/// Single `systemctl is-active` query
pub async fn probe_service_active(shell: &dyn HostShell, name: &str) -> bool {
    let output = shell.exec(&format!("systemctl is-active {}", name)).await;
    let active = output.text() == "active";
    if !active {
        warn!(host = %shell.target(), "service {} is {:?}", name, output.text());
    }
    active
}
