//! Detects the packet-filter backend and opens ports idempotently

use std::fmt;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use crate::shell::HostShell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirewallBackend {
    FirewallD,
    IpTables,
    None,
}

impl fmt::Display for FirewallBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirewallBackend::FirewallD => write!(f, "firewalld"),
            FirewallBackend::IpTables => write!(f, "iptables"),
            FirewallBackend::None => write!(f, "none"),
        }
    }
}

/// Zone names from `firewall-cmd --get-active-zones`
pub fn parse_active_zones(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.contains("interfaces:") && !line.contains("sources:"))
        .map(str::to_string)
        .collect()
}

/// Whether a `--list-ports` listing contains `port/proto`
pub fn port_listed(listing: &str, port: u16, proto: &str) -> bool {
    let wanted = format!("{}/{}", port, proto);
    listing.split_whitespace().any(|p| p == wanted)
}

/// Whether `iptables -L INPUT -n` output has an ACCEPT rule for the port
pub fn iptables_allows(rules: &str, port: u16, proto: &str) -> bool {
    let proto = proto.to_lowercase();
    let dpt = format!("dpt:{}", port);
    rules.lines().any(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        fields.contains(&"ACCEPT")
            && fields.iter().any(|f| f.to_lowercase() == proto)
            && fields.contains(&dpt.as_str())
    })
}

pub struct NetworkPolicyManager {
    shell: Arc<dyn HostShell>,
    backend: OnceCell<FirewallBackend>,
}

impl NetworkPolicyManager {
    pub fn new(shell: Arc<dyn HostShell>) -> Self {
        Self {
            shell,
            backend: OnceCell::new(),
        }
    }

    async fn succeeds(&self, command: &str) -> bool {
        self.shell.exec(command).await.success()
    }

    /// Installed backend, probed once per manager
    pub async fn detect_backend(&self) -> FirewallBackend {
        *self
            .backend
            .get_or_init(|| async {
                let backend = if self.succeeds("which firewalld").await {
                    FirewallBackend::FirewallD
                } else if self.succeeds("which iptables").await {
                    FirewallBackend::IpTables
                } else {
                    FirewallBackend::None
                };
                info!(host = %self.shell.target(), "firewall backend: {}", backend);
                backend
            })
            .await
    }

    pub async fn is_active(&self) -> bool {
        match self.detect_backend().await {
            FirewallBackend::FirewallD => {
                let output = self.shell.exec("systemctl is-active firewalld").await;
                output.success() && output.text() == "active"
            }
            FirewallBackend::IpTables => self.succeeds("iptables -L -n").await,
            FirewallBackend::None => false,
        }
    }

    pub async fn is_port_open(&self, port: u16, proto: &str) -> bool {
        match self.detect_backend().await {
            FirewallBackend::FirewallD => {
                let output = self.shell.exec("firewall-cmd --list-ports").await;
                if output.success() && port_listed(&output.stdout, port, proto) {
                    return true;
                }
                let zones = self.shell.exec("firewall-cmd --get-active-zones").await;
                if !zones.success() {
                    return false;
                }
                for zone in parse_active_zones(&zones.stdout) {
                    let output = self
                        .shell
                        .exec(&format!("firewall-cmd --zone={} --list-ports", zone))
                        .await;
                    if output.success() && port_listed(&output.stdout, port, proto) {
                        return true;
                    }
                }
                false
            }
            FirewallBackend::IpTables => {
                let output = self.shell.exec("iptables -L INPUT -n -v --line-numbers").await;
                output.success() && iptables_allows(&output.stdout, port, proto)
            }
            FirewallBackend::None => false,
        }
    }

    async fn open_port(&self, backend: FirewallBackend, port: u16, proto: &str, persistent: bool) -> bool {
        let commands = match backend {
            FirewallBackend::FirewallD => {
                let mut commands = vec![format!("firewall-cmd --add-port={}/{}", port, proto)];
                if persistent {
                    commands.push(format!("firewall-cmd --permanent --add-port={}/{}", port, proto));
                }
                commands
            }
            FirewallBackend::IpTables => vec![format!(
                "iptables -A INPUT -p {} --dport {} -j ACCEPT",
                proto, port
            )],
            FirewallBackend::None => return true,
        };
        for command in commands {
            let output = self.shell.exec(&command).await;
            if !output.success() {
                error!(host = %self.shell.target(), port, "{} failed: {}", command, output.error_detail());
                return false;
            }
        }
        info!(host = %self.shell.target(), port, "opened {}/{}", port, proto);
        true
    }

    async fn persist(&self, backend: FirewallBackend) -> bool {
        let command = match backend {
            FirewallBackend::FirewallD => "firewall-cmd --reload".to_string(),
            FirewallBackend::IpTables => {
                let redhat = self
                    .succeeds("test -f /etc/redhat-release || test -f /etc/centos-release")
                    .await;
                if redhat {
                    "service iptables save".to_string()
                } else {
                    "mkdir -p /etc/iptables && iptables-save > /etc/iptables/rules.v4".to_string()
                }
            }
            FirewallBackend::None => return true,
        };
        let output = self.shell.exec(&command).await;
        if !output.success() {
            error!(host = %self.shell.target(), "{} failed: {}", command, output.error_detail());
        }
        output.success()
    }

    /// Open every port. Does nothing when no firewall is active and skips
    /// ports that are already open.
    pub async fn open_ports(&self, ports: &[u16], proto: &str, persistent: bool) -> bool {
        if !self.is_active().await {
            info!(host = %self.shell.target(), "firewall not active, nothing to open");
            return true;
        }
        let backend = self.detect_backend().await;

        let mut changed = false;
        for &port in ports {
            if self.is_port_open(port, proto).await {
                info!(host = %self.shell.target(), port, "{}/{} already open", port, proto);
                continue;
            }
            if !self.open_port(backend, port, proto, persistent).await {
                return false;
            }
            changed = true;
        }

        if changed && persistent && !self.persist(backend).await {
            warn!(host = %self.shell.target(), "rules applied but not persisted");
            return false;
        }
        true
    }
}
