//! Firewall manager tests

use std::sync::Arc;

use minio_deploy::firewall::{FirewallBackend, NetworkPolicyManager};

use crate::fakes::FakeShell;

fn firewalld(state: &str) -> FakeShell {
    FakeShell::new("node-1")
        .ok("which firewalld", "/usr/sbin/firewalld\n")
        .respond(
            "systemctl is-active firewalld",
            minio_deploy::shell::CommandOutput::new(if state == "active" { 0 } else { 3 }, format!("{}\n", state), ""),
        )
}

#[tokio::test]
async fn test_inactive_firewall_is_left_alone() {
    let shell = Arc::new(firewalld("inactive"));
    let manager = NetworkPolicyManager::new(shell.clone());

    assert!(manager.open_ports(&[9000, 9001], "tcp", true).await);
    assert_eq!(shell.count("firewall-cmd"), 0);
}

#[tokio::test]
async fn test_no_backend_is_a_no_op() {
    let shell = Arc::new(FakeShell::new("node-1"));
    let manager = NetworkPolicyManager::new(shell.clone());

    assert_eq!(manager.detect_backend().await, FirewallBackend::None);
    assert!(manager.open_ports(&[9000], "tcp", true).await);
    assert_eq!(shell.commands(), vec!["which firewalld", "which iptables"]);
}

#[tokio::test]
async fn test_firewalld_opens_only_missing_ports() {
    let shell = Arc::new(
        firewalld("active")
            .ok("firewall-cmd --list-ports", "\n")
            .ok("firewall-cmd --get-active-zones", "public\n  interfaces: eth0\n")
            .ok("firewall-cmd --zone=public --list-ports", "22/tcp 9000/tcp\n")
            .ok("firewall-cmd", "success\n"),
    );
    let manager = NetworkPolicyManager::new(shell.clone());

    assert!(manager.open_ports(&[9000, 9001], "tcp", true).await);

    assert!(!shell.ran("--add-port=9000/tcp"));
    assert!(shell.ran("firewall-cmd --add-port=9001/tcp"));
    assert!(shell.ran("firewall-cmd --permanent --add-port=9001/tcp"));
    assert_eq!(shell.count("firewall-cmd --reload"), 1);
    assert_eq!(shell.count("which firewalld"), 1);
}

#[tokio::test]
async fn test_firewalld_nothing_changed_skips_reload() {
    let shell = Arc::new(
        firewalld("active")
            .ok("firewall-cmd --list-ports", "9000/tcp 9001/tcp\n")
            .ok("firewall-cmd", "success\n"),
    );
    let manager = NetworkPolicyManager::new(shell.clone());

    assert!(manager.open_ports(&[9000, 9001], "tcp", true).await);
    assert_eq!(shell.count("--add-port"), 0);
    assert_eq!(shell.count("--reload"), 0);
}

#[tokio::test]
async fn test_iptables_on_debian_writes_rules_file() {
    let shell = Arc::new(
        FakeShell::new("node-1")
            .fail("which firewalld", "")
            .ok("which iptables", "/usr/sbin/iptables\n")
            .ok("iptables -L -n", "Chain INPUT (policy ACCEPT)\n")
            .ok(
                "iptables -L INPUT",
                "Chain INPUT (policy ACCEPT 0 packets, 0 bytes)\nnum pkts bytes target prot opt in out source destination\n1 0 0 ACCEPT tcp -- * * 0.0.0.0/0 0.0.0.0/0 tcp dpt:9001\n",
            )
            .fail("test -f /etc/redhat-release", "")
            .ok("", ""),
    );
    let manager = NetworkPolicyManager::new(shell.clone());

    assert!(manager.open_ports(&[9000, 9001], "tcp", true).await);

    assert!(shell.ran("iptables -A INPUT -p tcp --dport 9000 -j ACCEPT"));
    assert!(!shell.ran("--dport 9001"));
    assert!(shell.ran("iptables-save > /etc/iptables/rules.v4"));
    assert!(!shell.ran("service iptables save"));
}

#[tokio::test]
async fn test_failed_rule_reports_failure() {
    let shell = Arc::new(
        firewalld("active")
            .ok("firewall-cmd --list-ports", "")
            .ok("firewall-cmd --get-active-zones", "")
            .fail("firewall-cmd --add-port", "FirewallD is not running"),
    );
    let manager = NetworkPolicyManager::new(shell.clone());

    assert!(!manager.open_ports(&[9000], "tcp", true).await);
    assert_eq!(shell.count("--reload"), 0);
}
