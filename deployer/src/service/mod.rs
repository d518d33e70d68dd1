//! Service binary installation and systemd provisioning

pub mod installer;
pub mod provisioner;
pub mod unit;

use tracing::info;

use crate::shell::HostShell;

pub use installer::{BinaryInstaller, InstallOutcome, LinuxArch, Product};
pub use provisioner::ServiceProvisioner;
pub use unit::{generate_unit, GeneratedUnit, UnitConfig};

/// systemd unit name
pub const SERVICE_NAME: &str = "minio";

/// Generated unit file
pub const UNIT_PATH: &str = "/etc/systemd/system/minio.service";

/// Generated environment file
pub const ENV_PATH: &str = "/etc/default/minio";

/// Whether the target already has a service unit, by unit-file listing or
/// by file presence.
pub async fn installation_exists(shell: &dyn HostShell) -> bool {
    let command = format!(
        "systemctl list-unit-files --type=service 2>/dev/null | grep -q {name} || [ -f {unit} ]",
        name = SERVICE_NAME,
        unit = UNIT_PATH
    );
    let exists = shell.exec(&command).await.success();
    if exists {
        info!(host = %shell.target(), "existing {} installation found", SERVICE_NAME);
    }
    exists
}
