//! systemd unit and environment file rendering

use crate::config::model::Credentials;
use crate::service::ENV_PATH;

/// Inputs of the generated service definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitConfig {
    /// Directory holding the server binary
    pub install_dir: String,
    /// Local data directory of this node
    pub data_dir: String,
    /// Value of `MINIO_VOLUMES`. The data directory in standalone mode, every
    /// node's endpoint in cluster mode.
    pub volumes: String,
    pub listen_port: u16,
    pub console_port: u16,
    pub credentials: Credentials,
    pub erasure_coding: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedUnit {
    pub unit: String,
    pub environment: String,
}

/// `EC:n` form of an erasure-coding setting; a bare number is accepted
pub fn storage_class(erasure_coding: &str) -> String {
    let value = erasure_coding.trim();
    if value.chars().all(|c| c.is_ascii_digit()) {
        format!("EC:{}", value)
    } else {
        value.to_string()
    }
}

/// Escape a value for a double-quoted systemd `EnvironmentFile` entry
fn env_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' | '"' | '$' | '`' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Endpoint list for a distributed deployment
pub fn cluster_volumes<'a>(
    nodes: impl IntoIterator<Item = (&'a str, &'a str)>,
    port: u16,
    secure: bool,
) -> String {
    let scheme = if secure { "https" } else { "http" };
    nodes
        .into_iter()
        .map(|(address, data_dir)| format!("{}://{}:{}{}", scheme, address, port, data_dir))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn generate_unit(config: &UnitConfig) -> GeneratedUnit {
    let binary = format!("{}/minio", config.install_dir.trim_end_matches('/'));

    let unit = format!(
        "[Unit]
Description=MinIO
Documentation=https://docs.min.io
Wants=network-online.target
After=network-online.target
AssertFileIsExecutable={binary}

[Service]
WorkingDirectory={install_dir}
User=root
Group=root
EnvironmentFile=-{env_path}
ExecStartPre=/bin/bash -c 'if [ -z \"${{MINIO_VOLUMES}}\" ]; then echo \"Variable MINIO_VOLUMES not set in {env_path}\"; exit 1; fi'
ExecStart={binary} server $MINIO_OPTS $MINIO_VOLUMES
Restart=always
LimitNOFILE=65536
LimitNPROC=16384
TimeoutStopSec=5
SendSIGKILL=no

[Install]
WantedBy=multi-user.target
",
        binary = binary,
        install_dir = config.install_dir,
        env_path = ENV_PATH,
    );

    let mut environment = String::from("# MinIO environment\n");
    environment.push_str(&format!("MINIO_ROOT_USER={}\n", env_quote(&config.credentials.root_user)));
    environment.push_str(&format!(
        "MINIO_ROOT_PASSWORD={}\n",
        env_quote(&config.credentials.root_password)
    ));
    environment.push_str(&format!("MINIO_VOLUMES={}\n", env_quote(&config.volumes)));
    environment.push_str(&format!(
        "MINIO_OPTS=\"--address :{} --console-address :{}\"\n",
        config.listen_port, config.console_port
    ));
    if let Some(ec) = config.erasure_coding.as_deref().filter(|ec| !ec.trim().is_empty()) {
        environment.push_str(&format!(
            "MINIO_STORAGE_CLASS_STANDARD={}\n",
            env_quote(&storage_class(ec))
        ));
    }

    GeneratedUnit { unit, environment }
}
