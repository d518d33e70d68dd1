//! Resolves the server and client binaries onto a target.
//!
//! Downloads on the target first, then falls back to artifacts in the
//! operator's local package directory.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::model::ServiceSettings;
use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::shell::HostShell;
use crate::utils::{sh_quote, sha256_hash};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const SIDECAR_EXTENSIONS: &[&str] = &[".md5", ".sha256"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Product {
    /// The object-storage server, required
    Server,
    /// The `mc` client tool, optional
    Client,
}

impl Product {
    pub fn binary_name(&self) -> &'static str {
        match self {
            Product::Server => "minio",
            Product::Client => "mc",
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinuxArch {
    Amd64,
    Arm64,
    /// Any other `uname -m` value, used verbatim in download URLs
    Other(String),
}

impl LinuxArch {
    /// Map `uname -m` output. `None` only for empty output.
    pub fn from_uname(machine: &str) -> Option<Self> {
        match machine.trim() {
            "" => None,
            "x86_64" | "amd64" => Some(LinuxArch::Amd64),
            "aarch64" | "arm64" => Some(LinuxArch::Arm64),
            other => Some(LinuxArch::Other(other.to_string())),
        }
    }

    /// Architecture named in `file -b` output
    pub fn from_file_signature(signature: &str) -> Option<Self> {
        let signature = signature.to_lowercase();
        if signature.contains("x86-64") || signature.contains("x86_64") || signature.contains("amd64") {
            Some(LinuxArch::Amd64)
        } else if signature.contains("aarch64") || signature.contains("arm64") {
            Some(LinuxArch::Arm64)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            LinuxArch::Amd64 => "amd64",
            LinuxArch::Arm64 => "arm64",
            LinuxArch::Other(name) => name,
        }
    }

    /// Whether `file -b` output can identify binaries for this architecture
    pub fn has_signature(&self) -> bool {
        !matches!(self, LinuxArch::Other(_))
    }
}

/// Whether a file in the package directory can be a `product` artifact
pub fn is_candidate_name(name: &str, product: Product) -> bool {
    name.contains(product.binary_name())
        && !SIDECAR_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub server_path: String,
    /// `None` when the client tool could not be installed
    pub client_path: Option<String>,
}

pub struct BinaryInstaller {
    target: Arc<dyn HostShell>,
    local: Arc<dyn HostShell>,
    settings: ServiceSettings,
}

impl BinaryInstaller {
    pub fn new(target: Arc<dyn HostShell>, local: Arc<dyn HostShell>, settings: ServiceSettings) -> Self {
        Self {
            target,
            local,
            settings,
        }
    }

    fn destination(&self, product: Product) -> String {
        format!(
            "{}/{}",
            self.settings.install_dir.trim_end_matches('/'),
            product.binary_name()
        )
    }

    fn url(&self, product: Product, arch: &LinuxArch) -> String {
        let template = match product {
            Product::Server => &self.settings.download_url,
            Product::Client => &self.settings.mc_download_url,
        };
        template.replace("{arch}", arch.as_str())
    }

    pub async fn detect_arch(&self) -> Option<LinuxArch> {
        let output = self.target.exec("uname -m").await;
        let arch = output.success().then(|| LinuxArch::from_uname(output.text())).flatten();
        match &arch {
            Some(arch) if arch.has_signature() => {
                debug!(host = %self.target.target(), "target architecture {}", arch.as_str())
            }
            Some(arch) => warn!(
                host = %self.target.target(),
                "no binary signature known for {}, local packages are verified by running them",
                arch.as_str()
            ),
            None => warn!(host = %self.target.target(), "cannot read the target architecture: {}", output.error_detail()),
        }
        arch
    }

    /// Fetch on the target with curl, then wget
    pub async fn download(&self, product: Product, arch: &LinuxArch) -> bool {
        let url = sh_quote(&self.url(product, arch));
        let dest = self.destination(product);
        let partial = sh_quote(&format!("{}.part", dest));
        let finish = format!("chmod 755 {p} && mv -f {p} {d}", p = partial, d = sh_quote(&dest));

        let attempts = [
            format!("curl -fsSL -o {} {} && {}", partial, url, finish),
            format!("wget -q -O {} {} && {}", partial, url, finish),
        ];
        for command in attempts {
            let output = self.target.exec_with_timeout(&command, DOWNLOAD_TIMEOUT).await;
            if output.success() {
                info!(host = %self.target.target(), "downloaded {} to {}", product, dest);
                return true;
            }
            warn!(host = %self.target.target(), "download of {} failed: {}", product, output.error_detail());
        }
        let _ = self.target.exec(&format!("rm -f {}", partial)).await;
        false
    }

    /// Artifacts for `product` in the local package directory, sorted by name
    pub async fn local_candidates(&self, product: Product) -> Vec<PathBuf> {
        let dir = &self.settings.local_package_dir;
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!("package directory {} unavailable: {}", dir.display(), e);
                return Vec::new();
            }
        };

        let mut candidates = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            let name_matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| is_candidate_name(n, product))
                .unwrap_or(false);
            if is_file && name_matches {
                candidates.push(path);
            }
        }
        candidates.sort();
        candidates
    }

    /// False only when a `.sha256` sidecar exists and disagrees
    async fn checksum_matches(&self, path: &Path, contents: &[u8]) -> bool {
        let sidecar = File::new(format!("{}.sha256", path.display()));
        let Ok(expected) = sidecar.read_string().await else {
            return true;
        };
        let expected = expected.split_whitespace().next().unwrap_or("").to_lowercase();
        expected == sha256_hash(contents)
    }

    /// Compare the artifact's `file -b` signature with a known architecture
    async fn signature_matches(&self, path: &Path, arch: &LinuxArch) -> bool {
        let quoted = sh_quote(&path.display().to_string());
        let output = self.local.exec(&format!("file -b {}", quoted)).await;
        output.success() && LinuxArch::from_file_signature(&output.stdout).as_ref() == Some(arch)
    }

    /// Stage the artifact on the target and keep it only if `--version` runs
    async fn place_if_runnable(&self, dest: &str, contents: &[u8]) -> bool {
        let staged = format!("{}.candidate", dest);
        if let Err(e) = self.target.write_file(&staged, contents, 0o755).await {
            warn!(host = %self.target.target(), "cannot stage {}: {}", staged, e);
            return false;
        }

        let quoted = sh_quote(&staged);
        let runs = self
            .target
            .exec(&format!("timeout 5 {} --version", quoted))
            .await
            .success();
        if !runs {
            let _ = self.target.exec(&format!("rm -f {}", quoted)).await;
            return false;
        }
        self.target
            .exec(&format!("mv -f {} {}", quoted, sh_quote(dest)))
            .await
            .success()
    }

    async fn install_local_candidate(&self, product: Product, arch: Option<&LinuxArch>) -> Option<String> {
        let dest = self.destination(product);
        for path in self.local_candidates(product).await {
            let contents = match File::new(&path).read_bytes().await {
                Ok(contents) => contents,
                Err(e) => {
                    warn!("cannot read {}: {}", path.display(), e);
                    continue;
                }
            };
            if !self.checksum_matches(&path, &contents).await {
                warn!("checksum mismatch for {}, skipping", path.display());
                continue;
            }
            let known = match arch {
                Some(arch) if arch.has_signature() => arch,
                _ => {
                    if self.place_if_runnable(&dest, &contents).await {
                        info!(host = %self.target.target(), "installed {} from {}", product, path.display());
                        return Some(dest);
                    }
                    debug!("{} does not run on the target", path.display());
                    continue;
                }
            };
            if !self.signature_matches(&path, known).await {
                debug!("{} does not match the target architecture", path.display());
                continue;
            }
            match self.target.write_file(&dest, &contents, 0o755).await {
                Ok(()) => {
                    info!(host = %self.target.target(), "installed {} from {}", product, path.display());
                    return Some(dest);
                }
                Err(e) => warn!(host = %self.target.target(), "cannot place {}: {}", path.display(), e),
            }
        }
        None
    }

    /// Place `product` on the target and return its path
    pub async fn resolve_binary(&self, product: Product) -> Result<String, DeployError> {
        let arch = self.detect_arch().await;
        if let Some(arch) = &arch {
            if self.download(product, arch).await {
                return Ok(self.destination(product));
            }
        }

        info!(host = %self.target.target(), "falling back to local packages for {}", product);
        self.install_local_candidate(product, arch.as_ref())
            .await
            .ok_or_else(|| {
                DeployError::InstallResolutionExhausted(format!(
                    "{} for {}",
                    product,
                    self.target.target()
                ))
            })
    }

    /// Install the server, then the client tool. A missing client only
    /// disables the later smoke test.
    pub async fn install(&self) -> Result<InstallOutcome, DeployError> {
        let server_path = self.resolve_binary(Product::Server).await?;
        let client_path = match self.resolve_binary(Product::Client).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(host = %self.target.target(), "client tool not installed: {}", e);
                None
            }
        };
        Ok(InstallOutcome {
            server_path,
            client_path,
        })
    }
}
