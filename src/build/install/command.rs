//! External installer command
//!
//! Runs an operator-supplied command such as
//! `pip install --no-cache-dir --target {target} -r {manifest}` with package
//! caches redirected into the step's scratch directory.

use crate::build::install::{install_error_output, scan_installed, DependencyInstaller, InstalledPackage};
use crate::build::manifest::DependencyManifest;
use crate::error::{SlipwayError, SlipwayResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Installs by running a command template
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    template: Vec<String>,
    working_dir: PathBuf,
}

impl CommandInstaller {
    /// `template` may reference `{manifest}` and `{target}`
    pub fn new(template: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            template,
            working_dir: working_dir.into(),
        }
    }

    fn render(&self, manifest: &Path, target: &Path) -> Vec<String> {
        let manifest = manifest.display().to_string();
        let target = target.display().to_string();
        self.template
            .iter()
            .map(|arg| arg.replace("{manifest}", &manifest).replace("{target}", &target))
            .collect()
    }
}

#[async_trait]
impl DependencyInstaller for CommandInstaller {
    fn name(&self) -> &'static str {
        "command"
    }

    fn cache_key(&self) -> String {
        format!("command:{}", self.template.join("\u{1f}"))
    }

    async fn install(
        &self,
        manifest_path: &Path,
        manifest: &DependencyManifest,
        target: &Path,
        scratch: &Path,
    ) -> SlipwayResult<Vec<InstalledPackage>> {
        let argv = self.render(manifest_path, target);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SlipwayError::install("install.command is empty"))?;

        debug!("Executing installer: {:?}", argv);
        info!(
            "Installing {} requirements with {}",
            manifest.requirements.len(),
            program
        );

        let output = Command::new(program)
            .args(args)
            .current_dir(&self.working_dir)
            .env("PIP_NO_CACHE_DIR", "1")
            .env("PIP_DISABLE_PIP_VERSION_CHECK", "1")
            .env("XDG_CACHE_HOME", scratch)
            .env("TMPDIR", scratch)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| SlipwayError::install(format!("could not run '{}': {}", program, e)))?;

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SlipwayError::install(format!(
                "'{}' exited with {}\n{}",
                program,
                output.status,
                install_error_output(&stdout, &stderr)
            )));
        }

        Ok(scan_installed(target))
    }
}
