//! Dependency installation backends
//!
//! An installer resolves a [`DependencyManifest`] into a directory of
//! installed packages. The result becomes the install layer under
//! [`DEPS_PREFIX`]:
//! - `index`: a local package index directory
//! - `command`: an operator-supplied installer command (pip and friends)

mod command;
mod factory;
mod index;
mod installer;

pub use command::CommandInstaller;
pub use factory::create_installer;
pub use index::IndexInstaller;
pub use installer::{DependencyInstaller, InstalledPackage};

use crate::build::manifest::{normalize_name, parse_version};
use std::path::Path;
use tracing::debug;

/// Where installed packages live inside the image
pub const DEPS_PREFIX: &str = "/opt/slipway/site-packages";

/// Max number of output lines kept in installer error messages.
const INSTALL_ERROR_TAIL_LINES: usize = 40;

/// Last lines of combined installer output, for error diagnostics
pub(crate) fn install_error_output(stdout: &str, stderr: &str) -> String {
    let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let start = lines.len().saturating_sub(INSTALL_ERROR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Read `*.dist-info/METADATA` records under `target`
pub(crate) fn scan_installed(target: &Path) -> Vec<InstalledPackage> {
    let Ok(entries) = std::fs::read_dir(target) else {
        return vec![];
    };

    let mut packages: Vec<InstalledPackage> = entries
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().ends_with(".dist-info"))
        .filter_map(|e| {
            let metadata = std::fs::read_to_string(e.path().join("METADATA")).ok()?;
            let field = |key: &str| {
                metadata
                    .lines()
                    .find_map(|l| l.strip_prefix(key).map(|v| v.trim().to_string()))
            };
            let name = field("Name:")?;
            let version = field("Version:")?;
            if parse_version(&version).is_err() {
                debug!("Installed {} has non-release version {}", name, version);
            }
            Some(InstalledPackage {
                name: normalize_name(&name),
                version,
            })
        })
        .collect();

    packages.sort_by(|a, b| a.name.cmp(&b.name));
    packages
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn error_output_keeps_tail() {
        let stdout: String = (0..100).map(|i| format!("line {i}\n")).collect();
        let out = install_error_output(&stdout, "ERROR: resolution failed");
        assert_eq!(out.lines().count(), INSTALL_ERROR_TAIL_LINES);
        assert!(out.ends_with("ERROR: resolution failed"));
    }

    #[test]
    fn scan_reads_dist_info() {
        let dir = TempDir::new().unwrap();
        let info = dir.path().join("Flask-3.0.0.dist-info");
        std::fs::create_dir_all(&info).unwrap();
        std::fs::write(info.join("METADATA"), "Metadata-Version: 2.1\nName: Flask\nVersion: 3.0.0\n")
            .unwrap();
        std::fs::create_dir_all(dir.path().join("flask")).unwrap();

        let packages = scan_installed(dir.path());

        assert_eq!(
            packages,
            vec![InstalledPackage {
                name: "flask".to_string(),
                version: "3.0.0".to_string()
            }]
        );
    }
}
