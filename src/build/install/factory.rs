//! Installer factory
//!
//! Picks the installer backend named in `[install]`.

use crate::build::install::{CommandInstaller, DependencyInstaller, IndexInstaller};
use crate::config::schema::{InstallBackend, InstallConfig};
use crate::error::{SlipwayError, SlipwayResult};
use std::path::Path;

/// Create the configured dependency installer.
///
/// Relative index paths resolve against `project_dir`, which is also the
/// working directory of command installers.
pub fn create_installer(
    config: &InstallConfig,
    project_dir: &Path,
) -> SlipwayResult<Box<dyn DependencyInstaller>> {
    match config.backend {
        InstallBackend::Index => {
            let index = config.index.as_ref().ok_or_else(|| {
                SlipwayError::install(
                    "no package index configured: set install.index or use backend = \"command\"",
                )
            })?;
            let index = if index.is_absolute() {
                index.clone()
            } else {
                project_dir.join(index)
            };
            Ok(Box::new(IndexInstaller::new(index)))
        }
        InstallBackend::Command => {
            if config.command.is_empty() {
                return Err(SlipwayError::install("install.command is empty"));
            }
            Ok(Box::new(CommandInstaller::new(
                config.command.clone(),
                project_dir,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn index_backend_resolves_relative_path() {
        let config = InstallConfig {
            index: Some(PathBuf::from("packages")),
            ..Default::default()
        };
        let installer = create_installer(&config, Path::new("/srv/app")).unwrap();
        assert_eq!(installer.name(), "index");
        assert_eq!(installer.cache_key(), "index:/srv/app/packages");
    }

    #[test]
    fn index_backend_requires_index() {
        let err = create_installer(&InstallConfig::default(), Path::new("/")).err().unwrap();
        assert!(err.is_build_failure());
    }

    #[test]
    fn command_backend() {
        let config = InstallConfig {
            backend: InstallBackend::Command,
            ..Default::default()
        };
        let installer = create_installer(&config, Path::new("/")).unwrap();
        assert_eq!(installer.name(), "command");
    }
}
