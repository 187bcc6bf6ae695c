//! Build plans
//!
//! A plan is the ordered list of builder steps derived from configuration.
//! The order is checked statically before any step runs, so a plan that
//! would copy source ahead of the dependency install never touches the
//! store.

use crate::build::ImageBuilder;
use crate::config::schema::Config;
use crate::error::{SlipwayError, SlipwayResult};
use crate::layer::{Image, Layer, LayerKind};
use crate::supervisor::LaunchConfig;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One builder operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    SelectBase(String),
    SetWorkdir(String),
    CopyManifest(PathBuf),
    InstallDependencies,
    CopySource { tree: PathBuf, ignore: Vec<String> },
    DeclarePort(u16),
    SetEnv(String, String),
    SetEntrypoint(Vec<String>),
}

impl Step {
    /// Layer kind the step produces, if any
    pub fn layer_kind(&self) -> Option<LayerKind> {
        match self {
            Self::SelectBase(_) => Some(LayerKind::Base),
            Self::SetWorkdir(_) => Some(LayerKind::Workdir),
            Self::CopyManifest(_) => Some(LayerKind::CopyManifest),
            Self::InstallDependencies => Some(LayerKind::InstallDependencies),
            Self::CopySource { .. } => Some(LayerKind::CopySource),
            Self::DeclarePort(_) | Self::SetEnv(..) | Self::SetEntrypoint(_) => None,
        }
    }

    fn name(&self) -> String {
        match self.layer_kind() {
            Some(kind) => kind.to_string(),
            None => match self {
                Self::DeclarePort(_) => "declare_port",
                Self::SetEnv(..) => "set_env",
                _ => "set_entrypoint",
            }
            .to_string(),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelectBase(reference) => write!(f, "FROM {}", reference),
            Self::SetWorkdir(path) => write!(f, "WORKDIR {}", path),
            Self::CopyManifest(path) => write!(f, "COPY {}", path.display()),
            Self::InstallDependencies => write!(f, "RUN install"),
            Self::CopySource { tree, .. } => write!(f, "COPY {}", tree.display()),
            Self::DeclarePort(port) => write!(f, "EXPOSE {}", port),
            Self::SetEnv(key, value) => write!(f, "ENV {}={}", key, value),
            Self::SetEntrypoint(argv) => write!(f, "ENTRYPOINT {:?}", argv),
        }
    }
}

/// A validated, ordered list of steps
#[derive(Debug, Clone)]
pub struct BuildPlan {
    steps: Vec<Step>,
}

impl BuildPlan {
    /// Plan from explicit steps, rejecting any out-of-order sequence
    pub fn from_steps(steps: Vec<Step>) -> SlipwayResult<Self> {
        Self::validate(&steps)?;
        Ok(Self { steps })
    }

    /// Standard plan for a project.
    ///
    /// Paths in `[build]` resolve against `project_dir`; the entrypoint is
    /// the `slipway supervise` command for `launch`.
    pub fn from_config(config: &Config, project_dir: &Path, launch: &LaunchConfig) -> SlipwayResult<Self> {
        let build = &config.build;
        let base = build.base.clone().ok_or_else(|| {
            SlipwayError::User("no base image configured: set build.base".to_string())
        })?;

        let mut steps = vec![
            Step::SelectBase(base),
            Step::SetWorkdir(build.workdir.clone()),
            Step::CopyManifest(project_dir.join(&build.manifest)),
            Step::InstallDependencies,
            Step::CopySource {
                tree: project_dir.join(&build.source),
                ignore: build.ignore.clone(),
            },
            Step::DeclarePort(build.port),
        ];
        steps.extend(
            build
                .env
                .iter()
                .map(|(k, v)| Step::SetEnv(k.clone(), v.clone())),
        );
        steps.push(Step::SetEntrypoint(launch.to_args()));

        Self::from_steps(steps)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Check layer steps follow the fixed order exactly once each, and
    /// that the entrypoint comes last.
    pub fn validate(steps: &[Step]) -> SlipwayResult<()> {
        let mut expected = LayerKind::ORDER.iter();

        for (i, step) in steps.iter().enumerate() {
            if let Some(kind) = step.layer_kind() {
                match expected.next() {
                    Some(next) if *next == kind => {}
                    Some(next) => {
                        return Err(SlipwayError::BuildOrder {
                            step: step.name(),
                            reason: format!("expected {} at this point", next),
                        })
                    }
                    None => {
                        return Err(SlipwayError::BuildOrder {
                            step: step.name(),
                            reason: "all layers are already built".to_string(),
                        })
                    }
                }
            }
            if matches!(step, Step::SetEntrypoint(_)) && i + 1 != steps.len() {
                return Err(SlipwayError::BuildOrder {
                    step: step.name(),
                    reason: "the entrypoint must be the final step".to_string(),
                });
            }
        }

        if let Some(missing) = expected.next() {
            return Err(SlipwayError::BuildOrder {
                step: missing.to_string(),
                reason: "the plan never produces this layer".to_string(),
            });
        }
        if !matches!(steps.last(), Some(Step::SetEntrypoint(_))) {
            return Err(SlipwayError::BuildOrder {
                step: "set_entrypoint".to_string(),
                reason: "the plan has no entrypoint".to_string(),
            });
        }
        Ok(())
    }

    /// Run every step, calling `on_layer` as each layer is produced
    pub async fn execute<F>(&self, mut builder: ImageBuilder, mut on_layer: F) -> SlipwayResult<Image>
    where
        F: FnMut(&Layer),
    {
        for step in &self.steps {
            debug!("Step: {}", step);
            let layer = match step {
                Step::SelectBase(reference) => Some(builder.select_base(reference).await?),
                Step::SetWorkdir(path) => Some(builder.set_workdir(path).await?),
                Step::CopyManifest(path) => Some(builder.copy_manifest(path).await?),
                Step::InstallDependencies => Some(builder.install_dependencies().await?),
                Step::CopySource { tree, ignore } => Some(builder.copy_source(tree, ignore).await?),
                Step::DeclarePort(port) => {
                    builder.declare_port(*port)?;
                    None
                }
                Step::SetEnv(key, value) => {
                    builder.set_env(key.clone(), value.clone());
                    None
                }
                Step::SetEntrypoint(argv) => return builder.set_entrypoint(argv.clone()).await,
            };
            if let Some(layer) = layer {
                on_layer(&layer);
            }
        }

        Err(SlipwayError::BuildOrder {
            step: "set_entrypoint".to_string(),
            reason: "the plan has no entrypoint".to_string(),
        })
    }
}
