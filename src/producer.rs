//! Build producers.
//!
//! A [`BuildProducer`] turns an extension project directory into a build
//! artifact on disk: either a distribution zip or an already exploded
//! extension folder. The harness treats the build as opaque and
//! synchronous; it only checks the outcome and the artifact's presence.
//!
//! [`CommandBuildProducer`] covers the common case of running a build tool
//! inside the project directory and picking up its output:
//!
//! | Preset     | Command                        | Artifact                            |
//! |------------|--------------------------------|-------------------------------------|
//! | `gradle()` | `./gradlew hivemqExtensionZip` | `build/hivemq-extension/*.zip`      |
//! | `maven()`  | `mvn package -DskipTests`      | `target/*-distribution.zip`         |

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;
use tracing::{debug, info};

/// Number of trailing stderr lines kept in a build failure.
const BUILD_LOG_TAIL_LINES: usize = 20;

/// Produces a build artifact from a project directory.
pub trait BuildProducer: Send + Sync {
    /// Producer name, used in errors and logs.
    fn name(&self) -> &str;

    /// Builds the project and returns the artifact location.
    ///
    /// # Errors
    ///
    /// - [`Error::BuildFailed`] if the build reports failure
    /// - [`Error::ArtifactMissing`] if the expected output is absent
    fn build(&self, project: &Path) -> Result<PathBuf>;
}

// =============================================================================
// Artifact Locator
// =============================================================================

/// Where a build leaves its artifact, relative to the project directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocator {
    /// Output directory relative to the project root.
    pub dir: PathBuf,
    /// Required file-name suffix (e.g. `.zip`, `-distribution.zip`).
    pub suffix: String,
}

impl ArtifactLocator {
    /// Creates a locator.
    pub fn new(dir: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            suffix: suffix.into(),
        }
    }

    /// Finds the most recently modified matching artifact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ArtifactMissing`] if no file matches.
    pub fn locate(&self, project: &Path) -> Result<PathBuf> {
        let dir = project.join(&self.dir);
        let missing = || Error::ArtifactMissing {
            path: dir.join(format!("*{}", self.suffix)),
        };

        let entries = fs::read_dir(&dir).map_err(|_| missing())?;
        let mut newest: Option<(SystemTime, PathBuf)> = None;

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(&self.suffix));
            if !matches || !path.is_file() {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
                newest = Some((modified, path));
            }
        }

        newest.map(|(_, path)| path).ok_or_else(missing)
    }
}

// =============================================================================
// Command Build Producer
// =============================================================================

/// Runs an external build command inside the project directory.
#[derive(Debug, Clone)]
pub struct CommandBuildProducer {
    name: String,
    program: PathBuf,
    wrapper: Option<String>,
    args: Vec<String>,
    artifact: ArtifactLocator,
}

impl CommandBuildProducer {
    /// Creates a producer running `program args...`.
    pub fn new(
        name: impl Into<String>,
        program: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<String>>,
        artifact: ArtifactLocator,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            wrapper: None,
            args: args.into_iter().map(Into::into).collect(),
            artifact,
        }
    }

    /// Gradle preset using the HiveMQ extension plugin's distribution task.
    pub fn gradle() -> Self {
        Self::new(
            "gradle",
            "gradle",
            ["hivemqExtensionZip", "--quiet"],
            ArtifactLocator::new("build/hivemq-extension", ".zip"),
        )
        .with_wrapper(if cfg!(windows) { "gradlew.bat" } else { "gradlew" })
    }

    /// Maven preset using an assembly producing `*-distribution.zip`.
    pub fn maven() -> Self {
        Self::new(
            "maven",
            "mvn",
            ["package", "-DskipTests", "--batch-mode"],
            ArtifactLocator::new("target", "-distribution.zip"),
        )
        .with_wrapper(if cfg!(windows) { "mvnw.cmd" } else { "mvnw" })
    }

    /// Prefers a wrapper script in the project root over `program` when
    /// present.
    pub fn with_wrapper(mut self, script: impl Into<String>) -> Self {
        self.wrapper = Some(script.into());
        self
    }

    /// Returns the artifact locator.
    pub fn artifact(&self) -> &ArtifactLocator {
        &self.artifact
    }

    /// Resolves the program to run for `project`.
    pub fn program_for(&self, project: &Path) -> PathBuf {
        match &self.wrapper {
            Some(script) if project.join(script).is_file() => project.join(script),
            _ => self.program.clone(),
        }
    }
}

impl BuildProducer for CommandBuildProducer {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(&self, project: &Path) -> Result<PathBuf> {
        let program = self.program_for(project);
        info!(
            producer = %self.name,
            project = %project.display(),
            program = %program.display(),
            "Building extension project"
        );

        let output = Command::new(&program)
            .args(&self.args)
            .current_dir(project)
            .output()
            .map_err(|e| Error::BuildFailed {
                producer: self.name.clone(),
                project: project.to_path_buf(),
                reason: format!("failed to run {}: {}", program.display(), e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(BUILD_LOG_TAIL_LINES)..].join("\n");
            return Err(Error::BuildFailed {
                producer: self.name.clone(),
                project: project.to_path_buf(),
                reason: format!("{}\n{}", output.status, tail),
            });
        }

        let artifact = self.artifact.locate(project)?;
        debug!(artifact = %artifact.display(), "Located build artifact");
        Ok(artifact)
    }
}
