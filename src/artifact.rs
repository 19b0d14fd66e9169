//! Artifact emission
//!
//! Every generated file goes through [`write_artifact`]: an existing file is
//! kept unless a rewrite is requested for its artifact class. Files from the
//! override directory always replace the generated ones.

use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{CodegenError, CodegenResult};

/// Per-artifact-class rewrite requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteOptions {
    /// Rewrite every artifact
    pub all: bool,
    /// Aggregated device sources and kernels
    pub device: bool,
    /// Per-operator compute functions
    pub functions: bool,
    /// Type definitions
    pub tuples: bool,
    /// Host orchestration
    pub host: bool,
    /// Host pipeline wiring and adapters
    pub pipe: bool,
    /// Key-extraction lambdas
    pub keyby: bool,
}

impl RewriteOptions {
    pub fn everything() -> Self {
        Self { all: true, ..Self::default() }
    }

    pub fn device(&self) -> bool {
        self.all || self.device
    }

    pub fn functions(&self) -> bool {
        self.all || self.functions
    }

    pub fn tuples(&self) -> bool {
        self.all || self.tuples
    }

    pub fn host(&self) -> bool {
        self.all || self.host
    }

    pub fn pipe(&self) -> bool {
        self.all || self.pipe
    }

    pub fn keyby(&self) -> bool {
        self.all || self.keyby
    }

    /// Any device-side class requested
    pub fn any_device(&self) -> bool {
        self.device() || self.functions() || self.tuples()
    }
}

/// What happened to one artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactOutcome {
    Generated,
    Copied,
    Skipped,
}

impl fmt::Display for ArtifactOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactOutcome::Generated => write!(f, "generated"),
            ArtifactOutcome::Copied => write!(f, "copied"),
            ArtifactOutcome::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRecord {
    pub path: PathBuf,
    pub outcome: ArtifactOutcome,
}

/// Artifacts touched by one generation run, in emission order
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationReport {
    pub artifacts: Vec<ArtifactRecord>,
}

impl GenerationReport {
    pub fn record(&mut self, path: &Path, outcome: ArtifactOutcome) {
        self.artifacts.push(ArtifactRecord { path: path.to_path_buf(), outcome });
    }

    pub fn count(&self, outcome: ArtifactOutcome) -> usize {
        self.artifacts.iter().filter(|a| a.outcome == outcome).count()
    }

    pub fn outcome_of(&self, path: &Path) -> Option<ArtifactOutcome> {
        self.artifacts
            .iter()
            .rev()
            .find(|a| a.path == path)
            .map(|a| a.outcome)
    }

    pub fn merge(&mut self, other: GenerationReport) {
        self.artifacts.extend(other.artifacts);
    }
}

/// Write `path` from `render` unless it exists and `rewrite` is unset.
///
/// `render` is only invoked when the file is actually written.
pub fn write_artifact<F>(
    path: &Path,
    rewrite: bool,
    report: &mut GenerationReport,
    render: F,
) -> CodegenResult<ArtifactOutcome>
where
    F: FnOnce() -> CodegenResult<String>,
{
    if path.is_file() && !rewrite {
        debug!("keeping existing {}", path.display());
        report.record(path, ArtifactOutcome::Skipped);
        return Ok(ArtifactOutcome::Skipped);
    }

    let content = render()?;
    fs::write(path, content).map_err(|e| CodegenError::io(path, e))?;
    info!("generated {}", path.display());
    report.record(path, ArtifactOutcome::Generated);
    Ok(ArtifactOutcome::Generated)
}

/// Copy `source` over `dest` when `source` exists; returns whether it did
pub fn copy_override(
    source: Option<PathBuf>,
    dest: &Path,
    report: &mut GenerationReport,
) -> CodegenResult<bool> {
    let Some(source) = source.filter(|s| s.is_file()) else {
        return Ok(false);
    };
    fs::copy(&source, dest).map_err(|e| CodegenError::io(&source, e))?;
    debug!("copied {} to {}", source.display(), dest.display());
    report.record(dest, ArtifactOutcome::Copied);
    Ok(true)
}

/// A file that only lives as long as this value
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
}

impl TempArtifact {
    pub fn create(path: PathBuf, content: &str) -> CodegenResult<Self> {
        fs::write(&path, content).map_err(|e| CodegenError::io(&path, e))?;
        debug!("wrote temporary {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> CodegenResult<String> {
        fs::read_to_string(&self.path).map_err(|e| CodegenError::io(&self.path, e))
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if self.path.is_file() {
            // nothing to propagate to from a destructor
            let _ = fs::remove_file(&self.path);
        }
    }
}
