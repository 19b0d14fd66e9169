//! Output and override directory layouts

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{CodegenError, CodegenResult};

/// Generated tree
///
/// ```text
/// app
/// ├── common
/// ├── device
/// │   ├── includes
/// │   └── nodes
/// └── host
///     └── includes
/// ```
///
/// The Intel tree also carries `ocl/` and `host/metric/`.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub base: PathBuf,
    pub common: PathBuf,
    pub device: PathBuf,
    pub device_includes: PathBuf,
    pub device_nodes: PathBuf,
    pub host: PathBuf,
    pub host_includes: PathBuf,
    pub ocl: Option<PathBuf>,
    pub host_metric: Option<PathBuf>,
}

impl OutputLayout {
    pub fn new(base: &Path) -> Self {
        let device = base.join("device");
        let host = base.join("host");
        Self {
            base: base.to_path_buf(),
            common: base.join("common"),
            device_includes: device.join("includes"),
            device_nodes: device.join("nodes"),
            device,
            host_includes: host.join("includes"),
            host,
            ocl: None,
            host_metric: None,
        }
    }

    pub fn intel(base: &Path) -> Self {
        let mut layout = Self::new(base);
        layout.ocl = Some(base.join("ocl"));
        layout.host_metric = Some(layout.host.join("metric"));
        layout
    }

    pub fn xilinx(base: &Path) -> Self {
        Self::new(base)
    }

    pub fn directories(&self) -> Vec<&Path> {
        let mut dirs = vec![
            self.base.as_path(),
            self.common.as_path(),
            self.device.as_path(),
            self.device_includes.as_path(),
            self.device_nodes.as_path(),
            self.host.as_path(),
            self.host_includes.as_path(),
        ];
        dirs.extend(self.ocl.as_deref());
        dirs.extend(self.host_metric.as_deref());
        dirs
    }

    /// Create every missing directory; existing ones are left alone
    pub fn ensure(&self) -> CodegenResult<()> {
        for dir in self.directories() {
            if !dir.is_dir() {
                fs::create_dir_all(dir).map_err(|e| CodegenError::io(dir, e))?;
                debug!("created {}", dir.display());
            }
        }
        Ok(())
    }
}

/// Hand-written artifacts copied in preference to generated ones
///
/// ```text
/// codebase
/// ├── includes       type definitions
/// ├── device
/// │   └── nodes      compute functions
/// └── host           host sources
/// ```
#[derive(Debug, Clone)]
pub struct OverrideDir {
    root: PathBuf,
}

impl OverrideDir {
    pub fn new(root: &Path) -> Self {
        Self { root: root.to_path_buf() }
    }

    fn existing(path: PathBuf) -> Option<PathBuf> {
        path.is_file().then_some(path)
    }

    pub fn include(&self, file: &str) -> Option<PathBuf> {
        Self::existing(self.root.join("includes").join(file))
    }

    pub fn device_node(&self, file: &str) -> Option<PathBuf> {
        Self::existing(self.root.join("device").join("nodes").join(file))
    }

    pub fn host(&self, file: &str) -> Option<PathBuf> {
        Self::existing(self.root.join("host").join(file))
    }
}
