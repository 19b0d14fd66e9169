//! Pipeline configuration
//!
//! [`PipelineConfig`] is the configuration surface of a pipeline.
//! [`PipelineSpec`] is its JSON description, which also lists the operators
//! and their buffers so a whole pipeline can be generated from a file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::buffer::{Buffer, BufferAccess, BufferValue};
use crate::error::{CodegenError, CodegenResult};
use crate::operator::Operator;
use crate::policy::{DispatchPolicy, GatherPolicy, OperatorKind, Target, TransferMode};

/// Configuration shared by every generated artifact of a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Destination directory of the generated tree
    pub dest_dir: PathBuf,
    /// Datatype entering the first operator
    pub datatype: String,
    pub target: Target,
    #[serde(default)]
    pub transfer_mode: TransferMode,
    /// User constants, emitted next to the parallelism constants
    #[serde(default)]
    pub constants: BTreeMap<String, String>,
    /// Directory of hand-written artifacts taking precedence over generation
    #[serde(default)]
    pub codebase: Option<PathBuf>,
    /// Directory of user templates shadowing the built-in ones
    #[serde(default)]
    pub templates: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn new(dest_dir: impl Into<PathBuf>, datatype: &str, target: Target) -> Self {
        Self {
            dest_dir: dest_dir.into(),
            datatype: datatype.to_string(),
            target,
            transfer_mode: TransferMode::default(),
            constants: BTreeMap::new(),
            codebase: None,
            templates: None,
        }
    }

    pub fn with_transfer_mode(mut self, mode: TransferMode) -> Self {
        self.transfer_mode = mode;
        self
    }

    pub fn with_constant(mut self, key: &str, value: impl ToString) -> Self {
        self.constants.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_codebase(mut self, dir: impl Into<PathBuf>) -> Self {
        self.codebase = Some(dir.into());
        self
    }

    pub fn with_templates(mut self, dir: impl Into<PathBuf>) -> Self {
        self.templates = Some(dir.into());
        self
    }

    /// Application name, taken from the last component of the destination
    pub fn app_name(&self) -> String {
        self.dest_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "app".to_string())
    }

    pub fn validate(&self) -> CodegenResult<()> {
        if self.dest_dir.as_os_str().is_empty() {
            return Err(CodegenError::configuration("destination directory cannot be empty"));
        }
        if self.datatype.is_empty() {
            return Err(CodegenError::configuration("pipeline datatype cannot be empty"));
        }
        if let Some(codebase) = &self.codebase {
            if !codebase.is_dir() {
                return Err(CodegenError::configuration(format!(
                    "codebase '{}' is not a directory",
                    codebase.display()
                )));
            }
        }
        Ok(())
    }
}

/// Buffer entry of a JSON pipeline description
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum BufferSpec {
    Private {
        datatype: String,
        name: String,
        #[serde(default = "default_size")]
        size: Vec<usize>,
        #[serde(default)]
        value: Option<BufferValue>,
        #[serde(default)]
        ptr: bool,
        #[serde(default)]
        attributes: Option<String>,
    },
    Local {
        datatype: String,
        name: String,
        #[serde(default = "default_size")]
        size: Vec<usize>,
        #[serde(default)]
        value: Option<BufferValue>,
        #[serde(default)]
        attributes: Option<String>,
    },
    Global {
        datatype: String,
        name: String,
        #[serde(default = "default_size")]
        size: Vec<usize>,
        #[serde(default)]
        access: BufferAccess,
        #[serde(default = "default_true")]
        ptr: bool,
        #[serde(default)]
        value: Option<BufferValue>,
    },
}

fn default_size() -> Vec<usize> {
    vec![1]
}

fn default_true() -> bool {
    true
}

impl BufferSpec {
    pub fn build(&self) -> CodegenResult<Buffer> {
        match self {
            BufferSpec::Private { datatype, name, size, value, ptr, attributes } => {
                Buffer::private(datatype, name, size, value.clone(), *ptr, attributes.as_deref())
            }
            BufferSpec::Local { datatype, name, size, value, attributes } => {
                Buffer::local(datatype, name, size, value.clone(), attributes.as_deref())
            }
            BufferSpec::Global { datatype, name, size, access, ptr, value } => {
                Buffer::global(datatype, name, size, *access, *ptr, value.clone())
            }
        }
    }
}

/// Operator entry of a JSON pipeline description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorSpec {
    pub name: String,
    #[serde(alias = "par")]
    pub parallelism: usize,
    pub kind: OperatorKind,
    #[serde(alias = "gather", alias = "gather_mode")]
    pub gather_policy: GatherPolicy,
    #[serde(alias = "dispatch", alias = "dispatch_mode")]
    pub dispatch_policy: DispatchPolicy,
    #[serde(default, alias = "o_datatype")]
    pub output_type: Option<String>,
    #[serde(default)]
    pub channel_depth: usize,
    #[serde(default)]
    pub begin_function: bool,
    #[serde(default)]
    pub compute_function: bool,
    #[serde(default)]
    pub end_function: bool,
    #[serde(default)]
    pub buffers: Vec<BufferSpec>,
}

impl OperatorSpec {
    pub fn build(&self) -> CodegenResult<Operator> {
        let mut op = Operator::new(
            &self.name,
            self.parallelism,
            self.kind,
            self.gather_policy,
            self.dispatch_policy,
        )?
        .with_channel_depth(self.channel_depth)
        .with_begin_function(self.begin_function)
        .with_compute_function(self.compute_function)
        .with_end_function(self.end_function);

        if let Some(t) = &self.output_type {
            op = op.with_output_type(t);
        }
        for buffer in &self.buffers {
            op.add_buffer(buffer.build()?)?;
        }
        Ok(op)
    }
}

/// JSON description of a whole pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    #[serde(flatten)]
    pub config: PipelineConfig,
    pub operators: Vec<OperatorSpec>,
}

impl PipelineSpec {
    pub fn from_json(text: &str) -> CodegenResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a description, resolving relative directories against the
    /// description's own directory
    pub fn load(path: &Path) -> CodegenResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| CodegenError::io(path, e))?;
        let mut spec = Self::from_json(&text)?;
        if let Some(base) = path.parent() {
            spec.config.codebase = spec.config.codebase.map(|d| rebase(base, d));
            spec.config.templates = spec.config.templates.map(|d| rebase(base, d));
        }
        Ok(spec)
    }
}

fn rebase(base: &Path, dir: PathBuf) -> PathBuf {
    if dir.is_absolute() {
        dir
    } else {
        base.join(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIKE_DETECTION: &str = r#"{
        "dest_dir": "sdtc",
        "datatype": "input_t",
        "target": "xilinx",
        "transfer_mode": "host",
        "constants": { "WIN_DIM": "16", "THRESHOLD": "0.25f" },
        "operators": [
            { "name": "mr", "par": 2, "kind": "memory_reader", "gather": "NONE", "dispatch": "KB" },
            { "name": "average_calculator", "par": 2, "kind": "map", "gather": "LB",
              "dispatch": "RR", "o_datatype": "tuple_t",
              "buffers": [
                  { "scope": "private", "datatype": "int", "name": "sizes", "size": [16] },
                  { "scope": "local", "datatype": "float", "name": "windows", "size": [16, 16] }
              ] },
            { "name": "spike_detector", "par": 2, "kind": "filter", "gather": "LB", "dispatch": "LB" },
            { "name": "mw", "par": 2, "kind": "MEMORY_WRITER", "gather": "LB", "dispatch": "NONE" }
        ]
    }"#;

    #[test]
    fn test_parse_description() {
        let spec = PipelineSpec::from_json(SPIKE_DETECTION).unwrap();
        assert_eq!(spec.config.target, Target::Xilinx);
        assert_eq!(spec.config.transfer_mode, TransferMode::Host);
        assert_eq!(spec.config.app_name(), "sdtc");
        assert_eq!(spec.config.constants["THRESHOLD"], "0.25f");
        assert_eq!(spec.operators.len(), 4);

        let avg = spec.operators[1].build().unwrap();
        assert_eq!(avg.output_type.as_deref(), Some("tuple_t"));
        assert_eq!(avg.buffers().len(), 2);
        assert_eq!(avg.gather_policy, GatherPolicy::LB);
    }

    #[test]
    fn test_global_buffer_defaults() {
        let spec: BufferSpec =
            serde_json::from_str(r#"{ "scope": "global", "datatype": "float", "name": "w", "size": [8] }"#)
                .unwrap();
        match spec.build().unwrap() {
            Buffer::Global(g) => {
                assert!(g.ptr);
                assert_eq!(g.access, BufferAccess::ReadAll);
            }
            _ => panic!("expected a global buffer"),
        }
    }

    #[test]
    fn test_invalid_global_constant_rejected() {
        let spec: BufferSpec = serde_json::from_str(
            r#"{ "scope": "global", "datatype": "int", "name": "k", "ptr": false }"#,
        )
        .unwrap();
        assert!(matches!(spec.build(), Err(CodegenError::Configuration { .. })));
    }

    #[test]
    fn test_missing_codebase_is_configuration_error() {
        let config = PipelineConfig::new("out", "input_t", Target::Intel)
            .with_codebase("/definitely/not/here");
        assert!(matches!(config.validate(), Err(CodegenError::Configuration { .. })));
    }
}
