//! Streaming Dataflow Pipeline Compiler
//!
//! This library turns a linear pipeline of replicated streaming operators
//! into the device and host sources of an FPGA application, either for
//! Intel OpenCL (single work-item kernels wired by channels) or for
//! Xilinx HLS (functors composed by an all-to-all dataflow library).
//!
//! # Example
//!
//! ```rust,no_run
//! use dataflow_codegen::{
//!     DispatchPolicy, GatherPolicy, Operator, OperatorKind, Pipeline, PipelineConfig,
//!     RewriteOptions, Target,
//! };
//!
//! let mut pipeline = Pipeline::new(PipelineConfig::new("sd", "input_t", Target::Intel));
//! pipeline.add(Operator::new("mr", 2, OperatorKind::MemoryReader, GatherPolicy::None, DispatchPolicy::RR)?)?;
//! pipeline.add(Operator::new("avg", 2, OperatorKind::Map, GatherPolicy::LB, DispatchPolicy::RR)?)?;
//! pipeline.add(Operator::new("mw", 1, OperatorKind::MemoryWriter, GatherPolicy::LB, DispatchPolicy::None)?)?;
//! let report = pipeline.generate_code(&RewriteOptions::default())?;
//! println!("{} artifacts", report.artifacts.len());
//! # Ok::<(), dataflow_codegen::CodegenError>(())
//! ```

pub mod artifact;
pub mod backend;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod error;
pub mod keyby;
pub mod layout;
pub mod legacy;
pub mod lexer;
pub mod operator;
pub mod pipeline;
pub mod policy;
pub mod render;
pub mod splice;

pub use artifact::{ArtifactOutcome, ArtifactRecord, GenerationReport, RewriteOptions};
pub use backend::{Backend, IntelGenerator, XilinxGenerator};
pub use buffer::{Buffer, BufferAccess, BufferValue, GlobalBuffer, LocalBuffer, PrivateBuffer};
pub use channel::Channel;
pub use config::{OperatorSpec, PipelineConfig, PipelineSpec};
pub use error::{CodegenError, CodegenResult};
pub use keyby::{derive_keyby_lambdas, KeyByLambda};
pub use layout::{OutputLayout, OverrideDir};
pub use legacy::{LegacyDispatchMode, LegacyGatherMode, LegacyNodeKind};
pub use operator::Operator;
pub use pipeline::Pipeline;
pub use policy::{DispatchPolicy, GatherPolicy, OperatorKind, Target, TransferMode};
pub use render::{Render, Template, TemplateSet};
pub use splice::splice_flat_map;

/// Load a JSON pipeline description and build its pipeline
pub fn load_pipeline(path: &std::path::Path) -> CodegenResult<Pipeline> {
    let spec = PipelineSpec::load(path)?;
    Pipeline::from_spec(&spec)
}
