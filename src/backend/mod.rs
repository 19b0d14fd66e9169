//! Target backends
//!
//! Exactly two backends exist, so they form a closed enum rather than a
//! trait object registry. Each exposes the same four steps:
//! validate, prepare_layout, emit_device and emit_host.

pub mod intel;
pub mod xilinx;

use std::collections::BTreeMap;

use crate::artifact::{GenerationReport, RewriteOptions};
use crate::error::{CodegenError, CodegenResult};
use crate::layout::{OutputLayout, OverrideDir};
use crate::operator::Operator;
use crate::pipeline::Pipeline;
use crate::policy::{OperatorKind, Target};
use crate::render::Render;

pub use intel::IntelGenerator;
pub use xilinx::XilinxGenerator;

#[derive(Debug, Clone)]
pub enum Backend {
    Intel(IntelGenerator),
    Xilinx(XilinxGenerator),
}

impl Backend {
    pub fn intel() -> Self {
        Backend::Intel(IntelGenerator::new())
    }

    pub fn xilinx() -> Self {
        Backend::Xilinx(XilinxGenerator::new())
    }

    pub fn target(&self) -> Target {
        match self {
            Backend::Intel(_) => Target::Intel,
            Backend::Xilinx(_) => Target::Xilinx,
        }
    }

    /// Target-specific legality checks over a finalized pipeline
    pub fn validate(&self, pipeline: &Pipeline) -> CodegenResult<()> {
        let mode = pipeline.config().transfer_mode;
        if !mode.is_supported_by(self.target()) {
            return Err(CodegenError::configuration(format!(
                "transfer mode '{}' not supported by the {} target",
                mode,
                self.target()
            )));
        }
        match self {
            Backend::Intel(g) => g.check_constraints(pipeline),
            Backend::Xilinx(g) => g.check_constraints(pipeline),
        }
    }

    /// Create the output tree (missing directories only)
    pub fn prepare_layout(&self, pipeline: &Pipeline) -> CodegenResult<OutputLayout> {
        let base = &pipeline.config().dest_dir;
        let layout = match self {
            Backend::Intel(_) => OutputLayout::intel(base),
            Backend::Xilinx(_) => OutputLayout::xilinx(base),
        };
        layout.ensure()?;
        Ok(layout)
    }

    pub fn emit_device(
        &self,
        pipeline: &Pipeline,
        renderer: &dyn Render,
        layout: &OutputLayout,
        rewrite: &RewriteOptions,
        report: &mut GenerationReport,
    ) -> CodegenResult<()> {
        match self {
            Backend::Intel(g) => g.generate_device(pipeline, renderer, layout, rewrite, report),
            Backend::Xilinx(g) => g.generate_device(pipeline, renderer, layout, rewrite, report),
        }
    }

    pub fn emit_host(
        &self,
        pipeline: &Pipeline,
        renderer: &dyn Render,
        layout: &OutputLayout,
        rewrite: &RewriteOptions,
        report: &mut GenerationReport,
    ) -> CodegenResult<()> {
        match self {
            Backend::Intel(g) => g.generate_host(pipeline, renderer, layout, rewrite, report),
            Backend::Xilinx(g) => g.generate_host(pipeline, renderer, layout, rewrite, report),
        }
    }
}

/// User constants merged with one parallelism constant per operator
pub(crate) fn merged_constants(
    pipeline: &Pipeline,
    key: impl Fn(&Operator) -> String,
) -> BTreeMap<String, String> {
    let mut constants = pipeline.config().constants.clone();
    constants.extend(pipeline.par_constants(key));
    constants
}

pub(crate) fn override_dir(pipeline: &Pipeline) -> Option<OverrideDir> {
    pipeline.config().codebase.as_deref().map(OverrideDir::new)
}

/// Both backends need a memory reader or generator first and a memory
/// writer or drainer last
pub(crate) fn check_endpoints(pipeline: &Pipeline, target: Target) -> CodegenResult<()> {
    let (Some(first), Some(last)) = (pipeline.first(), pipeline.last()) else {
        return Err(CodegenError::topology("pipeline has no operators"));
    };
    if !first.kind.is_ingress() {
        return Err(CodegenError::constraint(
            target.to_string(),
            format!(
                "first operator '{}' must be a memory reader or a generator, found {}",
                first.name, first.kind
            ),
        ));
    }
    if !last.kind.is_egress() {
        return Err(CodegenError::constraint(
            target.to_string(),
            format!(
                "last operator '{}' must be a memory writer or a drainer, found {}",
                last.name, last.kind
            ),
        ));
    }
    if pipeline.nodes().len() < 2 {
        return Err(CodegenError::constraint(
            target.to_string(),
            "pipeline needs distinct ingress and egress operators",
        ));
    }
    Ok(())
}

/// `#ifndef`-guarded defines, key padded like the hand-written headers
pub(crate) fn define_constants(constants: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in constants {
        let key = key.to_uppercase();
        out.push_str(&format!(
            "#ifndef {key}\n#define {:<50}{value}\n#endif // {key}\n\n",
            key
        ));
    }
    out
}

/// Indent every non-empty line of `text` by `width` spaces
pub(crate) fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    text.lines()
        .map(|l| if l.is_empty() { String::new() } else { format!("{}{}", pad, l) })
        .collect::<Vec<_>>()
        .join("\n")
        + if text.ends_with('\n') { "\n" } else { "" }
}

pub(crate) fn is_lifecycle_kind(kind: OperatorKind) -> bool {
    !matches!(
        kind,
        OperatorKind::MemoryReader
            | OperatorKind::MemoryWriter
            | OperatorKind::Generator
            | OperatorKind::Drainer
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::pipeline::tests::spike_detection;
    use crate::policy::{DispatchPolicy, GatherPolicy, TransferMode};

    #[test]
    fn test_define_constants() {
        let mut cs = BTreeMap::new();
        cs.insert("win_dim".to_string(), "16".to_string());
        let text = define_constants(&cs);
        assert!(text.starts_with("#ifndef WIN_DIM\n#define WIN_DIM "));
        assert!(text.contains(&format!("#define {:<50}16\n", "WIN_DIM")));
        assert!(text.contains("#endif // WIN_DIM"));
    }

    #[test]
    fn test_indent() {
        assert_eq!(indent("a;\n\nb;\n", 4), "    a;\n\n    b;\n");
        assert_eq!(indent("x", 2), "  x");
    }

    #[test]
    fn test_transfer_mode_checked_per_target() {
        let mut p = spike_detection(Target::Xilinx);
        p.finalize().unwrap();
        assert!(Backend::xilinx().validate(&p).is_ok());

        let mut cfg = p.config().clone();
        cfg.transfer_mode = TransferMode::Shared;
        let mut shared = Pipeline::new(cfg);
        for n in p.nodes() {
            let mut op = n.clone();
            op.output_type = None;
            shared.add(op).unwrap();
        }
        shared.finalize().unwrap();
        assert!(matches!(
            Backend::xilinx().validate(&shared),
            Err(CodegenError::Configuration { .. })
        ));
    }

    #[test]
    fn test_endpoints_required() {
        let mut p = Pipeline::new(PipelineConfig::new("app", "input_t", Target::Intel));
        p.add(Operator::new("a", 1, OperatorKind::Map, GatherPolicy::RR, DispatchPolicy::RR).unwrap())
            .unwrap();
        p.add(Operator::new("b", 1, OperatorKind::Map, GatherPolicy::RR, DispatchPolicy::RR).unwrap())
            .unwrap();
        p.finalize().unwrap();
        assert!(matches!(
            check_endpoints(&p, Target::Intel),
            Err(CodegenError::Constraint { .. })
        ));
    }
}
