//! Intel OpenCL backend
//!
//! Device side: one single work-item kernel per operator replica, wired
//! with Intel channels. Flat-map bodies are spliced into their kernels.
//! Host side: OpenCL wrappers per operator plus source/sink adapters.

pub mod templates;

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::artifact::{copy_override, write_artifact, GenerationReport, RewriteOptions, TempArtifact};
use crate::backend::{check_endpoints, merged_constants, override_dir};
use crate::error::{CodegenError, CodegenResult};
use crate::layout::OutputLayout;
use crate::operator::Operator;
use crate::pipeline::Pipeline;
use crate::policy::{GatherPolicy, OperatorKind, Target};
use crate::render::{Bindings, IntelTemplate, NodeSource, Render, Template};
use crate::splice::splice_flat_map;

/// Stateless Intel generator; the pipeline is borrowed per call
#[derive(Debug, Clone, Default)]
pub struct IntelGenerator;

impl IntelGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn constants(&self, pipeline: &Pipeline) -> BTreeMap<String, String> {
        merged_constants(pipeline, Operator::intel_par_macro)
    }

    pub fn check_constraints(&self, pipeline: &Pipeline) -> CodegenResult<()> {
        check_endpoints(pipeline, Target::Intel)?;
        for n in pipeline.nodes() {
            if n.gather_policy == GatherPolicy::KB {
                return Err(CodegenError::constraint(
                    "intel",
                    format!("operator '{}': KB gather policy is not supported", n.name),
                ));
            }
            if n.kind == OperatorKind::FlatMap && (n.begin_function || n.end_function) {
                return Err(CodegenError::constraint(
                    "intel",
                    format!(
                        "flat map '{}': begin/end functions cannot be spliced into a kernel body",
                        n.name
                    ),
                ));
            }
        }
        Ok(())
    }

    fn node_file(op: &Operator) -> String {
        format!("{}.cl", op.name)
    }

    // Device

    pub fn generate_device(
        &self,
        pipeline: &Pipeline,
        renderer: &dyn Render,
        layout: &OutputLayout,
        rewrite: &RewriteOptions,
        report: &mut GenerationReport,
    ) -> CodegenResult<()> {
        let constants = self.constants(pipeline);
        let no_sources = BTreeMap::new();
        let bindings = Bindings::new(pipeline, &constants, &no_sources);

        write_artifact(&layout.common.join("constants.h"), rewrite.any_device(), report, || {
            renderer.render(Template::Intel(IntelTemplate::Constants), &bindings)
        })?;

        // Channel wrappers derive from the graph alone and always follow it
        write_artifact(&layout.device_includes.join("fsp_tuples.cl"), true, report, || {
            renderer.render(Template::Intel(IntelTemplate::ChannelTuples), &bindings)
        })?;

        self.generate_tuples(pipeline, renderer, layout, rewrite, report, &bindings)?;
        self.generate_functions(pipeline, renderer, layout, rewrite, report, &bindings)?;

        // Spliced flat-map bodies live in temporary files until the device
        // source is written; dropping `temps` removes them on every path.
        let mut temps = Vec::new();
        let mut sources = BTreeMap::new();
        for n in pipeline.nodes() {
            let file = Self::node_file(n);
            let path = layout.device_nodes.join(&file);
            if !path.is_file() {
                continue;
            }
            if n.kind == OperatorKind::FlatMap {
                let tmp = self.splice_node(pipeline, n, path)?;
                sources.insert(n.name.clone(), NodeSource::Inline(tmp.read()?));
                temps.push(tmp);
            } else {
                sources.insert(n.name.clone(), NodeSource::Include(file));
            }
        }

        let device_path = layout.device.join(format!("{}.cl", pipeline.name()));
        let device_bindings = Bindings::new(pipeline, &constants, &sources);
        write_artifact(&device_path, rewrite.device(), report, || {
            renderer.render(Template::Intel(IntelTemplate::Device), &device_bindings)
        })?;

        drop(temps);
        Ok(())
    }

    fn generate_tuples(
        &self,
        pipeline: &Pipeline,
        renderer: &dyn Render,
        layout: &OutputLayout,
        rewrite: &RewriteOptions,
        report: &mut GenerationReport,
        bindings: &Bindings<'_>,
    ) -> CodegenResult<()> {
        let path = layout.common.join("tuples.h");
        let codebase = override_dir(pipeline);
        if copy_override(codebase.and_then(|c| c.include("tuples.h")), &path, report)? {
            return Ok(());
        }
        write_artifact(&path, rewrite.tuples(), report, || {
            renderer.render(Template::Intel(IntelTemplate::Tuples), bindings)
        })?;
        Ok(())
    }

    fn generate_functions(
        &self,
        pipeline: &Pipeline,
        renderer: &dyn Render,
        layout: &OutputLayout,
        rewrite: &RewriteOptions,
        report: &mut GenerationReport,
        bindings: &Bindings<'_>,
    ) -> CodegenResult<()> {
        let codebase = override_dir(pipeline);
        for n in pipeline.nodes().iter().filter(|n| n.has_functions()) {
            let file = Self::node_file(n);
            let path = layout.device_nodes.join(&file);
            let source = codebase.as_ref().and_then(|c| c.device_node(&file));
            if copy_override(source, &path, report)? {
                continue;
            }
            let op_bindings = bindings.with_operator(n);
            write_artifact(&path, rewrite.functions(), report, || {
                renderer.render(Template::Intel(IntelTemplate::Function), &op_bindings)
            })?;
        }
        Ok(())
    }

    /// Splice the emission call of a flat-map body into a temporary file
    fn splice_node(&self, pipeline: &Pipeline, op: &Operator, path: PathBuf) -> CodegenResult<TempArtifact> {
        let fragment = fs::read_to_string(&path).map_err(|e| CodegenError::io(&path, e))?;
        let out = pipeline.outbound(op).ok_or_else(|| {
            CodegenError::topology(format!("flat map '{}' has no downstream operator", op.name))
        })?;

        let spliced = splice_flat_map(&op.name, &fragment, op.compute_function, |arg| {
            format!(
                "const {t} t_out = create_{t}({arg});\n{}",
                out.dispatch_tuple(op.dispatch_policy, "idx", "w", "t_out", false),
                t = out.tuple_type,
            )
        })?;

        let mut tmp_path = path.into_os_string();
        tmp_path.push(".tmp");
        let tmp = TempArtifact::create(PathBuf::from(tmp_path), &spliced)?;
        debug!("spliced flat map '{}'", op.name);
        Ok(tmp)
    }

    // Host

    pub fn generate_host(
        &self,
        pipeline: &Pipeline,
        renderer: &dyn Render,
        layout: &OutputLayout,
        rewrite: &RewriteOptions,
        report: &mut GenerationReport,
    ) -> CodegenResult<()> {
        let constants = self.constants(pipeline);
        let no_sources = BTreeMap::new();
        let bindings = Bindings::new(pipeline, &constants, &no_sources);

        write_artifact(&layout.common.join("constants.h"), rewrite.host(), report, || {
            renderer.render(Template::Intel(IntelTemplate::Constants), &bindings)
        })?;

        for (template, file) in [
            (IntelTemplate::Pipe, "pipe.hpp"),
            (IntelTemplate::Source, "fsource.hpp"),
            (IntelTemplate::Sink, "fsink.hpp"),
        ] {
            write_artifact(&layout.host_includes.join(file), rewrite.pipe(), report, || {
                renderer.render(Template::Intel(template), &bindings)
            })?;
        }

        let host_path = layout.host.join("host.cpp");
        let codebase = override_dir(pipeline);
        if !copy_override(codebase.as_ref().and_then(|c| c.host("host.cpp")), &host_path, report)? {
            write_artifact(&host_path, rewrite.host(), report, || {
                renderer.render(Template::Intel(IntelTemplate::Host), &bindings)
            })?;
        }
        copy_override(
            codebase.as_ref().and_then(|c| c.include("dataset.hpp")),
            &layout.host_includes.join("dataset.hpp"),
            report,
        )?;

        write_artifact(&layout.base.join("Makefile"), rewrite.all, report, || {
            renderer.render(Template::Intel(IntelTemplate::Makefile), &bindings)
        })?;

        info!("intel host sources ready in {}", layout.host.display());
        Ok(())
    }
}
