//! Xilinx HLS backend
//!
//! Device side: a single `compute` kernel wiring operator functors through
//! the all-to-all emitter/operator/collector templates of the dataflow
//! library, fed and drained by `memory_reader`/`memory_writer` kernels when
//! the pipeline touches memory. Host side: an XRT driver.

pub mod templates;

use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::artifact::{copy_override, write_artifact, GenerationReport, RewriteOptions};
use crate::backend::{check_endpoints, is_lifecycle_kind, merged_constants, override_dir};
use crate::error::{CodegenError, CodegenResult};
use crate::keyby::derive_keyby_lambdas;
use crate::layout::OutputLayout;
use crate::operator::Operator;
use crate::pipeline::Pipeline;
use crate::policy::{OperatorKind, Target};
use crate::render::{Bindings, Render, Template, XilinxTemplate};

#[derive(Debug, Clone, Default)]
pub struct XilinxGenerator;

impl XilinxGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn constants(&self, pipeline: &Pipeline) -> BTreeMap<String, String> {
        merged_constants(pipeline, Operator::par_macro)
    }

    /// Structural checks are fatal; unsupported function flags only warn
    pub fn check_constraints(&self, pipeline: &Pipeline) -> CodegenResult<()> {
        check_endpoints(pipeline, Target::Xilinx)?;
        if pipeline.middle().is_empty() {
            return Err(CodegenError::constraint(
                "xilinx",
                "at least one operator is needed between the ingress and the egress",
            ));
        }
        for n in pipeline.nodes() {
            if !is_lifecycle_kind(n.kind) && (n.begin_function || n.end_function) {
                warn!(
                    "{} '{}' has no begin/end hooks on xilinx, flags ignored",
                    n.kind, n.name
                );
            }
            if n.kind.compute_is_optional() && n.compute_function {
                warn!(
                    "{} '{}' cannot run a compute function on xilinx, flag ignored",
                    n.kind, n.name
                );
            }
            if let Some(g) = n.global_buffers().first() {
                warn!(
                    "{} '{}' has global buffers ('{}' first) that xilinx functors do not carry, buffers ignored",
                    n.kind, n.name, g.shape.name
                );
            }
        }
        Ok(())
    }

    /// Operators realised as functors inside the compute kernel
    fn functor_nodes(pipeline: &Pipeline) -> impl Iterator<Item = &Operator> {
        pipeline
            .nodes()
            .iter()
            .filter(|n| !matches!(n.kind, OperatorKind::MemoryReader | OperatorKind::MemoryWriter))
    }

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
        let keyby = derive_keyby_lambdas(pipeline.nodes());
        let bindings = Bindings::new(pipeline, &constants, &no_sources).with_keyby(&keyby);

        write_artifact(&layout.common.join("constants.hpp"), rewrite.any_device(), report, || {
            renderer.render(Template::Xilinx(XilinxTemplate::Constants), &bindings)
        })?;

        // One header per datatype; an override only replaces its own type
        let codebase = override_dir(pipeline);
        for t in pipeline.datatypes() {
            let file = format!("{}.hpp", t);
            let path = layout.common.join(&file);
            if copy_override(codebase.as_ref().and_then(|c| c.include(&file)), &path, report)? {
                continue;
            }
            let tuple_bindings = bindings.with_datatype(&t);
            write_artifact(&path, rewrite.tuples(), report, || {
                renderer.render(Template::Xilinx(XilinxTemplate::Tuple), &tuple_bindings)
            })?;
        }

        write_artifact(&layout.device_includes.join("defines.hpp"), rewrite.tuples(), report, || {
            renderer.render(Template::Xilinx(XilinxTemplate::Defines), &bindings)
        })?;
        write_artifact(&layout.device_includes.join("keyby_lambdas.hpp"), rewrite.keyby(), report, || {
            renderer.render(Template::Xilinx(XilinxTemplate::KeybyLambdas), &bindings)
        })?;

        for n in Self::functor_nodes(pipeline) {
            let file = format!("{}.hpp", n.name);
            let path = layout.device_nodes.join(&file);
            if copy_override(codebase.as_ref().and_then(|c| c.device_node(&file)), &path, report)? {
                continue;
            }
            let op_bindings = bindings.with_operator(n);
            write_artifact(&path, rewrite.functions(), report, || {
                renderer.render(Template::Xilinx(XilinxTemplate::Operator), &op_bindings)
            })?;
        }

        if pipeline.memory_reader().is_some() {
            write_artifact(&layout.device.join("memory_reader.cpp"), rewrite.device(), report, || {
                renderer.render(Template::Xilinx(XilinxTemplate::MemoryReader), &bindings)
            })?;
        }
        write_artifact(&layout.device.join("compute.cpp"), rewrite.device(), report, || {
            renderer.render(Template::Xilinx(XilinxTemplate::Compute), &bindings)
        })?;
        if pipeline.memory_writer().is_some() {
            write_artifact(&layout.device.join("memory_writer.cpp"), rewrite.device(), report, || {
                renderer.render(Template::Xilinx(XilinxTemplate::MemoryWriter), &bindings)
            })?;
        }

        write_artifact(&layout.base.join("Makefile"), rewrite.any_device(), report, || {
            renderer.render(Template::Xilinx(XilinxTemplate::Makefile), &bindings)
        })?;

        info!("xilinx device sources ready in {}", layout.device.display());
        Ok(())
    }

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

        let host_path = layout.host.join("host.cpp");
        let codebase = override_dir(pipeline);
        if !copy_override(codebase.as_ref().and_then(|c| c.host("host.cpp")), &host_path, report)? {
            write_artifact(&host_path, rewrite.host(), report, || {
                renderer.render(Template::Xilinx(XilinxTemplate::Host), &bindings)
            })?;
        }

        info!("xilinx host sources ready in {}", layout.host.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactOutcome;
    use crate::config::PipelineConfig;
    use crate::buffer::BufferAccess;
    use crate::pipeline::tests::spike_detection;
    use crate::policy::{DispatchPolicy, GatherPolicy, TransferMode};
    use std::fs;
    use std::io::Write;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    fn op(name: &str, par: usize, kind: OperatorKind, gather: GatherPolicy, dispatch: DispatchPolicy) -> Operator {
        Operator::new(name, par, kind, gather, dispatch).unwrap()
    }

    fn read(dest: &Path, file: &str) -> String {
        fs::read_to_string(dest.join(file)).unwrap()
    }

    #[test]
    fn test_device_tree() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("sd");
        let mut p = spike_detection(Target::Xilinx);
        p.config_mut().dest_dir = dest.clone();

        p.generate_device(&RewriteOptions::default()).unwrap();
        for file in [
            "common/constants.hpp",
            "common/input_t.hpp",
            "common/tuple_t.hpp",
            "device/includes/defines.hpp",
            "device/includes/keyby_lambdas.hpp",
            "device/nodes/average_calculator.hpp",
            "device/nodes/spike_detector.hpp",
            "device/memory_reader.cpp",
            "device/compute.cpp",
            "device/memory_writer.cpp",
            "Makefile",
        ] {
            assert!(dest.join(file).is_file(), "missing {}", file);
        }
        assert!(!dest.join("device/nodes/mr.hpp").exists());
        assert!(!dest.join("ocl").exists());

        assert!(read(&dest, "common/constants.hpp").contains(&format!("#define {:<50}2\n", "AVERAGE_CALCULATOR_PAR")));
        assert!(read(&dest, "device/includes/keyby_lambdas.hpp").contains("auto mr_average_calculator_keyby"));

        let compute = read(&dest, "device/compute.cpp");
        assert!(compute.contains("fx::A2A::Emitter<fx::A2A::Policy_t::KB, MR_PAR, AVERAGE_CALCULATOR_PAR>("));
        assert!(compute.contains("in, mr_average_calculator, mr_average_calculator_keyby"));
        assert!(compute.contains(
            "fx::A2A::Operator<fx::A2A::Operator_t::MAP, average_calculator, fx::A2A::Policy_t::LB, \
             fx::A2A::Policy_t::RR, MR_PAR, AVERAGE_CALCULATOR_PAR, SPIKE_DETECTOR_PAR>("
        ));
        assert!(compute.contains("fx::A2A::Collector<fx::A2A::Policy_t::LB, SPIKE_DETECTOR_PAR, MW_PAR>("));
        assert!(compute.contains("#pragma HLS interface ap_ctrl_none port=return"));
        assert!(compute.contains("stream_input_t mr_average_calculator[MR_PAR][AVERAGE_CALCULATOR_PAR];"));
    }

    #[test]
    fn test_missing_middle_operator() {
        let dir = tempdir().unwrap();
        let mut p = Pipeline::new(PipelineConfig::new(dir.path().join("app"), "input_t", Target::Xilinx));
        p.add(op("mr", 1, OperatorKind::MemoryReader, GatherPolicy::None, DispatchPolicy::RR))
            .unwrap();
        p.add(op("mw", 1, OperatorKind::MemoryWriter, GatherPolicy::RR, DispatchPolicy::None))
            .unwrap();
        assert!(matches!(
            p.generate_code(&RewriteOptions::default()),
            Err(CodegenError::Constraint { .. })
        ));
        assert!(!dir.path().join("app").exists());
    }

    #[test]
    fn test_shared_transfer_rejected() {
        let dir = tempdir().unwrap();
        let mut p = spike_detection(Target::Xilinx);
        p.config_mut().dest_dir = dir.path().join("sd");
        p.config_mut().transfer_mode = TransferMode::Shared;
        assert!(matches!(
            p.generate_code(&RewriteOptions::default()),
            Err(CodegenError::Configuration { .. })
        ));
    }

    /// Run `f` under a subscriber that records warnings as plain text
    fn captured_warnings(f: impl FnOnce()) -> String {
        #[derive(Clone, Default)]
        struct Sink(Arc<Mutex<Vec<u8>>>);

        impl Write for Sink {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let sink = Sink::default();
        let writer = sink.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = sink.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_unsupported_flags_only_warn() {
        let dir = tempdir().unwrap();
        let mut p = spike_detection(Target::Xilinx);
        p.config_mut().dest_dir = dir.path().join("sd");
        p.operator_mut("mr").unwrap().begin_function = true;
        p.operator_mut("mw").unwrap().compute_function = true;

        let log = captured_warnings(|| {
            assert!(p.generate_code(&RewriteOptions::default()).is_ok());
        });
        assert!(log.contains("memory_reader 'mr' has no begin/end hooks on xilinx"));
        assert!(log.contains("memory_writer 'mw' cannot run a compute function on xilinx"));
        assert!(!log.contains("average_calculator"));
    }

    #[test]
    fn test_drainer_compute_flag_warns() {
        let mut p = Pipeline::new(PipelineConfig::new("gd", "input_t", Target::Xilinx));
        p.add(op("gen", 1, OperatorKind::Generator, GatherPolicy::None, DispatchPolicy::RR))
            .unwrap();
        p.add(op("m", 1, OperatorKind::Map, GatherPolicy::RR, DispatchPolicy::RR))
            .unwrap();
        p.add(
            op("dr", 1, OperatorKind::Drainer, GatherPolicy::RR, DispatchPolicy::None)
                .with_compute_function(true),
        )
        .unwrap();
        p.finalize().unwrap();

        let log = captured_warnings(|| {
            XilinxGenerator::new().check_constraints(&p).unwrap();
        });
        assert!(log.contains("drainer 'dr' cannot run a compute function on xilinx"));
        // generators compute by default, so nothing to report for them
        assert!(!log.contains("'gen'"));
    }

    #[test]
    fn test_global_buffers_warn() {
        let mut p = spike_detection(Target::Xilinx);
        p.operator_mut("spike_detector")
            .unwrap()
            .add_global_buffer("float", "thresholds", &[8], BufferAccess::ReadAll, true, None)
            .unwrap();
        p.finalize().unwrap();

        let log = captured_warnings(|| {
            XilinxGenerator::new().check_constraints(&p).unwrap();
        });
        assert!(log.contains("filter 'spike_detector' has global buffers ('thresholds' first)"));
    }

    #[test]
    fn test_tuple_override_is_per_type() {
        let dir = tempdir().unwrap();
        let codebase = dir.path().join("codebase");
        fs::create_dir_all(codebase.join("includes")).unwrap();
        fs::write(codebase.join("includes/input_t.hpp"), "// hand input_t").unwrap();

        let dest = dir.path().join("sd");
        let mut p = spike_detection(Target::Xilinx);
        p.config_mut().dest_dir = dest.clone();
        p.config_mut().codebase = Some(codebase);

        let report = p.generate_device(&RewriteOptions::default()).unwrap();
        assert_eq!(read(&dest, "common/input_t.hpp"), "// hand input_t");
        assert_eq!(report.outcome_of(&dest.join("common/input_t.hpp")), Some(ArtifactOutcome::Copied));
        assert!(read(&dest, "common/tuple_t.hpp").contains("struct tuple_t {"));
    }

    #[test]
    fn test_generator_drainer_pipeline() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("gd");
        let mut p = Pipeline::new(PipelineConfig::new(dest.clone(), "input_t", Target::Xilinx));
        p.add(op("gen", 2, OperatorKind::Generator, GatherPolicy::None, DispatchPolicy::RR))
            .unwrap();
        p.add(op("splitter", 2, OperatorKind::FlatMap, GatherPolicy::RR, DispatchPolicy::BR))
            .unwrap();
        p.add(op("dr", 1, OperatorKind::Drainer, GatherPolicy::RR, DispatchPolicy::None))
            .unwrap();

        let report = p.generate_code(&RewriteOptions::default()).unwrap();
        assert!(!dest.join("device/memory_reader.cpp").exists());
        assert!(!dest.join("device/memory_writer.cpp").exists());
        assert!(read(&dest, "device/nodes/gen.hpp").contains("void operator()(const uint64_t i, input_t & out, bool & last)"));
        assert!(read(&dest, "device/nodes/splitter.hpp").contains("FlatMapShipper<input_t> & shipper"));
        assert!(read(&dest, "device/nodes/dr.hpp").contains("void operator()(const int i, const input_t & in, const bool last)"));

        let compute = read(&dest, "device/compute.cpp");
        assert!(compute.contains("fx::A2A::ReplicateGenerator<uint64_t, gen, GEN_PAR>(in, size, max_key);"));
        assert!(compute.contains("fx::A2A::ReplicateDrainer<uint64_t, dr, DR_PAR>(out);"));
        assert!(!compute.contains("ap_ctrl_none"));
        assert_eq!(report.outcome_of(&dest.join("host/host.cpp")), Some(ArtifactOutcome::Generated));
    }

    #[test]
    fn test_functor_rerun_skipped_unless_rewritten() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("sd");
        let mut p = spike_detection(Target::Xilinx);
        p.config_mut().dest_dir = dest.clone();
        p.generate_device(&RewriteOptions::default()).unwrap();

        let node = dest.join("device/nodes/average_calculator.hpp");
        fs::write(&node, "// tuned").unwrap();
        p.generate_device(&RewriteOptions::default()).unwrap();
        assert_eq!(fs::read_to_string(&node).unwrap(), "// tuned");

        let rewrite = RewriteOptions { functions: true, ..Default::default() };
        let report = p.generate_device(&rewrite).unwrap();
        assert_eq!(report.outcome_of(&node), Some(ArtifactOutcome::Generated));
        assert!(fs::read_to_string(&node).unwrap().contains("struct average_calculator"));
    }
}
