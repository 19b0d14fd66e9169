//! Pipeline graph container
//!
//! Operators are bound to slots as they are added (ingress, internal
//! sequence, egress) so they may be added in any order. `finalize()`
//! assembles the slots into the resolved node list, then derives degrees,
//! datatypes and channels from scratch.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::artifact::{GenerationReport, RewriteOptions};
use crate::backend::Backend;
use crate::channel::Channel;
use crate::config::{PipelineConfig, PipelineSpec};
use crate::error::{CodegenError, CodegenResult};
use crate::operator::Operator;
use crate::policy::{DispatchPolicy, GatherPolicy, OperatorKind, Target};
use crate::render::{Render, TemplateSet};

/// An ordered chain of operators targeting one backend
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,

    // Slots
    ingress: Option<Operator>,
    internal: Vec<Operator>,
    egress: Option<Operator>,

    // Resolved by finalize()
    nodes: Vec<Operator>,
    channels: Vec<Channel>,

    intel: Backend,
    xilinx: Backend,
}

/// Serializable view of a resolved pipeline
#[derive(Serialize)]
struct ResolvedGraph<'a> {
    config: &'a PipelineConfig,
    operators: &'a [Operator],
    channels: &'a [Channel],
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            ingress: None,
            internal: Vec::new(),
            egress: None,
            nodes: Vec::new(),
            channels: Vec::new(),
            intel: Backend::intel(),
            xilinx: Backend::xilinx(),
        }
    }

    /// Build a pipeline from its JSON description through `add()`
    pub fn from_spec(spec: &PipelineSpec) -> CodegenResult<Self> {
        spec.config.validate()?;
        let mut pipeline = Self::new(spec.config.clone());
        for op in &spec.operators {
            pipeline.add(op.build()?)?;
        }
        Ok(pipeline)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut PipelineConfig {
        &mut self.config
    }

    pub fn name(&self) -> String {
        self.config.app_name()
    }

    pub fn target(&self) -> Target {
        self.config.target
    }

    // Assembly

    fn slotted(&self) -> impl Iterator<Item = &Operator> {
        self.ingress.iter().chain(self.internal.iter()).chain(self.egress.iter())
    }

    fn has_kind(&self, kind: OperatorKind) -> bool {
        self.slotted().any(|op| op.kind == kind)
    }

    /// Add an operator to the slot its kind belongs to.
    ///
    /// Fails without touching the pipeline when the slot is already taken
    /// or the name is in use.
    pub fn add(&mut self, operator: Operator) -> CodegenResult<()> {
        if self.slotted().any(|op| op.name == operator.name) {
            return Err(CodegenError::configuration(format!(
                "operator name '{}' already taken",
                operator.name
            )));
        }

        match operator.kind {
            OperatorKind::MemoryReader => {
                if let Some(existing) = &self.ingress {
                    return Err(CodegenError::topology(format!(
                        "cannot add memory reader '{}': ingress already bound to '{}'",
                        operator.name, existing.name
                    )));
                }
                if self.has_kind(OperatorKind::Generator) {
                    return Err(CodegenError::topology(format!(
                        "cannot add memory reader '{}' to a pipeline fed by a generator",
                        operator.name
                    )));
                }
                self.ingress = Some(operator);
            }
            OperatorKind::MemoryWriter => {
                if let Some(existing) = &self.egress {
                    return Err(CodegenError::topology(format!(
                        "cannot add memory writer '{}': egress already bound to '{}'",
                        operator.name, existing.name
                    )));
                }
                if self.has_kind(OperatorKind::Drainer) {
                    return Err(CodegenError::topology(format!(
                        "cannot add memory writer '{}' to a pipeline closed by a drainer",
                        operator.name
                    )));
                }
                self.egress = Some(operator);
            }
            OperatorKind::Generator => {
                if self.has_kind(OperatorKind::Generator) {
                    return Err(CodegenError::topology(format!(
                        "cannot add generator '{}': pipeline already has one",
                        operator.name
                    )));
                }
                if self.ingress.is_some() {
                    return Err(CodegenError::topology(format!(
                        "cannot add generator '{}' to a pipeline fed by a memory reader",
                        operator.name
                    )));
                }
                self.internal.insert(0, operator);
            }
            OperatorKind::Drainer => {
                if self.has_kind(OperatorKind::Drainer) {
                    return Err(CodegenError::topology(format!(
                        "cannot add drainer '{}': pipeline already has one",
                        operator.name
                    )));
                }
                if self.egress.is_some() {
                    return Err(CodegenError::topology(format!(
                        "cannot add drainer '{}' to a pipeline closed by a memory writer",
                        operator.name
                    )));
                }
                self.internal.push(operator);
            }
            OperatorKind::Map | OperatorKind::Filter | OperatorKind::FlatMap => {
                let drainer_last = self
                    .internal
                    .last()
                    .map_or(false, |op| op.kind == OperatorKind::Drainer);
                if drainer_last {
                    let at = self.internal.len() - 1;
                    self.internal.insert(at, operator);
                } else {
                    self.internal.push(operator);
                }
            }
        }
        Ok(())
    }

    /// Mutable access to an added operator, e.g. to attach more buffers
    pub fn operator_mut(&mut self, name: &str) -> Option<&mut Operator> {
        self.ingress
            .iter_mut()
            .chain(self.internal.iter_mut())
            .chain(self.egress.iter_mut())
            .find(|op| op.name == name)
    }

    /// Resolve degrees, datatypes and channels.
    ///
    /// Always starts again from the slots, so re-running after more `add()`
    /// calls gives the same result as a single run.
    pub fn finalize(&mut self) -> CodegenResult<()> {
        let mut nodes: Vec<Operator> = self.slotted().cloned().collect();
        if nodes.is_empty() {
            return Err(CodegenError::topology("pipeline has no operators"));
        }

        let mut names = HashSet::new();
        for n in &nodes {
            if !names.insert(n.name.as_str()) {
                return Err(CodegenError::configuration(format!(
                    "operator name '{}' already taken",
                    n.name
                )));
            }
        }

        let last = nodes.len() - 1;
        for (i, n) in nodes.iter().enumerate() {
            if n.gather_policy == GatherPolicy::None && i != 0 {
                return Err(CodegenError::topology(format!(
                    "operator '{}' has upstream operators but gather policy NONE",
                    n.name
                )));
            }
            if n.dispatch_policy == DispatchPolicy::None && i != last {
                return Err(CodegenError::topology(format!(
                    "operator '{}' has downstream operators but dispatch policy NONE",
                    n.name
                )));
            }
        }

        // Degrees
        let pars: Vec<usize> = nodes.iter().map(|n| n.parallelism).collect();
        for (i, n) in nodes.iter_mut().enumerate() {
            n.input_degree = if i > 0 { pars[i - 1] } else { 0 };
            n.output_degree = pars.get(i + 1).copied().unwrap_or(0);
        }

        // Datatypes
        let mut upstream_type = self.config.datatype.clone();
        for n in nodes.iter_mut() {
            n.input_type = upstream_type;
            if n.output_type.is_none() {
                n.output_type = Some(n.input_type.clone());
            }
            upstream_type = n.output_type().to_string();
        }

        // Channels
        let mut channels = Vec::with_capacity(last);
        for i in 0..last {
            channels.push(Channel::new(i, &nodes[i], i + 1, &nodes[i + 1]));
        }
        for (i, n) in nodes.iter_mut().enumerate() {
            n.input_channel = i.checked_sub(1);
            n.output_channel = if i < last { Some(i) } else { None };
        }

        let mut globals = HashSet::new();
        for n in &nodes {
            for g in n.global_buffers() {
                if !globals.insert(g.shape.name.clone()) {
                    return Err(CodegenError::configuration(format!(
                        "global buffer name '{}' already taken",
                        g.shape.name
                    )));
                }
            }
        }

        debug!(
            operators = nodes.len(),
            channels = channels.len(),
            "pipeline '{}' finalized",
            self.name()
        );
        self.nodes = nodes;
        self.channels = channels;
        Ok(())
    }

    // Resolved graph

    pub fn nodes(&self) -> &[Operator] {
        &self.nodes
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn first(&self) -> Option<&Operator> {
        self.nodes.first()
    }

    pub fn last(&self) -> Option<&Operator> {
        self.nodes.last()
    }

    pub fn memory_reader(&self) -> Option<&Operator> {
        self.nodes.first().filter(|n| n.kind == OperatorKind::MemoryReader)
    }

    pub fn memory_writer(&self) -> Option<&Operator> {
        self.nodes.last().filter(|n| n.kind == OperatorKind::MemoryWriter)
    }

    pub fn generator(&self) -> Option<&Operator> {
        self.nodes.iter().find(|n| n.kind == OperatorKind::Generator)
    }

    pub fn drainer(&self) -> Option<&Operator> {
        self.nodes.iter().find(|n| n.kind == OperatorKind::Drainer)
    }

    /// Operators strictly between the ingress and egress operators
    pub fn middle(&self) -> &[Operator] {
        if self.nodes.len() < 2 {
            return &[];
        }
        &self.nodes[1..self.nodes.len() - 1]
    }

    pub fn inbound(&self, op: &Operator) -> Option<&Channel> {
        op.input_channel.and_then(|i| self.channels.get(i))
    }

    pub fn outbound(&self, op: &Operator) -> Option<&Channel> {
        op.output_channel.and_then(|i| self.channels.get(i))
    }

    /// Distinct datatypes flowing through the pipeline, base type first
    pub fn datatypes(&self) -> Vec<String> {
        let mut types = vec![self.config.datatype.clone()];
        for n in &self.nodes {
            let t = n.output_type();
            if !t.is_empty() && !types.iter().any(|known| known == t) {
                types.push(t.to_string());
            }
        }
        types
    }

    /// Per-operator parallelism constants, keyed by the macro name `key`
    /// derives from each operator
    pub fn par_constants(&self, key: impl Fn(&Operator) -> String) -> BTreeMap<String, String> {
        self.nodes
            .iter()
            .map(|n| (key(n), n.parallelism.to_string()))
            .collect()
    }

    /// Resolved graph as JSON
    pub fn to_json(&self) -> CodegenResult<String> {
        let graph = ResolvedGraph {
            config: &self.config,
            operators: &self.nodes,
            channels: &self.channels,
        };
        Ok(serde_json::to_string_pretty(&graph)?)
    }

    // Generation

    fn backend(&self) -> &Backend {
        match self.config.target {
            Target::Intel => &self.intel,
            Target::Xilinx => &self.xilinx,
        }
    }

    /// Template set configured for this pipeline
    pub fn templates(&self) -> TemplateSet {
        TemplateSet::new(self.config.templates.clone())
    }

    pub fn generate_device(&mut self, rewrite: &RewriteOptions) -> CodegenResult<GenerationReport> {
        let templates = self.templates();
        self.generate_device_with(&templates, rewrite)
    }

    pub fn generate_host(&mut self, rewrite: &RewriteOptions) -> CodegenResult<GenerationReport> {
        let templates = self.templates();
        self.generate_host_with(&templates, rewrite)
    }

    pub fn generate_code(&mut self, rewrite: &RewriteOptions) -> CodegenResult<GenerationReport> {
        let templates = self.templates();
        self.generate_code_with(&templates, rewrite)
    }

    pub fn generate_device_with(
        &mut self,
        renderer: &dyn Render,
        rewrite: &RewriteOptions,
    ) -> CodegenResult<GenerationReport> {
        self.prepare()?;
        let backend = self.backend();
        let layout = backend.prepare_layout(self)?;
        let mut report = GenerationReport::default();
        backend.emit_device(self, renderer, &layout, rewrite, &mut report)?;
        Ok(report)
    }

    pub fn generate_host_with(
        &mut self,
        renderer: &dyn Render,
        rewrite: &RewriteOptions,
    ) -> CodegenResult<GenerationReport> {
        self.prepare()?;
        let backend = self.backend();
        let layout = backend.prepare_layout(self)?;
        let mut report = GenerationReport::default();
        backend.emit_host(self, renderer, &layout, rewrite, &mut report)?;
        Ok(report)
    }

    pub fn generate_code_with(
        &mut self,
        renderer: &dyn Render,
        rewrite: &RewriteOptions,
    ) -> CodegenResult<GenerationReport> {
        self.prepare()?;
        let backend = self.backend();
        let layout = backend.prepare_layout(self)?;
        let mut report = GenerationReport::default();
        backend.emit_device(self, renderer, &layout, rewrite, &mut report)?;
        backend.emit_host(self, renderer, &layout, rewrite, &mut report)?;
        Ok(report)
    }

    fn prepare(&mut self) -> CodegenResult<()> {
        self.config.validate()?;
        self.finalize()?;
        self.backend().validate(self)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::buffer::BufferAccess;

    fn op(name: &str, par: usize, kind: OperatorKind, gather: GatherPolicy, dispatch: DispatchPolicy) -> Operator {
        Operator::new(name, par, kind, gather, dispatch).unwrap()
    }

    fn map(name: &str) -> Operator {
        op(name, 1, OperatorKind::Map, GatherPolicy::RR, DispatchPolicy::RR)
    }

    fn pipeline(target: Target) -> Pipeline {
        Pipeline::new(PipelineConfig::new("sd", "input_t", target))
    }

    /// Spike detection: reader, map, filter, writer, all with two replicas
    pub(crate) fn spike_detection(target: Target) -> Pipeline {
        let mut p = pipeline(target);
        p.add(op("mr", 2, OperatorKind::MemoryReader, GatherPolicy::None, DispatchPolicy::KB))
            .unwrap();
        p.add(
            op("average_calculator", 2, OperatorKind::Map, GatherPolicy::LB, DispatchPolicy::RR)
                .with_output_type("tuple_t"),
        )
        .unwrap();
        p.add(op("spike_detector", 2, OperatorKind::Filter, GatherPolicy::LB, DispatchPolicy::LB))
            .unwrap();
        p.add(op("mw", 2, OperatorKind::MemoryWriter, GatherPolicy::LB, DispatchPolicy::None))
            .unwrap();
        p
    }

    fn names(p: &Pipeline) -> Vec<&str> {
        p.nodes().iter().map(|n| n.name.as_str()).collect()
    }

    #[test]
    fn test_spike_detection_resolution() {
        let mut p = spike_detection(Target::Intel);
        p.finalize().unwrap();

        assert_eq!(p.channels().len(), 3);
        for ch in p.channels() {
            assert_eq!((ch.input_degree, ch.output_degree), (2, 2));
        }
        let avg = &p.nodes()[1];
        assert_eq!(avg.input_type, "input_t");
        assert_eq!(avg.output_type(), "tuple_t");
        assert_eq!(p.nodes()[2].input_type, "tuple_t");
        assert_eq!(p.nodes()[3].output_type(), "tuple_t");
        assert_eq!(p.datatypes(), vec!["input_t", "tuple_t"]);
        assert_eq!(p.channels()[1].name, "average_calculator_spike_detector");
    }

    #[test]
    fn test_adjacent_pairs_agree() {
        let mut p = spike_detection(Target::Xilinx);
        p.finalize().unwrap();
        for pair in p.nodes().windows(2) {
            assert_eq!(pair[1].input_type, pair[0].output_type());
            assert_eq!(pair[1].input_degree, pair[0].parallelism);
            assert_eq!(pair[0].output_degree, pair[1].parallelism);
        }
        let first = p.first().unwrap();
        let last = p.last().unwrap();
        assert_eq!(first.input_degree, 0);
        assert_eq!(last.output_degree, 0);
        assert_eq!(first.input_channel, None);
        assert_eq!(last.output_channel, None);
        assert_eq!(p.inbound(&p.nodes()[1]).unwrap().name, "mr_average_calculator");
    }

    #[test]
    fn test_slot_ordering_is_independent_of_add_order() {
        let mut p = pipeline(Target::Intel);
        p.add(op("drain", 1, OperatorKind::Drainer, GatherPolicy::RR, DispatchPolicy::None))
            .unwrap();
        p.add(map("a")).unwrap();
        p.add(op("gen", 1, OperatorKind::Generator, GatherPolicy::None, DispatchPolicy::RR))
            .unwrap();
        p.add(map("b")).unwrap();
        p.finalize().unwrap();
        assert_eq!(names(&p), vec!["gen", "a", "b", "drain"]);
        assert_eq!(p.generator().unwrap().name, "gen");
        assert_eq!(p.drainer().unwrap().name, "drain");

        let mut p = pipeline(Target::Intel);
        p.add(op("mw", 1, OperatorKind::MemoryWriter, GatherPolicy::RR, DispatchPolicy::None))
            .unwrap();
        p.add(map("a")).unwrap();
        p.add(op("mr", 1, OperatorKind::MemoryReader, GatherPolicy::None, DispatchPolicy::RR))
            .unwrap();
        p.finalize().unwrap();
        assert_eq!(names(&p), vec!["mr", "a", "mw"]);
        assert_eq!(p.middle().len(), 1);
    }

    #[test]
    fn test_rejected_adds_leave_pipeline_unchanged() {
        let mut p = spike_detection(Target::Intel);

        let second_reader = op("mr2", 1, OperatorKind::MemoryReader, GatherPolicy::None, DispatchPolicy::RR);
        assert!(matches!(p.add(second_reader), Err(CodegenError::Topology { .. })));

        let generator = op("gen", 1, OperatorKind::Generator, GatherPolicy::None, DispatchPolicy::RR);
        assert!(matches!(p.add(generator), Err(CodegenError::Topology { .. })));

        let drainer = op("dr", 1, OperatorKind::Drainer, GatherPolicy::RR, DispatchPolicy::None);
        assert!(matches!(p.add(drainer), Err(CodegenError::Topology { .. })));

        assert!(matches!(
            p.add(map("spike_detector")),
            Err(CodegenError::Configuration { .. })
        ));

        p.finalize().unwrap();
        assert_eq!(names(&p), vec!["mr", "average_calculator", "spike_detector", "mw"]);
    }

    #[test]
    fn test_second_generator_rejected() {
        let mut p = pipeline(Target::Xilinx);
        p.add(op("g1", 1, OperatorKind::Generator, GatherPolicy::None, DispatchPolicy::RR))
            .unwrap();
        let err = p.add(op("g2", 1, OperatorKind::Generator, GatherPolicy::None, DispatchPolicy::RR));
        assert!(matches!(err, Err(CodegenError::Topology { .. })));
        assert_eq!(p.internal.len(), 1);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut p = spike_detection(Target::Intel);
        p.finalize().unwrap();
        let first = p.to_json().unwrap();
        p.finalize().unwrap();
        assert_eq!(p.to_json().unwrap(), first);
        assert_eq!(p.channels().len(), 3);
    }

    #[test]
    fn test_finalize_after_late_add_rebuilds_types() {
        let mut p = pipeline(Target::Intel);
        p.add(op("mr", 1, OperatorKind::MemoryReader, GatherPolicy::None, DispatchPolicy::RR))
            .unwrap();
        p.add(map("a")).unwrap();
        p.finalize().unwrap();
        assert_eq!(p.nodes()[1].output_type(), "input_t");

        p.add(op("mw", 1, OperatorKind::MemoryWriter, GatherPolicy::RR, DispatchPolicy::None))
            .unwrap();
        p.add(map("b").with_output_type("result_t")).unwrap();
        p.finalize().unwrap();
        assert_eq!(names(&p), vec!["mr", "a", "b", "mw"]);
        assert_eq!(p.nodes()[3].input_type, "result_t");
        assert_eq!(p.channels().len(), 3);
    }

    #[test]
    fn test_misplaced_none_policies() {
        let mut p = pipeline(Target::Intel);
        p.add(map("a")).unwrap();
        p.add(op("b", 1, OperatorKind::Map, GatherPolicy::None, DispatchPolicy::RR))
            .unwrap();
        assert!(matches!(p.finalize(), Err(CodegenError::Topology { .. })));

        let mut p = pipeline(Target::Intel);
        p.add(op("a", 1, OperatorKind::Map, GatherPolicy::RR, DispatchPolicy::None))
            .unwrap();
        p.add(map("b")).unwrap();
        assert!(matches!(p.finalize(), Err(CodegenError::Topology { .. })));
    }

    #[test]
    fn test_duplicate_global_buffer_across_operators() {
        let mut p = spike_detection(Target::Intel);
        p.operator_mut("average_calculator")
            .unwrap()
            .add_global_buffer("float", "weights", &[16], BufferAccess::ReadAll, true, None)
            .unwrap();
        p.operator_mut("spike_detector")
            .unwrap()
            .add_global_buffer("float", "weights", &[16], BufferAccess::ReadAll, true, None)
            .unwrap();
        assert!(matches!(p.finalize(), Err(CodegenError::Configuration { .. })));
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let mut p = pipeline(Target::Intel);
        assert!(matches!(p.finalize(), Err(CodegenError::Topology { .. })));
    }

    #[test]
    fn test_par_constants() {
        let mut p = spike_detection(Target::Intel);
        p.finalize().unwrap();
        let cs = p.par_constants(Operator::intel_par_macro);
        assert_eq!(cs.len(), 4);
        assert_eq!(cs["__AVERAGE_CALCULATOR_PAR"], "2");
        let cs = p.par_constants(Operator::par_macro);
        assert_eq!(cs["MW_PAR"], "2");
    }
}
