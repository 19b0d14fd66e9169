//! Pipeline operators
//!
//! An operator is a named, replicated processing stage. Users build
//! operators and attach buffers before handing them to a
//! [`Pipeline`](crate::pipeline::Pipeline); `finalize()` then fills in the
//! resolved degrees, datatypes and channel wiring.

use serde::Serialize;

use crate::buffer::{Buffer, BufferAccess, BufferValue, GlobalBuffer, LocalBuffer, PrivateBuffer};
use crate::error::{CodegenError, CodegenResult};
use crate::policy::{DispatchPolicy, GatherPolicy, OperatorKind};

/// A processing stage of the pipeline
#[derive(Debug, Clone, Serialize)]
pub struct Operator {
    pub name: String,
    /// Number of hardware replicas
    pub parallelism: usize,
    pub kind: OperatorKind,
    pub gather_policy: GatherPolicy,
    pub dispatch_policy: DispatchPolicy,
    /// Resolved by `finalize()`
    pub input_type: String,
    /// Defaults to the input type when unset
    pub output_type: Option<String>,
    pub channel_depth: usize,
    pub begin_function: bool,
    pub compute_function: bool,
    pub end_function: bool,
    buffers: Vec<Buffer>,

    // Resolved topology
    pub input_degree: usize,
    pub output_degree: usize,
    /// Index of the inbound channel in the pipeline's channel list
    pub input_channel: Option<usize>,
    /// Index of the outbound channel in the pipeline's channel list
    pub output_channel: Option<usize>,
}

impl Operator {
    pub fn new(
        name: &str,
        parallelism: usize,
        kind: OperatorKind,
        gather_policy: GatherPolicy,
        dispatch_policy: DispatchPolicy,
    ) -> CodegenResult<Self> {
        if name.is_empty() {
            return Err(CodegenError::configuration("operator name cannot be empty"));
        }
        if parallelism == 0 {
            return Err(CodegenError::configuration(format!(
                "operator '{}' needs a parallelism of at least 1",
                name
            )));
        }
        if kind == OperatorKind::MemoryReader && gather_policy != GatherPolicy::None {
            return Err(CodegenError::configuration(format!(
                "memory reader '{}' must use the NONE gather policy",
                name
            )));
        }
        if kind == OperatorKind::MemoryWriter && dispatch_policy != DispatchPolicy::None {
            return Err(CodegenError::configuration(format!(
                "memory writer '{}' must use the NONE dispatch policy",
                name
            )));
        }

        Ok(Self {
            name: name.to_string(),
            parallelism,
            kind,
            gather_policy,
            dispatch_policy,
            input_type: String::new(),
            output_type: None,
            channel_depth: 0,
            begin_function: false,
            compute_function: !kind.compute_is_optional(),
            end_function: false,
            buffers: Vec::new(),
            input_degree: 0,
            output_degree: 0,
            input_channel: None,
            output_channel: None,
        })
    }

    pub fn with_output_type(mut self, datatype: &str) -> Self {
        self.output_type = Some(datatype.to_string());
        self
    }

    pub fn with_channel_depth(mut self, depth: usize) -> Self {
        self.channel_depth = depth;
        self
    }

    pub fn with_begin_function(mut self, enabled: bool) -> Self {
        self.begin_function = enabled;
        self
    }

    /// Only meaningful for kinds whose compute function is optional;
    /// every other kind always has one.
    pub fn with_compute_function(mut self, enabled: bool) -> Self {
        self.compute_function = !self.kind.compute_is_optional() || enabled;
        self
    }

    pub fn with_end_function(mut self, enabled: bool) -> Self {
        self.end_function = enabled;
        self
    }

    // Buffers

    fn has_buffer(&self, name: &str) -> bool {
        self.buffers.iter().any(|b| b.name() == name)
    }

    /// Attach an already-built buffer, rejecting duplicate names
    pub fn add_buffer(&mut self, buffer: Buffer) -> CodegenResult<()> {
        if self.has_buffer(buffer.name()) {
            return Err(CodegenError::configuration(format!(
                "buffer '{}' in operator '{}' is already present",
                buffer.name(),
                self.name
            )));
        }
        self.buffers.push(buffer);
        Ok(())
    }

    pub fn add_private_buffer(
        &mut self,
        datatype: &str,
        name: &str,
        size: &[usize],
        value: Option<BufferValue>,
        ptr: bool,
        attributes: Option<&str>,
    ) -> CodegenResult<()> {
        self.add_buffer(Buffer::private(datatype, name, size, value, ptr, attributes)?)
    }

    pub fn add_local_buffer(
        &mut self,
        datatype: &str,
        name: &str,
        size: &[usize],
        value: Option<BufferValue>,
        attributes: Option<&str>,
    ) -> CodegenResult<()> {
        self.add_buffer(Buffer::local(datatype, name, size, value, attributes)?)
    }

    pub fn add_global_buffer(
        &mut self,
        datatype: &str,
        name: &str,
        size: &[usize],
        access: BufferAccess,
        ptr: bool,
        value: Option<BufferValue>,
    ) -> CodegenResult<()> {
        self.add_buffer(Buffer::global(datatype, name, size, access, ptr, value)?)
    }

    pub fn buffers(&self) -> &[Buffer] {
        &self.buffers
    }

    pub fn private_buffers(&self) -> impl Iterator<Item = &PrivateBuffer> {
        self.buffers.iter().filter_map(|b| match b {
            Buffer::Private(p) => Some(p),
            _ => None,
        })
    }

    pub fn local_buffers(&self) -> impl Iterator<Item = &LocalBuffer> {
        self.buffers.iter().filter_map(|b| match b {
            Buffer::Local(l) => Some(l),
            _ => None,
        })
    }

    /// Allocated global buffers (no constant value)
    pub fn global_no_value_buffers(&self) -> impl Iterator<Item = &GlobalBuffer> {
        self.all_globals().filter(|g| !g.has_value())
    }

    /// Constant-valued global buffers
    pub fn global_value_buffers(&self) -> impl Iterator<Item = &GlobalBuffer> {
        self.all_globals().filter(|g| g.has_value())
    }

    /// Global buffers in signature order: allocated ones first, then constants.
    ///
    /// Every consumer (device signature, host allocation, argument binding)
    /// must go through this method so positional arguments line up.
    pub fn global_buffers(&self) -> Vec<&GlobalBuffer> {
        self.global_no_value_buffers()
            .chain(self.global_value_buffers())
            .collect()
    }

    fn all_globals(&self) -> impl Iterator<Item = &GlobalBuffer> {
        self.buffers.iter().filter_map(|b| match b {
            Buffer::Global(g) => Some(g),
            _ => None,
        })
    }

    /// Kernel-scope declarations of private and local buffers
    pub fn declare_buffers(&self) -> Vec<String> {
        self.buffers.iter().filter_map(Buffer::declare).collect()
    }

    /// Function parameters for private, local and global buffers
    pub fn parameter_buffers(&self) -> Vec<String> {
        let mut params: Vec<String> = self.private_buffers().map(|b| b.parameter()).collect();
        params.extend(self.local_buffers().map(|b| b.parameter()));
        params.extend(self.global_buffers().into_iter().map(|g| g.parameter()));
        params
    }

    /// Call-site arguments matching `parameter_buffers`
    pub fn use_buffers(&self) -> Vec<String> {
        let mut args: Vec<String> = self.private_buffers().map(|b| b.use_expr()).collect();
        args.extend(self.local_buffers().map(|b| b.use_expr()));
        args.extend(self.global_buffers().into_iter().map(|g| g.use_expr()));
        args
    }

    // Compute functions

    pub fn has_functions(&self) -> bool {
        self.begin_function || self.compute_function || self.end_function
    }

    pub fn output_type(&self) -> &str {
        self.output_type.as_deref().unwrap_or(&self.input_type)
    }

    pub fn kernel_name(&self, replica: usize) -> String {
        format!("{}_{}", self.name, replica)
    }

    pub fn begin_function_name(&self) -> String {
        format!("{}_begin", self.name)
    }

    pub fn function_name(&self) -> String {
        format!("{}_function", self.name)
    }

    pub fn end_function_name(&self) -> String {
        format!("{}_end", self.name)
    }

    fn call(&self, function: String, param: Option<&str>) -> String {
        let mut args: Vec<String> = param.map(str::to_string).into_iter().collect();
        args.extend(self.use_buffers());
        format!("{}({})", function, args.join(", "))
    }

    pub fn call_begin_function(&self, param: Option<&str>) -> String {
        self.call(self.begin_function_name(), param)
    }

    /// Call expression of the compute function, or the bare parameter when
    /// the operator has none
    pub fn call_function(&self, param: Option<&str>) -> String {
        if self.compute_function {
            self.call(self.function_name(), param)
        } else {
            param.unwrap_or_default().to_string()
        }
    }

    pub fn call_end_function(&self, param: Option<&str>) -> String {
        self.call(self.end_function_name(), param)
    }

    // Backend naming

    /// Parallelism macro used by the HLS sources
    pub fn par_macro(&self) -> String {
        format!("{}_PAR", self.name.to_uppercase())
    }

    /// Parallelism macro used by the OpenCL sources
    pub fn intel_par_macro(&self) -> String {
        format!("__{}_PAR", self.name.to_uppercase())
    }

    /// Operator class name in the HLS dataflow library
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            OperatorKind::MemoryReader => "MR",
            OperatorKind::Filter => "Filter",
            OperatorKind::Map => "Map",
            OperatorKind::FlatMap => "FlatMap",
            OperatorKind::MemoryWriter => "MW",
            OperatorKind::Generator => "Generator",
            OperatorKind::Drainer => "Collector",
        }
    }
}
