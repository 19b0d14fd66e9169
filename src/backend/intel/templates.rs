//! Built-in Intel OpenCL templates

use crate::backend::{define_constants, indent};
use crate::buffer::GlobalBuffer;
use crate::channel::Channel;
use crate::error::{CodegenError, CodegenResult};
use crate::operator::Operator;
use crate::pipeline::Pipeline;
use crate::policy::{GatherPolicy, OperatorKind, TransferMode};
use crate::render::{Bindings, IntelTemplate, NodeSource, Template};

pub fn render(template: IntelTemplate, b: &Bindings<'_>) -> CodegenResult<String> {
    let t = Template::Intel(template);
    match template {
        IntelTemplate::Constants => Ok(constants_h(b)),
        IntelTemplate::Tuples => Ok(tuples_h(b.pipeline)),
        IntelTemplate::ChannelTuples => Ok(fsp_tuples_cl(b.pipeline)),
        IntelTemplate::Function => Ok(function_cl(b.require_operator(t)?)),
        IntelTemplate::Device => device_cl(b),
        IntelTemplate::Pipe => Ok(pipe_hpp(b.pipeline)),
        IntelTemplate::Source => source_hpp(b.pipeline),
        IntelTemplate::Sink => sink_hpp(b.pipeline),
        IntelTemplate::Host => host_cpp(b.pipeline),
        IntelTemplate::Makefile => Ok(makefile(b.pipeline)),
    }
}

fn missing(template: IntelTemplate, what: &str) -> CodegenError {
    CodegenError::template(Template::Intel(template).to_string(), what)
}

// Common

fn constants_h(b: &Bindings<'_>) -> String {
    format!(
        "#ifndef __CONSTANTS_H\n#define __CONSTANTS_H\n\n{}#endif // __CONSTANTS_H\n",
        define_constants(b.constants)
    )
}

fn tuples_h(p: &Pipeline) -> String {
    let mut out = String::from("#ifndef __TUPLES_H\n#define __TUPLES_H\n\n#include \"constants.h\"\n\n");
    for t in p.datatypes() {
        out.push_str(&format!(
            "typedef struct {{\n    uint key;\n    float value;\n}} {t};\n\n\
             inline uint {t}_getKey({t} data) {{\n    return data.key;\n}}\n\n"
        ));
    }
    out.push_str("#endif // __TUPLES_H\n");
    out
}

// Device

fn fsp_tuples_cl(p: &Pipeline) -> String {
    let mut out = String::from("#ifndef __FSP_TUPLES_CL\n#define __FSP_TUPLES_CL\n\n");
    for ch in p.channels() {
        let (tt, dt) = (&ch.tuple_type, &ch.datatype);
        out.push_str(&format!(
            "typedef struct {{\n    {dt} data;\n    bool last;\n}} {tt};\n\n\
             inline {tt} create_{tt}(const {dt} data) {{\n    {tt} t;\n    t.data = data;\n    t.last = false;\n    return t;\n}}\n\n\
             inline {tt} create_last_{tt}() {{\n    {tt} t;\n    t.last = true;\n    return t;\n}}\n\n"
        ));
    }
    out.push_str("#endif // __FSP_TUPLES_CL\n");
    out
}

fn with_buffers(first: &[&str], op: &Operator) -> String {
    let mut params: Vec<String> = first.iter().map(|s| s.to_string()).collect();
    params.extend(op.parameter_buffers());
    params.join(", ")
}

/// Starting point for an operator's hand-written functions
fn function_cl(op: &Operator) -> String {
    let (itype, otype) = (op.input_type.as_str(), op.output_type());

    if op.kind == OperatorKind::FlatMap {
        return format!(
            "// {name}: runs once for every input tuple `in` of type {itype};\n\
             // each __SEND(value) emits one {otype} downstream\n\
             {otype} out;\nout.key = in.key;\nout.value = in.value;\n__SEND(out);\n",
            name = op.name
        );
    }

    let mut out = String::new();
    if op.begin_function {
        out.push_str(&format!(
            "void {}({})\n{{\n}}\n\n",
            op.begin_function_name(),
            with_buffers(&[], op)
        ));
    }
    if op.compute_function {
        let name = op.function_name();
        let body = "    out.key = in.key;\n    out.value = in.value;\n";
        out.push_str(&match op.kind {
            OperatorKind::Filter => format!(
                "bool {name}({})\n{{\n    out->key = in.key;\n    out->value = in.value;\n    return true;\n}}\n",
                with_buffers(&[&format!("{itype} in"), &format!("{otype} * out")], op)
            ),
            OperatorKind::Generator => format!(
                "{otype} {name}({})\n{{\n    {otype} out;\n    out.key = n;\n    out.value = (float)n;\n    return out;\n}}\n",
                with_buffers(&["uint n"], op)
            ),
            OperatorKind::Drainer => format!(
                "void {name}({})\n{{\n    (void)in;\n}}\n",
                with_buffers(&[&format!("{itype} in")], op)
            ),
            _ => format!(
                "{otype} {name}({})\n{{\n    {otype} out;\n{body}    return out;\n}}\n",
                with_buffers(&[&format!("{itype} in")], op)
            ),
        });
    }
    if op.end_function {
        out.push_str(&format!(
            "\nvoid {}({})\n{{\n}}\n",
            op.end_function_name(),
            with_buffers(&[], op)
        ));
    }
    out
}

fn device_cl(b: &Bindings<'_>) -> CodegenResult<String> {
    let p = b.pipeline;
    let mut out = format!(
        "// Device source of pipeline '{}'\n\n#pragma OPENCL EXTENSION cl_intel_channels : enable\n\n",
        p.name()
    );
    out.push_str(&define_constants(b.constants));
    out.push_str("#include \"../common/tuples.h\"\n#include \"includes/fsp_tuples.cl\"\n\n");

    out.push_str("// Channels\n");
    for ch in p.channels() {
        out.push_str(&format!("{};\n", ch.declare()));
    }
    out.push('\n');

    let includes: Vec<&str> = p
        .nodes()
        .iter()
        .filter_map(|n| match b.node_sources.get(&n.name) {
            Some(NodeSource::Include(file)) => Some(file.as_str()),
            _ => None,
        })
        .collect();
    if !includes.is_empty() {
        out.push_str("// Operator functions\n");
        for file in includes {
            out.push_str(&format!("#include \"nodes/{}\"\n", file));
        }
        out.push('\n');
    }

    for n in p.nodes() {
        let inline = match b.node_sources.get(&n.name) {
            Some(NodeSource::Inline(body)) => Some(body.as_str()),
            _ => None,
        };
        if n.kind == OperatorKind::FlatMap && inline.is_none() {
            return Err(missing(
                IntelTemplate::Device,
                &format!("no spliced body for flat map '{}'", n.name),
            ));
        }
        for replica in 0..n.parallelism {
            out.push_str(&kernel(p, n, replica, inline)?);
            out.push('\n');
        }
    }
    Ok(out)
}

fn kernel_params(op: &Operator) -> String {
    let mut params: Vec<String> = match op.kind {
        OperatorKind::MemoryReader => vec![
            format!("__global const {} * restrict input", op.input_type),
            "const uint size".to_string(),
        ],
        OperatorKind::Generator => vec!["const uint size".to_string()],
        OperatorKind::MemoryWriter => vec![
            format!("__global {} * restrict output", op.output_type()),
            "__global uint * restrict count".to_string(),
        ],
        _ => Vec::new(),
    };
    params.extend(op.global_buffers().into_iter().map(GlobalBuffer::parameter));
    params.join(",\n    ")
}

/// Build `t_out` from `value` and send it downstream
fn emit(out_ch: &Channel, op: &Operator, value: &str) -> String {
    format!(
        "const {tt} t_out = create_{tt}({value});\n{}",
        out_ch.dispatch_tuple(op.dispatch_policy, "idx", "w", "t_out", false),
        tt = out_ch.tuple_type
    )
}

fn kernel(p: &Pipeline, op: &Operator, replica: usize, inline: Option<&str>) -> CodegenResult<String> {
    let inbound = p.inbound(op);
    let outbound = p.outbound(op);

    let mut body = format!("const uint idx = {};\n", replica);
    if outbound.is_some() {
        body.push_str("uint w = 0;\n");
    }
    for d in op.declare_buffers() {
        body.push_str(&format!("{};\n", d));
    }
    if op.begin_function {
        body.push_str(&format!("{};\n", op.call_begin_function(None)));
    }
    body.push('\n');

    match (op.kind, inbound, outbound) {
        (OperatorKind::MemoryReader | OperatorKind::Generator, None, Some(out_ch)) => {
            let arg = if op.kind == OperatorKind::Generator { "n" } else { "input[n]" };
            let produce = format!(
                "const {} out = {};\n{}",
                op.output_type(),
                op.call_function(Some(arg)),
                emit(out_ch, op, "out")
            );
            body.push_str(&format!(
                "for (uint n = 0; n < size; ++n) {{\n{}}}\n",
                indent(&produce, 4)
            ));
        }
        (_, Some(in_ch), _) => {
            let process = match (op.kind, outbound) {
                (OperatorKind::Map, Some(out_ch)) => format!(
                    "const {} out = {};\n{}",
                    op.output_type(),
                    op.call_function(Some("in")),
                    emit(out_ch, op, "out")
                ),
                (OperatorKind::Filter, Some(out_ch)) => format!(
                    "{} out;\nif ({}) {{\n{}}}\n",
                    op.output_type(),
                    op.call_function(Some("in, &out")),
                    indent(&emit(out_ch, op, "out"), 4)
                ),
                (OperatorKind::FlatMap, Some(_)) => {
                    let mut text = inline.unwrap_or_default().to_string();
                    if !text.ends_with('\n') {
                        text.push('\n');
                    }
                    text
                }
                (OperatorKind::MemoryWriter, None) => {
                    format!("output[n++] = {};\n", op.call_function(Some("in")))
                }
                (OperatorKind::Drainer, None) if op.compute_function => {
                    format!("{};\n", op.call_function(Some("in")))
                }
                (OperatorKind::Drainer, None) => "(void)in;\n".to_string(),
                _ => {
                    return Err(missing(
                        IntelTemplate::Device,
                        &format!("operator '{}' cannot be placed at position it occupies", op.name),
                    ))
                }
            };
            if op.kind == OperatorKind::MemoryWriter {
                body.push_str("uint n = 0;\n");
            }
            body.push_str(&gather_loop(op, in_ch, &process));
        }
        _ => {
            return Err(missing(
                IntelTemplate::Device,
                &format!("operator '{}' has no input to consume", op.name),
            ))
        }
    }

    body.push('\n');
    if op.end_function {
        body.push_str(&format!("{};\n", op.call_end_function(None)));
    }
    match outbound {
        Some(out_ch) => {
            body.push_str(&format!("const {tt} t_last = create_last_{tt}();\n", tt = out_ch.tuple_type));
            body.push_str(&out_ch.dispatch_tuple(op.dispatch_policy, "idx", "w", "t_last", true));
        }
        None if op.kind == OperatorKind::MemoryWriter => body.push_str("count[0] = n;\n"),
        None => {}
    }

    Ok(format!(
        "__attribute__((max_global_work_dim(0)))\n__kernel void {}({})\n{{\n{}}}\n",
        op.kernel_name(replica),
        kernel_params(op),
        indent(&body, 4)
    ))
}

/// Read tuples from every upstream replica until each has sent its last one
fn gather_loop(op: &Operator, in_ch: &Channel, process: &str) -> String {
    let degree = in_ch.input_degree;
    let read = match op.gather_policy {
        GatherPolicy::LB => format!(
            "bool valid = false;\nconst {} t_in = {};\n",
            in_ch.tuple_type,
            in_ch.read_nb("r", "idx", "valid")
        ),
        _ => format!(
            "const bool valid = true;\nconst {} t_in = {};\n",
            in_ch.tuple_type,
            in_ch.read("r", "idx")
        ),
    };
    let handle = format!(
        "if (t_in.last) {{\n    done[r] = true;\n    ++finished;\n}} else {{\n    const {} in = t_in.data;\n{}}}\n",
        op.input_type,
        indent(process, 4)
    );
    let step = format!("{read}if (valid) {{\n{}}}\n", indent(&handle, 4));
    format!(
        "bool done[{degree}] = {{false}};\nuint finished = 0;\nuint r = 0;\n\
         while (finished < {degree}) {{\n    if (!done[r]) {{\n{}    }}\n    r = (r + 1) % {degree};\n}}\n",
        indent(&step, 8)
    )
}

// Host

fn node_struct_name(op: &Operator) -> String {
    format!("F{}", op.name)
}

fn member_name(op: &Operator) -> String {
    format!("{}_node", op.name)
}

/// Kernel arguments set by the source/sink adapters before the buffers
fn first_buffer_arg(op: &Operator) -> usize {
    match op.kind {
        OperatorKind::MemoryReader | OperatorKind::MemoryWriter => 2,
        OperatorKind::Generator => 1,
        _ => 0,
    }
}

fn node_struct(op: &Operator) -> String {
    let name = node_struct_name(op);
    let globals = op.global_buffers();
    let allocated: Vec<&GlobalBuffer> = globals.iter().copied().filter(|g| !g.has_value()).collect();

    let mut members = String::new();
    let mut create = String::new();
    let mut prepare = String::new();
    let mut sync = String::new();
    let mut release = String::new();
    for g in &allocated {
        let (dt, bn) = (&g.shape.datatype, &g.shape.name);
        let (queues, buffers) = (g.queues_name(), g.buffers_name());
        let count = if g.access.is_single() { "par" } else { "1" };
        let total = g.shape.total_size();

        members.push_str(&format!(
            "// {bn} buffer\nstd::vector<cl_command_queue> {queues};\nstd::vector<cl_mem> {buffers};\n\n"
        ));
        create.push_str(&format!(
            "for (size_t i = 0; i < {count}; ++i) {{\n    {queues}.push_back(ocl.createCommandQueue());\n\n    \
             cl_int status;\n    cl_mem buff = clCreateBuffer(ocl.context,\n                                 \
             CL_MEM_HOST_WRITE_ONLY | {flags},\n                                 \
             {total} * sizeof({dt}),\n                                 NULL, &status);\n    \
             clCheckErrorMsg(status, \"Failed to create {bn}\");\n\n    {buffers}.push_back(buff);\n}}\n",
            flags = g.flags()
        ));
        let (param, slot) = if g.access.is_single() {
            (", size_t replica_id", g.replica_slot("replica_id"))
        } else {
            ("", g.replica_slot("replica_id"))
        };
        prepare.push_str(&format!(
            "void prepare_{bn}(const std::vector<{dt}> & data{param})\n{{\n    \
             clCheckError(clEnqueueWriteBuffer({queues}[{slot}], {buffers}[{slot}], CL_TRUE, 0,\n                                      \
             {total} * sizeof({dt}), data.data(), 0, NULL, NULL));\n}}\n\n"
        ));
        sync.push_str(&format!("for (auto & q : {queues}) {{\n    clFinish(q);\n}}\n"));
        release.push_str(&format!(
            "for (auto & b : {buffers}) {{\n    if (b) clCheckError(clReleaseMemObject(b));\n}}\n\
             for (auto & q : {queues}) {{\n    if (q) clReleaseCommandQueue(q);\n}}\n"
        ));
    }

    let mut args = String::new();
    for g in &globals {
        if g.has_value() {
            args.push_str(&format!(
                "clCheckError(clSetKernelArg(kernels[i], argi++, sizeof({}), &{}));\n",
                g.shape.datatype, g.shape.name
            ));
        } else {
            args.push_str(&format!(
                "clCheckError(clSetKernelArg(kernels[i], argi++, sizeof(cl_mem), &{}[{}]));\n",
                g.buffers_name(),
                g.replica_slot("i")
            ));
        }
    }
    let constants: String = globals
        .iter()
        .filter_map(|g| g.declare_and_init())
        .map(|d| format!("const {};\n", d))
        .collect();

    let body = format!(
        "OCL & ocl;\nstd::string name;\nsize_t par;\n\n\
         std::vector<cl_command_queue> kernel_queues;\nstd::vector<cl_kernel> kernels;\n\n\
         static constexpr cl_uint FIRST_ARG = {first};\n\n{members}\
         {name}(OCL & ocl, const size_t par)\n: ocl(ocl)\n, name(\"{op}\")\n, par(par)\n{{\n\
         {kernels_init}{create}}}\n\n{prepare}\
         void launch_kernels()\n{{\n{sync}{constants}\
         {launch}}}\n\n\
         void finish()\n{{\n    for (auto & q : kernel_queues) {{\n        clFinish(q);\n    }}\n}}\n\n\
         void clean()\n{{\n    finish();\n{release}\
         {kernels_release}}}\n",
        first = first_buffer_arg(op),
        op = op.name,
        kernels_init = indent(
            "for (size_t i = 0; i < par; ++i) {\n    kernel_queues.push_back(ocl.createCommandQueue());\n    \
             kernels.push_back(ocl.createKernel(name + \"_\" + std::to_string(i)));\n}\n",
            4
        ),
        create = indent(&create, 4),
        sync = indent(&sync, 4),
        constants = indent(&constants, 4),
        launch = indent(
            &format!(
                "for (size_t i = 0; i < par; ++i) {{\n    cl_uint argi = FIRST_ARG;\n{}    \
                 clCheckError(clEnqueueTask(kernel_queues[i], kernels[i], 0, NULL, NULL));\n}}\n",
                indent(&args, 4)
            ),
            4
        ),
        release = indent(&release, 4),
        kernels_release = indent(
            "for (auto & k : kernels) {\n    if (k) clReleaseKernel(k);\n}\n\
             for (auto & q : kernel_queues) {\n    if (q) clReleaseCommandQueue(q);\n}\n",
            4
        ),
    );
    format!("struct {name}\n{{\n{}}};\n", indent(&body, 4))
}

fn transfer_mode(p: &Pipeline) -> TransferMode {
    p.config().transfer_mode
}

fn pipe_hpp(p: &Pipeline) -> String {
    let mut out = String::from(
        "#pragma once\n\n#include <string>\n#include <vector>\n\n\
         #include \"../../ocl/ocl.hpp\"\n#include \"../../ocl/utils.hpp\"\n\
         #include \"../../common/constants.h\"\n#include \"../../common/tuples.h\"\n\n\
         enum struct FTransferMode {\n    COPY,\n    SHARED\n};\n\n",
    );
    out.push_str(&format!(
        "static constexpr FTransferMode TRANSFER_MODE = FTransferMode::{};\n\n",
        transfer_mode(p).macro_name()
    ));
    for n in p.nodes() {
        out.push_str(&node_struct(n));
        out.push('\n');
    }

    let members: String = p
        .nodes()
        .iter()
        .map(|n| format!("    {} {};\n", node_struct_name(n), member_name(n)))
        .collect();
    let init: String = p
        .nodes()
        .iter()
        .map(|n| format!("    , {}(ocl, {})\n", member_name(n), n.intel_par_macro()))
        .collect();
    let for_each = |call: &str, reverse: bool| -> String {
        let mut lines: Vec<String> = p
            .nodes()
            .iter()
            .map(|n| format!("        {}.{}();\n", member_name(n), call))
            .collect();
        if reverse {
            lines.reverse();
        }
        lines.concat()
    };
    out.push_str(&format!(
        "struct FPipe\n{{\n    OCL & ocl;\n{members}\n    FPipe(OCL & ocl)\n    : ocl(ocl)\n{init}    {{}}\n\n\
         \x20   void launch_kernels()\n    {{\n{launch}    }}\n\n\
         \x20   void finish()\n    {{\n{finish}    }}\n\n\
         \x20   void clean()\n    {{\n{clean}    }}\n}};\n",
        launch = for_each("launch_kernels", true),
        finish = for_each("finish", false),
        clean = for_each("clean", false),
    ));
    out
}

fn source_hpp(p: &Pipeline) -> CodegenResult<String> {
    let ingress = p
        .first()
        .ok_or_else(|| missing(IntelTemplate::Source, "pipeline has no ingress operator"))?;
    let node = node_struct_name(ingress);
    let mut out = String::from("#pragma once\n\n#include <vector>\n\n#include \"pipe.hpp\"\n\n");

    if ingress.kind == OperatorKind::Generator {
        out.push_str(&format!(
            "struct FSource\n{{\n    {node} & node;\n\n    FSource({node} & node)\n    : node(node)\n    {{}}\n\n    \
             void set_size(const size_t rid, const cl_uint size)\n    {{\n        \
             clCheckError(clSetKernelArg(node.kernels[rid], 0, sizeof(cl_uint), &size));\n    }}\n\n    \
             void clean() {{}}\n}};\n"
        ));
        return Ok(out);
    }

    let shared = transfer_mode(p) == TransferMode::Shared;
    let (flags, host_ptr) = if shared {
        ("CL_MEM_READ_ONLY | CL_MEM_USE_HOST_PTR", "(void *)data")
    } else {
        ("CL_MEM_READ_ONLY", "NULL")
    };
    let copy = if shared {
        String::new()
    } else {
        "        clCheckError(clEnqueueWriteBuffer(node.kernel_queues[rid], buff, CL_TRUE, 0,\n                                          \
         size * sizeof(T), data, 0, NULL, NULL));\n"
            .to_string()
    };
    out.push_str(&format!(
        "template <typename T>\nstruct FSource\n{{\n    OCL & ocl;\n    {node} & node;\n    std::vector<cl_mem> buffers;\n\n    \
         FSource(OCL & ocl, {node} & node)\n    : ocl(ocl)\n    , node(node)\n    {{}}\n\n    \
         void push(const size_t rid, const T * data, const cl_uint size)\n    {{\n        \
         cl_int status;\n        cl_mem buff = clCreateBuffer(ocl.context, {flags},\n                                     \
         size * sizeof(T), {host_ptr}, &status);\n        \
         clCheckErrorMsg(status, \"Failed to create the source buffer\");\n{copy}        \
         clCheckError(clSetKernelArg(node.kernels[rid], 0, sizeof(cl_mem), &buff));\n        \
         clCheckError(clSetKernelArg(node.kernels[rid], 1, sizeof(cl_uint), &size));\n        \
         buffers.push_back(buff);\n    }}\n\n    \
         void clean()\n    {{\n        for (auto & b : buffers) {{\n            if (b) clCheckError(clReleaseMemObject(b));\n        }}\n    }}\n}};\n"
    ));
    Ok(out)
}

fn sink_hpp(p: &Pipeline) -> CodegenResult<String> {
    let egress = p
        .last()
        .ok_or_else(|| missing(IntelTemplate::Sink, "pipeline has no egress operator"))?;
    let node = node_struct_name(egress);
    let mut out = String::from("#pragma once\n\n#include <vector>\n\n#include \"pipe.hpp\"\n\n");

    if egress.kind == OperatorKind::Drainer {
        out.push_str(&format!(
            "struct FSink\n{{\n    {node} & node;\n\n    FSink({node} & node)\n    : node(node)\n    {{}}\n\n    \
             void wait()\n    {{\n        node.finish();\n    }}\n\n    void clean() {{}}\n}};\n"
        ));
        return Ok(out);
    }

    out.push_str(&format!(
        "template <typename T>\nstruct FSink\n{{\n    OCL & ocl;\n    {node} & node;\n    \
         std::vector<cl_mem> outputs;\n    std::vector<cl_mem> counts;\n    std::vector<cl_uint> capacities;\n\n    \
         FSink(OCL & ocl, {node} & node)\n    : ocl(ocl)\n    , node(node)\n    , outputs(node.par)\n    \
         , counts(node.par)\n    , capacities(node.par)\n    {{}}\n\n    \
         void prepare(const size_t rid, const cl_uint capacity)\n    {{\n        cl_int status;\n        \
         outputs[rid] = clCreateBuffer(ocl.context, CL_MEM_WRITE_ONLY, capacity * sizeof(T), NULL, &status);\n        \
         clCheckErrorMsg(status, \"Failed to create the sink buffer\");\n        \
         counts[rid] = clCreateBuffer(ocl.context, CL_MEM_WRITE_ONLY, sizeof(cl_uint), NULL, &status);\n        \
         clCheckErrorMsg(status, \"Failed to create the sink counter\");\n        capacities[rid] = capacity;\n\n        \
         clCheckError(clSetKernelArg(node.kernels[rid], 0, sizeof(cl_mem), &outputs[rid]));\n        \
         clCheckError(clSetKernelArg(node.kernels[rid], 1, sizeof(cl_mem), &counts[rid]));\n    }}\n\n    \
         std::vector<T> pop(const size_t rid)\n    {{\n        cl_uint received = 0;\n        \
         clCheckError(clEnqueueReadBuffer(node.kernel_queues[rid], counts[rid], CL_TRUE, 0,\n                                         \
         sizeof(cl_uint), &received, 0, NULL, NULL));\n        \
         std::vector<T> data(received);\n        if (received > 0) {{\n            \
         clCheckError(clEnqueueReadBuffer(node.kernel_queues[rid], outputs[rid], CL_TRUE, 0,\n                                             \
         received * sizeof(T), data.data(), 0, NULL, NULL));\n        }}\n        return data;\n    }}\n\n    \
         void clean()\n    {{\n        for (auto & b : outputs) {{\n            if (b) clCheckError(clReleaseMemObject(b));\n        }}\n        \
         for (auto & b : counts) {{\n            if (b) clCheckError(clReleaseMemObject(b));\n        }}\n    }}\n}};\n"
    ));
    Ok(out)
}

fn host_cpp(p: &Pipeline) -> CodegenResult<String> {
    let (Some(ingress), Some(egress)) = (p.first(), p.last()) else {
        return Err(missing(IntelTemplate::Host, "pipeline has no ingress or egress operator"));
    };
    let (src, snk) = (member_name(ingress), member_name(egress));

    let source = if ingress.kind == OperatorKind::Generator {
        format!(
            "    FSource source(pipe.{src});\n    for (size_t rid = 0; rid < {par}; ++rid) {{\n        \
             source.set_size(rid, size);\n    }}\n",
            par = ingress.intel_par_macro()
        )
    } else {
        format!(
            "    std::vector<{t}> data(size);\n    for (cl_uint i = 0; i < size; ++i) {{\n        \
             data[i].key = i;\n        data[i].value = (float)i;\n    }}\n\n    \
             FSource<{t}> source(ocl, pipe.{src});\n    for (size_t rid = 0; rid < {par}; ++rid) {{\n        \
             source.push(rid, data.data(), size);\n    }}\n",
            t = ingress.input_type,
            par = ingress.intel_par_macro()
        )
    };
    let (sink_setup, sink_collect) = if egress.kind == OperatorKind::Drainer {
        (
            format!("    FSink sink(pipe.{snk});\n"),
            "    sink.wait();\n".to_string(),
        )
    } else {
        (
            format!(
                "    FSink<{t}> sink(ocl, pipe.{snk});\n    for (size_t rid = 0; rid < {par}; ++rid) {{\n        \
                 sink.prepare(rid, size * {ipar});\n    }}\n",
                t = egress.output_type(),
                par = egress.intel_par_macro(),
                ipar = ingress.intel_par_macro()
            ),
            format!(
                "    size_t received = 0;\n    for (size_t rid = 0; rid < {par}; ++rid) {{\n        \
                 received += sink.pop(rid).size();\n    }}\n    \
                 std::cout << \"received \" << received << \" tuples\" << std::endl;\n",
                par = egress.intel_par_macro()
            ),
        )
    };

    Ok(format!(
        "#include <iostream>\n#include <string>\n#include <vector>\n\n\
         #include \"includes/pipe.hpp\"\n#include \"includes/fsource.hpp\"\n#include \"includes/fsink.hpp\"\n\n\
         int main(int argc, char * argv[])\n{{\n    \
         const std::string bitstream = argc > 1 ? argv[1] : \"{name}.aocx\";\n    \
         const cl_uint size = argc > 2 ? std::stoul(argv[2]) : 1024;\n\n    \
         OCL ocl;\n    ocl.init(bitstream);\n\n    FPipe pipe(ocl);\n\n{source}\n{sink_setup}\n    \
         pipe.launch_kernels();\n    pipe.finish();\n\n{sink_collect}\n    \
         source.clean();\n    sink.clean();\n    pipe.clean();\n    ocl.clean();\n\n    return 0;\n}}\n",
        name = p.name()
    ))
}

fn makefile(p: &Pipeline) -> String {
    let name = p.name();
    format!(
        "# Build rules for pipeline '{name}'\n\n\
         AOC      ?= aoc\nCXX      ?= g++\nBOARD    ?=\n\n\
         TARGET   := {name}\nKERNEL   := device/{name}.cl\n\n\
         CXXFLAGS += -std=c++17 -O2 -I. -Icommon -Iocl\n\
         LDFLAGS  += $(shell aocl link-config) -lpthread\n\n\
         .PHONY: all host emulator hardware clean\n\n\
         all: host emulator\n\n\
         host: host/host.cpp\n\t$(CXX) $(CXXFLAGS) host/host.cpp -o $(TARGET) $(LDFLAGS)\n\n\
         emulator: $(KERNEL)\n\tmkdir -p bin/emulator\n\t$(AOC) -march=emulator -I device -I common $(KERNEL) -o bin/emulator/$(TARGET).aocx\n\n\
         hardware: $(KERNEL)\n\tmkdir -p bin/hardware\n\t$(AOC) -board=$(BOARD) -I device -I common $(KERNEL) -o bin/hardware/$(TARGET).aocx\n\n\
         clean:\n\trm -rf $(TARGET) bin\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferAccess, BufferValue};
    use crate::pipeline::tests::spike_detection;
    use crate::policy::{DispatchPolicy, Target};
    use std::collections::BTreeMap;

    fn resolved() -> Pipeline {
        let mut p = spike_detection(Target::Intel);
        p.finalize().unwrap();
        p
    }

    #[test]
    fn test_tuples_per_datatype() {
        let text = tuples_h(&resolved());
        assert!(text.contains("} input_t;"));
        assert!(text.contains("inline uint tuple_t_getKey(tuple_t data)"));
    }

    #[test]
    fn test_channel_wrappers() {
        let text = fsp_tuples_cl(&resolved());
        assert!(text.contains("typedef struct {\n    input_t data;\n    bool last;\n} mr_average_calculator_t;"));
        assert!(text.contains("inline spike_detector_mw_t create_last_spike_detector_mw_t()"));
    }

    #[test]
    fn test_function_stubs_match_calls() {
        let p = resolved();
        let filter = function_cl(&p.nodes()[2]);
        assert!(filter.starts_with("bool spike_detector_function(tuple_t in, tuple_t * out)"));
        let map = function_cl(&p.nodes()[1]);
        assert!(map.starts_with("tuple_t average_calculator_function(input_t in)"));
    }

    #[test]
    fn test_map_kernel() {
        let p = resolved();
        let k = kernel(&p, &p.nodes()[1], 1, None).unwrap();
        assert!(k.starts_with("__attribute__((max_global_work_dim(0)))\n__kernel void average_calculator_1()\n{\n"));
        assert!(k.contains("    const uint idx = 1;\n"));
        assert!(k.contains("bool valid = false;"));
        assert!(k.contains("read_channel_nb_intel(mr_average_calculator_ch[r][idx], &valid)"));
        assert!(k.contains("const tuple_t out = average_calculator_function(in);"));
        assert!(k.contains("write_channel_intel(average_calculator_spike_detector_ch[idx][w], t_out);"));
        assert!(k.contains("create_last_average_calculator_spike_detector_t()"));
    }

    #[test]
    fn test_reader_and_writer_kernels() {
        let p = resolved();
        let mr = kernel(&p, &p.nodes()[0], 0, None).unwrap();
        assert!(mr.contains("__global const input_t * restrict input,\n    const uint size)"));
        assert!(mr.contains("const input_t out = input[n];"));
        assert!(mr.contains("w = input_t_getKey(t_out.data) % 2;"));

        let mw = kernel(&p, &p.nodes()[3], 0, None).unwrap();
        assert!(mw.contains("output[n++] = in;"));
        assert!(mw.contains("count[0] = n;"));
        assert!(!mw.contains("t_last"));
    }

    #[test]
    fn test_global_argument_order_matches_signature() {
        let mut p = spike_detection(Target::Intel);
        {
            let avg = p.operator_mut("average_calculator").unwrap();
            avg.add_global_buffer("int", "threshold", &[1], BufferAccess::Read, false, Some(BufferValue::Int(3)))
                .unwrap();
            avg.add_global_buffer("float", "model", &[64], BufferAccess::Read, true, None)
                .unwrap();
        }
        p.finalize().unwrap();
        let avg = &p.nodes()[1];

        let params = kernel_params(avg);
        let model = params.find("model").unwrap();
        let threshold = params.find("threshold").unwrap();
        assert!(model < threshold);

        let host = node_struct(avg);
        let model_arg = host.find("&model_buffers[i]").unwrap();
        let threshold_arg = host.find("&threshold)").unwrap();
        assert!(model_arg < threshold_arg);
        assert!(host.contains("const int threshold = 3;"));
        assert!(host.contains("CL_MEM_HOST_WRITE_ONLY | CL_MEM_READ_ONLY"));
    }

    #[test]
    fn test_flat_map_kernel_inlines_body() {
        let mut p = spike_detection(Target::Intel);
        p.operator_mut("spike_detector").unwrap().kind = OperatorKind::FlatMap;
        p.finalize().unwrap();
        let k = kernel(&p, &p.nodes()[2], 0, Some("// spliced\n")).unwrap();
        assert!(k.contains("// spliced"));

        let constants = BTreeMap::new();
        let sources = BTreeMap::new();
        let b = Bindings::new(&p, &constants, &sources);
        assert!(matches!(device_cl(&b), Err(CodegenError::Template { .. })));
    }

    #[test]
    fn test_pipe_aggregate() {
        let text = pipe_hpp(&resolved());
        assert!(text.contains("struct Fmr\n{"));
        assert!(text.contains("    , average_calculator_node(ocl, __AVERAGE_CALCULATOR_PAR)\n"));
        let launch = text.find("void launch_kernels()\n    {\n        mw_node.launch_kernels();").unwrap();
        assert!(launch > 0);
        assert!(text.contains("FTransferMode::COPY"));
    }

    #[test]
    fn test_generator_source_and_drainer_sink() {
        let mut p = Pipeline::new(crate::config::PipelineConfig::new("gen", "input_t", Target::Intel));
        p.add(Operator::new("gen", 1, OperatorKind::Generator, GatherPolicy::None, DispatchPolicy::RR).unwrap())
            .unwrap();
        p.add(Operator::new("dr", 1, OperatorKind::Drainer, GatherPolicy::RR, DispatchPolicy::None).unwrap())
            .unwrap();
        p.finalize().unwrap();
        assert!(source_hpp(&p).unwrap().contains("void set_size("));
        assert!(sink_hpp(&p).unwrap().contains("void wait()"));
        let host = host_cpp(&p).unwrap();
        assert!(host.contains("FSource source(pipe.gen_node);"));
        assert!(host.contains("sink.wait();"));
    }
}
