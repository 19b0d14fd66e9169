//! Built-in Xilinx HLS templates

use crate::backend::{define_constants, indent};
use crate::buffer::BufferShape;
use crate::error::{CodegenError, CodegenResult};
use crate::operator::Operator;
use crate::pipeline::Pipeline;
use crate::policy::{DispatchPolicy, OperatorKind, TransferMode};
use crate::keyby::KeyByLambda;
use crate::render::{Bindings, Template, XilinxTemplate};

pub fn render(template: XilinxTemplate, b: &Bindings<'_>) -> CodegenResult<String> {
    let t = Template::Xilinx(template);
    match template {
        XilinxTemplate::Constants => Ok(format!(
            "#ifndef __CONSTANTS_HPP__\n#define __CONSTANTS_HPP__\n\n{}#endif // __CONSTANTS_HPP__\n",
            define_constants(b.constants)
        )),
        XilinxTemplate::Tuple => Ok(tuple_hpp(b.require_datatype(t)?)),
        XilinxTemplate::Defines => Ok(defines_hpp(b.pipeline)),
        XilinxTemplate::KeybyLambdas => Ok(keyby_hpp(b.keyby)),
        XilinxTemplate::Operator => Ok(operator_hpp(b.require_operator(t)?)),
        XilinxTemplate::MemoryReader => Ok(MEMORY_READER.to_string()),
        XilinxTemplate::Compute => compute_cpp(b.pipeline),
        XilinxTemplate::MemoryWriter => Ok(MEMORY_WRITER.to_string()),
        XilinxTemplate::Host => host_cpp(b.pipeline),
        XilinxTemplate::Makefile => Ok(makefile(b.pipeline)),
    }
}

fn missing(template: XilinxTemplate, what: &str) -> CodegenError {
    CodegenError::template(Template::Xilinx(template).to_string(), what)
}

fn tuple_hpp(name: &str) -> String {
    let guard = format!("__{}_HPP__", name.to_uppercase());
    format!(
        "#ifndef {guard}\n#define {guard}\n\n#include \"constants.hpp\"\n\n\
         struct {name} {{\n    unsigned int key;\n    float value;\n\n    \
         bool operator==(const {name} & other) const {{\n        \
         return key == other.key && value == other.value;\n    }}\n}};\n\n#endif // {guard}\n"
    )
}

fn defines_hpp(p: &Pipeline) -> String {
    let types = p.datatypes();
    let mut out = String::from("#ifndef __DEFINES_HPP__\n#define __DEFINES_HPP__\n\n#include \"fspx.hpp\"\n");
    for t in &types {
        out.push_str(&format!("#include \"common/{}.hpp\"\n", t));
    }
    out.push_str("\nstatic constexpr int BUS_WIDTH = 512;\nusing line_t = ap_uint<BUS_WIDTH>;\n\n");
    if let Some(mr) = p.memory_reader() {
        out.push_str(&format!("using mr_axis_stream_t = fx::axis_stream<{}, 16>;\n", mr.output_type()));
    }
    if let Some(mw) = p.memory_writer() {
        out.push_str(&format!("using mw_axis_stream_t = fx::axis_stream<{}, 16>;\n", mw.output_type()));
    }
    out.push('\n');
    for t in &types {
        out.push_str(&format!("using stream_{t} = fx::stream<{t}, 16>;\n"));
    }
    out.push_str("\n#endif // __DEFINES_HPP__\n");
    out
}

fn keyby_hpp(lambdas: &[KeyByLambda]) -> String {
    let mut out = String::from("#pragma once\n\n#include \"defines.hpp\"\n");
    for l in lambdas {
        out.push('\n');
        out.push_str(&l.definition());
    }
    out
}

/// Member declaration for a functor's private state
fn member(shape: &BufferShape) -> String {
    let dims: String = if shape.is_array() {
        shape.size.iter().map(|s| format!("[{}]", s)).collect()
    } else {
        String::new()
    };
    format!("{} {}{};\n", shape.datatype, shape.name, dims)
}

fn operator_hpp(op: &Operator) -> String {
    let (tin, tout) = (op.input_type.as_str(), op.output_type());
    let mut out = format!("#include \"common/constants.hpp\"\n#include \"common/{}.hpp\"\n", tin);
    if tin != tout {
        out.push_str(&format!("#include \"common/{}.hpp\"\n", tout));
    }

    let functor = match op.kind {
        OperatorKind::Generator => format!(
            "void operator()(const uint64_t i, {tout} & out, bool & last)\n{{\n#pragma HLS INLINE\n    \
             out.key = static_cast<unsigned int>(i % max_key);\n    \
             out.value = static_cast<float>(i / (float)max_key);\n\n    last = (i == size - 1);\n}}\n"
        ),
        OperatorKind::Filter => format!(
            "void operator()({tin} in, {tout} & out, bool & keep)\n{{\n#pragma HLS INLINE\n    \
             out.key = in.key;\n    out.value = in.value;\n    keep = true;\n}}\n"
        ),
        OperatorKind::FlatMap => format!(
            "void operator()({tin} in, FlatMapShipper<{tout}> & shipper)\n{{\n#pragma HLS INLINE\n    \
             {tout} out;\n    out.key = in.key;\n    out.value = in.value;\n    shipper.send(out);\n}}\n"
        ),
        OperatorKind::Drainer => format!(
            "void operator()(const int i, const {tin} & in, const bool last)\n{{\n#pragma HLS INLINE\n}}\n"
        ),
        _ => format!(
            "void operator()({tin} in, {tout} & out)\n{{\n#pragma HLS INLINE\n    \
             out.key = in.key;\n    out.value = in.value;\n}}\n"
        ),
    };

    let state = if op.kind == OperatorKind::Generator {
        format!(
            "uint64_t size;\nunsigned int max_key;\n\n{name}(uint64_t size, unsigned int max_key)\n\
             : size(size)\n, max_key(max_key)\n{{}}\n",
            name = op.name
        )
    } else {
        let members: String = op
            .private_buffers()
            .map(|b| member(&b.shape))
            .chain(op.local_buffers().map(|b| member(&b.shape)))
            .collect();
        format!("{members}{}() = default;\n", op.name)
    };

    out.push_str(&format!(
        "\nstruct {}\n{{\n{}\n{}}};\n",
        op.name,
        indent(&state, 4),
        indent(&functor, 4)
    ));
    out
}

const MEMORY_READER: &str = "#include \"includes/defines.hpp\"

extern \"C\" {
void memory_reader(
    line_t * in,
    int in_count,
    mr_axis_stream_t & out
)
{
    #pragma HLS INTERFACE mode=m_axi port=in bundle=in num_read_outstanding=64 max_read_burst_length=64

    fx::MtoS(in, in_count, out);
}
}
";

const MEMORY_WRITER: &str = "#include \"includes/defines.hpp\"

extern \"C\" {
void memory_writer(
    mw_axis_stream_t & in,
    line_t * out,
    int out_count,
    int * items_written,
    int * eos
)
{
    #pragma HLS INTERFACE mode=m_axi port=out bundle=out num_write_outstanding=64 max_write_burst_length=64

    if (eos[0] == 0) {
        fx::StoWM(in, out, out_count, items_written, eos);
    }
}
}
";

fn keyby_arg(op: &Operator, next: &Operator) -> String {
    if op.dispatch_policy == DispatchPolicy::KB {
        format!(", {}", KeyByLambda::name_for(&op.name, &next.name))
    } else {
        String::new()
    }
}

fn edge(left: &Operator, right: &Operator) -> String {
    format!("{}_{}", left.name, right.name)
}

fn compute_cpp(p: &Pipeline) -> CodegenResult<String> {
    let nodes = p.nodes();
    let (Some(first), Some(last)) = (p.first(), p.last()) else {
        return Err(missing(XilinxTemplate::Compute, "pipeline has no operators"));
    };
    let middle = p.middle();
    if middle.is_empty() {
        return Err(missing(XilinxTemplate::Compute, "no operator between ingress and egress"));
    }
    let generator = (first.kind == OperatorKind::Generator).then_some(first);
    let drainer = (last.kind == OperatorKind::Drainer).then_some(last);

    let mut out = String::from(
        "#include \"common/constants.hpp\"\n#include \"includes/defines.hpp\"\n#include \"includes/keyby_lambdas.hpp\"\n\n",
    );
    for n in generator.into_iter().chain(middle).chain(drainer) {
        out.push_str(&format!("#include \"nodes/{}.hpp\"\n", n.name));
    }

    let mut params = Vec::new();
    if generator.is_some() {
        params.push("uint64_t size".to_string());
        params.push("unsigned int max_key".to_string());
    } else {
        params.push(format!("mr_axis_stream_t in[{}]", first.par_macro()));
    }
    if drainer.is_none() {
        params.push(format!("mw_axis_stream_t out[{}]", last.par_macro()));
    }

    let mut body = String::new();
    if generator.is_none() || drainer.is_none() {
        body.push_str("#pragma HLS interface ap_ctrl_none port=return\n\n");
    }
    body.push_str("#pragma HLS DATAFLOW\n\n");

    if let Some(g) = generator {
        body.push_str(&format!("stream_{} in[{}];\n", g.output_type(), g.par_macro()));
    }
    for pair in nodes.windows(2) {
        body.push_str(&format!(
            "stream_{} {}[{}][{}];\n",
            pair[0].output_type(),
            edge(&pair[0], &pair[1]),
            pair[0].par_macro(),
            pair[1].par_macro()
        ));
    }
    if let Some(d) = drainer {
        body.push_str(&format!("stream_{} out[{}];\n", d.input_type, d.par_macro()));
    }
    body.push('\n');

    if let Some(g) = generator {
        body.push_str(&format!(
            "fx::A2A::ReplicateGenerator<uint64_t, {}, {}>(in, size, max_key);\n",
            g.name,
            g.par_macro()
        ));
    }
    let second = &nodes[1];
    body.push_str(&format!(
        "fx::A2A::Emitter<fx::A2A::Policy_t::{}, {}, {}>(\n    in, {}{}\n);\n\n",
        first.dispatch_policy.short_name(),
        first.par_macro(),
        second.par_macro(),
        edge(first, second),
        keyby_arg(first, second)
    ));

    for i in 1..nodes.len() - 1 {
        let (left, mid, right) = (&nodes[i - 1], &nodes[i], &nodes[i + 1]);
        body.push_str(&format!(
            "fx::A2A::Operator<fx::A2A::Operator_t::{}, {}, fx::A2A::Policy_t::{}, fx::A2A::Policy_t::{}, {}, {}, {}>(\n    \
             {}, {}{}\n);\n\n",
            mid.type_name().to_uppercase(),
            mid.name,
            mid.gather_policy.short_name(),
            mid.dispatch_policy.short_name(),
            left.par_macro(),
            mid.par_macro(),
            right.par_macro(),
            edge(left, mid),
            edge(mid, right),
            keyby_arg(mid, right)
        ));
    }

    let before = &nodes[nodes.len() - 2];
    body.push_str(&format!(
        "fx::A2A::Collector<fx::A2A::Policy_t::{}, {}, {}>(\n    {}, out\n);\n",
        last.gather_policy.short_name(),
        before.par_macro(),
        last.par_macro(),
        edge(before, last)
    ));
    if let Some(d) = drainer {
        body.push_str(&format!(
            "fx::A2A::ReplicateDrainer<uint64_t, {}, {}>(out);\n",
            d.name,
            d.par_macro()
        ));
    }

    out.push_str(&format!(
        "\nextern \"C\" {{\nvoid compute(\n    {}\n)\n{{\n{}}}\n}}\n",
        params.join(",\n    "),
        indent(&body, 4)
    ));
    Ok(out)
}

fn host_cpp(p: &Pipeline) -> CodegenResult<String> {
    let (Some(first), Some(last)) = (p.first(), p.last()) else {
        return Err(missing(XilinxTemplate::Host, "pipeline has no operators"));
    };
    let host_only = p.config().transfer_mode == TransferMode::Host;
    let bo_flags = if host_only { "xrt::bo::flags::host_only" } else { "xrt::bo::flags::normal" };

    let mut includes = String::new();
    for t in p.datatypes() {
        includes.push_str(&format!("#include \"../common/{}.hpp\"\n", t));
    }

    let mut body = format!(
        "const std::string xclbin = argc > 1 ? argv[1] : \"{name}.xclbin\";\n\
         const int size = argc > 2 ? std::stoi(argv[2]) : 1024;\n\n\
         auto device = xrt::device(0);\nauto uuid = device.load_xclbin(xclbin);\n\n\
         std::vector<xrt::run> runs;\n\n",
        name = p.name()
    );

    if first.kind == OperatorKind::MemoryReader {
        body.push_str(&format!(
            "// memory readers\n\
             const int in_lines = (size * sizeof({t}) + sizeof(line_t) - 1) / sizeof(line_t);\n\
             std::vector<{t}> data(size);\nfor (int i = 0; i < size; ++i) {{\n    \
             data[i].key = i;\n    data[i].value = (float)i;\n}}\n\
             std::vector<xrt::bo> inputs;\nfor (int r = 0; r < {par}; ++r) {{\n    \
             auto kernel = xrt::kernel(device, uuid, \"memory_reader:{{memory_reader_\" + std::to_string(r + 1) + \"}}\");\n    \
             auto bo = xrt::bo(device, in_lines * sizeof(line_t), {bo_flags}, kernel.group_id(0));\n    \
             bo.write(data.data(), size * sizeof({t}), 0);\n    bo.sync(XCL_BO_SYNC_BO_TO_DEVICE);\n\n    \
             xrt::run run(kernel);\n    run.set_arg(0, bo);\n    run.set_arg(1, in_lines);\n    \
             inputs.push_back(bo);\n    runs.push_back(run);\n}}\n\n",
            t = first.output_type(),
            par = first.par_macro()
        ));
    } else {
        body.push_str(
            "// compute kernel drives the generator\n\
             const unsigned int max_key = argc > 3 ? std::stoul(argv[3]) : 1024;\n\
             auto compute = xrt::kernel(device, uuid, \"compute\");\n\
             xrt::run compute_run(compute);\ncompute_run.set_arg(0, (uint64_t)size);\n\
             compute_run.set_arg(1, max_key);\n\n",
        );
    }

    let mut collect = String::new();
    if last.kind == OperatorKind::MemoryWriter {
        body.push_str(&format!(
            "// memory writers\n\
             const int out_lines = (size * {in_par} * sizeof({t}) + sizeof(line_t) - 1) / sizeof(line_t);\n\
             std::vector<xrt::bo> outputs, written, eos;\n\
             for (int r = 0; r < {par}; ++r) {{\n    \
             auto kernel = xrt::kernel(device, uuid, \"memory_writer:{{memory_writer_\" + std::to_string(r + 1) + \"}}\");\n    \
             outputs.push_back(xrt::bo(device, out_lines * sizeof(line_t), {bo_flags}, kernel.group_id(1)));\n    \
             written.push_back(xrt::bo(device, sizeof(int), kernel.group_id(3)));\n    \
             eos.push_back(xrt::bo(device, sizeof(int), kernel.group_id(4)));\n    \
             int zero = 0;\n    eos.back().write(&zero);\n    eos.back().sync(XCL_BO_SYNC_BO_TO_DEVICE);\n\n    \
             xrt::run run(kernel);\n    run.set_arg(1, outputs.back());\n    run.set_arg(2, out_lines);\n    \
             run.set_arg(3, written.back());\n    run.set_arg(4, eos.back());\n    runs.push_back(run);\n}}\n\n",
            t = last.output_type(),
            par = last.par_macro(),
            in_par = first.par_macro()
        ));
        collect.push_str(&format!(
            "long received = 0;\nfor (int r = 0; r < {par}; ++r) {{\n    \
             int items = 0;\n    written[r].sync(XCL_BO_SYNC_BO_FROM_DEVICE);\n    written[r].read(&items);\n    \
             outputs[r].sync(XCL_BO_SYNC_BO_FROM_DEVICE);\n    received += items;\n}}\n\
             std::cout << \"received \" << received << \" tuples\" << std::endl;\n",
            par = last.par_macro()
        ));
    }

    body.push_str("for (auto & run : runs) {\n    run.start();\n}\n");
    if first.kind == OperatorKind::Generator {
        body.push_str("compute_run.start();\ncompute_run.wait();\n");
    }
    body.push_str("for (auto & run : runs) {\n    run.wait();\n}\n\n");
    body.push_str(&collect);
    body.push_str("\nreturn 0;\n");

    Ok(format!(
        "#include <iostream>\n#include <string>\n#include <vector>\n\n\
         #include <ap_int.h>\n#include <xrt/xrt_bo.h>\n#include <xrt/xrt_device.h>\n#include <xrt/xrt_kernel.h>\n\n\
         #include \"../common/constants.hpp\"\n{includes}\n\
         static constexpr int BUS_WIDTH = 512;\nusing line_t = ap_uint<BUS_WIDTH>;\n\n\
         int main(int argc, char * argv[])\n{{\n{}}}\n",
        indent(&body, 4)
    ))
}

fn makefile(p: &Pipeline) -> String {
    let name = p.name();
    let mut kernels = Vec::new();
    let mut connectivity = String::new();

    if let Some(mr) = p.memory_reader() {
        kernels.push("memory_reader");
        connectivity.push_str(&format!("\t\t--connectivity.nk memory_reader:{} \\\n", mr.parallelism));
        for r in 0..mr.parallelism {
            connectivity.push_str(&format!(
                "\t\t--connectivity.sc memory_reader_{}.out:compute_1.in_{} \\\n",
                r + 1,
                r
            ));
        }
    }
    kernels.push("compute");
    if let Some(mw) = p.memory_writer() {
        kernels.push("memory_writer");
        connectivity.push_str(&format!("\t\t--connectivity.nk memory_writer:{} \\\n", mw.parallelism));
        for r in 0..mw.parallelism {
            connectivity.push_str(&format!(
                "\t\t--connectivity.sc compute_1.out_{}:memory_writer_{}.in \\\n",
                r,
                r + 1
            ));
        }
    }

    format!(
        "# Build rules for pipeline '{name}'\n\n\
         TARGET   ?= hw\nPLATFORM ?= xilinx_u280_gen3x16_xdma_1_202211_1\nVPP      ?= v++\nCXX      ?= g++\n\n\
         APP      := {name}\nKERNELS  := {kernels}\n\
         XOS      := $(addprefix build/,$(addsuffix .$(TARGET).xo,$(KERNELS)))\n\
         XCLBIN   := build/$(APP).$(TARGET).xclbin\n\n\
         VPPFLAGS += -t $(TARGET) --platform $(PLATFORM) -I. -Idevice -Idevice/includes\n\
         CXXFLAGS += -std=c++17 -O2 -I. -Icommon -I$(XILINX_XRT)/include -I$(XILINX_HLS)/include\n\
         LDFLAGS  += -L$(XILINX_XRT)/lib -lxrt_coreutil -pthread\n\n\
         .PHONY: all host xclbin clean\n\n\
         all: host xclbin\n\n\
         host: host/host.cpp\n\t$(CXX) $(CXXFLAGS) host/host.cpp -o $(APP) $(LDFLAGS)\n\n\
         xclbin: $(XCLBIN)\n\n\
         build/%.$(TARGET).xo: device/%.cpp\n\tmkdir -p build\n\t$(VPP) $(VPPFLAGS) -c -k $* $< -o $@\n\n\
         $(XCLBIN): $(XOS)\n\t$(VPP) $(VPPFLAGS) -l $(XOS) \\\n{connectivity}\t\t-o $@\n\n\
         clean:\n\trm -rf build $(APP)\n",
        kernels = kernels.join(" ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::spike_detection;
    use crate::policy::Target;
    use pretty_assertions::assert_eq;

    fn resolved() -> Pipeline {
        let mut p = spike_detection(Target::Xilinx);
        p.finalize().unwrap();
        p
    }

    #[test]
    fn test_tuple_header() {
        assert_eq!(
            tuple_hpp("tuple_t"),
            "#ifndef __TUPLE_T_HPP__\n#define __TUPLE_T_HPP__\n\n#include \"constants.hpp\"\n\n\
             struct tuple_t {\n    unsigned int key;\n    float value;\n\n    \
             bool operator==(const tuple_t & other) const {\n        \
             return key == other.key && value == other.value;\n    }\n};\n\n#endif // __TUPLE_T_HPP__\n"
        );
    }

    #[test]
    fn test_defines_streams() {
        let text = defines_hpp(&resolved());
        assert!(text.contains("#include \"common/input_t.hpp\"\n#include \"common/tuple_t.hpp\"\n"));
        assert!(text.contains("using mr_axis_stream_t = fx::axis_stream<input_t, 16>;"));
        assert!(text.contains("using mw_axis_stream_t = fx::axis_stream<tuple_t, 16>;"));
        assert!(text.contains("using stream_tuple_t = fx::stream<tuple_t, 16>;"));
    }

    #[test]
    fn test_map_functor_with_state() {
        let mut p = spike_detection(Target::Xilinx);
        p.operator_mut("average_calculator")
            .unwrap()
            .add_private_buffer("unsigned int", "sizes", &[64], None, false, None)
            .unwrap();
        p.finalize().unwrap();
        let text = operator_hpp(&p.nodes()[1]);
        assert!(text.starts_with("#include \"common/constants.hpp\"\n#include \"common/input_t.hpp\"\n#include \"common/tuple_t.hpp\"\n"));
        assert!(text.contains("struct average_calculator\n{\n    unsigned int sizes[64];\n    average_calculator() = default;\n"));
        assert!(text.contains("    void operator()(input_t in, tuple_t & out)\n"));
    }

    #[test]
    fn test_filter_functor() {
        let text = operator_hpp(&resolved().nodes()[2]);
        assert!(text.contains("void operator()(tuple_t in, tuple_t & out, bool & keep)"));
    }

    #[test]
    fn test_compute_wiring() {
        let text = compute_cpp(&resolved()).unwrap();
        assert!(text.contains("void compute(\n    mr_axis_stream_t in[MR_PAR],\n    mw_axis_stream_t out[MW_PAR]\n)"));
        assert!(text.contains("#include \"nodes/average_calculator.hpp\"\n#include \"nodes/spike_detector.hpp\"\n"));
        assert!(!text.contains("nodes/mr.hpp"));
        assert!(text.contains(
            "fx::A2A::Operator<fx::A2A::Operator_t::FILTER, spike_detector, fx::A2A::Policy_t::LB, \
             fx::A2A::Policy_t::LB, AVERAGE_CALCULATOR_PAR, SPIKE_DETECTOR_PAR, MW_PAR>(\n        \
             average_calculator_spike_detector, spike_detector_mw\n    );"
        ));
        assert!(text.contains("        spike_detector_mw, out\n    );"));
    }

    #[test]
    fn test_makefile_connectivity() {
        let text = makefile(&resolved());
        assert!(text.contains("KERNELS  := memory_reader compute memory_writer\n"));
        assert!(text.contains("--connectivity.nk memory_reader:2"));
        assert!(text.contains("--connectivity.sc compute_1.out_1:memory_writer_2.in"));
    }
}
