//! Channels between adjacent operators
//!
//! Channels are derived by `Pipeline::finalize()` and never built by users.
//! The text helpers emit Intel channel-extension calls; replica dimensions
//! only appear on the sides with more than one replica.

use serde::Serialize;

use crate::operator::Operator;
use crate::policy::DispatchPolicy;

/// Directed link between two adjacent operators
#[derive(Debug, Clone, Serialize)]
pub struct Channel {
    /// Index of the upstream operator in the resolved node list
    pub upstream: usize,
    /// Index of the downstream operator in the resolved node list
    pub downstream: usize,
    pub name: String,
    pub tuple_type: String,
    /// Datatype carried by the tuples (upstream output type)
    pub datatype: String,
    pub depth: usize,
    /// Parallelism of the upstream operator
    pub input_degree: usize,
    /// Parallelism of the downstream operator
    pub output_degree: usize,
}

impl Channel {
    pub fn new(upstream: usize, up: &Operator, downstream: usize, down: &Operator) -> Self {
        let name = format!("{}_{}", up.name, down.name);
        Self {
            upstream,
            downstream,
            tuple_type: format!("{}_t", name),
            datatype: up.output_type().to_string(),
            depth: up.channel_depth,
            input_degree: up.parallelism,
            output_degree: down.parallelism,
            name,
        }
    }

    pub fn channel_name(&self) -> String {
        format!("{}_ch", self.name)
    }

    pub fn declare(&self) -> String {
        let mut d = format!("channel {} {}", self.tuple_type, self.channel_name());
        if self.input_degree > 1 {
            d.push_str(&format!("[{}]", self.input_degree));
        }
        if self.output_degree > 1 {
            d.push_str(&format!("[{}]", self.output_degree));
        }
        if self.depth > 0 {
            d.push_str(&format!(" __attribute__((depth({})))", self.depth));
        }
        d
    }

    /// Channel reference between upstream replica `i` and downstream replica `j`
    pub fn use_at(&self, i: &str, j: &str) -> String {
        let mut u = self.channel_name();
        if self.input_degree > 1 {
            u.push_str(&format!("[{}]", i));
        }
        if self.output_degree > 1 {
            u.push_str(&format!("[{}]", j));
        }
        u
    }

    pub fn read(&self, i: &str, j: &str) -> String {
        format!("read_channel_intel({})", self.use_at(i, j))
    }

    pub fn read_nb(&self, i: &str, j: &str, valid: &str) -> String {
        format!("read_channel_nb_intel({}, &{})", self.use_at(i, j), valid)
    }

    pub fn write(&self, i: &str, j: &str, value: &str) -> String {
        format!("write_channel_intel({}, {})", self.use_at(i, j), value)
    }

    pub fn write_nb(&self, i: &str, j: &str, value: &str) -> String {
        format!("write_channel_nb_intel({}, {})", self.use_at(i, j), value)
    }

    /// Code sending `tuple` from replica `idx` of the upstream operator.
    ///
    /// `w` names the round-robin cursor variable declared by the kernel.
    /// When `last` is set the tuple is the end-of-stream marker and is
    /// delivered to every downstream replica regardless of policy.
    pub fn dispatch_tuple(&self, policy: DispatchPolicy, idx: &str, w: &str, tuple: &str, last: bool) -> String {
        let down = self.output_degree;
        if down == 1 {
            return format!("{};\n", self.write(idx, "0", tuple));
        }
        if last || policy == DispatchPolicy::BR {
            return format!(
                "#pragma unroll\nfor (uint j = 0; j < {down}; ++j) {{\n    {};\n}}\n",
                self.write(idx, "j", tuple),
            );
        }
        match policy {
            DispatchPolicy::KB => format!(
                "{w} = {datatype}_getKey({tuple}.data) % {down};\n{};\n",
                self.write(idx, w, tuple),
                datatype = self.datatype,
            ),
            DispatchPolicy::LB => format!(
                "while (!{}) {{\n    {w} = ({w} + 1) % {down};\n}}\n{w} = ({w} + 1) % {down};\n",
                self.write_nb(idx, w, tuple),
            ),
            _ => format!("{};\n{w} = ({w} + 1) % {down};\n", self.write(idx, w, tuple)),
        }
    }
}
