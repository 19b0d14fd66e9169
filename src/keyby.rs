//! Key-extraction lambdas for key-partitioned edges

use serde::Serialize;

use crate::operator::Operator;
use crate::policy::DispatchPolicy;

/// Lambda computing the partition key of tuples crossing one edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyByLambda {
    pub name: String,
    pub upstream: String,
    pub downstream: String,
    /// Type of the tuples leaving the upstream operator
    pub datatype: String,
}

impl KeyByLambda {
    pub fn name_for(upstream: &str, downstream: &str) -> String {
        format!("{}_{}_keyby", upstream, downstream)
    }

    pub fn definition(&self) -> String {
        format!(
            "auto {} = [](const {} & r) {{\n    return (int)(r.key);\n}};\n",
            self.name, self.datatype
        )
    }
}

/// One lambda per adjacent pair whose upstream operator dispatches by key
pub fn derive_keyby_lambdas(nodes: &[Operator]) -> Vec<KeyByLambda> {
    nodes
        .windows(2)
        .filter(|pair| pair[0].dispatch_policy == DispatchPolicy::KB)
        .map(|pair| KeyByLambda {
            name: KeyByLambda::name_for(&pair[0].name, &pair[1].name),
            upstream: pair[0].name.clone(),
            downstream: pair[1].name.clone(),
            datatype: pair[0].output_type().to_string(),
        })
        .collect()
}
