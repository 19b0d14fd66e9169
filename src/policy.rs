//! Communication policies and operator kinds
//!
//! Policy values are carried as opaque data into the generated artifacts;
//! the generator only checks their structural legality.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CodegenError, CodegenResult};

/// How a downstream replica merges the streams of its upstream replicas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GatherPolicy {
    /// Nothing upstream (ingress only)
    #[serde(alias = "none")]
    None,
    /// Round-robin turn taking
    #[serde(alias = "rr", alias = "BLOCKING", alias = "blocking")]
    RR,
    /// Load-balanced, non-blocking poll across inputs
    #[serde(alias = "lb", alias = "NON_BLOCKING", alias = "non_blocking")]
    LB,
    /// Key-partitioned routing
    #[serde(alias = "kb")]
    KB,
}

impl GatherPolicy {
    /// Short name used by the HLS policy templates
    pub fn short_name(&self) -> &'static str {
        match self {
            GatherPolicy::None => "NONE",
            GatherPolicy::RR => "RR",
            GatherPolicy::LB => "LB",
            GatherPolicy::KB => "KB",
        }
    }
}

/// How an upstream replica fans its output over the downstream replicas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DispatchPolicy {
    /// Nothing downstream (egress only)
    #[serde(alias = "none")]
    None,
    /// Round-robin
    #[serde(alias = "rr", alias = "RR_BLOCKING", alias = "rr_blocking")]
    RR,
    /// Load-balanced
    #[serde(alias = "lb", alias = "RR_NON_BLOCKING", alias = "rr_non_blocking")]
    LB,
    /// Key-based partitioning
    #[serde(alias = "kb", alias = "KEYBY", alias = "keyby")]
    KB,
    /// Broadcast to every downstream replica
    #[serde(alias = "br", alias = "BROADCAST", alias = "broadcast")]
    BR,
}

impl DispatchPolicy {
    pub fn short_name(&self) -> &'static str {
        match self {
            DispatchPolicy::None => "NONE",
            DispatchPolicy::RR => "RR",
            DispatchPolicy::LB => "LB",
            DispatchPolicy::KB => "KB",
            DispatchPolicy::BR => "BR",
        }
    }
}

/// Operator kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    #[serde(alias = "MEMORY_READER", alias = "source", alias = "SOURCE")]
    MemoryReader,
    #[serde(alias = "GENERATOR")]
    Generator,
    #[serde(alias = "MAP")]
    Map,
    #[serde(alias = "FILTER")]
    Filter,
    #[serde(alias = "FLAT_MAP")]
    FlatMap,
    #[serde(alias = "MEMORY_WRITER", alias = "sink", alias = "SINK")]
    MemoryWriter,
    #[serde(alias = "DRAINER", alias = "collector", alias = "COLLECTOR")]
    Drainer,
}

impl OperatorKind {
    /// Kinds that sit at the head of the pipeline
    pub fn is_ingress(&self) -> bool {
        matches!(self, OperatorKind::MemoryReader | OperatorKind::Generator)
    }

    /// Kinds that sit at the tail of the pipeline
    pub fn is_egress(&self) -> bool {
        matches!(self, OperatorKind::MemoryWriter | OperatorKind::Drainer)
    }

    /// Kinds whose compute function is opt-in rather than implied
    pub fn compute_is_optional(&self) -> bool {
        matches!(
            self,
            OperatorKind::MemoryReader | OperatorKind::MemoryWriter | OperatorKind::Drainer
        )
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperatorKind::MemoryReader => "memory_reader",
            OperatorKind::Generator => "generator",
            OperatorKind::Map => "map",
            OperatorKind::Filter => "filter",
            OperatorKind::FlatMap => "flat_map",
            OperatorKind::MemoryWriter => "memory_writer",
            OperatorKind::Drainer => "drainer",
        };
        write!(f, "{}", name)
    }
}

/// Target backend family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    #[serde(alias = "INTEL")]
    Intel,
    #[serde(alias = "XILINX")]
    Xilinx,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Intel => write!(f, "intel"),
            Target::Xilinx => write!(f, "xilinx"),
        }
    }
}

impl FromStr for Target {
    type Err = CodegenError;

    fn from_str(s: &str) -> CodegenResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "intel" => Ok(Target::Intel),
            "xilinx" => Ok(Target::Xilinx),
            other => Err(CodegenError::configuration(format!(
                "target '{}' not supported",
                other
            ))),
        }
    }
}

/// Host/device data transfer mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Explicit copies between host and device memory
    #[default]
    #[serde(alias = "COPY")]
    Copy,
    /// Shared virtual memory (Intel)
    #[serde(alias = "SHARED")]
    Shared,
    /// Host-resident buffers accessed by the device (Xilinx)
    #[serde(alias = "HOST")]
    Host,
}

impl TransferMode {
    /// Whether `target` can generate code for this transfer mode
    pub fn is_supported_by(&self, target: Target) -> bool {
        match target {
            Target::Intel => matches!(self, TransferMode::Copy | TransferMode::Shared),
            Target::Xilinx => matches!(self, TransferMode::Copy | TransferMode::Host),
        }
    }

    /// Macro value used by host templates
    pub fn macro_name(&self) -> &'static str {
        match self {
            TransferMode::Copy => "COPY",
            TransferMode::Shared => "SHARED",
            TransferMode::Host => "HOST",
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.macro_name().to_ascii_lowercase())
    }
}

impl FromStr for TransferMode {
    type Err = CodegenError;

    fn from_str(s: &str) -> CodegenResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "copy" => Ok(TransferMode::Copy),
            "shared" => Ok(TransferMode::Shared),
            "host" => Ok(TransferMode::Host),
            other => Err(CodegenError::configuration(format!(
                "transfer mode '{}' not supported",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_mode_legality() {
        assert!(TransferMode::Shared.is_supported_by(Target::Intel));
        assert!(!TransferMode::Shared.is_supported_by(Target::Xilinx));
        assert!(TransferMode::Host.is_supported_by(Target::Xilinx));
        assert!(!TransferMode::Host.is_supported_by(Target::Intel));
        assert!(TransferMode::Copy.is_supported_by(Target::Intel));
        assert!(TransferMode::Copy.is_supported_by(Target::Xilinx));
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!("XILINX".parse::<Target>().unwrap(), Target::Xilinx);
        assert_eq!("intel".parse::<Target>().unwrap(), Target::Intel);
        assert!(matches!(
            "altera".parse::<Target>(),
            Err(CodegenError::Configuration { .. })
        ));
    }

    #[test]
    fn test_policies_accept_legacy_aliases() {
        let gather: GatherPolicy = serde_json::from_str("\"NON_BLOCKING\"").unwrap();
        assert_eq!(gather, GatherPolicy::LB);
        let dispatch: DispatchPolicy = serde_json::from_str("\"KEYBY\"").unwrap();
        assert_eq!(dispatch, DispatchPolicy::KB);
        let kind: OperatorKind = serde_json::from_str("\"SOURCE\"").unwrap();
        assert_eq!(kind, OperatorKind::MemoryReader);
        let kind: OperatorKind = serde_json::from_str("\"flat_map\"").unwrap();
        assert_eq!(kind, OperatorKind::FlatMap);
    }
}
