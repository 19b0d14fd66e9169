//! Compatibility with the first-generation naming
//!
//! Older pipeline descriptions use SOURCE/SINK/COLLECTOR kinds,
//! BLOCKING/NON_BLOCKING gathering and RR_BLOCKING/RR_NON_BLOCKING/KEYBY/
//! BROADCAST dispatching. These map one-to-one onto the canonical model,
//! except the placeholder `NONE` kind which has no counterpart.

use std::fmt;
use std::str::FromStr;

use crate::error::{CodegenError, CodegenResult};
use crate::operator::Operator;
use crate::policy::{DispatchPolicy, GatherPolicy, OperatorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegacyNodeKind {
    None,
    Source,
    Filter,
    Map,
    FlatMap,
    Sink,
    Generator,
    Collector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegacyGatherMode {
    None,
    Blocking,
    NonBlocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegacyDispatchMode {
    None,
    RrBlocking,
    RrNonBlocking,
    Keyby,
    Broadcast,
}

impl TryFrom<LegacyNodeKind> for OperatorKind {
    type Error = CodegenError;

    fn try_from(kind: LegacyNodeKind) -> CodegenResult<Self> {
        Ok(match kind {
            LegacyNodeKind::None => {
                return Err(CodegenError::configuration(
                    "legacy operator kind NONE has no equivalent",
                ))
            }
            LegacyNodeKind::Source => OperatorKind::MemoryReader,
            LegacyNodeKind::Filter => OperatorKind::Filter,
            LegacyNodeKind::Map => OperatorKind::Map,
            LegacyNodeKind::FlatMap => OperatorKind::FlatMap,
            LegacyNodeKind::Sink => OperatorKind::MemoryWriter,
            LegacyNodeKind::Generator => OperatorKind::Generator,
            LegacyNodeKind::Collector => OperatorKind::Drainer,
        })
    }
}

impl From<LegacyGatherMode> for GatherPolicy {
    fn from(mode: LegacyGatherMode) -> Self {
        match mode {
            LegacyGatherMode::None => GatherPolicy::None,
            LegacyGatherMode::Blocking => GatherPolicy::RR,
            LegacyGatherMode::NonBlocking => GatherPolicy::LB,
        }
    }
}

impl From<LegacyDispatchMode> for DispatchPolicy {
    fn from(mode: LegacyDispatchMode) -> Self {
        match mode {
            LegacyDispatchMode::None => DispatchPolicy::None,
            LegacyDispatchMode::RrBlocking => DispatchPolicy::RR,
            LegacyDispatchMode::RrNonBlocking => DispatchPolicy::LB,
            LegacyDispatchMode::Keyby => DispatchPolicy::KB,
            LegacyDispatchMode::Broadcast => DispatchPolicy::BR,
        }
    }
}

fn unknown(what: &str, s: &str) -> CodegenError {
    CodegenError::configuration(format!("unknown legacy {} '{}'", what, s))
}

impl FromStr for LegacyNodeKind {
    type Err = CodegenError;

    fn from_str(s: &str) -> CodegenResult<Self> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "NONE" => LegacyNodeKind::None,
            "SOURCE" => LegacyNodeKind::Source,
            "FILTER" => LegacyNodeKind::Filter,
            "MAP" => LegacyNodeKind::Map,
            "FLAT_MAP" => LegacyNodeKind::FlatMap,
            "SINK" => LegacyNodeKind::Sink,
            "GENERATOR" => LegacyNodeKind::Generator,
            "COLLECTOR" => LegacyNodeKind::Collector,
            _ => return Err(unknown("operator kind", s)),
        })
    }
}

impl FromStr for LegacyGatherMode {
    type Err = CodegenError;

    fn from_str(s: &str) -> CodegenResult<Self> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "NONE" => LegacyGatherMode::None,
            "BLOCKING" => LegacyGatherMode::Blocking,
            "NON_BLOCKING" => LegacyGatherMode::NonBlocking,
            _ => return Err(unknown("gather mode", s)),
        })
    }
}

impl FromStr for LegacyDispatchMode {
    type Err = CodegenError;

    fn from_str(s: &str) -> CodegenResult<Self> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "NONE" => LegacyDispatchMode::None,
            "RR_BLOCKING" => LegacyDispatchMode::RrBlocking,
            "RR_NON_BLOCKING" => LegacyDispatchMode::RrNonBlocking,
            "KEYBY" => LegacyDispatchMode::Keyby,
            "BROADCAST" => LegacyDispatchMode::Broadcast,
            _ => return Err(unknown("dispatch mode", s)),
        })
    }
}

impl fmt::Display for LegacyNodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LegacyNodeKind::None => "NONE",
            LegacyNodeKind::Source => "SOURCE",
            LegacyNodeKind::Filter => "FILTER",
            LegacyNodeKind::Map => "MAP",
            LegacyNodeKind::FlatMap => "FLAT_MAP",
            LegacyNodeKind::Sink => "SINK",
            LegacyNodeKind::Generator => "GENERATOR",
            LegacyNodeKind::Collector => "COLLECTOR",
        };
        write!(f, "{}", name)
    }
}

impl Operator {
    /// Build an operator from first-generation names
    pub fn from_legacy(
        name: &str,
        parallelism: usize,
        kind: LegacyNodeKind,
        gather: LegacyGatherMode,
        dispatch: LegacyDispatchMode,
    ) -> CodegenResult<Self> {
        Operator::new(name, parallelism, kind.try_into()?, gather.into(), dispatch.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(OperatorKind::try_from(LegacyNodeKind::Source).unwrap(), OperatorKind::MemoryReader);
        assert_eq!(OperatorKind::try_from(LegacyNodeKind::Sink).unwrap(), OperatorKind::MemoryWriter);
        assert_eq!(OperatorKind::try_from(LegacyNodeKind::Collector).unwrap(), OperatorKind::Drainer);
        assert!(matches!(
            OperatorKind::try_from(LegacyNodeKind::None),
            Err(CodegenError::Configuration { .. })
        ));
    }

    #[test]
    fn test_policy_mapping() {
        assert_eq!(GatherPolicy::from(LegacyGatherMode::Blocking), GatherPolicy::RR);
        assert_eq!(GatherPolicy::from(LegacyGatherMode::NonBlocking), GatherPolicy::LB);
        assert_eq!(DispatchPolicy::from(LegacyDispatchMode::RrNonBlocking), DispatchPolicy::LB);
        assert_eq!(DispatchPolicy::from(LegacyDispatchMode::Keyby), DispatchPolicy::KB);
        assert_eq!(DispatchPolicy::from(LegacyDispatchMode::Broadcast), DispatchPolicy::BR);
    }

    #[test]
    fn test_parse_legacy_names() {
        assert_eq!("flat_map".parse::<LegacyNodeKind>().unwrap(), LegacyNodeKind::FlatMap);
        assert_eq!("NON_BLOCKING".parse::<LegacyGatherMode>().unwrap(), LegacyGatherMode::NonBlocking);
        assert_eq!("rr_blocking".parse::<LegacyDispatchMode>().unwrap(), LegacyDispatchMode::RrBlocking);
        assert!("SHUFFLE".parse::<LegacyDispatchMode>().is_err());
        assert_eq!(LegacyNodeKind::Collector.to_string(), "COLLECTOR");
    }

    #[test]
    fn test_operator_from_legacy() {
        let op = Operator::from_legacy(
            "src",
            2,
            LegacyNodeKind::Source,
            LegacyGatherMode::None,
            LegacyDispatchMode::Keyby,
        )
        .unwrap();
        assert_eq!(op.kind, OperatorKind::MemoryReader);
        assert_eq!(op.dispatch_policy, DispatchPolicy::KB);

        // the canonical checks still apply
        assert!(Operator::from_legacy(
            "src",
            1,
            LegacyNodeKind::Source,
            LegacyGatherMode::Blocking,
            LegacyDispatchMode::RrBlocking,
        )
        .is_err());
    }
}
