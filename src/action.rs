//! Fault-injection actions and the action universe derived from an architecture.

use std::fmt;
use std::str::FromStr;

use crate::{Architecture, Error, Operation, Result};

/// Operation names that never become actions or states.
pub const EXCLUDED_OPERATIONS: [&str; 2] = ["a1", "a2"];

/// Whether `name` is eligible for fault injection.
pub fn is_eligible(name: &str) -> bool {
    !EXCLUDED_OPERATIONS.contains(&name)
}

/// Kind of fault injected into an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum FaultType {
    Abort,
    Delay,
}

impl FaultType {
    /// Canonical order; the action universe enumerates faults in this order.
    pub const ALL: [FaultType; 2] = [FaultType::Abort, FaultType::Delay];

    pub fn as_str(self) -> &'static str {
        match self {
            FaultType::Abort => "abort",
            FaultType::Delay => "delay",
        }
    }

    /// Numeric indicator used as a classifier feature.
    pub fn indicator(self) -> f64 {
        match self {
            FaultType::Abort => 0.0,
            FaultType::Delay => 1.0,
        }
    }
}

impl fmt::Display for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "abort" => Ok(FaultType::Abort),
            "delay" => Ok(FaultType::Delay),
            other => Err(Error::MalformedAction(other.to_string())),
        }
    }
}

/// A fault type applied to one operation, rendered `<operation>-<fault>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActionId {
    pub operation: String,
    pub fault: FaultType,
}

impl ActionId {
    pub fn new(operation: impl Into<String>, fault: FaultType) -> Self {
        Self {
            operation: operation.into(),
            fault,
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.operation, self.fault)
    }
}

impl FromStr for ActionId {
    type Err = Error;

    /// Splits at the last `-`, so operation names may themselves contain dashes.
    fn from_str(s: &str) -> Result<Self> {
        let malformed = || Error::MalformedAction(s.to_string());
        let (operation, fault) = s.rsplit_once('-').ok_or_else(malformed)?;
        if operation.is_empty() {
            return Err(malformed());
        }
        let fault = fault.parse::<FaultType>().map_err(|_| malformed())?;
        Ok(Self::new(operation, fault))
    }
}

/// Snapshot of everything a policy needs from the architecture.
///
/// Captured once at construction so `reset` never has to consult the
/// architecture again.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSpace {
    operations: Vec<Operation>,
    actions: Vec<ActionId>,
    // (operation, eligible incoming-dependency names), operations without any omitted.
    dependency_states: Vec<(String, Vec<String>)>,
}

impl ActionSpace {
    /// Derive the action universe from `arch`.
    ///
    /// Fails with [`Error::EmptyActionSpace`] when no eligible operation exists.
    pub fn from_architecture<A: Architecture + ?Sized>(arch: &A) -> Result<Self> {
        let operations: Vec<Operation> = arch
            .operations()
            .into_iter()
            .filter(|op| is_eligible(&op.name))
            .collect();
        if operations.is_empty() {
            return Err(Error::EmptyActionSpace);
        }

        let actions = operations
            .iter()
            .flat_map(|op| FaultType::ALL.map(|f| ActionId::new(op.name.clone(), f)))
            .collect();

        let dependency_states = operations
            .iter()
            .filter_map(|op| {
                let mut deps: Vec<String> = Vec::new();
                for name in arch.incoming_dependencies(op).into_iter().map(|d| d.name) {
                    // One entry per dependency, even when it is listed twice.
                    if is_eligible(&name) && !deps.contains(&name) {
                        deps.push(name);
                    }
                }
                (!deps.is_empty()).then(|| (op.name.clone(), deps))
            })
            .collect();

        Ok(Self {
            operations,
            actions,
            dependency_states,
        })
    }

    /// Eligible operations, in architecture order.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// The flat action universe: every eligible operation × every fault type.
    pub fn actions(&self) -> &[ActionId] {
        &self.actions
    }

    pub fn contains(&self, action: &ActionId) -> bool {
        self.actions.contains(action)
    }

    /// Operations that have at least one eligible incoming dependency, paired
    /// with those dependency names.
    pub fn dependency_states(&self) -> &[(String, Vec<String>)] {
        &self.dependency_states
    }

    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.operations.iter().find(|op| op.name == name)
    }
}
