//! The architecture model a policy reads its action universe from.
//!
//! The model itself (parsing, service topology, instance bookkeeping) lives
//! outside this crate; policies only need the two queries on [`Architecture`].
//! [`StaticArchitecture`] is a small in-memory implementation for callers that
//! assemble the model in code, and for tests.

use std::collections::BTreeMap;

use crate::{Error, Result};

/// One operation exposed by a service.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Operation {
    /// Unique operation name.
    pub name: String,
    /// Whether the operation sits behind a circuit breaker.
    #[cfg_attr(feature = "serde", serde(default))]
    pub circuit_breaker: bool,
    /// Names of the operations this one depends on.
    #[cfg_attr(feature = "serde", serde(default))]
    pub dependencies: Vec<String>,
    /// Instance count of the owning service.
    #[cfg_attr(feature = "serde", serde(default = "one"))]
    pub service_instances: u32,
}

#[cfg(feature = "serde")]
fn one() -> u32 {
    1
}

impl Operation {
    /// An operation with no dependencies, no circuit breaker and one instance.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            circuit_breaker: false,
            dependencies: Vec::new(),
            service_instances: 1,
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_circuit_breaker(mut self, present: bool) -> Self {
        self.circuit_breaker = present;
        self
    }

    pub fn with_service_instances(mut self, instances: u32) -> Self {
        self.service_instances = instances;
        self
    }
}

/// Read-only view of a modeled service architecture.
///
/// `operations` must return the same order for the duration of a policy
/// construction; the order becomes the action-universe order.
pub trait Architecture {
    fn operations(&self) -> Vec<Operation>;

    /// Operations `operation` receives dependency edges from.
    fn incoming_dependencies(&self, operation: &Operation) -> Vec<Operation>;
}

/// In-memory architecture: incoming dependencies of an operation are the
/// operations named in its `dependencies` list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "Vec<Operation>", into = "Vec<Operation>"))]
pub struct StaticArchitecture {
    operations: Vec<Operation>,
    index: BTreeMap<String, usize>,
}

impl StaticArchitecture {
    /// Build from a list of operations.
    ///
    /// Names must be unique and every dependency must name a listed operation.
    pub fn new(operations: Vec<Operation>) -> Result<Self> {
        let mut index = BTreeMap::new();
        for (i, op) in operations.iter().enumerate() {
            if index.insert(op.name.clone(), i).is_some() {
                return Err(Error::DuplicateOperation(op.name.clone()));
            }
        }
        for op in &operations {
            if let Some(dep) = op.dependencies.iter().find(|d| !index.contains_key(*d)) {
                return Err(Error::UnknownDependency {
                    operation: op.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        Ok(Self { operations, index })
    }

    pub fn get(&self, name: &str) -> Option<&Operation> {
        self.index.get(name).map(|&i| &self.operations[i])
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl TryFrom<Vec<Operation>> for StaticArchitecture {
    type Error = Error;

    fn try_from(operations: Vec<Operation>) -> Result<Self> {
        Self::new(operations)
    }
}

impl From<StaticArchitecture> for Vec<Operation> {
    fn from(arch: StaticArchitecture) -> Self {
        arch.operations
    }
}

impl Architecture for StaticArchitecture {
    fn operations(&self) -> Vec<Operation> {
        self.operations.clone()
    }

    fn incoming_dependencies(&self, operation: &Operation) -> Vec<Operation> {
        operation
            .dependencies
            .iter()
            .filter_map(|d| self.get(d).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_names() {
        let err = StaticArchitecture::new(vec![Operation::new("x"), Operation::new("x")]);
        assert_eq!(err, Err(Error::DuplicateOperation("x".to_string())));
    }

    #[test]
    fn rejects_dangling_dependency() {
        let err = StaticArchitecture::new(vec![Operation::new("x").with_dependencies(["y"])]);
        assert!(matches!(err, Err(Error::UnknownDependency { .. })));
    }

    #[test]
    fn incoming_dependencies_resolve_by_name() {
        let arch = StaticArchitecture::new(vec![
            Operation::new("db"),
            Operation::new("api").with_dependencies(["db"]),
        ])
        .unwrap();
        let api = arch.get("api").unwrap().clone();
        let inc = arch.incoming_dependencies(&api);
        assert_eq!(inc.len(), 1);
        assert_eq!(inc[0].name, "db");
        assert!(arch.incoming_dependencies(arch.get("db").unwrap()).is_empty());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn loads_from_json_and_validates() {
        let arch: StaticArchitecture = serde_json::from_str(
            r#"[
                {"name": "db", "service_instances": 3},
                {"name": "api", "circuit_breaker": true, "dependencies": ["db"]}
            ]"#,
        )
        .unwrap();
        assert_eq!(arch.len(), 2);
        assert_eq!(arch.get("db").unwrap().service_instances, 3);
        assert_eq!(arch.get("api").unwrap().service_instances, 1);

        let bad = serde_json::from_str::<StaticArchitecture>(
            r#"[{"name": "api", "dependencies": ["nope"]}]"#,
        );
        assert!(bad.is_err());
    }
}
