use thiserror::Error;

/// Errors produced while building or driving a policy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("architecture has no eligible operations")]
    EmptyActionSpace,

    #[error("no eligible operation has an incoming dependency")]
    EmptyStateSpace,

    #[error("{policy} expects {expected} parameters, got {got}")]
    ParameterArity {
        policy: &'static str,
        expected: &'static str,
        got: usize,
    },

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("unknown policy: {0}")]
    UnknownPolicy(String),

    #[error("duplicate operation: {0}")]
    DuplicateOperation(String),

    #[error("operation `{operation}` depends on unknown operation `{dependency}`")]
    UnknownDependency {
        operation: String,
        dependency: String,
    },

    #[error("malformed action id '{0}': expected <operation>-<abort|delay>")]
    MalformedAction(String),

    #[error("feedback called with no pending proposal")]
    NoPendingProposal,

    #[error("proposal {0} is still awaiting feedback")]
    ProposalPending(String),

    #[error("outcome must be finite, got {0}")]
    NonFiniteOutcome(f64),

    #[error("batch is incompatible with the fitted classifier: {0}")]
    IncompatibleBatch(String),

    #[error("cannot train on an empty batch")]
    EmptyBatch,
}

pub type Result<T> = std::result::Result<T, Error>;
