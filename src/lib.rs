//! `chaoslearn`: learning policies that decide where to inject faults next.
//!
//! A chaos experiment driver describes a microservice architecture as a set
//! of [`Operation`]s (name, circuit breaker, dependencies, instance count).
//! Every eligible operation crossed with every [`FaultType`] is an
//! [`ActionId`]; a [`Policy`] repeatedly proposes one, the driver injects it
//! and reports the measured impact, and the policy learns from it.
//!
//! **Policies:**
//! - [`BanditEpsilon`]: epsilon-greedy over incremental means, decaying epsilon.
//! - [`BanditOptimistic`]: pure greedy with optimistic initial estimates.
//! - [`QLearning`]: tabular TD(0) walking the dependency graph.
//! - [`Tableau`]: per-action bucketed estimates, lowest winning bucket first.
//! - [`NeuralPolicy`]: classifier-scored sampling trained from an
//!   [`ExperienceReplay`] buffer.
//! - [`RandomPolicy`]: uniform baseline.
//!
//! [`PolicyConfig::from_params`] builds any of them from a policy name and a
//! positional parameter vector; [`PolicyConfig::build`] turns the config into
//! a `Box<dyn Policy>`.
//!
//! **Goals:**
//! - **Reproducible**: every random choice flows from a `seed` in the config,
//!   and `reset` reseeds, so a reset policy replays the same trajectory.
//! - **Strict protocol**: `propose` and `feedback` strictly alternate; misuse
//!   is an [`Error`], never a silent overwrite.
//! - **Small**: no storage, no experiment execution, no metrics sink.
//!
//! Operations named in [`EXCLUDED_OPERATIONS`] are never proposed by any policy.
//!
//! With the `serde` feature, architectures and every config type can be
//! loaded from JSON.

#![forbid(unsafe_code)]

mod error;
pub use error::*;

mod architecture;
pub use architecture::*;

mod action;
pub use action::*;

pub mod select;

mod replay;
pub use replay::*;

mod policy;
pub use policy::*;

mod bandit;
pub use bandit::*;

mod qlearning;
pub use qlearning::*;

mod tableau;
pub use tableau::*;

mod mlp;
pub use mlp::*;

mod neural;
pub use neural::*;

mod random;
pub use random::*;
