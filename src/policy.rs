//! Unified `Policy` trait and the propose/feedback protocol.
//!
//! Every algorithm in this crate (bandits, Q-learning, tableau, neural,
//! random) implements [`Policy`], so an experiment driver can swap algorithms
//! without code changes:
//!
//! ```text
//! let action = policy.propose()?;   // pick a fault injection
//! let impact = run_experiment(&action);
//! policy.feedback(impact)?;         // learn from the outcome
//! ```
//!
//! The pairing is enforced by [`Turn`]: a second `propose` before `feedback`
//! fails with [`Error::ProposalPending`], and `feedback` without a pending
//! proposal fails with [`Error::NoPendingProposal`].

use std::fmt;
use std::str::FromStr;

use crate::{
    ActionId, Architecture, BanditEpsilon, BanditEpsilonConfig, BanditOptimistic,
    BanditOptimisticConfig, Error, NeuralConfig, NeuralPolicy, QLearning, QLearningConfig,
    RandomConfig, RandomPolicy, Result, Tableau, TableauConfig,
};

/// Common interface for fault-selection policies.
///
/// # Example
///
/// ```rust
/// use chaoslearn::{BanditOptimistic, BanditOptimisticConfig, Operation, Policy, StaticArchitecture};
///
/// fn run_policy<P: Policy + ?Sized>(policy: &mut P, trials: usize) -> chaoslearn::Result<()> {
///     for _ in 0..trials {
///         let action = policy.propose()?;
///         // ... inject `action` and measure its impact ...
///         let impact = if action.operation == "db" { 1.0 } else { 0.0 };
///         policy.feedback(impact)?;
///     }
///     Ok(())
/// }
///
/// let arch = StaticArchitecture::new(vec![
///     Operation::new("db"),
///     Operation::new("api").with_dependencies(["db"]),
/// ])?;
/// let mut bandit = BanditOptimistic::new(&arch, BanditOptimisticConfig::default())?;
/// run_policy(&mut bandit, 20)?;
/// # Ok::<(), chaoslearn::Error>(())
/// ```
pub trait Policy {
    /// Human-readable policy name (see [`PolicyKind`]).
    fn name(&self) -> &'static str;

    /// Choose the next fault injection and remember it for [`feedback`](Self::feedback).
    fn propose(&mut self) -> Result<ActionId>;

    /// Learn from the outcome of the pending proposal.
    ///
    /// Non-finite outcomes are rejected and leave the proposal pending.
    fn feedback(&mut self, outcome: f64) -> Result<()>;

    /// Rebuild from the original configuration, discarding everything learned.
    fn reset(&mut self);

    /// The action universe this policy proposes from.
    fn actions(&self) -> &[ActionId];
}

impl<P: Policy + ?Sized> Policy for Box<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }
    fn propose(&mut self) -> Result<ActionId> {
        (**self).propose()
    }
    fn feedback(&mut self, outcome: f64) -> Result<()> {
        (**self).feedback(outcome)
    }
    fn reset(&mut self) {
        (**self).reset()
    }
    fn actions(&self) -> &[ActionId] {
        (**self).actions()
    }
}

/// Two-state protocol machine: a proposal is either outstanding or not.
///
/// `P` is whatever the policy needs to attribute feedback (an action index,
/// a `(state, bucket)` pair, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum Turn<P> {
    AwaitingProposal,
    AwaitingFeedback { action: ActionId, pending: P },
}

impl<P> Default for Turn<P> {
    fn default() -> Self {
        Turn::AwaitingProposal
    }
}

impl<P> Turn<P> {
    /// Fail if a proposal is already outstanding.
    pub fn ensure_ready(&self) -> Result<()> {
        match self {
            Turn::AwaitingProposal => Ok(()),
            Turn::AwaitingFeedback { action, .. } => Err(Error::ProposalPending(action.to_string())),
        }
    }

    /// Record a proposal; fails if one is already outstanding.
    pub fn begin(&mut self, action: ActionId, pending: P) -> Result<ActionId> {
        self.ensure_ready()?;
        *self = Turn::AwaitingFeedback {
            action: action.clone(),
            pending,
        };
        Ok(action)
    }

    /// Validate `outcome` and consume the outstanding proposal.
    pub fn finish(&mut self, outcome: f64) -> Result<(ActionId, P)> {
        if matches!(self, Turn::AwaitingProposal) {
            return Err(Error::NoPendingProposal);
        }
        if !outcome.is_finite() {
            return Err(Error::NonFiniteOutcome(outcome));
        }
        match std::mem::take(self) {
            Turn::AwaitingFeedback { action, pending } => Ok((action, pending)),
            Turn::AwaitingProposal => Err(Error::NoPendingProposal),
        }
    }

    pub fn pending_action(&self) -> Option<&ActionId> {
        match self {
            Turn::AwaitingProposal => None,
            Turn::AwaitingFeedback { action, .. } => Some(action),
        }
    }
}

/// Which algorithm a policy runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PolicyKind {
    #[cfg_attr(feature = "serde", serde(rename = "bandit-epsilon"))]
    BanditEpsilon,
    #[cfg_attr(feature = "serde", serde(rename = "bandit-optimistic"))]
    BanditOptimistic,
    #[cfg_attr(feature = "serde", serde(rename = "qlearning"))]
    QLearning,
    #[cfg_attr(feature = "serde", serde(rename = "tableau"))]
    Tableau,
    #[cfg_attr(feature = "serde", serde(rename = "neuralnetwork"))]
    Neural,
    #[cfg_attr(feature = "serde", serde(rename = "random"))]
    Random,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 6] = [
        PolicyKind::BanditEpsilon,
        PolicyKind::BanditOptimistic,
        PolicyKind::QLearning,
        PolicyKind::Tableau,
        PolicyKind::Neural,
        PolicyKind::Random,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PolicyKind::BanditEpsilon => "bandit-epsilon",
            PolicyKind::BanditOptimistic => "bandit-optimistic",
            PolicyKind::QLearning => "qlearning",
            PolicyKind::Tableau => "tableau",
            PolicyKind::Neural => "neuralnetwork",
            PolicyKind::Random => "random",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PolicyKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::UnknownPolicy(s.to_string()))
    }
}

/// Typed configuration for any policy; the serde form is tagged by `policy`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "policy"))]
pub enum PolicyConfig {
    #[cfg_attr(feature = "serde", serde(rename = "bandit-epsilon"))]
    BanditEpsilon(BanditEpsilonConfig),
    #[cfg_attr(feature = "serde", serde(rename = "bandit-optimistic"))]
    BanditOptimistic(BanditOptimisticConfig),
    #[cfg_attr(feature = "serde", serde(rename = "qlearning"))]
    QLearning(QLearningConfig),
    #[cfg_attr(feature = "serde", serde(rename = "tableau"))]
    Tableau(TableauConfig),
    #[cfg_attr(feature = "serde", serde(rename = "neuralnetwork"))]
    Neural(NeuralConfig),
    #[cfg_attr(feature = "serde", serde(rename = "random"))]
    Random(RandomConfig),
}

impl PolicyConfig {
    pub fn kind(&self) -> PolicyKind {
        match self {
            PolicyConfig::BanditEpsilon(_) => PolicyKind::BanditEpsilon,
            PolicyConfig::BanditOptimistic(_) => PolicyKind::BanditOptimistic,
            PolicyConfig::QLearning(_) => PolicyKind::QLearning,
            PolicyConfig::Tableau(_) => PolicyKind::Tableau,
            PolicyConfig::Neural(_) => PolicyKind::Neural,
            PolicyConfig::Random(_) => PolicyKind::Random,
        }
    }

    /// Default configuration for `kind`.
    pub fn default_for(kind: PolicyKind) -> Self {
        match kind {
            PolicyKind::BanditEpsilon => PolicyConfig::BanditEpsilon(Default::default()),
            PolicyKind::BanditOptimistic => PolicyConfig::BanditOptimistic(Default::default()),
            PolicyKind::QLearning => PolicyConfig::QLearning(Default::default()),
            PolicyKind::Tableau => PolicyConfig::Tableau(Default::default()),
            PolicyKind::Neural => PolicyConfig::Neural(Default::default()),
            PolicyKind::Random => PolicyConfig::Random(Default::default()),
        }
    }

    /// Build a config from a positional parameter vector.
    ///
    /// | policy              | parameters                                      |
    /// |---------------------|-------------------------------------------------|
    /// | `bandit-epsilon`    | `[epsilon, gamma, min_epsilon]`                 |
    /// | `bandit-optimistic` | `[optimistic]`                                  |
    /// | `qlearning`         | `[epsilon, gamma, learning_rate, initial_q]`    |
    /// | `tableau`           | `[epsilon, gamma, initial_q, min_epsilon, action_size]` |
    /// | `neuralnetwork`     | `[hidden_size, ...]` (one entry per hidden layer) |
    /// | `random`            | `[]`                                            |
    ///
    /// `seed` drives every random choice the policy makes.
    pub fn from_params(kind: PolicyKind, params: &[f64], seed: u64) -> Result<Self> {
        let arity = |expected: &'static str, ok: bool| {
            if ok {
                Ok(())
            } else {
                Err(Error::ParameterArity {
                    policy: kind.as_str(),
                    expected,
                    got: params.len(),
                })
            }
        };
        let cfg = match kind {
            PolicyKind::BanditEpsilon => {
                arity("3", params.len() == 3)?;
                PolicyConfig::BanditEpsilon(BanditEpsilonConfig {
                    epsilon: params[0],
                    gamma: params[1],
                    min_epsilon: params[2],
                    seed,
                })
            }
            PolicyKind::BanditOptimistic => {
                arity("1", params.len() == 1)?;
                PolicyConfig::BanditOptimistic(BanditOptimisticConfig {
                    optimistic: params[0],
                })
            }
            PolicyKind::QLearning => {
                arity("4", params.len() == 4)?;
                PolicyConfig::QLearning(QLearningConfig {
                    epsilon: params[0],
                    gamma: params[1],
                    learning_rate: params[2],
                    initial_q: params[3],
                    seed,
                })
            }
            PolicyKind::Tableau => {
                arity("5", params.len() == 5)?;
                PolicyConfig::Tableau(TableauConfig {
                    epsilon: params[0],
                    gamma: params[1],
                    initial_q: params[2],
                    min_epsilon: params[3],
                    action_size: whole_number("action_size", params[4])?,
                    seed,
                })
            }
            PolicyKind::Neural => {
                arity("at least 1", !params.is_empty())?;
                let hidden_layers = params
                    .iter()
                    .map(|&p| whole_number("hidden_size", p))
                    .collect::<Result<Vec<_>>>()?;
                PolicyConfig::Neural(NeuralConfig {
                    hidden_layers,
                    seed,
                    ..NeuralConfig::default()
                })
            }
            PolicyKind::Random => {
                arity("0", params.is_empty())?;
                PolicyConfig::Random(RandomConfig { seed })
            }
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check parameter ranges without building a policy.
    pub fn validate(&self) -> Result<()> {
        match self {
            PolicyConfig::BanditEpsilon(c) => c.validate(),
            PolicyConfig::BanditOptimistic(c) => c.validate(),
            PolicyConfig::QLearning(c) => c.validate(),
            PolicyConfig::Tableau(c) => c.validate(),
            PolicyConfig::Neural(c) => c.validate(),
            PolicyConfig::Random(_) => Ok(()),
        }
    }

    /// Construct the configured policy over `arch`.
    pub fn build<A: Architecture + ?Sized>(self, arch: &A) -> Result<Box<dyn Policy>> {
        Ok(match self {
            PolicyConfig::BanditEpsilon(c) => Box::new(BanditEpsilon::new(arch, c)?),
            PolicyConfig::BanditOptimistic(c) => Box::new(BanditOptimistic::new(arch, c)?),
            PolicyConfig::QLearning(c) => Box::new(QLearning::new(arch, c)?),
            PolicyConfig::Tableau(c) => Box::new(Tableau::new(arch, c)?),
            PolicyConfig::Neural(c) => Box::new(NeuralPolicy::new(arch, c)?),
            PolicyConfig::Random(c) => Box::new(RandomPolicy::new(arch, c)?),
        })
    }
}

fn whole_number(name: &'static str, v: f64) -> Result<usize> {
    if v.is_finite() && v >= 1.0 && v.fract() == 0.0 && v <= u32::MAX as f64 {
        Ok(v as usize)
    } else {
        Err(Error::InvalidParameter {
            name,
            reason: format!("expected a positive integer, got {v}"),
        })
    }
}

/// Check that `v` is finite and inside `[lo, hi]`.
pub(crate) fn check_range(name: &'static str, v: f64, lo: f64, hi: f64) -> Result<()> {
    if v.is_finite() && v >= lo && v <= hi {
        Ok(())
    } else {
        Err(Error::InvalidParameter {
            name,
            reason: format!("expected a finite value in [{lo}, {hi}], got {v}"),
        })
    }
}

pub(crate) fn check_finite(name: &'static str, v: f64) -> Result<()> {
    if v.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidParameter {
            name,
            reason: format!("expected a finite value, got {v}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Operation, StaticArchitecture};

    fn arch() -> StaticArchitecture {
        StaticArchitecture::new(vec![
            Operation::new("op1").with_service_instances(2),
            Operation::new("op2").with_dependencies(["op1"]),
        ])
        .unwrap()
    }

    #[test]
    fn turn_rejects_feedback_before_proposal() {
        let mut t: Turn<usize> = Turn::default();
        assert_eq!(t.finish(1.0), Err(Error::NoPendingProposal));
    }

    #[test]
    fn turn_rejects_second_proposal() {
        let mut t: Turn<usize> = Turn::default();
        let a = ActionId::new("op1", crate::FaultType::Abort);
        t.begin(a.clone(), 0).unwrap();
        assert_eq!(
            t.begin(a.clone(), 1),
            Err(Error::ProposalPending("op1-abort".to_string()))
        );
        assert_eq!(t.finish(2.0), Ok((a, 0)));
        assert_eq!(t, Turn::AwaitingProposal);
    }

    #[test]
    fn turn_keeps_proposal_on_non_finite_outcome() {
        let mut t: Turn<()> = Turn::default();
        t.begin(ActionId::new("op1", crate::FaultType::Delay), ()).unwrap();
        assert!(matches!(t.finish(f64::NAN), Err(Error::NonFiniteOutcome(_))));
        assert!(t.pending_action().is_some());
        assert!(t.finish(0.0).is_ok());
    }

    #[test]
    fn kind_names_round_trip() {
        for k in PolicyKind::ALL {
            assert_eq!(k.as_str().parse::<PolicyKind>().unwrap(), k);
        }
        assert!(matches!(
            "ucb".parse::<PolicyKind>(),
            Err(Error::UnknownPolicy(_))
        ));
    }

    #[test]
    fn from_params_checks_arity() {
        let err = PolicyConfig::from_params(PolicyKind::QLearning, &[0.1, 0.9], 0);
        assert_eq!(
            err,
            Err(Error::ParameterArity {
                policy: "qlearning",
                expected: "4",
                got: 2
            })
        );
        assert!(PolicyConfig::from_params(PolicyKind::Random, &[1.0], 0).is_err());
        assert!(PolicyConfig::from_params(PolicyKind::Neural, &[], 0).is_err());
    }

    #[test]
    fn from_params_checks_types_and_ranges() {
        assert!(matches!(
            PolicyConfig::from_params(PolicyKind::Tableau, &[0.1, 0.9, 0.0, 0.01, 2.5], 0),
            Err(Error::InvalidParameter { name: "action_size", .. })
        ));
        assert!(matches!(
            PolicyConfig::from_params(PolicyKind::BanditEpsilon, &[1.5, 0.9, 0.0], 0),
            Err(Error::InvalidParameter { name: "epsilon", .. })
        ));
        assert!(matches!(
            PolicyConfig::from_params(PolicyKind::BanditOptimistic, &[f64::INFINITY], 0),
            Err(Error::InvalidParameter { .. })
        ));
    }

    #[test]
    fn every_kind_builds_and_reports_its_name() {
        let params: [(PolicyKind, &[f64]); 6] = [
            (PolicyKind::BanditEpsilon, &[0.5, 0.9, 0.05]),
            (PolicyKind::BanditOptimistic, &[5.0]),
            (PolicyKind::QLearning, &[0.1, 0.9, 0.5, 0.0]),
            (PolicyKind::Tableau, &[0.3, 0.9, 0.0, 0.01, 3.0]),
            (PolicyKind::Neural, &[4.0]),
            (PolicyKind::Random, &[]),
        ];
        let a = arch();
        for (kind, p) in params {
            let mut policy = PolicyConfig::from_params(kind, p, 7).unwrap().build(&a).unwrap();
            assert_eq!(policy.name(), kind.as_str());
            let action = policy.propose().unwrap();
            assert!(policy.actions().contains(&action));
            policy.feedback(1.0).unwrap();
        }
    }

    #[cfg(feature = "serde")]
    #[test]
    fn config_loads_from_tagged_json() {
        let cfg: PolicyConfig = serde_json::from_str(
            r#"{"policy": "tableau", "epsilon": 0.4, "gamma": 0.95, "initial_q": 1.0,
                "min_epsilon": 0.05, "action_size": 4, "seed": 11}"#,
        )
        .unwrap();
        assert_eq!(cfg.kind(), PolicyKind::Tableau);
        let PolicyConfig::Tableau(t) = &cfg else {
            panic!("expected tableau config");
        };
        assert_eq!(t.action_size, 4);
        assert!(cfg.build(&arch()).is_ok());
    }
}
