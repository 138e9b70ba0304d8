//! Flat multi-armed bandits over the full fault-injection universe.
//!
//! Both bandits keep a running-mean estimate `Q` and a visit count `N` per
//! action, with `N` starting at 1 so the first update already averages the
//! prior in. Greedy choices break ties by universe order (first seen).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use crate::policy::{check_finite, check_range};
use crate::select::{argmax_first, decay_epsilon, uniform_index};
use crate::{ActionId, ActionSpace, Architecture, Policy, Result, Turn};

/// Configuration for [`BanditEpsilon`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BanditEpsilonConfig {
    /// Initial exploration probability in `[0, 1]`.
    pub epsilon: f64,
    /// Decay factor applied to `epsilon - min_epsilon` after every update.
    pub gamma: f64,
    /// Floor the exploration rate decays towards.
    pub min_epsilon: f64,
    pub seed: u64,
}

impl Default for BanditEpsilonConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.5,
            gamma: 0.99,
            min_epsilon: 0.05,
            seed: 0,
        }
    }
}

impl BanditEpsilonConfig {
    pub fn validate(&self) -> Result<()> {
        check_range("epsilon", self.epsilon, 0.0, 1.0)?;
        check_range("gamma", self.gamma, 0.0, 1.0)?;
        check_range("min_epsilon", self.min_epsilon, 0.0, 1.0)
    }
}

/// Running-mean table shared by both bandits.
#[derive(Debug, Clone)]
struct Estimates {
    q: Vec<f64>,
    n: Vec<u64>,
}

impl Estimates {
    fn new(len: usize, initial_q: f64) -> Self {
        Self {
            q: vec![initial_q; len],
            n: vec![1; len],
        }
    }

    fn update(&mut self, idx: usize, outcome: f64) -> f64 {
        self.n[idx] = self.n[idx].saturating_add(1);
        let prev = self.q[idx];
        self.q[idx] = prev + (outcome - prev) / self.n[idx] as f64;
        self.q[idx]
    }
}

/// Epsilon-greedy bandit with bounded geometric decay of epsilon.
#[derive(Debug, Clone)]
pub struct BanditEpsilon {
    cfg: BanditEpsilonConfig,
    space: ActionSpace,
    est: Estimates,
    epsilon: f64,
    rng: StdRng,
    turn: Turn<usize>,
}

impl BanditEpsilon {
    pub fn new<A: Architecture + ?Sized>(arch: &A, cfg: BanditEpsilonConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self::from_space(ActionSpace::from_architecture(arch)?, cfg))
    }

    /// Like [`new`](Self::new), overriding the configured seed.
    pub fn with_seed<A: Architecture + ?Sized>(
        arch: &A,
        mut cfg: BanditEpsilonConfig,
        seed: u64,
    ) -> Result<Self> {
        cfg.seed = seed;
        Self::new(arch, cfg)
    }

    fn from_space(space: ActionSpace, cfg: BanditEpsilonConfig) -> Self {
        Self {
            est: Estimates::new(space.actions().len(), 0.0),
            epsilon: cfg.epsilon,
            rng: StdRng::seed_from_u64(cfg.seed),
            turn: Turn::default(),
            cfg,
            space,
        }
    }

    pub fn config(&self) -> &BanditEpsilonConfig {
        &self.cfg
    }

    /// Current (decayed) exploration rate.
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn q(&self, action: &ActionId) -> Option<f64> {
        self.index_of(action).map(|i| self.est.q[i])
    }

    pub fn visits(&self, action: &ActionId) -> Option<u64> {
        self.index_of(action).map(|i| self.est.n[i])
    }

    fn index_of(&self, action: &ActionId) -> Option<usize> {
        self.space.actions().iter().position(|a| a == action)
    }
}

impl Policy for BanditEpsilon {
    fn name(&self) -> &'static str {
        "bandit-epsilon"
    }

    fn propose(&mut self) -> Result<ActionId> {
        self.turn.ensure_ready()?;
        let actions = self.space.actions();
        let explore = self.rng.random::<f64>() < self.epsilon;
        let idx = if explore {
            uniform_index(&mut self.rng, actions.len())
        } else {
            argmax_first(&self.est.q).unwrap_or(0)
        };
        trace!(action = %actions[idx], explore, epsilon = self.epsilon, "bandit-epsilon proposal");
        self.turn.begin(actions[idx].clone(), idx)
    }

    fn feedback(&mut self, outcome: f64) -> Result<()> {
        let (action, idx) = self.turn.finish(outcome)?;
        let q = self.est.update(idx, outcome);
        self.epsilon = decay_epsilon(self.epsilon, self.cfg.gamma, self.cfg.min_epsilon);
        debug!(
            %action,
            outcome,
            q,
            visits = self.est.n[idx],
            epsilon = self.epsilon,
            "bandit-epsilon update"
        );
        Ok(())
    }

    fn reset(&mut self) {
        *self = Self::from_space(self.space.clone(), self.cfg);
        debug!(epsilon = self.epsilon, "bandit-epsilon reset");
    }

    fn actions(&self) -> &[ActionId] {
        self.space.actions()
    }
}

/// Configuration for [`BanditOptimistic`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BanditOptimisticConfig {
    /// Initial value of every estimate; set above any plausible outcome.
    pub optimistic: f64,
}

impl Default for BanditOptimisticConfig {
    fn default() -> Self {
        Self { optimistic: 5.0 }
    }
}

impl BanditOptimisticConfig {
    pub fn validate(&self) -> Result<()> {
        check_finite("optimistic", self.optimistic)
    }
}

/// Greedy bandit that explores through optimistic initial estimates.
///
/// Fully deterministic: no exploration parameter and no randomness.
#[derive(Debug, Clone)]
pub struct BanditOptimistic {
    cfg: BanditOptimisticConfig,
    space: ActionSpace,
    est: Estimates,
    turn: Turn<usize>,
}

impl BanditOptimistic {
    pub fn new<A: Architecture + ?Sized>(arch: &A, cfg: BanditOptimisticConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self::from_space(ActionSpace::from_architecture(arch)?, cfg))
    }

    fn from_space(space: ActionSpace, cfg: BanditOptimisticConfig) -> Self {
        Self {
            est: Estimates::new(space.actions().len(), cfg.optimistic),
            turn: Turn::default(),
            cfg,
            space,
        }
    }

    pub fn config(&self) -> &BanditOptimisticConfig {
        &self.cfg
    }

    pub fn q(&self, action: &ActionId) -> Option<f64> {
        self.index_of(action).map(|i| self.est.q[i])
    }

    pub fn visits(&self, action: &ActionId) -> Option<u64> {
        self.index_of(action).map(|i| self.est.n[i])
    }

    fn index_of(&self, action: &ActionId) -> Option<usize> {
        self.space.actions().iter().position(|a| a == action)
    }
}

impl Policy for BanditOptimistic {
    fn name(&self) -> &'static str {
        "bandit-optimistic"
    }

    fn propose(&mut self) -> Result<ActionId> {
        self.turn.ensure_ready()?;
        let idx = argmax_first(&self.est.q).unwrap_or(0);
        let action = self.space.actions()[idx].clone();
        trace!(%action, q = self.est.q[idx], "bandit-optimistic proposal");
        self.turn.begin(action, idx)
    }

    fn feedback(&mut self, outcome: f64) -> Result<()> {
        let (action, idx) = self.turn.finish(outcome)?;
        let q = self.est.update(idx, outcome);
        debug!(%action, outcome, q, visits = self.est.n[idx], "bandit-optimistic update");
        Ok(())
    }

    fn reset(&mut self) {
        *self = Self::from_space(self.space.clone(), self.cfg);
        debug!(optimistic = self.cfg.optimistic, "bandit-optimistic reset");
    }

    fn actions(&self) -> &[ActionId] {
        self.space.actions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, FaultType, Operation, StaticArchitecture};

    fn arch() -> StaticArchitecture {
        StaticArchitecture::new(vec![
            Operation::new("op1").with_service_instances(2),
            Operation::new("op2").with_dependencies(["op1"]),
        ])
        .unwrap()
    }

    #[test]
    fn greedy_epsilon_prefers_first_on_ties() {
        let cfg = BanditEpsilonConfig {
            epsilon: 0.0,
            min_epsilon: 0.0,
            ..Default::default()
        };
        let mut b = BanditEpsilon::new(&arch(), cfg).unwrap();
        assert_eq!(b.propose().unwrap(), ActionId::new("op1", FaultType::Abort));
    }

    #[test]
    fn epsilon_decays_towards_floor_and_reset_restores_it() {
        let cfg = BanditEpsilonConfig {
            epsilon: 0.8,
            gamma: 0.5,
            min_epsilon: 0.1,
            seed: 3,
        };
        let mut b = BanditEpsilon::new(&arch(), cfg).unwrap();
        for _ in 0..30 {
            b.propose().unwrap();
            b.feedback(1.0).unwrap();
        }
        assert!((b.epsilon() - 0.1).abs() < 1e-6);
        b.reset();
        assert_eq!(b.epsilon(), 0.8);
        for a in b.actions().to_vec() {
            assert_eq!(b.q(&a), Some(0.0));
            assert_eq!(b.visits(&a), Some(1));
        }
    }

    #[test]
    fn greedy_epsilon_mean_converges_to_constant_outcome() {
        let cfg = BanditEpsilonConfig {
            epsilon: 0.0,
            min_epsilon: 0.0,
            seed: 9,
            ..Default::default()
        };
        let mut b = BanditEpsilon::new(&arch(), cfg).unwrap();
        assert_eq!(b.config(), &cfg);
        let a = b.propose().unwrap();
        b.feedback(3.0).unwrap();
        for _ in 1..2000 {
            assert_eq!(b.propose().unwrap(), a);
            b.feedback(3.0).unwrap();
        }
        // N starts at 1, so after k updates Q = 3k / (k + 1).
        assert!((b.q(&a).unwrap() - 3.0).abs() < 2e-3);
        assert_eq!(b.visits(&a), Some(2001));
        assert_eq!(b.config().epsilon, 0.0);
    }

    #[test]
    fn running_mean_converges_to_constant_outcome() {
        let mut b = BanditOptimistic::new(&arch(), BanditOptimisticConfig { optimistic: 5.0 }).unwrap();
        // Outcome above the prior keeps the bandit on the first action.
        let mut first = None;
        for _ in 0..2000 {
            let a = b.propose().unwrap();
            first.get_or_insert_with(|| a.clone());
            b.feedback(7.0).unwrap();
        }
        let a = first.unwrap();
        assert!((b.q(&a).unwrap() - 7.0).abs() < 2e-3);
        assert_eq!(b.config().optimistic, 5.0);
        assert_eq!(b.visits(&a), Some(2001));
    }

    #[test]
    fn optimistic_rejects_feedback_without_proposal() {
        let mut b = BanditOptimistic::new(&arch(), BanditOptimisticConfig::default()).unwrap();
        assert_eq!(b.feedback(1.0), Err(Error::NoPendingProposal));
        b.propose().unwrap();
        assert!(matches!(b.propose(), Err(Error::ProposalPending(_))));
    }
}
