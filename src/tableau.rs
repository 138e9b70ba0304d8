//! Two-level "tableau" allocator.
//!
//! Every fault-injection action is a state holding `action_size` buckets of
//! running-mean estimates. Exploiting groups states by the bucket their
//! estimates currently favour and serves the lowest-indexed non-empty bucket
//! first; exploring picks a random bucket and an independent random state.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use crate::policy::{check_finite, check_range};
use crate::select::{argmax_random, decay_epsilon, uniform_index};
use crate::{ActionId, ActionSpace, Architecture, Error, Policy, Result, Turn};

/// Configuration for [`Tableau`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TableauConfig {
    pub epsilon: f64,
    pub gamma: f64,
    pub initial_q: f64,
    pub min_epsilon: f64,
    /// Number of buckets per state (at least 1).
    pub action_size: usize,
    pub seed: u64,
}

impl Default for TableauConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.3,
            gamma: 0.99,
            initial_q: 0.0,
            min_epsilon: 0.01,
            action_size: 4,
            seed: 0,
        }
    }
}

impl TableauConfig {
    pub fn validate(&self) -> Result<()> {
        check_range("epsilon", self.epsilon, 0.0, 1.0)?;
        check_range("gamma", self.gamma, 0.0, 1.0)?;
        check_range("min_epsilon", self.min_epsilon, 0.0, 1.0)?;
        check_finite("initial_q", self.initial_q)?;
        if self.action_size == 0 {
            return Err(Error::InvalidParameter {
                name: "action_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Pending proposal: `(state index, bucket index)`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Slot {
    state: usize,
    bucket: usize,
}

#[derive(Debug, Clone)]
pub struct Tableau {
    cfg: TableauConfig,
    space: ActionSpace,
    q: Vec<Vec<f64>>,
    n: Vec<Vec<u64>>,
    epsilon: f64,
    rng: StdRng,
    turn: Turn<Slot>,
}

impl Tableau {
    pub fn new<A: Architecture + ?Sized>(arch: &A, cfg: TableauConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self::from_space(ActionSpace::from_architecture(arch)?, cfg))
    }

    /// Like [`new`](Self::new), overriding the configured seed.
    pub fn with_seed<A: Architecture + ?Sized>(
        arch: &A,
        mut cfg: TableauConfig,
        seed: u64,
    ) -> Result<Self> {
        cfg.seed = seed;
        Self::new(arch, cfg)
    }

    fn from_space(space: ActionSpace, cfg: TableauConfig) -> Self {
        let states = space.actions().len();
        Self {
            q: vec![vec![cfg.initial_q; cfg.action_size]; states],
            n: vec![vec![1; cfg.action_size]; states],
            epsilon: cfg.epsilon,
            rng: StdRng::seed_from_u64(cfg.seed),
            turn: Turn::default(),
            cfg,
            space,
        }
    }

    pub fn config(&self) -> &TableauConfig {
        &self.cfg
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Bucket estimates for `state`.
    pub fn q(&self, state: &ActionId) -> Option<&[f64]> {
        self.index_of(state).map(|i| self.q[i].as_slice())
    }

    /// Bucket visit counts for `state`.
    pub fn visits(&self, state: &ActionId) -> Option<&[u64]> {
        self.index_of(state).map(|i| self.n[i].as_slice())
    }

    /// Bucket chosen by the most recent proposal, if one is pending.
    pub fn pending_bucket(&self) -> Option<usize> {
        match &self.turn {
            Turn::AwaitingFeedback { pending, .. } => Some(pending.bucket),
            Turn::AwaitingProposal => None,
        }
    }

    fn index_of(&self, state: &ActionId) -> Option<usize> {
        self.space.actions().iter().position(|a| a == state)
    }

    fn exploit(&mut self) -> Slot {
        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); self.cfg.action_size];
        for (s, q) in self.q.iter().enumerate() {
            let b = argmax_random(&mut self.rng, q).unwrap_or(0);
            buckets[b].push(s);
        }
        for (bucket, members) in buckets.iter().enumerate() {
            if !members.is_empty() {
                let state = members[uniform_index(&mut self.rng, members.len())];
                return Slot { state, bucket };
            }
        }
        // Unreachable with a non-empty state set; fall back to exploring.
        self.explore()
    }

    fn explore(&mut self) -> Slot {
        let bucket = uniform_index(&mut self.rng, self.cfg.action_size);
        let state = uniform_index(&mut self.rng, self.q.len());
        Slot { state, bucket }
    }
}

impl Policy for Tableau {
    fn name(&self) -> &'static str {
        "tableau"
    }

    fn propose(&mut self) -> Result<ActionId> {
        self.turn.ensure_ready()?;
        let greedy = self.rng.random::<f64>() >= self.epsilon;
        let slot = if greedy { self.exploit() } else { self.explore() };
        let action = self.space.actions()[slot.state].clone();
        trace!(%action, bucket = slot.bucket, greedy, epsilon = self.epsilon, "tableau proposal");
        self.turn.begin(action, slot)
    }

    fn feedback(&mut self, outcome: f64) -> Result<()> {
        let (action, Slot { state, bucket }) = self.turn.finish(outcome)?;
        let n = &mut self.n[state][bucket];
        *n = n.saturating_add(1);
        let n = *n as f64;
        let q = &mut self.q[state][bucket];
        *q += (outcome - *q) / n;
        let q = *q;
        self.epsilon = decay_epsilon(self.epsilon, self.cfg.gamma, self.cfg.min_epsilon);
        debug!(%action, bucket, outcome, q, epsilon = self.epsilon, "tableau update");
        Ok(())
    }

    fn reset(&mut self) {
        *self = Self::from_space(self.space.clone(), self.cfg);
        debug!(epsilon = self.epsilon, "tableau reset");
    }

    fn actions(&self) -> &[ActionId] {
        self.space.actions()
    }
}
