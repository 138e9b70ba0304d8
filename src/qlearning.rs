//! Tabular Q-learning over the dependency graph.
//!
//! A state is an operation that has at least one eligible incoming
//! dependency; its actions are the names of those dependencies. Choosing an
//! action means "inject a fault into that dependency next", and the chosen
//! dependency becomes the next state. Dependencies that are not states
//! themselves (nothing feeds into them) jump to a uniformly random state.
//!
//! Update rule, TD(0):
//!
//! ```text
//! Q[s][a] <- (1 - alpha) * Q[s][a] + alpha * (r + gamma * max_b Q[s'][b])
//! ```

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use crate::policy::{check_finite, check_range};
use crate::select::{argmax_random, uniform_index};
use crate::{ActionId, ActionSpace, Architecture, Error, FaultType, Policy, Result, Turn};

/// Configuration for [`QLearning`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct QLearningConfig {
    /// Probability of a uniformly random action.
    pub epsilon: f64,
    /// Discount applied to the bootstrap term.
    pub gamma: f64,
    /// Step size `alpha` in `[0, 1]`.
    pub learning_rate: f64,
    /// Initial value of every `Q[state][action]`.
    pub initial_q: f64,
    pub seed: u64,
}

impl Default for QLearningConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.1,
            gamma: 0.9,
            learning_rate: 0.5,
            initial_q: 0.0,
            seed: 0,
        }
    }
}

impl QLearningConfig {
    pub fn validate(&self) -> Result<()> {
        check_range("epsilon", self.epsilon, 0.0, 1.0)?;
        check_range("gamma", self.gamma, 0.0, 1.0)?;
        check_range("learning_rate", self.learning_rate, 0.0, 1.0)?;
        check_finite("initial_q", self.initial_q)
    }
}

#[derive(Debug, Clone)]
struct StateRow {
    name: String,
    actions: Vec<String>,
    q: Vec<f64>,
    n: Vec<u64>,
}

/// Pending proposal: which action of the current state was chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Chosen {
    action: usize,
}

#[derive(Debug, Clone)]
pub struct QLearning {
    cfg: QLearningConfig,
    space: ActionSpace,
    rows: Vec<StateRow>,
    index: BTreeMap<String, usize>,
    state: usize,
    rng: StdRng,
    turn: Turn<Chosen>,
}

impl QLearning {
    /// Build over `arch`.
    ///
    /// Fails with [`Error::EmptyStateSpace`] when no eligible operation has an
    /// eligible incoming dependency.
    pub fn new<A: Architecture + ?Sized>(arch: &A, cfg: QLearningConfig) -> Result<Self> {
        cfg.validate()?;
        let space = ActionSpace::from_architecture(arch)?;
        if space.dependency_states().is_empty() {
            return Err(Error::EmptyStateSpace);
        }
        Ok(Self::from_space(space, cfg))
    }

    /// Like [`new`](Self::new), overriding the configured seed.
    pub fn with_seed<A: Architecture + ?Sized>(
        arch: &A,
        mut cfg: QLearningConfig,
        seed: u64,
    ) -> Result<Self> {
        cfg.seed = seed;
        Self::new(arch, cfg)
    }

    fn from_space(space: ActionSpace, cfg: QLearningConfig) -> Self {
        let rows: Vec<StateRow> = space
            .dependency_states()
            .iter()
            .map(|(name, deps)| StateRow {
                name: name.clone(),
                actions: deps.clone(),
                q: vec![cfg.initial_q; deps.len()],
                n: vec![0; deps.len()],
            })
            .collect();
        let index = rows
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), i))
            .collect();
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let state = uniform_index(&mut rng, rows.len());
        Self {
            cfg,
            space,
            rows,
            index,
            state,
            rng,
            turn: Turn::default(),
        }
    }

    pub fn config(&self) -> &QLearningConfig {
        &self.cfg
    }

    /// Name of the current state.
    pub fn state(&self) -> &str {
        &self.rows[self.state].name
    }

    /// All state names, in architecture order.
    pub fn states(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.name.as_str())
    }

    /// Action names available in `state`.
    pub fn state_actions(&self, state: &str) -> Option<&[String]> {
        self.index.get(state).map(|&i| self.rows[i].actions.as_slice())
    }

    pub fn q(&self, state: &str, action: &str) -> Option<f64> {
        let row = &self.rows[*self.index.get(state)?];
        row.actions.iter().position(|a| a == action).map(|j| row.q[j])
    }

    pub fn visits(&self, state: &str, action: &str) -> Option<u64> {
        let row = &self.rows[*self.index.get(state)?];
        row.actions.iter().position(|a| a == action).map(|j| row.n[j])
    }
}

impl Policy for QLearning {
    fn name(&self) -> &'static str {
        "qlearning"
    }

    fn propose(&mut self) -> Result<ActionId> {
        self.turn.ensure_ready()?;
        let row = &self.rows[self.state];
        let greedy = self.rng.random::<f64>() >= self.cfg.epsilon;
        let action = if greedy {
            argmax_random(&mut self.rng, &row.q).unwrap_or(0)
        } else {
            uniform_index(&mut self.rng, row.actions.len())
        };
        let fault = FaultType::ALL[uniform_index(&mut self.rng, FaultType::ALL.len())];
        let id = ActionId::new(row.actions[action].clone(), fault);
        trace!(state = %row.name, action = %id, greedy, "qlearning proposal");
        self.turn.begin(id, Chosen { action })
    }

    fn feedback(&mut self, outcome: f64) -> Result<()> {
        let (id, Chosen { action }) = self.turn.finish(outcome)?;
        let next_name = &self.rows[self.state].actions[action];
        let next = match self.index.get(next_name) {
            Some(&i) => i,
            None => uniform_index(&mut self.rng, self.rows.len()),
        };

        let next_row = &self.rows[next];
        let best = argmax_random(&mut self.rng, &next_row.q).map_or(0.0, |j| next_row.q[j]);

        let alpha = self.cfg.learning_rate;
        let row = &mut self.rows[self.state];
        row.n[action] = row.n[action].saturating_add(1);
        let q = (1.0 - alpha) * row.q[action] + alpha * (outcome + self.cfg.gamma * best);
        row.q[action] = q;
        debug!(
            %id,
            state = %self.rows[self.state].name,
            next = %self.rows[next].name,
            outcome,
            bootstrap = best,
            q,
            "qlearning update"
        );
        self.state = next;
        Ok(())
    }

    fn reset(&mut self) {
        *self = Self::from_space(self.space.clone(), self.cfg);
        debug!(state = %self.state(), "qlearning reset");
    }

    fn actions(&self) -> &[ActionId] {
        self.space.actions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Operation, StaticArchitecture};

    fn chain() -> StaticArchitecture {
        // gateway -> orders -> db, gateway -> users
        StaticArchitecture::new(vec![
            Operation::new("db"),
            Operation::new("users"),
            Operation::new("orders").with_dependencies(["db"]),
            Operation::new("gateway").with_dependencies(["orders", "users"]),
        ])
        .unwrap()
    }

    #[test]
    fn states_are_operations_with_incoming_dependencies() {
        let q = QLearning::new(&chain(), QLearningConfig::default()).unwrap();
        assert_eq!(q.states().collect::<Vec<_>>(), vec!["orders", "gateway"]);
        assert_eq!(
            q.state_actions("gateway").unwrap(),
            &["orders".to_string(), "users".to_string()]
        );
        assert_eq!(q.visits("gateway", "users"), Some(0));
    }

    #[test]
    fn no_dependencies_means_no_states() {
        let arch = StaticArchitecture::new(vec![Operation::new("x"), Operation::new("y")]).unwrap();
        assert!(matches!(
            QLearning::new(&arch, QLearningConfig::default()),
            Err(Error::EmptyStateSpace)
        ));
    }

    #[test]
    fn repeated_dependency_gets_a_single_estimate() {
        let arch = StaticArchitecture::new(vec![
            Operation::new("op1"),
            Operation::new("op2").with_dependencies(["op1", "op1"]),
        ])
        .unwrap();
        let cfg = QLearningConfig {
            epsilon: 1.0,
            ..Default::default()
        };
        let mut q = QLearning::new(&arch, cfg).unwrap();
        assert_eq!(q.config(), &cfg);
        assert_eq!(q.state_actions("op2").unwrap(), &["op1".to_string()]);
        for _ in 0..10 {
            q.propose().unwrap();
            q.feedback(1.0).unwrap();
        }
        assert_eq!(q.visits("op2", "op1"), Some(10));
    }

    #[test]
    fn td_update_matches_formula() {
        let arch = StaticArchitecture::new(vec![
            Operation::new("op1"),
            Operation::new("op2").with_dependencies(["op1"]),
        ])
        .unwrap();
        let cfg = QLearningConfig {
            epsilon: 0.0,
            gamma: 0.5,
            learning_rate: 0.25,
            initial_q: 2.0,
            seed: 1,
        };
        let mut q = QLearning::new(&arch, cfg).unwrap();
        assert_eq!(q.state(), "op2");
        let a = q.propose().unwrap();
        assert_eq!(a.operation, "op1");
        q.feedback(4.0).unwrap();
        // op1 is not a state, so the next state falls back to op2 itself.
        let expected = 0.75 * 2.0 + 0.25 * (4.0 + 0.5 * 2.0);
        assert!((q.q("op2", "op1").unwrap() - expected).abs() < 1e-12);
        assert_eq!(q.visits("op2", "op1"), Some(1));
        assert_eq!(q.state(), "op2");
    }

    #[test]
    fn following_an_edge_moves_the_state() {
        let mut q = QLearning::new(
            &chain(),
            QLearningConfig {
                epsilon: 1.0,
                ..Default::default()
            },
        )
        .unwrap();
        for _ in 0..100 {
            let from = q.state().to_string();
            let a = q.propose().unwrap();
            assert!(q.state_actions(&from).unwrap().contains(&a.operation));
            q.feedback(0.5).unwrap();
            if q.state_actions(&a.operation).is_some() {
                assert_eq!(q.state(), a.operation);
            }
        }
    }
}
