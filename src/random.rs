//! Uniform random baseline.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::trace;

use crate::select::uniform_index;
use crate::{ActionId, ActionSpace, Architecture, Policy, Result, Turn};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RandomConfig {
    pub seed: u64,
}

/// Proposes a uniformly random action every time and learns nothing.
#[derive(Debug, Clone)]
pub struct RandomPolicy {
    cfg: RandomConfig,
    space: ActionSpace,
    rng: StdRng,
    turn: Turn<()>,
}

impl RandomPolicy {
    pub fn new<A: Architecture + ?Sized>(arch: &A, cfg: RandomConfig) -> Result<Self> {
        Ok(Self::from_space(ActionSpace::from_architecture(arch)?, cfg))
    }

    fn from_space(space: ActionSpace, cfg: RandomConfig) -> Self {
        Self {
            cfg,
            space,
            rng: StdRng::seed_from_u64(cfg.seed),
            turn: Turn::default(),
        }
    }
}

impl Policy for RandomPolicy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn propose(&mut self) -> Result<ActionId> {
        self.turn.ensure_ready()?;
        let actions = self.space.actions();
        let action = actions[uniform_index(&mut self.rng, actions.len())].clone();
        trace!(%action, "random proposal");
        self.turn.begin(action, ())
    }

    fn feedback(&mut self, outcome: f64) -> Result<()> {
        self.turn.finish(outcome).map(|_| ())
    }

    fn reset(&mut self) {
        *self = Self::from_space(self.space.clone(), self.cfg);
    }

    fn actions(&self) -> &[ActionId] {
        self.space.actions()
    }
}
