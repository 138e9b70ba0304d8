//! Classifier-driven policy with experience replay.
//!
//! Each fault-injection action carries a feature vector describing its
//! operation plus the four most recent outcomes observed for it. A
//! [`MlpClassifier`] trained on replayed `(features, outcome)` pairs scores
//! every action; the policy samples actions in proportion to those scores.
//! Until the classifier has been fit, scores are uniform random draws.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace, warn};

use crate::select::sample_categorical;
use crate::{
    ActionId, ActionSpace, Architecture, Error, Experience, ExperienceReplay, FaultType,
    MlpClassifier, MlpConfig, Operation, Policy, Result, Turn,
};

/// Length of a feature vector.
pub const FEATURE_LEN: usize = 8;

/// `[circuit breaker, dependency count, service instances, lag0..lag3, fault]`.
pub type Features = [f64; FEATURE_LEN];

const LAG_START: usize = 3;
const LAGS: usize = 4;
const FAULT_SLOT: usize = LAG_START + LAGS;

/// Configuration for [`NeuralPolicy`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NeuralConfig {
    /// Width of each hidden layer of the classifier.
    pub hidden_layers: Vec<usize>,
    /// Replay buffer capacity.
    pub experience_capacity: usize,
    /// Entries drawn from the replay buffer per retraining.
    pub batch_size: usize,
    /// Epoch cap for a full refit.
    pub max_iter: usize,
    pub learning_rate: f64,
    pub l2: f64,
    /// Retrain after the first feedback and then every `retrain_every` feedbacks.
    pub retrain_every: usize,
    /// When false, `feedback` learns nothing (evaluation-only runs).
    pub training: bool,
    pub seed: u64,
}

impl Default for NeuralConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![16],
            experience_capacity: 10_000,
            batch_size: 1_000,
            max_iter: 750,
            learning_rate: 1e-3,
            l2: 1e-4,
            retrain_every: 5,
            training: true,
            seed: 0,
        }
    }
}

impl NeuralConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hidden_layers.is_empty() {
            return Err(Error::InvalidParameter {
                name: "hidden_layers",
                reason: "at least one hidden layer is required".to_string(),
            });
        }
        for (name, v) in [
            ("experience_capacity", self.experience_capacity),
            ("batch_size", self.batch_size),
            ("retrain_every", self.retrain_every),
        ] {
            if v == 0 {
                return Err(Error::InvalidParameter {
                    name,
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        self.classifier().validate()
    }

    /// Classifier hyperparameters derived from this config.
    pub fn classifier(&self) -> MlpConfig {
        MlpConfig {
            hidden_layers: self.hidden_layers.clone(),
            learning_rate: self.learning_rate,
            l2: self.l2,
            max_iter: self.max_iter,
            ..MlpConfig::default()
        }
    }
}

/// Initial feature vector for `(operation, fault)`; lag slots start as random bits.
pub fn extract_features<R: Rng + ?Sized>(op: &Operation, fault: FaultType, rng: &mut R) -> Features {
    let mut f = [0.0; FEATURE_LEN];
    f[0] = if op.circuit_breaker { 1.0 } else { 0.0 };
    f[1] = op.dependencies.len() as f64;
    f[2] = f64::from(op.service_instances);
    for lag in &mut f[LAG_START..FAULT_SLOT] {
        *lag = if rng.random::<bool>() { 1.0 } else { 0.0 };
    }
    f[FAULT_SLOT] = fault.indicator();
    f
}

#[derive(Debug, Clone)]
pub struct NeuralPolicy {
    cfg: NeuralConfig,
    space: ActionSpace,
    features: Vec<Features>,
    replay: ExperienceReplay<Experience<Features>>,
    model: MlpClassifier,
    training: bool,
    iterations: u64,
    refits: u64,
    rng: StdRng,
    turn: Turn<usize>,
}

impl NeuralPolicy {
    pub fn new<A: Architecture + ?Sized>(arch: &A, cfg: NeuralConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self::from_space(ActionSpace::from_architecture(arch)?, cfg))
    }

    /// Like [`new`](Self::new), overriding the configured seed.
    pub fn with_seed<A: Architecture + ?Sized>(
        arch: &A,
        mut cfg: NeuralConfig,
        seed: u64,
    ) -> Result<Self> {
        cfg.seed = seed;
        Self::new(arch, cfg)
    }

    fn from_space(space: ActionSpace, cfg: NeuralConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        // Same operation x fault order as the action universe.
        let features = space
            .operations()
            .iter()
            .flat_map(|op| FaultType::ALL.map(|fault| (op, fault)))
            .map(|(op, fault)| extract_features(op, fault, &mut rng))
            .collect();
        Self {
            replay: ExperienceReplay::new(cfg.experience_capacity),
            model: MlpClassifier::new(cfg.classifier()),
            training: cfg.training,
            iterations: 0,
            refits: 0,
            features,
            rng,
            turn: Turn::default(),
            cfg,
            space,
        }
    }

    pub fn config(&self) -> &NeuralConfig {
        &self.cfg
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Toggle learning; `reset` restores the configured value.
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn features(&self, state: &ActionId) -> Option<&Features> {
        let i = self.space.actions().iter().position(|a| a == state)?;
        self.features.get(i)
    }

    pub fn classifier(&self) -> &MlpClassifier {
        &self.model
    }

    pub fn replay_len(&self) -> usize {
        self.replay.len()
    }

    /// Feedback calls that were learned from.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Times an incompatible batch forced the classifier to be rebuilt.
    pub fn refits(&self) -> u64 {
        self.refits
    }

    /// Per-action selection scores used by the next proposal.
    fn scores(&mut self) -> Vec<f64> {
        let mut scores = Vec::with_capacity(self.features.len());
        for f in &self.features {
            let p = if self.model.is_fitted() {
                self.model.success_probability(f).unwrap_or(0.0)
            } else {
                self.rng.random::<f64>()
            };
            scores.push(p);
        }
        scores
    }

    fn learn(&mut self) {
        let batch = self.replay.sample(self.cfg.batch_size, &mut self.rng);
        let x: Vec<Features> = batch.iter().map(|e| e.features).collect();
        let y: Vec<f64> = batch.iter().map(|e| e.outcome).collect();

        let result = if !self.model.is_fitted() {
            self.model.fit(&x, &y, &mut self.rng)
        } else if self.model.accepts(&x, &y) {
            self.model.partial_fit(&x, &y, &mut self.rng)
        } else {
            warn!(
                batch = x.len(),
                known_classes = self.model.classes().len(),
                "replay batch incompatible with classifier; refitting from scratch"
            );
            self.refits += 1;
            self.model = MlpClassifier::new(self.cfg.classifier());
            self.model.fit(&x, &y, &mut self.rng)
        };

        match result {
            Ok(()) => debug!(
                batch = x.len(),
                classes = self.model.classes().len(),
                loss = self.model.loss(),
                epochs = self.model.epochs(),
                "classifier trained"
            ),
            Err(e) => warn!(error = %e, "classifier training failed"),
        }
    }
}

impl Policy for NeuralPolicy {
    fn name(&self) -> &'static str {
        "neuralnetwork"
    }

    fn propose(&mut self) -> Result<ActionId> {
        self.turn.ensure_ready()?;
        let scores = self.scores();
        let idx = sample_categorical(&mut self.rng, &scores).unwrap_or(0);
        let action = self.space.actions()[idx].clone();
        trace!(%action, score = scores[idx], fitted = self.model.is_fitted(), "neural proposal");
        self.turn.begin(action, idx)
    }

    fn feedback(&mut self, outcome: f64) -> Result<()> {
        let (action, state) = self.turn.finish(outcome)?;
        if !self.training {
            trace!(%action, outcome, "neural feedback ignored outside training");
            return Ok(());
        }

        self.iterations += 1;
        self.replay.remember(Experience {
            features: self.features[state],
            outcome,
        });
        let f = &mut self.features[state];
        f.copy_within(LAG_START..FAULT_SLOT - 1, LAG_START + 1);
        f[LAG_START] = outcome;
        debug!(%action, outcome, iteration = self.iterations, "neural feedback");

        let every = self.cfg.retrain_every as u64;
        if self.iterations == 1 || self.iterations % every == 0 {
            self.learn();
        }
        Ok(())
    }

    fn reset(&mut self) {
        *self = Self::from_space(self.space.clone(), self.cfg.clone());
        debug!("neural policy reset");
    }

    fn actions(&self) -> &[ActionId] {
        self.space.actions()
    }
}
