//! Small multi-layer perceptron classifier.
//!
//! ReLU hidden layers, a softmax output over the distinct labels seen by
//! [`MlpClassifier::fit`], cross-entropy loss with L2 penalty, and Adam.
//! Labels are the raw outcome values: every distinct value is its own class.
//!
//! `partial_fit` only accepts batches the fitted network can represent (same
//! feature width, no unseen labels). Callers check [`MlpClassifier::accepts`]
//! first and refit from scratch otherwise.

use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Uniform};

use crate::policy::check_range;
use crate::{Error, Result};

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;
const MIN_PROB: f64 = 1e-10;

/// Training hyperparameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MlpConfig {
    /// Width of each hidden layer.
    pub hidden_layers: Vec<usize>,
    /// Adam step size.
    pub learning_rate: f64,
    /// L2 penalty strength.
    pub l2: f64,
    /// Maximum epochs for a full fit.
    pub max_iter: usize,
    /// Mini-batch size (clamped to the number of samples).
    pub batch_size: usize,
    /// Minimum epoch-loss improvement that resets the early-stop counter.
    pub tol: f64,
    /// Epochs without improvement tolerated before a fit stops early.
    pub n_iter_no_change: usize,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![16],
            learning_rate: 1e-3,
            l2: 1e-4,
            max_iter: 750,
            batch_size: 200,
            tol: 1e-4,
            n_iter_no_change: 10,
        }
    }
}

impl MlpConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hidden_layers.iter().any(|&h| h == 0) {
            return Err(Error::InvalidParameter {
                name: "hidden_layers",
                reason: "every hidden layer needs at least one unit".to_string(),
            });
        }
        check_range("learning_rate", self.learning_rate, f64::MIN_POSITIVE, 1.0)?;
        check_range("l2", self.l2, 0.0, f64::MAX)?;
        check_range("tol", self.tol, 0.0, f64::MAX)?;
        if self.max_iter == 0 || self.batch_size == 0 {
            return Err(Error::InvalidParameter {
                name: "max_iter",
                reason: "max_iter and batch_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Dense {
    inputs: usize,
    outputs: usize,
    // outputs x inputs, row-major.
    w: Vec<f64>,
    b: Vec<f64>,
    m_w: Vec<f64>,
    v_w: Vec<f64>,
    m_b: Vec<f64>,
    v_b: Vec<f64>,
}

impl Dense {
    /// Glorot-uniform initialisation.
    fn new<R: Rng + ?Sized>(inputs: usize, outputs: usize, rng: &mut R) -> Result<Self> {
        let bound = (6.0 / (inputs + outputs) as f64).sqrt();
        let init = Uniform::new(-bound, bound).map_err(|e| Error::InvalidParameter {
            name: "hidden_layers",
            reason: e.to_string(),
        })?;
        Ok(Self {
            inputs,
            outputs,
            w: (0..inputs * outputs).map(|_| init.sample(rng)).collect(),
            b: (0..outputs).map(|_| init.sample(rng)).collect(),
            m_w: vec![0.0; inputs * outputs],
            v_w: vec![0.0; inputs * outputs],
            m_b: vec![0.0; outputs],
            v_b: vec![0.0; outputs],
        })
    }

    fn row(&self, o: usize) -> &[f64] {
        &self.w[o * self.inputs..(o + 1) * self.inputs]
    }

    fn affine(&self, x: &[f64]) -> Vec<f64> {
        (0..self.outputs)
            .map(|o| self.b[o] + self.row(o).iter().zip(x).map(|(w, a)| w * a).sum::<f64>())
            .collect()
    }
}

fn adam(param: &mut f64, m: &mut f64, v: &mut f64, grad: f64, lr: f64) {
    *m = BETA1 * *m + (1.0 - BETA1) * grad;
    *v = BETA2 * *v + (1.0 - BETA2) * grad * grad;
    *param -= lr * *m / (v.sqrt() + ADAM_EPS);
}

fn softmax_in_place(z: &mut [f64]) {
    let max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut denom = 0.0;
    for v in z.iter_mut() {
        *v = (*v - max).exp();
        denom += *v;
    }
    if denom > 0.0 && denom.is_finite() {
        for v in z.iter_mut() {
            *v /= denom;
        }
    } else {
        let n = z.len() as f64;
        z.iter_mut().for_each(|v| *v = 1.0 / n);
    }
}

/// Feed-forward classifier trained with Adam.
#[derive(Debug, Clone)]
pub struct MlpClassifier {
    cfg: MlpConfig,
    layers: Vec<Dense>,
    classes: Vec<f64>,
    n_features: usize,
    steps: u64,
    epochs: usize,
    loss: f64,
}

impl MlpClassifier {
    pub fn new(cfg: MlpConfig) -> Self {
        Self {
            cfg,
            layers: Vec::new(),
            classes: Vec::new(),
            n_features: 0,
            steps: 0,
            epochs: 0,
            loss: f64::NAN,
        }
    }

    pub fn config(&self) -> &MlpConfig {
        &self.cfg
    }

    pub fn is_fitted(&self) -> bool {
        !self.layers.is_empty()
    }

    /// Known labels in ascending order.
    pub fn classes(&self) -> &[f64] {
        &self.classes
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Mean loss of the last training epoch (`NaN` before any training).
    pub fn loss(&self) -> f64 {
        self.loss
    }

    /// Epochs run by the most recent `fit` or `partial_fit`.
    pub fn epochs(&self) -> usize {
        self.epochs
    }

    /// Train from scratch, discarding any previous weights and classes.
    pub fn fit<X, R>(&mut self, x: &[X], y: &[f64], rng: &mut R) -> Result<()>
    where
        X: AsRef<[f64]>,
        R: Rng + ?Sized,
    {
        self.cfg.validate()?;
        let n_features = check_shape(x, y)?;

        let mut classes = y.to_vec();
        classes.sort_by(f64::total_cmp);
        classes.dedup_by(|a, b| a == b);

        let mut widths = vec![n_features];
        widths.extend(self.cfg.hidden_layers.iter().copied());
        widths.push(classes.len());
        let layers = widths
            .windows(2)
            .map(|w| Dense::new(w[0], w[1], rng))
            .collect::<Result<Vec<_>>>()?;

        self.layers = layers;
        self.classes = classes;
        self.n_features = n_features;
        self.steps = 0;

        let targets = self.targets(y)?;
        let mut best = f64::INFINITY;
        let mut stale = 0usize;
        self.epochs = 0;
        for _ in 0..self.cfg.max_iter {
            let loss = self.epoch(x, &targets, rng);
            self.epochs += 1;
            self.loss = loss;
            if loss > best - self.cfg.tol {
                stale += 1;
            } else {
                stale = 0;
            }
            best = best.min(loss);
            if stale > self.cfg.n_iter_no_change {
                break;
            }
        }
        Ok(())
    }

    /// Whether [`partial_fit`](Self::partial_fit) can take this batch.
    pub fn accepts<X: AsRef<[f64]>>(&self, x: &[X], y: &[f64]) -> bool {
        self.compatibility(x, y).is_ok()
    }

    /// One more epoch over `x` with the current weights and classes.
    ///
    /// Fails with [`Error::IncompatibleBatch`] when the classifier is not
    /// fitted, a row has a different width, or a label is unseen.
    pub fn partial_fit<X, R>(&mut self, x: &[X], y: &[f64], rng: &mut R) -> Result<()>
    where
        X: AsRef<[f64]>,
        R: Rng + ?Sized,
    {
        self.compatibility(x, y)?;
        let targets = self.targets(y)?;
        self.loss = self.epoch(x, &targets, rng);
        self.epochs = 1;
        Ok(())
    }

    /// Class probabilities for one row, aligned with [`classes`](Self::classes).
    ///
    /// `None` when unfitted or when the row has the wrong width.
    pub fn predict_proba(&self, row: &[f64]) -> Option<Vec<f64>> {
        if !self.is_fitted() || row.len() != self.n_features {
            return None;
        }
        self.forward(row).pop()
    }

    /// Probability of the second-lowest known label for `row`.
    ///
    /// With two classes this is the probability of the higher one; with a
    /// single known class it is 0.
    pub fn success_probability(&self, row: &[f64]) -> Option<f64> {
        let p = self.predict_proba(row)?;
        Some(p.get(1).copied().unwrap_or(0.0))
    }

    fn compatibility<X: AsRef<[f64]>>(&self, x: &[X], y: &[f64]) -> Result<()> {
        if !self.is_fitted() {
            return Err(Error::IncompatibleBatch("classifier is not fitted".to_string()));
        }
        let width = check_shape(x, y)?;
        if width != self.n_features {
            return Err(Error::IncompatibleBatch(format!(
                "expected {} features, got {width}",
                self.n_features
            )));
        }
        if let Some(unseen) = y.iter().find(|&&v| !self.classes.contains(&v)) {
            return Err(Error::IncompatibleBatch(format!("unseen label {unseen}")));
        }
        Ok(())
    }

    fn targets(&self, y: &[f64]) -> Result<Vec<usize>> {
        y.iter()
            .map(|v| {
                self.classes
                    .iter()
                    .position(|c| c == v)
                    .ok_or_else(|| Error::IncompatibleBatch(format!("unseen label {v}")))
            })
            .collect()
    }

    /// Activations of every layer, input first, softmax output last.
    fn forward(&self, x: &[f64]) -> Vec<Vec<f64>> {
        let mut acts = Vec::with_capacity(self.layers.len() + 1);
        acts.push(x.to_vec());
        for (li, layer) in self.layers.iter().enumerate() {
            let mut z = layer.affine(&acts[li]);
            if li + 1 == self.layers.len() {
                softmax_in_place(&mut z);
            } else {
                z.iter_mut().for_each(|v| *v = v.max(0.0));
            }
            acts.push(z);
        }
        acts
    }

    fn epoch<X, R>(&mut self, x: &[X], targets: &[usize], rng: &mut R) -> f64
    where
        X: AsRef<[f64]>,
        R: Rng + ?Sized,
    {
        let mut order: Vec<usize> = (0..x.len()).collect();
        order.shuffle(rng);
        let batch = self.cfg.batch_size.clamp(1, x.len());
        let mut total = 0.0;
        for chunk in order.chunks(batch) {
            total += self.step(x, targets, chunk) * chunk.len() as f64;
        }
        total / x.len() as f64
    }

    /// Backpropagate one mini-batch and apply an Adam update; returns the batch loss.
    fn step<X: AsRef<[f64]>>(&mut self, x: &[X], targets: &[usize], idx: &[usize]) -> f64 {
        let mut grads: Vec<(Vec<f64>, Vec<f64>)> = self
            .layers
            .iter()
            .map(|l| (vec![0.0; l.w.len()], vec![0.0; l.b.len()]))
            .collect();
        let mut loss = 0.0;

        for &i in idx {
            let acts = self.forward(x[i].as_ref());
            let t = targets[i];
            let mut delta = acts[acts.len() - 1].clone();
            loss -= delta[t].max(MIN_PROB).ln();
            delta[t] -= 1.0;

            for li in (0..self.layers.len()).rev() {
                let layer = &self.layers[li];
                let input = &acts[li];
                let (gw, gb) = &mut grads[li];
                for (o, &d) in delta.iter().enumerate() {
                    if d == 0.0 {
                        continue;
                    }
                    gb[o] += d;
                    let row = &mut gw[o * layer.inputs..(o + 1) * layer.inputs];
                    for (g, &a) in row.iter_mut().zip(input) {
                        *g += d * a;
                    }
                }
                if li > 0 {
                    let mut back = vec![0.0; layer.inputs];
                    for (o, &d) in delta.iter().enumerate() {
                        for (b, &w) in back.iter_mut().zip(layer.row(o)) {
                            *b += w * d;
                        }
                    }
                    // ReLU gate: the previous activation is zero exactly where z <= 0.
                    for (b, &a) in back.iter_mut().zip(input) {
                        if a <= 0.0 {
                            *b = 0.0;
                        }
                    }
                    delta = back;
                }
            }
        }

        let n = idx.len() as f64;
        let l2 = self.cfg.l2;
        self.steps += 1;
        let t = self.steps as f64;
        let lr = self.cfg.learning_rate * (1.0 - BETA2.powf(t)).sqrt() / (1.0 - BETA1.powf(t));

        let mut penalty = 0.0;
        for (layer, (gw, gb)) in self.layers.iter_mut().zip(grads) {
            penalty += layer.w.iter().map(|w| w * w).sum::<f64>();
            for (j, g) in gw.into_iter().enumerate() {
                let g = g / n + l2 * layer.w[j] / n;
                adam(&mut layer.w[j], &mut layer.m_w[j], &mut layer.v_w[j], g, lr);
            }
            for (j, g) in gb.into_iter().enumerate() {
                adam(&mut layer.b[j], &mut layer.m_b[j], &mut layer.v_b[j], g / n, lr);
            }
        }
        loss / n + 0.5 * l2 * penalty / n
    }
}

/// Validate a batch and return its feature width.
fn check_shape<X: AsRef<[f64]>>(x: &[X], y: &[f64]) -> Result<usize> {
    let first = x.first().ok_or(Error::EmptyBatch)?;
    if x.len() != y.len() {
        return Err(Error::IncompatibleBatch(format!(
            "{} rows but {} labels",
            x.len(),
            y.len()
        )));
    }
    let width = first.as_ref().len();
    if width == 0 {
        return Err(Error::IncompatibleBatch("rows have no features".to_string()));
    }
    if x.iter().any(|r| r.as_ref().len() != width) {
        return Err(Error::IncompatibleBatch("ragged rows".to_string()));
    }
    if let Some(bad) = y.iter().find(|v| !v.is_finite()) {
        return Err(Error::IncompatibleBatch(format!("non-finite label {bad}")));
    }
    Ok(width)
}
