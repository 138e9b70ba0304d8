//! Selection helpers shared by the policies: uniform choice, argmax with
//! either tie rule, categorical sampling, and epsilon decay.
//!
//! Every helper takes the caller's RNG; nothing here touches ambient randomness.

use rand::Rng;

/// Uniform index in `0..len`. `len` must be non-zero.
pub fn uniform_index<R: Rng + ?Sized>(rng: &mut R, len: usize) -> usize {
    debug_assert!(len > 0, "uniform_index on empty range");
    rng.random_range(0..len)
}

/// Index of the maximum, keeping the first one seen on ties.
///
/// Returns `None` for an empty slice.
pub fn argmax_first(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Index of the maximum, choosing uniformly among all tied maximizers.
///
/// Returns `None` for an empty slice.
pub fn argmax_random<R: Rng + ?Sized>(rng: &mut R, values: &[f64]) -> Option<usize> {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let ties: Vec<usize> = values
        .iter()
        .enumerate()
        .filter(|&(_, &v)| v == max)
        .map(|(i, _)| i)
        .collect();
    match ties.len() {
        0 => None,
        1 => Some(ties[0]),
        n => Some(ties[uniform_index(rng, n)]),
    }
}

/// Normalize non-negative weights into a distribution.
///
/// Negative or non-finite weights count as zero. If nothing is left, the
/// result is uniform. Empty in, empty out.
pub fn normalize(weights: &[f64]) -> Vec<f64> {
    if weights.is_empty() {
        return Vec::new();
    }
    let clean = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
    let total: f64 = weights.iter().map(|&w| clean(w)).sum();
    if total <= 0.0 || !total.is_finite() {
        let n = weights.len() as f64;
        return vec![1.0 / n; weights.len()];
    }
    weights.iter().map(|&w| clean(w) / total).collect()
}

/// Sample an index proportionally to `weights` (see [`normalize`]).
///
/// Returns `None` for an empty slice.
pub fn sample_categorical<R: Rng + ?Sized>(rng: &mut R, weights: &[f64]) -> Option<usize> {
    let probs = normalize(weights);
    if probs.is_empty() {
        return None;
    }
    let r: f64 = rng.random();
    let mut cdf = 0.0;
    for (i, p) in probs.iter().enumerate() {
        cdf += p;
        if r < cdf {
            return Some(i);
        }
    }
    // Numerical fallback: last index with mass.
    probs.iter().rposition(|&p| p > 0.0)
}

/// One step of the bounded geometric decay `(eps - min) * gamma + min`.
pub fn decay_epsilon(epsilon: f64, gamma: f64, min_epsilon: f64) -> f64 {
    (epsilon - min_epsilon) * gamma + min_epsilon
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn argmax_first_keeps_earliest_tie() {
        assert_eq!(argmax_first(&[1.0, 3.0, 3.0, 2.0]), Some(1));
        assert_eq!(argmax_first(&[]), None);
    }

    #[test]
    fn argmax_random_visits_every_tie() {
        let mut rng = StdRng::seed_from_u64(5);
        let v = [2.0, 0.0, 2.0, 2.0];
        let mut seen = [false; 4];
        for _ in 0..200 {
            seen[argmax_random(&mut rng, &v).unwrap()] = true;
        }
        assert_eq!(seen, [true, false, true, true]);
    }

    #[test]
    fn normalize_falls_back_to_uniform() {
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.5, 0.5]);
        assert_eq!(normalize(&[f64::NAN, 1.0]), vec![0.0, 1.0]);
    }

    #[test]
    fn sample_categorical_never_picks_zero_mass() {
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..500 {
            let i = sample_categorical(&mut rng, &[0.0, 1.0, 0.0, 3.0]).unwrap();
            assert!(i == 1 || i == 3);
        }
    }

    proptest! {
        #[test]
        fn decay_is_monotone_and_bounded(
            eps0 in 0.0f64..1.0,
            min_frac in 0.0f64..1.0,
            gamma in 0.01f64..0.99,
            steps in 1usize..300,
        ) {
            let min = eps0 * min_frac;
            let mut eps = eps0;
            for _ in 0..steps {
                let next = decay_epsilon(eps, gamma, min);
                prop_assert!(next <= eps + 1e-15);
                prop_assert!(next >= min - 1e-15);
                eps = next;
            }
        }

        #[test]
        fn normalize_is_a_distribution(
            ws in proptest::collection::vec(prop_oneof![Just(f64::NAN), -5.0f64..10.0], 1..30),
        ) {
            let p = normalize(&ws);
            prop_assert_eq!(p.len(), ws.len());
            let s: f64 = p.iter().sum();
            prop_assert!((s - 1.0).abs() < 1e-9, "sum={}", s);
            for v in p {
                prop_assert!(v.is_finite() && v >= 0.0 && v <= 1.0);
            }
        }
    }
}
