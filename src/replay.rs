//! Bounded, recency-weighted experience buffer.
//!
//! Entries are evicted oldest-first once the buffer exceeds its capacity.
//! Sampling favours recent entries linearly: with `n` entries, the i-th oldest
//! (1-based) has weight `i`, so the newest is `n` times as likely as the oldest.

use std::collections::VecDeque;

use rand::Rng;

/// One `(features, outcome)` observation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Experience<F> {
    pub features: F,
    pub outcome: f64,
}

#[derive(Debug, Clone)]
pub struct ExperienceReplay<T> {
    memory: VecDeque<T>,
    capacity: usize,
}

impl<T> ExperienceReplay<T> {
    /// A buffer holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            memory: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.memory.iter()
    }

    pub fn clear(&mut self) {
        self.memory.clear();
    }

    /// Append an entry, evicting the oldest ones while over capacity.
    pub fn remember(&mut self, entry: T) {
        self.memory.push_back(entry);
        while self.memory.len() > self.capacity {
            self.memory.pop_front();
        }
    }

    /// Sampling weights aligned with [`iter`](Self::iter): `1, 2, ..., len`.
    pub fn recency_weights(&self) -> Vec<f64> {
        (1..=self.memory.len()).map(|i| i as f64).collect()
    }

    /// Draw up to `batch_size` distinct entries.
    ///
    /// When the buffer holds no more than `batch_size` entries, all of them
    /// are returned in age order. Otherwise entries are drawn without
    /// replacement using [`recency_weights`](Self::recency_weights).
    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Vec<&T> {
        let n = self.memory.len();
        if n <= batch_size {
            return self.memory.iter().collect();
        }

        let mut weights = self.recency_weights();
        let mut remaining: f64 = weights.iter().sum();
        let mut picked = Vec::with_capacity(batch_size);
        for _ in 0..batch_size {
            let r = rng.random::<f64>() * remaining;
            let mut cdf = 0.0;
            let mut chosen = None;
            for (i, &w) in weights.iter().enumerate() {
                if w == 0.0 {
                    continue;
                }
                cdf += w;
                if r < cdf {
                    chosen = Some(i);
                    break;
                }
            }
            // Numerical fallback: newest entry still available.
            let Some(i) = chosen.or_else(|| weights.iter().rposition(|&w| w > 0.0)) else {
                break;
            };
            remaining -= weights[i];
            weights[i] = 0.0;
            picked.push(i);
        }
        picked.into_iter().filter_map(|i| self.memory.get(i)).collect()
    }
}
