//! Weighted and probabilistic choice driven by a caller-owned RNG.

use rand::Rng;
use surge_core::{CoreError, CoreResult};

/// Precomputed cumulative distribution over a set of items.
///
/// Zero-weight entries are dropped. The last cumulative bound is pinned to
/// exactly 1.0 so a uniform draw in `[0, 1)` always lands on an entry.
#[derive(Debug, Clone)]
pub struct WeightedTable<T> {
    entries: Vec<(T, f64)>,
}

impl<T> WeightedTable<T> {
    pub fn new(weights: impl IntoIterator<Item = (T, f64)>) -> CoreResult<Self> {
        let raw: Vec<(T, f64)> = weights.into_iter().collect();

        if raw.iter().any(|(_, w)| !w.is_finite() || *w < 0.0) {
            return Err(CoreError::internal("weights must be finite and non-negative"));
        }
        let total: f64 = raw.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return Err(CoreError::internal("weights sum to zero"));
        }

        let mut cumulative = 0.0;
        let mut entries: Vec<(T, f64)> = raw
            .into_iter()
            .filter(|(_, w)| *w > 0.0)
            .map(|(item, w)| {
                cumulative += w / total;
                (item, cumulative)
            })
            .collect();
        if let Some(last) = entries.last_mut() {
            last.1 = 1.0;
        }

        Ok(Self { entries })
    }

    /// Draw one entry.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> &T {
        self.pick(rng.gen::<f64>())
    }

    /// Entry for a uniform value `r` in `[0, 1)`: the first whose cumulative bound is `>= r`.
    pub fn pick(&self, r: f64) -> &T {
        let index = self
            .entries
            .iter()
            .position(|(_, bound)| *bound >= r)
            .unwrap_or(self.entries.len() - 1);
        &self.entries[index].0
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One-off weighted choice over a slice. `None` when no entry has positive weight.
pub fn choose<'a, T, R: Rng + ?Sized>(weights: &'a [(T, f64)], rng: &mut R) -> Option<&'a T> {
    let table = WeightedTable::new(weights.iter().map(|(item, w)| (item, *w))).ok()?;
    Some(*table.choose(rng))
}

/// True with probability `p`.
pub fn bernoulli<R: Rng + ?Sized>(p: f64, rng: &mut R) -> bool {
    rng.gen::<f64>() < p
}
