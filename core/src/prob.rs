//! Count, probability, and log-probability tables.
//!
//! Training moves a table through three phases: raw counts, normalized
//! probabilities, then base-10 log probabilities. Each phase is its own
//! type and each conversion consumes its input, so a half-normalized
//! table cannot be scored and a log table cannot be counted into.
//!
//! All scoring in this crate happens in the log10 domain. A probability
//! that comes out non-positive is clamped to [`LOG10_ZERO`] with a
//! warning rather than propagating `-inf` through a sum.

use std::hash::Hash;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Stand-in for log10(0). Matches the conventional floor used by n-gram
/// toolkits, small enough to crush a sum and still finite.
pub const LOG10_ZERO: f64 = -99.0;

/// Cost of a probability, `-log10(p)`.
pub fn prob_to_cost(p: f64) -> f64 {
    -p.log10()
}

/// Cost of a relative frequency, `-log10(count / norm)`.
pub fn counts_to_cost(count: f64, norm: f64) -> f64 {
    prob_to_cost(count / norm)
}

/// log10 of `p`, clamped with a warning when `p` is not positive.
pub fn log10_or_zero(p: f64) -> f64 {
    if p > 0.0 {
        p.log10()
    } else {
        warn!(p, "non-positive probability clamped to log10 floor");
        LOG10_ZERO
    }
}

/// Interpolates two log10 probabilities in the linear domain:
/// `log10(alpha * 10^a + (1 - alpha) * 10^b)`.
pub fn log10_interp(a: f64, b: f64, alpha: f64) -> f64 {
    let v = alpha * 10f64.powf(a) + (1.0 - alpha) * 10f64.powf(b);
    if v > 0.0 {
        v.log10()
    } else {
        LOG10_ZERO
    }
}

/// Converts a log10 probability to log2, for bits-per-event reporting.
pub fn log10_to_bits(lp: f64) -> f64 {
    lp / std::f64::consts::LOG10_2
}

/// Raw event counts keyed by `K`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counts<K: Eq + Hash> {
    map: AHashMap<K, f64>,
}

impl<K: Eq + Hash> Default for Counts<K> {
    fn default() -> Self {
        Self {
            map: AHashMap::new(),
        }
    }
}

impl<K: Eq + Hash> Counts<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: K, n: f64) {
        *self.map.entry(key).or_insert(0.0) += n;
    }

    pub fn get(&self, key: &K) -> f64 {
        self.map.get(key).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.map.values().sum()
    }

    /// Number of keys observed exactly once.
    pub fn singletons(&self) -> usize {
        self.map.values().filter(|&&c| c == 1.0).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, f64)> {
        self.map.iter().map(|(k, &v)| (k, v))
    }

    /// Adds every count from `other` into this table.
    pub fn merge(&mut self, other: Counts<K>) {
        for (k, v) in other.map {
            *self.map.entry(k).or_insert(0.0) += v;
        }
    }

    /// Divides each count by a per-key denominator.
    ///
    /// A non-positive denominator yields probability zero for that key;
    /// the clamp warning fires later at the log conversion.
    pub fn normalize_by<F: Fn(&K) -> f64>(self, denom: F) -> Probs<K> {
        let map = self
            .map
            .into_iter()
            .map(|(k, c)| {
                let d = denom(&k);
                let p = if d > 0.0 { c / d } else { 0.0 };
                (k, p)
            })
            .collect();
        Probs { map }
    }

    /// Divides each count by the table total.
    pub fn normalize(self) -> Probs<K> {
        let total = self.total();
        self.normalize_by(|_| total)
    }
}

/// Normalized probabilities keyed by `K`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Probs<K: Eq + Hash> {
    map: AHashMap<K, f64>,
}

/// Collects values that are already normalized (or are linear weights).
impl<K: Eq + Hash> FromIterator<(K, f64)> for Probs<K> {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}

impl<K: Eq + Hash> Probs<K> {
    pub fn get(&self, key: &K) -> Option<f64> {
        self.map.get(key).copied()
    }

    pub fn insert(&mut self, key: K, p: f64) {
        self.map.insert(key, p);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, f64)> {
        self.map.iter().map(|(k, &v)| (k, v))
    }

    /// Rewrites each probability in place.
    pub fn update<F: FnMut(&K, f64) -> f64>(&mut self, mut f: F) {
        for (k, v) in self.map.iter_mut() {
            *v = f(k, *v);
        }
    }
}

impl<K: Eq + Hash + std::fmt::Debug> Probs<K> {
    /// Converts to the log10 domain, clamping non-positive entries.
    pub fn into_log10(self) -> LogProbs<K> {
        let map = self
            .map
            .into_iter()
            .map(|(k, p)| {
                let lp = if p > 0.0 {
                    p.log10()
                } else {
                    warn!(key = ?k, p, "zero probability clamped to log10 floor");
                    LOG10_ZERO
                };
                (k, lp)
            })
            .collect();
        LogProbs { map }
    }
}

/// Base-10 log probabilities keyed by `K`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogProbs<K: Eq + Hash> {
    map: AHashMap<K, f64>,
}

impl<K: Eq + Hash> LogProbs<K> {
    pub fn get(&self, key: &K) -> Option<f64> {
        self.map.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, f64)> {
        self.map.iter().map(|(k, &v)| (k, v))
    }

    /// Back to the linear domain.
    pub fn into_linear(self) -> Probs<K> {
        let map = self
            .map
            .into_iter()
            .map(|(k, lp)| (k, 10f64.powf(lp)))
            .collect();
        Probs { map }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate_and_total() {
        let mut c = Counts::new();
        c.add("a", 1.0);
        c.add("b", 2.0);
        c.add("a", 1.0);
        assert_eq!(c.get(&"a"), 2.0);
        assert_eq!(c.total(), 4.0);
        assert_eq!(c.singletons(), 0);
        c.add("z", 1.0);
        assert_eq!(c.singletons(), 1);
    }

    #[test]
    fn merge_sums_elementwise() {
        let mut a = Counts::new();
        a.add("x", 3.0);
        a.add("y", 1.0);
        let mut b = Counts::new();
        b.add("x", 2.0);
        b.add("z", 5.0);
        a.merge(b);
        assert_eq!(a.get(&"x"), 5.0);
        assert_eq!(a.get(&"y"), 1.0);
        assert_eq!(a.get(&"z"), 5.0);
    }

    #[test]
    fn normalize_then_log_then_back() {
        let mut c = Counts::new();
        c.add("a", 3.0);
        c.add("b", 1.0);
        let p = c.normalize();
        assert!((p.get(&"a").unwrap() - 0.75).abs() < 1e-12);
        let lp = p.clone().into_log10();
        assert!((lp.get(&"a").unwrap() - 0.75f64.log10()).abs() < 1e-12);
        let back = lp.into_linear();
        for (k, v) in p.iter() {
            assert!((back.get(k).unwrap() - v).abs() < 1e-12);
        }
    }

    #[test]
    fn zero_probability_clamps_to_floor() {
        let mut c = Counts::new();
        c.add("a", 1.0);
        let p = c.normalize_by(|_| 0.0);
        let lp = p.into_log10();
        assert_eq!(lp.get(&"a"), Some(LOG10_ZERO));
    }

    #[test]
    fn interp_matches_linear_blend() {
        let a = 0.5f64.log10();
        let b = 0.25f64.log10();
        let got = log10_interp(a, b, 0.8);
        let want = (0.8_f64 * 0.5 + 0.2 * 0.25).log10();
        assert!((got - want).abs() < 1e-12);
    }

    #[test]
    fn interp_of_two_floors_stays_floored() {
        let got = log10_interp(LOG10_ZERO, LOG10_ZERO, 0.999);
        assert!(got <= LOG10_ZERO + 1e-9);
    }

    #[test]
    fn cost_helpers() {
        assert!((counts_to_cost(6.0, 10.0) - 0.2218487496).abs() < 1e-9);
        assert!((prob_to_cost(0.1) - 1.0).abs() < 1e-12);
        assert!((log10_to_bits(-0.30102999566398) - -1.0).abs() < 1e-9);
    }
}
