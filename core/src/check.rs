//! Normalization audits over trained distributions.
//!
//! Every conditional table in a trained model is supposed to sum to 1
//! over its support, or to strictly less than 1 where mass is held
//! back for backoff. A context summing above 1 is always a defect and
//! is reported with its rendered name so it can be traced back to the
//! training data.

use serde::Serialize;
use tracing::{info, warn};

/// Tallies from auditing one distribution.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSums {
    /// Name of the audited distribution.
    pub model: String,
    /// Conditioning contexts examined.
    pub contexts: usize,
    /// Contexts summing to 1 within tolerance.
    pub sum_eq_1: usize,
    /// Contexts holding mass back for backoff.
    pub sum_lt_1: usize,
    /// Contexts above 1, with their sums.
    pub sum_gt_1: Vec<(String, f64)>,
}

impl ModelSums {
    pub fn is_clean(&self) -> bool {
        self.sum_gt_1.is_empty()
    }

    /// Share of contexts in each bucket, as (eq, lt, gt) fractions.
    pub fn ratios(&self) -> (f64, f64, f64) {
        if self.contexts == 0 {
            return (0.0, 0.0, 0.0);
        }
        let n = self.contexts as f64;
        (
            self.sum_eq_1 as f64 / n,
            self.sum_lt_1 as f64 / n,
            self.sum_gt_1.len() as f64 / n,
        )
    }
}

/// Audit results across every distribution of a model.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub epsilon: f64,
    pub models: Vec<ModelSums>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.models.iter().all(ModelSums::is_clean)
    }

    pub fn total_contexts(&self) -> usize {
        self.models.iter().map(|m| m.contexts).sum()
    }

    /// One log line per distribution, plus one per offending context.
    pub fn log_summary(&self) {
        for sums in &self.models {
            let (eq, lt, gt) = sums.ratios();
            info!(
                model = %sums.model,
                contexts = sums.contexts,
                eq_1 = sums.sum_eq_1,
                lt_1 = sums.sum_lt_1,
                gt_1 = sums.sum_gt_1.len(),
                eq_1_share = format_args!("{eq:.3}"),
                lt_1_share = format_args!("{lt:.3}"),
                gt_1_share = format_args!("{gt:.3}"),
                "context sums"
            );
            for (ctx, sum) in &sums.sum_gt_1 {
                warn!(
                    model = %sums.model,
                    context = %ctx,
                    sum,
                    "probability mass above 1"
                );
            }
        }
    }
}
