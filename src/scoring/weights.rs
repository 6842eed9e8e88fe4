use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{CuratorError, Result};

/// Score assumed for any weighted criterion a scorer did not report.
pub const NEUTRAL_SCORE: u8 = 50;

/// Named criterion weights, normalized so they sum to 100.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriterionWeights {
    weights: BTreeMap<String, f64>,
}

impl CriterionWeights {
    /// Validates raw weights (each in `0..=100`, at least one positive) and
    /// rescales them to sum to 100.
    pub fn new(raw: BTreeMap<String, f64>) -> Result<Self> {
        if raw.is_empty() {
            return Err(CuratorError::Validation("criterion weights must not be empty".into()));
        }
        for (name, weight) in &raw {
            if !weight.is_finite() || !(0.0..=100.0).contains(weight) {
                return Err(CuratorError::Validation(format!(
                    "weight for {name} must be within 0..=100, got {weight}"
                )));
            }
        }
        let total: f64 = raw.values().sum();
        if total <= 0.0 {
            return Err(CuratorError::Validation("criterion weights sum to zero".into()));
        }

        let weights = raw
            .into_iter()
            .map(|(name, weight)| (name, weight * 100.0 / total))
            .collect();
        Ok(Self { weights })
    }

    /// Replaces the weights from a settings update, re-normalizing.
    pub fn update(&mut self, raw: BTreeMap<String, f64>) -> Result<()> {
        *self = Self::new(raw)?;
        Ok(())
    }

    pub fn get(&self, criterion: &str) -> Option<f64> {
        self.weights.get(criterion).copied()
    }

    pub fn criteria(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.weights.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Weighted mean of `criteria` over the weighted criteria, rounded.
    /// Missing criteria count as [`NEUTRAL_SCORE`]; unweighted extras are ignored.
    pub fn aggregate(&self, criteria: &BTreeMap<String, u8>) -> u8 {
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for (name, weight) in &self.weights {
            let score = criteria.get(name).copied().unwrap_or(NEUTRAL_SCORE).min(100);
            numerator += f64::from(score) * weight;
            denominator += weight;
        }
        if denominator <= 0.0 {
            return NEUTRAL_SCORE;
        }
        (numerator / denominator).round().clamp(0.0, 100.0) as u8
    }
}
