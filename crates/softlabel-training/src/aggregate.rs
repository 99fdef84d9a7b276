//! Collapse per-image predictions into one prediction per owner.

use crate::error::{TrainingError, TrainingResult};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What to do when samples of one owner carry different targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerTargetPolicy {
    /// Keep the last target observed for the owner.
    #[default]
    LastWins,
    /// Reject owners whose targets differ.
    Validate,
}

/// Largest per-entry difference still treated as the same target.
const TARGET_TOLERANCE: f64 = 1e-6;

struct OwnerGroup {
    prob_sum: Array1<f64>,
    count: usize,
    target: Array1<f64>,
}

/// Streaming group-by-owner mean of probability vectors.
pub struct OwnerAggregator {
    policy: OwnerTargetPolicy,
    index: HashMap<String, usize>,
    owners: Vec<String>,
    groups: Vec<OwnerGroup>,
}

/// Aligned per-owner output: row `i` of `probs` and `targets` belongs to
/// `owners[i]`.
#[derive(Debug, Clone)]
pub struct AggregatedPredictions {
    pub owners: Vec<String>,
    pub probs: Array2<f64>,
    pub targets: Array2<f64>,
}

impl OwnerAggregator {
    #[must_use]
    pub fn new(policy: OwnerTargetPolicy) -> Self {
        Self { policy, index: HashMap::new(), owners: Vec::new(), groups: Vec::new() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn push(
        &mut self,
        owner: &str,
        probs: ArrayView1<'_, f64>,
        target: ArrayView1<'_, f64>,
    ) -> TrainingResult<()> {
        if probs.len() != target.len() {
            return Err(TrainingError::shape_mismatch("owner sample", &[target.len()], &[probs.len()]));
        }

        let Some(&slot) = self.index.get(owner) else {
            self.index.insert(owner.to_string(), self.groups.len());
            self.owners.push(owner.to_string());
            self.groups.push(OwnerGroup {
                prob_sum: probs.to_owned(),
                count: 1,
                target: target.to_owned(),
            });
            return Ok(());
        };

        let group = &mut self.groups[slot];
        if group.prob_sum.len() != probs.len() {
            return Err(TrainingError::shape_mismatch(
                "owner sample",
                &[group.prob_sum.len()],
                &[probs.len()],
            ));
        }
        if self.policy == OwnerTargetPolicy::Validate
            && group.target.iter().zip(target.iter()).any(|(a, b)| (a - b).abs() > TARGET_TOLERANCE)
        {
            return Err(TrainingError::OwnerTargetMismatch { owner: owner.to_string() });
        }
        group.prob_sum += &probs;
        group.count += 1;
        group.target = target.to_owned();
        Ok(())
    }

    /// Feed a whole batch of rows sharing the row order of `owners`.
    pub fn extend(
        &mut self,
        owners: &[String],
        probs: &Array2<f64>,
        targets: &Array2<f64>,
    ) -> TrainingResult<()> {
        if owners.len() != probs.nrows() || probs.nrows() != targets.nrows() {
            return Err(TrainingError::shape_mismatch(
                "owner batch",
                &[owners.len()],
                &[probs.nrows(), targets.nrows()],
            ));
        }
        for (i, owner) in owners.iter().enumerate() {
            self.push(owner, probs.row(i), targets.row(i))?;
        }
        Ok(())
    }

    /// Mean probability vector and target per owner, in first-seen order.
    #[must_use]
    pub fn finish(self) -> AggregatedPredictions {
        let classes = self.groups.first().map_or(0, |g| g.target.len());
        let mut probs = Array2::zeros((self.groups.len(), classes));
        let mut targets = Array2::zeros((self.groups.len(), classes));
        for (i, group) in self.groups.into_iter().enumerate() {
            probs.row_mut(i).assign(&(group.prob_sum / group.count as f64));
            targets.row_mut(i).assign(&group.target);
        }
        AggregatedPredictions { owners: self.owners, probs, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_two_images_of_one_owner_average() {
        let mut agg = OwnerAggregator::new(OwnerTargetPolicy::LastWins);
        let target = array![0.5, 0.5, 0.0];
        agg.push("A", array![1.0, 0.0, 0.0].view(), target.view()).unwrap();
        agg.push("A", array![0.0, 1.0, 0.0].view(), target.view()).unwrap();

        let out = agg.finish();
        assert_eq!(out.owners, vec!["A".to_string()]);
        assert_eq!(out.probs.row(0), array![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_last_target_wins_by_default() {
        let mut agg = OwnerAggregator::new(OwnerTargetPolicy::LastWins);
        agg.push("A", array![1.0, 0.0].view(), array![1.0, 0.0].view()).unwrap();
        agg.push("A", array![1.0, 0.0].view(), array![0.0, 1.0].view()).unwrap();
        let out = agg.finish();
        assert_eq!(out.targets.row(0), array![0.0, 1.0]);
    }

    #[test]
    fn test_validate_policy_rejects_inconsistent_targets() {
        let mut agg = OwnerAggregator::new(OwnerTargetPolicy::Validate);
        agg.push("A", array![1.0, 0.0].view(), array![1.0, 0.0].view()).unwrap();
        let err = agg.push("A", array![1.0, 0.0].view(), array![0.0, 1.0].view()).unwrap_err();
        assert!(matches!(err, TrainingError::OwnerTargetMismatch { owner } if owner == "A"));
    }

    #[test]
    fn test_extend_keeps_owners_separate() {
        let mut agg = OwnerAggregator::new(OwnerTargetPolicy::Validate);
        let owners = vec!["B".to_string(), "A".to_string(), "B".to_string()];
        let probs = array![[0.2, 0.8], [0.9, 0.1], [0.4, 0.6]];
        let targets = array![[0.0, 1.0], [1.0, 0.0], [0.0, 1.0]];
        agg.extend(&owners, &probs, &targets).unwrap();
        assert_eq!(agg.len(), 2);

        let out = agg.finish();
        assert_eq!(out.owners, vec!["B".to_string(), "A".to_string()]);
        assert!((out.probs[[0, 0]] - 0.3).abs() < 1e-12);
        assert_eq!(out.targets.row(1), array![1.0, 0.0]);
    }
}
