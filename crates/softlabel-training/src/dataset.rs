use crate::error::{TrainingError, TrainingResult};
use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Stable identifier for a dataset (content hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub String);

/// One observed input with its soft target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Grouping key; images sharing an owner are evaluated as one unit.
    #[serde(default)]
    pub owner: Option<String>,
    pub features: Vec<f64>,
    pub target: Vec<f64>,
}

/// A stacked slice of samples: `inputs` is N×D, `targets` is N×C.
#[derive(Debug, Clone)]
pub struct Batch {
    pub inputs: Array2<f64>,
    pub targets: Array2<f64>,
    pub owners: Vec<Option<String>>,
}

impl Batch {
    pub fn from_samples(samples: &[&Sample]) -> TrainingResult<Self> {
        let Some(first) = samples.first() else {
            return Err(TrainingError::Dataset("cannot build an empty batch".to_string()));
        };
        let dim = first.features.len();
        let classes = first.target.len();

        let mut inputs = Array2::zeros((samples.len(), dim));
        let mut targets = Array2::zeros((samples.len(), classes));
        let mut owners = Vec::with_capacity(samples.len());
        for (i, sample) in samples.iter().enumerate() {
            if sample.features.len() != dim {
                return Err(TrainingError::shape_mismatch("features", &[dim], &[sample.features.len()]));
            }
            if sample.target.len() != classes {
                return Err(TrainingError::shape_mismatch("target", &[classes], &[sample.target.len()]));
            }
            for (j, &v) in sample.features.iter().enumerate() {
                inputs[[i, j]] = v;
            }
            for (j, &v) in sample.target.iter().enumerate() {
                targets[[i, j]] = v;
            }
            owners.push(sample.owner.clone());
        }
        Ok(Self { inputs, targets, owners })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inputs.nrows() == 0
    }
}

/// Re-iterable source of batches for one split.
pub trait DataSource {
    /// Number of samples in the split.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn num_classes(&self) -> usize;

    /// All batches of one epoch. With `shuffle` the sample order is permuted
    /// using `rng`; otherwise the stored order is kept.
    fn batches(&self, shuffle: bool, rng: &mut dyn RngCore) -> TrainingResult<Vec<Batch>>;
}

/// A split held fully in memory.
#[derive(Debug, Clone)]
pub struct InMemoryDataSource {
    samples: Vec<Sample>,
    batch_size: usize,
}

impl InMemoryDataSource {
    pub fn new(samples: Vec<Sample>, batch_size: usize) -> TrainingResult<Self> {
        validate_samples(&samples)?;
        if batch_size == 0 {
            return Err(TrainingError::InvalidConfig("batch_size must be >= 1".to_string()));
        }
        Ok(Self { samples, batch_size })
    }

    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// All targets stacked into one N×C matrix.
    #[must_use]
    pub fn target_matrix(&self) -> Array2<f64> {
        let classes = self.num_classes();
        let mut out = Array2::zeros((self.samples.len(), classes));
        for (i, sample) in self.samples.iter().enumerate() {
            for (j, &v) in sample.target.iter().enumerate() {
                out[[i, j]] = v;
            }
        }
        out
    }
}

impl DataSource for InMemoryDataSource {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn num_classes(&self) -> usize {
        self.samples.first().map_or(0, |s| s.target.len())
    }

    fn batches(&self, shuffle: bool, rng: &mut dyn RngCore) -> TrainingResult<Vec<Batch>> {
        let mut order: Vec<&Sample> = self.samples.iter().collect();
        if shuffle {
            order.shuffle(rng);
        }
        order.chunks(self.batch_size).map(Batch::from_samples).collect()
    }
}

pub fn compute_dataset_id(samples: &[Sample]) -> TrainingResult<DatasetId> {
    let mut hasher = Sha256::new();

    for sample in samples {
        let bytes = serde_json::to_vec(sample)?;
        hasher.update(bytes);
        hasher.update(b"\n");
    }

    Ok(DatasetId(hex::encode(hasher.finalize())))
}

pub fn validate_samples(samples: &[Sample]) -> TrainingResult<()> {
    let Some(first) = samples.first() else {
        return Err(TrainingError::Dataset("dataset must not be empty".to_string()));
    };
    for (idx, sample) in samples.iter().enumerate() {
        if sample.features.len() != first.features.len() {
            return Err(TrainingError::Dataset(format!(
                "sample[{idx}] has {} features, expected {}",
                sample.features.len(),
                first.features.len()
            )));
        }
        if sample.target.len() != first.target.len() {
            return Err(TrainingError::Dataset(format!(
                "sample[{idx}] has {} target classes, expected {}",
                sample.target.len(),
                first.target.len()
            )));
        }
        if sample.target.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(TrainingError::Dataset(format!("sample[{idx}] target has negative or non-finite entries")));
        }
        if sample.features.iter().any(|v| !v.is_finite()) {
            return Err(TrainingError::Dataset(format!("sample[{idx}] features are not finite")));
        }
    }
    Ok(())
}

/// Read samples from a JSONL file, one [`Sample`] per non-empty line.
pub fn read_jsonl_samples(path: &Path) -> TrainingResult<Vec<Sample>> {
    let contents = std::fs::read_to_string(path)?;
    let mut samples = Vec::new();

    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let sample: Sample = serde_json::from_str(line).map_err(|e| {
            TrainingError::Dataset(format!("failed to parse {} line {}: {}", path.display(), idx + 1, e))
        })?;
        samples.push(sample);
    }

    Ok(samples)
}

pub fn write_jsonl_samples(path: &Path, samples: &[Sample]) -> TrainingResult<()> {
    let mut out = String::new();
    for sample in samples {
        out.push_str(&serde_json::to_string(sample)?);
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn sample(owner: &str, x: f64) -> Sample {
        Sample { owner: Some(owner.to_string()), features: vec![x, -x], target: vec![0.25, 0.75] }
    }

    #[test]
    fn test_validate_samples_rejects_empty() {
        assert!(validate_samples(&[]).is_err());
    }

    #[test]
    fn test_validate_samples_rejects_ragged_targets() {
        let mut bad = sample("a", 1.0);
        bad.target.push(0.0);
        assert!(validate_samples(&[sample("a", 0.0), bad]).is_err());
    }

    #[test]
    fn test_batches_cover_every_sample_with_short_tail() {
        let samples: Vec<_> = (0..5).map(|i| sample("o", f64::from(i))).collect();
        let source = InMemoryDataSource::new(samples, 2).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let batches = source.batches(true, &mut rng).unwrap();
        let sizes: Vec<_> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);

        let mut seen: Vec<f64> = batches.iter().flat_map(|b| b.inputs.column(0).to_vec()).collect();
        seen.sort_by(f64::total_cmp);
        assert_eq!(seen, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_unshuffled_batches_keep_order() {
        let samples: Vec<_> = (0..3).map(|i| sample(&format!("o{i}"), f64::from(i))).collect();
        let source = InMemoryDataSource::new(samples, 8).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let batches = source.batches(false, &mut rng).unwrap();
        let owners: Vec<_> = batches[0].owners.iter().flatten().map(String::as_str).collect();
        assert_eq!(owners, vec!["o0", "o1", "o2"]);
    }

    #[test]
    fn test_jsonl_round_trip_and_stable_id() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("train.jsonl");
        let samples = vec![sample("a", 1.0), Sample { owner: None, features: vec![0.0, 0.0], target: vec![1.0, 0.0] }];
        write_jsonl_samples(&path, &samples).unwrap();

        let loaded = read_jsonl_samples(&path).unwrap();
        assert_eq!(loaded, samples);
        assert_eq!(compute_dataset_id(&loaded).unwrap(), compute_dataset_id(&samples).unwrap());
    }
}
