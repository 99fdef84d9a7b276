use softlabel_training::{
    read_jsonl_samples, write_jsonl_samples, ArtifactKind, DataConfig, FeatureHeadTrainer, Model, RunLayout,
    OwnerTargetPolicy, RunManifest, RunSpec, Sample, StopReason, Trainer, TracingProgressSink, TrainingConfig,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const CLASSES: usize = 4;

/// Two well-separated clusters, each with its own soft target. Owners group
/// two images of the same cluster, so every owner has a single target.
fn synthetic(n: usize, offset: usize) -> Vec<Sample> {
    (0..n)
        .map(|i| {
            let cluster = (i + offset) % 2;
            let jitter = ((i * 7) % 5) as f64 * 0.01;
            let (features, target) = if cluster == 0 {
                (vec![1.0 + jitter, 0.0, 0.5], vec![0.7, 0.2, 0.1, 0.0])
            } else {
                (vec![0.0, 1.0 - jitter, -0.5], vec![0.0, 0.1, 0.3, 0.6])
            };
            Sample { owner: Some(format!("owner-{cluster}-{}", i / 4)), features, target }
        })
        .collect()
}

fn write_splits(dir: &Path) -> DataConfig {
    let train = dir.join("train.jsonl");
    let val = dir.join("val.jsonl");
    write_jsonl_samples(&train, &synthetic(40, 0)).unwrap();
    write_jsonl_samples(&val, &synthetic(10, 1)).unwrap();
    DataConfig { train, val }
}

#[tokio::test]
async fn test_feature_head_run_learns_and_writes_run_directory() {
    let temp = TempDir::new().unwrap();
    let config = TrainingConfig {
        data: write_splits(temp.path()),
        output_dir: temp.path().join("runs"),
        num_classes: CLASSES,
        batch_size: 8,
        epochs: 30,
        patience: 5,
        hidden_dim: 16,
        learning_rates: vec![0.5, 0.5],
        ..TrainingConfig::default()
    };
    let spec = RunSpec::new(config);
    let trainer = FeatureHeadTrainer::new();

    let manifest = trainer.run(&spec, Arc::new(TracingProgressSink)).await.unwrap();
    let layout = RunLayout::new(temp.path().join("runs"));

    // Every epoch is logged.
    let mut reader = csv::Reader::from_path(layout.log_path(&spec.run_id)).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(rows.len(), manifest.metrics.epochs_run);
    if manifest.stop_reason == StopReason::MaxEpochs {
        assert_eq!(rows.len(), 30);
    }

    // The best epoch in the log is the one the manifest reports.
    let best_from_log = rows
        .iter()
        .map(|r| (r[0].parse::<usize>().unwrap(), r[2].parse::<f64>().unwrap()))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap();
    assert_eq!(manifest.metrics.best_epoch, Some(best_from_log.0));

    // Training reduced the validation divergence.
    let first_val: f64 = rows[0][2].parse().unwrap();
    let best_val = manifest.metrics.best_val_loss.unwrap();
    assert!(best_val < first_val, "val kl {first_val} -> {best_val}");
    assert!(manifest.metrics.val.as_ref().unwrap().top1_acc >= 0.9);

    // The saved checkpoint reproduces a model with the right output shape.
    let ckpt = manifest.artifact(&ArtifactKind::BestCheckpoint).unwrap();
    let mut head = softlabel_training::FeedForwardHead::new(3, 16, CLASSES, [0.1, 0.1], 0);
    head.load(&ckpt.path).unwrap();
    let val = read_jsonl_samples(&spec.config.data.val).unwrap();
    let logits = head.predict(&ndarray::Array2::from_shape_vec((1, 3), val[0].features.clone()).unwrap()).unwrap();
    assert_eq!(logits.dim(), (1, CLASSES));

    let on_disk = RunManifest::load(&layout.manifest_path(&spec.run_id)).unwrap();
    assert_eq!(on_disk.artifacts.len(), 3);
}

#[tokio::test]
async fn test_owner_aggregated_unweighted_run() {
    let temp = TempDir::new().unwrap();
    let config = TrainingConfig {
        data: write_splits(temp.path()),
        output_dir: temp.path().join("runs"),
        num_classes: CLASSES,
        batch_size: 8,
        epochs: 2,
        hidden_dim: 4,
        use_class_weights: false,
        aggregate_by_owner: true,
        owner_target_policy: OwnerTargetPolicy::Validate,
        ..TrainingConfig::default()
    };
    let spec = RunSpec::new(config);

    let manifest = FeatureHeadTrainer::new().run(&spec, Arc::new(TracingProgressSink)).await.unwrap();
    assert_eq!(manifest.metrics.epochs_run, 2);
    assert!(manifest.metrics.val.unwrap().kl_mean.is_finite());
}
