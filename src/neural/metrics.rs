// projeto: exertrain
// file: src/neural/metrics.rs
// Per-epoch metrics streamed to the job log sink

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f32,
    pub val_loss: f32,
    pub val_accuracy: f32,
    pub timestamp: String,
}

pub fn argmax(x: &ArrayView1<f32>) -> usize {
    let mut best = 0;
    let mut best_val = f32::NEG_INFINITY;
    for (i, &v) in x.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best = i;
        }
    }
    best
}

/// Fraction of predictions whose argmax matches the one-hot target row.
pub fn calculate_accuracy(predictions: &[Array1<f32>], targets: &Array2<f32>) -> f32 {
    let mut correct = 0;
    for (pred, target) in predictions.iter().zip(targets.outer_iter()) {
        if argmax(&pred.view()) == argmax(&target) {
            correct += 1;
        }
    }
    correct as f32 / predictions.len().max(1) as f32
}

pub fn calculate_cross_entropy(probs: &ArrayView1<f32>, target: &ArrayView1<f32>) -> f32 {
    -target
        .iter()
        .zip(probs.iter())
        .map(|(t, p)| t * p.max(1e-8).ln())
        .sum::<f32>()
}
