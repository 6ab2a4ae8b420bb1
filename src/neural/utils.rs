// projeto: exertrain
// file: src/neural/utils.rs
// Error handling, optimizer and activation functions for the training pipeline

use ndarray::{Array1, ShapeError};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Data processing error: {0}")]
    DataProcessing(String),

    #[error("Model configuration error: {0}")]
    ModelConfiguration(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Shape error: {0}")]
    Shape(String),
}

impl From<ShapeError> for TrainingError {
    fn from(err: ShapeError) -> Self {
        TrainingError::Shape(err.to_string())
    }
}

/// RMSProp with a per-parameter squared-gradient cache. Parameters are
/// addressed by name, so layers can share one optimizer instance.
#[derive(Debug, Clone)]
pub struct RmsPropOptimizer {
    pub learning_rate: f32,
    pub rho: f32,
    pub epsilon: f32,
    cache: HashMap<String, Array1<f32>>,
}

impl RmsPropOptimizer {
    pub fn new(learning_rate: f32, rho: f32, epsilon: f32) -> Self {
        RmsPropOptimizer {
            learning_rate,
            rho,
            epsilon,
            cache: HashMap::new(),
        }
    }

    /// Returns the update to subtract from the parameter.
    pub fn update(&mut self, param_name: &str, gradient: &Array1<f32>) -> Array1<f32> {
        let cache = self
            .cache
            .entry(param_name.to_string())
            .or_insert_with(|| Array1::zeros(gradient.len()));

        *cache = &*cache * self.rho + &gradient.mapv(|g| g * g) * (1.0 - self.rho);

        gradient * self.learning_rate / (cache.mapv(f32::sqrt) + self.epsilon)
    }

    #[allow(dead_code)]
    pub fn reset(&mut self) {
        self.cache.clear();
    }
}

// Saturating activations keep the recurrent cells from overflowing on
// extreme pre-activations.
pub fn sigmoid_scalar(x: f32) -> f32 {
    if x > 500.0 {
        1.0
    } else if x < -500.0 {
        0.0
    } else {
        1.0 / (1.0 + (-x).exp())
    }
}

pub fn tanh_scalar(x: f32) -> f32 {
    if x > 20.0 {
        1.0
    } else if x < -20.0 {
        -1.0
    } else {
        x.tanh()
    }
}

pub fn relu_scalar(x: f32) -> f32 {
    x.max(0.0)
}

pub fn softmax(x: &Array1<f32>) -> Array1<f32> {
    let max = x.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exp = x.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum.max(1e-8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    #[test]
    fn test_rmsprop_update() {
        let mut optimizer = RmsPropOptimizer::new(0.001, 0.9, 1e-7);
        let gradient = Array1::from_vec(vec![0.1, -0.2, 0.3]);
        let update = optimizer.update("dense_w", &gradient);
        assert_eq!(update.len(), 3);
        // the update keeps the gradient's sign
        assert!(update[0] > 0.0);
        assert!(update[1] < 0.0);
        assert!(update[2] > 0.0);
        optimizer.reset();
        let update = optimizer.update("dense_w", &gradient);
        assert_eq!(update.len(), 3);
    }

    #[test]
    fn test_activation_functions() {
        assert!((sigmoid_scalar(0.0) - 0.5).abs() < 1e-6);
        assert_eq!(sigmoid_scalar(1000.0), 1.0);
        assert_eq!(sigmoid_scalar(-1000.0), 0.0);
        assert_eq!(tanh_scalar(100.0), 1.0);
        assert_eq!(tanh_scalar(-100.0), -1.0);
        assert!(tanh_scalar(0.0).abs() < 1e-6);
        assert_eq!(relu_scalar(-2.0), 0.0);
        assert_eq!(relu_scalar(2.0), 2.0);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let logits = Array1::from_vec(vec![1.0, 2.0, 3.0, 4.0]);
        let probs = softmax(&logits);
        assert_eq!(probs.len(), 4);
        assert!((probs.sum() - 1.0).abs() < 1e-5);
        assert!(probs.iter().all(|&p| p >= 0.0 && p <= 1.0));
        // larger logit, larger probability
        assert!(probs[3] > probs[0]);
    }

    #[test]
    fn test_softmax_large_logits() {
        let logits = Array1::from_vec(vec![1000.0, 1001.0]);
        let probs = softmax(&logits);
        assert!(probs.iter().all(|p| p.is_finite()));
        assert!((probs.sum() - 1.0).abs() < 1e-5);
    }
}
