// projeto: exertrain
// file: src/neural/model.rs
// Convolutional + recurrent classifier for windowed sensor sequences

use ndarray::{s, Array1, Array2, Array3, Axis};
use rand::rngs::ThreadRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::neural::data::MinMaxScaler;
use crate::neural::metrics::{calculate_accuracy, calculate_cross_entropy};
use crate::neural::utils::{relu_scalar, sigmoid_scalar, softmax, tanh_scalar, RmsPropOptimizer, TrainingError};

pub const CONV_FILTERS: usize = 32;
pub const KERNEL_SIZE: usize = 3;
pub const LSTM_UNITS: usize = 32;

/// Output length of a valid (unpadded) 1-D convolution.
pub fn conv_output_len(input_len: usize, kernel_size: usize, stride: usize) -> usize {
    if input_len < kernel_size {
        0
    } else {
        (input_len - kernel_size) / stride + 1
    }
}

pub struct Conv1dLayer {
    kernels: Array3<f32>, // (filters, in_channels, kernel_size)
    bias: Array1<f32>,
    stride: usize,
}

impl Conv1dLayer {
    pub fn new(
        in_channels: usize,
        filters: usize,
        kernel_size: usize,
        stride: usize,
        rng: &mut ThreadRng,
    ) -> Self {
        let xavier = (2.0 / (in_channels * kernel_size) as f32).sqrt();
        let normal = Normal::new(0.0, xavier).unwrap();
        Self {
            kernels: Array3::from_shape_fn((filters, in_channels, kernel_size), |_| {
                normal.sample(rng)
            }),
            bias: Array1::zeros(filters),
            stride,
        }
    }

    /// (timesteps, in_channels) -> (out_len, filters), ReLU applied.
    pub fn forward(&self, input: &Array2<f32>) -> Array2<f32> {
        let (input_len, in_channels) = input.dim();
        let (filters, _, kernel_size) = self.kernels.dim();
        let out_len = conv_output_len(input_len, kernel_size, self.stride);

        let mut output = Array2::zeros((out_len, filters));
        for f in 0..filters {
            for t in 0..out_len {
                let start = t * self.stride;
                let mut sum = self.bias[f];
                for c in 0..in_channels {
                    for k in 0..kernel_size {
                        sum += input[[start + k, c]] * self.kernels[[f, c, k]];
                    }
                }
                output[[t, f]] = relu_scalar(sum);
            }
        }
        output
    }

    pub fn num_parameters(&self) -> usize {
        self.kernels.len() + self.bias.len()
    }

    pub fn to_weights(&self) -> ConvLayerWeights {
        ConvLayerWeights {
            kernels: self.kernels.clone(),
            bias: self.bias.clone(),
            stride: self.stride,
        }
    }
}

pub struct LstmLayer {
    hidden_size: usize,
    w_input: Array2<f32>,
    u_input: Array2<f32>,
    b_input: Array1<f32>,
    w_forget: Array2<f32>,
    u_forget: Array2<f32>,
    b_forget: Array1<f32>,
    w_output: Array2<f32>,
    u_output: Array2<f32>,
    b_output: Array1<f32>,
    w_cell: Array2<f32>,
    u_cell: Array2<f32>,
    b_cell: Array1<f32>,
}

impl LstmLayer {
    pub fn new(input_size: usize, hidden_size: usize, rng: &mut ThreadRng) -> Self {
        let xavier_input = (2.0 / input_size as f32).sqrt();
        let xavier_hidden = (2.0 / hidden_size as f32).sqrt();
        let normal_input = Normal::new(0.0, xavier_input).unwrap();
        let normal_hidden = Normal::new(0.0, xavier_hidden).unwrap();

        Self {
            hidden_size,
            w_input: Array2::from_shape_fn((hidden_size, input_size), |_| normal_input.sample(rng)),
            u_input: Array2::from_shape_fn((hidden_size, hidden_size), |_| normal_hidden.sample(rng)),
            b_input: Array1::zeros(hidden_size),
            w_forget: Array2::from_shape_fn((hidden_size, input_size), |_| normal_input.sample(rng)),
            u_forget: Array2::from_shape_fn((hidden_size, hidden_size), |_| normal_hidden.sample(rng)),
            b_forget: Array1::ones(hidden_size),
            w_output: Array2::from_shape_fn((hidden_size, input_size), |_| normal_input.sample(rng)),
            u_output: Array2::from_shape_fn((hidden_size, hidden_size), |_| normal_hidden.sample(rng)),
            b_output: Array1::zeros(hidden_size),
            w_cell: Array2::from_shape_fn((hidden_size, input_size), |_| normal_input.sample(rng)),
            u_cell: Array2::from_shape_fn((hidden_size, hidden_size), |_| normal_hidden.sample(rng)),
            b_cell: Array1::zeros(hidden_size),
        }
    }

    pub fn step(
        &self,
        input: &Array1<f32>,
        h_prev: &Array1<f32>,
        c_prev: &Array1<f32>,
    ) -> (Array1<f32>, Array1<f32>) {
        let i_t = (self.w_input.dot(input) + self.u_input.dot(h_prev) + &self.b_input)
            .mapv(sigmoid_scalar);
        let f_t = (self.w_forget.dot(input) + self.u_forget.dot(h_prev) + &self.b_forget)
            .mapv(sigmoid_scalar);
        let o_t = (self.w_output.dot(input) + self.u_output.dot(h_prev) + &self.b_output)
            .mapv(sigmoid_scalar);
        let g_t = (self.w_cell.dot(input) + self.u_cell.dot(h_prev) + &self.b_cell)
            .mapv(tanh_scalar);

        let c_t = &f_t * c_prev + &i_t * &g_t;
        let h_t = &o_t * &c_t.mapv(tanh_scalar);
        (h_t, c_t)
    }

    /// Runs the whole sequence and returns the hidden state at every step.
    pub fn forward_sequence(&self, input: &Array2<f32>) -> Array2<f32> {
        let seq_len = input.nrows();
        let mut outputs = Array2::zeros((seq_len, self.hidden_size));
        let mut h = Array1::zeros(self.hidden_size);
        let mut c = Array1::zeros(self.hidden_size);
        for t in 0..seq_len {
            let x_t = input.row(t).to_owned();
            let (h_new, c_new) = self.step(&x_t, &h, &c);
            outputs.row_mut(t).assign(&h_new);
            h = h_new;
            c = c_new;
        }
        outputs
    }

    /// Runs the whole sequence and keeps only the final hidden state.
    pub fn forward_final(&self, input: &Array2<f32>) -> Array1<f32> {
        let mut h = Array1::zeros(self.hidden_size);
        let mut c = Array1::zeros(self.hidden_size);
        for t in 0..input.nrows() {
            let x_t = input.row(t).to_owned();
            let (h_new, c_new) = self.step(&x_t, &h, &c);
            h = h_new;
            c = c_new;
        }
        h
    }

    pub fn num_parameters(&self) -> usize {
        self.w_input.len()
            + self.u_input.len()
            + self.b_input.len()
            + self.w_forget.len()
            + self.u_forget.len()
            + self.b_forget.len()
            + self.w_output.len()
            + self.u_output.len()
            + self.b_output.len()
            + self.w_cell.len()
            + self.u_cell.len()
            + self.b_cell.len()
    }

    pub fn to_weights(&self) -> LstmLayerWeights {
        LstmLayerWeights {
            w_input: self.w_input.clone(),
            u_input: self.u_input.clone(),
            b_input: self.b_input.clone(),
            w_forget: self.w_forget.clone(),
            u_forget: self.u_forget.clone(),
            b_forget: self.b_forget.clone(),
            w_output: self.w_output.clone(),
            u_output: self.u_output.clone(),
            b_output: self.b_output.clone(),
            w_cell: self.w_cell.clone(),
            u_cell: self.u_cell.clone(),
            b_cell: self.b_cell.clone(),
        }
    }
}

pub struct DenseLayer {
    w: Array2<f32>, // (output_size, input_size)
    b: Array1<f32>,
}

impl DenseLayer {
    pub fn new(input_size: usize, output_size: usize, rng: &mut ThreadRng) -> Self {
        let xavier = (2.0 / input_size as f32).sqrt();
        let normal = Normal::new(0.0, xavier).unwrap();
        Self {
            w: Array2::from_shape_fn((output_size, input_size), |_| normal.sample(rng)),
            b: Array1::zeros(output_size),
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.w.len() + self.b.len()
    }

    pub fn to_weights(&self) -> DenseLayerWeights {
        DenseLayerWeights {
            w: self.w.clone(),
            b: self.b.clone(),
        }
    }
}

/// Two strided 1-D convolutions feeding a stacked LSTM pair, dropout on
/// the final hidden state, dense + softmax over the exercise classes.
pub struct ExerciseModel {
    conv1: Conv1dLayer,
    conv2: Conv1dLayer,
    lstm1: LstmLayer,
    lstm2: LstmLayer,
    dense: DenseLayer,
    dropout_rate: f32,
    timesteps: usize,
    data_dim: usize,
    num_classes: usize,
}

impl ExerciseModel {
    pub fn new(
        timesteps: usize,
        data_dim: usize,
        num_classes: usize,
        dropout_rate: f32,
        rng: &mut ThreadRng,
    ) -> Result<Self, TrainingError> {
        let after_conv1 = conv_output_len(timesteps, KERNEL_SIZE, 2);
        let after_conv2 = conv_output_len(after_conv1, KERNEL_SIZE, 1);
        if after_conv2 == 0 {
            return Err(TrainingError::ModelConfiguration(format!(
                "window length {} is too short for two kernel-{} convolutions",
                timesteps, KERNEL_SIZE
            )));
        }
        if num_classes == 0 {
            return Err(TrainingError::ModelConfiguration(
                "no exercise classes discovered in the training data".to_string(),
            ));
        }

        Ok(Self {
            conv1: Conv1dLayer::new(data_dim, CONV_FILTERS, KERNEL_SIZE, 2, rng),
            conv2: Conv1dLayer::new(CONV_FILTERS, CONV_FILTERS, KERNEL_SIZE, 1, rng),
            lstm1: LstmLayer::new(CONV_FILTERS, LSTM_UNITS, rng),
            lstm2: LstmLayer::new(LSTM_UNITS, LSTM_UNITS, rng),
            dense: DenseLayer::new(LSTM_UNITS, num_classes, rng),
            dropout_rate,
            timesteps,
            data_dim,
            num_classes,
        })
    }

    /// Class probabilities for one (timesteps, data_dim) window.
    pub fn forward(&self, window: &Array2<f32>, training: bool) -> Array1<f32> {
        let (probs, _) = self.forward_with_features(window, training);
        probs
    }

    fn forward_with_features(
        &self,
        window: &Array2<f32>,
        training: bool,
    ) -> (Array1<f32>, Array1<f32>) {
        let conv_out = self.conv2.forward(&self.conv1.forward(window));
        let sequence = self.lstm1.forward_sequence(&conv_out);
        let mut hidden = self.lstm2.forward_final(&sequence);

        if training && self.dropout_rate > 0.0 {
            let mut rng = rand::rng();
            hidden = hidden.mapv(|v| {
                if rng.random::<f32>() < self.dropout_rate {
                    0.0
                } else {
                    v
                }
            });
        }

        let logits = self.dense.w.dot(&hidden) + &self.dense.b;
        (softmax(&logits), hidden)
    }

    /// One batch of categorical cross-entropy training. The dense head
    /// gets exact softmax gradients through the optimizer; the recurrent
    /// gates receive clamped error-scaled bias corrections.
    pub fn train_step(
        &mut self,
        windows: &[Array2<f32>],
        targets: &[Array1<f32>],
        optimizer: &mut RmsPropOptimizer,
    ) -> f32 {
        let batch_len = windows.len().max(1) as f32;
        let mut total_loss = 0.0;
        let mut grad_w = Array2::<f32>::zeros(self.dense.w.dim());
        let mut grad_b = Array1::<f32>::zeros(self.num_classes);

        for (window, target) in windows.iter().zip(targets.iter()) {
            let (probs, hidden) = self.forward_with_features(window, true);
            total_loss += calculate_cross_entropy(&probs.view(), &target.view());

            let grad_logits = &probs - target;
            grad_w = grad_w
                + grad_logits
                    .view()
                    .insert_axis(Axis(1))
                    .dot(&hidden.view().insert_axis(Axis(0)));
            grad_b = grad_b + &grad_logits;
        }
        grad_w /= batch_len;
        grad_b /= batch_len;

        let flat_grad_w: Array1<f32> = grad_w.iter().cloned().collect();
        let update_w = optimizer.update("dense_w", &flat_grad_w);
        for (w, u) in self.dense.w.iter_mut().zip(update_w.iter()) {
            *w -= *u;
        }
        let update_b = optimizer.update("dense_b", &grad_b);
        self.dense.b -= &update_b;

        // error pushed back through the dense weights, applied to the gate
        // biases with a hard clamp; the forget gates keep a positive floor
        let dh = self.dense.w.t().dot(&grad_b);
        for layer in [&mut self.lstm1, &mut self.lstm2] {
            for i in 0..layer.hidden_size {
                let g = (optimizer.learning_rate * dh[i]).clamp(-0.01, 0.01);
                layer.b_input[i] -= g;
                layer.b_output[i] -= g;
                layer.b_cell[i] -= g;
                layer.b_forget[i] = (layer.b_forget[i] - g * 0.5).max(0.1);
            }
        }

        total_loss / batch_len
    }

    /// Mean cross-entropy loss and accuracy over a held-out set.
    pub fn evaluate(&self, windows: &Array3<f32>, targets: &Array2<f32>) -> (f32, f32) {
        let n = windows.dim().0;
        let predictions: Vec<Array1<f32>> = (0..n)
            .into_par_iter()
            .map(|i| self.forward(&windows.slice(s![i, .., ..]).to_owned(), false))
            .collect();

        let loss = predictions
            .iter()
            .zip(targets.outer_iter())
            .map(|(probs, target)| calculate_cross_entropy(&probs.view(), &target))
            .sum::<f32>()
            / n.max(1) as f32;
        let accuracy = calculate_accuracy(&predictions, targets);
        (loss, accuracy)
    }

    pub fn num_parameters(&self) -> usize {
        self.conv1.num_parameters()
            + self.conv2.num_parameters()
            + self.lstm1.num_parameters()
            + self.lstm2.num_parameters()
            + self.dense.num_parameters()
    }

    pub fn to_weights(
        &self,
        future_offset: usize,
        scaler: &MinMaxScaler,
        classes: &[String],
        metadata: TrainingMetadata,
    ) -> ModelWeights {
        ModelWeights {
            model_type: "CNN-LSTM".to_string(),
            architecture: ModelArchitecture {
                timesteps: self.timesteps,
                future_offset,
                data_dim: self.data_dim,
                conv_filters: CONV_FILTERS,
                kernel_size: KERNEL_SIZE,
                lstm_units: LSTM_UNITS,
                num_classes: self.num_classes,
                dropout: self.dropout_rate,
            },
            conv1: self.conv1.to_weights(),
            conv2: self.conv2.to_weights(),
            lstm1: self.lstm1.to_weights(),
            lstm2: self.lstm2.to_weights(),
            dense: self.dense.to_weights(),
            feature_mins: scaler.mins.clone(),
            feature_maxs: scaler.maxs.clone(),
            classes: classes.to_vec(),
            metadata,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConvLayerWeights {
    pub kernels: Array3<f32>,
    pub bias: Array1<f32>,
    pub stride: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LstmLayerWeights {
    pub w_input: Array2<f32>,
    pub u_input: Array2<f32>,
    pub b_input: Array1<f32>,
    pub w_forget: Array2<f32>,
    pub u_forget: Array2<f32>,
    pub b_forget: Array1<f32>,
    pub w_output: Array2<f32>,
    pub u_output: Array2<f32>,
    pub b_output: Array1<f32>,
    pub w_cell: Array2<f32>,
    pub u_cell: Array2<f32>,
    pub b_cell: Array1<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DenseLayerWeights {
    pub w: Array2<f32>,
    pub b: Array1<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArchitecture {
    pub timesteps: usize,
    pub future_offset: usize,
    pub data_dim: usize,
    pub conv_filters: usize,
    pub kernel_size: usize,
    pub lstm_units: usize,
    pub num_classes: usize,
    pub dropout: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrainingMetadata {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub validation_split: f32,
    pub final_train_loss: f32,
    pub final_val_loss: f32,
    pub final_val_accuracy: f32,
    pub training_time: f64,
    pub created_at: String,
}

/// Everything inference needs to reproduce the pipeline: layer weights,
/// scaler statistics, the class list and the run metadata.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelWeights {
    pub model_type: String,
    pub architecture: ModelArchitecture,
    pub conv1: ConvLayerWeights,
    pub conv2: ConvLayerWeights,
    pub lstm1: LstmLayerWeights,
    pub lstm2: LstmLayerWeights,
    pub dense: DenseLayerWeights,
    pub feature_mins: Array1<f32>,
    pub feature_maxs: Array1<f32>,
    pub classes: Vec<String>,
    pub metadata: TrainingMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn toy_metadata() -> TrainingMetadata {
        TrainingMetadata {
            epochs: 1,
            batch_size: 4,
            learning_rate: 0.001,
            validation_split: 0.2,
            final_train_loss: 0.5,
            final_val_loss: 0.6,
            final_val_accuracy: 0.7,
            training_time: 1.0,
            created_at: "2024-01-01T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn test_conv_output_len() {
        assert_eq!(conv_output_len(20, 3, 2), 9);
        assert_eq!(conv_output_len(9, 3, 1), 7);
        assert_eq!(conv_output_len(3, 3, 1), 1);
        assert_eq!(conv_output_len(2, 3, 1), 0);
    }

    #[test]
    fn test_conv_layer_forward_shape() {
        let mut rng = rand::rng();
        let layer = Conv1dLayer::new(2, 8, 3, 2, &mut rng);
        let input = Array2::<f32>::ones((10, 2));
        let output = layer.forward(&input);
        assert_eq!(output.dim(), (4, 8));
        // ReLU output is never negative
        assert!(output.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_model_creation() {
        let mut rng = rand::rng();
        let model = ExerciseModel::new(20, 12, 4, 0.2, &mut rng).unwrap();
        assert!(model.num_parameters() > 0);
    }

    #[test]
    fn test_model_rejects_short_window() {
        let mut rng = rand::rng();
        assert!(ExerciseModel::new(5, 12, 4, 0.2, &mut rng).is_err());
        assert!(ExerciseModel::new(6, 12, 4, 0.2, &mut rng).is_err());
        assert!(ExerciseModel::new(7, 12, 4, 0.2, &mut rng).is_ok());
    }

    #[test]
    fn test_model_rejects_zero_classes() {
        let mut rng = rand::rng();
        assert!(ExerciseModel::new(20, 12, 0, 0.2, &mut rng).is_err());
    }

    #[test]
    fn test_forward_produces_probabilities() {
        let mut rng = rand::rng();
        let model = ExerciseModel::new(20, 12, 3, 0.0, &mut rng).unwrap();
        let window = Array2::<f32>::from_shape_fn((20, 12), |(i, j)| ((i + j) as f32 * 0.05).sin());
        let probs = model.forward(&window, false);
        assert_eq!(probs.len(), 3);
        assert!((probs.sum() - 1.0).abs() < 1e-4);
        assert!(probs.iter().all(|&p| (0.0..=1.0).contains(&p)));
    }

    #[test]
    fn test_train_step_reduces_loss() {
        let mut rng = rand::rng();
        let mut model = ExerciseModel::new(8, 2, 2, 0.0, &mut rng).unwrap();
        let mut optimizer = RmsPropOptimizer::new(0.01, 0.9, 1e-7);

        let mut windows = Vec::new();
        let mut targets = Vec::new();
        for i in 0..20 {
            if i % 2 == 0 {
                windows.push(Array2::from_elem((8, 2), 0.1));
                targets.push(ndarray::arr1(&[1.0, 0.0]));
            } else {
                windows.push(Array2::from_elem((8, 2), 0.9));
                targets.push(ndarray::arr1(&[0.0, 1.0]));
            }
        }

        let initial_loss = model.train_step(&windows, &targets, &mut optimizer);
        let mut final_loss = initial_loss;
        for _ in 0..150 {
            final_loss = model.train_step(&windows, &targets, &mut optimizer);
        }
        assert!(final_loss.is_finite());
        assert!(final_loss < initial_loss);
    }

    #[test]
    fn test_evaluate_shapes() {
        let mut rng = rand::rng();
        let model = ExerciseModel::new(8, 2, 2, 0.0, &mut rng).unwrap();
        let windows = Array3::<f32>::from_elem((5, 8, 2), 0.3);
        let mut targets = Array2::<f32>::zeros((5, 2));
        for mut row in targets.outer_iter_mut() {
            row[0] = 1.0;
        }
        let (loss, accuracy) = model.evaluate(&windows, &targets);
        assert!(loss.is_finite());
        assert!(loss > 0.0);
        assert!((0.0..=1.0).contains(&accuracy));
    }

    #[test]
    fn test_weights_round_trip() {
        let mut rng = rand::rng();
        let model = ExerciseModel::new(20, 12, 3, 0.2, &mut rng).unwrap();
        let scaler = MinMaxScaler {
            mins: Array1::zeros(12),
            maxs: Array1::ones(12),
        };
        let classes = vec!["burpee".to_string(), "situp".to_string(), "squat".to_string()];
        let weights = model.to_weights(10, &scaler, &classes, toy_metadata());

        let json = serde_json::to_string(&weights).unwrap();
        let back: ModelWeights = serde_json::from_str(&json).unwrap();
        assert_eq!(back.model_type, "CNN-LSTM");
        assert_eq!(back.architecture.timesteps, 20);
        assert_eq!(back.architecture.future_offset, 10);
        assert_eq!(back.architecture.num_classes, 3);
        assert_eq!(back.classes, classes);
        assert_eq!(back.dense.w.dim(), (3, LSTM_UNITS));
        assert_eq!(back.conv1.stride, 2);
        assert_eq!(back.conv2.stride, 1);
    }
}
