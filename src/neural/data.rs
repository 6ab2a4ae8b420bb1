// projeto: exertrain
// file: src/neural/data.rs
// CSV ingestion, feature scaling, label encoding and sequence windowing

use log::{info, warn};
use ndarray::{s, Array1, Array2, Array3};
use ndarray_stats::QuantileExt;
use rand::rngs::ThreadRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Read;

use crate::neural::utils::TrainingError;

/// Column 0 carries the exercise-type label; column 1 the sub-type, which
/// training ignores.
pub const LABEL_COLUMN: usize = 0;

/// Device sensor readings: xGravity, yGravity, zGravity, xAcceleration,
/// yAcceleration, zAcceleration, pitch, roll, yaw, xRotationRate,
/// yRotationRate, zRotationRate. Columns 14 and beyond hold optional
/// strapped-sensor readings and stay out of the feature set.
pub const FEATURE_COLUMNS: std::ops::Range<usize> = 2..14;

/// Parses the labeled sensor CSV into a feature matrix and the raw label
/// column. Missing and NaN feature cells become 0 before anything else
/// touches them; non-numeric cells abort the run.
pub fn load_training_data<R: Read>(reader: R) -> Result<(Array2<f32>, Vec<String>), TrainingError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let mut values = Vec::new();
    let mut labels = Vec::new();

    for (row, result) in csv_reader.records().enumerate() {
        let record = result?;
        if record.len() < FEATURE_COLUMNS.end {
            return Err(TrainingError::DataProcessing(format!(
                "row {} has {} columns, expected at least {}",
                row + 1,
                record.len(),
                FEATURE_COLUMNS.end
            )));
        }

        labels.push(record.get(LABEL_COLUMN).unwrap_or("").to_string());

        for col in FEATURE_COLUMNS {
            let field = record.get(col).unwrap_or("").trim();
            let value = if field.is_empty() {
                0.0
            } else {
                field.parse::<f32>().map_err(|_| {
                    TrainingError::DataProcessing(format!(
                        "row {} column {} is not numeric: '{}'",
                        row + 1,
                        col,
                        field
                    ))
                })?
            };
            values.push(if value.is_nan() { 0.0 } else { value });
        }
    }

    let features = Array2::from_shape_vec((labels.len(), FEATURE_COLUMNS.len()), values)?;
    info!(
        "📥 Loaded {} samples with {} feature columns",
        features.nrows(),
        features.ncols()
    );
    Ok((features, labels))
}

/// Per-column [0,1] scaling with statistics fit on the full dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub mins: Array1<f32>,
    pub maxs: Array1<f32>,
}

impl MinMaxScaler {
    pub fn fit(data: &Array2<f32>) -> Result<Self, TrainingError> {
        if data.nrows() == 0 {
            return Err(TrainingError::DataProcessing(
                "cannot fit scaler on an empty feature matrix".to_string(),
            ));
        }

        let cols = data.ncols();
        let mut mins = Array1::zeros(cols);
        let mut maxs = Array1::zeros(cols);
        for col in 0..cols {
            let column = data.column(col);
            mins[col] = *column.min().map_err(|e| {
                TrainingError::DataProcessing(format!("column {} has no defined minimum: {}", col, e))
            })?;
            maxs[col] = *column.max().map_err(|e| {
                TrainingError::DataProcessing(format!("column {} has no defined maximum: {}", col, e))
            })?;
        }

        Ok(MinMaxScaler { mins, maxs })
    }

    pub fn transform(&self, data: &mut Array2<f32>) {
        for col in 0..data.ncols() {
            let min = self.mins[col];
            let range = self.maxs[col] - min;
            if range > 1e-8 {
                data.column_mut(col).mapv_inplace(|x| (x - min) / range);
            } else {
                data.column_mut(col).mapv_inplace(|_| 0.0);
            }
        }
    }

    pub fn fit_transform(data: &mut Array2<f32>) -> Result<Self, TrainingError> {
        let scaler = Self::fit(data)?;
        scaler.transform(data);
        Ok(scaler)
    }

    #[allow(dead_code)]
    pub fn inverse_transform(&self, data: &mut Array2<f32>) {
        for col in 0..data.ncols() {
            let min = self.mins[col];
            let range = self.maxs[col] - min;
            data.column_mut(col).mapv_inplace(|x| x * range + min);
        }
    }
}

/// Maps exercise labels to indices over the sorted distinct class set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelEncoder {
    pub classes: Vec<String>,
}

impl LabelEncoder {
    pub fn fit(labels: &[String]) -> Self {
        let mut classes: Vec<String> = labels
            .iter()
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        classes.sort();
        LabelEncoder { classes }
    }

    pub fn transform(&self, labels: &[String]) -> Result<Vec<usize>, TrainingError> {
        labels
            .iter()
            .map(|label| {
                self.classes
                    .iter()
                    .position(|c| c == label)
                    .ok_or_else(|| {
                        TrainingError::DataProcessing(format!("unknown label: '{}'", label))
                    })
            })
            .collect()
    }

    pub fn one_hot(&self, labels: &[String]) -> Result<Array2<f32>, TrainingError> {
        let indices = self.transform(labels)?;
        let mut encoded = Array2::zeros((labels.len(), self.classes.len()));
        for (row, index) in indices.into_iter().enumerate() {
            encoded[[row, index]] = 1.0;
        }
        Ok(encoded)
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }
}

/// Slices N feature rows into N-W+1 overlapping windows of length W. The
/// label of window i sits at row i+W-1-F, so the network learns to name
/// the exercise F rows before the window closes.
pub fn create_windows(
    features: &Array2<f32>,
    labels: &Array2<f32>,
    timesteps: usize,
    future_offset: usize,
) -> Result<(Array3<f32>, Array2<f32>), TrainingError> {
    if features.nrows() != labels.nrows() {
        return Err(TrainingError::DataProcessing(format!(
            "feature rows ({}) and label rows ({}) differ",
            features.nrows(),
            labels.nrows()
        )));
    }
    if future_offset >= timesteps {
        return Err(TrainingError::DataProcessing(format!(
            "future offset {} must be smaller than the window length {}",
            future_offset, timesteps
        )));
    }

    let n = features.nrows();
    let data_dim = features.ncols();
    let num_classes = labels.ncols();

    if n < timesteps {
        warn!(
            "⚠️ Only {} rows for windows of length {}, producing no windows",
            n, timesteps
        );
        return Ok((
            Array3::zeros((0, timesteps, data_dim)),
            Array2::zeros((0, num_classes)),
        ));
    }

    let num_windows = n - timesteps + 1;
    let mut windows = Array3::zeros((num_windows, timesteps, data_dim));
    let mut targets = Array2::zeros((num_windows, num_classes));
    for i in 0..num_windows {
        windows
            .slice_mut(s![i, .., ..])
            .assign(&features.slice(s![i..i + timesteps, ..]));
        targets
            .row_mut(i)
            .assign(&labels.row(i + timesteps - 1 - future_offset));
    }

    info!(
        "🔧 Created {} windows of length {} ({} features each)",
        num_windows, timesteps, data_dim
    );
    Ok((windows, targets))
}

/// Shuffles the training windows and chunks them into owned batches for
/// one epoch.
pub fn create_batches(
    windows: &Array3<f32>,
    targets: &Array2<f32>,
    batch_size: usize,
    rng: &mut ThreadRng,
) -> Vec<(Vec<Array2<f32>>, Vec<Array1<f32>>)> {
    let mut indices: Vec<usize> = (0..windows.dim().0).collect();
    indices.shuffle(rng);
    indices
        .chunks(batch_size.max(1))
        .map(|chunk| {
            let batch_windows = chunk
                .iter()
                .map(|&i| windows.slice(s![i, .., ..]).to_owned())
                .collect();
            let batch_targets = chunk.iter().map(|&i| targets.row(i).to_owned()).collect();
            (batch_windows, batch_targets)
        })
        .collect()
}
