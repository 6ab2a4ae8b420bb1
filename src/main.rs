// projeto: exertrain
// file: src/main.rs
// Trains an exercise recognition model on wearable motion-sensor streams:
// load the labeled CSV, scale and window the samples, fit the CNN-LSTM
// classifier and ship the artifact to the job directory.

mod neural;

use chrono::Utc;
use clap::Parser;
use log::{error, info};
use ndarray::s;
use std::time::Instant;

use crate::neural::data::{create_batches, create_windows, load_training_data, LabelEncoder, MinMaxScaler};
use crate::neural::metrics::EpochMetrics;
use crate::neural::model::{ExerciseModel, TrainingMetadata};
use crate::neural::storage::{open_input, save_model, MetricsSink};
use crate::neural::utils::{RmsPropOptimizer, TrainingError};

// model parameters
const EPOCHS: usize = 100;
const BATCH_SIZE: usize = 100;
const VALIDATION_SPLIT: f32 = 0.2;
const DROPOUT: f32 = 0.2;
const TIMESTEPS: usize = 20;
const TIMESTEPS_IN_FUTURE: usize = 10;
const LEARNING_RATE: f32 = 0.001;

#[derive(Parser)]
#[command(
    name = "exertrain",
    about = "Train an exercise recognition model on wearable sensor data",
    version = "0.1.0"
)]
struct Cli {
    /// Local path or object-store URL of the labeled training CSV
    #[arg(long)]
    train_file: String,

    /// Local or remote directory that receives the epoch logs and the
    /// trained model artifact
    #[arg(long)]
    job_dir: String,
}

fn train_model(cli: &Cli) -> Result<(), TrainingError> {
    let total_start = Instant::now();
    let run_timestamp = Utc::now().to_rfc3339();

    let sink = MetricsSink::new(&cli.job_dir, &run_timestamp)?;
    println!("-----------------------");
    println!("Using train_file located at {}", cli.train_file);
    println!("Using logs_path located at {}", sink.path());
    println!("-----------------------");

    // load and preprocess
    let reader = open_input(&cli.train_file)?;
    let (mut features, raw_labels) = load_training_data(reader)?;
    let scaler = MinMaxScaler::fit_transform(&mut features)?;

    let encoder = LabelEncoder::fit(&raw_labels);
    info!(
        "🏷️ Discovered {} exercise classes: {:?}",
        encoder.num_classes(),
        encoder.classes
    );
    let one_hot = encoder.one_hot(&raw_labels)?;

    let (windows, targets) = create_windows(&features, &one_hot, TIMESTEPS, TIMESTEPS_IN_FUTURE)?;
    let num_windows = windows.dim().0;
    if num_windows == 0 {
        return Err(TrainingError::DataProcessing(format!(
            "{} samples produce no windows of length {}",
            features.nrows(),
            TIMESTEPS
        )));
    }

    // hold out the tail as the validation set
    let split_idx = (num_windows as f32 * (1.0 - VALIDATION_SPLIT)) as usize;
    if split_idx == 0 || split_idx == num_windows {
        return Err(TrainingError::DataProcessing(format!(
            "{} windows are too few for a {:.0}% validation split",
            num_windows,
            VALIDATION_SPLIT * 100.0
        )));
    }
    let train_x = windows.slice(s![..split_idx, .., ..]).to_owned();
    let train_y = targets.slice(s![..split_idx, ..]).to_owned();
    let val_x = windows.slice(s![split_idx.., .., ..]).to_owned();
    let val_y = targets.slice(s![split_idx.., ..]).to_owned();
    info!(
        "🧠 Training: {} windows, Validation: {} windows",
        train_x.dim().0,
        val_x.dim().0
    );

    // build the model
    let mut rng = rand::rng();
    let mut model = ExerciseModel::new(
        TIMESTEPS,
        features.ncols(),
        encoder.num_classes(),
        DROPOUT,
        &mut rng,
    )?;
    info!("🏗️ Model initialized with {} parameters", model.num_parameters());

    let mut optimizer = RmsPropOptimizer::new(LEARNING_RATE, 0.9, 1e-7);

    // training loop
    info!("🎯 Starting training for {} epochs...", EPOCHS);
    let mut final_train_loss = 0.0;
    let mut final_val_loss = 0.0;
    let mut final_val_accuracy = 0.0;

    for epoch in 1..=EPOCHS {
        let batches = create_batches(&train_x, &train_y, BATCH_SIZE, &mut rng);
        let mut epoch_loss = 0.0;
        for (batch_windows, batch_targets) in &batches {
            epoch_loss += model.train_step(batch_windows, batch_targets, &mut optimizer);
        }
        epoch_loss /= batches.len().max(1) as f32;

        if !epoch_loss.is_finite() {
            return Err(TrainingError::Training(format!(
                "loss diverged at epoch {}",
                epoch
            )));
        }

        let (val_loss, val_accuracy) = model.evaluate(&val_x, &val_y);
        sink.write_epoch(&EpochMetrics {
            epoch,
            train_loss: epoch_loss,
            val_loss,
            val_accuracy,
            timestamp: Utc::now().to_rfc3339(),
        })?;

        if epoch % 5 == 0 || epoch <= 10 {
            info!(
                "📈 Epoch {:3}/{}: Train Loss: {:.6}, Val Loss: {:.6}, Val Acc: {:.1}%",
                epoch,
                EPOCHS,
                epoch_loss,
                val_loss,
                val_accuracy * 100.0
            );
        }

        final_train_loss = epoch_loss;
        final_val_loss = val_loss;
        final_val_accuracy = val_accuracy;
    }

    // persist the artifact
    let metadata = TrainingMetadata {
        epochs: EPOCHS,
        batch_size: BATCH_SIZE,
        learning_rate: LEARNING_RATE,
        validation_split: VALIDATION_SPLIT,
        final_train_loss,
        final_val_loss,
        final_val_accuracy,
        training_time: total_start.elapsed().as_secs_f64(),
        created_at: Utc::now().to_rfc3339(),
    };
    let weights = model.to_weights(TIMESTEPS_IN_FUTURE, &scaler, &encoder.classes, metadata);
    let artifact_path = save_model(&weights, &cli.job_dir)?;

    println!("\n✅ Training completed!");
    println!("   📊 Final train loss: {:.6}", final_train_loss);
    println!("   📊 Final val loss: {:.6}", final_val_loss);
    println!("   🎯 Final val accuracy: {:.1}%", final_val_accuracy * 100.0);
    println!("   💾 Model saved to: {}", artifact_path);
    println!("   📈 Epoch logs in: {}", sink.path());
    println!("   ⏱️ Total time: {:.1}s", total_start.elapsed().as_secs_f64());

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();
    info!("🚀 Starting exercise recognition training");
    info!(
        "  Timesteps: {} (label {} rows before the window closes)",
        TIMESTEPS, TIMESTEPS_IN_FUTURE
    );
    info!(
        "  Epochs: {}  Batch size: {}  Learning rate: {}  Dropout: {}",
        EPOCHS, BATCH_SIZE, LEARNING_RATE, DROPOUT
    );

    train_model(&cli).map_err(|e| {
        error!("❌ Training failed: {}", e);
        Box::new(e) as Box<dyn std::error::Error>
    })
}

// Example usage:
// cargo run --release -- --train-file data.csv --job-dir ./tmp/exertrain
// cargo run --release -- --train-file https://storage.example.com/sensors/data.csv --job-dir https://storage.example.com/jobs/run-42

// RUST_LOG=debug cargo run -- --train-file data.csv --job-dir ./tmp/exertrain
