// projeto: exertrain
// file: src/neural/storage.rs
// Byte-stream access for local and object-store paths, plus artifact and
// epoch-log persistence

use log::info;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use crate::neural::metrics::EpochMetrics;
use crate::neural::model::ModelWeights;
use crate::neural::utils::TrainingError;

/// The model is always serialized to this fixed local filename first and
/// copied to the job directory afterwards.
pub const MODEL_FILENAME: &str = "model.json";

pub fn is_remote(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

pub fn join_path(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name)
}

/// Opens a readable byte stream over a local file or an object-store URL.
pub fn open_input(path: &str) -> Result<Box<dyn Read>, TrainingError> {
    if is_remote(path) {
        info!("🔌 Fetching training data from {}", path);
        let response = reqwest::blocking::get(path)?.error_for_status()?;
        Ok(Box::new(response))
    } else {
        Ok(Box::new(File::open(path)?))
    }
}

/// Writes a byte buffer to a local path (creating parent directories) or
/// PUTs it to an object-store URL.
pub fn put_bytes(dest: &str, bytes: &[u8]) -> Result<(), TrainingError> {
    if is_remote(dest) {
        let client = reqwest::blocking::Client::new();
        client
            .put(dest)
            .body(bytes.to_vec())
            .send()?
            .error_for_status()?;
    } else {
        if let Some(parent) = Path::new(dest).parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, bytes)?;
    }
    Ok(())
}

/// Stream-copies a local file's bytes to a local or remote destination.
/// Returns the number of bytes copied.
pub fn copy_artifact(local: &str, dest: &str) -> Result<u64, TrainingError> {
    if is_remote(dest) {
        let file = File::open(local)?;
        let len = file.metadata()?.len();
        let client = reqwest::blocking::Client::new();
        client.put(dest).body(file).send()?.error_for_status()?;
        Ok(len)
    } else {
        if let Some(parent) = Path::new(dest).parent() {
            fs::create_dir_all(parent)?;
        }
        let mut input = File::open(local)?;
        let mut output = File::create(dest)?;
        Ok(io::copy(&mut input, &mut output)?)
    }
}

/// Serializes the trained model to the fixed local filename, then copies
/// the bytes into the job directory. Returns the destination path.
pub fn save_model(weights: &ModelWeights, job_dir: &str) -> Result<String, TrainingError> {
    let json = serde_json::to_string_pretty(weights)?;
    fs::write(MODEL_FILENAME, json.as_bytes())?;

    let dest = join_path(job_dir, MODEL_FILENAME);
    let bytes = copy_artifact(MODEL_FILENAME, &dest)?;
    info!("💾 Model artifact ({} bytes) copied to {}", bytes, dest);
    Ok(dest)
}

/// Streams one JSON summary per epoch into a timestamped log directory
/// under the job directory.
pub struct MetricsSink {
    base: String,
}

impl MetricsSink {
    pub fn new(job_dir: &str, run_timestamp: &str) -> Result<Self, TrainingError> {
        let base = join_path(&join_path(job_dir, "logs"), run_timestamp);
        if !is_remote(&base) {
            fs::create_dir_all(&base)?;
        }
        Ok(MetricsSink { base })
    }

    pub fn write_epoch(&self, metrics: &EpochMetrics) -> Result<(), TrainingError> {
        let name = format!("epoch_{:04}.json", metrics.epoch);
        let bytes = serde_json::to_vec_pretty(metrics)?;
        put_bytes(&join_path(&self.base, &name), &bytes)
    }

    pub fn path(&self) -> &str {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://storage.example.com/bucket/data.csv"));
        assert!(is_remote("http://localhost:9000/data.csv"));
        assert!(!is_remote("data.csv"));
        assert!(!is_remote("/var/data/data.csv"));
    }

    #[test]
    fn test_join_path_trims_trailing_slash() {
        assert_eq!(join_path("/tmp/job/", "model.json"), "/tmp/job/model.json");
        assert_eq!(join_path("/tmp/job", "model.json"), "/tmp/job/model.json");
        assert_eq!(
            join_path("https://host/bucket/", "logs"),
            "https://host/bucket/logs"
        );
    }

    #[test]
    fn test_local_put_bytes_creates_parents() {
        let dir = std::env::temp_dir().join(format!("exertrain_put_{}", std::process::id()));
        let dest = dir.join("nested").join("out.bin");
        put_bytes(dest.to_str().unwrap(), b"hello").unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"hello");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_local_copy_artifact() {
        let dir = std::env::temp_dir().join(format!("exertrain_copy_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let src = dir.join("src.bin");
        let dest = dir.join("out").join("dest.bin");
        fs::write(&src, b"artifact bytes").unwrap();

        let copied = copy_artifact(src.to_str().unwrap(), dest.to_str().unwrap()).unwrap();
        assert_eq!(copied, 14);
        assert_eq!(fs::read(&dest).unwrap(), b"artifact bytes");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_open_input_missing_file_errors() {
        let result = open_input("/definitely/not/a/real/path.csv");
        assert!(result.is_err());
    }

    #[test]
    fn test_metrics_sink_writes_epoch_files() {
        let dir = std::env::temp_dir().join(format!("exertrain_sink_{}", std::process::id()));
        let sink = MetricsSink::new(dir.to_str().unwrap(), "2024-01-01T00:00:00+00:00").unwrap();
        let metrics = EpochMetrics {
            epoch: 3,
            train_loss: 0.5,
            val_loss: 0.6,
            val_accuracy: 0.75,
            timestamp: "2024-01-01T00:01:00+00:00".to_string(),
        };
        sink.write_epoch(&metrics).unwrap();

        let written = Path::new(sink.path()).join("epoch_0003.json");
        let content = fs::read_to_string(&written).unwrap();
        assert!(content.contains("\"epoch\": 3"));
        fs::remove_dir_all(&dir).ok();
    }
}
