use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What kind of representation the task expects from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingType {
    /// One embedding per clip.
    Scene,
    /// A timestamped embedding sequence per clip, discrete labels.
    Event,
    /// A timestamped embedding sequence per clip, interpolated numeric labels.
    Continuous,
}

impl EmbeddingType {
    /// Whether this type produces per-timestamp embeddings.
    pub fn is_timestamped(self) -> bool {
        !matches!(self, EmbeddingType::Scene)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionType {
    Multiclass,
    Multilabel,
}

/// Task-level configuration, read once per run from `task_metadata.json`.
///
/// Unknown fields are ignored; unknown values for the typed enums fail at
/// parse time rather than mid-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub embedding_type: EmbeddingType,
    pub prediction_type: PredictionType,
    /// Clip duration in seconds, or `None` when clips vary in length.
    pub sample_duration: Option<f64>,
    /// Split names in processing order.
    pub splits: Vec<String>,
}

impl TaskMetadata {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            Error::Metadata(format!("cannot open {}: {e}", path.display()))
        })?;
        let meta = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::Metadata(format!("{}: {e}", path.display())))?;
        Ok(meta)
    }

    /// Heuristic batch size keeping peak memory roughly constant across
    /// tasks: shorter clips and lower rates pack more clips per batch.
    /// Variable-length tasks always run one clip at a time so batches
    /// stay rectangular.
    pub fn batch_size(&self, sample_rate: u32) -> usize {
        match self.sample_duration {
            Some(duration) => {
                let est =
                    0.7 * (120.0 / duration) * (16000.0 / f64::from(sample_rate));
                (est as usize).max(1)
            }
            None => 1,
        }
    }
}
