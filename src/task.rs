//! Task driver: decode → embed → align → persist → consolidate, split
//! by split, over a prepared task directory.
//!
//! A task directory holds `task_metadata.json`, `labelvocabulary.csv`,
//! one `<split>.json` per split, and audio under `<rate>/<split>/`.
//! The driver mirrors the metadata, vocabulary and split JSONs into the
//! output directory so downstream evaluation is self-contained.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use rand::SeedableRng;
use rand_pcg::Pcg32;
use tracing::info;

use crate::artifacts;
use crate::backend::Embedder;
use crate::consolidate::{consolidate_split, SplitSummary};
use crate::dataset::AudioDataset;
use crate::error::{Error, Result};
use crate::labels::{labels_for_timestamps, ClipLabels, LabelPolicy};
use crate::metadata::{EmbeddingType, PredictionType, TaskMetadata};
use crate::vocab::Vocabulary;

/// Observes pipeline progress. Every method defaults to a no-op, so
/// implementors pick only what they need; the library itself never
/// draws progress output.
pub trait ProgressReporter {
    fn split_started(&self, _split: &str, _clips: usize) {}
    fn batch_embedded(&self, _split: &str, _clips: usize) {}
    fn split_consolidated(&self, _split: &str, _summary: &SplitSummary) {}
}

/// The quiet default reporter.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {}

/// Runs the full embedding pipeline for one task.
///
/// Reads `task_dir`, writes per-file artifacts to `out_dir/<split>/`
/// and split-level artifacts to `out_dir`, and returns one summary per
/// split in metadata order. Any error aborts the run; partial output
/// directories should be regenerated, not resumed.
pub fn embed_task<E, P>(
    backend: &mut E,
    task_dir: &Path,
    out_dir: &Path,
    progress: &P,
) -> Result<Vec<SplitSummary>>
where
    E: Embedder + ?Sized,
    P: ProgressReporter + ?Sized,
{
    let metadata_path = task_dir.join("task_metadata.json");
    let metadata = TaskMetadata::load(&metadata_path)?;

    fs::create_dir_all(out_dir)?;
    fs::copy(&metadata_path, out_dir.join("task_metadata.json"))?;

    let vocab_path = task_dir.join("labelvocabulary.csv");
    let vocab = if vocab_path.is_file() {
        fs::copy(&vocab_path, out_dir.join("labelvocabulary.csv"))?;
        Vocabulary::load(&vocab_path)?
    } else {
        Vocabulary::default()
    };

    let policy = alignment_policy(&metadata, &vocab)?;

    let sample_rate = backend.sample_rate();
    let mut rng = Pcg32::seed_from_u64(0);
    let mut summaries = Vec::with_capacity(metadata.splits.len());

    for split in &metadata.splits {
        let split_path = task_dir.join(format!("{split}.json"));
        if !split_path.is_file() {
            return Err(Error::Metadata(format!(
                "split file {} is missing",
                split_path.display()
            )));
        }
        fs::copy(&split_path, out_dir.join(format!("{split}.json")))?;

        let split_data: BTreeMap<String, ClipLabels> =
            serde_json::from_str(&fs::read_to_string(&split_path)?)
                .map_err(|e| Error::Metadata(format!("{}: {e}", split_path.display())))?;
        let filenames: Vec<String> = split_data.keys().cloned().collect();

        let audio_dir = task_dir.join(sample_rate.to_string()).join(split);
        let batch_size = metadata.batch_size(sample_rate);
        info!(
            split = split.as_str(),
            clips = filenames.len(),
            batch_size,
            "embedding split"
        );
        progress.split_started(split, filenames.len());

        let workdir = out_dir.join(split);
        fs::create_dir_all(&workdir)?;

        let dataset = AudioDataset::new(&audio_dir, filenames.clone(), sample_rate);
        for batch in dataset.batches(batch_size) {
            let batch = batch?;
            match &policy {
                None => {
                    let embeddings = backend.scene_embeddings(batch.samples.view())?;
                    let mut tags: Vec<&[String]> = Vec::with_capacity(batch.filenames.len());
                    for name in &batch.filenames {
                        tags.push(clip_labels(&split_data, split, name)?.tags()?);
                    }
                    artifacts::save_scene_batch(
                        &workdir,
                        &batch.filenames,
                        embeddings.view(),
                        &tags,
                    )?;
                }
                Some(policy) => {
                    let (embeddings, timestamps) =
                        backend.timestamp_embeddings(batch.samples.view())?;
                    let mut aligned = Vec::with_capacity(batch.filenames.len());
                    for (i, name) in batch.filenames.iter().enumerate() {
                        let events = clip_labels(&split_data, split, name)?.events()?;
                        let grid = timestamps.row(i).to_vec();
                        aligned.push(labels_for_timestamps(events, &grid, policy)?);
                    }
                    artifacts::save_timestamp_batch(
                        &workdir,
                        &batch.filenames,
                        embeddings.view(),
                        timestamps.view(),
                        &aligned,
                    )?;
                }
            }
            progress.batch_embedded(split, batch.filenames.len());
        }

        let summary = consolidate_split(
            &workdir,
            &mut rng,
            &metadata,
            split,
            out_dir,
            &filenames,
        )?;
        progress.split_consolidated(split, &summary);
        summaries.push(summary);
    }

    Ok(summaries)
}

/// Scene tasks need no alignment; event tasks stabilize to one label
/// per timestamp when the task is multiclass, using the vocabulary's
/// fallback class; continuous tasks interpolate.
fn alignment_policy(metadata: &TaskMetadata, vocab: &Vocabulary) -> Result<Option<LabelPolicy>> {
    if !metadata.embedding_type.is_timestamped() {
        return Ok(None);
    }
    let onehot = if metadata.embedding_type == EmbeddingType::Event
        && metadata.prediction_type == PredictionType::Multiclass
    {
        let fallback = vocab.default_label().ok_or_else(|| {
            Error::Metadata("multiclass task requires a label vocabulary".into())
        })?;
        Some(fallback.to_string())
    } else {
        None
    };
    let mode = if metadata.embedding_type == EmbeddingType::Continuous {
        "continuous"
    } else {
        "default"
    };
    Ok(Some(LabelPolicy::from_name(mode, onehot)?))
}

fn clip_labels<'a>(
    split_data: &'a BTreeMap<String, ClipLabels>,
    split: &str,
    name: &str,
) -> Result<&'a ClipLabels> {
    split_data.get(name).ok_or_else(|| {
        Error::Metadata(format!("{split}.json has no entry for clip {name:?}"))
    })
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, Array3, ArrayView2};

    use super::*;

    struct NullBackend;

    impl Embedder for NullBackend {
        fn sample_rate(&self) -> u32 {
            16000
        }

        fn scene_embeddings(&mut self, batch: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
            Ok(Array2::zeros((batch.nrows(), 2)))
        }

        fn timestamp_embeddings(
            &mut self,
            batch: ArrayView2<'_, f32>,
        ) -> Result<(Array3<f32>, Array2<f32>)> {
            Ok((
                Array3::zeros((batch.nrows(), 2, 2)),
                Array2::zeros((batch.nrows(), 2)),
            ))
        }
    }

    #[test]
    fn missing_metadata_fails_before_any_work() {
        let task = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let err = embed_task(&mut NullBackend, task.path(), out.path(), &SilentProgress)
            .expect_err("no metadata on disk");
        assert!(matches!(err, Error::Metadata(_)));
    }

    #[test]
    fn missing_split_file_fails_loudly() {
        let task = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(
            task.path().join("task_metadata.json"),
            r#"{
                "embedding_type": "scene",
                "prediction_type": "multilabel",
                "sample_duration": 2.0,
                "splits": ["train"]
            }"#,
        )
        .unwrap();
        let err = embed_task(&mut NullBackend, task.path(), out.path(), &SilentProgress)
            .expect_err("train.json is absent");
        assert!(err.to_string().contains("train.json"));
    }

    #[test]
    fn multiclass_event_task_requires_vocabulary() {
        let task = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(
            task.path().join("task_metadata.json"),
            r#"{
                "embedding_type": "event",
                "prediction_type": "multiclass",
                "sample_duration": 2.0,
                "splits": ["train"]
            }"#,
        )
        .unwrap();
        std::fs::write(task.path().join("train.json"), "{}").unwrap();
        let err = embed_task(&mut NullBackend, task.path(), out.path(), &SilentProgress)
            .expect_err("no vocabulary for the fallback class");
        assert!(err.to_string().contains("vocabulary"));
    }
}
