//! Two-pass consolidation of a split's per-file artifacts into one
//! random-access embedding store.
//!
//! Pass one sizes and validates every per-file array and writes the
//! `[rows, dim]` sidecar; pass two fills a memory-mapped store file in
//! the same order and accumulates the row-aligned label and clip
//! reference lists. Files are visited in a seeded-shuffle order so
//! collection order never leaks into row-order statistics.

use std::fs::OpenOptions;
use std::path::Path;

use memmap2::MmapMut;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;
use tracing::{debug, info};

use crate::artifacts;
use crate::error::{Error, Result};
use crate::metadata::{EmbeddingType, PredictionType, TaskMetadata};
use crate::npy;

/// What one consolidated split holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitSummary {
    pub rows: usize,
    pub dim: usize,
}

/// Expected embedding rank for pass-one validation.
fn expected_ndim(embedding_type: EmbeddingType) -> usize {
    match embedding_type {
        EmbeddingType::Scene => 1,
        EmbeddingType::Event | EmbeddingType::Continuous => 2,
    }
}

fn file_rows_and_dim(arr: &npy::NpyArray, embedding_type: EmbeddingType) -> (usize, usize) {
    match embedding_type {
        EmbeddingType::Scene => (1, arr.shape[0]),
        EmbeddingType::Event | EmbeddingType::Continuous => (arr.shape[0], arr.shape[1]),
    }
}

/// Consolidates one split. `workdir` holds the per-file artifacts,
/// `out_dir` receives the split-level ones. `filenames` are the split's
/// clip names; the order they are visited in comes from `rng`, which the
/// caller seeds once per task and threads through every split.
pub fn consolidate_split<R: Rng>(
    workdir: &Path,
    rng: &mut R,
    metadata: &TaskMetadata,
    split_name: &str,
    out_dir: &Path,
    filenames: &[String],
) -> Result<SplitSummary> {
    let mut files: Vec<&String> = filenames.iter().collect();
    files.shuffle(rng);

    // Pass one: size and validate.
    let expected = expected_ndim(metadata.embedding_type);
    let mut rows = 0usize;
    let mut dim: Option<usize> = None;
    for name in &files {
        let path = artifacts::embedding_path(workdir, name);
        if !path.is_file() {
            return Err(Error::artifact(path, "missing embedding artifact"));
        }
        let arr = npy::read(&path)?;
        if arr.ndim() != expected {
            return Err(Error::Dimension(format!(
                "{}: rank {} embedding, {:?} splits need rank {expected}",
                path.display(),
                arr.ndim(),
                metadata.embedding_type
            )));
        }
        let (file_rows, file_dim) = file_rows_and_dim(&arr, metadata.embedding_type);
        match dim {
            None => dim = Some(file_dim),
            Some(d) if d != file_dim => {
                return Err(Error::Dimension(format!(
                    "{}: dimension {file_dim} after earlier files had {d}",
                    path.display()
                )));
            }
            Some(_) => {}
        }
        rows += file_rows;
        debug!(file = name.as_str(), rows = file_rows, "sized embedding artifact");
    }
    let dim = dim.unwrap_or(0);

    // The sidecar goes down before any storage is allocated, so readers
    // can always interpret whatever store file exists.
    artifacts::write_json(
        &artifacts::dimensions_path(out_dir, split_name),
        &(rows, dim),
    )?;

    let store = artifacts::store_path(out_dir, split_name);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&store)?;
    file.set_len((rows * dim * 4) as u64)?;

    let mut labels: Vec<Value> = Vec::with_capacity(rows);
    let mut clip_refs: Vec<(String, f64)> = Vec::new();

    if rows * dim > 0 {
        // Sole writer; nothing else touches the file while it is mapped.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };

        // Pass two: fill in the same shuffled order.
        let mut next_row = 0usize;
        for name in &files {
            let path = artifacts::embedding_path(workdir, name);
            let arr = npy::read(&path)?;
            if arr.ndim() != expected {
                return Err(Error::Dimension(format!(
                    "{}: artifact changed rank between passes",
                    path.display()
                )));
            }
            let (file_rows, file_dim) = file_rows_and_dim(&arr, metadata.embedding_type);
            if file_dim != dim || next_row + file_rows > rows {
                return Err(Error::Dimension(format!(
                    "{}: artifact changed size between passes",
                    path.display()
                )));
            }

            let start = next_row * dim * 4;
            let end = (next_row + file_rows) * dim * 4;
            for (chunk, value) in mmap[start..end].chunks_exact_mut(4).zip(&arr.data) {
                chunk.copy_from_slice(&value.to_le_bytes());
            }
            next_row += file_rows;

            accumulate_labels(
                workdir,
                name,
                file_rows,
                metadata,
                &mut labels,
                &mut clip_refs,
            )?;
        }
        mmap.flush()?;
    } else {
        // Nothing to map; labels may still exist for zero-width rows.
        for name in &files {
            let path = artifacts::embedding_path(workdir, name);
            let arr = npy::read(&path)?;
            if arr.ndim() != expected {
                return Err(Error::Dimension(format!(
                    "{}: artifact changed rank between passes",
                    path.display()
                )));
            }
            let (file_rows, _) = file_rows_and_dim(&arr, metadata.embedding_type);
            accumulate_labels(
                workdir,
                name,
                file_rows,
                metadata,
                &mut labels,
                &mut clip_refs,
            )?;
        }
    }

    artifacts::write_json(&artifacts::split_labels_path(out_dir, split_name), &labels)?;
    if metadata.embedding_type.is_timestamped() {
        debug_assert_eq!(labels.len(), clip_refs.len());
        artifacts::write_json(
            &artifacts::filename_timestamps_path(out_dir, split_name),
            &clip_refs,
        )?;
    }

    info!(
        split = split_name,
        rows,
        dim,
        "consolidated split embeddings"
    );
    Ok(SplitSummary { rows, dim })
}

/// Reads one clip's label (and timestamp) artifacts and extends the
/// split-level lists, enforcing the row-alignment contract.
fn accumulate_labels(
    workdir: &Path,
    name: &str,
    file_rows: usize,
    metadata: &TaskMetadata,
    labels: &mut Vec<Value>,
    clip_refs: &mut Vec<(String, f64)>,
) -> Result<()> {
    let labels_path = artifacts::labels_path(workdir, name);
    let label_text = std::fs::read_to_string(&labels_path)
        .map_err(|e| Error::artifact(&labels_path, format!("cannot read: {e}")))?;

    match metadata.embedding_type {
        EmbeddingType::Scene => {
            let clip_labels: Vec<Value> = serde_json::from_str(&label_text)
                .map_err(|e| Error::artifact(&labels_path, e.to_string()))?;
            if metadata.prediction_type == PredictionType::Multiclass && clip_labels.len() != 1 {
                return Err(Error::artifact(
                    &labels_path,
                    format!(
                        "multiclass clip carries {} labels, exactly one required",
                        clip_labels.len()
                    ),
                ));
            }
            labels.push(Value::Array(clip_labels));
        }
        EmbeddingType::Event | EmbeddingType::Continuous => {
            let step_labels: Vec<Value> = serde_json::from_str(&label_text)
                .map_err(|e| Error::artifact(&labels_path, e.to_string()))?;
            if step_labels.len() != file_rows {
                return Err(Error::Alignment(format!(
                    "{name}: {} label rows for {file_rows} embedding rows",
                    step_labels.len()
                )));
            }

            let ts_path = artifacts::timestamps_path(workdir, name);
            let ts_text = std::fs::read_to_string(&ts_path)
                .map_err(|e| Error::artifact(&ts_path, format!("cannot read: {e}")))?;
            let timestamps: Vec<f64> = serde_json::from_str(&ts_text)
                .map_err(|e| Error::artifact(&ts_path, e.to_string()))?;
            if timestamps.len() != file_rows {
                return Err(Error::Alignment(format!(
                    "{name}: {} timestamps for {file_rows} embedding rows",
                    timestamps.len()
                )));
            }

            labels.extend(step_labels);
            clip_refs.extend(timestamps.into_iter().map(|t| (name.to_string(), t)));
        }
    }
    Ok(())
}
