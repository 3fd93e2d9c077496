//! Artifact naming and the per-file persister.
//!
//! Per clip `<name>` (the audio filename) in a split's working directory:
//!
//! ```text
//! <name>.embedding.npy        f32 array, (dim,) scene / (steps, dim) timestamped
//! <name>.target-labels.json   clip tags (scene) / per-timestamp labels
//! <name>.timestamps.json      timestamp grid in ms (timestamped only)
//! ```
//!
//! Split-level, in the task output directory:
//!
//! ```text
//! <split>.embedding-dimensions.json   [rows, dim]
//! <split>.embeddings.raw              flat f32 LE, row-major (rows, dim)
//! <split>.target-labels.json          one entry per row
//! <split>.filename-timestamps.json    [clip name, ms] per row (timestamped only)
//! ```

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use ndarray::{ArrayView2, ArrayView3, Axis};
use serde::Serialize;

use crate::error::Result;
use crate::labels::TimestampLabels;
use crate::npy;

pub fn embedding_path(dir: &Path, filename: &str) -> PathBuf {
    dir.join(format!("{filename}.embedding.npy"))
}

pub fn labels_path(dir: &Path, filename: &str) -> PathBuf {
    dir.join(format!("{filename}.target-labels.json"))
}

pub fn timestamps_path(dir: &Path, filename: &str) -> PathBuf {
    dir.join(format!("{filename}.timestamps.json"))
}

pub fn dimensions_path(dir: &Path, split: &str) -> PathBuf {
    dir.join(format!("{split}.embedding-dimensions.json"))
}

pub fn store_path(dir: &Path, split: &str) -> PathBuf {
    dir.join(format!("{split}.embeddings.raw"))
}

pub fn split_labels_path(dir: &Path, split: &str) -> PathBuf {
    dir.join(format!("{split}.target-labels.json"))
}

pub fn filename_timestamps_path(dir: &Path, split: &str) -> PathBuf {
    dir.join(format!("{split}.filename-timestamps.json"))
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = BufWriter::new(File::create(path)?);
    serde_json::to_writer(file, value)?;
    Ok(())
}

/// Persists one scene batch: a (clips, dim) embedding block plus each
/// clip's tag list. The inputs come from the same batch, so disagreement
/// in length is a bug in the caller, not a runtime condition.
pub fn save_scene_batch(
    outdir: &Path,
    filenames: &[String],
    embeddings: ArrayView2<'_, f32>,
    labels: &[&[String]],
) -> Result<()> {
    assert_eq!(
        embeddings.nrows(),
        filenames.len(),
        "scene batch: embedding rows and filenames diverge"
    );
    assert_eq!(
        labels.len(),
        filenames.len(),
        "scene batch: labels and filenames diverge"
    );
    for (i, filename) in filenames.iter().enumerate() {
        let row = embeddings.row(i).to_vec();
        npy::write_1d(embedding_path(outdir, filename), &row)?;
        write_json(&labels_path(outdir, filename), &labels[i])?;
    }
    Ok(())
}

/// Persists one timestamped batch: (clips, steps, dim) embeddings, the
/// (clips, steps) timestamp grid, and per-timestamp labels per clip.
pub fn save_timestamp_batch(
    outdir: &Path,
    filenames: &[String],
    embeddings: ArrayView3<'_, f32>,
    timestamps: ArrayView2<'_, f32>,
    labels: &[TimestampLabels],
) -> Result<()> {
    let (clips, steps, _) = embeddings.dim();
    assert_eq!(
        clips,
        filenames.len(),
        "timestamp batch: embedding clips and filenames diverge"
    );
    assert_eq!(
        timestamps.dim(),
        (clips, steps),
        "timestamp batch: timestamp grid does not match embeddings"
    );
    assert_eq!(
        labels.len(),
        filenames.len(),
        "timestamp batch: labels and filenames diverge"
    );
    for (i, filename) in filenames.iter().enumerate() {
        assert_eq!(
            labels[i].len(),
            steps,
            "timestamp batch: {filename} has label rows for a different grid"
        );
        npy::write_2d(
            embedding_path(outdir, filename),
            embeddings.index_axis(Axis(0), i),
        )?;
        write_json(&timestamps_path(outdir, filename), &timestamps.row(i).to_vec())?;
        write_json(&labels_path(outdir, filename), &labels[i])?;
    }
    Ok(())
}
