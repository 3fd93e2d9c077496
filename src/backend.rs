use ndarray::{Array2, Array3, ArrayView2};

use crate::error::Result;

/// A loaded embedding model.
///
/// Implementations own all runtime state (sessions, devices, weights);
/// nothing runtime-specific appears in the signatures, so callers can
/// swap backends without touching pipeline code. Inference takes
/// `&mut self`: a backend serves one batch at a time.
///
/// Inputs are rectangular audio batches of shape (clips, samples) at
/// [`sample_rate`](Embedder::sample_rate). Timestamps are milliseconds
/// from clip start, matching the unit of label annotations.
pub trait Embedder {
    /// The audio sample rate this model consumes.
    fn sample_rate(&self) -> u32;

    /// One embedding per clip, shape (clips, dim).
    fn scene_embeddings(&mut self, batch: ArrayView2<'_, f32>) -> Result<Array2<f32>>;

    /// A timestamped embedding sequence per clip: embeddings of shape
    /// (clips, steps, dim) and timestamps of shape (clips, steps).
    fn timestamp_embeddings(
        &mut self,
        batch: ArrayView2<'_, f32>,
    ) -> Result<(Array3<f32>, Array2<f32>)>;
}
