//! Candle backend.
//!
//! Candle models are ordinary Rust code rather than serialized graphs,
//! so the user supplies the model as a [`CandleModel`] trait object and
//! the adapter handles batch upload, output download and shape checks.
//! Outputs are detached before leaving the adapter; no autograd state
//! and no device handle escape inference.

use candle_core::{DType, Device, Tensor};
use ndarray::{Array2, Array3, ArrayView2};

use crate::backend::Embedder;
use crate::error::{Error, Result};

/// A user-implemented embedding model running on candle.
///
/// `batch` arrives as an f32 tensor of shape (clips, samples) on the
/// device the adapter was built with. Timestamps are milliseconds.
pub trait CandleModel {
    /// The audio sample rate this model consumes.
    fn sample_rate(&self) -> u32;

    /// One embedding per clip, shape (clips, dim).
    fn scene(&self, batch: &Tensor) -> candle_core::Result<Tensor>;

    /// Embeddings (clips, steps, dim) and timestamps (clips, steps).
    fn timestamps(&self, batch: &Tensor) -> candle_core::Result<(Tensor, Tensor)>;
}

/// [`Embedder`] wrapping a [`CandleModel`] and the device it lives on.
pub struct CandleEmbedder {
    model: Box<dyn CandleModel>,
    device: Device,
}

impl CandleEmbedder {
    /// Wraps `model`, whose weights must already live on `device`.
    pub fn new(model: Box<dyn CandleModel>, device: Device) -> Self {
        CandleEmbedder { model, device }
    }

    pub fn cpu(model: Box<dyn CandleModel>) -> Self {
        Self::new(model, Device::Cpu)
    }

    #[cfg(feature = "cuda")]
    pub fn cuda(model: Box<dyn CandleModel>, device_id: usize) -> Result<Self> {
        let device = Device::new_cuda(device_id)?;
        Ok(Self::new(model, device))
    }

    fn upload(&self, batch: ArrayView2<'_, f32>) -> Result<Tensor> {
        let (clips, samples) = batch.dim();
        let flat: Vec<f32> = batch.iter().copied().collect();
        let tensor = Tensor::from_vec(flat, (clips, samples), &self.device)?;
        Ok(tensor)
    }
}

impl Embedder for CandleEmbedder {
    fn sample_rate(&self) -> u32 {
        self.model.sample_rate()
    }

    fn scene_embeddings(&mut self, batch: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        let clips = batch.nrows();
        let input = self.upload(batch)?;
        let output = self.model.scene(&input)?.detach().to_dtype(DType::F32)?;
        let (rows, dim) = output.dims2().map_err(|_| {
            Error::Model(format!(
                "scene model returned rank {} output, expected (clips, dim)",
                output.dims().len()
            ))
        })?;
        if rows != clips {
            return Err(Error::Model(format!(
                "scene model returned {rows} rows for {clips} clips"
            )));
        }
        let rows_vec: Vec<Vec<f32>> = output.to_vec2()?;
        let flat: Vec<f32> = rows_vec.into_iter().flatten().collect();
        Array2::from_shape_vec((rows, dim), flat).map_err(|e| Error::Model(e.to_string()))
    }

    fn timestamp_embeddings(
        &mut self,
        batch: ArrayView2<'_, f32>,
    ) -> Result<(Array3<f32>, Array2<f32>)> {
        let clips = batch.nrows();
        let input = self.upload(batch)?;
        let (embeddings, timestamps) = self.model.timestamps(&input)?;
        let embeddings = embeddings.detach().to_dtype(DType::F32)?;
        let timestamps = timestamps.detach().to_dtype(DType::F32)?;

        let (e_clips, steps, dim) = embeddings.dims3().map_err(|_| {
            Error::Model(format!(
                "timestamp model returned rank {} embeddings, expected (clips, steps, dim)",
                embeddings.dims().len()
            ))
        })?;
        if e_clips != clips {
            return Err(Error::Model(format!(
                "timestamp model returned {e_clips} clips, batch has {clips}"
            )));
        }
        let time_dims = timestamps.dims().to_vec();
        match timestamps.dims2() {
            Ok((t_clips, t_steps)) if t_clips == clips && t_steps == steps => {}
            _ => {
                return Err(Error::Model(format!(
                    "timestamps shaped {time_dims:?} do not match embeddings ({clips}, {steps}, {dim})"
                )));
            }
        }

        let emb_rows: Vec<Vec<Vec<f32>>> = embeddings.to_vec3()?;
        let emb_flat: Vec<f32> = emb_rows.into_iter().flatten().flatten().collect();
        let time_rows: Vec<Vec<f32>> = timestamps.to_vec2()?;
        let time_flat: Vec<f32> = time_rows.into_iter().flatten().collect();

        let embeddings = Array3::from_shape_vec((clips, steps, dim), emb_flat)
            .map_err(|e| Error::Model(e.to_string()))?;
        let timestamps = Array2::from_shape_vec((clips, steps), time_flat)
            .map_err(|e| Error::Model(e.to_string()))?;
        Ok((embeddings, timestamps))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;

    struct ToyModel;

    impl CandleModel for ToyModel {
        fn sample_rate(&self) -> u32 {
            16000
        }

        fn scene(&self, batch: &Tensor) -> candle_core::Result<Tensor> {
            let mean = batch.mean_keepdim(1)?;
            Tensor::cat(&[&mean, &mean.neg()?], 1)
        }

        fn timestamps(&self, batch: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
            let (clips, _) = batch.dims2()?;
            let embeddings = Tensor::zeros((clips, 4, 2), DType::F32, batch.device())?;
            let grid: Vec<f32> = (0..4).map(|i| i as f32 * 100.0).collect();
            let timestamps = Tensor::from_vec(grid, (1, 4), batch.device())?
                .broadcast_as((clips, 4))?;
            Ok((embeddings, timestamps))
        }
    }

    #[test]
    fn scene_outputs_download_with_expected_shape() {
        let mut embedder = CandleEmbedder::cpu(Box::new(ToyModel));
        assert_eq!(embedder.sample_rate(), 16000);
        let batch = Array2::from_elem((2, 8), 0.5f32);
        let scene = embedder.scene_embeddings(batch.view()).unwrap();
        assert_eq!(scene.dim(), (2, 2));
        assert!((scene[[0, 0]] - 0.5).abs() < 1e-6);
        assert!((scene[[1, 1]] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn timestamp_outputs_keep_grid_alignment() {
        let mut embedder = CandleEmbedder::cpu(Box::new(ToyModel));
        let batch = Array2::from_elem((3, 8), 0.1f32);
        let (embeddings, timestamps) = embedder.timestamp_embeddings(batch.view()).unwrap();
        assert_eq!(embeddings.dim(), (3, 4, 2));
        assert_eq!(timestamps.dim(), (3, 4));
        assert_eq!(timestamps[[2, 3]], 300.0);
    }
}
