//! ONNX Runtime backend.
//!
//! A model directory holds up to two inference-only graphs plus a small
//! manifest:
//!
//! ```text
//! model/
//!   embedder.json     { "sample_rate": 16000 }
//!   scene.onnx        input "audio" (clips, samples) -> "embedding" (clips, dim)
//!   timestamp.onnx    input "audio" (clips, samples) -> "embeddings" (clips, steps, dim)
//!                                                       "timestamps" (clips, steps) in ms
//! ```
//!
//! Either graph may be absent; invoking the matching operation then
//! fails before inference. A directory with neither graph is not a
//! usable model at all.

use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, ArrayView2};
use ort::session::Session;
use serde::Deserialize;

use crate::backend::Embedder;
use crate::error::{Error, Result};
use crate::execution::ExecutionConfig;

const INPUT_NAME: &str = "audio";
const SCENE_OUTPUT: &str = "embedding";
const TIMESTAMP_EMB_OUTPUT: &str = "embeddings";
const TIMESTAMP_TIME_OUTPUT: &str = "timestamps";

#[derive(Debug, Deserialize)]
struct EmbedderManifest {
    sample_rate: u32,
}

/// [`Embedder`] backed by ONNX Runtime sessions.
pub struct OnnxEmbedder {
    scene: Option<Session>,
    timestamp: Option<Session>,
    sample_rate: u32,
    model_dir: PathBuf,
}

impl OnnxEmbedder {
    /// Loads a model directory with optional execution configuration.
    ///
    /// # Examples
    /// ```no_run
    /// use earbank::onnx::OnnxEmbedder;
    ///
    /// let embedder = OnnxEmbedder::from_pretrained("models/hear-baseline", None)?;
    /// # Ok::<(), earbank::Error>(())
    /// ```
    pub fn from_pretrained<P: AsRef<Path>>(
        path: P,
        config: Option<ExecutionConfig>,
    ) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(Error::UnsupportedModel(format!(
                "{} is not a model directory",
                path.display()
            )));
        }

        let manifest_path = path.join("embedder.json");
        let manifest_text = std::fs::read_to_string(&manifest_path).map_err(|e| {
            Error::UnsupportedModel(format!(
                "required file 'embedder.json' not readable in {}: {e}",
                path.display()
            ))
        })?;
        let manifest: EmbedderManifest = serde_json::from_str(&manifest_text)
            .map_err(|e| Error::UnsupportedModel(format!("{}: {e}", manifest_path.display())))?;

        let scene_path = path.join("scene.onnx");
        let timestamp_path = path.join("timestamp.onnx");
        if !scene_path.is_file() && !timestamp_path.is_file() {
            return Err(Error::UnsupportedModel(format!(
                "no scene.onnx or timestamp.onnx in {}",
                path.display()
            )));
        }

        let exec_config = config.unwrap_or_default();
        let scene = if scene_path.is_file() {
            let session = Self::build_session(&scene_path, &exec_config)?;
            Self::check_io(&session, &scene_path, &[SCENE_OUTPUT])?;
            Some(session)
        } else {
            None
        };
        let timestamp = if timestamp_path.is_file() {
            let session = Self::build_session(&timestamp_path, &exec_config)?;
            Self::check_io(
                &session,
                &timestamp_path,
                &[TIMESTAMP_EMB_OUTPUT, TIMESTAMP_TIME_OUTPUT],
            )?;
            Some(session)
        } else {
            None
        };

        Ok(Self {
            scene,
            timestamp,
            sample_rate: manifest.sample_rate,
            model_dir: path.to_path_buf(),
        })
    }

    fn build_session(model_path: &Path, config: &ExecutionConfig) -> Result<Session> {
        let session = config
            .apply_to_session_builder(Session::builder()?)?
            .commit_from_file(model_path)?;
        Ok(session)
    }

    /// The loaded graph must speak the fixed IO-name contract; anything
    /// else cannot be driven by this adapter.
    fn check_io(session: &Session, model_path: &Path, outputs: &[&str]) -> Result<()> {
        if !session.inputs.iter().any(|i| i.name == INPUT_NAME) {
            return Err(Error::UnsupportedModel(format!(
                "{}: graph has no input named {INPUT_NAME:?}",
                model_path.display()
            )));
        }
        for wanted in outputs {
            if !session.outputs.iter().any(|o| o.name == *wanted) {
                return Err(Error::UnsupportedModel(format!(
                    "{}: graph has no output named {wanted:?}",
                    model_path.display()
                )));
            }
        }
        Ok(())
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn has_scene(&self) -> bool {
        self.scene.is_some()
    }

    pub fn has_timestamp(&self) -> bool {
        self.timestamp.is_some()
    }

    /// Runs one graph and extracts the named f32 outputs as
    /// (shape, data) pairs, in request order.
    fn run_graph(
        session: &mut Session,
        batch: ArrayView2<'_, f32>,
        names: &[&str],
    ) -> Result<Vec<(Vec<usize>, Vec<f32>)>> {
        let input = ort::value::Value::from_array(batch.to_owned())?;
        let outputs = session.run(ort::inputs!(INPUT_NAME => input))?;
        let mut extracted = Vec::with_capacity(names.len());
        for name in names {
            let (shape, data) = outputs[*name]
                .try_extract_tensor::<f32>()
                .map_err(|e| Error::Model(format!("failed to extract {name:?}: {e}")))?;
            let dims = shape.as_ref().iter().map(|&d| d as usize).collect();
            extracted.push((dims, data.to_vec()));
        }
        Ok(extracted)
    }
}

impl Embedder for OnnxEmbedder {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn scene_embeddings(&mut self, batch: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        let session = self.scene.as_mut().ok_or_else(|| {
            Error::UnsupportedModel(format!(
                "{}: model has no scene.onnx graph",
                self.model_dir.display()
            ))
        })?;
        let clips = batch.nrows();
        let mut extracted = Self::run_graph(session, batch, &[SCENE_OUTPUT])?;
        let (dims, data) = extracted.remove(0);
        match dims.as_slice() {
            [rows, cols] if *rows == clips => {
                Array2::from_shape_vec((*rows, *cols), data)
                    .map_err(|e| Error::Model(e.to_string()))
            }
            [rows, _] => Err(Error::Model(format!(
                "scene graph returned {rows} rows for {clips} clips"
            ))),
            other => Err(Error::Model(format!(
                "scene graph returned rank {} output, expected (clips, dim)",
                other.len()
            ))),
        }
    }

    fn timestamp_embeddings(
        &mut self,
        batch: ArrayView2<'_, f32>,
    ) -> Result<(Array3<f32>, Array2<f32>)> {
        let session = self.timestamp.as_mut().ok_or_else(|| {
            Error::UnsupportedModel(format!(
                "{}: model has no timestamp.onnx graph",
                self.model_dir.display()
            ))
        })?;
        let clips = batch.nrows();
        let mut extracted =
            Self::run_graph(session, batch, &[TIMESTAMP_EMB_OUTPUT, TIMESTAMP_TIME_OUTPUT])?;
        let (time_dims, time_data) = extracted.remove(1);
        let (emb_dims, emb_data) = extracted.remove(0);

        let (e_clips, steps, dim) = match emb_dims.as_slice() {
            [a, b, c] => (*a, *b, *c),
            other => {
                return Err(Error::Model(format!(
                    "timestamp graph returned rank {} embeddings, expected (clips, steps, dim)",
                    other.len()
                )));
            }
        };
        if e_clips != clips {
            return Err(Error::Model(format!(
                "timestamp graph returned {e_clips} clips, batch has {clips}"
            )));
        }
        match time_dims.as_slice() {
            [t_clips, t_steps] if *t_clips == clips && *t_steps == steps => {}
            other => {
                return Err(Error::Model(format!(
                    "timestamps shaped {other:?} do not match embeddings ({clips}, {steps}, {dim})"
                )));
            }
        }

        let embeddings = Array3::from_shape_vec((clips, steps, dim), emb_data)
            .map_err(|e| Error::Model(e.to_string()))?;
        let timestamps = Array2::from_shape_vec((clips, steps), time_data)
            .map_err(|e| Error::Model(e.to_string()))?;
        Ok((embeddings, timestamps))
    }
}
