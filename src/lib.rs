//! Audio embedding extraction for evaluation pipelines.
//!
//! Takes a prepared task directory (audio clips, interval or tag
//! annotations, task metadata), runs a pluggable embedding model over
//! every clip, aligns ground-truth labels to the model's timestamp
//! grid, and consolidates each split into one random-access f32 store
//! with row-aligned label lists.
//!
//! Backends implement [`Embedder`]; adapters for ONNX Runtime graphs
//! and candle models ship behind the `onnx` and `candle` features.
//!
#![cfg_attr(feature = "onnx", doc = "```no_run")]
#![cfg_attr(not(feature = "onnx"), doc = "```ignore")]
//! use std::path::Path;
//!
//! use earbank::onnx::OnnxEmbedder;
//! use earbank::task::{embed_task, SilentProgress};
//!
//! let mut backend = OnnxEmbedder::from_pretrained("models/baseline", None)?;
//! let summaries = embed_task(
//!     &mut backend,
//!     Path::new("tasks/dcase2016_task2"),
//!     Path::new("embeddings/baseline/dcase2016_task2"),
//!     &SilentProgress,
//! )?;
//! for summary in &summaries {
//!     println!("{} rows x {} dims", summary.rows, summary.dim);
//! }
//! # Ok::<(), earbank::Error>(())
//! ```

pub mod artifacts;
pub mod audio;
pub mod backend;
#[cfg(feature = "candle")]
pub mod candle;
pub mod consolidate;
pub mod dataset;
pub mod error;
#[cfg(feature = "onnx")]
pub mod execution;
pub mod labels;
pub mod metadata;
pub mod npy;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod task;
pub mod vocab;

pub use backend::Embedder;
#[cfg(feature = "candle")]
pub use candle::{CandleEmbedder, CandleModel};
pub use consolidate::SplitSummary;
pub use dataset::{AudioDataset, Batch};
pub use error::{Error, Result};
#[cfg(feature = "onnx")]
pub use execution::{Accelerator, ExecutionConfig};
pub use labels::{ClipLabels, LabelInterval, LabelPolicy, TimestampLabels};
pub use metadata::{EmbeddingType, PredictionType, TaskMetadata};
#[cfg(feature = "onnx")]
pub use onnx::OnnxEmbedder;
pub use task::{embed_task, ProgressReporter, SilentProgress};
pub use vocab::Vocabulary;
