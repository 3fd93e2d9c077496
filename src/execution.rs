use serde::{Deserialize, Serialize};

use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};

use crate::error::Result;

/// Where ONNX inference runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accelerator {
    Cpu,
    Cuda,
    CoreMl,
}

/// Session-level execution settings, fixed before any inference.
///
/// Requesting an accelerator whose cargo feature is disabled logs a
/// warning and falls back to CPU rather than failing the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub accelerator: Accelerator,
    /// Threads per operator; `None` keeps the runtime default.
    pub intra_threads: Option<usize>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self::cpu()
    }
}

impl ExecutionConfig {
    pub fn cpu() -> Self {
        ExecutionConfig {
            accelerator: Accelerator::Cpu,
            intra_threads: None,
        }
    }

    pub fn cuda() -> Self {
        ExecutionConfig {
            accelerator: Accelerator::Cuda,
            intra_threads: None,
        }
    }

    pub fn coreml() -> Self {
        ExecutionConfig {
            accelerator: Accelerator::CoreMl,
            intra_threads: None,
        }
    }

    pub fn apply_to_session_builder(&self, builder: SessionBuilder) -> Result<SessionBuilder> {
        let mut builder = builder.with_optimization_level(GraphOptimizationLevel::Level3)?;
        if let Some(threads) = self.intra_threads {
            builder = builder.with_intra_threads(threads)?;
        }
        match self.accelerator {
            Accelerator::Cpu => {}
            Accelerator::Cuda => {
                #[cfg(feature = "cuda")]
                {
                    builder = builder.with_execution_providers([
                        ort::execution_providers::CUDAExecutionProvider::default().build(),
                    ])?;
                }
                #[cfg(not(feature = "cuda"))]
                tracing::warn!("CUDA requested but the cuda feature is off; running on CPU");
            }
            Accelerator::CoreMl => {
                #[cfg(feature = "coreml")]
                {
                    builder = builder.with_execution_providers([
                        ort::execution_providers::CoreMLExecutionProvider::default().build(),
                    ])?;
                }
                #[cfg(not(feature = "coreml"))]
                tracing::warn!("CoreML requested but the coreml feature is off; running on CPU");
            }
        }
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_runs_on_cpu() {
        let config = ExecutionConfig::default();
        assert_eq!(config.accelerator, Accelerator::Cpu);
        assert_eq!(config.intra_threads, None);
    }

    #[test]
    fn round_trips_through_json() {
        let config = ExecutionConfig {
            accelerator: Accelerator::Cuda,
            intra_threads: Some(4),
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: ExecutionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.accelerator, Accelerator::Cuda);
        assert_eq!(back.intra_threads, Some(4));
    }
}
