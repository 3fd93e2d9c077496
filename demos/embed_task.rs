/*
Embeds every split of a prepared task directory with an ONNX model.

cargo run --example embed_task -- ./model ./tasks/esc50-v2.0.0 ./embeddings

GPU (needs the cuda feature):
cargo run --features cuda --example embed_task -- ./model ./tasks/esc50-v2.0.0 ./embeddings cuda

The model directory holds embedder.json plus scene.onnx and/or
timestamp.onnx; the task directory is the usual metadata + split JSONs +
resampled audio layout. Outputs land under the third argument, one
consolidated store per split.
*/
use std::env;
use std::time::Instant;

use earbank::{embed_task, ExecutionConfig, OnnxEmbedder, ProgressReporter, SplitSummary};

struct PrintProgress;

impl ProgressReporter for PrintProgress {
    fn split_started(&self, split: &str, clips: usize) {
        println!("{split}: embedding {clips} clips");
    }

    fn split_consolidated(&self, split: &str, summary: &SplitSummary) {
        println!("{split}: {} rows x {} dims", summary.rows, summary.dim);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let start_time = Instant::now();
    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        eprintln!("usage: embed_task <model_dir> <task_dir> <out_dir> [cuda|coreml]");
        std::process::exit(2);
    }

    let config = match args.get(4).map(String::as_str) {
        Some("cuda") => Some(ExecutionConfig::cuda()),
        Some("coreml") => Some(ExecutionConfig::coreml()),
        Some(other) => {
            eprintln!("unknown accelerator {other:?}, running on CPU");
            None
        }
        None => None,
    };

    let mut backend = OnnxEmbedder::from_pretrained(&args[1], config)?;
    let summaries = embed_task(&mut backend, args[2].as_ref(), args[3].as_ref(), &PrintProgress)?;

    let total_rows: usize = summaries.iter().map(|s| s.rows).sum();
    let elapsed = start_time.elapsed();
    println!(
        "\n✓ Embedded {} splits ({total_rows} rows) in {:.2}s",
        summaries.len(),
        elapsed.as_secs_f32()
    );

    Ok(())
}
