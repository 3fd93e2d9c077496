//! End-to-end pipeline runs over synthetic task directories with a
//! deterministic in-process backend.

use std::error::Error as StdError;
use std::fs;
use std::path::Path;

use ndarray::{Array2, Array3, ArrayView2};

use earbank::{embed_task, Embedder, Error, SilentProgress};

const RATE: u32 = 16000;
const DIM: usize = 8;
const STEPS: usize = 5;
const STEP_MS: f32 = 250.0;

/// Derives every output from the first sample of each clip, so a row in
/// the consolidated store can be traced back to its source clip.
struct StubBackend;

impl Embedder for StubBackend {
    fn sample_rate(&self) -> u32 {
        RATE
    }

    fn scene_embeddings(&mut self, batch: ArrayView2<'_, f32>) -> earbank::Result<Array2<f32>> {
        let out = Array2::from_shape_fn((batch.nrows(), DIM), |(i, d)| {
            batch[[i, 0]] * (d as f32 + 1.0)
        });
        Ok(out)
    }

    fn timestamp_embeddings(
        &mut self,
        batch: ArrayView2<'_, f32>,
    ) -> earbank::Result<(Array3<f32>, Array2<f32>)> {
        let embeddings = Array3::from_shape_fn((batch.nrows(), STEPS, DIM), |(i, t, _)| {
            batch[[i, 0]] + t as f32
        });
        let timestamps =
            Array2::from_shape_fn((batch.nrows(), STEPS), |(_, t)| t as f32 * STEP_MS);
        Ok((embeddings, timestamps))
    }
}

/// Amplitude for clip `i`; exactly representable after i16 decode.
fn amplitude(i: usize) -> i16 {
    (i as i16 + 1) * 1000
}

fn first_sample(i: usize) -> f32 {
    f32::from(amplitude(i)) / 32768.0
}

fn write_clip(path: &Path, i: usize, frames: usize) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..frames {
        writer.write_sample(amplitude(i)).unwrap();
    }
    writer.finalize().unwrap();
}

fn write_task(
    task_dir: &Path,
    metadata: &str,
    split: &str,
    clips: &[(usize, usize)],
    split_json: &str,
) {
    fs::write(task_dir.join("task_metadata.json"), metadata).unwrap();
    fs::write(
        task_dir.join("labelvocabulary.csv"),
        "idx,label\n0,dog\n1,cat\n2,silence\n",
    )
    .unwrap();
    fs::write(task_dir.join(format!("{split}.json")), split_json).unwrap();
    let audio_dir = task_dir.join(RATE.to_string()).join(split);
    fs::create_dir_all(&audio_dir).unwrap();
    for &(i, frames) in clips {
        write_clip(&audio_dir.join(format!("clip{i}.wav")), i, frames);
    }
}

fn store_row_head(out_dir: &Path, split: &str, row: usize) -> f32 {
    let bytes = fs::read(out_dir.join(format!("{split}.embeddings.raw"))).unwrap();
    let at = row * DIM * 4;
    f32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[test]
fn scene_task_round_trips_rows_and_labels() -> Result<(), Box<dyn StdError>> {
    let task = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let expected_tags: Vec<Vec<String>> = vec![
        vec!["dog".into()],
        vec!["cat".into()],
        vec!["dog".into(), "cat".into()],
        vec![],
    ];
    write_task(
        task.path(),
        r#"{
            "embedding_type": "scene",
            "prediction_type": "multilabel",
            "sample_duration": 2.0,
            "splits": ["train"]
        }"#,
        "train",
        &[(0, 64), (1, 64), (2, 64), (3, 64)],
        r#"{
            "clip0.wav": ["dog"],
            "clip1.wav": ["cat"],
            "clip2.wav": ["dog", "cat"],
            "clip3.wav": []
        }"#,
    );

    let summaries = embed_task(&mut StubBackend, task.path(), out.path(), &SilentProgress)?;
    assert_eq!(summaries.len(), 1);
    assert_eq!((summaries[0].rows, summaries[0].dim), (4, DIM));

    // Mirrored task files.
    assert!(out.path().join("task_metadata.json").is_file());
    assert!(out.path().join("labelvocabulary.csv").is_file());
    assert!(out.path().join("train.json").is_file());

    let dims: (usize, usize) = serde_json::from_str(&fs::read_to_string(
        out.path().join("train.embedding-dimensions.json"),
    )?)?;
    assert_eq!(dims, (4, DIM));
    let raw = fs::read(out.path().join("train.embeddings.raw"))?;
    assert_eq!(raw.len(), 4 * DIM * 4);

    let labels: Vec<Vec<String>> =
        serde_json::from_str(&fs::read_to_string(out.path().join("train.target-labels.json"))?)?;
    assert_eq!(labels.len(), 4);

    // Each row's first value identifies its source clip; the label at
    // that row must be that clip's tag list.
    for row in 0..4 {
        let head = store_row_head(out.path(), "train", row);
        let clip = (head * 32768.0 / 1000.0).round() as usize - 1;
        assert_eq!(labels[row], expected_tags[clip], "row {row} -> clip {clip}");
    }
    Ok(())
}

#[test]
fn event_task_aligns_labels_references_and_rows() -> Result<(), Box<dyn StdError>> {
    let task = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    write_task(
        task.path(),
        r#"{
            "embedding_type": "event",
            "prediction_type": "multiclass",
            "sample_duration": 2.0,
            "splits": ["test"]
        }"#,
        "test",
        &[(0, 64), (1, 64), (2, 64)],
        r#"{
            "clip0.wav": [{"start": 0.0, "end": 500.0, "label": "dog"}],
            "clip1.wav": [{"start": 0.0, "end": 1000.0, "label": "cat"}],
            "clip2.wav": []
        }"#,
    );

    let summaries = embed_task(&mut StubBackend, task.path(), out.path(), &SilentProgress)?;
    assert_eq!((summaries[0].rows, summaries[0].dim), (3 * STEPS, DIM));

    let labels: Vec<Vec<String>> =
        serde_json::from_str(&fs::read_to_string(out.path().join("test.target-labels.json"))?)?;
    let refs: Vec<(String, f64)> = serde_json::from_str(&fs::read_to_string(
        out.path().join("test.filename-timestamps.json"),
    )?)?;
    assert_eq!(labels.len(), 3 * STEPS);
    assert_eq!(refs.len(), 3 * STEPS);

    for (row, (name, t_ms)) in refs.iter().enumerate() {
        let clip: usize = name
            .strip_prefix("clip")
            .and_then(|s| s.strip_suffix(".wav"))
            .and_then(|s| s.parse().ok())
            .expect("reference names a known clip");
        let step = (t_ms / f64::from(STEP_MS)).round() as usize;
        assert!(step < STEPS, "timestamp {t_ms} off the grid");

        // Stabilized single label per row: clip0 holds "dog" past the
        // event's end, clip1 is "cat" throughout, clip2 never matches
        // and stays on the fallback class.
        let expected = match clip {
            0 => "dog",
            1 => "cat",
            _ => "silence",
        };
        assert_eq!(labels[row], vec![expected.to_string()], "row {row}");

        let head = store_row_head(out.path(), "test", row);
        let expected_head = first_sample(clip) + step as f32;
        assert!(
            (head - expected_head).abs() < 1e-6,
            "row {row}: store value {head} does not match {name} step {step}"
        );
    }
    Ok(())
}

#[test]
fn continuous_task_interpolates_row_targets() -> Result<(), Box<dyn StdError>> {
    let task = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    write_task(
        task.path(),
        r#"{
            "embedding_type": "continuous",
            "prediction_type": "multilabel",
            "sample_duration": 2.0,
            "splits": ["test"]
        }"#,
        "test",
        &[(0, 64)],
        r#"{
            "clip0.wav": [
                {"start": 0.0, "values": [0.0, 1.0]},
                {"start": 1000.0, "values": [1.0, 0.0]}
            ]
        }"#,
    );

    embed_task(&mut StubBackend, task.path(), out.path(), &SilentProgress)?;

    let labels: Vec<Vec<f64>> =
        serde_json::from_str(&fs::read_to_string(out.path().join("test.target-labels.json"))?)?;
    let refs: Vec<(String, f64)> = serde_json::from_str(&fs::read_to_string(
        out.path().join("test.filename-timestamps.json"),
    )?)?;
    assert_eq!(labels.len(), STEPS);
    for (row, (_, t_ms)) in refs.iter().enumerate() {
        let alpha = t_ms / 1000.0;
        assert!((labels[row][0] - alpha).abs() < 1e-9, "row {row}");
        assert!((labels[row][1] - (1.0 - alpha)).abs() < 1e-9, "row {row}");
    }
    Ok(())
}

#[test]
fn multiclass_scene_with_two_tags_fails_at_consolidation() {
    let task = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_task(
        task.path(),
        r#"{
            "embedding_type": "scene",
            "prediction_type": "multiclass",
            "sample_duration": 2.0,
            "splits": ["train"]
        }"#,
        "train",
        &[(0, 64)],
        r#"{"clip0.wav": ["dog", "cat"]}"#,
    );

    let err = embed_task(&mut StubBackend, task.path(), out.path(), &SilentProgress)
        .expect_err("two labels on a multiclass clip");
    assert!(matches!(err, Error::Artifact { .. }), "got {err}");
}

#[test]
fn variable_duration_tasks_run_one_clip_at_a_time() -> Result<(), Box<dyn StdError>> {
    let task = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    write_task(
        task.path(),
        r#"{
            "embedding_type": "scene",
            "prediction_type": "multilabel",
            "sample_duration": null,
            "splits": ["train"]
        }"#,
        "train",
        &[(0, 64), (1, 48), (2, 96)],
        r#"{
            "clip0.wav": ["dog"],
            "clip1.wav": ["cat"],
            "clip2.wav": []
        }"#,
    );

    let summaries = embed_task(&mut StubBackend, task.path(), out.path(), &SilentProgress)?;
    assert_eq!((summaries[0].rows, summaries[0].dim), (3, DIM));
    Ok(())
}

#[test]
fn repeated_runs_produce_identical_stores() -> Result<(), Box<dyn StdError>> {
    let task = tempfile::tempdir()?;
    write_task(
        task.path(),
        r#"{
            "embedding_type": "event",
            "prediction_type": "multilabel",
            "sample_duration": 2.0,
            "splits": ["test"]
        }"#,
        "test",
        &[(0, 64), (1, 64), (2, 64), (3, 64)],
        r#"{
            "clip0.wav": [{"start": 0.0, "end": 500.0, "label": "dog"}],
            "clip1.wav": [{"start": 0.0, "end": 500.0, "label": "cat"}],
            "clip2.wav": [],
            "clip3.wav": [{"start": 250.0, "end": 750.0, "label": "dog"}]
        }"#,
    );

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let out = tempfile::tempdir()?;
        embed_task(&mut StubBackend, task.path(), out.path(), &SilentProgress)?;
        let raw = fs::read(out.path().join("test.embeddings.raw"))?;
        let labels = fs::read_to_string(out.path().join("test.target-labels.json"))?;
        let refs = fs::read_to_string(out.path().join("test.filename-timestamps.json"))?;
        outputs.push((raw, labels, refs));
    }
    assert_eq!(outputs[0], outputs[1]);
    Ok(())
}

#[test]
fn missing_audio_aborts_the_split() {
    let task = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_task(
        task.path(),
        r#"{
            "embedding_type": "scene",
            "prediction_type": "multilabel",
            "sample_duration": 2.0,
            "splits": ["train"]
        }"#,
        "train",
        &[(0, 64)],
        r#"{"clip0.wav": ["dog"], "clip7.wav": ["cat"]}"#,
    );

    let err = embed_task(&mut StubBackend, task.path(), out.path(), &SilentProgress)
        .expect_err("clip7.wav has no audio file");
    assert!(matches!(err, Error::Decode { .. }), "got {err}");
}
