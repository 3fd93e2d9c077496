use std::path::PathBuf;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver};
use ndarray::Array2;

use crate::audio::{self, DecodedAudio};
use crate::error::{Error, Result};

/// How many assembled batches may wait in the channel while the backend
/// is busy with the current one.
const PREFETCH_DEPTH: usize = 2;

/// An ordered, index-addressable collection of audio clips belonging to
/// one split. Decoding happens lazily; every clip must decode at the
/// dataset's sample rate, since resampling is out of scope here.
#[derive(Debug, Clone)]
pub struct AudioDataset {
    audio_dir: PathBuf,
    filenames: Vec<String>,
    sample_rate: u32,
}

/// A rectangular group of decoded clips. `samples` is (clips, samples);
/// `filenames` zips with its rows.
#[derive(Debug)]
pub struct Batch {
    pub filenames: Vec<String>,
    pub samples: Array2<f32>,
}

impl AudioDataset {
    pub fn new(
        audio_dir: impl Into<PathBuf>,
        filenames: Vec<String>,
        sample_rate: u32,
    ) -> Self {
        AudioDataset {
            audio_dir: audio_dir.into(),
            filenames,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.filenames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filenames.is_empty()
    }

    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Decodes clip `i` and enforces the sample-rate contract.
    pub fn get(&self, i: usize) -> Result<DecodedAudio> {
        let name = self.filenames.get(i).ok_or_else(|| {
            Error::Metadata(format!("clip index {i} out of range ({})", self.filenames.len()))
        })?;
        self.load_checked(name)
    }

    fn load_checked(&self, name: &str) -> Result<DecodedAudio> {
        let path = self.audio_dir.join(name);
        let decoded = audio::load(&path)?;
        if decoded.sample_rate != self.sample_rate {
            return Err(Error::SampleRate {
                path,
                expected: self.sample_rate,
                actual: decoded.sample_rate,
            });
        }
        Ok(decoded)
    }

    /// Consumes the dataset into an ordered batch stream. Decoding runs
    /// on a producer thread behind a bounded channel, so the next batch
    /// is assembled while the caller runs inference on the current one.
    /// Order is preserved end to end; a decode failure ends the stream
    /// after the error is delivered.
    pub fn batches(self, batch_size: usize) -> Batches {
        let batch_size = batch_size.max(1);
        let (tx, rx) = bounded::<Result<Batch>>(PREFETCH_DEPTH);
        let handle = std::thread::spawn(move || {
            for group in self.filenames.chunks(batch_size) {
                match self.assemble(group) {
                    Ok(batch) => {
                        if tx.send(Ok(batch)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                }
            }
        });
        Batches {
            rx: Some(rx),
            handle: Some(handle),
        }
    }

    fn assemble(&self, group: &[String]) -> Result<Batch> {
        let mut clip_len: Option<usize> = None;
        let mut flat = Vec::new();
        for name in group {
            let decoded = self.load_checked(name)?;
            match clip_len {
                None => clip_len = Some(decoded.len()),
                Some(expected) if decoded.len() != expected => {
                    return Err(Error::Alignment(format!(
                        "{name}: {} samples in a batch of {expected}-sample clips; \
                         variable-length tasks must run with batch size 1",
                        decoded.len()
                    )));
                }
                Some(_) => {}
            }
            flat.extend_from_slice(&decoded.samples);
        }
        let clip_len = clip_len.unwrap_or(0);
        let samples = Array2::from_shape_vec((group.len(), clip_len), flat)
            .map_err(|e| Error::Alignment(e.to_string()))?;
        Ok(Batch {
            filenames: group.to_vec(),
            samples,
        })
    }
}

/// Iterator over a dataset's batches; see [`AudioDataset::batches`].
pub struct Batches {
    rx: Option<Receiver<Result<Batch>>>,
    handle: Option<JoinHandle<()>>,
}

impl Iterator for Batches {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.rx.as_ref()?.recv().ok();
        if item.is_none() {
            self.reap();
        }
        item
    }
}

impl Batches {
    fn reap(&mut self) {
        // Closing the receiver first keeps the producer from blocking
        // on a full channel while we join it.
        self.rx = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Batches {
    fn drop(&mut self) {
        self.reap();
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn write_wav(path: &Path, sample_rate: u32, frames: usize, amplitude: i16) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..frames {
            writer.write_sample(amplitude).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn batches_preserve_order_and_grouping() {
        let dir = tempfile::tempdir().unwrap();
        let mut names = Vec::new();
        for i in 0..5 {
            let name = format!("clip{i}.wav");
            write_wav(&dir.path().join(&name), 16000, 32, (i as i16 + 1) * 1000);
            names.push(name);
        }
        let dataset = AudioDataset::new(dir.path(), names.clone(), 16000);
        let collected: Vec<Batch> = dataset
            .batches(2)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(collected.len(), 3);
        assert_eq!(collected[0].filenames, &names[0..2]);
        assert_eq!(collected[1].filenames, &names[2..4]);
        assert_eq!(collected[2].filenames, &names[4..5]);
        assert_eq!(collected[0].samples.dim(), (2, 32));
        assert_eq!(collected[2].samples.dim(), (1, 32));
        let expected = 3000.0 / 32768.0;
        assert!((collected[1].samples[[0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn sample_rate_mismatch_fails_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("a.wav"), 22050, 16, 1000);
        let dataset = AudioDataset::new(dir.path(), vec!["a.wav".to_string()], 16000);
        let mut batches = dataset.batches(4);
        let err = batches.next().unwrap().expect_err("rate must mismatch");
        assert!(matches!(
            err,
            Error::SampleRate {
                expected: 16000,
                actual: 22050,
                ..
            }
        ));
        assert!(batches.next().is_none());
    }

    #[test]
    fn ragged_clips_in_one_batch_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("long.wav"), 16000, 64, 1000);
        write_wav(&dir.path().join("short.wav"), 16000, 32, 1000);
        let dataset = AudioDataset::new(
            dir.path(),
            vec!["long.wav".to_string(), "short.wav".to_string()],
            16000,
        );
        let err = dataset
            .batches(2)
            .next()
            .unwrap()
            .expect_err("ragged batch");
        assert!(matches!(err, Error::Alignment(_)));
    }

    #[test]
    fn ragged_clips_are_fine_at_batch_size_one() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("long.wav"), 16000, 64, 1000);
        write_wav(&dir.path().join("short.wav"), 16000, 32, 1000);
        let dataset = AudioDataset::new(
            dir.path(),
            vec!["long.wav".to_string(), "short.wav".to_string()],
            16000,
        );
        let dims: Vec<(usize, usize)> = dataset
            .batches(1)
            .map(|b| b.map(|b| b.samples.dim()))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(dims, vec![(1, 64), (1, 32)]);
    }

    #[test]
    fn get_decodes_single_clips() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("only.wav"), 16000, 48, 500);
        let dataset = AudioDataset::new(dir.path(), vec!["only.wav".to_string()], 16000);
        assert_eq!(dataset.len(), 1);
        let clip = dataset.get(0).unwrap();
        assert_eq!(clip.len(), 48);
        assert!(dataset.get(1).is_err());
    }
}
