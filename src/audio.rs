use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{Error, Result};

/// A decoded clip: first channel only, normalized f32 at the file's
/// native rate. Rate validation against the backend happens in the
/// dataset layer.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Loads an audio file. Compressed mp3 goes through a packet-by-packet
/// frame loop over signed 16-bit samples; every other container is probed
/// and decoded straight to f32.
pub fn load<P: AsRef<Path>>(path: P) -> Result<DecodedAudio> {
    let path = path.as_ref();
    let is_mp3 = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mp3"));
    if is_mp3 {
        decode_mp3(path)
    } else {
        decode_probed(path)
    }
}

struct OpenedTrack {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
}

fn open_track(path: &Path, hint: Hint) -> Result<OpenedTrack> {
    let file =
        File::open(path).map_err(|e| Error::decode(path, format!("cannot open: {e}")))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::decode(path, e.to_string()))?;
    let format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::decode(path, "no decodable audio track"))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| Error::decode(path, "track is missing a sample rate"))?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(1)
        .max(1);
    let decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::decode(path, e.to_string()))?;
    Ok(OpenedTrack {
        format,
        decoder,
        track_id,
        sample_rate,
        channels,
    })
}

/// Keeps every `stride`-th sample starting at 0, i.e. the first channel
/// of an interleaved buffer.
fn first_channel<T: Copy>(interleaved: &[T], stride: usize, out: &mut Vec<T>) {
    if stride <= 1 {
        out.extend_from_slice(interleaved);
    } else {
        out.extend(interleaved.iter().step_by(stride).copied());
    }
}

fn decode_mp3(path: &Path) -> Result<DecodedAudio> {
    let mut hint = Hint::new();
    hint.with_extension("mp3");
    let mut opened = open_track(path, hint)?;

    let mut pcm_i16: Vec<i16> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<i16>> = None;
    loop {
        let packet = match opened.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(Error::decode(path, e.to_string())),
        };
        if packet.track_id() != opened.track_id {
            continue;
        }
        let decoded = opened
            .decoder
            .decode(&packet)
            .map_err(|e| Error::decode(path, e.to_string()))?;
        let buf = sample_buf.get_or_insert_with(|| {
            SampleBuffer::<i16>::new(decoded.capacity() as u64, *decoded.spec())
        });
        buf.copy_interleaved_ref(decoded);
        first_channel(buf.samples(), opened.channels, &mut pcm_i16);
    }

    let samples = pcm_i16
        .into_iter()
        .map(|s| f32::from(s) / 32768.0)
        .collect();
    Ok(DecodedAudio {
        samples,
        sample_rate: opened.sample_rate,
    })
}

fn decode_probed(path: &Path) -> Result<DecodedAudio> {
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let mut opened = open_track(path, hint)?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    loop {
        let packet = match opened.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(Error::decode(path, e.to_string())),
        };
        if packet.track_id() != opened.track_id {
            continue;
        }
        let decoded = opened
            .decoder
            .decode(&packet)
            .map_err(|e| Error::decode(path, e.to_string()))?;
        let buf = sample_buf.get_or_insert_with(|| {
            SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec())
        });
        buf.copy_interleaved_ref(decoded);
        first_channel(buf.samples(), opened.channels, &mut samples);
    }

    Ok(DecodedAudio {
        samples,
        sample_rate: opened.sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, channels: u16, sample_rate: u32, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..frames {
            writer.write_sample(1000i16).unwrap();
            for _ in 1..channels {
                writer.write_sample(-1000i16).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn decodes_wav_first_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 2, 22050, 100);
        let audio = load(&path).unwrap();
        assert_eq!(audio.sample_rate, 22050);
        assert_eq!(audio.len(), 100);
        let expected = 1000.0 / 32768.0;
        for s in &audio.samples {
            assert!((s - expected).abs() < 1e-6, "sample {s} != {expected}");
        }
    }

    #[test]
    fn mono_wav_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, 1, 16000, 64);
        let audio = load(&path).unwrap();
        assert_eq!(audio.sample_rate, 16000);
        assert_eq!(audio.len(), 64);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, b"definitely not audio").unwrap();
        assert!(matches!(load(&path), Err(Error::Decode { .. })));
    }

    #[test]
    fn missing_file_is_a_decode_error() {
        let err = load("/nonexistent/clip.wav").expect_err("must fail");
        assert!(matches!(err, Error::Decode { .. }));
    }
}
