use std::io::Cursor;
use std::sync::Arc;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::EngineError;

/// Decoded, immutable sample data. Samples are interleaved `f32`.
#[derive(Debug, Clone, PartialEq)]
pub struct SoundBuffer {
    samples: Arc<Vec<f32>>,
    channels: usize,
    sample_rate: u32,
}

impl SoundBuffer {
    pub fn new(samples: Vec<f32>, channels: usize, sample_rate: u32) -> Self {
        SoundBuffer {
            samples: Arc::new(samples),
            channels: channels.max(1),
            sample_rate,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Length in seconds at the buffer's own rate.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Linearly interpolated value at a fractional frame position. Output
    /// channels beyond the buffer's channel count wrap around, so mono feeds
    /// every output channel.
    #[inline]
    pub fn sample_at(&self, position: f64, channel: usize) -> f32 {
        let frames = self.frames();
        let idx = position as usize;
        if position < 0.0 || idx >= frames {
            return 0.0;
        }

        let ch = channel % self.channels;
        let s1 = self.samples[idx * self.channels + ch];
        if idx + 1 < frames {
            let frac = (position - idx as f64) as f32;
            let s2 = self.samples[(idx + 1) * self.channels + ch];
            s1 * (1.0 - frac) + s2 * frac
        } else {
            s1
        }
    }
}

/// Decode raw asset bytes. WAV goes through hound, anything else is probed by
/// symphonia; `ext` is only a probing hint.
pub fn decode(id: &str, bytes: Vec<u8>, ext: Option<&str>) -> Result<SoundBuffer, EngineError> {
    let buffer = if is_wav(&bytes) {
        decode_wav(id, bytes)?
    } else {
        decode_compressed(id, bytes, ext)?
    };

    if buffer.frames() == 0 {
        return Err(EngineError::decode(id, "no audio frames"));
    }
    Ok(buffer)
}

fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

fn decode_wav(id: &str, bytes: Vec<u8>) -> Result<SoundBuffer, EngineError> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).map_err(|e| EngineError::decode(id, e))?;
    let spec = reader.spec();

    let samples: Result<Vec<f32>, _> = match spec.sample_format {
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect(),
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader.into_samples::<i32>()
                .map(|r| r.map(|s| s as f32 / scale))
                .collect()
        }
    };

    let samples = samples.map_err(|e| EngineError::decode(id, e))?;
    log::debug!("Decoded wav '{}': {} Hz, {} channels, {} samples", id, spec.sample_rate, spec.channels, samples.len());
    Ok(SoundBuffer::new(samples, spec.channels as usize, spec.sample_rate))
}

fn decode_compressed(id: &str, bytes: Vec<u8>, ext: Option<&str>) -> Result<SoundBuffer, EngineError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = ext {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| EngineError::decode(id, e))?;
    let mut format = probed.format;

    let track = format.tracks().iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| EngineError::decode(id, "no audio track"))?;
    let track_id = track.id;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| EngineError::decode(id, e))?;

    let mut samples = Vec::new();
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(EngineError::decode(id, e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                channels = spec.channels.count();
                sample_rate = spec.rate;
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            // A corrupt frame is skipped, the rest of the stream is still usable
            Err(SymphoniaError::DecodeError(msg)) => log::warn!("Skipping bad packet in '{}': {}", id, msg),
            Err(e) => return Err(EngineError::decode(id, e)),
        }
    }

    log::debug!("Decoded '{}': {} Hz, {} channels, {} samples", id, sample_rate, channels, samples.len());
    Ok(SoundBuffer::new(samples, channels, sample_rate))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 16-bit PCM WAV bytes holding `frames` frames of a constant value.
    pub(crate) fn wav_bytes(frames: usize, channels: u16, sample_rate: u32, value: i16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut bytes = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
            for _ in 0..frames * channels as usize {
                writer.write_sample(value).unwrap();
            }
            writer.finalize().unwrap();
        }
        bytes
    }

    #[test]
    fn decodes_int_wav() {
        let buffer = decode("n1", wav_bytes(100, 2, 22_050, 16_384), Some("wav")).unwrap();
        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.sample_rate(), 22_050);
        assert_eq!(buffer.frames(), 100);
        assert!((buffer.sample_at(10.0, 1) - 0.5).abs() < 1e-4);
    }

    #[test]
    fn decodes_float_wav() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut bytes = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
            for i in 0..48 {
                writer.write_sample(i as f32 / 48.0).unwrap();
            }
            writer.finalize().unwrap();
        }
        let buffer = decode("fullTune", bytes, None).unwrap();
        assert_eq!(buffer.frames(), 48);
        assert!((buffer.duration() - 0.001).abs() < 1e-9);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = decode("n1", b"<html>404 not found</html>".to_vec(), Some("mp3")).unwrap_err();
        assert!(matches!(err, EngineError::Decode { ref id, .. } if id == "n1"));
    }

    #[test]
    fn empty_wav_is_rejected() {
        let err = decode("n1", wav_bytes(0, 1, 44_100, 0), None).unwrap_err();
        assert!(matches!(err, EngineError::Decode { .. }));
    }

    #[test]
    fn interpolates_between_frames() {
        let buffer = SoundBuffer::new(vec![0.0, 1.0], 1, 44_100);
        assert!((buffer.sample_at(0.25, 0) - 0.25).abs() < 1e-6);
        assert_eq!(buffer.sample_at(2.0, 0), 0.0);
        // mono feeds the second output channel too
        assert!((buffer.sample_at(0.5, 1) - 0.5).abs() < 1e-6);
    }
}
