use std::sync::{Arc, Mutex};

use crate::buffer::SoundBuffer;
use crate::config::EngineConfig;
use crate::dynamics::Compressor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u64);

/// What `play_sound` hands back: enough to correlate a completion, never a
/// way into the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceHandle {
    pub id: VoiceId,
    pub sound: String,
    /// Scheduled start on the context clock, in seconds.
    pub start_time: f64,
    pub duration: f64,
}

struct Voice {
    id: VoiceId,
    buffer: Arc<SoundBuffer>,
    start_frame: u64,
    position: f64, // in source frames
    step: f64,     // source rate / output rate
    gain: f32,
    done: bool,
}

/// Active voices feeding master gain → compressor → output. Shared with the
/// device callback, which drives [`PlaybackGraph::render`].
pub struct PlaybackGraph {
    sample_rate: u32,
    channels: usize,
    frame: u64,
    voice_gain: f32,
    master_gain: f32,
    compressor: Compressor,
    voices: Vec<Voice>,
    finished: Vec<VoiceId>,
    next_id: u64,
}

pub type SharedGraph = Arc<Mutex<PlaybackGraph>>;

impl PlaybackGraph {
    pub fn new(sample_rate: u32, channels: usize, config: &EngineConfig) -> Self {
        PlaybackGraph {
            sample_rate,
            channels: channels.max(1),
            frame: 0,
            voice_gain: config.voice_gain,
            master_gain: config.master_gain,
            compressor: Compressor::new(config.compressor.clone(), sample_rate as f32),
            voices: Vec::new(),
            finished: Vec::new(),
            next_id: 1,
        }
    }

    pub fn shared(sample_rate: u32, channels: usize, config: &EngineConfig) -> SharedGraph {
        Arc::new(Mutex::new(Self::new(sample_rate, channels, config)))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Seconds rendered so far. Only advances while the device pulls audio.
    pub fn current_time(&self) -> f64 {
        self.frame as f64 / self.sample_rate as f64
    }

    /// Schedule `buffer` to start `offset` seconds from now.
    pub fn add_voice(&mut self, sound: &str, buffer: Arc<SoundBuffer>, offset: f64) -> VoiceHandle {
        let id = VoiceId(self.next_id);
        self.next_id += 1;

        let delay = (offset.max(0.0) * self.sample_rate as f64).round() as u64;
        let start_frame = self.frame.saturating_add(delay);
        let handle = VoiceHandle {
            id,
            sound: sound.to_string(),
            start_time: start_frame as f64 / self.sample_rate as f64,
            duration: buffer.duration(),
        };

        self.voices.push(Voice {
            id,
            step: buffer.sample_rate() as f64 / self.sample_rate as f64,
            buffer,
            start_frame,
            position: 0.0,
            gain: self.voice_gain,
            done: false,
        });
        handle
    }

    /// Drop every voice at once, no fade. Returns the ids that were cut.
    pub fn stop_all(&mut self) -> Vec<VoiceId> {
        self.compressor.reset();
        self.voices.drain(..).map(|v| v.id).collect()
    }

    pub fn active_count(&self) -> usize {
        self.voices.len()
    }

    pub fn is_playing(&self) -> bool {
        !self.voices.is_empty()
    }

    /// Voices that ran to their end since the last call.
    pub fn take_finished(&mut self) -> Vec<VoiceId> {
        std::mem::take(&mut self.finished)
    }

    /// Mix into an interleaved output block.
    pub fn render(&mut self, out: &mut [f32]) {
        for frame in out.chunks_mut(self.channels) {
            frame.fill(0.0);
            let now = self.frame;

            for voice in self.voices.iter_mut() {
                if voice.done || now < voice.start_frame {
                    continue;
                }
                for (ch, sample) in frame.iter_mut().enumerate() {
                    *sample += voice.buffer.sample_at(voice.position, ch) * voice.gain;
                }
                voice.position += voice.step;
                if voice.position >= voice.buffer.frames() as f64 {
                    voice.done = true;
                }
            }

            for sample in frame.iter_mut() {
                *sample *= self.master_gain;
            }
            self.compressor.process_frame(frame);
            self.frame += 1;
        }

        let finished = &mut self.finished;
        self.voices.retain(|v| {
            if v.done {
                finished.push(v.id);
            }
            !v.done
        });
    }
}
