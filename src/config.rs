use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Shared dynamics stage settings, in WebAudio units (dB, ratio, seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorSettings {
    pub threshold_db: f32,
    pub knee_db: f32,
    pub ratio: f32,
    pub attack: f32,
    pub release: f32,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        CompressorSettings {
            threshold_db: -24.0,
            knee_db: 30.0,
            ratio: 12.0,
            attack: 0.003,
            release: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRef {
    pub id: String,
    pub url: String,
}

impl AssetRef {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        AssetRef { id: id.into(), url: url.into() }
    }
}

/// Engine configuration. Every field has a default, so a partial JSON
/// document only overrides what it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Gain of each voice before the master bus (0.0 - 1.0).
    pub voice_gain: f32,
    /// Master bus gain ahead of the compressor.
    pub master_gain: f32,
    pub compressor: CompressorSettings,
    /// Upper bound for a single asset fetch.
    pub load_timeout_ms: u64,
    /// Extra attempts after a network failure.
    pub load_retries: u32,
    /// Base delay between attempts; each retry adds up to 50% jitter.
    pub retry_backoff_ms: u64,
    /// Number of instrument notes, loaded as `n1..=nN`.
    pub note_count: u8,
    /// Note asset url, `{n}` is replaced by the note number.
    pub note_url: String,
    pub ui_sounds: Vec<AssetRef>,
    /// Melody manifest url, `{game}` is replaced by the game number.
    pub manifest_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            voice_gain: 0.8,
            master_gain: 1.0,
            compressor: CompressorSettings::default(),
            load_timeout_ms: 10_000,
            load_retries: 1,
            retry_backoff_ms: 250,
            note_count: 8,
            note_url: "/assets/audio/n{n}.mp3".to_string(),
            ui_sounds: vec![
                AssetRef::new("wrong", "/assets/audio/ui-sounds/wrong-note.mp3"),
                AssetRef::new("fail", "/assets/audio/ui-sounds/bar-failed.mp3"),
                AssetRef::new("complete", "/assets/audio/ui-sounds/bar-complete.mp3"),
                AssetRef::new("flip", "/assets/audio/ui-sounds/note-flip.mp3"),
            ],
            manifest_url: "/assets/audio/testMelodies/game{game}/current.json".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(content: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(content)
            .map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&self.voice_gain) {
            return Err(EngineError::Config(format!("voice_gain out of range: {}", self.voice_gain)));
        }
        if !(0.0..=2.0).contains(&self.master_gain) {
            return Err(EngineError::Config(format!("master_gain out of range: {}", self.master_gain)));
        }
        if self.compressor.ratio < 1.0 {
            return Err(EngineError::Config("compressor ratio must be >= 1".to_string()));
        }
        if self.compressor.attack <= 0.0 || self.compressor.release <= 0.0 {
            return Err(EngineError::Config("compressor attack/release must be positive".to_string()));
        }
        if self.load_timeout_ms == 0 {
            return Err(EngineError::Config("load_timeout_ms must be finite and non-zero".to_string()));
        }
        if !self.note_url.contains("{n}") {
            return Err(EngineError::Config("note_url needs a {n} placeholder".to_string()));
        }
        Ok(())
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    /// Sound id used for note `n`, shared by preloading and `play_note`.
    pub fn note_id(n: u8) -> String {
        format!("n{}", n)
    }

    /// The instrument note set plus UI cues: the sounds that must survive a
    /// background/foreground cycle.
    pub fn baseline_assets(&self) -> Vec<AssetRef> {
        let notes = (1..=self.note_count)
            .map(|n| AssetRef::new(Self::note_id(n), self.note_url.replace("{n}", &n.to_string())));
        notes.chain(self.ui_sounds.iter().cloned()).collect()
    }

    pub fn manifest_url_for(&self, game: u32) -> String {
        self.manifest_url.replace("{game}", &game.to_string())
    }
}
