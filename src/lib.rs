//  _______  _______  _        _______  ______   _______ _________ _        _
// (       )(  ____ \( \      (  ___  )(  __  \ (  ____ )\__   __/( \      ( \
// | () () || (    \/| (      | (   ) || (  \  )| (    )|   ) (   | (      | (
// | || || || (__    | |      | |   | || |   ) || (____)|   | |   | |      | |
// | |(_)| ||  __)   | |      | |   | || |   | ||     __)   | |   | |      | |
// | |   | || (      | |      | |   | || |   ) || (\ (      | |   | |      | |
// | )   ( || (____/\| (____/\| (___) || (__/  )| ) \ \_____) (___| (____/\| (____/\
// |/     \|(_______/(_______/(_______)(______/ |/   \__/\_______/(_______/(_______/

//! melodrill: audio engine for a melody ear-training game.
//!
//! Sounds are fetched and decoded into a [`SoundStore`], played through a
//! [`PlaybackGraph`] (voice gain, master gain, compressor) and kept alive
//! across page visibility changes by the lifecycle handlers on
//! [`AudioEngine`]. Bar file names are turned into notes by [`melody`].

pub mod error;
pub mod config;
pub mod buffer;
pub mod fetch;
pub mod store;
pub mod dynamics;
pub mod graph;
pub mod context;
pub mod platform;
pub mod engine;
pub mod lifecycle;
pub mod melody;

pub use error::EngineError;
pub use config::{AssetRef, CompressorSettings, EngineConfig};
pub use buffer::SoundBuffer;
pub use fetch::{Fetcher, FsFetcher, HttpFetcher};
pub use store::{Retention, SoundStore};
pub use dynamics::Compressor;
pub use graph::{PlaybackGraph, VoiceHandle, VoiceId};
pub use context::{ContextFactory, ContextOptions, ContextState, CpalBackend, LatencyHint, OfflineBackend, OutputContext};
pub use platform::{NativePlatform, Platform, PlatformKind, UserAgentPlatform};
pub use engine::{AudioEngine, Completion, EngineState, PreloadReport};
pub use lifecycle::{GestureLatch, PageEvent};
pub use melody::{parse_bar_sequence, parse_melody, BarSequence, Melody, MelodyManifest, NoteEvent};
