use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, MutexGuard};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Stream, StreamConfig, SupportedBufferSize};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::graph::{PlaybackGraph, SharedGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatencyHint {
    #[default]
    Interactive,
    Balanced,
    Playback,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContextOptions {
    /// `None` keeps the device rate.
    pub sample_rate: Option<u32>,
    pub latency: LatencyHint,
}

/// An audio output with its processing graph. Created suspended.
pub trait OutputContext {
    fn state(&self) -> ContextState;
    fn resume(&mut self) -> Result<(), EngineError>;
    fn suspend(&mut self) -> Result<(), EngineError>;
    fn graph(&self) -> &SharedGraph;
}

pub trait ContextFactory {
    fn create(&self, options: &ContextOptions, config: &EngineConfig) -> Result<Box<dyn OutputContext>, EngineError>;
}

/// Lock the graph even if the device thread panicked while holding it.
pub(crate) fn lock_graph(graph: &SharedGraph) -> MutexGuard<'_, PlaybackGraph> {
    graph.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Default output device through cpal (WebAudio on wasm32).
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

struct CpalContext {
    stream: Stream,
    graph: SharedGraph,
    state: ContextState,
}

impl CpalBackend {
    fn buffer_size(latency: LatencyHint, supported: &SupportedBufferSize) -> BufferSize {
        let frames = match latency {
            LatencyHint::Interactive => 256,
            LatencyHint::Balanced => 1024,
            LatencyHint::Playback => return BufferSize::Default,
        };
        match supported {
            SupportedBufferSize::Range { min, max } => BufferSize::Fixed(frames.clamp(*min, *max)),
            SupportedBufferSize::Unknown => BufferSize::Default,
        }
    }

    fn build_stream(device: &cpal::Device, stream_config: &StreamConfig, graph: &SharedGraph) -> Result<Stream, cpal::BuildStreamError> {
        let graph = Arc::clone(graph);
        device.build_output_stream(
            stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                lock_graph(&graph).render(data);
            },
            |err| log::error!("Stream error: {}", err),
            None,
        )
    }
}

impl ContextFactory for CpalBackend {
    fn create(&self, options: &ContextOptions, config: &EngineConfig) -> Result<Box<dyn OutputContext>, EngineError> {
        let host = cpal::default_host();
        let device = host.default_output_device()
            .ok_or_else(|| EngineError::Device("No output device found".to_string()))?;
        let supported = device.default_output_config()
            .map_err(|e| EngineError::Device(e.to_string()))?;

        let default_config = supported.config();
        let mut stream_config = default_config.clone();
        if let Some(rate) = options.sample_rate {
            stream_config.sample_rate = cpal::SampleRate(rate);
        }
        stream_config.buffer_size = Self::buffer_size(options.latency, supported.buffer_size());

        let graph = PlaybackGraph::shared(stream_config.sample_rate.0, stream_config.channels as usize, config);
        let stream = match Self::build_stream(&device, &stream_config, &graph) {
            Ok(stream) => stream,
            Err(e) if stream_config != default_config => {
                log::warn!("Preferred output config rejected ({}), using device default", e);
                stream_config = default_config;
                let graph_rate = stream_config.sample_rate.0;
                *lock_graph(&graph) = PlaybackGraph::new(graph_rate, stream_config.channels as usize, config);
                Self::build_stream(&device, &stream_config, &graph).map_err(|e| EngineError::Device(e.to_string()))?
            }
            Err(e) => return Err(EngineError::Device(e.to_string())),
        };

        // Some hosts start streams on build
        if let Err(e) = stream.pause() {
            log::debug!("Could not pause new stream: {}", e);
        }

        log::info!("Output context: {} Hz, {} channels", stream_config.sample_rate.0, stream_config.channels);
        Ok(Box::new(CpalContext { stream, graph, state: ContextState::Suspended }))
    }
}

impl OutputContext for CpalContext {
    fn state(&self) -> ContextState {
        self.state
    }

    fn resume(&mut self) -> Result<(), EngineError> {
        self.stream.play().map_err(|e| EngineError::Device(e.to_string()))?;
        self.state = ContextState::Running;
        Ok(())
    }

    fn suspend(&mut self) -> Result<(), EngineError> {
        self.stream.pause().map_err(|e| EngineError::Device(e.to_string()))?;
        self.state = ContextState::Suspended;
        Ok(())
    }

    fn graph(&self) -> &SharedGraph {
        &self.graph
    }
}

struct OfflineState {
    sample_rate: u32,
    channels: usize,
    created: usize,
    fail_create: bool,
    fail_resume: bool,
    last_options: Option<ContextOptions>,
    current: Option<(SharedGraph, Rc<RefCell<ContextState>>)>,
}

/// Headless output. Nothing is rendered until [`OfflineBackend::render`] pulls
/// frames, which makes the context clock fully deterministic. Clones share
/// the same device.
#[derive(Clone)]
pub struct OfflineBackend {
    inner: Rc<RefCell<OfflineState>>,
}

struct OfflineContext {
    graph: SharedGraph,
    state: Rc<RefCell<ContextState>>,
    device: Rc<RefCell<OfflineState>>,
}

impl OfflineBackend {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        OfflineBackend {
            inner: Rc::new(RefCell::new(OfflineState {
                sample_rate,
                channels,
                created: 0,
                fail_create: false,
                fail_resume: false,
                last_options: None,
                current: None,
            })),
        }
    }

    /// Pull `frames` frames from the newest context. A suspended or missing
    /// context yields silence and its clock stands still.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let inner = self.inner.borrow();
        let mut out = vec![0.0; frames * inner.channels];
        if let Some((graph, state)) = &inner.current {
            if *state.borrow() == ContextState::Running {
                lock_graph(graph).render(&mut out);
            }
        }
        out
    }

    pub fn render_seconds(&self, seconds: f64) -> Vec<f32> {
        let rate = self.inner.borrow().sample_rate;
        self.render((seconds * rate as f64).ceil() as usize)
    }

    pub fn contexts_created(&self) -> usize {
        self.inner.borrow().created
    }

    pub fn state(&self) -> Option<ContextState> {
        self.inner.borrow().current.as_ref().map(|(_, state)| *state.borrow())
    }

    pub fn last_options(&self) -> Option<ContextOptions> {
        self.inner.borrow().last_options.clone()
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.inner.borrow_mut().fail_create = fail;
    }

    pub fn set_fail_resume(&self, fail: bool) {
        self.inner.borrow_mut().fail_resume = fail;
    }
}

impl ContextFactory for OfflineBackend {
    fn create(&self, options: &ContextOptions, config: &EngineConfig) -> Result<Box<dyn OutputContext>, EngineError> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_create {
            return Err(EngineError::Device("offline device unavailable".to_string()));
        }
        let sample_rate = options.sample_rate.unwrap_or(inner.sample_rate);
        inner.sample_rate = sample_rate;
        inner.created += 1;
        inner.last_options = Some(options.clone());

        // Replacing the device context closes the previous one
        if let Some((_, old)) = inner.current.take() {
            *old.borrow_mut() = ContextState::Closed;
        }

        let graph = PlaybackGraph::shared(sample_rate, inner.channels, config);
        let state = Rc::new(RefCell::new(ContextState::Suspended));
        inner.current = Some((Arc::clone(&graph), Rc::clone(&state)));

        Ok(Box::new(OfflineContext { graph, state, device: Rc::clone(&self.inner) }))
    }
}

impl OutputContext for OfflineContext {
    fn state(&self) -> ContextState {
        *self.state.borrow()
    }

    fn resume(&mut self) -> Result<(), EngineError> {
        let current = *self.state.borrow();
        if current == ContextState::Closed || self.device.borrow().fail_resume {
            return Err(EngineError::Device("offline context cannot resume".to_string()));
        }
        *self.state.borrow_mut() = ContextState::Running;
        Ok(())
    }

    fn suspend(&mut self) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        if *state == ContextState::Running {
            *state = ContextState::Suspended;
        }
        Ok(())
    }

    fn graph(&self) -> &SharedGraph {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SoundBuffer;

    #[test]
    fn offline_context_starts_suspended_and_renders_when_running() {
        let backend = OfflineBackend::new(1000, 1);
        let mut ctx = backend.create(&ContextOptions::default(), &EngineConfig::default()).unwrap();
        assert_eq!(ctx.state(), ContextState::Suspended);

        lock_graph(ctx.graph()).add_voice("n1", Arc::new(SoundBuffer::new(vec![0.01; 100], 1, 1000)), 0.0);
        assert!(backend.render(10).iter().all(|s| *s == 0.0));
        assert_eq!(lock_graph(ctx.graph()).current_time(), 0.0);

        ctx.resume().unwrap();
        assert!(backend.render(10).iter().any(|s| *s != 0.0));
        assert!((lock_graph(ctx.graph()).current_time() - 0.01).abs() < 1e-9);
    }

    #[test]
    fn new_context_closes_the_old_one() {
        let backend = OfflineBackend::new(1000, 2);
        let mut first = backend.create(&ContextOptions::default(), &EngineConfig::default()).unwrap();
        let _second = backend.create(&ContextOptions::default(), &EngineConfig::default()).unwrap();
        assert_eq!(first.state(), ContextState::Closed);
        assert!(first.resume().is_err());
        assert_eq!(backend.contexts_created(), 2);
    }

    #[test]
    fn honours_requested_rate() {
        let backend = OfflineBackend::new(48_000, 2);
        let options = ContextOptions { sample_rate: Some(44_100), latency: LatencyHint::Playback };
        let ctx = backend.create(&options, &EngineConfig::default()).unwrap();
        assert_eq!(lock_graph(ctx.graph()).sample_rate(), 44_100);
        assert_eq!(backend.last_options(), Some(options));
    }

    #[test]
    fn buffer_size_follows_latency_hint() {
        let range = SupportedBufferSize::Range { min: 512, max: 4096 };
        assert_eq!(CpalBackend::buffer_size(LatencyHint::Interactive, &range), BufferSize::Fixed(512));
        assert_eq!(CpalBackend::buffer_size(LatencyHint::Balanced, &range), BufferSize::Fixed(1024));
        assert_eq!(CpalBackend::buffer_size(LatencyHint::Playback, &range), BufferSize::Default);
        assert_eq!(CpalBackend::buffer_size(LatencyHint::Interactive, &SupportedBufferSize::Unknown), BufferSize::Default);
    }
}
