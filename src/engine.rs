use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use futures_util::future::join_all;

use crate::buffer::SoundBuffer;
use crate::config::{AssetRef, EngineConfig};
use crate::context::{lock_graph, ContextFactory, ContextState, CpalBackend, OutputContext};
use crate::error::EngineError;
use crate::fetch::{Fetcher, FsFetcher, HttpFetcher};
use crate::graph::{VoiceHandle, VoiceId};
use crate::lifecycle::Lifecycle;
use crate::melody::{self, Melody, MelodyManifest};
use crate::platform::{NativePlatform, Platform, UserAgentPlatform};
use crate::store::{Retention, SoundStore};

/// Called on the owner's thread, from [`AudioEngine::pump`], once the voice
/// has played to its end.
pub type Completion = Box<dyn FnOnce(VoiceId)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Suspended,
    Running,
}

/// Outcome of [`AudioEngine::preload_game_audio`]. Failed ids are simply
/// absent from the engine; the game keeps running without them.
#[derive(Debug, Clone, PartialEq)]
pub struct PreloadReport {
    pub melody: Melody,
    pub loaded: usize,
    pub failed: Vec<String>,
}

/// The game's only door to audio. One instance per page, created by the host
/// and handed to the UI layer; nothing in here is global.
pub struct AudioEngine {
    pub(crate) config: EngineConfig,
    pub(crate) platform: Box<dyn Platform>,
    factory: Box<dyn ContextFactory>,
    pub(crate) context: RefCell<Option<Box<dyn OutputContext>>>,
    pub(crate) store: SoundStore,
    fetcher: Rc<dyn Fetcher>,
    callbacks: RefCell<HashMap<VoiceId, Completion>>,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) baseline: RefCell<Vec<AssetRef>>,
    session_game: Cell<Option<u32>>,
}

impl AudioEngine {
    pub fn new(
        config: EngineConfig,
        platform: Box<dyn Platform>,
        factory: Box<dyn ContextFactory>,
        fetcher: Rc<dyn Fetcher>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(AudioEngine {
            store: SoundStore::new(Rc::clone(&fetcher), &config),
            config,
            platform,
            factory,
            context: RefCell::new(None),
            fetcher,
            callbacks: RefCell::new(HashMap::new()),
            lifecycle: Lifecycle::default(),
            baseline: RefCell::new(Vec::new()),
            session_game: Cell::new(None),
        })
    }

    /// Default output device, assets read from `asset_root`.
    pub fn native(config: EngineConfig, asset_root: impl Into<PathBuf>) -> Result<Self, EngineError> {
        Self::new(config, Box::new(NativePlatform), Box::new(CpalBackend), Rc::new(FsFetcher::new(asset_root)))
    }

    /// Browser page: policy from the user agent, assets over HTTP from `base_url`.
    pub fn browser(config: EngineConfig, user_agent: &str, base_url: &str) -> Result<Self, EngineError> {
        Self::new(
            config,
            Box::new(UserAgentPlatform::from_user_agent(user_agent)),
            Box::new(CpalBackend),
            Rc::new(HttpFetcher::new(Some(base_url))?),
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        match self.context.borrow().as_ref().map(|c| c.state()) {
            None | Some(ContextState::Closed) => EngineState::Uninitialized,
            Some(ContextState::Suspended) => EngineState::Suspended,
            Some(ContextState::Running) => EngineState::Running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Create or resume the output. Safe to call any number of times; once
    /// running every call returns `true` straight away.
    pub async fn init(&self) -> bool {
        match self.ensure_running() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("AudioEngine initialization failed: {}", e);
                false
            }
        }
    }

    pub(crate) fn ensure_running(&self) -> Result<(), EngineError> {
        if self.platform.requires_explicit_gesture() && !self.lifecycle.gesture.has_fired() {
            return Err(EngineError::EngineNotReady("waiting for the first user gesture".to_string()));
        }
        // Output comes back through the visible handler only
        if self.lifecycle.is_hidden() {
            return Err(EngineError::EngineNotReady("page is hidden".to_string()));
        }

        let mut slot = self.context.borrow_mut();
        if let Some(ctx) = slot.as_mut() {
            match ctx.state() {
                ContextState::Running => return Ok(()),
                ContextState::Suspended => match ctx.resume() {
                    Ok(()) => return Ok(()),
                    Err(e) => log::warn!("Resume failed, recreating output context: {}", e),
                },
                ContextState::Closed => log::info!("Output context closed, recreating"),
            }
        }

        let options = self.platform.preferred_context_options();
        let context = self.factory.create(&options, &self.config)?;
        // Voices of a replaced context are gone, and so are their completions
        self.callbacks.borrow_mut().clear();
        let ctx = slot.insert(context);
        ctx.resume()?;
        log::info!("Audio output running");
        Ok(())
    }

    /// Fetch and decode `url` as `id`, kept for the engine's lifetime.
    pub async fn load_sound(&self, url: &str, id: &str) -> Result<Arc<SoundBuffer>, EngineError> {
        self.store.load(url, id, Retention::App).await
    }

    /// Like [`load_sound`](Self::load_sound), dropped when another game is preloaded.
    pub async fn load_session_sound(&self, url: &str, id: &str) -> Result<Arc<SoundBuffer>, EngineError> {
        self.store.load(url, id, Retention::Session).await
    }

    pub fn has_sound(&self, id: &str) -> bool {
        self.store.contains(id)
    }

    /// Forget `id`; the next load fetches it again.
    pub fn unload_sound(&self, id: &str) -> bool {
        self.store.invalidate(id)
    }

    /// Start `id` at `offset` seconds from now. `None` when the sound is not
    /// loaded or there is no running output; sound is never worth failing the
    /// game for.
    pub fn play_sound(&self, id: &str, offset: f64, on_complete: Option<Completion>) -> Option<VoiceHandle> {
        let Some(buffer) = self.store.get(id) else {
            log::debug!("play_sound('{}'): not loaded", id);
            return None;
        };

        if !offset.is_finite() {
            log::debug!("play_sound('{}'): offset {} is not a time", id, offset);
            return None;
        }
        if let Err(e) = self.ensure_running() {
            log::debug!("play_sound('{}'): {}", id, e);
            return None;
        }

        let context = self.context.borrow();
        let handle = lock_graph(context.as_ref()?.graph()).add_voice(id, buffer, offset);
        if let Some(callback) = on_complete {
            self.callbacks.borrow_mut().insert(handle.id, callback);
        }
        Some(handle)
    }

    pub fn play_note(&self, n: u8) -> Option<VoiceHandle> {
        self.play_sound(&EngineConfig::note_id(n), 0.0, None)
    }

    /// Cut every voice immediately. Their completions are dropped, not run.
    pub fn stop_all_sounds(&self) {
        let context = self.context.borrow();
        let Some(ctx) = context.as_ref() else { return };

        let stopped = lock_graph(ctx.graph()).stop_all();
        if !stopped.is_empty() {
            let mut callbacks = self.callbacks.borrow_mut();
            for id in &stopped {
                callbacks.remove(id);
            }
            log::debug!("Stopped {} voices", stopped.len());
        }
    }

    pub fn is_playing(&self) -> bool {
        self.context.borrow().as_ref()
            .map(|ctx| lock_graph(ctx.graph()).is_playing())
            .unwrap_or(false)
    }

    /// Run completions of voices that finished since the last call. Hosts call
    /// this from their frame or event loop. Returns how many ran.
    pub fn pump(&self) -> usize {
        let finished = match self.context.borrow().as_ref() {
            Some(ctx) => lock_graph(ctx.graph()).take_finished(),
            None => return 0,
        };

        // Taken out first: a completion may start the next sound
        let ready: Vec<(VoiceId, Completion)> = {
            let mut callbacks = self.callbacks.borrow_mut();
            finished.into_iter().filter_map(|id| callbacks.remove(&id).map(|cb| (id, cb))).collect()
        };
        let count = ready.len();
        for (id, callback) in ready {
            callback(id);
        }
        count
    }

    /// Mark a sound as part of the baseline set restored after backgrounding.
    pub fn register_baseline(&self, url: &str, id: &str) {
        let mut baseline = self.baseline.borrow_mut();
        baseline.retain(|a| a.id != id);
        baseline.push(AssetRef::new(id, url));
    }

    /// Running, and every baseline sound resident. Gates the practice and
    /// perform triggers.
    pub fn is_ready(&self) -> bool {
        self.is_running() && self.baseline.borrow().iter().all(|a| self.store.contains(&a.id))
    }

    /// Load everything one game needs: the note set, UI cues, the game's
    /// manifest, each bar as `melody{i}` and the whole tune as `fullTune`.
    /// Single assets may fail without stopping the rest; a broken manifest or
    /// bar name fails the call.
    pub async fn preload_game_audio(&self, game: u32) -> Result<PreloadReport, EngineError> {
        if !self.init().await {
            log::info!("Preloading game {} before audio output is available", game);
        }

        if self.session_game.get().is_some_and(|g| g != game) {
            self.store.evict_session();
        }
        self.session_game.set(Some(game));

        let baseline = self.config.baseline_assets();
        for asset in &baseline {
            self.register_baseline(&asset.url, &asset.id);
        }

        let manifest_url = self.config.manifest_url_for(game);
        let baseline_loads = join_all(baseline.iter().map(|a| async move {
            (a.id.clone(), self.store.load(&a.url, &a.id, Retention::App).await.map(|_| ()))
        }));
        let manifest_load = MelodyManifest::fetch(self.fetcher.as_ref(), &manifest_url, self.config.load_timeout());
        let (mut results, manifest) = futures_util::future::join(baseline_loads, manifest_load).await;

        let manifest = manifest.map_err(|e| {
            log::error!("Failed to load melody manifest for game {}: {}", game, e);
            e
        })?;
        let melody = melody::parse_melody(&manifest.melody_parts)?;

        let mut session: Vec<AssetRef> = manifest.melody_parts.iter().enumerate()
            .map(|(i, url)| AssetRef::new(MelodyManifest::part_id(i), url.clone()))
            .collect();
        session.push(AssetRef::new("fullTune", manifest.full_tune.clone()));

        // A republished manifest reuses the ids with new files
        if self.store.session_assets().iter().any(|a| !session.contains(a)) {
            log::info!("Melody for game {} changed, dropping previous bars", game);
            self.store.evict_session();
        }

        results.extend(join_all(session.iter().map(|a| async move {
            (a.id.clone(), self.store.load(&a.url, &a.id, Retention::Session).await.map(|_| ()))
        })).await);

        let failed: Vec<String> = results.iter()
            .filter(|(_, r)| r.is_err())
            .map(|(id, _)| id.clone())
            .collect();
        let loaded = results.len() - failed.len();
        if failed.is_empty() {
            log::info!("Game {} audio ready: {} sounds", game, loaded);
        } else {
            log::warn!("Game {} audio loaded with {} missing sounds: {:?}", game, failed.len(), failed);
        }

        Ok(PreloadReport { melody, loaded, failed })
    }
}
