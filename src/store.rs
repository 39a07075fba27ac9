use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{LocalBoxFuture, Shared};
use futures_util::FutureExt;

use crate::buffer::{self, SoundBuffer};
use crate::config::{AssetRef, EngineConfig};
use crate::error::EngineError;
use crate::fetch::{self, Fetcher};

/// How long a stored buffer is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Instrument notes and UI cues, kept for the engine's lifetime.
    App,
    /// Melody assets, dropped by [`SoundStore::evict_session`].
    Session,
}

type LoadResult = Result<Arc<SoundBuffer>, EngineError>;
type PendingLoad = Shared<LocalBoxFuture<'static, LoadResult>>;

struct Entry {
    buffer: Arc<SoundBuffer>,
    retention: Retention,
    url: String,
}

struct Pending {
    load: PendingLoad,
    retention: Retention,
    url: String,
    ticket: u64,
}

#[derive(Default)]
struct StoreInner {
    buffers: HashMap<String, Entry>,
    pending: HashMap<String, Pending>,
    fetches: usize,
    next_ticket: u64,
}

#[derive(Debug, Clone, Copy)]
struct LoadPolicy {
    timeout: Duration,
    retries: u32,
    backoff: Duration,
}

/// Decoded sounds keyed by id. The only writer of the buffer map.
pub struct SoundStore {
    inner: Rc<RefCell<StoreInner>>,
    fetcher: Rc<dyn Fetcher>,
    policy: LoadPolicy,
}

impl SoundStore {
    pub fn new(fetcher: Rc<dyn Fetcher>, config: &EngineConfig) -> Self {
        SoundStore {
            inner: Rc::new(RefCell::new(StoreInner::default())),
            fetcher,
            policy: LoadPolicy {
                timeout: config.load_timeout(),
                retries: config.load_retries,
                backoff: Duration::from_millis(config.retry_backoff_ms),
            },
        }
    }

    /// Load `url` under `id`. A resident buffer is returned without fetching;
    /// a load already in flight for `id` is joined instead of started again.
    pub async fn load(&self, url: &str, id: &str, retention: Retention) -> LoadResult {
        let pending = {
            let mut inner = self.inner.borrow_mut();
            if let Some(pending) = inner.pending.get(id) {
                log::debug!("Joining in-flight load of '{}'", id);
                pending.load.clone()
            } else if let Some(entry) = inner.buffers.get(id) {
                return Ok(Arc::clone(&entry.buffer));
            } else {
                inner.next_ticket += 1;
                let ticket = inner.next_ticket;
                let load = self.start_load(url, id, retention, ticket);
                inner.pending.insert(id.to_string(), Pending { load: load.clone(), retention, url: url.to_string(), ticket });
                load
            }
        };
        pending.await
    }

    fn start_load(&self, url: &str, id: &str, retention: Retention, ticket: u64) -> PendingLoad {
        let inner = Rc::clone(&self.inner);
        let fetcher = Rc::clone(&self.fetcher);
        let policy = self.policy;
        let url = url.to_string();
        let id = id.to_string();

        async move {
            inner.borrow_mut().fetches += 1;
            let fetched = fetch::fetch_with_retry(fetcher.as_ref(), &url, policy.timeout, policy.retries, policy.backoff).await;
            let result = fetched.and_then(|bytes| buffer::decode(&id, bytes, extension(&url)).map(Arc::new));

            let mut store = inner.borrow_mut();
            // Evicted while in flight: hand the result to the waiters, keep it out of the map
            if store.pending.get(&id).is_none_or(|p| p.ticket != ticket) {
                log::debug!("Discarding evicted load of '{}'", id);
                return result;
            }
            store.pending.remove(&id);
            match &result {
                Ok(buffer) => {
                    log::info!("Loaded sound '{}' ({:.2}s)", id, buffer.duration());
                    store.buffers.insert(id, Entry { buffer: Arc::clone(buffer), retention, url });
                }
                Err(e) => log::error!("Failed to load sound '{}': {}", id, e),
            }
            result
        }
        .boxed_local()
        .shared()
    }

    pub fn get(&self, id: &str) -> Option<Arc<SoundBuffer>> {
        self.inner.borrow().buffers.get(id).map(|e| Arc::clone(&e.buffer))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.borrow().buffers.contains_key(id)
    }

    pub fn is_loading(&self, id: &str) -> bool {
        self.inner.borrow().pending.contains_key(id)
    }

    /// Forget `id`; the next load fetches it again and replaces the buffer.
    pub fn invalidate(&self, id: &str) -> bool {
        self.inner.borrow_mut().buffers.remove(id).is_some()
    }

    /// Drop every session-scoped buffer and abandon session loads still in
    /// flight. Returns how many buffers were dropped.
    pub fn evict_session(&self) -> usize {
        let mut inner = self.inner.borrow_mut();
        let before = inner.buffers.len();
        inner.buffers.retain(|_, e| e.retention == Retention::App);
        inner.pending.retain(|_, p| p.retention == Retention::App);
        let evicted = before - inner.buffers.len();
        if evicted > 0 {
            log::info!("Evicted {} session sounds", evicted);
        }
        evicted
    }

    /// Session sounds resident or loading, with the url each came from.
    pub fn session_assets(&self) -> Vec<AssetRef> {
        let inner = self.inner.borrow();
        let resident = inner.buffers.iter()
            .filter(|(_, e)| e.retention == Retention::Session)
            .map(|(id, e)| AssetRef::new(id.as_str(), e.url.as_str()));
        let loading = inner.pending.iter()
            .filter(|(_, p)| p.retention == Retention::Session)
            .map(|(id, p)| AssetRef::new(id.as_str(), p.url.as_str()));
        resident.chain(loading).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fetch+decode jobs started so far.
    pub fn fetch_count(&self) -> usize {
        self.inner.borrow().fetches
    }
}

fn extension(url: &str) -> Option<&str> {
    let name = url.rsplit('/').next()?;
    let name = name.split(['?', '#']).next()?;
    name.rsplit_once('.').map(|(_, ext)| ext)
}
