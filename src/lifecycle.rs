use std::cell::Cell;

use futures_util::future::join_all;

use crate::context::ContextState;
use crate::engine::AudioEngine;
use crate::store::Retention;

/// Page events the host forwards to [`AudioEngine::handle_page_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    VisibilityHidden,
    VisibilityVisible,
    PageHide,
    PageShow,
    Blur,
    Focus,
    Gesture,
}

impl PageEvent {
    /// Map a DOM event type. `document_hidden` is `document.hidden` at the
    /// time of a `visibilitychange`.
    pub fn from_dom(event_type: &str, document_hidden: bool) -> Option<Self> {
        match event_type {
            "visibilitychange" if document_hidden => Some(PageEvent::VisibilityHidden),
            "visibilitychange" => Some(PageEvent::VisibilityVisible),
            "pagehide" => Some(PageEvent::PageHide),
            "pageshow" => Some(PageEvent::PageShow),
            "blur" => Some(PageEvent::Blur),
            "focus" => Some(PageEvent::Focus),
            "touchstart" | "touchend" | "mousedown" | "pointerdown" | "keydown" | "click" => Some(PageEvent::Gesture),
            _ => None,
        }
    }

    pub fn is_hiding(self) -> bool {
        matches!(self, PageEvent::VisibilityHidden | PageEvent::PageHide | PageEvent::Blur)
    }

    pub fn is_showing(self) -> bool {
        matches!(self, PageEvent::VisibilityVisible | PageEvent::PageShow | PageEvent::Focus)
    }
}

/// One-shot "user has interacted" flag.
#[derive(Debug, Default)]
pub struct GestureLatch {
    fired: Cell<bool>,
}

impl GestureLatch {
    /// `true` only for the first call.
    pub fn fire(&self) -> bool {
        !self.fired.replace(true)
    }

    pub fn has_fired(&self) -> bool {
        self.fired.get()
    }
}

#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    pub(crate) gesture: GestureLatch,
    hidden: Cell<bool>,
}

impl Lifecycle {
    pub(crate) fn is_hidden(&self) -> bool {
        self.hidden.get()
    }
}

impl AudioEngine {
    pub async fn handle_page_event(&self, event: PageEvent) {
        log::debug!("Page event: {:?}", event);
        if event.is_hiding() {
            self.on_hidden();
        } else if event.is_showing() {
            self.on_visible().await;
        } else {
            self.on_gesture().await;
        }
    }

    pub fn has_interacted(&self) -> bool {
        self.lifecycle.gesture.has_fired()
    }

    /// Silence and suspend before returning; the page may be frozen right after.
    fn on_hidden(&self) {
        self.lifecycle.hidden.set(true);
        self.stop_all_sounds();

        let mut context = self.context.borrow_mut();
        if let Some(ctx) = context.as_mut() {
            if ctx.state() == ContextState::Running {
                if let Err(e) = ctx.suspend() {
                    log::warn!("Failed to suspend output on hide: {}", e);
                }
            }
        }
    }

    async fn on_visible(&self) {
        self.lifecycle.hidden.set(false);

        let resumed = {
            let mut context = self.context.borrow_mut();
            match context.as_mut() {
                Some(ctx) if ctx.state() == ContextState::Running => true,
                Some(ctx) if ctx.state() == ContextState::Suspended => match ctx.resume() {
                    Ok(()) => true,
                    Err(e) => {
                        log::warn!("Resume on visible failed: {}", e);
                        false
                    }
                },
                _ => false,
            }
        };

        if !resumed && !self.init().await {
            log::info!("Audio still unavailable after page became visible");
        }
        self.restore_baseline().await;
    }

    async fn on_gesture(&self) {
        if !self.lifecycle.gesture.fire() {
            return;
        }
        log::info!("First user gesture");
        if !self.is_running() {
            self.init().await;
        }
    }

    /// Reload baseline sounds that went missing while the page was away.
    async fn restore_baseline(&self) {
        let missing: Vec<_> = self.baseline.borrow().iter()
            .filter(|a| !self.store.contains(&a.id))
            .cloned()
            .collect();
        if missing.is_empty() {
            return;
        }

        log::info!("Reloading {} baseline sounds", missing.len());
        let results = join_all(missing.iter().map(|a| self.store.load(&a.url, &a.id, Retention::App))).await;
        for (asset, result) in missing.iter().zip(results) {
            if let Err(e) = result {
                log::warn!("Baseline sound '{}' still missing: {}", asset.id, e);
            }
        }
    }
}
