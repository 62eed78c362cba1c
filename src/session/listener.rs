//! Caller subscriptions to session output.

use crate::codec::PlayableAudio;
use crate::session::SessionState;
use crate::session::status::StatusUpdate;
use std::sync::Mutex;

/// Receives session output. Called from the engine task, in event order;
/// implementations must return quickly.
pub trait SessionListener: Send + Sync {
    fn on_status_changed(&self, _status: &StatusUpdate) {}

    fn on_translation_text(&self, _text: &str) {}

    /// A translated clip was decoded; it is queued for playback separately.
    fn on_audio_ready(&self, _audio: &PlayableAudio) {}

    fn on_state_changed(&self, _state: SessionState) {}
}

/// One recorded listener call.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEvent {
    Status(StatusUpdate),
    Text(String),
    Audio(PlayableAudio),
    State(SessionState),
}

/// Listener that records every call, for tests and embedding.
#[derive(Debug, Default)]
pub struct CollectorListener {
    events: Mutex<Vec<ListenerEvent>>,
}

impl CollectorListener {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: ListenerEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    /// Every recorded call, in order.
    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn statuses(&self) -> Vec<StatusUpdate> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ListenerEvent::Status(status) => Some(status),
                _ => None,
            })
            .collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ListenerEvent::Text(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn audio(&self) -> Vec<PlayableAudio> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ListenerEvent::Audio(audio) => Some(audio),
                _ => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ListenerEvent::State(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl SessionListener for CollectorListener {
    fn on_status_changed(&self, status: &StatusUpdate) {
        self.push(ListenerEvent::Status(status.clone()));
    }

    fn on_translation_text(&self, text: &str) {
        self.push(ListenerEvent::Text(text.to_string()));
    }

    fn on_audio_ready(&self, audio: &PlayableAudio) {
        self.push(ListenerEvent::Audio(audio.clone()));
    }

    fn on_state_changed(&self, state: SessionState) {
        self.push(ListenerEvent::State(state));
    }
}
