//! Ordered playback of translated clips.
//!
//! A [`PlaybackQueue`] owns one worker thread and one [`AudioPlayer`]. Clips
//! play strictly in arrival order, one at a time, and a clip that fails to play
//! never stalls the ones behind it.

use crate::audio::player::AudioPlayer;
use crate::codec::PlayableAudio;
use crate::defaults;
use crate::error::{LivetransError, Result};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// What to do with a clip that arrives while the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the oldest waiting clip to make room.
    #[default]
    DropOldest,
    /// Discard the arriving clip.
    DropNewest,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::DropOldest => f.write_str("drop_oldest"),
            OverflowPolicy::DropNewest => f.write_str("drop_newest"),
        }
    }
}

impl FromStr for OverflowPolicy {
    type Err = LivetransError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            "drop_newest" => Ok(OverflowPolicy::DropNewest),
            other => Err(LivetransError::ConfigInvalidValue {
                key: "playback.overflow".to_string(),
                message: format!(
                    "unknown overflow policy '{}' (expected drop_oldest or drop_newest)",
                    other
                ),
            }),
        }
    }
}

/// Queue sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackConfig {
    /// Clips allowed to wait behind the one playing.
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::PLAYBACK_CAPACITY,
            overflow: OverflowPolicy::default(),
        }
    }
}

/// Progress of individual clips, keyed by arrival sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started { seq: u64 },
    Finished { seq: u64 },
    Failed { seq: u64, message: String },
    /// Discarded by the overflow policy without ever playing.
    Dropped { seq: u64 },
}

/// Result of [`PlaybackQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued { seq: u64 },
    /// Queued after discarding the oldest waiting clip.
    QueuedDroppingOldest { seq: u64, dropped: u64 },
    /// The clip itself was discarded.
    Rejected { seq: u64 },
    /// The queue no longer accepts clips.
    Closed,
}

/// A queued clip with its arrival sequence number.
struct PlaybackItem {
    seq: u64,
    audio: PlayableAudio,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PlaybackItem>,
    now_playing: Option<u64>,
    next_seq: u64,
    closed: bool,
    /// Abandon waiting clips instead of draining them on close.
    discard: bool,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.now_playing.is_none()
    }
}

struct Shared {
    state: Mutex<QueueState>,
    /// Signalled when a clip arrives or the queue closes.
    work: Condvar,
    /// Signalled when the queue goes idle.
    idle: Condvar,
    events: Option<Sender<PlaybackEvent>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // State stays consistent across a player panic
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: PlaybackEvent) {
        if let Some(tx) = &self.events
            && tx.try_send(event).is_err()
        {
            trace!("Playback event dropped; no listener");
        }
    }
}

/// FIFO playback queue with a single "now playing" slot.
pub struct PlaybackQueue {
    shared: Arc<Shared>,
    config: PlaybackConfig,
    worker: Option<JoinHandle<()>>,
}

impl PlaybackQueue {
    /// Start the worker thread that drains the queue into `player`.
    ///
    /// # Errors
    /// Returns `LivetransError::Playback` if the worker thread cannot be spawned.
    pub fn spawn(
        player: Box<dyn AudioPlayer>,
        config: PlaybackConfig,
        events: Option<Sender<PlaybackEvent>>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            work: Condvar::new(),
            idle: Condvar::new(),
            events,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("livetrans-playback".to_string())
            .spawn(move || drain(worker_shared, player))
            .map_err(|e| LivetransError::Playback {
                message: format!("Failed to start playback thread: {}", e),
            })?;

        Ok(Self {
            shared,
            config: PlaybackConfig {
                capacity: config.capacity.max(1),
                overflow: config.overflow,
            },
            worker: Some(worker),
        })
    }

    /// Append a clip to the tail. Never preempts the clip currently playing.
    pub fn enqueue(&self, audio: PlayableAudio) -> EnqueueOutcome {
        let mut state = self.shared.lock();
        if state.closed {
            return EnqueueOutcome::Closed;
        }
        let seq = state.next_seq;
        state.next_seq += 1;

        let mut dropped = None;
        if state.pending.len() >= self.config.capacity {
            match self.config.overflow {
                OverflowPolicy::DropNewest => {
                    drop(state);
                    warn!(seq, "Playback queue full; dropping arriving clip");
                    self.shared.emit(PlaybackEvent::Dropped { seq });
                    return EnqueueOutcome::Rejected { seq };
                }
                OverflowPolicy::DropOldest => {
                    dropped = state.pending.pop_front().map(|item| item.seq);
                }
            }
        }

        state.pending.push_back(PlaybackItem { seq, audio });
        trace!(seq, waiting = state.pending.len(), "Clip queued");
        drop(state);
        self.shared.work.notify_one();

        match dropped {
            Some(dropped) => {
                warn!(dropped, "Playback queue full; dropping oldest waiting clip");
                self.shared.emit(PlaybackEvent::Dropped { seq: dropped });
                EnqueueOutcome::QueuedDroppingOldest { seq, dropped }
            }
            None => EnqueueOutcome::Queued { seq },
        }
    }

    /// Clips waiting behind the one playing.
    pub fn len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nothing waiting and nothing playing.
    pub fn is_idle(&self) -> bool {
        self.shared.lock().is_idle()
    }

    /// Sequence number of the clip currently playing.
    pub fn now_playing(&self) -> Option<u64> {
        self.shared.lock().now_playing
    }

    /// Block until the queue is idle. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        while !state.is_idle() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.shared.idle.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// Stop accepting clips, play everything already queued, then join the worker.
    pub fn finish(mut self) {
        self.close(false);
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("Playback thread panicked");
        }
    }

    fn close(&self, discard: bool) {
        let mut state = self.shared.lock();
        state.closed = true;
        state.discard |= discard;
        drop(state);
        self.shared.work.notify_all();
    }
}

impl Drop for PlaybackQueue {
    /// Lets the current clip finish and abandons the rest; the worker is detached.
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.close(true);
        }
    }
}

fn drain(shared: Arc<Shared>, mut player: Box<dyn AudioPlayer>) {
    loop {
        let item = {
            let mut state = shared.lock();
            loop {
                if state.discard {
                    state.pending.clear();
                }
                if let Some(item) = state.pending.pop_front() {
                    state.now_playing = Some(item.seq);
                    break Some(item);
                }
                if state.closed {
                    break None;
                }
                state = match shared.work.wait(state) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        };
        let Some(PlaybackItem { seq, audio }) = item else {
            break;
        };

        debug!(seq, bytes = audio.len(), "Playing clip");
        shared.emit(PlaybackEvent::Started { seq });
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| player.play(&audio)))
            .unwrap_or_else(|payload| {
                Err(LivetransError::Playback {
                    message: format!("Player panicked: {}", panic_message(payload.as_ref())),
                })
            });
        match outcome {
            Ok(()) => shared.emit(PlaybackEvent::Finished { seq }),
            Err(e) => {
                warn!(seq, "Clip playback failed, advancing: {}", e);
                shared.emit(PlaybackEvent::Failed {
                    seq,
                    message: e.to_string(),
                });
            }
        }
        drop(audio);

        let mut state = shared.lock();
        state.now_playing = None;
        if state.is_idle() {
            shared.idle.notify_all();
        }
    }

    let state = shared.lock();
    if state.is_idle() {
        shared.idle.notify_all();
    }
    debug!("Playback worker finished");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
