//! Interval-driven capture: turns an [`AudioSource`] into a stream of outbound
//! audio chunks.

use crate::audio::recorder::{AudioSource, pcm16_le_bytes};
use crate::defaults::CAPTURE_CHANNEL_CAPACITY;
use crate::error::{LivetransError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

/// One interval's worth of captured audio, little-endian PCM16.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureChunk {
    /// Capture run the chunk belongs to; bumped by every stop.
    pub epoch: u64,
    /// Position within the run, from 0.
    pub sequence: u64,
    pub bytes: Vec<u8>,
}

/// Item on the capture stream: a chunk, or the error that ended the run.
pub type CaptureItem = Result<CaptureChunk>;

/// Drives an audio source on a fixed interval.
pub struct CaptureSource {
    source: Arc<Mutex<Box<dyn AudioSource>>>,
    active: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    epoch: u64,
}

fn capture_unavailable(error: LivetransError) -> LivetransError {
    match error {
        LivetransError::CaptureUnavailable { .. } => error,
        other => LivetransError::CaptureUnavailable {
            message: other.to_string(),
        },
    }
}

impl CaptureSource {
    pub fn new(source: Box<dyn AudioSource>) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            active: Arc::new(AtomicBool::new(false)),
            task: None,
            epoch: 0,
        }
    }

    /// Open the device and start producing one chunk per `interval`.
    ///
    /// The first chunk arrives one interval after start. Intervals in which
    /// the device delivered nothing produce no chunk.
    ///
    /// # Errors
    /// Returns `LivetransError::CaptureUnavailable` if the device cannot be
    /// opened or is already capturing.
    pub fn start(&mut self, interval: Duration) -> Result<mpsc::Receiver<CaptureItem>> {
        if self.active.load(Ordering::SeqCst) {
            return Err(LivetransError::CaptureUnavailable {
                message: "capture already running".to_string(),
            });
        }

        {
            let mut source = self
                .source
                .lock()
                .map_err(|_| LivetransError::CaptureUnavailable {
                    message: "audio source lock poisoned".to_string(),
                })?;
            source.start().map_err(capture_unavailable)?;
        }

        self.active.store(true, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(CAPTURE_CHANNEL_CAPACITY);
        let source = Arc::clone(&self.source);
        let active = Arc::clone(&self.active);
        let epoch = self.epoch;
        let interval = interval.max(Duration::from_millis(1));

        debug!(epoch, interval_ms = interval.as_millis() as u64, "Capture started");
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            let mut sequence = 0u64;
            loop {
                ticker.tick().await;
                if !active.load(Ordering::SeqCst) {
                    break;
                }

                let read = match source.lock() {
                    Ok(mut source) => source.read_samples(),
                    Err(_) => Err(LivetransError::CaptureUnavailable {
                        message: "audio source lock poisoned".to_string(),
                    }),
                };

                let samples = match read {
                    Ok(samples) => samples,
                    Err(e) => {
                        warn!("Audio capture failed: {}", e);
                        if tx.send(Err(capture_unavailable(e))).await.is_err() {
                            trace!("Capture error not delivered; stream closed");
                        }
                        break;
                    }
                };
                if samples.is_empty() {
                    continue;
                }

                let chunk = CaptureChunk {
                    epoch,
                    sequence,
                    bytes: pcm16_le_bytes(&samples),
                };
                if !active.load(Ordering::SeqCst) || tx.send(Ok(chunk)).await.is_err() {
                    break;
                }
                sequence += 1;
            }
            trace!(epoch, "Capture task finished");
        }));

        Ok(rx)
    }

    /// Stop producing chunks and release the device. Idempotent.
    ///
    /// No interval fires after this returns; chunks already in the stream
    /// carry the old epoch.
    pub async fn stop(&mut self) {
        let was_active = self.active.swap(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
            if let Err(e) = task.await
                && !e.is_cancelled()
            {
                warn!("Capture task failed: {}", e);
            }
        }
        if !was_active {
            return;
        }

        match self.source.lock() {
            Ok(mut source) => {
                if let Err(e) = source.stop() {
                    warn!("Failed to release audio device: {}", e);
                }
            }
            Err(_) => warn!("Audio source lock poisoned; device not released"),
        }
        debug!(epoch = self.epoch, "Capture stopped");
        self.epoch += 1;
    }

    /// Epoch of the current (or next) capture run.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
