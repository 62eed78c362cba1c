//! Audio output: plays one translated clip to completion.

use crate::codec::PlayableAudio;
use crate::error::{LivetransError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Output device abstraction used by the playback queue.
///
/// `play` blocks until the clip has finished playing (or failed). The queue
/// calls it from its own worker thread, never from async code.
pub trait AudioPlayer: Send {
    fn play(&mut self, audio: &PlayableAudio) -> Result<()>;
}

#[derive(Debug, Default)]
struct MockPlayerState {
    played: Mutex<Vec<PlayableAudio>>,
    playing: AtomicUsize,
    max_concurrent: AtomicUsize,
    attempts: AtomicUsize,
}

/// Observes a [`MockAudioPlayer`] after it moved onto the playback thread.
#[derive(Debug, Clone)]
pub struct MockPlayerProbe {
    state: Arc<MockPlayerState>,
}

impl MockPlayerProbe {
    /// Clips that played successfully, in completion order.
    pub fn played(&self) -> Vec<PlayableAudio> {
        self.state
            .played
            .lock()
            .map(|played| played.clone())
            .unwrap_or_default()
    }

    /// Raw bytes of every successfully played clip.
    pub fn played_bytes(&self) -> Vec<Vec<u8>> {
        self.played().iter().map(|a| a.bytes().to_vec()).collect()
    }

    /// Highest number of clips ever playing at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.state.max_concurrent.load(Ordering::SeqCst)
    }

    /// Number of play calls, failed ones included.
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }
}

/// Mock player that "plays" each clip by sleeping.
pub struct MockAudioPlayer {
    clip_duration: Duration,
    fail_on: Option<Vec<u8>>,
    panic_on: Option<Vec<u8>>,
    state: Arc<MockPlayerState>,
}

impl MockAudioPlayer {
    pub fn new() -> Self {
        Self {
            clip_duration: Duration::ZERO,
            fail_on: None,
            panic_on: None,
            state: Arc::new(MockPlayerState::default()),
        }
    }

    /// How long each clip takes to play
    pub fn with_clip_duration(mut self, duration: Duration) -> Self {
        self.clip_duration = duration;
        self
    }

    /// Fail playing any clip whose bytes equal `bytes`
    pub fn failing_on(mut self, bytes: &[u8]) -> Self {
        self.fail_on = Some(bytes.to_vec());
        self
    }

    /// Panic while playing any clip whose bytes equal `bytes`
    pub fn panicking_on(mut self, bytes: &[u8]) -> Self {
        self.panic_on = Some(bytes.to_vec());
        self
    }

    pub fn probe(&self) -> MockPlayerProbe {
        MockPlayerProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockAudioPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioPlayer for MockAudioPlayer {
    fn play(&mut self, audio: &PlayableAudio) -> Result<()> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        if self.panic_on.as_deref() == Some(audio.bytes()) {
            panic!("mock output device crashed");
        }
        let now_playing = self.state.playing.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .max_concurrent
            .fetch_max(now_playing, Ordering::SeqCst);

        if !self.clip_duration.is_zero() {
            std::thread::sleep(self.clip_duration);
        }
        self.state.playing.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on.as_deref() == Some(audio.bytes()) {
            return Err(LivetransError::Playback {
                message: "mock output device rejected the clip".to_string(),
            });
        }
        if let Ok(mut played) = self.state.played.lock() {
            played.push(audio.clone());
        }
        Ok(())
    }
}

#[cfg(feature = "cpal-audio")]
pub use self::cpal_output::CpalAudioPlayer;

#[cfg(feature = "cpal-audio")]
mod cpal_output {
    use super::AudioPlayer;
    use crate::audio::capture::{DeviceKind, find_device};
    use crate::audio::wav;
    use crate::codec::PlayableAudio;
    use crate::error::{LivetransError, Result};
    use cpal::traits::{DeviceTrait, StreamTrait};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};
    use tracing::{debug, warn};

    /// Extra time allowed past a clip's nominal duration before giving up.
    const DRAIN_SLACK: Duration = Duration::from_secs(2);

    fn playback_error(message: String) -> LivetransError {
        LivetransError::Playback { message }
    }

    /// Plays WAV clips on an output device.
    ///
    /// A fresh output stream is opened for every clip on the calling thread
    /// and dropped once the clip has drained.
    pub struct CpalAudioPlayer {
        device: cpal::Device,
    }

    impl CpalAudioPlayer {
        /// Open an output device by name, or the best default.
        pub fn new(device_name: Option<&str>) -> Result<Self> {
            let device = find_device(device_name, DeviceKind::Output)?;
            if let Ok(name) = device.name() {
                debug!(device = %name, "Opened output device");
            }
            Ok(Self { device })
        }

        fn build_stream(
            &self,
            config: &cpal::SupportedStreamConfig,
            queue: Arc<Mutex<VecDeque<i16>>>,
            drained: Arc<AtomicBool>,
        ) -> Result<cpal::Stream> {
            use cpal::SampleFormat;

            let stream_config: cpal::StreamConfig = config.clone().into();
            let err_callback = |err| warn!("Audio output stream error: {}", err);

            match config.sample_format() {
                SampleFormat::I16 => self
                    .device
                    .build_output_stream(
                        &stream_config,
                        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                            fill(data, &queue, &drained, |s| s);
                        },
                        err_callback,
                        None,
                    )
                    .map_err(|e| playback_error(format!("Failed to build i16 output stream: {}", e))),
                SampleFormat::F32 => self
                    .device
                    .build_output_stream(
                        &stream_config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            fill(data, &queue, &drained, |s| f32::from(s) / i16::MAX as f32);
                        },
                        err_callback,
                        None,
                    )
                    .map_err(|e| playback_error(format!("Failed to build f32 output stream: {}", e))),
                fmt => Err(playback_error(format!(
                    "Unsupported output sample format: {:?}",
                    fmt
                ))),
            }
        }
    }

    /// Copy queued samples into the device buffer, padding with silence.
    fn fill<T: Copy + Default>(
        data: &mut [T],
        queue: &Mutex<VecDeque<i16>>,
        drained: &AtomicBool,
        convert: impl Fn(i16) -> T,
    ) {
        let Ok(mut queue) = queue.lock() else {
            data.fill(T::default());
            return;
        };
        for slot in data.iter_mut() {
            *slot = queue.pop_front().map(&convert).unwrap_or_default();
        }
        if queue.is_empty() {
            drained.store(true, Ordering::Release);
        }
    }

    impl AudioPlayer for CpalAudioPlayer {
        fn play(&mut self, audio: &PlayableAudio) -> Result<()> {
            let pcm = wav::decode_pcm(audio.bytes())?;
            let config = self
                .device
                .default_output_config()
                .map_err(|e| playback_error(format!("Failed to query output config: {}", e)))?;

            let out_rate = config.sample_rate().0;
            let out_channels = usize::from(config.channels());
            let mono = wav::to_mono(&pcm.samples, usize::from(pcm.channels), pcm.sample_rate, out_rate);
            let frames = mono.len();
            let samples = wav::upmix(&mono, out_channels);

            let queue = Arc::new(Mutex::new(VecDeque::from(samples)));
            let drained = Arc::new(AtomicBool::new(false));
            let stream = self.build_stream(&config, Arc::clone(&queue), Arc::clone(&drained))?;
            stream
                .play()
                .map_err(|e| playback_error(format!("Failed to start output stream: {}", e)))?;

            let nominal = Duration::from_secs_f64(frames as f64 / f64::from(out_rate.max(1)));
            let deadline = Instant::now() + nominal + DRAIN_SLACK;
            while !drained.load(Ordering::Acquire) {
                if Instant::now() >= deadline {
                    return Err(playback_error(
                        "Output device stopped consuming audio".to_string(),
                    ));
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            // Let the device play out its last buffer before the stream drops
            std::thread::sleep(Duration::from_millis(50));
            Ok(())
        }
    }

}
