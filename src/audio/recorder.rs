use crate::error::{LivetransError, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Trait for microphone-like audio sources.
///
/// This trait allows swapping implementations (real audio device vs mock).
pub trait AudioSource: Send + Sync {
    /// Start capturing audio from the source.
    ///
    /// # Returns
    /// Ok(()) if the source started successfully, or an error
    fn start(&mut self) -> Result<()>;

    /// Stop capturing and release the device.
    fn stop(&mut self) -> Result<()>;

    /// Drain the samples captured since the previous call.
    ///
    /// # Returns
    /// Vector of 16-bit PCM audio samples, or an error
    fn read_samples(&mut self) -> Result<Vec<i16>>;
}

/// Serialize PCM16 samples as little-endian bytes, the outbound chunk format.
pub fn pcm16_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[derive(Debug, Default)]
struct MockSourceState {
    started: AtomicBool,
    start_count: AtomicUsize,
    stop_count: AtomicUsize,
    read_count: AtomicUsize,
}

/// Observes a [`MockAudioSource`] after it has been boxed away.
#[derive(Debug, Clone)]
pub struct MockSourceProbe {
    state: Arc<MockSourceState>,
}

impl MockSourceProbe {
    pub fn is_started(&self) -> bool {
        self.state.started.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.state.start_count.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.state.stop_count.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> usize {
        self.state.read_count.load(Ordering::SeqCst)
    }
}

/// Mock audio source for testing.
///
/// Each read returns the next scripted batch; once the script runs out, every
/// read returns the fallback samples.
#[derive(Debug)]
pub struct MockAudioSource {
    batches: Mutex<VecDeque<Vec<i16>>>,
    fallback: Vec<i16>,
    deny_access: bool,
    fail_reads: bool,
    error_message: String,
    state: Arc<MockSourceState>,
}

impl MockAudioSource {
    /// Create a mock that yields 10ms of silence per read
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(VecDeque::new()),
            fallback: vec![0i16; 160],
            deny_access: false,
            fail_reads: false,
            error_message: "mock microphone error".to_string(),
            state: Arc::new(MockSourceState::default()),
        }
    }

    /// Script the batches returned by successive reads
    pub fn with_batches(self, batches: Vec<Vec<i16>>) -> Self {
        if let Ok(mut queued) = self.batches.lock() {
            queued.extend(batches);
        }
        self
    }

    /// Samples returned once the script is exhausted
    pub fn with_fallback(mut self, samples: Vec<i16>) -> Self {
        self.fallback = samples;
        self
    }

    /// Behave like a microphone whose access was denied
    pub fn with_access_denied(mut self) -> Self {
        self.deny_access = true;
        self
    }

    /// Fail every read
    pub fn with_read_failure(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    pub fn probe(&self) -> MockSourceProbe {
        MockSourceProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.deny_access {
            return Err(LivetransError::CaptureUnavailable {
                message: self.error_message.clone(),
            });
        }
        self.state.started.store(true, Ordering::SeqCst);
        self.state.start_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.state.started.store(false, Ordering::SeqCst);
        self.state.stop_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        self.state.read_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads {
            return Err(LivetransError::CaptureUnavailable {
                message: self.error_message.clone(),
            });
        }
        let next = self
            .batches
            .lock()
            .ok()
            .and_then(|mut batches| batches.pop_front());
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_le_bytes_layout() {
        assert_eq!(pcm16_le_bytes(&[1, -1, 256]), vec![1, 0, 0xff, 0xff, 0, 1]);
        assert!(pcm16_le_bytes(&[]).is_empty());
    }

    #[test]
    fn test_mock_returns_scripted_batches_then_fallback() {
        let mut source = MockAudioSource::new()
            .with_batches(vec![vec![1, 2], vec![3]])
            .with_fallback(vec![9]);

        assert_eq!(source.read_samples().unwrap(), vec![1, 2]);
        assert_eq!(source.read_samples().unwrap(), vec![3]);
        assert_eq!(source.read_samples().unwrap(), vec![9]);
        assert_eq!(source.read_samples().unwrap(), vec![9]);
    }

    #[test]
    fn test_mock_default_yields_silence() {
        let mut source = MockAudioSource::new();
        let samples = source.read_samples().unwrap();
        assert_eq!(samples.len(), 160);
        assert!(samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_mock_access_denied_is_capture_unavailable() {
        let mut source = MockAudioSource::new()
            .with_access_denied()
            .with_error_message("permission denied");

        match source.start() {
            Err(LivetransError::CaptureUnavailable { message }) => {
                assert_eq!(message, "permission denied");
            }
            other => panic!("Expected CaptureUnavailable, got {:?}", other),
        }
        assert!(!source.probe().is_started());
    }

    #[test]
    fn test_mock_read_failure() {
        let mut source = MockAudioSource::new().with_read_failure();
        assert!(source.read_samples().is_err());
        assert_eq!(source.probe().read_count(), 1);
    }

    #[test]
    fn test_probe_observes_boxed_source() {
        let source = MockAudioSource::new();
        let probe = source.probe();
        let mut boxed: Box<dyn AudioSource> = Box::new(source);

        boxed.start().unwrap();
        assert!(probe.is_started());
        boxed.read_samples().unwrap();
        boxed.stop().unwrap();

        assert!(!probe.is_started());
        assert_eq!(probe.start_count(), 1);
        assert_eq!(probe.stop_count(), 1);
        assert_eq!(probe.read_count(), 1);
    }
}
