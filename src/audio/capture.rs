//! Microphone capture and device discovery using CPAL.

use crate::audio::recorder::AudioSource;
use crate::audio::wav;
use crate::error::{LivetransError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// CPAL probes every backend it knows about, and ALSA/JACK print harmless
/// complaints while it does.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2.
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Quiet JACK/ALSA/PipeWire diagnostics before any backend is probed.
///
/// # Safety
/// Modifies environment variables; call at startup before spawning threads.
pub fn suppress_audio_warnings() {
    // SAFETY: called from main before the runtime starts
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// Sound-server devices that follow the desktop's device selection.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Raw ALSA channel maps and digital outs nobody talks into.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// Direction of an audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Input,
    Output,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Input => write!(f, "input"),
            DeviceKind::Output => write!(f, "output"),
        }
    }
}

/// A device as presented by the `devices` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub kind: DeviceKind,
    pub recommended: bool,
}

fn collect_devices(
    devices: impl Iterator<Item = cpal::Device>,
    kind: DeviceKind,
) -> Vec<DeviceInfo> {
    devices
        .filter_map(|device| device.name().ok())
        .filter(|name| !should_filter_device(name))
        .map(|name| DeviceInfo {
            recommended: is_preferred_device(&name),
            name,
            kind,
        })
        .collect()
}

/// List usable input and output devices, inputs first.
///
/// Channel-map aliases and digital outputs are filtered out; sound-server
/// devices are marked recommended.
///
/// # Errors
/// Returns `LivetransError::AudioDeviceNotFound` if enumeration fails.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let inputs = host
            .input_devices()
            .map_err(|e| LivetransError::AudioDeviceNotFound {
                device: format!("input devices ({})", e),
            })?;
        let mut found = collect_devices(inputs, DeviceKind::Input);

        let outputs = host
            .output_devices()
            .map_err(|e| LivetransError::AudioDeviceNotFound {
                device: format!("output devices ({})", e),
            })?;
        found.extend(collect_devices(outputs, DeviceKind::Output));
        Ok(found)
    })
}

/// Find a device by exact name, or the best default when `name` is None.
///
/// The default prefers PipeWire, then PulseAudio, then the host's own default.
pub(crate) fn find_device(name: Option<&str>, kind: DeviceKind) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = match kind {
            DeviceKind::Input => host.input_devices(),
            DeviceKind::Output => host.output_devices(),
        };
        let devices: Vec<cpal::Device> = devices.map(Iterator::collect).unwrap_or_default();

        if let Some(name) = name {
            return devices
                .into_iter()
                .find(|dev| dev.name().is_ok_and(|dev_name| dev_name == name))
                .ok_or_else(|| LivetransError::AudioDeviceNotFound {
                    device: name.to_string(),
                });
        }

        if let Some(device) = devices
            .into_iter()
            .find(|dev| dev.name().is_ok_and(|n| is_preferred_device(&n)))
        {
            return Ok(device);
        }

        let fallback = match kind {
            DeviceKind::Input => host.default_input_device(),
            DeviceKind::Output => host.default_output_device(),
        };
        fallback.ok_or_else(|| LivetransError::AudioDeviceNotFound {
            device: format!("default {}", kind),
        })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched through the Mutex in CpalAudioSource,
/// and its methods are called synchronously.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Microphone capture producing mono PCM16 at the session sample rate.
///
/// Tries i16 then f32 at the session format first, then falls back to the
/// device's native config with software channel mixing and resampling.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Arc<Mutex<Option<SendableStream>>>,
    buffer: Arc<Mutex<Vec<i16>>>,
    callback_count: Arc<AtomicU64>,
    sample_rate: u32,
}

fn capture_error(message: String) -> LivetransError {
    LivetransError::CaptureUnavailable { message }
}

impl CpalAudioSource {
    /// Open an input device.
    ///
    /// # Errors
    /// Returns `LivetransError::AudioDeviceNotFound` if the named device
    /// (or any default) does not exist.
    pub fn new(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let device = find_device(device_name, DeviceKind::Input)?;
        if let Ok(name) = device.name() {
            debug!(device = %name, sample_rate, "Opened input device");
        }

        Ok(Self {
            device,
            stream: Arc::new(Mutex::new(None)),
            buffer: Arc::new(Mutex::new(Vec::new())),
            callback_count: Arc::new(AtomicU64::new(0)),
            sample_rate,
        })
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            |err| warn!("Audio input stream error: {}", err),
            None,
        ) {
            return Ok(stream);
        }

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend(
                        data.iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
                    );
                }
            },
            |err| warn!("Audio input stream error: {}", err),
            None,
        ) {
            return Ok(stream);
        }

        self.build_stream_native()
    }

    /// Capture at the device's native config and convert in software.
    fn build_stream_native(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config = self
            .device
            .default_input_config()
            .map_err(|e| capture_error(format!("Failed to query default input config: {}", e)))?;

        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        info!(
            channels = native_channels,
            rate = native_rate,
            format = ?default_config.sample_format(),
            "Using native input format, converting in software"
        );

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);

        match default_config.sample_format() {
            SampleFormat::I16 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        let converted = wav::to_mono(data, native_channels, native_rate, target_rate);
                        if let Ok(mut buf) = buffer.lock() {
                            buf.extend_from_slice(&converted);
                        }
                    },
                    |err| warn!("Audio input stream error: {}", err),
                    None,
                )
                .map_err(|e| capture_error(format!("Failed to build native i16 stream: {}", e))),
            SampleFormat::F32 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        let i16_data: Vec<i16> = data
                            .iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                            .collect();
                        let converted =
                            wav::to_mono(&i16_data, native_channels, native_rate, target_rate);
                        if let Ok(mut buf) = buffer.lock() {
                            buf.extend_from_slice(&converted);
                        }
                    },
                    |err| warn!("Audio input stream error: {}", err),
                    None,
                )
                .map_err(|e| capture_error(format!("Failed to build native f32 stream: {}", e))),
            fmt => Err(capture_error(format!(
                "Unsupported native sample format: {:?}. Try another device with --device.",
                fmt
            ))),
        }
    }
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        {
            let stream_guard = self
                .stream
                .lock()
                .map_err(|e| capture_error(format!("Failed to lock stream: {}", e)))?;
            if stream_guard.is_some() {
                return Ok(());
            }
        }

        self.callback_count.store(0, Ordering::Relaxed);
        let stream = self.build_stream()?;
        stream
            .play()
            .map_err(|e| capture_error(format!("Failed to start audio stream: {}", e)))?;

        // Some PipeWire-ALSA setups accept non-native configs but never fire the callback
        std::thread::sleep(Duration::from_millis(200));

        let final_stream = if self.callback_count.load(Ordering::Relaxed) == 0 {
            debug!("Preferred input config delivered no data; retrying with native config");
            drop(stream);
            if let Ok(mut buf) = self.buffer.lock() {
                buf.clear();
            }

            let native_stream = self.build_stream_native()?;
            native_stream
                .play()
                .map_err(|e| capture_error(format!("Failed to start native audio stream: {}", e)))?;
            native_stream
        } else {
            stream
        };

        let mut stream_guard = self
            .stream
            .lock()
            .map_err(|e| capture_error(format!("Failed to lock stream: {}", e)))?;
        *stream_guard = Some(SendableStream(final_stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut stream_guard = self
            .stream
            .lock()
            .map_err(|e| capture_error(format!("Failed to lock stream: {}", e)))?;

        if let Some(sendable_stream) = stream_guard.take() {
            sendable_stream
                .0
                .pause()
                .map_err(|e| capture_error(format!("Failed to stop audio stream: {}", e)))?;
        }
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|e| capture_error(format!("Failed to lock audio buffer: {}", e)))?;
        Ok(std::mem::take(&mut *buffer))
    }
}
