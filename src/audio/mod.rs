//! Audio devices: microphone sources and clip players.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod player;
pub mod recorder;
pub mod wav;
