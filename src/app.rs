//! Translation session entry point.
//!
//! Wires the pieces together for the `run` command:
//! capture → service → text + playback

use crate::audio::capture::{CpalAudioSource, suppress_audio_warnings};
use crate::audio::player::CpalAudioPlayer;
use crate::audio::recorder::AudioSource;
use crate::audio::wav::WavAudioSource;
use crate::cli::RunArgs;
use crate::config::Config;
use crate::error::{LivetransError, Result};
use crate::output::{ConsoleListener, render_playback_event};
use crate::playback::{PlaybackEvent, PlaybackQueue};
use crate::session::{EngineConfig, SessionEngine, SessionState};
use crate::transport::WebSocketConnector;
use std::sync::Arc;
use tracing::{debug, info};

/// Fold command-line options into the loaded configuration.
pub fn apply_run_args(config: &mut Config, args: &RunArgs) {
    if let Some(mode) = args.mode {
        config.session.mode = mode;
    }
    if let Some(language) = &args.input_language {
        config.session.input_language = Some(language.clone());
    }
    if let Some(language) = &args.target_language {
        config.session.target_language = language.clone();
    }
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if args.secure {
        config.server.secure = true;
    }
    if let Some(device) = &args.device {
        config.audio.device = Some(device.clone());
    }
    if let Some(device) = &args.output_device {
        config.playback.output_device = Some(device.clone());
    }
    if let Some(encoding) = args.encoding {
        config.protocol.audio_encoding = encoding;
    }
    if let Some(interval) = args.chunk_interval {
        config.session.chunk_interval_ms = interval.as_millis().max(1) as u64;
    }
    if args.no_playback {
        config.playback.enabled = false;
    }
}

fn open_source(config: &Config, args: &RunArgs) -> Result<Box<dyn AudioSource>> {
    match &args.input_file {
        Some(path) => {
            let chunk_samples =
                (u64::from(config.audio.sample_rate) * config.session.chunk_interval_ms / 1000) as usize;
            info!(file = %path.display(), "Streaming WAV file instead of the microphone");
            Ok(Box::new(WavAudioSource::from_path(
                path,
                config.audio.sample_rate,
                chunk_samples,
            )?))
        }
        None => Ok(Box::new(CpalAudioSource::new(
            config.audio.device.as_deref(),
            config.audio.sample_rate,
        )?)),
    }
}

fn open_playback(config: &Config, verbosity: u8) -> Result<Option<PlaybackQueue>> {
    if !config.playback.enabled {
        return Ok(None);
    }
    let player = CpalAudioPlayer::new(config.playback.output_device.as_deref())?;

    let events = if verbosity > 0 {
        let (tx, rx) = crossbeam_channel::unbounded::<PlaybackEvent>();
        std::thread::Builder::new()
            .name("livetrans-playback-log".to_string())
            .spawn(move || {
                for event in rx {
                    render_playback_event(&event);
                }
            })
            .map_err(|e| LivetransError::Other(format!("Failed to start event thread: {}", e)))?;
        Some(tx)
    } else {
        None
    };

    PlaybackQueue::spawn(Box::new(player), config.playback.queue_config(), events).map(Some)
}

/// Run one translation session until Ctrl+C or until the service ends it.
///
/// Queued translations keep playing after the session stops; this returns
/// once they have finished.
pub async fn run_session_command(mut config: Config, args: RunArgs, verbosity: u8) -> Result<()> {
    suppress_audio_warnings();

    apply_run_args(&mut config, &args);
    config.validate()?;

    let source = open_source(&config, &args)?;
    let playback = open_playback(&config, verbosity)?;

    let console = Arc::new(
        ConsoleListener::new(config.status.live_labels.clone()).with_clip_notices(verbosity > 0),
    );
    let mut engine = SessionEngine::new(
        EngineConfig::from_config(&config),
        Arc::new(WebSocketConnector::new()),
        source,
    )
    .with_listener(console);
    if let Some(queue) = playback {
        engine = engine.with_playback(queue);
    }
    let handle = engine.spawn();

    eprintln!(
        "Translating {} → {} ({} mode). Press Ctrl+C to stop.",
        config.session.input_language.as_deref().unwrap_or("auto"),
        config.session.target_language,
        config.session.mode
    );
    let mut ended = handle.subscribe_session_end();
    handle
        .start_session(config.session.mode, config.session.input_language.clone())
        .await?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|e| LivetransError::Other(format!("Failed to wait for Ctrl+C: {}", e)))?;
            debug!("Ctrl+C received");
        }
        changed = ended.changed() => {
            if changed.is_err() {
                debug!("Session engine went away");
            } else {
                debug!("Session ended by the engine");
            }
        }
    }

    if handle.state() != SessionState::Idle {
        handle.stop_session().await?;
    }
    if let Some(queue) = handle.shutdown().await
        && !queue.is_idle()
    {
        eprintln!("Finishing queued playback...");
        tokio::task::spawn_blocking(move || queue.finish())
            .await
            .map_err(|e| LivetransError::Other(format!("Playback worker failed: {}", e)))?;
    }

    Ok(())
}
