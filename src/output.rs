//! Terminal rendering of session output.
//!
//! Translated text goes to stdout so it can be piped; status, level meter and
//! clip notices go to stderr.

use crate::codec::PlayableAudio;
use crate::playback::PlaybackEvent;
use crate::session::{SessionListener, SessionState, StatusUpdate};
use owo_colors::OwoColorize;
use std::io::{self, Write};

/// Width of the level bar in cells.
const LEVEL_BAR_WIDTH: usize = 20;

/// Clear the current terminal line (replaces the level bar)
pub fn clear_line() {
    eprint!("\r\x1b[2K");
}

/// Render a 0..=100 level as a fixed-width bar.
pub fn format_level_bar(level: u8) -> String {
    let filled = (usize::from(level.min(100)) * LEVEL_BAR_WIDTH).div_ceil(100);
    format!(
        "[{}{}] {:>3}%",
        "#".repeat(filled),
        " ".repeat(LEVEL_BAR_WIDTH - filled),
        level
    )
}

/// Describe a clip for the console: size, and duration when the WAV header
/// can be read.
pub fn describe_clip(audio: &PlayableAudio) -> String {
    match audio.duration() {
        Some(duration) => format!("{:.1}s, {} bytes", duration.as_secs_f32(), audio.len()),
        None => format!("{} bytes", audio.len()),
    }
}

/// Prints session output to the terminal.
pub struct ConsoleListener {
    live_labels: Vec<String>,
    show_clips: bool,
}

impl ConsoleListener {
    pub fn new(live_labels: Vec<String>) -> Self {
        Self {
            live_labels,
            show_clips: false,
        }
    }

    /// Also print a line for every translated clip.
    pub fn with_clip_notices(mut self, show: bool) -> Self {
        self.show_clips = show;
        self
    }

    fn render_status(&self, status: &StatusUpdate) -> String {
        let dot = if status.is_live(&self.live_labels) {
            "●".green().to_string()
        } else {
            "●".red().to_string()
        };
        let label = if status.is_error() {
            status.label.red().to_string()
        } else {
            status.label.clone()
        };
        match status.level {
            Some(level) => format!("{} {}  {}", dot, label, format_level_bar(level).dimmed()),
            None => format!("{} {}", dot, label),
        }
    }
}

impl SessionListener for ConsoleListener {
    fn on_status_changed(&self, status: &StatusUpdate) {
        let line = self.render_status(status);
        if status.level.is_some() {
            // Meter updates overwrite each other in place
            eprint!("\r\x1b[2K{}", line);
            io::stderr().flush().ok();
        } else {
            clear_line();
            eprintln!("{}", line);
        }
    }

    fn on_translation_text(&self, text: &str) {
        clear_line();
        println!("{}", text);
    }

    fn on_audio_ready(&self, audio: &PlayableAudio) {
        if self.show_clips {
            clear_line();
            eprintln!("  {}", format!("clip: {}", describe_clip(audio)).dimmed());
        }
    }

    fn on_state_changed(&self, state: SessionState) {
        if state == SessionState::Stopping {
            clear_line();
            eprintln!("{}", "Stopping...".dimmed());
        }
    }
}

/// Render a playback event to stderr.
pub fn render_playback_event(event: &PlaybackEvent) {
    match event {
        PlaybackEvent::Started { seq } => eprintln!("  {}", format!("playing clip #{}", seq).dimmed()),
        PlaybackEvent::Finished { .. } => {}
        PlaybackEvent::Failed { seq, message } => {
            eprintln!("  {} clip #{}: {}", "playback failed".yellow(), seq, message)
        }
        PlaybackEvent::Dropped { seq } => {
            eprintln!("  {}", format!("clip #{} dropped (queue full)", seq).yellow())
        }
    }
}
