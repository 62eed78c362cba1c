//! Command-line interface for livetrans
//!
//! Provides argument parsing using clap derive macros.

use crate::codec::AudioEncoding;
use crate::session::Mode;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Realtime speech translation client
#[derive(Parser, Debug)]
#[command(name = "livetrans", version, about = "Realtime speech translation client")]
pub struct Cli {
    /// Subcommand to execute (default: run)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose output (-v: debug logs, -vv: trace logs)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Options of a translation session
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct RunArgs {
    /// Translation mode (selects the service endpoint)
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Spoken language of the input audio (e.g., en, es)
    #[arg(long, value_name = "LANG")]
    pub input_language: Option<String>,

    /// Language to translate into
    #[arg(long, value_name = "LANG")]
    pub target_language: Option<String>,

    /// Translation service host[:port]
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Connect with wss:// instead of ws://
    #[arg(long)]
    pub secure: bool,

    /// Audio input device (e.g., pipewire)
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Audio output device for translated speech
    #[arg(long, value_name = "DEVICE")]
    pub output_device: Option<String>,

    /// Encoding of translated audio payloads (hex, base64, auto)
    #[arg(long, value_name = "ENCODING")]
    pub encoding: Option<AudioEncoding>,

    /// Chunk interval (default: 250ms). Examples: 100ms, 0.5s, 1s
    #[arg(long, value_name = "DURATION", value_parser = parse_interval)]
    pub chunk_interval: Option<Duration>,

    /// Print translations without playing the audio
    #[arg(long)]
    pub no_playback: bool,

    /// Stream a WAV file instead of the microphone
    #[arg(long, value_name = "WAV")]
    pub input_file: Option<PathBuf>,
}

/// Parse an interval string.
///
/// Bare numbers are milliseconds; anything else goes through `humantime`
/// (`250ms`, `1s`, `1s500ms`).
fn parse_interval(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let interval = match s.parse::<u64>() {
        Ok(ms) => Duration::from_millis(ms),
        Err(_) => humantime::parse_duration(s).map_err(|e| e.to_string())?,
    };
    if interval.is_zero() {
        return Err("interval must be greater than zero".to_string());
    }
    Ok(interval)
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a translation session until Ctrl+C (default)
    Run(RunArgs),

    /// List available audio input and output devices
    Devices,

    /// Inspect configuration
    Config {
        /// Action to perform
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}
