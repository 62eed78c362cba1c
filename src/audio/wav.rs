//! WAV helpers: decoding translated audio for playback, format conversion,
//! and a file-backed audio source that stands in for the microphone.

use crate::audio::recorder::AudioSource;
use crate::error::{LivetransError, Result};
use std::io::{Cursor, Read};
use std::path::Path;

/// PCM decoded from a WAV container, interleaved in the file's channel layout.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPcm {
    pub samples: Vec<i16>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl DecodedPcm {
    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }
}

fn int_to_i16(sample: i32, bits: u16) -> i16 {
    match bits {
        0..=16 => (sample << (16 - bits)) as i16,
        _ => (sample >> (bits - 16)) as i16,
    }
}

fn float_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Decode a WAV container into 16-bit PCM.
///
/// Integer formats of any width and 32-bit float are accepted.
///
/// # Errors
/// Returns `LivetransError::Playback` if the bytes are not a readable WAV file.
pub fn decode_pcm(bytes: &[u8]) -> Result<DecodedPcm> {
    read_pcm(Cursor::new(bytes)).map_err(|message| LivetransError::Playback { message })
}

fn read_pcm<R: Read>(reader: R) -> std::result::Result<DecodedPcm, String> {
    let mut wav_reader =
        hound::WavReader::new(reader).map_err(|e| format!("Failed to parse WAV file: {}", e))?;
    let spec = wav_reader.spec();
    if spec.channels == 0 {
        return Err("WAV file declares zero channels".to_string());
    }
    if spec.sample_rate == 0 {
        return Err("WAV file declares a zero sample rate".to_string());
    }

    let samples = match spec.sample_format {
        hound::SampleFormat::Int if spec.bits_per_sample <= 16 => wav_reader
            .samples::<i16>()
            .map(|s| s.map(|v| int_to_i16(i32::from(v), spec.bits_per_sample)))
            .collect::<std::result::Result<Vec<_>, _>>(),
        hound::SampleFormat::Int => wav_reader
            .samples::<i32>()
            .map(|s| s.map(|v| int_to_i16(v, spec.bits_per_sample)))
            .collect::<std::result::Result<Vec<_>, _>>(),
        hound::SampleFormat::Float => wav_reader
            .samples::<f32>()
            .map(|s| s.map(float_to_i16))
            .collect::<std::result::Result<Vec<_>, _>>(),
    }
    .map_err(|e| format!("Failed to read WAV samples: {}", e))?;

    Ok(DecodedPcm {
        samples,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
    })
}

/// Average interleaved channels down to mono.
pub fn downmix(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Duplicate mono samples across `channels` interleaved channels.
pub fn upmix(mono: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return mono.to_vec();
    }
    mono.iter()
        .flat_map(|&s| std::iter::repeat_n(s, channels))
        .collect()
}

/// Mix to mono and resample to the target rate.
pub fn to_mono(samples: &[i16], channels: usize, source_rate: u32, target_rate: u32) -> Vec<i16> {
    resample(&downmix(samples, channels), source_rate, target_rate)
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

/// Audio source that replays a WAV file in place of the microphone.
///
/// The file is converted to mono at the session sample rate; each read yields
/// the next `chunk_samples` samples and an empty batch once the file is spent.
pub struct WavAudioSource {
    samples: Vec<i16>,
    position: usize,
    chunk_samples: usize,
}

impl WavAudioSource {
    /// Create from any reader.
    ///
    /// # Errors
    /// Returns `LivetransError::CaptureUnavailable` if the data is not a
    /// readable WAV file.
    pub fn from_reader(
        reader: Box<dyn Read + Send>,
        sample_rate: u32,
        chunk_samples: usize,
    ) -> Result<Self> {
        let pcm = read_pcm(reader).map_err(|message| LivetransError::CaptureUnavailable { message })?;
        let samples = to_mono(
            &pcm.samples,
            usize::from(pcm.channels),
            pcm.sample_rate,
            sample_rate,
        );
        Ok(Self {
            samples,
            position: 0,
            chunk_samples: chunk_samples.max(1),
        })
    }

    /// Open a WAV file from disk.
    pub fn from_path(path: &Path, sample_rate: u32, chunk_samples: usize) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| LivetransError::CaptureUnavailable {
            message: format!("Cannot open {}: {}", path.display(), e),
        })?;
        Self::from_reader(
            Box::new(std::io::BufReader::new(file)),
            sample_rate,
            chunk_samples,
        )
    }

    /// Samples not yet handed out.
    pub fn remaining(&self) -> usize {
        self.samples.len() - self.position
    }
}

impl AudioSource for WavAudioSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.position >= self.samples.len() {
            return Ok(Vec::new());
        }

        let end = std::cmp::min(self.position + self.chunk_samples, self.samples.len());
        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;

        Ok(chunk)
    }
}

#[cfg(test)]
pub(crate) fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
    cursor.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_from(data: Vec<u8>, rate: u32, chunk: usize) -> Result<WavAudioSource> {
        WavAudioSource::from_reader(Box::new(Cursor::new(data)), rate, chunk)
    }

    #[test]
    fn decode_pcm_keeps_layout() {
        let wav = make_wav_data(22050, 2, &[1, 2, 3, 4]);
        let pcm = decode_pcm(&wav).unwrap();
        assert_eq!(pcm.samples, vec![1, 2, 3, 4]);
        assert_eq!(pcm.channels, 2);
        assert_eq!(pcm.sample_rate, 22050);
        assert_eq!(pcm.frames(), 2);
    }

    #[test]
    fn decode_pcm_converts_float_samples() {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for s in [0.0f32, 1.0, -1.0, 2.0] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let pcm = decode_pcm(&cursor.into_inner()).unwrap();
        assert_eq!(pcm.samples, vec![0, i16::MAX, -i16::MAX, i16::MAX]);
    }

    #[test]
    fn decode_pcm_scales_8_bit_samples() {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 8,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        writer.write_sample(64i8).unwrap();
        writer.finalize().unwrap();

        let pcm = decode_pcm(&cursor.into_inner()).unwrap();
        assert_eq!(pcm.samples, vec![64 << 8]);
    }

    #[test]
    fn decode_pcm_rejects_garbage() {
        let garbage: Vec<u8> = (0..500).map(|i| ((i * 17 + 42) % 256) as u8).collect();
        match decode_pcm(&garbage) {
            Err(LivetransError::Playback { message }) => {
                assert!(message.contains("Failed to parse WAV"), "got: {}", message);
            }
            other => panic!("Expected Playback error, got {:?}", other),
        }
    }

    /// A valid WAV with the sample rate and byte rate fields zeroed.
    fn zero_rate_wav() -> Vec<u8> {
        let mut wav = make_wav_data(16000, 1, &[1, 2, 3, 4]);
        wav[24..32].fill(0);
        wav
    }

    #[test]
    fn decode_pcm_rejects_zero_sample_rate() {
        match decode_pcm(&zero_rate_wav()) {
            Err(LivetransError::Playback { message }) => {
                assert!(message.contains("zero sample rate"), "got: {}", message);
            }
            other => panic!("Expected Playback error, got {:?}", other),
        }
        assert!(source_from(zero_rate_wav(), 16000, 10).is_err());
    }

    #[test]
    fn resample_passes_zero_rates_through() {
        let samples = vec![1i16, 2, 3];
        assert_eq!(resample(&samples, 0, 48000), samples);
        assert_eq!(resample(&samples, 16000, 0), samples);
        assert_eq!(to_mono(&[1, 3, 5, 7], 2, 0, 48000), vec![2, 6]);
    }

    #[test]
    fn downmix_averages_channels() {
        assert_eq!(downmix(&[100, 200, 300, 400], 2), vec![150, 350]);
        assert_eq!(downmix(&[-100, 100, 300, -300], 2), vec![0, 0]);
        assert_eq!(downmix(&[5, 6], 1), vec![5, 6]);
    }

    #[test]
    fn upmix_duplicates_samples() {
        assert_eq!(upmix(&[1, 2], 2), vec![1, 1, 2, 2]);
        assert_eq!(upmix(&[1, 2], 1), vec![1, 2]);
    }

    #[test]
    fn resample_identity_same_rate() {
        let samples = vec![100i16, 200, 300, 400, 500];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn resample_upsample_interpolates() {
        let resampled = resample(&[0i16, 1000, 2000], 8000, 16000);
        assert_eq!(resampled.len(), 6);
        assert_eq!(resampled[0], 0);
        assert!(resampled[1] > 0 && resampled[1] < 1000);
        assert_eq!(resampled[2], 1000);
    }

    #[test]
    fn resample_downsample_halves_length() {
        assert_eq!(resample(&vec![0i16; 3200], 16000, 8000).len(), 1600);
    }

    #[test]
    fn resample_handles_edge_cases() {
        assert!(resample(&[], 16000, 8000).is_empty());
        assert_eq!(resample(&[100i16], 16000, 8000), vec![100]);
    }

    #[test]
    fn source_converts_to_session_format() {
        let wav = make_wav_data(48000, 2, &vec![1000i16; 96000]);
        let source = source_from(wav, 16000, 4000).unwrap();
        assert!((15900..=16100).contains(&source.remaining()));
    }

    #[test]
    fn source_reads_in_chunks_then_runs_dry() {
        let wav = make_wav_data(16000, 1, &vec![1i16; 5000]);
        let mut source = source_from(wav, 16000, 1600).unwrap();

        assert_eq!(source.read_samples().unwrap().len(), 1600);
        assert_eq!(source.read_samples().unwrap().len(), 1600);
        assert_eq!(source.read_samples().unwrap().len(), 1600);
        assert_eq!(source.read_samples().unwrap().len(), 200);
        assert!(source.read_samples().unwrap().is_empty());
        assert!(source.read_samples().unwrap().is_empty());
    }

    #[test]
    fn source_start_stop_are_noops() {
        let wav = make_wav_data(16000, 1, &[1, 2, 3]);
        let mut source = source_from(wav, 16000, 10).unwrap();
        assert!(source.start().is_ok());
        assert!(source.stop().is_ok());
        assert_eq!(source.read_samples().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn invalid_file_is_capture_unavailable() {
        match source_from(vec![0u8; 1000], 16000, 10) {
            Err(LivetransError::CaptureUnavailable { message }) => {
                assert!(message.contains("Failed to parse WAV file"));
            }
            other => panic!("Expected CaptureUnavailable, got {:?}", other.err()),
        }
        assert!(source_from(Vec::new(), 16000, 10).is_err());
    }

    #[test]
    fn missing_file_is_capture_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let result = WavAudioSource::from_path(&dir.path().join("absent.wav"), 16000, 10);
        assert!(matches!(
            result,
            Err(LivetransError::CaptureUnavailable { .. })
        ));
    }
}
