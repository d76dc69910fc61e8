//! # Local Speech Synthesis
//!
//! Used for exactly one thing: telling the caller, in their language, that
//! the conversation could not be started. It must not depend on the
//! conversation engine, so it shells out to `espeak-ng`.
//!
//! ## Pipeline:
//! 1. `espeak-ng -w <tmp>.wav` renders the text
//! 2. the WAV is parsed with the `wav` crate and downmixed to mono
//! 3. [`to_media_frames`] resamples to 8 kHz with the same rate converter
//!    the inbound path uses, µ-law encodes and cuts 20 ms frames

use crate::audio::codec;
use crate::audio::resample::RateConverter;
use crate::audio::transcoder::TELEPHONY_RATE;
use crate::config::SpeechConfig;
use futures_util::future::BoxFuture;
use std::fmt;
use std::io::Cursor;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// 20 ms of µ-law at 8 kHz.
pub const FRAME_BYTES: usize = 160;

/// Mono PCM as produced by a synthesizer.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

#[derive(Debug)]
pub enum SpeechError {
    /// The synthesizer binary could not be run.
    Spawn(std::io::Error),
    /// It ran and failed.
    Failed(String),
    /// It produced something that is not usable audio.
    InvalidAudio(String),
}

impl fmt::Display for SpeechError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeechError::Spawn(err) => write!(f, "could not start synthesizer: {}", err),
            SpeechError::Failed(msg) => write!(f, "synthesizer failed: {}", msg),
            SpeechError::InvalidAudio(msg) => write!(f, "invalid synthesized audio: {}", msg),
        }
    }
}

impl std::error::Error for SpeechError {}

pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(&self, text: String, lang: String) -> BoxFuture<'static, Result<SynthesizedAudio, SpeechError>>;
}

/// What the caller hears when no session could be opened.
pub fn apology_text(lang: &str) -> &'static str {
    match lang {
        "es" => "Lo sentimos, la máquina del tiempo tiene problemas técnicos en este momento. Por favor, inténtalo de nuevo más tarde.",
        _ => "We're sorry, the time machine is having technical difficulties right now. Please try again later.",
    }
}

#[derive(Debug, Clone)]
pub struct EspeakSynthesizer {
    command: String,
    voice_en: String,
    voice_es: String,
    words_per_minute: u32,
}

impl EspeakSynthesizer {
    pub fn new(config: &SpeechConfig) -> Self {
        Self {
            command: config.command.clone(),
            voice_en: config.voice_en.clone(),
            voice_es: config.voice_es.clone(),
            words_per_minute: config.words_per_minute,
        }
    }

    fn voice_for(&self, lang: &str) -> &str {
        match lang {
            "es" => &self.voice_es,
            _ => &self.voice_en,
        }
    }

    async fn render(&self, text: &str, lang: &str) -> Result<SynthesizedAudio, SpeechError> {
        let path: PathBuf = std::env::temp_dir().join(format!("time-traveler-{}.wav", Uuid::new_v4()));

        let output = Command::new(&self.command)
            .arg("-v")
            .arg(self.voice_for(lang))
            .arg("-s")
            .arg(self.words_per_minute.to_string())
            .arg("-w")
            .arg(&path)
            .arg(text)
            .output()
            .await
            .map_err(SpeechError::Spawn)?;

        if !output.status.success() {
            let _ = tokio::fs::remove_file(&path).await;
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SpeechError::Failed(stderr.trim().to_string()));
        }

        let bytes = tokio::fs::read(&path).await;
        if let Err(err) = tokio::fs::remove_file(&path).await {
            debug!(path = %path.display(), error = %err, "Could not remove synthesizer output");
        }
        let bytes = bytes.map_err(|err| SpeechError::InvalidAudio(err.to_string()))?;

        decode_wav(&bytes)
    }
}

impl SpeechSynthesizer for EspeakSynthesizer {
    fn synthesize(&self, text: String, lang: String) -> BoxFuture<'static, Result<SynthesizedAudio, SpeechError>> {
        let synthesizer = self.clone();
        Box::pin(async move { synthesizer.render(&text, &lang).await })
    }
}

/// Parse a WAV file into mono 16-bit samples.
pub fn decode_wav(bytes: &[u8]) -> Result<SynthesizedAudio, SpeechError> {
    let (header, data) =
        wav::read(&mut Cursor::new(bytes)).map_err(|err| SpeechError::InvalidAudio(err.to_string()))?;

    let interleaved: Vec<i16> = match data {
        wav::BitDepth::Sixteen(samples) => samples,
        wav::BitDepth::Eight(samples) => samples.into_iter().map(|s| ((s as i16) - 128) << 8).collect(),
        wav::BitDepth::TwentyFour(samples) => samples.into_iter().map(|s| (s >> 8) as i16).collect(),
        wav::BitDepth::ThirtyTwoFloat(samples) => samples
            .into_iter()
            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect(),
        wav::BitDepth::Empty => return Err(SpeechError::InvalidAudio("no sample data".to_string())),
    };

    let channels = usize::from(header.channel_count.max(1));
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| (frame.iter().map(|&s| i32::from(s)).sum::<i32>() / frame.len() as i32) as i16)
            .collect()
    };

    if samples.is_empty() {
        return Err(SpeechError::InvalidAudio("no sample data".to_string()));
    }

    Ok(SynthesizedAudio {
        samples,
        sample_rate: header.sampling_rate,
    })
}

/// Convert synthesized audio into µ-law media frames for the stream. The last
/// frame is padded with µ-law silence.
pub fn to_media_frames(audio: &SynthesizedAudio) -> Vec<Vec<u8>> {
    if audio.samples.is_empty() || audio.sample_rate == 0 {
        return Vec::new();
    }

    let narrowband = if audio.sample_rate == TELEPHONY_RATE {
        audio.samples.clone()
    } else {
        RateConverter::new(audio.sample_rate, TELEPHONY_RATE)
            .convert(&audio.samples, None)
            .0
    };

    let silence = codec::linear_to_mulaw(0);
    codec::compress(&narrowband)
        .chunks(FRAME_BYTES)
        .map(|chunk| {
            let mut frame = chunk.to_vec();
            frame.resize(FRAME_BYTES, silence);
            frame
        })
        .collect()
}

/// Synthesize the apology for `lang` and frame it. `None` when synthesis
/// fails; the call is then ended without audio.
pub async fn apology_frames(synthesizer: &dyn SpeechSynthesizer, lang: &str) -> Option<Vec<Vec<u8>>> {
    match synthesizer
        .synthesize(apology_text(lang).to_string(), lang.to_string())
        .await
    {
        Ok(audio) => Some(to_media_frames(&audio)),
        Err(err) => {
            warn!(lang = %lang, error = %err, "Apology synthesis failed");
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeSynthesizer;
    use super::*;

    fn wav_bytes(channels: u16, rate: u32, samples: Vec<i16>) -> Vec<u8> {
        let header = wav::Header::new(wav::header::WAV_FORMAT_PCM, channels, rate, 16);
        let mut out = Cursor::new(Vec::new());
        wav::write(header, &wav::BitDepth::Sixteen(samples), &mut out).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_downmixes_stereo() {
        let bytes = wav_bytes(2, 22_050, vec![100, 300, -200, -400]);
        let audio = decode_wav(&bytes).unwrap();
        assert_eq!(audio.sample_rate, 22_050);
        assert_eq!(audio.samples, vec![200, -300]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_wav(b"not a wav file"), Err(SpeechError::InvalidAudio(_))));
    }

    #[test]
    fn test_frames_are_padded_to_twenty_ms() {
        let audio = SynthesizedAudio {
            samples: vec![0; 200],
            sample_rate: 8_000,
        };
        let frames = to_media_frames(&audio);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|frame| frame.len() == FRAME_BYTES));
        assert_eq!(frames[1][40..], vec![codec::linear_to_mulaw(0); 120][..]);
    }

    #[test]
    fn test_wideband_is_resampled() {
        // 100 ms at 16 kHz → 800 samples at 8 kHz → 5 frames
        let audio = SynthesizedAudio {
            samples: vec![1000; 1600],
            sample_rate: 16_000,
        };
        assert_eq!(to_media_frames(&audio).len(), 5);
    }

    #[test]
    fn test_apology_language() {
        assert!(apology_text("es").starts_with("Lo sentimos"));
        assert!(apology_text("fr").starts_with("We're sorry"));
    }

    #[tokio::test]
    async fn test_apology_frames_from_fake() {
        let synthesizer = FakeSynthesizer::default();
        let frames = apology_frames(&synthesizer, "es").await.unwrap();
        assert_eq!(frames.len(), 5);
        assert_eq!(synthesizer.requests.lock().unwrap()[0].1, "es");

        let failing = FakeSynthesizer {
            fail: true,
            ..FakeSynthesizer::default()
        };
        assert!(apology_frames(&failing, "en").await.is_none());
    }
}
