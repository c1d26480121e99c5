use serde::{Deserialize, Serialize};

use banter_common::debug;

use crate::error::{VoiceError, VoiceResult};

/// Environment fallbacks for speech credentials.
pub const API_KEY_ENV: &str = "ELEVENLABS_API_KEY";
pub const VOICE_ID_ENV: &str = "ELEVENLABS_VOICE_ID";

/// Trait abstracting speech synthesis. Returns encoded (MPEG) audio bytes;
/// an empty vec means "nothing to play".
pub trait SpeechBackend: Send + Sync {
    fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>>;
}

/// The endpoint only accepts three stability presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stability {
    Creative,
    #[default]
    Natural,
    Robust,
}

impl Stability {
    pub fn value(self) -> f32 {
        match self {
            Self::Creative => 0.0,
            Self::Natural => 0.5,
            Self::Robust => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceSettings {
    pub stability: Stability,
    similarity_boost: f32,
}

impl VoiceSettings {
    /// `similarity_boost` is clamped to [0, 1]; NaN becomes 0.
    pub fn new(stability: Stability, similarity_boost: f32) -> Self {
        let similarity_boost = if similarity_boost.is_nan() {
            0.0
        } else {
            similarity_boost.clamp(0.0, 1.0)
        };
        Self {
            stability,
            similarity_boost,
        }
    }

    pub fn similarity_boost(&self) -> f32 {
        self.similarity_boost
    }
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self::new(Stability::Natural, 0.75)
    }
}

/// API key plus the voice to speak with. Both are required for audio.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub voice_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("voice_id", &self.voice_id)
            .finish()
    }
}

impl Credentials {
    /// Use the configured values, falling back to the environment for whichever is missing.
    /// Returns `None` (text-only mode) unless both end up non-blank.
    pub fn resolve(api_key: Option<String>, voice_id: Option<String>) -> Option<Self> {
        Self::resolve_with(api_key, voice_id, |name| std::env::var(name).ok())
    }

    fn resolve_with(
        api_key: Option<String>,
        voice_id: Option<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Option<Self> {
        let pick = |configured: Option<String>, env_name: &str| {
            configured
                .filter(|v| !v.trim().is_empty())
                .or_else(|| lookup(env_name))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Some(Self {
            api_key: pick(api_key, API_KEY_ENV)?,
            voice_id: pick(voice_id, VOICE_ID_ENV)?,
        })
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: WireVoiceSettings,
}

#[derive(Serialize)]
struct WireVoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

/// ElevenLabs-style text-to-speech over HTTP (blocking).
pub struct ElevenLabsSpeech {
    base_url: String,
    model_id: String,
    settings: VoiceSettings,
    credentials: Credentials,
    client: reqwest::blocking::Client,
}

impl ElevenLabsSpeech {
    /// No request timeout is layered on top of the client's own.
    pub fn new(
        base_url: impl Into<String>,
        model_id: impl Into<String>,
        settings: VoiceSettings,
        credentials: Credentials,
    ) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| VoiceError::Config(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            model_id: model_id.into(),
            settings,
            credentials,
            client,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}",
            self.base_url.trim_end_matches('/'),
            self.credentials.voice_id
        )
    }

    fn request_body(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let body = SpeechRequest {
            text,
            model_id: &self.model_id,
            voice_settings: WireVoiceSettings {
                stability: self.settings.stability.value(),
                similarity_boost: self.settings.similarity_boost(),
            },
        };
        serde_json::to_vec(&body).map_err(|e| VoiceError::Tts(e.to_string()))
    }
}

impl SpeechBackend for ElevenLabsSpeech {
    fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let start = std::time::Instant::now();
        let res = self
            .client
            .post(self.url())
            .header("xi-api-key", &self.credentials.api_key)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(self.request_body(text)?)
            .send()?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Tts(format!("TTS API error {status}: {body}")));
        }

        let bytes = res.bytes()?;
        debug!(
            "[voice] Synthesized {} bytes in {:.2}s ({} chars)",
            bytes.len(),
            start.elapsed().as_secs_f64(),
            text.len()
        );
        Ok(bytes.to_vec())
    }
}
