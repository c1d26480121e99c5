use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use banter_common::info;
use banter_voice::{Credentials, Stability, VoiceSettings};

use crate::conversation::{DEFAULT_RETRY_REMINDER, IntroScript, SessionSetup};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub chat: ChatConfig,
    pub persona: PersonaConfig,
    pub intro: IntroConfig,
    pub speech: SpeechConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding an optional bearer key.
    pub api_key_env: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/v1/chat/completions".into(),
            model: "llama3.1".into(),
            api_key_env: "CHAT_API_KEY".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    pub name: String,
    pub base_prompt: String,
    pub retry_reminder: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: "Odile".into(),
            base_prompt: "You are Odile, the owner of a small bakery in Paris. You are \
                          impatient but secretly kind. Stay in character and answer in French. \
                          Rate how polite and fluent the customer's last message was."
                .into(),
            retry_reminder: DEFAULT_RETRY_REMINDER.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntroConfig {
    pub lines: Vec<String>,
    /// Pre-rendered MPEG clip played before the lines.
    pub audio: Option<PathBuf>,
    pub pacing_ms: u64,
    pub pacing_per_char_ms: u64,
}

impl Default for IntroConfig {
    fn default() -> Self {
        Self {
            lines: Vec::new(),
            audio: None,
            pacing_ms: 600,
            pacing_per_char_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub endpoint: String,
    pub model_id: String,
    pub stability: Stability,
    pub similarity_boost: f32,
    pub api_key: Option<String>,
    pub voice_id: Option<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.elevenlabs.io".into(),
            model_id: "eleven_multilingual_v2".into(),
            stability: Stability::default(),
            similarity_boost: 0.75,
            api_key: None,
            voice_id: None,
        }
    }
}

impl SessionConfig {
    /// Read `path`, or use defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            info!("[config] No config file, using defaults");
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::parse(&text)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        info!("[config] Loaded {}", path.display());
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Plain values for the conversation. Reads the intro clip from disk.
    pub fn session_setup(&self) -> Result<SessionSetup> {
        let clip = self
            .intro
            .audio
            .as_ref()
            .map(|path| {
                std::fs::read(path)
                    .with_context(|| format!("Failed to read intro audio {}", path.display()))
            })
            .transpose()?;

        Ok(SessionSetup {
            base_prompt: self.persona.base_prompt.clone(),
            retry_reminder: self.persona.retry_reminder.clone(),
            intro: IntroScript {
                clip,
                lines: self
                    .intro
                    .lines
                    .iter()
                    .filter(|l| !l.trim().is_empty())
                    .cloned()
                    .collect(),
                pacing: Duration::from_millis(self.intro.pacing_ms),
                pacing_per_char: Duration::from_millis(self.intro.pacing_per_char_ms),
            },
        })
    }

    pub fn chat_api_key(&self) -> Option<String> {
        std::env::var(&self.chat.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    /// `None` means text-only.
    pub fn speech_credentials(&self) -> Option<Credentials> {
        Credentials::resolve(self.speech.api_key.clone(), self.speech.voice_id.clone())
    }

    pub fn voice_settings(&self) -> VoiceSettings {
        VoiceSettings::new(self.speech.stability, self.speech.similarity_boost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = SessionConfig::parse("").unwrap();
        assert_eq!(config.chat.api_key_env, "CHAT_API_KEY");
        assert_eq!(config.speech.stability, Stability::Natural);
        assert_eq!(config.persona.retry_reminder, DEFAULT_RETRY_REMINDER);
        assert!(config.intro.lines.is_empty());
    }

    #[test]
    fn sections_override_defaults() {
        let config = SessionConfig::parse(
            r#"
            [chat]
            endpoint = "https://api.example.com/v1/chat/completions"
            model = "gpt-4o-mini"

            [persona]
            base_prompt = "You are a pirate."

            [intro]
            lines = ["Ahoy.", "  ", "Welcome aboard."]
            pacing_ms = 250
            pacing_per_char_ms = 20

            [speech]
            stability = "robust"
            similarity_boost = 3.0
            voice_id = "abc123"
            "#,
        )
        .unwrap();

        assert_eq!(config.chat.model, "gpt-4o-mini");
        assert_eq!(config.chat.api_key_env, "CHAT_API_KEY");
        assert_eq!(config.speech.voice_id.as_deref(), Some("abc123"));

        let settings = config.voice_settings();
        assert_eq!(settings.stability.value(), 1.0);
        assert_eq!(settings.similarity_boost(), 1.0);

        let setup = config.session_setup().unwrap();
        assert_eq!(setup.base_prompt, "You are a pirate.");
        assert_eq!(setup.intro.lines, vec!["Ahoy.", "Welcome aboard."]);
        assert_eq!(setup.intro.pacing, Duration::from_millis(250));
        assert_eq!(setup.intro.pacing_per_char, Duration::from_millis(20));
        assert!(setup.intro.clip.is_none());
    }

    #[test]
    fn unknown_stability_is_rejected() {
        assert!(SessionConfig::parse("[speech]\nstability = \"wobbly\"").is_err());
    }

    #[test]
    fn missing_intro_audio_is_an_error() {
        let config =
            SessionConfig::parse("[intro]\naudio = \"/nonexistent/banter/intro.mp3\"").unwrap();
        assert!(config.session_setup().is_err());
    }

    #[test]
    fn intro_audio_is_read_into_the_setup() {
        let path = std::env::temp_dir().join(format!("banter_intro_{}.mp3", std::process::id()));
        std::fs::write(&path, [0xFF, 0xFB, 0x90]).unwrap();
        let mut config = SessionConfig::default();
        config.intro.audio = Some(path.clone());

        let setup = config.session_setup().unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(setup.intro.clip, Some(vec![0xFF, 0xFB, 0x90]));
    }

    #[test]
    fn load_without_path_uses_defaults() {
        let config = SessionConfig::load(None).unwrap();
        assert_eq!(config.persona.name, "Odile");
    }
}
