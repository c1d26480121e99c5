pub mod error;
pub mod output;
pub mod tts;

pub use error::{VoiceError, VoiceResult};
pub use output::{AudioOutput, RodioOutput};
pub use tts::{Credentials, ElevenLabsSpeech, SpeechBackend, Stability, VoiceSettings};
