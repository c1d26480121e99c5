use std::time::{Duration, Instant};

use banter_common::{debug, info, warn};
use banter_voice::{AudioOutput, SpeechBackend};

use crate::presenter::Presenter;

/// Poll interval while waiting on playback or a pacing delay.
pub const TICK: Duration = Duration::from_millis(50);

/// Timed waits. Real sessions sleep; tests substitute an instant pacer.
pub trait Pacer {
    fn pause(&self, duration: Duration);
}

pub struct SleepPacer;

impl Pacer for SleepPacer {
    fn pause(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// What to play.
#[derive(Debug, Clone)]
pub enum PlaybackSource {
    /// An already-encoded clip. Nothing is shown.
    Preloaded(Vec<u8>),
    /// Text to synthesize and show.
    Synthesize(String),
}

/// Exactly one of these ends every [`Speaker::play`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Skipped,
    /// No audio was produced: text-only mode, a speech error, empty audio, or
    /// an undecodable clip. The text was still shown.
    SynthesisFailed,
}

/// One clip in flight. Created and dropped inside a single `play` call.
struct PlaybackSession {
    clip: Vec<u8>,
    skipped: bool,
}

impl PlaybackSession {
    fn run(
        &mut self,
        output: &mut dyn AudioOutput,
        pacer: &dyn Pacer,
        skip: &mut dyn FnMut() -> bool,
    ) -> PlaybackOutcome {
        if let Err(e) = output.start(&self.clip) {
            warn!("[playback] Could not start clip: {e}");
            return PlaybackOutcome::SynthesisFailed;
        }

        let start = Instant::now();
        loop {
            if skip() {
                output.stop();
                self.skipped = true;
                info!(
                    "[playback] Skipped after {:.2}s",
                    start.elapsed().as_secs_f64()
                );
                return PlaybackOutcome::Skipped;
            }
            if output.is_finished() {
                debug!(
                    "[playback] Finished in {:.2}s",
                    start.elapsed().as_secs_f64()
                );
                return PlaybackOutcome::Completed;
            }
            pacer.pause(TICK);
        }
    }
}

/// Owns the voice collaborators: speech synthesis (absent in text-only mode),
/// the output device, and the pacer used for every timed wait.
pub struct Speaker {
    speech: Option<Box<dyn SpeechBackend>>,
    output: Option<Box<dyn AudioOutput>>,
    pacer: Box<dyn Pacer>,
}

impl Speaker {
    pub fn new(
        speech: Option<Box<dyn SpeechBackend>>,
        output: Option<Box<dyn AudioOutput>>,
        pacer: Box<dyn Pacer>,
    ) -> Self {
        Self {
            speech,
            output,
            pacer,
        }
    }

    pub fn text_only() -> Self {
        Self::new(None, None, Box::new(SleepPacer))
    }

    pub fn is_voiced(&self) -> bool {
        self.speech.is_some() && self.output.is_some()
    }

    /// Show the source's text and play its audio, if any, until it ends or
    /// `skip` returns true. The talking indicator is false when this returns
    /// and the output device is stopped.
    pub fn play(
        &mut self,
        source: PlaybackSource,
        presenter: &mut dyn Presenter,
        skip: &mut dyn FnMut() -> bool,
    ) -> PlaybackOutcome {
        let (clip, caption) = match source {
            PlaybackSource::Preloaded(clip) => (Some(clip), None),
            PlaybackSource::Synthesize(text) => (self.synthesize(&text), Some(text)),
        };

        if let Some(caption) = caption.as_deref().filter(|c| !c.trim().is_empty()) {
            presenter.show_text(caption);
        }

        let outcome = match (clip.filter(|c| !c.is_empty()), self.output.as_deref_mut()) {
            (Some(clip), Some(output)) => {
                let mut session = PlaybackSession {
                    clip,
                    skipped: false,
                };
                presenter.set_talking(true);
                let outcome = session.run(output, self.pacer.as_ref(), skip);
                output.stop();
                debug!(
                    "[playback] Released {} byte clip (skipped={})",
                    session.clip.len(),
                    session.skipped
                );
                outcome
            }
            _ => PlaybackOutcome::SynthesisFailed,
        };

        presenter.set_talking(false);
        outcome
    }

    /// Wait `total`, checking `skip` every tick. Returns true if cut short.
    pub fn pace(&self, total: Duration, skip: &mut dyn FnMut() -> bool) -> bool {
        let mut waited = Duration::ZERO;
        while waited < total {
            if skip() {
                return true;
            }
            let step = TICK.min(total - waited);
            self.pacer.pause(step);
            waited += step;
        }
        false
    }

    fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        if self.output.is_none() {
            debug!("[playback] No output device, text only");
            return None;
        }
        let Some(speech) = &self.speech else {
            debug!("[playback] No speech credentials, text only");
            return None;
        };

        let start = Instant::now();
        match speech.synthesize(text) {
            Ok(audio) if audio.is_empty() => {
                warn!("[playback] Speech endpoint returned no audio");
                None
            }
            Ok(audio) => {
                info!(
                    "[playback] Speech synthesis: {:.2}s ({} bytes)",
                    start.elapsed().as_secs_f64(),
                    audio.len()
                );
                Some(audio)
            }
            Err(e) => {
                warn!("[playback] Speech synthesis failed: {e}");
                None
            }
        }
    }
}

// --- Test doubles ---

#[cfg(test)]
pub mod mock {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use banter_voice::{AudioOutput, SpeechBackend, VoiceError, VoiceResult};

    use super::Pacer;

    /// Speech backend returning fixed bytes (or failing), counting calls.
    pub struct MockSpeech {
        pub audio: Vec<u8>,
        pub fail: bool,
        pub calls: Arc<AtomicUsize>,
    }

    impl MockSpeech {
        pub fn returning(audio: &[u8]) -> Self {
            Self {
                audio: audio.to_vec(),
                fail: false,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn failing() -> Self {
            Self {
                audio: Vec::new(),
                fail: true,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl SpeechBackend for MockSpeech {
        fn synthesize(&self, _text: &str) -> VoiceResult<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err(VoiceError::Tts("TTS API error 401: bad key".into()));
            }
            Ok(self.audio.clone())
        }
    }

    #[derive(Debug, Default)]
    pub struct OutputLog {
        pub started: Vec<usize>,
        pub stops: usize,
    }

    /// Output that reports finished after `ticks` polls.
    pub struct MockOutput {
        ticks: u32,
        remaining: Cell<u32>,
        playing: bool,
        fail_start: bool,
        pub log: Rc<RefCell<OutputLog>>,
    }

    impl MockOutput {
        pub fn finishing_after(ticks: u32) -> Self {
            Self {
                ticks,
                remaining: Cell::new(0),
                playing: false,
                fail_start: false,
                log: Rc::default(),
            }
        }

        pub fn undecodable() -> Self {
            Self {
                fail_start: true,
                ..Self::finishing_after(0)
            }
        }
    }

    impl AudioOutput for MockOutput {
        fn start(&mut self, clip: &[u8]) -> VoiceResult<()> {
            if self.fail_start {
                return Err(VoiceError::Decode("not an mpeg stream".into()));
            }
            self.log.borrow_mut().started.push(clip.len());
            self.remaining.set(self.ticks);
            self.playing = true;
            Ok(())
        }

        fn is_finished(&self) -> bool {
            if !self.playing {
                return true;
            }
            match self.remaining.get() {
                0 => true,
                n => {
                    self.remaining.set(n - 1);
                    false
                }
            }
        }

        fn stop(&mut self) {
            self.playing = false;
            self.log.borrow_mut().stops += 1;
        }
    }

    /// Pacer that returns immediately, adding up the time it was asked to wait.
    #[derive(Default)]
    pub struct InstantPacer {
        pub waited: Rc<Cell<Duration>>,
    }

    impl Pacer for InstantPacer {
        fn pause(&self, duration: Duration) {
            self.waited.set(self.waited.get() + duration);
        }
    }
}
