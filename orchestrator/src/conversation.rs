use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use banter_common::protocol::{ConversationTurn, Role, StructuredReply};
use banter_common::{debug, info, warn};

use crate::chat::ChatBackend;
use crate::playback::{PlaybackOutcome, PlaybackSource, Speaker};
use crate::presenter::Presenter;
use crate::reply::{self, ParsedReply};
use crate::scorer::PlayerAssessment;

/// Chat requests per turn, counting the first.
pub const MAX_ATTEMPTS: u32 = 3;

/// Appended to the persona prompt so the model knows the reply schema.
pub const FORMAT_INSTRUCTIONS: &str = "\n\nAlways answer with exactly one JSON object and nothing else, in this form:\n{\"spoken\": \"<what your character says aloud>\", \"score\": <integer 0-100 rating the player's last message>, \"insults\": <true if the player's last message insulted you, else false>}\nDo not add stage directions, markdown, or text outside the JSON object.";

/// Sent as a user turn after a reply that could not be parsed.
pub const DEFAULT_RETRY_REMINDER: &str = "Your last answer was not valid JSON. Respond only with valid JSON of the form {\"spoken\": string, \"score\": integer, \"insults\": boolean}.";

/// Player input delivered to the running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Submit(String),
    Skip,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntroChoice {
    Listen,
    Skip,
}

impl IntroChoice {
    /// Anything but an explicit "no" listens.
    pub fn from_answer(answer: &str) -> Self {
        match answer.trim().to_lowercase().as_str() {
            "n" | "no" | "non" | "skip" => Self::Skip,
            _ => Self::Listen,
        }
    }
}

/// Conversation states. A request or playback being in flight is a state,
/// not a flag, so "busy" can't disagree with what the machine is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    AwaitingIntroChoice,
    RequestInFlight { attempt: u32 },
    ParseRetry { attempt: u32 },
    PlayingSpeech,
}

impl ConversationState {
    pub fn accepts_input(self) -> bool {
        matches!(self, Self::Idle | Self::AwaitingIntroChoice)
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::AwaitingIntroChoice => write!(f, "AwaitingIntroChoice"),
            Self::RequestInFlight { attempt } => write!(f, "RequestInFlight({attempt})"),
            Self::ParseRetry { attempt } => write!(f, "ParseRetry({attempt})"),
            Self::PlayingSpeech => write!(f, "PlayingSpeech"),
        }
    }
}

/// Chronological, append-only turn log. The first entry is the system prompt.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new(base_prompt: &str) -> Self {
        Self {
            turns: vec![ConversationTurn::system(format!(
                "{}{FORMAT_INSTRUCTIONS}",
                base_prompt.trim_end()
            ))],
        }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn system_prompt(&self) -> &str {
        self.turns[0].content()
    }

    fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(ConversationTurn::user(content));
    }

    fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(ConversationTurn::assistant(content));
    }
}

/// Optional opening played before the first model turn.
#[derive(Debug, Clone, Default)]
pub struct IntroScript {
    pub clip: Option<Vec<u8>>,
    pub lines: Vec<String>,
    pub pacing: Duration,
    pub pacing_per_char: Duration,
}

impl IntroScript {
    pub fn is_empty(&self) -> bool {
        self.clip.is_none() && self.lines.is_empty()
    }

    fn pause_after(&self, line: &str) -> Duration {
        let chars = u32::try_from(line.chars().count()).unwrap_or(u32::MAX);
        self.pacing + self.pacing_per_char.saturating_mul(chars)
    }
}

/// Plain values the session is configured with.
#[derive(Debug, Clone)]
pub struct SessionSetup {
    pub base_prompt: String,
    pub retry_reminder: String,
    pub intro: IntroScript,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub reply: StructuredReply,
    pub attempts: u32,
    pub player: Option<PlayerAssessment>,
    /// `None` when the reply had nothing left to say after sanitizing.
    pub playback: Option<PlaybackOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Input arrived while a turn was in flight.
    Ignored,
    Completed(TurnReport),
    TransportFailed,
    ParseExhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSummary {
    pub turns: usize,
    pub replies: usize,
    pub mean_score: Option<f64>,
}

pub struct Conversation<P: Presenter> {
    chat: Box<dyn ChatBackend>,
    speaker: Speaker,
    presenter: P,
    events: Receiver<InputEvent>,
    history: ConversationHistory,
    state: ConversationState,
    retry_reminder: String,
    intro: IntroScript,
    quit_requested: bool,
}

impl<P: Presenter> Conversation<P> {
    pub fn new(
        chat: Box<dyn ChatBackend>,
        speaker: Speaker,
        presenter: P,
        setup: SessionSetup,
        events: Receiver<InputEvent>,
    ) -> Self {
        let retry_reminder = if setup.retry_reminder.trim().is_empty() {
            DEFAULT_RETRY_REMINDER.to_string()
        } else {
            setup.retry_reminder
        };
        Self {
            chat,
            speaker,
            presenter,
            events,
            history: ConversationHistory::new(&setup.base_prompt),
            state: ConversationState::Idle,
            retry_reminder,
            intro: setup.intro,
            quit_requested: false,
        }
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    #[cfg(test)]
    pub fn state(&self) -> ConversationState {
        self.state
    }

    #[cfg(test)]
    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    /// Drive the session from input events until `Quit` or the sender hangs up.
    pub fn run(&mut self, offer_intro: bool) {
        if offer_intro && !self.intro.is_empty() {
            self.begin_session();
        } else {
            let outcome = self.advance(None);
            log_outcome(&outcome);
        }

        while !self.quit_requested {
            let event = match self.events.recv() {
                Ok(event) => event,
                Err(_) => {
                    info!("[orchestrator] Input closed");
                    break;
                }
            };
            match event {
                InputEvent::Quit => break,
                InputEvent::Skip if self.state == ConversationState::AwaitingIntroChoice => {
                    let outcome = self.choose_intro(IntroChoice::from_answer(""));
                    log_outcome(&outcome);
                }
                InputEvent::Skip => debug!("[orchestrator] Nothing playing to skip"),
                InputEvent::Submit(text) => {
                    let outcome = if self.state == ConversationState::AwaitingIntroChoice {
                        self.choose_intro(IntroChoice::from_answer(&text))
                    } else {
                        self.advance(Some(&text))
                    };
                    log_outcome(&outcome);
                }
            }
        }
        info!("[orchestrator] Session ended");
    }

    /// `Idle → AwaitingIntroChoice`: ask whether to play the intro.
    pub fn begin_session(&mut self) {
        if self.state != ConversationState::Idle {
            return;
        }
        self.transition(ConversationState::AwaitingIntroChoice);
        self.presenter.offer_intro();
    }

    /// Play (or skip) the intro, then let the model open the conversation.
    pub fn choose_intro(&mut self, choice: IntroChoice) -> TurnOutcome {
        if self.state != ConversationState::AwaitingIntroChoice {
            return TurnOutcome::Ignored;
        }
        self.presenter.set_input_enabled(false);
        if choice == IntroChoice::Listen {
            self.play_intro();
        }
        if self.quit_requested {
            self.finish_turn();
            return TurnOutcome::Ignored;
        }
        self.run_turn(None)
    }

    /// Run one turn. A blank or absent message asks the model to speak first.
    /// Ignored unless the machine is waiting for input.
    pub fn advance(&mut self, user_message: Option<&str>) -> TurnOutcome {
        if !self.state.accepts_input() {
            warn!("[orchestrator] Busy ({}), input ignored", self.state);
            return TurnOutcome::Ignored;
        }
        self.presenter.set_input_enabled(false);
        self.run_turn(user_message)
    }

    pub fn summary(&self) -> SessionSummary {
        let scores: Vec<u8> = self
            .history
            .turns()
            .iter()
            .filter(|t| t.role() == Role::Assistant)
            .filter_map(|t| reply::parse_content(t.content()).ok())
            .map(|parsed| parsed.reply.score)
            .collect();
        let mean_score = (!scores.is_empty())
            .then(|| scores.iter().map(|&s| f64::from(s)).sum::<f64>() / scores.len() as f64);
        SessionSummary {
            turns: self.history.turns().len(),
            replies: scores.len(),
            mean_score,
        }
    }

    fn run_turn(&mut self, user_message: Option<&str>) -> TurnOutcome {
        let player = user_message
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(|message| {
                let assessment = PlayerAssessment::of(message);
                info!(
                    "[orchestrator] Player: '{message}' (score={}, insults={})",
                    assessment.score, assessment.insults
                );
                self.presenter.show_assessment(&assessment);
                self.history.push_user(message);
                assessment
            });

        let outcome = match self.request_reply() {
            Ok((parsed, attempts)) => {
                let playback = self.deliver(&parsed.reply);
                TurnOutcome::Completed(TurnReport {
                    reply: parsed.reply,
                    attempts,
                    player,
                    playback,
                })
            }
            Err(failure) => failure,
        };

        self.finish_turn();
        outcome
    }

    /// The bounded retry loop. Transport errors end the turn at once; parse
    /// failures add a reminder turn and try again while attempts remain.
    fn request_reply(&mut self) -> Result<(ParsedReply, u32), TurnOutcome> {
        for attempt in 1..=MAX_ATTEMPTS {
            self.transition(ConversationState::RequestInFlight { attempt });

            let query_start = Instant::now();
            let raw = match self.chat.complete(self.history.turns()) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("[orchestrator] Chat request failed: {e}");
                    return Err(TurnOutcome::TransportFailed);
                }
            };
            info!(
                "[orchestrator] Chat request: {:.2}s",
                query_start.elapsed().as_secs_f64()
            );

            match reply::parse_response(&raw) {
                Ok(parsed) => {
                    debug!("[orchestrator] Parsed reply via {:?}", parsed.stage);
                    self.history.push_assistant(parsed.json.clone());
                    return Ok((parsed, attempt));
                }
                Err(e) => {
                    warn!("[orchestrator] Attempt {attempt}/{MAX_ATTEMPTS}: unusable reply ({e})");
                    if attempt < MAX_ATTEMPTS {
                        self.transition(ConversationState::ParseRetry { attempt });
                        self.history.push_user(self.retry_reminder.clone());
                    }
                }
            }
        }

        warn!("[orchestrator] All {MAX_ATTEMPTS} attempts unusable, dropping turn");
        Err(TurnOutcome::ParseExhausted {
            attempts: MAX_ATTEMPTS,
        })
    }

    fn deliver(&mut self, reply: &StructuredReply) -> Option<PlaybackOutcome> {
        let spoken = reply::sanitize(&reply.spoken);
        if spoken.is_empty() {
            info!("[orchestrator] Reply has nothing to say");
            self.presenter.clear_text();
            return None;
        }

        self.transition(ConversationState::PlayingSpeech);
        info!("[orchestrator] Reply: '{spoken}' (score={})", reply.score);
        let outcome = self.speaker.play(
            PlaybackSource::Synthesize(spoken.clone()),
            &mut self.presenter,
            &mut || poll_skip(&self.events, &mut self.quit_requested),
        );
        self.presenter.show_text(&spoken);
        Some(outcome)
    }

    fn play_intro(&mut self) {
        self.transition(ConversationState::PlayingSpeech);

        if let Some(clip) = self.intro.clip.clone() {
            self.speaker.play(
                PlaybackSource::Preloaded(clip),
                &mut self.presenter,
                &mut || poll_skip(&self.events, &mut self.quit_requested),
            );
        }

        let lines = self.intro.lines.clone();
        for line in &lines {
            if self.quit_requested {
                return;
            }
            self.speaker.play(
                PlaybackSource::Synthesize(line.clone()),
                &mut self.presenter,
                &mut || poll_skip(&self.events, &mut self.quit_requested),
            );
            self.speaker.pace(self.intro.pause_after(line), &mut || {
                poll_skip(&self.events, &mut self.quit_requested)
            });
        }
    }

    /// Back to `Idle`: drop anything typed while busy, then re-enable input.
    fn finish_turn(&mut self) {
        for event in self.events.try_iter() {
            match event {
                InputEvent::Submit(text) => {
                    debug!("[orchestrator] Discarding input sent while busy: '{text}'")
                }
                InputEvent::Skip => {}
                InputEvent::Quit => self.quit_requested = true,
            }
        }
        self.transition(ConversationState::Idle);
        self.presenter.set_input_enabled(true);
    }

    fn transition(&mut self, next: ConversationState) {
        if self.state != next {
            info!("[orchestrator] State: {} → {next}", self.state);
            self.state = next;
        }
    }
}

fn log_outcome(outcome: &TurnOutcome) {
    match outcome {
        TurnOutcome::Completed(report) => debug!(
            "[orchestrator] Turn done: {} attempt(s), playback {:?}, player {:?}",
            report.attempts, report.playback, report.player
        ),
        TurnOutcome::ParseExhausted { attempts } => {
            info!("[orchestrator] No usable reply after {attempts} attempts, try again")
        }
        TurnOutcome::TransportFailed => info!("[orchestrator] Chat endpoint unreachable, try again"),
        TurnOutcome::Ignored => {}
    }
}

/// Skip check run on every playback tick. Typed submissions are not input
/// while speaking; `Quit` also skips and is remembered.
fn poll_skip(events: &Receiver<InputEvent>, quit_requested: &mut bool) -> bool {
    let mut skip = false;
    for event in events.try_iter() {
        match event {
            InputEvent::Skip => skip = true,
            InputEvent::Quit => {
                *quit_requested = true;
                skip = true;
            }
            InputEvent::Submit(text) => {
                debug!("[orchestrator] Ignoring input while speaking: '{text}'")
            }
        }
    }
    skip
}
