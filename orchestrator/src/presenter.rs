use std::io::{Stdout, Write};

use banter_common::debug;

use crate::scorer::PlayerAssessment;

/// Everything the conversation shows to the player. Implementations own the
/// screen; the conversation only says what should be on it.
pub trait Presenter {
    fn set_input_enabled(&mut self, enabled: bool);
    /// Replace the subtitle line. Showing the same text again within a turn is a no-op.
    fn show_text(&mut self, text: &str);
    fn clear_text(&mut self);
    /// Drives the "character is talking" animation.
    fn set_talking(&mut self, talking: bool);
    fn show_assessment(&mut self, assessment: &PlayerAssessment);
    fn offer_intro(&mut self);
}

/// Plain line rendering for the CLI. A subtitle repeated within one turn is
/// printed once; every turn prints its reply.
pub struct TerminalPresenter<W: Write = Stdout> {
    speaker_name: String,
    subtitle: Option<String>,
    out: W,
}

impl TerminalPresenter {
    pub fn new(speaker_name: impl Into<String>) -> Self {
        Self::with_writer(speaker_name, std::io::stdout())
    }
}

impl<W: Write> TerminalPresenter<W> {
    pub fn with_writer(speaker_name: impl Into<String>, out: W) -> Self {
        Self {
            speaker_name: speaker_name.into(),
            subtitle: None,
            out,
        }
    }

    #[cfg(test)]
    pub fn output(&self) -> &W {
        &self.out
    }

    fn prompt(&mut self) {
        let _ = write!(self.out, "> ");
        let _ = self.out.flush();
    }
}

impl<W: Write> Presenter for TerminalPresenter<W> {
    fn set_input_enabled(&mut self, enabled: bool) {
        if enabled {
            self.prompt();
        } else {
            // A new turn starts.
            self.subtitle = None;
        }
    }

    fn show_text(&mut self, text: &str) {
        if self.subtitle.as_deref() == Some(text) {
            return;
        }
        let _ = writeln!(self.out, "\n{}: {text}", self.speaker_name);
        self.subtitle = Some(text.to_string());
    }

    fn clear_text(&mut self) {
        self.subtitle = None;
    }

    fn set_talking(&mut self, talking: bool) {
        debug!("[presenter] talking={talking}");
    }

    fn show_assessment(&mut self, assessment: &PlayerAssessment) {
        let flag = if assessment.insults { ", rude" } else { "" };
        let _ = writeln!(self.out, "  (your line: {}/100{flag})", assessment.score);
    }

    fn offer_intro(&mut self) {
        let _ = writeln!(
            self.out,
            "Listen to the introduction? [Y/n] (empty line skips while speaking)"
        );
        self.prompt();
    }
}

/// Presenter that records every call, for asserting on UI effects in tests.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingPresenter {
    pub events: Vec<PresenterEvent>,
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub enum PresenterEvent {
    Input(bool),
    Text(String),
    Cleared,
    Talking(bool),
    Assessment(PlayerAssessment),
    IntroOffered,
}

#[cfg(test)]
impl RecordingPresenter {
    pub fn talking_now(&self) -> bool {
        self.events
            .iter()
            .rev()
            .find_map(|e| match e {
                PresenterEvent::Talking(t) => Some(*t),
                _ => None,
            })
            .unwrap_or(false)
    }

    pub fn input_enabled(&self) -> Option<bool> {
        self.events.iter().rev().find_map(|e| match e {
            PresenterEvent::Input(on) => Some(*on),
            _ => None,
        })
    }

    pub fn last_text(&self) -> Option<&str> {
        self.events.iter().rev().find_map(|e| match e {
            PresenterEvent::Text(t) => Some(t.as_str()),
            _ => None,
        })
    }

    pub fn ever_talked(&self) -> bool {
        self.events.contains(&PresenterEvent::Talking(true))
    }
}

#[cfg(test)]
impl Presenter for RecordingPresenter {
    fn set_input_enabled(&mut self, enabled: bool) {
        self.events.push(PresenterEvent::Input(enabled));
    }

    fn show_text(&mut self, text: &str) {
        self.events.push(PresenterEvent::Text(text.to_string()));
    }

    fn clear_text(&mut self) {
        self.events.push(PresenterEvent::Cleared);
    }

    fn set_talking(&mut self, talking: bool) {
        self.events.push(PresenterEvent::Talking(talking));
    }

    fn show_assessment(&mut self, assessment: &PlayerAssessment) {
        self.events.push(PresenterEvent::Assessment(*assessment));
    }

    fn offer_intro(&mut self) {
        self.events.push(PresenterEvent::IntroOffered);
    }
}
