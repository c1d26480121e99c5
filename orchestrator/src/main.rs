mod chat;
mod config;
mod conversation;
mod playback;
mod presenter;
mod reply;
mod scorer;

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use crossbeam_channel::Sender;

use banter_common::{debug, info, warn};
use banter_voice::{AudioOutput, ElevenLabsSpeech, RodioOutput, SpeechBackend};

use chat::{ChatBackend, HttpChatClient, MockChatBackend};
use config::SessionConfig;
use conversation::{Conversation, InputEvent};
use playback::{SleepPacer, Speaker};
use presenter::TerminalPresenter;

#[derive(Parser, Debug)]
#[command(name = "banter", about = "Turn-based spoken conversation with a chat model")]
struct Cli {
    /// TOML session config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Never synthesize or play audio
    #[arg(long, default_value_t = false)]
    text_only: bool,

    /// Start the conversation without offering the intro
    #[arg(long, default_value_t = false)]
    no_intro: bool,

    /// Canned replies instead of a chat endpoint
    #[arg(long, default_value_t = false)]
    mock: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    banter_common::log::init(cli.debug);

    if dotenvy::dotenv().is_ok() {
        debug!("[orchestrator] Loaded .env");
    }

    // 1. Configuration
    let config = SessionConfig::load(cli.config.as_deref())?;
    let setup = config.session_setup()?;

    // 2. Chat backend
    let chat = build_chat(&config, cli.mock)?;

    // 3. Voice (falls back to text-only)
    let speaker = if cli.text_only {
        info!("[orchestrator] Text-only mode (--text-only)");
        Speaker::text_only()
    } else {
        build_speaker(&config)
    };
    if speaker.is_voiced() {
        info!("[orchestrator] Voice enabled");
    }

    // 4. Input: stdin reader thread + Ctrl-C, both feeding one channel
    let (input_tx, input_rx) = crossbeam_channel::unbounded::<InputEvent>();
    let ctrlc_tx = input_tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(InputEvent::Quit);
    })?;
    std::thread::Builder::new()
        .name("stdin_reader".into())
        .spawn(move || stdin_reader_loop(input_tx))?;

    // 5. Conversation
    info!(
        "[orchestrator] Ready. Type and press Enter; empty line skips speech, /quit exits."
    );
    let presenter = TerminalPresenter::new(config.persona.name.clone());
    let mut conversation = Conversation::new(chat, speaker, presenter, setup, input_rx);
    debug!(
        "[orchestrator] System prompt: {}",
        conversation.history().system_prompt()
    );
    conversation.run(!cli.no_intro);

    let summary = conversation.summary();
    match summary.mean_score {
        Some(mean) => info!(
            "[orchestrator] {} turns, {} replies, mean score {mean:.1}",
            summary.turns, summary.replies
        ),
        None => info!("[orchestrator] {} turns, no replies", summary.turns),
    }
    Ok(())
}

fn build_chat(config: &SessionConfig, mock: bool) -> Result<Box<dyn ChatBackend>> {
    if mock {
        info!("[orchestrator] Using mock chat backend");
        return Ok(Box::new(MockChatBackend::with_contents(&[
            r#"{"spoken": "Bonjour. Vous désirez?", "score": 50, "insults": false}"#,
            r#"Hmm. {"spoken": "Une baguette, c'est tout? (sighs)", "score": 65, "insults": false}"#,
            "```json\n{\"spoken\": \"Au revoir, et bonne journée.\", \"score\": \"70\", \"insults\": \"false\"}\n```",
        ])));
    }

    info!(
        "[orchestrator] Chat endpoint: {} (model={})",
        config.chat.endpoint, config.chat.model
    );
    let client = HttpChatClient::new(
        config.chat.endpoint.clone(),
        config.chat.model.clone(),
        config.chat_api_key(),
    )?;
    Ok(Box::new(client))
}

fn build_speaker(config: &SessionConfig) -> Speaker {
    let Some(credentials) = config.speech_credentials() else {
        info!("[orchestrator] No speech credentials, text-only mode");
        return Speaker::text_only();
    };

    let speech = match ElevenLabsSpeech::new(
        config.speech.endpoint.clone(),
        config.speech.model_id.clone(),
        config.voice_settings(),
        credentials,
    ) {
        Ok(speech) => speech,
        Err(e) => {
            warn!("[orchestrator] Speech client unavailable ({e}), text-only mode");
            return Speaker::text_only();
        }
    };

    let output = match RodioOutput::open_default() {
        Ok(output) => output,
        Err(e) => {
            warn!("[orchestrator] No audio output ({e}), text-only mode");
            return Speaker::text_only();
        }
    };

    let speech: Box<dyn SpeechBackend> = Box::new(speech);
    let output: Box<dyn AudioOutput> = Box::new(output);
    Speaker::new(Some(speech), Some(output), Box::new(SleepPacer))
}

/// Map stdin lines to input events until EOF or the receiver goes away.
fn stdin_reader_loop(tx: Sender<InputEvent>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        let event = match line.trim() {
            "" | "/skip" => InputEvent::Skip,
            "/quit" => InputEvent::Quit,
            text => InputEvent::Submit(text.to_string()),
        };
        let quit = event == InputEvent::Quit;
        if tx.send(event).is_err() || quit {
            return;
        }
    }
    // EOF
    let _ = tx.send(InputEvent::Quit);
}
