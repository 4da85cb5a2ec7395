//! Guided conversation that fills the slots one question at a time and
//! asks for lyrics once everything is known.

use anyhow::{Context, Result};
use std::io::{BufRead, Write};
use tracing::{error, info};

use crate::pipeline::lm::CausalLm;
use crate::pipeline::lyrics::{GenerationRequest, LyricGenerator};
use crate::slots::{GenreMatching, SlotName, SlotTracker, Topic};

const RESET_COMMAND: &str = "/reset";
const QUIT_COMMAND: &str = "/quit";

/// Anything that can turn a filled request into lyrics.
pub trait Songwriter {
    fn write_lyrics(&mut self, request: &GenerationRequest) -> Result<String>;
}

impl<M: CausalLm> Songwriter for LyricGenerator<M> {
    fn write_lyrics(&mut self, request: &GenerationRequest) -> Result<String> {
        self.generate(request)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

pub fn question(slot: SlotName) -> String {
    match slot {
        SlotName::Genre => "What genre do you prefer for the lyrics? (e.g., pop, hiphop)".to_string(),
        SlotName::Topic => {
            let mut text = "What theme or topic would you like the lyrics to revolve around?".to_string();
            for (idx, topic) in Topic::ALL.iter().enumerate() {
                text.push_str(&format!("\n  {}. {}", idx + 1, topic.label()));
            }
            text
        }
        SlotName::Emotion => {
            "What emotion do you want the song to convey? (e.g. joy, nervousness, anger)".to_string()
        }
        SlotName::Length => {
            "Approximately how many words would you like the lyrics to have? (e.g., 200-1200)".to_string()
        }
    }
}

/// First character upper-cased, the rest lower-cased.
fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Conversation state for one user. Dropping or resetting it discards
/// every collected attribute.
pub struct Session {
    tracker: SlotTracker,
    messages: Vec<Message>,
    lyrics: Option<String>,
    genre_matching: GenreMatching,
}

impl Session {
    pub fn new(genre_matching: GenreMatching) -> Self {
        let mut session = Self {
            tracker: SlotTracker::with_genre_matching(genre_matching),
            messages: Vec::new(),
            lyrics: None,
            genre_matching,
        };
        session.ask_next();
        session
    }

    pub fn ready_to_generate(&self) -> bool {
        self.tracker.is_filled() && self.lyrics.is_none()
    }

    pub fn reset(&mut self) {
        info!("session reset");
        *self = Session::new(self.genre_matching);
    }

    fn ask_next(&mut self) {
        if let Some(slot) = self.tracker.next_unfilled_slot() {
            self.push(Role::Assistant, question(slot));
        }
    }

    fn push(&mut self, role: Role, content: String) {
        self.messages.push(Message { role, content });
    }

    fn last_assistant_message(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    /// Records a user answer for the pending slot and returns the reply.
    pub fn handle_input(&mut self, input: &str) -> &str {
        let answer = input.trim();
        self.push(Role::User, answer.to_string());

        let reply = match self.tracker.next_unfilled_slot() {
            None => format!("All slots are filled. Type {RESET_COMMAND} to start over."),
            Some(slot) => self.answer_slot(slot, answer),
        };
        self.push(Role::Assistant, reply);
        self.last_assistant_message()
    }

    fn answer_slot(&mut self, slot: SlotName, answer: &str) -> String {
        let result = match slot {
            SlotName::Length => match answer.parse::<i64>() {
                Ok(n) => self.tracker.update_slot(slot, n),
                Err(_) => return "Please enter a valid number for word count.".to_string(),
            },
            SlotName::Topic => {
                let picked = answer
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|idx| Topic::ALL.get(idx))
                    .map(|t| t.label())
                    .unwrap_or(answer);
                self.tracker.update_slot(slot, picked)
            }
            SlotName::Genre | SlotName::Emotion => self.tracker.update_slot(slot, answer),
        };

        match result {
            Ok(()) => {
                let value = self.tracker.slots().value_text(slot).unwrap_or_default();
                let mut reply = if slot == SlotName::Length {
                    format!("Got it! Desired lyrics length is about {value} words.")
                } else {
                    format!("Got it! {} set to '{value}'.", capitalize(slot.as_str()))
                };
                if let Some(next) = self.tracker.next_unfilled_slot() {
                    reply.push_str("\n\n");
                    reply.push_str(&question(next));
                }
                reply
            }
            Err(e) => e.to_string(),
        }
    }

    /// Runs the single generation call for this session.
    pub fn generate(&mut self, writer: &mut dyn Songwriter) -> Result<&str> {
        if !self.tracker.is_filled() {
            anyhow::bail!("cannot generate before every slot is filled");
        }
        let slots = self.tracker.slots();
        let request = GenerationRequest::from(slots);
        let lyrics = writer.write_lyrics(&request)?;

        let block = format!(
            "Genre: {}\nTopic: {}\nEmotion: {}\n\n---\n\nGenerated Lyrics:\n\n{}",
            capitalize(&request.genre),
            capitalize(&request.topic),
            capitalize(&request.emotion),
            lyrics
        );
        self.lyrics = Some(lyrics);
        self.push(Role::Assistant, block);
        Ok(self.last_assistant_message())
    }
}

/// Drives a session over line-oriented input until EOF or `/quit`.
/// A generation failure ends the chat with the error.
pub fn run_chat<R: BufRead, W: Write>(
    input: R,
    mut output: W,
    session: &mut Session,
    writer: &mut dyn Songwriter,
) -> Result<()> {
    writeln!(output, "{}", session.last_assistant_message()).context("write prompt")?;
    for line in input.lines() {
        let line = line.context("read chat input")?;
        match line.trim() {
            QUIT_COMMAND => break,
            RESET_COMMAND => {
                session.reset();
                writeln!(output, "\n{}", session.last_assistant_message()).context("write prompt")?;
                continue;
            }
            _ => {}
        }

        let reply = session.handle_input(&line);
        writeln!(output, "\n{reply}").context("write reply")?;

        if session.ready_to_generate() {
            writeln!(output, "\nGenerating lyrics, please wait...").context("write status")?;
            output.flush().context("flush output")?;
            match session.generate(writer) {
                Ok(block) => {
                    writeln!(output, "\n{block}").context("write lyrics")?;
                    writeln!(
                        output,
                        "\nType {RESET_COMMAND} to write another song or {QUIT_COMMAND} to exit."
                    )
                    .context("write hint")?;
                }
                Err(e) => {
                    error!(error = %format!("{e:#}"), "lyric generation failed");
                    writeln!(output, "\nLyric generation failed: {e:#}").context("write failure")?;
                    return Err(e.context("generate lyrics"));
                }
            }
        }
        output.flush().context("flush output")?;
    }
    Ok(())
}
