//! Slot-filling state for one lyric request.
//!
//! A [`SlotTracker`] owns the four attributes the dialogue collects. Every
//! proposed value is validated and normalized before it is stored, so a set
//! slot always holds something the generator understands.

pub mod vocab;

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

pub use vocab::{Genre, GenreMatching, Topic, EMOTIONS, MAX_LENGTH, MIN_LENGTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotName {
    Genre,
    Topic,
    Emotion,
    Length,
}

impl SlotName {
    /// Fill order used by [`SlotTracker::next_unfilled_slot`].
    pub const ORDER: [SlotName; 4] = [SlotName::Genre, SlotName::Topic, SlotName::Emotion, SlotName::Length];

    pub fn as_str(self) -> &'static str {
        match self {
            SlotName::Genre => "genre",
            SlotName::Topic => "topic",
            SlotName::Emotion => "emotion",
            SlotName::Length => "length",
        }
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotName {
    type Err = SlotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SlotName::ORDER
            .into_iter()
            .find(|slot| slot.as_str() == s)
            .ok_or_else(|| SlotError::UnknownSlot(s.to_string()))
    }
}

/// Raw answer handed to [`SlotTracker::update_slot`]. Conversion of typed
/// text into a number happens at the dialogue boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotValue {
    Text(String),
    Integer(i64),
}

impl From<&str> for SlotValue {
    fn from(value: &str) -> Self {
        SlotValue::Text(value.to_string())
    }
}

impl From<String> for SlotValue {
    fn from(value: String) -> Self {
        SlotValue::Text(value)
    }
}

impl From<i64> for SlotValue {
    fn from(value: i64) -> Self {
        SlotValue::Integer(value)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlotError {
    #[error("{0}")]
    InvalidValue(String),

    #[error("Unknown slot: {0}")]
    UnknownSlot(String),
}

/// The four collected attributes. `None` means not answered yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeSet {
    pub genre: Option<Genre>,
    pub topic: Option<Topic>,
    /// Stored exactly as typed; only the comparison is case-insensitive.
    pub emotion: Option<String>,
    pub length: Option<i64>,
}

impl AttributeSet {
    pub fn is_set(&self, slot: SlotName) -> bool {
        match slot {
            SlotName::Genre => self.genre.is_some(),
            SlotName::Topic => self.topic.is_some(),
            SlotName::Emotion => self.emotion.is_some(),
            SlotName::Length => self.length.is_some(),
        }
    }

    /// Display form of a stored value, if any.
    pub fn value_text(&self, slot: SlotName) -> Option<String> {
        match slot {
            SlotName::Genre => self.genre.map(|g| g.as_str().to_string()),
            SlotName::Topic => self.topic.map(|t| t.label().to_string()),
            SlotName::Emotion => self.emotion.clone(),
            SlotName::Length => self.length.map(|n| n.to_string()),
        }
    }
}

#[derive(Debug, Default)]
pub struct SlotTracker {
    slots: AttributeSet,
    genre_matching: GenreMatching,
}

impl SlotTracker {
    pub fn with_genre_matching(genre_matching: GenreMatching) -> Self {
        Self {
            slots: AttributeSet::default(),
            genre_matching,
        }
    }

    pub fn is_filled(&self) -> bool {
        SlotName::ORDER.iter().all(|slot| self.slots.is_set(*slot))
    }

    pub fn next_unfilled_slot(&self) -> Option<SlotName> {
        SlotName::ORDER.into_iter().find(|slot| !self.slots.is_set(*slot))
    }

    pub fn slots(&self) -> &AttributeSet {
        &self.slots
    }

    /// Validates `value` for `slot` and stores its normalized form.
    /// Nothing is modified when validation fails.
    pub fn update_slot(&mut self, slot: SlotName, value: impl Into<SlotValue>) -> Result<(), SlotError> {
        let value = value.into();
        match slot {
            SlotName::Genre => {
                let text = expect_text(slot, value)?;
                let normalized = text.to_lowercase().trim().to_string();
                let genre = vocab::match_genre(&normalized, self.genre_matching).ok_or_else(|| {
                    let allowed: Vec<&str> = Genre::ALL.iter().map(|g| g.as_str()).collect();
                    SlotError::InvalidValue(format!(
                        "Invalid genre: {normalized}. Please choose from {}",
                        allowed.join(", ")
                    ))
                })?;
                self.slots.genre = Some(genre);
            }
            SlotName::Topic => {
                let text = expect_text(slot, value)?;
                let topic = Topic::from_label(&text).ok_or_else(|| {
                    SlotError::InvalidValue(format!("Invalid topic: {text}. Please try other topics."))
                })?;
                self.slots.topic = Some(topic);
            }
            SlotName::Emotion => {
                let text = expect_text(slot, value)?;
                if !vocab::is_known_emotion(&text) {
                    return Err(SlotError::InvalidValue(format!(
                        "Invalid emotion: '{text}'.\n\nPlease choose one of the following supported emotions:\n\n{}",
                        EMOTIONS.join(", ")
                    )));
                }
                self.slots.emotion = Some(text);
            }
            SlotName::Length => {
                let n = match value {
                    SlotValue::Integer(n) => n,
                    SlotValue::Text(text) => {
                        return Err(SlotError::InvalidValue(format!(
                            "Invalid length: {text}. Please enter a whole number of words."
                        )))
                    }
                };
                if !(MIN_LENGTH..=MAX_LENGTH).contains(&n) {
                    return Err(SlotError::InvalidValue(format!(
                        "Invalid length: {n}. Please enter a number between {MIN_LENGTH} and {MAX_LENGTH}."
                    )));
                }
                self.slots.length = Some(n);
            }
        }
        debug!(slot = %slot, value = ?self.slots.value_text(slot), "slot updated");
        Ok(())
    }

    /// Same as [`SlotTracker::update_slot`] but addresses the slot by name.
    pub fn update_slot_named(&mut self, name: &str, value: impl Into<SlotValue>) -> Result<(), SlotError> {
        let slot: SlotName = name.parse()?;
        self.update_slot(slot, value)
    }
}

fn expect_text(slot: SlotName, value: SlotValue) -> Result<String, SlotError> {
    match value {
        SlotValue::Text(text) => Ok(text),
        SlotValue::Integer(n) => Err(SlotError::InvalidValue(format!("Invalid {slot}: {n}. Expected text."))),
    }
}
