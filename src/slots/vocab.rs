use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Canonical genres the generator knows how to write for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Genre {
    Pop,
    HipHop,
}

impl Genre {
    pub const ALL: [Genre; 2] = [Genre::Pop, Genre::HipHop];

    pub fn as_str(self) -> &'static str {
        match self {
            Genre::Pop => "pop",
            Genre::HipHop => "hiphop",
        }
    }

    /// Free-text spellings accepted for this genre, already lower-cased.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Genre::Pop => &["pop", "pop music", "popular", "pops"],
            Genre::HipHop => &["hiphop", "hip-hop", "hip hop", "rap", "rap music"],
        }
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a free-text genre answer is compared against the alias table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GenreMatching {
    /// Exact match or the alias appearing anywhere in the input.
    /// "unpopular" resolves to pop under this policy.
    #[default]
    Substring,
    /// The alias must appear bounded by non-word characters.
    WholeWord,
}

static WHOLE_WORD_ALIASES: Lazy<Vec<(Genre, Vec<Regex>)>> = Lazy::new(|| {
    Genre::ALL
        .iter()
        .map(|genre| {
            let patterns = genre
                .aliases()
                .iter()
                .map(|alias| Regex::new(&format!(r"\b{}\b", regex::escape(alias))).expect("valid regex"))
                .collect();
            (*genre, patterns)
        })
        .collect()
});

/// Resolves an already trimmed, lower-cased answer to a genre. The first
/// genre in declaration order with a matching alias wins.
pub fn match_genre(input: &str, policy: GenreMatching) -> Option<Genre> {
    match policy {
        GenreMatching::Substring => Genre::ALL.into_iter().find(|genre| {
            genre
                .aliases()
                .iter()
                .any(|alias| input == *alias || input.contains(alias))
        }),
        GenreMatching::WholeWord => WHOLE_WORD_ALIASES
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|re| re.is_match(input)))
            .map(|(genre, _)| *genre),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    HeartbreakLoss,
    LoveIntimacy,
    PersonaPerformance,
    HopeReflection,
    UrbanPartyLife,
    StreetConflict,
    PersonalChange,
    VoiceIdentity,
    LifeMortality,
    FaithReligion,
}

impl Topic {
    pub const ALL: [Topic; 10] = [
        Topic::HeartbreakLoss,
        Topic::LoveIntimacy,
        Topic::PersonaPerformance,
        Topic::HopeReflection,
        Topic::UrbanPartyLife,
        Topic::StreetConflict,
        Topic::PersonalChange,
        Topic::VoiceIdentity,
        Topic::LifeMortality,
        Topic::FaithReligion,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Topic::HeartbreakLoss => "Heartbreak & Loss",
            Topic::LoveIntimacy => "Love & Intimacy",
            Topic::PersonaPerformance => "Persona & Performance",
            Topic::HopeReflection => "Hope & Reflection",
            Topic::UrbanPartyLife => "Urban Party Life",
            Topic::StreetConflict => "Street & Conflict",
            Topic::PersonalChange => "Personal Change",
            Topic::VoiceIdentity => "Voice & Identity",
            Topic::LifeMortality => "Life & Mortality",
            Topic::FaithReligion => "Faith & Religion",
        }
    }

    /// Case-sensitive exact lookup; no normalization is applied.
    pub fn from_label(label: &str) -> Option<Topic> {
        Topic::ALL.into_iter().find(|t| t.label() == label)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// GoEmotions taxonomy.
pub const EMOTIONS: [&str; 28] = [
    "admiration",
    "amusement",
    "anger",
    "annoyance",
    "approval",
    "caring",
    "confusion",
    "curiosity",
    "desire",
    "disappointment",
    "disapproval",
    "disgust",
    "embarrassment",
    "excitement",
    "fear",
    "gratitude",
    "grief",
    "joy",
    "love",
    "nervousness",
    "optimism",
    "pride",
    "realization",
    "relief",
    "remorse",
    "sadness",
    "surprise",
    "neutral",
];

pub fn is_known_emotion(input: &str) -> bool {
    let lowered = input.to_lowercase();
    EMOTIONS.contains(&lowered.as_str())
}

pub const MIN_LENGTH: i64 = 200;
pub const MAX_LENGTH: i64 = 1200;
