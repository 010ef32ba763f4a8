//! Fixed tag vocabulary.
//!
//! Every tag belongs to exactly one [`TagCategory`]. The table is versioned
//! with [`VOCABULARY_VERSION`]; there are no user-defined tags.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Version of the tag table below. Bump when entries change.
pub const VOCABULARY_VERSION: u32 = 1;

/// Tag category; determines the placement rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagCategory {
    /// Must lead the sentence.
    Emotion,
    /// Placement-unconstrained.
    Tone,
    /// Placement-unconstrained.
    Effect,
    /// Placement-unconstrained.
    Special,
}

impl TagCategory {
    pub const ALL: [Self; 4] = [Self::Emotion, Self::Tone, Self::Effect, Self::Special];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Emotion => "emotion",
            Self::Tone => "tone",
            Self::Effect => "effect",
            Self::Special => "special",
        }
    }

    /// Whether tags of this category must appear at sentence start.
    #[must_use]
    pub fn must_lead(self) -> bool {
        matches!(self, Self::Emotion)
    }
}

/// A resolved vocabulary entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
    pub name: &'static str,
    pub category: TagCategory,
}

// ── Tag table ───────────────────────────────────────────────────────────

const EMOTIONS: &[&str] = &[
    // basic
    "happy",
    "sad",
    "angry",
    "excited",
    "calm",
    "nervous",
    "confident",
    "surprised",
    "satisfied",
    "delighted",
    "scared",
    "worried",
    "upset",
    "frustrated",
    "depressed",
    "empathetic",
    "embarrassed",
    "disgusted",
    "moved",
    "proud",
    "relaxed",
    "grateful",
    "curious",
    "sarcastic",
    // advanced
    "disdainful",
    "unhappy",
    "anxious",
    "hysterical",
    "indifferent",
    "uncertain",
    "doubtful",
    "confused",
    "disappointed",
    "regretful",
    "guilty",
    "ashamed",
    "jealous",
    "envious",
    "hopeful",
    "optimistic",
    "pessimistic",
    "nostalgic",
    "lonely",
    "bored",
    "contemptuous",
    "sympathetic",
    "compassionate",
    "determined",
    "resigned",
];

const TONES: &[&str] = &[
    "in a hurry tone",
    "shouting",
    "screaming",
    "whispering",
    "soft tone",
];

const EFFECTS: &[&str] = &[
    "laughing",
    "chuckling",
    "sobbing",
    "crying loudly",
    "sighing",
    "groaning",
    "panting",
    "gasping",
    "yawning",
    "snoring",
];

const SPECIALS: &[&str] = &[
    "audience laughing",
    "background laughter",
    "crowd laughing",
    "break",
    "long-break",
];

static TABLE: LazyLock<HashMap<&'static str, TagCategory>> = LazyLock::new(|| {
    let mut table = HashMap::new();
    for category in TagCategory::ALL {
        for &name in names_in(category) {
            table.insert(name, category);
        }
    }
    table
});

/// All names of one category, in table order.
#[must_use]
pub fn names_in(category: TagCategory) -> &'static [&'static str] {
    match category {
        TagCategory::Emotion => EMOTIONS,
        TagCategory::Tone => TONES,
        TagCategory::Effect => EFFECTS,
        TagCategory::Special => SPECIALS,
    }
}

/// Resolve a tag name. Exact, case-sensitive match only.
#[must_use]
pub fn lookup(name: &str) -> Option<Tag> {
    TABLE
        .get_key_value(name)
        .map(|(&name, &category)| Tag { name, category })
}

/// Total number of vocabulary entries.
#[must_use]
pub fn len() -> usize {
    TABLE.len()
}

/// Render the vocabulary as a category → names listing, one category per
/// line. Used to brief the conversation collaborator.
#[must_use]
pub fn describe() -> String {
    TagCategory::ALL
        .iter()
        .map(|c| format!("{}: {}", c.as_str(), names_in(*c).join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}
