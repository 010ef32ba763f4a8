//! Tag grammar: the fixed vocabulary and the sentence validator.

pub mod validator;
pub mod vocabulary;

pub use validator::{
    MAX_TAGS_PER_SENTENCE, TagMatch, ValidationReport, extract_tags, split_sentences,
    strip_unknown_tags, validate, validate_text,
};
pub use vocabulary::{Tag, TagCategory, VOCABULARY_VERSION};
