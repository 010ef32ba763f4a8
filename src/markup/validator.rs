//! Sentence-scoped tag grammar validation.
//!
//! Rules, applied in order to each sentence:
//!
//! 1. Every `(name)` token must resolve in the vocabulary.
//! 2. At most [`MAX_TAGS_PER_SENTENCE`] resolved tags.
//! 3. Emotion tags must form the leading run of the sentence.
//! 4. Parentheses must balance.
//!
//! Validation is pure: the same input always yields the same report.

use crate::error::MarkupError;
use crate::markup::vocabulary::{self, TagCategory};
use serde::{Serialize, Serializer};

/// Maximum number of resolved tags in one sentence.
pub const MAX_TAGS_PER_SENTENCE: usize = 3;

/// A `(name)` token found in text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMatch<'a> {
    /// Text between the parentheses, untrimmed.
    pub name: &'a str,
    /// Byte offset of the opening parenthesis.
    pub start: usize,
    /// Byte offset one past the closing parenthesis.
    pub end: usize,
    /// Category if the name is in the vocabulary.
    pub category: Option<TagCategory>,
}

/// Outcome of validating a sentence or a whole text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(serialize_with = "serialize_codes")]
    pub errors: Vec<MarkupError>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<MarkupError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Taxonomy codes, e.g. `["EmotionNotAtStart"]`.
    #[must_use]
    pub fn codes(&self) -> Vec<&'static str> {
        self.errors.iter().map(MarkupError::code).collect()
    }

    /// Human-readable reasons, one per error.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    /// `text` with unknown tags removed, when an unknown tag is what failed.
    #[must_use]
    pub fn suggestion(&self, text: &str) -> Option<String> {
        self.errors
            .iter()
            .any(|e| matches!(e, MarkupError::UnknownTag(_)))
            .then(|| strip_unknown_tags(text))
    }
}

fn serialize_codes<S: Serializer>(errors: &[MarkupError], s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(errors.iter().map(MarkupError::code))
}

/// Find every parenthesized token in `text`.
///
/// A token is `(` followed by at least one non-`)` character and a closing
/// `)`. `()` is not a token.
#[must_use]
pub fn extract_tags(text: &str) -> Vec<TagMatch<'_>> {
    let bytes = text.as_bytes();
    let mut tags = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'(' {
            i += 1;
            continue;
        }
        let Some(rel) = text[i + 1..].find(')') else {
            break;
        };
        if rel == 0 {
            i += 1;
            continue;
        }
        let close = i + 1 + rel;
        let name = &text[i + 1..close];
        tags.push(TagMatch {
            name,
            start: i,
            end: close + 1,
            category: vocabulary::lookup(name).map(|t| t.category),
        });
        i = close + 1;
    }
    tags
}

/// Split text into sentences.
///
/// A sentence ends after a run of `.`, `!` or `?` (plus any closing quotes)
/// that is followed by whitespace or end of input, or at a newline.
/// Terminators inside parentheses never split. Empty sentences are dropped.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '\n' => {
                push_trimmed(&mut sentences, &text[start..idx]);
                start = idx + 1;
                depth = 0;
            }
            '.' | '!' | '?' if depth == 0 => {
                let mut end = idx + ch.len_utf8();
                while let Some(&(j, next)) = chars.peek() {
                    if matches!(next, '.' | '!' | '?' | '"' | '\'' | '\u{201D}' | '\u{2019}') {
                        end = j + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let at_boundary = chars.peek().is_none_or(|&(_, next)| next.is_whitespace());
                if at_boundary {
                    push_trimmed(&mut sentences, &text[start..end]);
                    start = end;
                }
            }
            _ => {}
        }
    }
    push_trimmed(&mut sentences, &text[start..]);
    sentences
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, sentence: &'a str) {
    let trimmed = sentence.trim();
    if !trimmed.is_empty() {
        out.push(trimmed);
    }
}

/// Validate a single sentence.
#[must_use]
pub fn validate(sentence: &str) -> ValidationReport {
    ValidationReport::from_errors(sentence_errors(sentence))
}

/// Validate every sentence of `text`, concatenating errors in sentence order.
#[must_use]
pub fn validate_text(text: &str) -> ValidationReport {
    let errors = split_sentences(text)
        .into_iter()
        .flat_map(sentence_errors)
        .collect();
    ValidationReport::from_errors(errors)
}

fn sentence_errors(sentence: &str) -> Vec<MarkupError> {
    let tags = extract_tags(sentence);
    let mut errors = Vec::new();

    for tag in tags.iter().filter(|t| t.category.is_none()) {
        errors.push(MarkupError::UnknownTag(tag.name.to_owned()));
    }

    let resolved = tags.iter().filter(|t| t.category.is_some()).count();
    if resolved > MAX_TAGS_PER_SENTENCE {
        errors.push(MarkupError::TooManyTags(resolved));
    }

    // Unknown tags were already reported and neither extend nor break the
    // leading emotion run.
    let mut leading = true;
    let mut cursor = 0;
    for tag in &tags {
        if !sentence[cursor..tag.start].trim().is_empty() {
            leading = false;
        }
        cursor = tag.end;
        match tag.category {
            Some(category) if category.must_lead() => {
                if !leading {
                    errors.push(MarkupError::EmotionNotAtStart(tag.name.to_owned()));
                }
            }
            Some(_) => leading = false,
            None => {}
        }
    }

    let open = sentence.matches('(').count();
    let close = sentence.matches(')').count();
    if open != close {
        errors.push(MarkupError::UnbalancedParens { open, close });
    }

    errors
}

/// Remove tags whose names are not in the vocabulary.
///
/// Best-effort correction surfaced alongside an `UnknownTag` failure.
#[must_use]
pub fn strip_unknown_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for tag in extract_tags(text) {
        if tag.category.is_some() {
            continue;
        }
        out.push_str(&text[cursor..tag.start]);
        cursor = tag.end;
        // Collapse the double space left behind by a removed mid-text tag.
        if out.ends_with(' ') && text[cursor..].starts_with(' ') {
            cursor += 1;
        }
    }
    out.push_str(&text[cursor..]);
    out.trim().to_owned()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn mid_sentence_emotion_is_rejected() {
        let report = validate("I can't (sad) do this.");
        assert!(!report.valid);
        assert_eq!(report.codes(), vec!["EmotionNotAtStart"]);
    }

    #[test]
    fn leading_emotions_with_free_tone_and_effect_are_valid() {
        let report = validate(r#"(sad)(whispering) "I can't do this," (sighing) she said."#);
        assert!(report.valid, "{:?}", report.errors);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn multiple_leading_emotions_are_valid() {
        assert!(validate("(sad) (nervous) I should go.").valid);
    }

    #[test]
    fn emotion_after_tone_is_rejected() {
        let report = validate("(whispering)(sad) Come closer.");
        assert_eq!(report.codes(), vec!["EmotionNotAtStart"]);
        assert_eq!(
            report.errors[0],
            MarkupError::EmotionNotAtStart("sad".to_owned())
        );
    }

    #[test]
    fn every_misplaced_emotion_is_reported() {
        let report = validate("Well (sad) then (angry) fine.");
        assert_eq!(report.codes(), vec!["EmotionNotAtStart", "EmotionNotAtStart"]);
    }

    #[test]
    fn unknown_tags_are_rejected_case_sensitively() {
        let report = validate("(Sad) Hello.");
        assert_eq!(report.codes(), vec!["UnknownTag"]);
        assert_eq!(report.errors[0], MarkupError::UnknownTag("Sad".to_owned()));
    }

    #[test]
    fn unknown_tag_does_not_break_leading_run() {
        let report = validate("(sadly)(sad) Hello.");
        assert_eq!(report.codes(), vec!["UnknownTag"]);
    }

    #[test]
    fn four_tags_are_too_many() {
        let report = validate("(sad)(whispering) Oh (sighing) no (sobbing).");
        assert_eq!(report.codes(), vec!["TooManyTags"]);
        assert_eq!(report.errors[0], MarkupError::TooManyTags(4));
    }

    #[test]
    fn three_tags_are_allowed() {
        assert!(validate("(sad)(whispering) Oh (sighing) no.").valid);
    }

    #[test]
    fn unknown_tags_do_not_count_toward_limit() {
        let report = validate("(sad)(whispering) Oh (sighing) no (weeping).");
        assert_eq!(report.codes(), vec!["UnknownTag"]);
    }

    #[test]
    fn unbalanced_parens_are_reported() {
        let report = validate("(sad) Hello (whispering.");
        assert!(report.codes().contains(&"UnbalancedParens"));
    }

    #[test]
    fn plain_text_is_valid() {
        assert!(validate("Nothing to see here.").valid);
        assert!(validate("").valid);
    }

    #[test]
    fn validation_is_deterministic() {
        let input = "Hmm (sad) (shouting) (Happy) (a)(b)(c)(d) (";
        let first = validate(input);
        for _ in 0..10 {
            assert_eq!(validate(input), first);
        }
    }

    #[test]
    fn extract_tags_reports_offsets() {
        let tags = extract_tags("(sad)(whispering) Hello");
        assert_eq!(tags.len(), 2);
        assert_eq!((tags[0].name, tags[0].start, tags[0].end), ("sad", 0, 5));
        assert_eq!(tags[1].name, "whispering");
        assert_eq!(tags[1].start, 5);
        assert_eq!(tags[1].category, Some(TagCategory::Tone));
    }

    #[test]
    fn empty_parens_are_not_tags() {
        assert!(extract_tags("() nothing").is_empty());
    }

    #[test]
    fn tag_names_are_not_trimmed() {
        let tags = extract_tags("( sad ) hi");
        assert_eq!(tags[0].name, " sad ");
        assert!(tags[0].category.is_none());
    }

    #[test]
    fn split_sentences_on_terminators_and_newlines() {
        let sentences = split_sentences("(sad) I'm leaving. (happy) Bye!\nNext line? Yes");
        assert_eq!(
            sentences,
            vec!["(sad) I'm leaving.", "(happy) Bye!", "Next line?", "Yes"]
        );
    }

    #[test]
    fn split_keeps_closing_quotes_with_sentence() {
        let sentences = split_sentences(r#""Wait!" she said. Then silence."#);
        assert_eq!(sentences, vec![r#""Wait!""#, "she said.", "Then silence."]);
    }

    #[test]
    fn split_ignores_inner_periods() {
        assert_eq!(split_sentences("Version 1.5 shipped."), vec!["Version 1.5 shipped."]);
        assert_eq!(split_sentences("Wait... what?"), vec!["Wait...", "what?"]);
    }

    #[test]
    fn validate_text_scopes_rules_per_sentence() {
        let report = validate_text("(sad) I'm leaving. (happy) Bye.");
        assert!(report.valid, "{:?}", report.errors);

        let report = validate_text("(sad) Fine. I can't (sad) do this.");
        assert_eq!(report.codes(), vec!["EmotionNotAtStart"]);
    }

    #[test]
    fn report_serializes_codes() {
        let report = validate("I can't (sad) do this.");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"valid": false, "errors": ["EmotionNotAtStart"]})
        );
    }

    #[test]
    fn messages_are_human_readable() {
        let report = validate("I can't (sad) do this.");
        assert_eq!(
            report.messages(),
            vec!["emotion tag '(sad)' must be at sentence start".to_owned()]
        );
    }

    #[test]
    fn strip_unknown_tags_keeps_known_ones() {
        assert_eq!(
            strip_unknown_tags("(sad)(sadly) Hello (mumbling) there."),
            "(sad) Hello there."
        );
        assert_eq!(strip_unknown_tags("(foo) Hi."), "Hi.");
    }

    #[test]
    fn suggestion_only_for_unknown_tags() {
        let text = "(sadd) Hello.";
        assert_eq!(validate_text(text).suggestion(text).as_deref(), Some("Hello."));

        let misplaced = "Hello (sad) there.";
        assert_eq!(validate_text(misplaced).suggestion(misplaced), None);
    }
}
