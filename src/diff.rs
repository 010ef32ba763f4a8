//! Span diffs: proposal, validation and rendering.
//!
//! A [`Diff`] replaces one exact, case-sensitive span of the document with a
//! marked-up version of it. Diffs are built by [`propose`], validated once
//! against the tag grammar, and never mutated afterwards.

use crate::error::PatchParseError;
use crate::markup::{self, extract_tags};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use similar::{ChangeTag, TextDiff};
use std::collections::HashMap;
use std::fmt;

/// Opaque diff identifier, unique per proposal.
///
/// Derived from the span pair so re-proposing the same edit yields the same
/// id and is de-duplicated downstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiffId(String);

impl DiffId {
    /// Content-addressed id: first 8 hex chars of SHA-256 over both spans,
    /// each prefixed with its byte length so the split point is part of the
    /// hash.
    #[must_use]
    pub fn for_spans(original: &str, proposed: &str) -> Self {
        let mut hasher = Sha256::new();
        for span in [original, proposed] {
            hasher.update((span.len() as u64).to_le_bytes());
            hasher.update(span.as_bytes());
        }
        let digest = hasher.finalize();
        let hex: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
        Self(hex)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiffId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DiffId {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

impl From<String> for DiffId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Grammar verdict attached to a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffValidation {
    pub valid: bool,
    /// Taxonomy codes (`UnknownTag`, `NoChange`, ...).
    pub errors: Vec<String>,
    /// Human-readable reasons, parallel to `errors`.
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl DiffValidation {
    fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let (errors, reasons): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        Self {
            valid: errors.is_empty(),
            errors,
            reasons,
        }
    }
}

/// A proposed replacement of one exact text span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diff {
    id: DiffId,
    original_span: String,
    proposed_span: String,
    explanation: String,
    validation: DiffValidation,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    unified: String,
}

impl Diff {
    #[must_use]
    pub fn id(&self) -> &DiffId {
        &self.id
    }

    #[must_use]
    pub fn original_span(&self) -> &str {
        &self.original_span
    }

    #[must_use]
    pub fn proposed_span(&self) -> &str {
        &self.proposed_span
    }

    #[must_use]
    pub fn explanation(&self) -> &str {
        &self.explanation
    }

    #[must_use]
    pub fn validation(&self) -> &DiffValidation {
        &self.validation
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validation.valid
    }

    /// One-line description of the tags this diff adds.
    #[must_use]
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Git-style unified diff of the two spans.
    #[must_use]
    pub fn unified(&self) -> &str {
        &self.unified
    }

    /// Proposed span with unknown tags removed, when an unknown tag is one
    /// of the validation failures.
    #[must_use]
    pub fn suggestion(&self) -> Option<String> {
        self.validation
            .errors
            .iter()
            .any(|code| code == "UnknownTag")
            .then(|| markup::strip_unknown_tags(&self.proposed_span))
    }

    /// Re-run validation and confirm it agrees with the attached verdict.
    ///
    /// Guards against diffs deserialized from an untrusted peer claiming
    /// validity they do not have.
    #[must_use]
    pub fn verify(&self) -> bool {
        let fresh = validate_spans(&self.original_span, &self.proposed_span);
        fresh.valid && self.validation.valid
    }

    /// The diff that undoes this one once it has been applied.
    ///
    /// Valid by construction: it restores text that was already in the
    /// document.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let original = self.proposed_span.clone();
        let proposed = self.original_span.clone();
        Self {
            id: DiffId::for_spans(&original, &proposed),
            summary: summarize(&added_tags(&original, &proposed)),
            unified: render_unified(&original, &proposed),
            explanation: format!("revert {}", self.id),
            validation: DiffValidation {
                valid: true,
                errors: Vec::new(),
                reasons: Vec::new(),
            },
            original_span: original,
            proposed_span: proposed,
        }
    }
}

/// Build and validate a diff.
///
/// The proposed span is validated sentence by sentence. An empty original
/// span or a no-op replacement is never valid.
#[must_use]
pub fn propose(original: &str, proposed: &str, explanation: &str) -> Diff {
    let validation = validate_spans(original, proposed);
    let added = added_tags(original, proposed);
    Diff {
        id: DiffId::for_spans(original, proposed),
        original_span: original.to_owned(),
        proposed_span: proposed.to_owned(),
        explanation: explanation.to_owned(),
        validation,
        summary: summarize(&added),
        unified: render_unified(original, proposed),
    }
}

/// Parse a unified diff patch and propose the replacement it describes.
///
/// # Errors
///
/// Returns an error if the patch has no removed or no added lines.
pub fn propose_patch(patch: &str, explanation: &str) -> Result<Diff, PatchParseError> {
    let (original, proposed) = parse_unified_diff(patch)?;
    Ok(propose(&original, &proposed, explanation))
}

fn validate_spans(original: &str, proposed: &str) -> DiffValidation {
    let mut pairs = Vec::new();
    if original.is_empty() {
        pairs.push((
            "EmptyOriginal".to_owned(),
            "original span is empty; nothing to replace".to_owned(),
        ));
    } else if original == proposed {
        pairs.push((
            "NoChange".to_owned(),
            "proposed span is identical to the original".to_owned(),
        ));
    }
    let report = markup::validate_text(proposed);
    pairs.extend(
        report
            .errors
            .iter()
            .map(|e| (e.code().to_owned(), e.to_string())),
    );
    DiffValidation::from_pairs(pairs)
}

/// Tag names present in `proposed` more often than in `original`, in the
/// order they appear in `proposed`.
#[must_use]
pub fn added_tags(original: &str, proposed: &str) -> Vec<String> {
    let mut remaining: HashMap<&str, usize> = HashMap::new();
    for tag in extract_tags(original) {
        *remaining.entry(tag.name).or_default() += 1;
    }
    let mut added = Vec::new();
    for tag in extract_tags(proposed) {
        match remaining.get_mut(tag.name) {
            Some(count) if *count > 0 => *count -= 1,
            _ => added.push(tag.name.to_owned()),
        }
    }
    added
}

fn summarize(added: &[String]) -> String {
    let listed = added
        .iter()
        .map(|t| format!("({t})"))
        .collect::<Vec<_>>()
        .join(", ");
    match added.len() {
        0 => "No tags added".to_owned(),
        1 => format!("Added emotion tag: {listed}"),
        n => format!("Added {n} emotion tags: {listed}"),
    }
}

fn render_unified(original: &str, proposed: &str) -> String {
    TextDiff::from_lines(original, proposed)
        .unified_diff()
        .context_radius(3)
        .missing_newline_hint(false)
        .header("original", "proposed")
        .to_string()
}

/// Extract `(original, proposed)` from a unified diff patch.
///
/// `-` lines form the original, `+` lines the proposal; `---`, `+++` and
/// `@@` headers and context lines are ignored. Multi-line sides are joined
/// with `\n`.
///
/// # Errors
///
/// Returns an error when either side is missing.
pub fn parse_unified_diff(patch: &str) -> Result<(String, String), PatchParseError> {
    let mut original = Vec::new();
    let mut proposed = Vec::new();

    for line in patch.trim().lines() {
        if line.starts_with("---") || line.starts_with("+++") || line.starts_with("@@") {
            continue;
        }
        if let Some(rest) = line.strip_prefix('-') {
            original.push(rest);
        } else if let Some(rest) = line.strip_prefix('+') {
            proposed.push(rest);
        }
    }

    match (original.is_empty(), proposed.is_empty()) {
        (true, true) => Err(PatchParseError::NoChanges),
        (true, false) => Err(PatchParseError::MissingOriginal),
        (false, true) => Err(PatchParseError::MissingProposed),
        (false, false) => Ok((original.join("\n"), proposed.join("\n"))),
    }
}

/// Kind of an inline diff segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Equal,
    Removed,
    Added,
}

/// A run of characters sharing one [`SegmentKind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineSegment {
    pub kind: SegmentKind,
    pub text: String,
}

/// Character-level diff for highlighting a suggestion in the editor.
#[must_use]
pub fn inline_segments(original: &str, proposed: &str) -> Vec<InlineSegment> {
    let diff = TextDiff::from_chars(original, proposed);
    let mut segments: Vec<InlineSegment> = Vec::new();

    for change in diff.iter_all_changes() {
        let kind = match change.tag() {
            ChangeTag::Equal => SegmentKind::Equal,
            ChangeTag::Delete => SegmentKind::Removed,
            ChangeTag::Insert => SegmentKind::Added,
        };
        match segments.last_mut() {
            Some(last) if last.kind == kind => last.text.push_str(change.value()),
            _ => segments.push(InlineSegment {
                kind,
                text: change.value().to_owned(),
            }),
        }
    }

    segments
}
