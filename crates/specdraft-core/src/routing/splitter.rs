//! Marker-based message splitter
//!
//! Finds the first valid marker in a message. A marker is valid when it is
//! outside code spans and sits at the start of the text, at the start of a
//! line, or right after sentence-ending punctuation and whitespace.
//!
//! Everything before a valid marker is user-visible (trimmed). Everything
//! from the marker on, later markers included, is one payload for the other
//! agent and keeps the marker token so the forwarder can strip it itself.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::agent::AgentRole;
use crate::constants::markers;

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[\s\S]*?```").unwrap());
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`]+`").unwrap());
static SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]\s+$").unwrap());

/// Kinds of handoff marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Review,
}

impl MarkerKind {
    pub fn token(&self) -> &'static str {
        match self {
            MarkerKind::Review => markers::REVIEW,
        }
    }

    /// Agent the payload is addressed to
    pub fn target(&self) -> AgentRole {
        match self {
            MarkerKind::Review => AgentRole::Review,
        }
    }
}

/// Segment lengths of one split, in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SplitStats {
    pub original_len: usize,
    pub before_len: usize,
    pub after_len: usize,
}

/// Outcome of splitting one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitResult {
    pub has_marker: bool,
    /// Byte offset of the winning marker
    pub marker_index: Option<usize>,
    /// User-visible part; trimmed when a marker was found, verbatim otherwise
    pub before_marker: String,
    /// Payload including the marker token, untrimmed; empty without a marker
    pub after_marker: String,
    pub marker_kind: Option<MarkerKind>,
    /// Marker occurrences skipped as inside code or mid-sentence
    pub invalid_occurrences: usize,
    pub stats: SplitStats,
}

/// Split a message at its first valid marker
pub fn split(content: &str) -> SplitResult {
    let kind = MarkerKind::Review;
    let token = kind.token();
    let code = code_spans(content);

    let mut invalid = 0;
    let mut from = 0;
    while let Some(offset) = content[from..].find(token) {
        let index = from + offset;
        if is_valid_position(content, index, &code) {
            let before = content[..index].trim().to_string();
            let after = content[index..].to_string();
            return SplitResult {
                has_marker: true,
                marker_index: Some(index),
                stats: SplitStats {
                    original_len: content.len(),
                    before_len: before.len(),
                    after_len: after.len(),
                },
                before_marker: before,
                after_marker: after,
                marker_kind: Some(kind),
                invalid_occurrences: invalid,
            };
        }
        invalid += 1;
        from = index + token.len();
    }

    SplitResult {
        has_marker: false,
        marker_index: None,
        before_marker: content.to_string(),
        after_marker: String::new(),
        marker_kind: None,
        invalid_occurrences: invalid,
        stats: SplitStats {
            original_len: content.len(),
            before_len: content.len(),
            after_len: 0,
        },
    }
}

/// Whether the message contains a valid marker
pub fn has_review_marker(content: &str) -> bool {
    split(content).has_marker
}

/// Strip the leading marker from a payload and trim it.
/// `None` when the marker is missing or nothing remains.
pub fn extract_payload(after_marker: &str, kind: MarkerKind) -> Option<String> {
    let payload = after_marker.strip_prefix(kind.token())?.trim();
    if payload.is_empty() {
        None
    } else {
        Some(payload.to_string())
    }
}

/// Fenced blocks, plus inline spans found between them
fn code_spans(content: &str) -> Vec<Range<usize>> {
    let fences: Vec<Range<usize>> = CODE_FENCE.find_iter(content).map(|m| m.range()).collect();

    let mut spans = Vec::with_capacity(fences.len());
    let mut gap_start = 0;
    for fence in fences.iter().cloned().chain(std::iter::once(content.len()..content.len())) {
        let gap = &content[gap_start..fence.start];
        spans.extend(
            INLINE_CODE
                .find_iter(gap)
                .map(|m| gap_start + m.start()..gap_start + m.end()),
        );
        gap_start = fence.end;
    }
    spans.extend(fences);
    spans
}

fn is_valid_position(content: &str, index: usize, code: &[Range<usize>]) -> bool {
    if code.iter().any(|span| span.contains(&index)) {
        return false;
    }
    if index == 0 {
        return true;
    }

    let prefix = &content[..index];
    if prefix.ends_with('\n') {
        return true;
    }

    let lookback_start = prefix
        .char_indices()
        .rev()
        .nth(markers::SENTENCE_LOOKBACK - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    SENTENCE_END.is_match(&prefix[lookback_start..])
}

/// Running totals over many splits
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SplitSummary {
    pub total: usize,
    pub with_marker: usize,
    pub invalid_occurrences: usize,
    total_before_len: usize,
    total_after_len: usize,
}

impl SplitSummary {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a SplitResult>) -> Self {
        let mut summary = Self::default();
        for result in results {
            summary.record(result);
        }
        summary
    }

    pub fn record(&mut self, result: &SplitResult) {
        self.total += 1;
        if result.has_marker {
            self.with_marker += 1;
        }
        self.invalid_occurrences += result.invalid_occurrences;
        self.total_before_len += result.stats.before_len;
        self.total_after_len += result.stats.after_len;
    }

    pub fn without_marker(&self) -> usize {
        self.total - self.with_marker
    }

    pub fn average_before_len(&self) -> usize {
        self.total_before_len.checked_div(self.total).unwrap_or(0)
    }

    /// Average payload length over the splits that found a marker
    pub fn average_after_len(&self) -> usize {
        self.total_after_len.checked_div(self.with_marker).unwrap_or(0)
    }
}
