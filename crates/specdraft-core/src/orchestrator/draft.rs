//! Heuristic for "this message is a specification draft"

use once_cell::sync::Lazy;
use regex::Regex;

const DRAFT_KEYWORDS: &[&str] = &[
    "specification",
    "requirements",
    "functional requirements",
    "non-functional requirements",
    "architecture",
    "user stories",
    "acceptance criteria",
];

static STRUCTURE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(#{1,3}\s+|[-*]\s+)").unwrap());

/// At least two draft keywords plus markdown headings or lists
pub fn looks_like_draft(text: &str) -> bool {
    let lower = text.to_lowercase();
    let hits = DRAFT_KEYWORDS
        .iter()
        .filter(|keyword| lower.contains(*keyword))
        .count();
    hits >= 2 && STRUCTURE.is_match(text)
}
