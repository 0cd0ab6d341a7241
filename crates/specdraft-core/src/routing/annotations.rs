//! Thinking-annotation stripper
//!
//! Removes `<thinking>…</thinking>` spans from agent text. Tag names are
//! matched loosely (`<thinkking>`, `<thnking>`, any case). An opening tag with
//! no closing tag removes everything after it; orphan closing tags are
//! dropped. Whitespace is only collapsed where a span was removed.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::constants::markers;

static OPEN_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<t+h+i*n+k*i*n*g*[^>]*>").unwrap());
static CLOSE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</t+h+i*n+k*i*n*g*[^>]*>").unwrap());

/// Strip thinking annotations. Idempotent.
pub fn strip_thinking(text: &str) -> String {
    let mut current = text.to_string();
    // Removing a span can join fragments into a new tag; repeat until stable
    loop {
        let next = strip_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn strip_pass(text: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut cursor = 0;

    while cursor < text.len() {
        let open = OPEN_TAG.find_at(text, cursor);
        let close = CLOSE_TAG.find_at(text, cursor);

        let orphan = match (open, close) {
            (_, None) => None,
            (None, Some(close)) => Some(close),
            (Some(open), Some(close)) => (close.start() < open.start()).then_some(close),
        };

        let removed_end = if let Some(close) = orphan {
            kept.push(&text[cursor..close.start()]);
            close.end()
        } else if let Some(open) = open {
            kept.push(&text[cursor..open.start()]);
            let end = CLOSE_TAG
                .find_at(text, open.end())
                .map_or(text.len(), |c| c.end());
            if text[open.end()..end].contains(markers::REVIEW) {
                warn!("Removed a handoff marker inside a thinking annotation");
            }
            end
        } else {
            break;
        };
        cursor = removed_end;
    }

    if kept.is_empty() {
        return text.to_string();
    }
    kept.push(&text[cursor..]);
    join_at_seams(&kept)
}

/// Join kept fragments, collapsing the whitespace that meets at each seam
fn join_at_seams(fragments: &[&str]) -> String {
    let mut out = String::new();
    let mut seam_ws = String::new();

    for (i, fragment) in fragments.iter().enumerate() {
        if i == 0 {
            out.push_str(fragment);
            continue;
        }
        let trimmed = out.trim_end().len();
        seam_ws.push_str(&out[trimmed..]);
        out.truncate(trimmed);

        let right = fragment.trim_start();
        seam_ws.push_str(&fragment[..fragment.len() - right.len()]);
        if right.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str(collapse(&seam_ws));
        }
        seam_ws.clear();
        out.push_str(right);
    }
    out
}

fn collapse(whitespace: &str) -> &'static str {
    match whitespace.matches('\n').count() {
        0 if whitespace.is_empty() => "",
        0 => " ",
        1 => "\n",
        _ => "\n\n",
    }
}
