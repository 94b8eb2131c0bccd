// Heuristic repair of Markdown emitted by language models

use regex::{Captures, Regex};
use std::sync::LazyLock;
use tracing::debug;

/// A single repair pass. Every pass is total: it accepts any input.
type Pass = fn(&str) -> String;

/// Repair passes in application order. Later passes assume earlier ones ran.
const PASSES: &[Pass] = &[
    split_glued_numbered_item,
    tighten_bold_spacing,
    join_split_bold_marker,
    split_glued_block_marker,
    plus_bullets_to_asterisk,
    isolate_mini_headings,
    colon_rule_to_bullet,
    split_bullet_after_sentence,
    split_glued_emphasis,
    split_glued_heading,
    split_glued_rule,
    split_glued_roman_item,
    collapse_blank_runs,
];

/// How many times the pass pipeline may be re-run while looking for a fixed point.
const MAX_ROUNDS: usize = 8;

static GLUED_NUMBERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([.!?])[ \t]*(\d+\.[ \t]+)").expect("valid regex"));

static SPACED_BOLD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*\*[ \t]*(?:\n[ \t]*)*([^*\s](?:[^*\n]*[^*\s])?)[ \t]*(?:\n[ \t]*)*\*\*")
        .expect("valid regex")
});

static SPLIT_BOLD_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*[ \t]+\*").expect("valid regex"));

static GLUED_BLOCK_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-z\x{C0}-\x{FF}0-9.!?])([ \t]*)([*+\-] |\d+\. |#{1,6} )").expect("valid regex")
});

static PLUS_BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*\+[ \t]+").expect("valid regex"));

static MINI_HEADING_AFTER_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^\n])(\*{4}[^\n]*?\*{4})").expect("valid regex"));

static MINI_HEADING_BEFORE_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\*{4}[^\n]*?\*{4})([^\n])").expect("valid regex"));

static COLON_RULE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":\*\*\*").expect("valid regex"));

static BULLET_AFTER_SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([.?!)])[ \t]*(\* )").expect("valid regex"));

static GLUED_STRONG_STARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\p{L}\p{N}.!?:;)])\*\*([A-Za-z0-9\x{C0}-\x{FF}][^*\n]*?)\*\*")
        .expect("valid regex")
});

static GLUED_STRONG_UNDERSCORES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\p{L}\p{N}.!?:;)])__([A-Za-z0-9\x{C0}-\x{FF}][^_\n]*?)__").expect("valid regex")
});

static GLUED_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^\s#])[ \t]*(#{1,6} )").expect("valid regex"));

static GLUED_RULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)([^\s])[ \t]+(\*\*\*|---|___)[ \t]*$").expect("valid regex")
});

static GLUED_ROMAN_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([^\s])[ \t]+([IVX]+|[ivx]+)\.([ \t])").expect("valid regex")
});

static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Normalize model output into Markdown the block parser understands.
///
/// The pass pipeline is re-applied until the text stops changing, so
/// `autofix(&autofix(s)) == autofix(s)` holds for any input that settles
/// within [`MAX_ROUNDS`] rounds. Empty input is returned unchanged.
pub fn autofix(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut current = run_passes(text);
    for round in 1..MAX_ROUNDS {
        let next = run_passes(&current);
        if next == current {
            return current;
        }
        debug!(round, "autofix pipeline changed text again");
        current = next;
    }

    debug!(rounds = MAX_ROUNDS, "autofix pipeline did not settle");
    current
}

/// Run every repair pass once, in order.
pub fn run_passes(text: &str) -> String {
    PASSES
        .iter()
        .fold(text.to_string(), |acc, pass| pass(&acc))
}

/// `"cars.2. Machine"` -> `"cars.\n2. Machine"`
pub fn split_glued_numbered_item(text: &str) -> String {
    GLUED_NUMBERED_ITEM
        .replace_all(text, "${1}\n${2}")
        .into_owned()
}

/// `"** Title **"` and `"**Title\n**"` -> `"**Title**"`
pub fn tighten_bold_spacing(text: &str) -> String {
    SPACED_BOLD.replace_all(text, "**${1}**").into_owned()
}

/// `"* *"` -> `"**"`
pub fn join_split_bold_marker(text: &str) -> String {
    SPLIT_BOLD_MARKER.replace_all(text, "**").into_owned()
}

/// Break before a bullet, ordered item or heading marker that trails inline text.
pub fn split_glued_block_marker(text: &str) -> String {
    GLUED_BLOCK_MARKER
        .replace_all(text, |caps: &Captures| {
            let before = &caps[1];
            let gap = &caps[2];
            let marker = &caps[3];
            let is_bullet = marker.starts_with(['*', '+', '-']);
            // "10. " is a number, not "1" followed by an item "0. "
            let splits_number = gap.is_empty()
                && before.chars().all(|c| c.is_ascii_digit())
                && marker.starts_with(|c: char| c.is_ascii_digit());
            // "*em* word": a closing emphasis star is not a bullet
            let closes_emphasis = is_bullet && gap.is_empty() && !matches!(before, "." | "!" | "?");
            if splits_number || closes_emphasis {
                caps[0].to_string()
            } else {
                format!("{before}\n{marker}")
            }
        })
        .into_owned()
}

/// `"+ item"` -> `"* item"`
pub fn plus_bullets_to_asterisk(text: &str) -> String {
    PLUS_BULLET.replace_all(text, "* ").into_owned()
}

/// Put `****Title****` spans on their own paragraph.
pub fn isolate_mini_headings(text: &str) -> String {
    let text = MINI_HEADING_AFTER_TEXT.replace_all(text, "${1}\n\n${2}");
    MINI_HEADING_BEFORE_TEXT
        .replace_all(&text, "${1}\n\n${2}")
        .into_owned()
}

/// `"Materials:***Paper"` -> `"Materials:**\n* Paper"`
pub fn colon_rule_to_bullet(text: &str) -> String {
    COLON_RULE.replace_all(text, ":**\n* ").into_owned()
}

/// `"Done.* next"` -> `"Done.\n* next"`
pub fn split_bullet_after_sentence(text: &str) -> String {
    BULLET_AFTER_SENTENCE
        .replace_all(text, "${1}\n${2}")
        .into_owned()
}

/// `"end.**Next step**"` -> `"end.\n**Next step**"`, same for `__`.
pub fn split_glued_emphasis(text: &str) -> String {
    let text = GLUED_STRONG_STARS.replace_all(text, "${1}\n**${2}**");
    GLUED_STRONG_UNDERSCORES
        .replace_all(&text, "${1}\n__${2}__")
        .into_owned()
}

/// `"Intro ## Goals"` -> `"Intro\n## Goals"`
pub fn split_glued_heading(text: &str) -> String {
    GLUED_HEADING.replace_all(text, "${1}\n${2}").into_owned()
}

/// `"Summary ---"` -> `"Summary\n---"`
pub fn split_glued_rule(text: &str) -> String {
    GLUED_RULE.replace_all(text, "${1}\n${2}").into_owned()
}

/// `"Part I. Intro"` -> `"Part\nI. Intro"`
pub fn split_glued_roman_item(text: &str) -> String {
    GLUED_ROMAN_ITEM
        .replace_all(text, "${1}\n${2}.${3}")
        .into_owned()
}

/// Three or more line breaks become exactly two.
pub fn collapse_blank_runs(text: &str) -> String {
    BLANK_RUN.replace_all(text, "\n\n").into_owned()
}
