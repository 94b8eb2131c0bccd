// Plain-text rendering of lesson replies

use regex::Regex;
use std::sync::LazyLock;

use super::autofix::autofix;

const HEADING_UNDERLINE: &str = "--------------------";

static MINI_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*{4}(.*?)\*{4}").expect("valid regex"));
static EMPHASIS_SPANS: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [r"\*\*(.*?)\*\*", r"__(.*?)__", r"\*(.*?)\*", r"_(.*?)_"]
        .map(|pattern| Regex::new(pattern).expect("valid regex"))
});
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#+[ \t]+(.*)$").expect("valid regex"));
static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[*+\-][ \t]+").expect("valid regex"));
static EMPTY_BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^- [ \t]*\*+[ \t]*(?:\n|$)").expect("valid regex"));
static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Render a reply as plain text with Markdown markers removed.
pub fn render_text(markdown: &str) -> String {
    let text = autofix(markdown);
    let mut text = MINI_HEADING.replace_all(&text, "${1}").into_owned();

    loop {
        let stripped = EMPHASIS_SPANS
            .iter()
            .fold(text.clone(), |acc, re| re.replace_all(&acc, "${1}").into_owned());
        if stripped == text {
            break;
        }
        text = stripped;
    }

    let text = HEADING.replace_all(&text, format!("\n${{1}}\n{HEADING_UNDERLINE}").as_str());
    let text = BULLET.replace_all(&text, "- ");
    let text = text.replace("```", "");
    let text = drop_empty_bullets(&text);
    let text = BLANK_RUNS.replace_all(&text, "\n\n");

    text.trim().to_string()
}

/// Drop `- ` lines that hold nothing but leftover asterisks.
fn drop_empty_bullets(text: &str) -> String {
    EMPTY_BULLET.replace_all(text, "").into_owned()
}
