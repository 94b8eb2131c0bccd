// Inline Markdown spans to HTML

use regex::Regex;
use std::sync::LazyLock;

pub const IMAGE_STYLE: &str = "max-width:100%;height:auto;";
pub const INLINE_CODE_STYLE: &str = "background:#eee;padding:2px 4px;border-radius:3px;";

static IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[(.*?)\]\((.*?)\)").expect("valid regex"));
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(.*?)\]\((.*?)\)").expect("valid regex"));
static MINI_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*\*\*(.*?)\*\*\*\*").expect("valid regex"));
static STRONG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("valid regex"));
static EMPHASIS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*(.*?)\*").expect("valid regex"));
static CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`(.*?)`").expect("valid regex"));

/// Render the inline spans of one already-escaped line.
///
/// Substitutions run from most to least specific, so `****x****` becomes a
/// mini heading before `**x**` can claim it and `**x**` is consumed before
/// `*x*` is considered.
pub fn render_inline(line: &str) -> String {
    if line.is_empty() {
        return String::new();
    }

    let html = IMAGE.replace_all(
        line,
        format!(r#"<img src="${{2}}" alt="${{1}}" style="{IMAGE_STYLE}">"#).as_str(),
    );
    let html = LINK.replace_all(
        &html,
        r#"<a href="${2}" target="_blank" rel="noopener noreferrer">${1}</a>"#,
    );
    let html = MINI_HEADING.replace_all(&html, "<h3>${1}</h3>");
    let html = STRONG.replace_all(&html, "<strong>${1}</strong>");
    let html = EMPHASIS.replace_all(&html, "<em>${1}</em>");
    let html = CODE.replace_all(
        &html,
        format!(r#"<code style="{INLINE_CODE_STYLE}">${{1}}</code>"#).as_str(),
    );

    html.into_owned()
}
