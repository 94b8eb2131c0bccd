// Line-oriented block parser producing HTML

use regex::Regex;
use std::sync::LazyLock;

use super::escape_html;
use super::inline::render_inline;

pub const CODE_BLOCK_STYLE: &str =
    "display:block;background:#f4f4f4;padding:10px;border-radius:5px;overflow-x:auto;font-family:monospace;";
pub const BLOCKQUOTE_STYLE: &str = "border-left:4px solid #ccc;padding-left:10px;color:#666;";

/// Escaped form of the `"> "` quote prefix.
const QUOTE_PREFIX: &str = "&gt; ";

static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r\n|\n|\r").expect("valid regex"));
static ROMAN_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([IVX]+)\.\s+(.*)$").expect("valid regex"));
static BULLET_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[*+\-]\s+(.*)$").expect("valid regex"));
static ORDERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\s+(.*)$").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Bullet,
    Ordered,
    Roman,
}

impl ListKind {
    pub const fn open_tag(self) -> &'static str {
        match self {
            Self::Bullet => "<ul>",
            Self::Ordered => "<ol>",
            Self::Roman => r#"<ol type="I">"#,
        }
    }

    pub const fn close_tag(self) -> &'static str {
        match self {
            Self::Bullet => "</ul>",
            Self::Ordered | Self::Roman => "</ol>",
        }
    }
}

/// State of one parse invocation.
///
/// At most one list is open at a time. Anything that is not an item of the
/// open list's kind closes it first.
#[derive(Debug, Default)]
pub struct ParserState {
    html: String,
    in_code_block: bool,
    list: Option<ListKind>,
}

impl ParserState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one escaped line through the state machine.
    pub fn process_line(&mut self, line: &str) {
        let trimmed = line.trim();

        if trimmed.starts_with("```") {
            self.toggle_code_block();
            return;
        }

        if self.in_code_block {
            self.html.push_str(line);
            self.html.push('\n');
            return;
        }

        if trimmed.is_empty() {
            self.close_list();
            self.html.push_str("<br>");
            return;
        }

        if let Some((level, text)) = heading(trimmed) {
            self.close_list();
            self.html
                .push_str(&format!("<h{level}>{}</h{level}>", render_inline(text)));
            return;
        }

        if is_rule(trimmed) {
            self.close_list();
            self.html.push_str("<hr>");
            return;
        }

        if let Some((kind, text)) = list_item(trimmed) {
            self.ensure_list(kind);
            self.html.push_str("<li>");
            self.html.push_str(&render_inline(text));
            self.html.push_str("</li>");
            return;
        }

        self.close_list();
        if let Some(quoted) = trimmed.strip_prefix(QUOTE_PREFIX) {
            self.html.push_str(&format!(
                r#"<blockquote style="{BLOCKQUOTE_STYLE}">{}</blockquote>"#,
                render_inline(quoted)
            ));
        } else {
            self.html.push_str("<p>");
            self.html
                .push_str(&render_inline(strip_stray_asterisk(trimmed)));
            self.html.push_str("</p>");
        }
    }

    /// Close whatever is still open and hand back the HTML.
    pub fn finish(mut self) -> String {
        self.close_list();
        if self.in_code_block {
            self.html.push_str("</code></pre>");
            self.in_code_block = false;
        }
        self.html
    }

    fn toggle_code_block(&mut self) {
        if self.in_code_block {
            self.html.push_str("</code></pre>");
            self.in_code_block = false;
        } else {
            self.close_list();
            self.html
                .push_str(&format!(r#"<pre><code style="{CODE_BLOCK_STYLE}">"#));
            self.in_code_block = true;
        }
    }

    fn ensure_list(&mut self, kind: ListKind) {
        if self.list != Some(kind) {
            self.close_list();
            self.html.push_str(kind.open_tag());
            self.list = Some(kind);
        }
    }

    fn close_list(&mut self) {
        if let Some(kind) = self.list.take() {
            self.html.push_str(kind.close_tag());
        }
    }
}

/// Parse normalized Markdown into HTML.
///
/// `<` and `>` are escaped before any structure is recognized, so raw HTML
/// in model output is shown as text.
pub fn parse_blocks(normalized: &str) -> String {
    if normalized.is_empty() {
        return String::new();
    }
    let escaped = escape_html(normalized);
    let mut state = ParserState::new();
    for line in LINE_BREAK.split(&escaped) {
        state.process_line(line);
    }
    state.finish()
}

fn heading(trimmed: &str) -> Option<(usize, &str)> {
    let level = trimmed.bytes().take_while(|&b| b == b'#').count();
    if !(1..=6).contains(&level) {
        return None;
    }
    trimmed[level..].strip_prefix(' ').map(|text| (level, text))
}

fn is_rule(trimmed: &str) -> bool {
    let mut chars = trimmed.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    matches!(first, '*' | '-' | '_') && trimmed.len() >= 3 && chars.all(|c| c == first)
}

fn list_item(trimmed: &str) -> Option<(ListKind, &str)> {
    if let Some(caps) = ROMAN_ITEM.captures(trimmed) {
        return caps.get(2).map(|m| (ListKind::Roman, m.as_str()));
    }
    if let Some(caps) = BULLET_ITEM.captures(trimmed) {
        return caps.get(1).map(|m| (ListKind::Bullet, m.as_str()));
    }
    ORDERED_ITEM
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| (ListKind::Ordered, m.as_str()))
}

/// Drop a lone leading `*` left over from broken emphasis.
fn strip_stray_asterisk(text: &str) -> &str {
    match text.strip_prefix('*') {
        Some(rest) if !rest.starts_with('*') => rest.trim_start(),
        _ => text,
    }
}
