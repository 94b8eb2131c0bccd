// Rendered HTML to styled terminal lines for the rich view

use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
};
use regex::Regex;
use std::sync::LazyLock;

static ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([a-zA-Z-]+)="([^"]*)""#).expect("valid regex"));

const RULE: &str = "────────────────────────────────────────";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("expected </{expected}> but found </{found}>")]
    MismatchedTag { expected: String, found: String },
    #[error("closing tag </{0}> without an open tag")]
    UnexpectedClose(String),
    #[error("tag <{0}> was never closed")]
    Unclosed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Text(&'a str),
    Open { name: String, attrs: &'a str },
    Close(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListStyle {
    Bullet,
    Decimal,
    Roman,
}

#[derive(Debug)]
struct OpenTag {
    name: String,
    href: Option<String>,
}

/// Convert the block renderer's HTML into terminal lines.
///
/// Only the tags the block and inline renderers produce are understood.
/// Anything else is kept as plain text. Tags must nest properly.
pub fn html_to_lines(html: &str) -> Result<Vec<Line<'static>>, RenderError> {
    let mut renderer = RichRenderer::default();
    for token in tokenize(html) {
        renderer.feed(token)?;
    }
    renderer.finish()
}

#[derive(Default)]
struct RichRenderer {
    lines: Vec<Line<'static>>,
    spans: Vec<Span<'static>>,
    stack: Vec<OpenTag>,
    lists: Vec<(ListStyle, usize)>,
}

impl RichRenderer {
    fn feed(&mut self, token: Token<'_>) -> Result<(), RenderError> {
        match token {
            Token::Text(text) => self.text(&decode_entities(text)),
            Token::Open { name, attrs } => self.open(name, attrs),
            Token::Close(name) => self.close(&name)?,
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<Line<'static>>, RenderError> {
        if let Some(tag) = self.stack.pop() {
            return Err(RenderError::Unclosed(tag.name));
        }
        self.flush();
        Ok(self.lines)
    }

    fn in_pre(&self) -> bool {
        self.stack.iter().any(|tag| tag.name == "pre")
    }

    fn style(&self) -> Style {
        self.stack
            .iter()
            .fold(Style::default(), |style, tag| match tag.name.as_str() {
                "h1" => style.fg(Color::Yellow).add_modifier(Modifier::BOLD),
                "h2" => style.fg(Color::Cyan).add_modifier(Modifier::BOLD),
                "h3" | "h4" | "h5" | "h6" => style.fg(Color::Blue).add_modifier(Modifier::BOLD),
                "strong" => style.fg(Color::Yellow).add_modifier(Modifier::BOLD),
                "em" => style.add_modifier(Modifier::ITALIC),
                "code" if self.in_pre() => style.fg(Color::Green),
                "code" => style.fg(Color::Magenta),
                "a" => style.fg(Color::Blue).add_modifier(Modifier::UNDERLINED),
                "blockquote" => style.fg(Color::DarkGray),
                _ => style,
            })
    }

    fn text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let style = self.style();
        if self.in_pre() {
            let mut parts = text.split('\n').peekable();
            while let Some(part) = parts.next() {
                if !part.is_empty() {
                    self.spans.push(Span::styled(format!("  {part}"), style));
                }
                if parts.peek().is_some() {
                    self.break_line();
                }
            }
        } else {
            self.spans.push(Span::styled(text.to_string(), style));
        }
    }

    fn open(&mut self, name: String, attrs: &str) {
        match name.as_str() {
            "br" => self.break_line(),
            "hr" => {
                self.flush();
                self.lines.push(Line::from(Span::styled(
                    RULE,
                    Style::default().fg(Color::DarkGray),
                )));
            }
            "img" => {
                let alt = attribute(attrs, "alt").unwrap_or_default();
                self.spans.push(Span::styled(
                    format!("[image: {alt}]"),
                    Style::default().fg(Color::DarkGray),
                ));
            }
            _ => {
                match name.as_str() {
                    "p" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "blockquote" => {
                        self.flush();
                    }
                    "ul" => {
                        self.flush();
                        self.lists.push((ListStyle::Bullet, 1));
                    }
                    "ol" => {
                        self.flush();
                        let style = if attribute(attrs, "type").as_deref() == Some("I") {
                            ListStyle::Roman
                        } else {
                            ListStyle::Decimal
                        };
                        self.lists.push((style, 1));
                    }
                    "li" => {
                        self.flush();
                        let marker = self.next_marker();
                        self.spans
                            .push(Span::styled(marker, Style::default().fg(Color::Cyan)));
                    }
                    "pre" => {
                        self.flush();
                        self.lines.push(Line::from(Span::styled(
                            "┌─ code",
                            Style::default().fg(Color::DarkGray),
                        )));
                    }
                    _ => {}
                }
                let href = attribute(attrs, "href");
                self.stack.push(OpenTag {
                    name: name.clone(),
                    href,
                });
                if self.stack.last().is_some_and(|tag| tag.name == "blockquote") {
                    self.spans
                        .push(Span::styled("│ ", Style::default().fg(Color::DarkGray)));
                }
            }
        }
    }

    fn close(&mut self, name: &str) -> Result<(), RenderError> {
        let tag = self
            .stack
            .pop()
            .ok_or_else(|| RenderError::UnexpectedClose(name.to_string()))?;
        if tag.name != name {
            return Err(RenderError::MismatchedTag {
                expected: tag.name,
                found: name.to_string(),
            });
        }

        match name {
            "a" => {
                if let Some(href) = tag.href {
                    self.spans.push(Span::styled(
                        format!(" <{href}>"),
                        Style::default().fg(Color::DarkGray),
                    ));
                }
            }
            "ul" | "ol" => {
                self.flush();
                self.lists.pop();
            }
            "pre" => {
                self.flush();
                self.lines.push(Line::from(Span::styled(
                    "└──────",
                    Style::default().fg(Color::DarkGray),
                )));
            }
            "p" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "blockquote" | "li" => self.flush(),
            _ => {}
        }
        Ok(())
    }

    fn next_marker(&mut self) -> String {
        let depth = self.lists.len().saturating_sub(1);
        let indent = "  ".repeat(depth);
        match self.lists.last_mut() {
            Some((style, next)) => {
                let n = *next;
                *next += 1;
                match style {
                    ListStyle::Bullet => format!("{indent}• "),
                    ListStyle::Decimal => format!("{indent}{n}. "),
                    ListStyle::Roman => format!("{indent}{}. ", to_roman(n)),
                }
            }
            None => "• ".to_string(),
        }
    }

    /// End the current line, keeping an empty one if nothing was on it.
    fn break_line(&mut self) {
        let spans = std::mem::take(&mut self.spans);
        self.lines.push(Line::from(spans));
    }

    fn flush(&mut self) {
        if !self.spans.is_empty() {
            self.break_line();
        }
    }
}

fn tokenize(html: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = html;

    while !rest.is_empty() {
        let Some(start) = rest.find('<') else {
            tokens.push(Token::Text(rest));
            break;
        };
        if start > 0 {
            tokens.push(Token::Text(&rest[..start]));
        }
        let Some(len) = rest[start..].find('>') else {
            tokens.push(Token::Text(&rest[start..]));
            break;
        };
        let inner = &rest[start + 1..start + len];
        rest = &rest[start + len + 1..];

        if let Some(name) = inner.strip_prefix('/') {
            tokens.push(Token::Close(name.trim().to_ascii_lowercase()));
        } else {
            let (name, attrs) = inner.split_once(char::is_whitespace).unwrap_or((inner, ""));
            tokens.push(Token::Open {
                name: name.trim_end_matches('/').to_ascii_lowercase(),
                attrs,
            });
        }
    }

    tokens
}

fn attribute(attrs: &str, key: &str) -> Option<String> {
    ATTRIBUTE
        .captures_iter(attrs)
        .find(|caps| &caps[1] == key)
        .map(|caps| decode_entities(&caps[2]))
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn to_roman(mut n: usize) -> String {
    const NUMERALS: [(usize, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut out = String::new();
    for (value, numeral) in NUMERALS {
        while n >= value {
            out.push_str(numeral);
            n -= value;
        }
    }
    out
}
