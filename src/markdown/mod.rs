pub mod autofix;
pub mod block;
pub mod inline;
pub mod text;

pub use autofix::autofix;
pub use text::render_text;

/// Escape the two characters that could open markup in rendered output.
pub fn escape_html(text: &str) -> String {
    text.replace('<', "&lt;").replace('>', "&gt;")
}

/// Render a raw model reply to HTML: repair first, then parse.
pub fn render_html(markdown: &str) -> String {
    block::parse_blocks(&autofix(markdown))
}
