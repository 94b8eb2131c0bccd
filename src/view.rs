// Selecting and rendering one of the four output views

use ratatui::{
    style::{Color, Style},
    text::{Line, Span},
};
use tracing::{debug, warn};

use crate::markdown::{render_html, render_text};
use crate::strings::RENDER_ERROR;
use crate::ui::markdown::{html_to_lines, RenderError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RenderView {
    Raw,
    Text,
    Html,
    #[default]
    Rich,
}

impl RenderView {
    pub const ALL: [Self; 4] = [Self::Raw, Self::Text, Self::Html, Self::Rich];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Raw => "Raw",
            Self::Text => "Text",
            Self::Html => "HTML",
            Self::Rich => "Rich",
        }
    }

    pub const fn next(self) -> Self {
        match self {
            Self::Raw => Self::Text,
            Self::Text => Self::Html,
            Self::Html => Self::Rich,
            Self::Rich => Self::Raw,
        }
    }

    /// File extension used when the view's content is exported.
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Raw => "md",
            Self::Text => "txt",
            Self::Html | Self::Rich => "html",
        }
    }
}

/// The four output sinks plus the selected view.
#[derive(Debug, Clone, Default)]
pub struct RenderTarget {
    pub raw: String,
    pub text: String,
    pub html: String,
    pub rich: Vec<Line<'static>>,
    view: RenderView,
}

impl RenderTarget {
    pub const fn view(&self) -> RenderView {
        self.view
    }

    /// Content of the selected view as it would be saved or copied.
    ///
    /// The text view is split into paragraphs separated by one blank line.
    /// The rich view exports its HTML source.
    pub fn export_text(&self) -> String {
        match self.view {
            RenderView::Raw => self.raw.clone(),
            RenderView::Text => self
                .text
                .split("\n\n")
                .map(str::trim)
                .filter(|paragraph| !paragraph.is_empty())
                .collect::<Vec<_>>()
                .join("\n\n"),
            RenderView::Html | RenderView::Rich => self.html.clone(),
        }
    }

    /// Lines to display for the selected view.
    pub fn display_lines(&self) -> Vec<Line<'static>> {
        match self.view {
            RenderView::Rich => self.rich.clone(),
            RenderView::Raw => plain_lines(&self.raw),
            RenderView::Text => plain_lines(&self.text),
            RenderView::Html => plain_lines(&self.html),
        }
    }
}

fn plain_lines(text: &str) -> Vec<Line<'static>> {
    text.lines().map(|line| Line::from(line.to_string())).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutcome {
    pub view: RenderView,
    /// Set when the rich view could not be built and shows the fallback line.
    pub error: Option<RenderError>,
}

/// Keeps the reply text and renders it into whichever view is selected.
#[derive(Debug, Default)]
pub struct ViewSwitcher {
    source: String,
    target: RenderTarget,
    render_errors: usize,
}

impl ViewSwitcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub const fn target(&self) -> &RenderTarget {
        &self.target
    }

    pub const fn view(&self) -> RenderView {
        self.target.view()
    }

    pub const fn render_errors(&self) -> usize {
        self.render_errors
    }

    pub fn clear(&mut self) {
        self.source.clear();
        self.target = RenderTarget {
            view: self.target.view,
            ..RenderTarget::default()
        };
    }

    /// Append streamed text and refresh the selected view.
    pub fn append(&mut self, chunk: &str) -> RenderOutcome {
        self.source.push_str(chunk);
        self.render()
    }

    /// Replace the text with a final reply and show it rendered.
    pub fn finish(&mut self, text: String) -> RenderOutcome {
        self.source = text;
        self.set_view(RenderView::Rich)
    }

    pub fn set_view(&mut self, view: RenderView) -> RenderOutcome {
        debug!(view = view.label(), "switching view");
        self.target.view = view;
        self.render()
    }

    pub fn cycle(&mut self) -> RenderOutcome {
        self.set_view(self.target.view.next())
    }

    /// Render only the selected view. A rich-view failure is contained here.
    fn render(&mut self) -> RenderOutcome {
        let view = self.target.view;
        let mut error = None;
        match view {
            RenderView::Raw => self.target.raw.clone_from(&self.source),
            RenderView::Text => self.target.text = render_text(&self.source),
            RenderView::Html => self.target.html = render_html(&self.source),
            RenderView::Rich => {
                self.target.html = render_html(&self.source);
                match html_to_lines(&self.target.html) {
                    Ok(lines) => self.target.rich = lines,
                    Err(e) => {
                        warn!(error = %e, "rich rendering failed");
                        self.render_errors += 1;
                        self.target.rich = vec![Line::from(Span::styled(
                            RENDER_ERROR,
                            Style::default().fg(Color::Red),
                        ))];
                        error = Some(e);
                    }
                }
            }
        }
        RenderOutcome { view, error }
    }
}
