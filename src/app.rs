use crate::api::Provider;
use crate::events::AppEvent;
use crate::models::{ClientSettings, LessonRequest};
use crate::storage::Exporter;
use crate::stream::{Effect, StreamId};
use crate::strings::{Status, RENDER_ERROR};
use crate::view::{RenderView, ViewSwitcher};
use tracing::debug;

#[derive(Debug)]
pub struct App {
    pub should_quit: bool,
    pub input_buffer: String,
    pub scroll_offset: usize,
    pub show_help: bool,
    pub exit_pending: bool,
    pub provider: Provider,
    pub courseid: i64,
    pub status: Option<Status>,
    pub is_streaming: bool,
    /// Request whose output is shown. Output of any other request is stale.
    pub stream_id: Option<StreamId>,
    /// Whether the last reply arrived in full.
    pub complete: bool,
    /// Prompt of the current reply, used to name exports.
    pub prompt: String,
    pub notice: Option<String>,
    pub switcher: ViewSwitcher,
}

impl App {
    pub fn new(settings: &ClientSettings) -> Self {
        Self {
            should_quit: false,
            input_buffer: String::new(),
            scroll_offset: 0,
            show_help: false,
            exit_pending: false,
            provider: settings.provider,
            courseid: settings.courseid,
            status: None,
            is_streaming: false,
            stream_id: None,
            complete: true,
            prompt: String::new(),
            notice: None,
            switcher: ViewSwitcher::new(),
        }
    }

    pub const fn quit(&mut self) {
        self.should_quit = true;
    }

    pub const fn toggle_help(&mut self) {
        self.show_help = !self.show_help;
    }

    pub const fn toggle_provider(&mut self) {
        self.provider = self.provider.toggle();
    }

    pub const fn scroll_up(&mut self, amount: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(amount);
    }

    pub const fn scroll_down(&mut self, amount: usize) {
        self.scroll_offset = self.scroll_offset.saturating_add(amount);
    }

    pub const fn scroll_to_top(&mut self) {
        self.scroll_offset = 0;
    }

    pub const fn scroll_to_bottom(&mut self) {
        // Clamped to the real bottom when rendering
        self.scroll_offset = usize::MAX;
    }

    pub const fn view(&self) -> RenderView {
        self.switcher.view()
    }

    /// Take the typed prompt and reset the response area for a new request.
    pub fn begin_request(&mut self) -> Option<LessonRequest> {
        let prompt = self.input_buffer.trim().to_string();
        if prompt.is_empty() {
            return None;
        }
        self.input_buffer.clear();
        self.switcher.clear();
        self.prompt.clone_from(&prompt);
        self.status = None;
        self.notice = None;
        self.complete = true;
        self.is_streaming = true;
        self.scroll_to_top();
        Some(LessonRequest::new(self.courseid, self.provider, prompt))
    }

    pub const fn track_stream(&mut self, id: StreamId) {
        self.stream_id = Some(id);
    }

    pub fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Stream(id, effect) if self.stream_id == Some(id) => self.apply_effect(effect),
            AppEvent::Stream(id, effect) => {
                debug!(id, ?effect, "ignoring output of a replaced request");
            }
            AppEvent::Notice(text) => self.notice = Some(text),
        }
    }

    pub fn apply_effect(&mut self, effect: Effect) {
        match effect {
            Effect::Status(status) => self.status = Some(status),
            Effect::Appended(text) => {
                self.switcher.append(&text);
            }
            Effect::ScrollToResponse => self.scroll_to_bottom(),
            Effect::Finished { text, complete } => {
                self.complete = complete;
                let outcome = self.switcher.finish(text);
                if outcome.error.is_some() {
                    self.notice = Some(RENDER_ERROR.to_string());
                }
            }
            Effect::Close => self.is_streaming = false,
        }
    }

    pub fn cycle_view(&mut self) {
        let outcome = self.switcher.cycle();
        self.notice = outcome.error.map(|_| RENDER_ERROR.to_string());
        self.scroll_to_top();
    }

    /// Save the selected view. The outcome is reported in the status line.
    pub fn export(&mut self, exporter: &Exporter) {
        if self.switcher.source().is_empty() {
            self.notice = Some("Nothing to export yet".to_string());
            return;
        }
        let content = self.switcher.target().export_text();
        self.notice = Some(match exporter.export(&self.prompt, self.view(), &content) {
            Ok(path) => format!("Saved {}", path.display()),
            Err(e) => format!("Export failed: {e:#}"),
        });
    }
}
