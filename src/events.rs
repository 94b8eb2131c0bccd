// Event types for async communication

use crate::stream::{Effect, StreamId};

#[derive(Debug, Clone)]
pub enum AppEvent {
    /// Output of a request, tagged with the request it belongs to
    Stream(StreamId, Effect),
    /// One-off message for the status line
    Notice(String),
}
