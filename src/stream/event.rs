// Semantic events carried over the SSE channel

pub const START_PAYLOAD: &str = "Streaming start";
pub const DONE_PAYLOAD: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Start,
    Chunk(String),
    Error(String),
    Done,
}

impl StreamEvent {
    /// The SSE `event:` name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Chunk(_) => "chunk",
            Self::Error(_) => "error",
            Self::Done => "done",
        }
    }

    /// The SSE `data:` payload, possibly spanning several lines.
    pub fn payload(&self) -> &str {
        match self {
            Self::Start => START_PAYLOAD,
            Self::Chunk(text) | Self::Error(text) => text,
            Self::Done => DONE_PAYLOAD,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Rebuild an event from a decoded SSE message. Unknown names yield `None`.
    pub fn from_sse(name: &str, data: String) -> Option<Self> {
        match name {
            "start" => Some(Self::Start),
            "chunk" => Some(Self::Chunk(data)),
            "error" => Some(Self::Error(data)),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}
