// User-facing status and annotation text

pub const ERROR_LABEL: &str = "Error";
pub const RENDER_ERROR: &str = "Error rendering Markdown.";
pub const CONNECTION_LOST: &str = "Connection to the stream was lost";

/// Progress of a request as shown in the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Connecting,
    Started,
    Receiving,
    ErrorOccurred,
    Finished,
    TimedOut,
    Cancelled,
}

impl Status {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Connecting => "Connecting...",
            Self::Started => "Streaming started",
            Self::Receiving => "Receiving response...",
            Self::ErrorOccurred => "An error occurred",
            Self::Finished => "Finished",
            Self::TimedOut => "Timed out waiting for the model",
            Self::Cancelled => "Cancelled",
        }
    }

    pub const fn is_error(self) -> bool {
        matches!(self, Self::ErrorOccurred | Self::TimedOut)
    }

    pub const fn is_final(self) -> bool {
        matches!(self, Self::Finished | Self::TimedOut | Self::Cancelled)
    }
}

/// Text appended to the visible reply when the stream reports an error.
pub fn error_annotation(message: &str) -> String {
    format!("\n[{ERROR_LABEL}] {message}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_annotation() {
        assert_eq!(error_annotation("boom"), "\n[Error] boom");
    }

    #[test]
    fn test_status_flags() {
        assert!(Status::TimedOut.is_error());
        assert!(Status::TimedOut.is_final());
        assert!(!Status::Receiving.is_final());
        assert_eq!(Status::Finished.label(), "Finished");
    }
}
