// One server-side streaming session per request

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::event::StreamEvent;
use super::framer::NdjsonFramer;
use crate::api::ollama::ByteStream;
use crate::api::{OllamaClient, Provider};

/// Reasons a session ends early. The display text is sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Unsupported provider for streaming: {0}")]
    UnsupportedProvider(String),
    #[error("Ollama not configured")]
    NotConfigured,
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("client disconnected")]
    ClientGone,
}

/// Source of the raw NDJSON token stream.
#[async_trait]
pub trait Upstream: Send + Sync {
    fn is_configured(&self) -> bool;
    async fn open(&self, prompt: &str) -> Result<ByteStream>;
}

#[async_trait]
impl Upstream for OllamaClient {
    fn is_configured(&self) -> bool {
        self.settings().is_configured()
    }

    async fn open(&self, prompt: &str) -> Result<ByteStream> {
        self.generate_bytes(prompt).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub chunks: usize,
    pub errors: usize,
    pub discarded_lines: usize,
    /// Done was produced locally because upstream never sent one.
    pub synthesized_done: bool,
    pub client_gone: bool,
}

/// Owns the line buffer and upstream connection for one request.
///
/// The client always sees `Start`, then any chunks and errors, then exactly
/// one `Done`, whatever happens upstream. Both the buffer and the upstream
/// body are dropped when [`StreamSession::run`] returns.
#[derive(Debug)]
pub struct StreamSession {
    id: Uuid,
    provider: String,
    prompt: String,
    framer: NdjsonFramer,
    summary: SessionSummary,
    done_sent: bool,
    tx: mpsc::Sender<StreamEvent>,
}

impl StreamSession {
    pub fn new(
        provider: impl Into<String>,
        prompt: impl Into<String>,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider: provider.into(),
            prompt: prompt.into(),
            framer: NdjsonFramer::new(),
            summary: SessionSummary::default(),
            done_sent: false,
            tx,
        }
    }

    pub async fn run<U: Upstream + ?Sized>(self, upstream: &U) -> SessionSummary {
        let span = info_span!("stream_session", id = %self.id, provider = %self.provider);
        self.run_inner(upstream).instrument(span).await
    }

    async fn run_inner<U: Upstream + ?Sized>(mut self, upstream: &U) -> SessionSummary {
        info!("session started");
        let result = self.stream(upstream).await;

        match result {
            Ok(()) => {}
            Err(SessionError::ClientGone) => {
                debug!("client went away, dropping upstream");
                self.summary.client_gone = true;
                return self.summary;
            }
            Err(reason) => {
                warn!(%reason, "session ended early");
                if self.emit(StreamEvent::Error(reason.to_string())).await.is_err() {
                    self.summary.client_gone = true;
                    return self.summary;
                }
            }
        }

        if !self.done_sent {
            self.summary.synthesized_done = true;
            if self.emit(StreamEvent::Done).await.is_err() {
                self.summary.client_gone = true;
            }
        }

        self.summary.discarded_lines = self.framer.discarded_lines();
        info!(
            chunks = self.summary.chunks,
            errors = self.summary.errors,
            discarded = self.summary.discarded_lines,
            synthesized_done = self.summary.synthesized_done,
            "session finished"
        );
        self.summary
    }

    async fn stream<U: Upstream + ?Sized>(&mut self, upstream: &U) -> Result<(), SessionError> {
        self.emit(StreamEvent::Start).await?;

        match self.provider.parse::<Provider>() {
            Ok(Provider::Ollama) => {}
            _ => return Err(SessionError::UnsupportedProvider(self.provider.clone())),
        }
        if !upstream.is_configured() {
            return Err(SessionError::NotConfigured);
        }

        let mut body = upstream
            .open(&self.prompt)
            .await
            .map_err(|e| SessionError::Transport(format!("{e:#}")))?;

        loop {
            // A client that leaves while upstream is silent still ends the session
            let next = tokio::select! {
                () = self.tx.closed() => return Err(SessionError::ClientGone),
                next = body.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let bytes = chunk.map_err(|e| SessionError::Transport(format!("{e:#}")))?;
            let events = self.framer.push(&bytes);
            self.emit_all(events).await?;
            if self.framer.is_done() {
                return Ok(());
            }
        }

        let events = self.framer.finish();
        self.emit_all(events).await
    }

    async fn emit_all(&mut self, events: Vec<StreamEvent>) -> Result<(), SessionError> {
        for event in events {
            self.emit(event).await?;
        }
        Ok(())
    }

    async fn emit(&mut self, event: StreamEvent) -> Result<(), SessionError> {
        match &event {
            StreamEvent::Chunk(_) => self.summary.chunks += 1,
            StreamEvent::Error(_) => self.summary.errors += 1,
            StreamEvent::Start | StreamEvent::Done => {}
        }
        let terminal = event.is_terminal();
        self.tx
            .send(event)
            .await
            .map_err(|_| SessionError::ClientGone)?;
        self.done_sent |= terminal;
        Ok(())
    }
}
