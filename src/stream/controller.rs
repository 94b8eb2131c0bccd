// Client side of the stream: state machine, watchdog, connection lifetime

use anyhow::{Context, Result};
use eventsource_stream::Eventsource;
use futures::future;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::event::StreamEvent;
use crate::api::Completion;
use crate::markdown::autofix;
use crate::models::{ClientSettings, LessonRequest};
use crate::strings::{self, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    Connecting,
    Streaming,
    Errored,
    Done,
    TimedOut,
    Cancelled,
}

impl StreamPhase {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::TimedOut | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerInput {
    Open,
    Event(StreamEvent),
    Tick,
    Cancel,
}

/// What the view layer should do in response to a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Status(Status),
    /// Text appended to the visible, still unrendered reply.
    Appended(String),
    ScrollToResponse,
    /// The reply is final. `complete` is false when it was cut short.
    Finished { text: String, complete: bool },
    /// The connection and the watchdog are released.
    Close,
}

/// Everything one stream knows about itself.
#[derive(Debug, Clone)]
pub struct ClientStreamState {
    phase: StreamPhase,
    accumulated: String,
    last_activity: Instant,
    inactivity_timeout: Duration,
    seen_chunk: bool,
}

impl ClientStreamState {
    pub fn new(inactivity_timeout: Duration) -> Self {
        Self {
            phase: StreamPhase::Idle,
            accumulated: String::new(),
            last_activity: Instant::now(),
            inactivity_timeout,
            seen_chunk: false,
        }
    }

    pub const fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    pub const fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// The single transition function. Terminal states swallow all input.
    pub fn transition(&mut self, input: ControllerInput, now: Instant) -> Vec<Effect> {
        if self.phase.is_terminal() {
            return Vec::new();
        }

        match input {
            ControllerInput::Open => {
                if self.phase != StreamPhase::Idle {
                    return Vec::new();
                }
                self.phase = StreamPhase::Connecting;
                self.last_activity = now;
                vec![Effect::Status(Status::Connecting)]
            }
            ControllerInput::Event(_) | ControllerInput::Tick
                if self.phase == StreamPhase::Idle =>
            {
                Vec::new()
            }
            ControllerInput::Event(event) => self.on_event(event, now),
            ControllerInput::Tick => self.on_tick(now),
            ControllerInput::Cancel => {
                self.phase = StreamPhase::Cancelled;
                vec![
                    Effect::Status(Status::Cancelled),
                    Effect::Finished {
                        text: self.accumulated.clone(),
                        complete: false,
                    },
                    Effect::Close,
                ]
            }
        }
    }

    fn on_event(&mut self, event: StreamEvent, now: Instant) -> Vec<Effect> {
        match event {
            StreamEvent::Start => {
                if self.phase == StreamPhase::Connecting {
                    self.phase = StreamPhase::Streaming;
                }
                vec![Effect::Status(Status::Started)]
            }
            StreamEvent::Chunk(text) => {
                self.accumulated.push_str(&text);
                self.last_activity = now;
                let mut effects = Vec::new();
                if self.phase != StreamPhase::Streaming || !self.seen_chunk {
                    effects.push(Effect::Status(Status::Receiving));
                }
                self.phase = StreamPhase::Streaming;
                effects.push(Effect::Appended(text));
                if !self.seen_chunk {
                    self.seen_chunk = true;
                    effects.push(Effect::ScrollToResponse);
                }
                effects
            }
            StreamEvent::Error(message) => {
                let annotation = strings::error_annotation(&message);
                self.accumulated.push_str(&annotation);
                self.phase = StreamPhase::Errored;
                vec![
                    Effect::Status(Status::ErrorOccurred),
                    Effect::Appended(annotation),
                    Effect::ScrollToResponse,
                ]
            }
            StreamEvent::Done => {
                self.phase = StreamPhase::Done;
                let text = autofix(&self.accumulated);
                self.accumulated.clone_from(&text);
                vec![
                    Effect::Status(Status::Finished),
                    Effect::Finished {
                        text,
                        complete: true,
                    },
                    Effect::ScrollToResponse,
                    Effect::Close,
                ]
            }
        }
    }

    fn on_tick(&mut self, now: Instant) -> Vec<Effect> {
        if now.saturating_duration_since(self.last_activity) < self.inactivity_timeout {
            return Vec::new();
        }
        self.phase = StreamPhase::TimedOut;
        vec![
            Effect::Status(Status::TimedOut),
            Effect::Finished {
                text: self.accumulated.clone(),
                complete: false,
            },
            Effect::ScrollToResponse,
            Effect::Close,
        ]
    }
}

/// Run one stream to a terminal state.
///
/// The event stream, the watchdog ticker and the cancel signal are all
/// dropped when this returns, which is the only place they are released.
/// A stream that ends without `Done` is reported as lost and then finished.
pub async fn drive<S, F>(
    events: S,
    mut cancel: oneshot::Receiver<()>,
    settings: &ClientSettings,
    mut on_effect: F,
) -> ClientStreamState
where
    S: Stream<Item = StreamEvent> + Unpin,
    F: FnMut(Effect),
{
    let mut state = ClientStreamState::new(settings.inactivity_timeout());
    let mut events = events;
    let period = settings.watchdog_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut pending: VecDeque<ControllerInput> = VecDeque::from([ControllerInput::Open]);

    loop {
        while let Some(input) = pending.pop_front() {
            for effect in state.transition(input, Instant::now()) {
                on_effect(effect);
            }
        }
        if state.phase().is_terminal() {
            break;
        }

        tokio::select! {
            _ = &mut cancel => pending.push_back(ControllerInput::Cancel),
            next = events.next() => match next {
                Some(event) => pending.push_back(ControllerInput::Event(event)),
                None => {
                    debug!("event stream ended without done");
                    pending.push_back(ControllerInput::Event(StreamEvent::Error(
                        strings::CONNECTION_LOST.to_string(),
                    )));
                    pending.push_back(ControllerInput::Event(StreamEvent::Done));
                }
            },
            _ = ticker.tick() => pending.push_back(ControllerInput::Tick),
        }
    }

    info!(
        phase = ?state.phase(),
        chars = state.accumulated().len(),
        idle = ?Instant::now().saturating_duration_since(state.last_activity()),
        "stream closed"
    );
    state
}

/// Decode an SSE byte stream into stream events.
///
/// Unknown event names are skipped. A read or parse failure ends the stream,
/// which the driver reports as a lost connection.
pub fn decode_events<S, B, E>(bytes: S) -> BoxStream<'static, StreamEvent>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Debug + Send + 'static,
{
    bytes
        .eventsource()
        .take_while(|item| {
            if let Err(e) = item {
                warn!(error = ?e, "stream read failed");
            }
            future::ready(item.is_ok())
        })
        .filter_map(|item| {
            future::ready(
                item.ok()
                    .and_then(|event| StreamEvent::from_sse(&event.event, event.data)),
            )
        })
        .boxed()
}

/// Open the SSE endpoint and decode it into stream events.
pub async fn open_event_stream(
    http: &reqwest::Client,
    url: &str,
    request: &LessonRequest,
) -> Result<BoxStream<'static, StreamEvent>> {
    let response = http
        .get(url)
        .query(&[
            ("courseid", request.courseid.to_string()),
            ("provider", request.provider.as_str().to_string()),
            ("prompt", request.effective_prompt()),
        ])
        .send()
        .await
        .context("Failed to connect to stream")?
        .error_for_status()
        .context("Stream endpoint refused the request")?;

    Ok(decode_events(response.bytes_stream()))
}

/// A running request. Closing it more than once is a no-op.
#[derive(Debug)]
pub struct StreamHandle {
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    /// Returns whether this call did the closing.
    pub fn close(&mut self) -> bool {
        match self.cancel.take() {
            Some(cancel) => {
                // The task may already have finished on its own
                let _ = cancel.send(());
                true
            }
            None => false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.cancel.is_none() || self.task.is_finished()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Identifies one started request. Effects are tagged with it so that late
/// output of a replaced request can be told apart from the current one.
pub type StreamId = u64;

pub type EffectSink = Arc<dyn Fn(StreamId, Effect) + Send + Sync>;

/// Starts requests and keeps at most one of them alive.
pub struct StreamController {
    settings: ClientSettings,
    http: reqwest::Client,
    completion: Arc<dyn Completion>,
    sink: EffectSink,
    active: Option<StreamHandle>,
    last_id: StreamId,
}

impl StreamController {
    pub fn new(
        settings: ClientSettings,
        completion: Arc<dyn Completion>,
        sink: EffectSink,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            settings,
            http,
            completion,
            sink,
            active: None,
            last_id: 0,
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Close the running request, if any.
    pub fn stop(&mut self) -> bool {
        self.active.take().is_some_and(|mut handle| handle.close())
    }

    /// Start a request, closing the previous one first.
    pub fn start(&mut self, request: LessonRequest) -> StreamId {
        if self.stop() {
            debug!("closed previous stream before starting a new one");
        }

        self.last_id += 1;
        let id = self.last_id;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = match self.settings.stream_url.clone() {
            Some(url) if request.provider.supports_streaming() => {
                self.spawn_stream(id, url, request, cancel_rx)
            }
            _ => self.spawn_fallback(id, request, cancel_rx),
        };

        self.active = Some(StreamHandle {
            cancel: Some(cancel_tx),
            task,
        });
        id
    }

    fn spawn_stream(
        &self,
        id: StreamId,
        url: String,
        request: LessonRequest,
        cancel: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        let http = self.http.clone();
        let settings = self.settings.clone();
        let sink = self.sink.clone();

        tokio::spawn(async move {
            info!(id, %url, provider = %request.provider, "opening stream");
            let events = futures::stream::once(async move {
                match open_event_stream(&http, &url, &request).await {
                    Ok(events) => events,
                    Err(e) => {
                        warn!(error = %e, "could not open stream");
                        futures::stream::iter(vec![
                            StreamEvent::Error(format!("Transport error: {e:#}")),
                            StreamEvent::Done,
                        ])
                        .boxed()
                    }
                }
            })
            .flatten()
            .boxed();

            drive(events, cancel, &settings, |effect| sink(id, effect)).await;
        })
    }

    fn spawn_fallback(
        &self,
        id: StreamId,
        request: LessonRequest,
        cancel: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        let completion = self.completion.clone();
        let sink = self.sink.clone();

        tokio::spawn(async move {
            info!(id, provider = %request.provider, "sending blocking request");
            sink(id, Effect::Status(Status::Connecting));
            let prompt = request.effective_prompt();
            tokio::select! {
                _ = cancel => {
                    sink(id, Effect::Status(Status::Cancelled));
                }
                text = completion.send(request.provider, &prompt) => {
                    sink(id, Effect::Finished { text, complete: true });
                    sink(id, Effect::Status(Status::Finished));
                }
            }
            sink(id, Effect::Close);
        })
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{MockCompletion, Provider};
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    fn settings() -> ClientSettings {
        ClientSettings::default()
    }

    fn at(base: Instant, secs: u64) -> Instant {
        base + Duration::from_secs(secs)
    }

    fn open_state(base: Instant) -> ClientStreamState {
        let mut state = ClientStreamState::new(Duration::from_secs(30));
        state.transition(ControllerInput::Open, base);
        state.transition(ControllerInput::Event(StreamEvent::Start), base);
        state
    }

    #[test]
    fn test_open_moves_to_connecting() {
        let now = Instant::now();
        let mut state = ClientStreamState::new(Duration::from_secs(30));
        assert_eq!(
            state.transition(ControllerInput::Open, now),
            vec![Effect::Status(Status::Connecting)]
        );
        assert_eq!(state.phase(), StreamPhase::Connecting);
        assert!(state.transition(ControllerInput::Open, now).is_empty());
    }

    #[test]
    fn test_events_before_open_are_ignored() {
        let now = Instant::now();
        let mut state = ClientStreamState::new(Duration::from_secs(30));
        assert!(state
            .transition(ControllerInput::Event(StreamEvent::Chunk("x".into())), now)
            .is_empty());
        assert_eq!(state.phase(), StreamPhase::Idle);
    }

    #[test]
    fn test_first_chunk_scrolls_once() {
        let base = Instant::now();
        let mut state = open_state(base);
        assert_eq!(state.phase(), StreamPhase::Streaming);

        let first = state.transition(ControllerInput::Event(StreamEvent::Chunk("a".into())), base);
        assert!(first.contains(&Effect::ScrollToResponse));
        let second = state.transition(ControllerInput::Event(StreamEvent::Chunk("b".into())), base);
        assert_eq!(second, vec![Effect::Appended("b".into())]);
        assert_eq!(state.accumulated(), "ab");
    }

    #[test]
    fn test_error_annotates_and_keeps_listening() {
        let base = Instant::now();
        let mut state = open_state(base);
        state.transition(ControllerInput::Event(StreamEvent::Chunk("Plan".into())), base);
        let effects =
            state.transition(ControllerInput::Event(StreamEvent::Error("overloaded".into())), base);
        assert!(effects.contains(&Effect::Appended("\n[Error] overloaded".into())));
        assert_eq!(state.phase(), StreamPhase::Errored);

        state.transition(ControllerInput::Event(StreamEvent::Chunk(" more".into())), base);
        assert_eq!(state.phase(), StreamPhase::Streaming);
        assert_eq!(state.accumulated(), "Plan\n[Error] overloaded more");
    }

    #[test]
    fn test_done_finalizes_with_autofix() {
        let base = Instant::now();
        let mut state = open_state(base);
        state.transition(
            ControllerInput::Event(StreamEvent::Chunk("Paris is nice.2. Berlin is cold.".into())),
            base,
        );
        let effects = state.transition(ControllerInput::Event(StreamEvent::Done), base);
        assert!(effects.contains(&Effect::Finished {
            text: "Paris is nice.\n2. Berlin is cold.".into(),
            complete: true,
        }));
        assert_eq!(effects.last(), Some(&Effect::Close));
        assert_eq!(state.phase(), StreamPhase::Done);
    }

    #[test]
    fn test_terminal_state_swallows_input() {
        let base = Instant::now();
        let mut state = open_state(base);
        state.transition(ControllerInput::Event(StreamEvent::Done), base);
        assert!(state
            .transition(ControllerInput::Event(StreamEvent::Chunk("late".into())), base)
            .is_empty());
        assert!(state.transition(ControllerInput::Tick, at(base, 100)).is_empty());
        assert!(state.transition(ControllerInput::Cancel, base).is_empty());
    }

    #[test]
    fn test_watchdog_threshold() {
        let base = Instant::now();
        let mut state = open_state(base);
        state.transition(ControllerInput::Event(StreamEvent::Chunk("a".into())), base);

        assert!(state.transition(ControllerInput::Tick, at(base, 29)).is_empty());
        assert_eq!(state.phase(), StreamPhase::Streaming);

        let effects = state.transition(ControllerInput::Tick, at(base, 30));
        assert_eq!(state.phase(), StreamPhase::TimedOut);
        assert!(effects.contains(&Effect::Finished {
            text: "a".into(),
            complete: false,
        }));
    }

    #[test]
    fn test_watchdog_runs_while_errored() {
        let base = Instant::now();
        let mut state = open_state(base);
        state.transition(ControllerInput::Event(StreamEvent::Error("x".into())), at(base, 10));
        state.transition(ControllerInput::Tick, at(base, 31));
        assert_eq!(state.phase(), StreamPhase::TimedOut);
    }

    #[test]
    fn test_cancel() {
        let base = Instant::now();
        let mut state = open_state(base);
        let effects = state.transition(ControllerInput::Cancel, base);
        assert_eq!(state.phase(), StreamPhase::Cancelled);
        assert_eq!(effects.first(), Some(&Effect::Status(Status::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_times_out_after_inactivity() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        tx.send(StreamEvent::Start).unwrap();
        tx.send(StreamEvent::Chunk("partial".into())).unwrap();

        let started = Instant::now();
        let mut finished_at = None;
        let mut effects = Vec::new();
        let state = drive(UnboundedReceiverStream::new(rx), cancel_rx, &settings(), |effect| {
            if matches!(effect, Effect::Finished { .. }) {
                finished_at = Some(Instant::now());
            }
            effects.push(effect);
        })
        .await;

        assert_eq!(state.phase(), StreamPhase::TimedOut);
        let elapsed = finished_at.unwrap() - started;
        assert!(elapsed >= Duration::from_secs(30), "timed out after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(33), "timed out after {elapsed:?}");
        assert!(effects.contains(&Effect::Finished {
            text: "partial".into(),
            complete: false,
        }));
        assert_eq!(effects.iter().filter(|e| **e == Effect::Close).count(), 1);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_chunk_refreshes_watchdog() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        tx.send(StreamEvent::Start).unwrap();
        tx.send(StreamEvent::Chunk("a".into())).unwrap();
        let late = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(20)).await;
            late.send(StreamEvent::Chunk("b".into())).unwrap();
        });

        let started = Instant::now();
        let state = drive(UnboundedReceiverStream::new(rx), cancel_rx, &settings(), |_| {}).await;

        assert_eq!(state.phase(), StreamPhase::TimedOut);
        assert!(Instant::now() - started >= Duration::from_secs(50));
        assert!(state.last_activity() - started >= Duration::from_secs(20));
        assert_eq!(state.accumulated(), "ab");
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_completes_on_done() {
        let events = futures::stream::iter(vec![
            StreamEvent::Start,
            StreamEvent::Chunk("## Plan".into()),
            StreamEvent::Done,
        ]);
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        let mut effects = Vec::new();
        let state = drive(events, cancel_rx, &settings(), |e| effects.push(e)).await;

        assert_eq!(state.phase(), StreamPhase::Done);
        assert_eq!(
            effects.first(),
            Some(&Effect::Status(Status::Connecting))
        );
        assert_eq!(effects.last(), Some(&Effect::Close));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_reports_lost_connection() {
        let events = futures::stream::iter(vec![StreamEvent::Start, StreamEvent::Chunk("a".into())]);
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        let mut effects = Vec::new();
        let state = drive(events, cancel_rx, &settings(), |e| effects.push(e)).await;

        assert_eq!(state.phase(), StreamPhase::Done);
        let expected = format!("a\n[Error] {}", strings::CONNECTION_LOST);
        assert!(effects.contains(&Effect::Finished {
            text: expected,
            complete: true,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_waits_for_events() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        let settings = settings();
        let mut task = tokio_test::task::spawn(drive(
            UnboundedReceiverStream::new(rx),
            cancel_rx,
            &settings,
            |_| {},
        ));

        tokio_test::assert_pending!(task.poll());
        tx.send(StreamEvent::Start).unwrap();
        tx.send(StreamEvent::Done).unwrap();
        assert!(task.is_woken());

        let state = tokio_test::assert_ready!(task.poll());
        assert_eq!(state.phase(), StreamPhase::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_cancel() {
        let (tx, rx) = mpsc::unbounded_channel::<StreamEvent>();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        cancel_tx.send(()).unwrap();
        let state = drive(UnboundedReceiverStream::new(rx), cancel_rx, &settings(), |_| {}).await;
        assert_eq!(state.phase(), StreamPhase::Cancelled);
        drop(tx);
    }

    #[tokio::test]
    async fn test_handle_close_is_idempotent() {
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _ = cancel_rx.await;
        });
        let mut handle = StreamHandle {
            cancel: Some(cancel_tx),
            task,
        };
        assert!(handle.close());
        assert!(!handle.close());
        assert!(handle.is_finished());
    }

    type Collected = Arc<Mutex<Vec<(StreamId, Effect)>>>;

    fn collecting_sink() -> (EffectSink, Collected) {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let store = collected.clone();
        let sink: EffectSink = Arc::new(move |id, effect| store.lock().unwrap().push((id, effect)));
        (sink, collected)
    }

    fn effects_of(collected: &Collected, id: StreamId) -> Vec<Effect> {
        collected
            .lock()
            .unwrap()
            .iter()
            .filter(|(from, _)| *from == id)
            .map(|(_, effect)| effect.clone())
            .collect()
    }

    async fn wait_until(collected: &Collected, done: impl Fn(&[(StreamId, Effect)]) -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !done(&collected.lock().unwrap()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn wait_for_closes(collected: &Collected, count: usize) {
        wait_until(collected, |effects| {
            effects.iter().filter(|(_, e)| *e == Effect::Close).count() >= count
        })
        .await;
    }

    #[tokio::test]
    async fn test_fallback_for_non_streaming_provider() {
        let mut mock = MockCompletion::new();
        mock.expect_send()
            .times(1)
            .returning(|_, _| "# Reply".to_string());
        let (sink, collected) = collecting_sink();

        let mut controller = StreamController::new(settings(), Arc::new(mock), sink).unwrap();
        let id = controller.start(LessonRequest::new(1, Provider::OpenAi, "plan"));
        wait_for_closes(&collected, 1).await;

        assert_eq!(
            effects_of(&collected, id),
            vec![
                Effect::Status(Status::Connecting),
                Effect::Finished {
                    text: "# Reply".into(),
                    complete: true,
                },
                Effect::Status(Status::Finished),
                Effect::Close,
            ]
        );
    }

    #[tokio::test]
    async fn test_fallback_without_stream_url() {
        let mut mock = MockCompletion::new();
        mock.expect_send()
            .withf(|provider, _| *provider == Provider::Ollama)
            .times(1)
            .returning(|_, _| "local".to_string());
        let (sink, collected) = collecting_sink();
        let client = ClientSettings {
            stream_url: None,
            ..settings()
        };

        let mut controller = StreamController::new(client, Arc::new(mock), sink).unwrap();
        let id = controller.start(LessonRequest::new(1, Provider::Ollama, "plan"));
        wait_for_closes(&collected, 1).await;
        assert!(effects_of(&collected, id).contains(&Effect::Finished {
            text: "local".into(),
            complete: true,
        }));
    }

    struct Pending;

    #[async_trait::async_trait]
    impl Completion for Pending {
        async fn send(&self, _provider: Provider, prompt: &str) -> String {
            if prompt == "slow" {
                std::future::pending::<()>().await;
            }
            format!("reply to {prompt}")
        }
    }

    #[tokio::test]
    async fn test_starting_again_closes_previous_request() {
        let (sink, collected) = collecting_sink();
        let mut controller = StreamController::new(settings(), Arc::new(Pending), sink).unwrap();

        let slow = controller.start(LessonRequest::new(1, Provider::OpenAi, "slow"));
        assert!(controller.is_active());
        let fast = controller.start(LessonRequest::new(1, Provider::OpenAi, "fast"));
        assert_ne!(slow, fast);
        wait_for_closes(&collected, 2).await;

        let old = effects_of(&collected, slow);
        assert!(old.contains(&Effect::Status(Status::Cancelled)));
        assert!(!old.iter().any(|e| matches!(e, Effect::Finished { .. })));
        assert!(effects_of(&collected, fast).contains(&Effect::Finished {
            text: "reply to fast".into(),
            complete: true,
        }));

        assert!(controller.stop());
        assert!(!controller.stop());
        assert!(!controller.is_active());
    }

    async fn spawn_app(app: axum::Router) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    /// Answers every prompt with its upper-cased text. The prompt "old" is
    /// never finished and its connection stays open.
    async fn spawn_echo_stream() -> String {
        use crate::stream::server::sse_event;
        use axum::extract::Query;
        use axum::response::sse::{Event, Sse};
        use std::collections::HashMap;
        use std::convert::Infallible;

        async fn echo(
            Query(params): Query<HashMap<String, String>>,
        ) -> Sse<BoxStream<'static, Result<Event, Infallible>>> {
            let prompt = params.get("prompt").cloned().unwrap_or_default();
            let head = futures::stream::iter([
                Ok(sse_event(&StreamEvent::Start)),
                Ok(sse_event(&StreamEvent::Chunk(prompt.to_uppercase()))),
            ]);
            let events = if prompt == "old" {
                head.chain(futures::stream::pending()).boxed()
            } else {
                head.chain(futures::stream::iter([Ok(sse_event(&StreamEvent::Done))]))
                    .boxed()
            };
            Sse::new(events)
        }

        let addr = spawn_app(axum::Router::new().route("/stream", axum::routing::get(echo))).await;
        format!("http://{addr}/stream")
    }

    #[tokio::test]
    async fn test_replaced_stream_does_not_leak_into_next_reply() {
        use crate::app::App;
        use crate::events::AppEvent;

        let (sink, collected) = collecting_sink();
        let client = ClientSettings {
            stream_url: Some(spawn_echo_stream().await),
            ..settings()
        };
        let mut controller =
            StreamController::new(client.clone(), Arc::new(MockCompletion::new()), sink).unwrap();
        let mut app = App::new(&client);

        app.input_buffer = "old".to_string();
        let old = controller.start(app.begin_request().unwrap());
        app.track_stream(old);
        wait_until(&collected, |effects| {
            effects.contains(&(old, Effect::Appended("OLD".into())))
        })
        .await;

        app.input_buffer = "new".to_string();
        let new = controller.start(app.begin_request().unwrap());
        app.track_stream(new);
        wait_for_closes(&collected, 2).await;

        assert!(effects_of(&collected, old).contains(&Effect::Finished {
            text: "OLD".into(),
            complete: false,
        }));
        for (id, effect) in collected.lock().unwrap().drain(..) {
            app.handle_event(AppEvent::Stream(id, effect));
        }

        assert_eq!(app.switcher.source(), "NEW");
        assert_eq!(app.status, Some(Status::Finished));
        assert!(app.complete);
        assert!(!app.is_streaming);
    }

    #[tokio::test]
    async fn test_stream_through_proxy() {
        use crate::models::AppConfig;
        use crate::stream::server::{router, AppState};
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let ollama = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "{\"response\":\"Intro.\"}\n{\"response\":\"1. Warm-up\"}\n{\"done\":true}\n",
            ))
            .mount(&ollama)
            .await;

        let mut config = AppConfig::default();
        config.ollama.endpoint = ollama.uri();
        let addr = spawn_app(router(AppState::new(&config).unwrap())).await;

        let (sink, collected) = collecting_sink();
        let client = ClientSettings {
            stream_url: Some(format!("http://{addr}/stream")),
            ..settings()
        };
        let mut controller =
            StreamController::new(client, Arc::new(MockCompletion::new()), sink).unwrap();
        let id = controller.start(LessonRequest::new(1, Provider::Ollama, "plan"));
        wait_for_closes(&collected, 1).await;

        let effects = effects_of(&collected, id);
        assert!(effects.contains(&Effect::Status(Status::Started)));
        assert!(effects.contains(&Effect::Finished {
            text: "Intro.\n1. Warm-up".into(),
            complete: true,
        }));
    }

    #[tokio::test]
    async fn test_unreachable_stream_endpoint_finishes() {
        let (sink, collected) = collecting_sink();
        let client = ClientSettings {
            stream_url: Some("http://127.0.0.1:9/stream".to_string()),
            ..settings()
        };
        let mut controller =
            StreamController::new(client, Arc::new(MockCompletion::new()), sink).unwrap();
        let id = controller.start(LessonRequest::new(1, Provider::Ollama, "plan"));
        wait_for_closes(&collected, 1).await;

        assert!(effects_of(&collected, id).iter().any(|e| matches!(
            e,
            Effect::Appended(text) if text.starts_with("\n[Error] Transport error: ")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_with_zero_watchdog_interval_still_times_out() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        tx.send(StreamEvent::Start).unwrap();
        let client = ClientSettings {
            watchdog_interval_secs: 0,
            inactivity_timeout_secs: 0,
            ..settings()
        };

        let mut closes = 0;
        let state = drive(UnboundedReceiverStream::new(rx), cancel_rx, &client, |effect| {
            if effect == Effect::Close {
                closes += 1;
            }
        })
        .await;

        assert_eq!(state.phase(), StreamPhase::TimedOut);
        assert_eq!(closes, 1);
        drop(tx);
    }
}
