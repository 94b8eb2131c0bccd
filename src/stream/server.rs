// HTTP front of the streaming proxy

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::{HeaderName, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use super::event::StreamEvent;
use super::session::{StreamSession, Upstream};
use crate::api::{OllamaClient, Provider};
use crate::models::{AppConfig, LessonRequest};

/// Events buffered per session before the session waits on the client.
const SESSION_BUFFER: usize = 32;

static X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<dyn Upstream>,
    pub ollama: Arc<OllamaClient>,
}

impl AppState {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = Arc::new(OllamaClient::new(config.ollama.clone())?);
        Ok(Self {
            upstream: client.clone(),
            ollama: client,
        })
    }
}

/// Query string of `GET /stream`.
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub courseid: i64,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub lesson: String,
    #[serde(default)]
    pub outcomes: String,
}

fn default_provider() -> String {
    Provider::Ollama.as_str().to_string()
}

impl StreamParams {
    pub fn prompt(&self) -> String {
        LessonRequest {
            courseid: self.courseid,
            provider: Provider::default(),
            prompt: self.prompt.trim().to_string(),
            topic: self.topic.clone(),
            lesson: self.lesson.clone(),
            outcomes: self.outcomes.clone(),
        }
        .effective_prompt()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/stream", get(stream_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(bind: &str, config: &AppConfig) -> Result<()> {
    let state = AppState::new(config)?;
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    info!(addr = %listener.local_addr()?, "streaming server listening");

    axum::serve(listener, router(state))
        .await
        .context("Server error")?;

    Ok(())
}

/// One SSE event. Each source line of the payload becomes its own `data:`
/// line, whatever line endings the model used.
pub fn sse_event(event: &StreamEvent) -> Event {
    let payload = event.payload().replace("\r\n", "\n").replace('\r', "\n");
    Event::default().event(event.name()).data(payload)
}

async fn stream_handler(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> impl IntoResponse {
    let prompt = params.prompt();
    debug!(courseid = params.courseid, provider = %params.provider, "stream requested");

    let (tx, rx) = mpsc::channel(SESSION_BUFFER);
    let session = StreamSession::new(params.provider, prompt, tx);
    let upstream = state.upstream.clone();
    tokio::spawn(async move {
        session.run(upstream.as_ref()).await;
    });

    let events = ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(sse_event(&event)));

    ([(X_ACCEL_BUFFERING.clone(), "no")], Sse::new(events))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    ollama: bool,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let ollama = state.ollama.health_check().await.unwrap_or(false);

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            ollama,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::controller::decode_events;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn spawn_proxy(config: &AppConfig) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(AppState::new(config).unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn fetch_events(url: &str) -> (reqwest::header::HeaderMap, Vec<StreamEvent>) {
        let response = reqwest::get(url).await.unwrap();
        let headers = response.headers().clone();
        let events = decode_events(response.bytes_stream()).collect().await;
        (headers, events)
    }

    #[tokio::test]
    async fn test_full_round_trip() {
        let ollama = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "prompt": "Topic: Volcanoes\nLesson: Intro\nOutcomes: Explain eruptions",
                "stream": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "{\"response\":\"## Plan\\n\\n\"}\n{\"response\":\"* Warm-up\"}\n{\"done\":true}\n",
            ))
            .mount(&ollama)
            .await;

        let mut config = AppConfig::default();
        config.ollama.endpoint = ollama.uri();
        let base = spawn_proxy(&config).await;

        let (headers, events) = fetch_events(&format!(
            "{base}/stream?courseid=7&topic=Volcanoes&lesson=Intro&outcomes=Explain%20eruptions"
        ))
        .await;

        assert_eq!(headers["content-type"], "text/event-stream");
        assert_eq!(headers["cache-control"], "no-cache");
        assert_eq!(headers["x-accel-buffering"], "no");
        assert_eq!(
            events,
            vec![
                StreamEvent::Start,
                StreamEvent::Chunk("## Plan\n\n".into()),
                StreamEvent::Chunk("* Warm-up".into()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_unsupported_provider() {
        let base = spawn_proxy(&AppConfig::default()).await;
        let (_, events) = fetch_events(&format!("{base}/stream?courseid=1&provider=openai")).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Start,
                StreamEvent::Error("Unsupported provider for streaming: openai".into()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend_still_finishes() {
        let mut config = AppConfig::default();
        config.ollama.endpoint = "http://127.0.0.1:9".to_string();
        let base = spawn_proxy(&config).await;
        let (_, events) = fetch_events(&format!("{base}/stream?courseid=1&prompt=hi")).await;

        assert_eq!(events.first(), Some(&StreamEvent::Start));
        assert!(matches!(&events[1], StreamEvent::Error(msg) if msg.starts_with("Transport error: ")));
        assert_eq!(events.last(), Some(&StreamEvent::Done));
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_courseid_is_rejected() {
        let base = spawn_proxy(&AppConfig::default()).await;
        let response = reqwest::get(format!("{base}/stream?prompt=hi")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_reports_backend() {
        let mut config = AppConfig::default();
        config.ollama.endpoint = "http://127.0.0.1:9".to_string();
        let base = spawn_proxy(&config).await;
        let body: serde_json::Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["ollama"], false);
    }

    async fn encode(event: StreamEvent) -> String {
        let body = Sse::new(futures::stream::iter([Ok::<_, Infallible>(sse_event(&event))]))
            .into_response()
            .into_body();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_each_payload_line_gets_its_own_data_field() {
        assert_eq!(
            encode(StreamEvent::Chunk("a\r\nb\rc\nd".into())).await,
            "event: chunk\ndata: a\ndata: b\ndata: c\ndata: d\n\n"
        );
        assert_eq!(
            encode(StreamEvent::Start).await,
            "event: start\ndata: Streaming start\n\n"
        );
    }

    #[tokio::test]
    async fn test_multiline_chunk_survives_the_wire() {
        let raw = "event: chunk\ndata: ## Plan\ndata: \ndata: * one\n\n";
        let events: Vec<StreamEvent> =
            decode_events(futures::stream::iter([Ok::<_, Infallible>(raw.as_bytes())]))
                .collect()
                .await;
        assert_eq!(events, vec![StreamEvent::Chunk("## Plan\n\n* one".into())]);
    }

    #[test]
    fn test_prompt_prefers_explicit_value() {
        let params: StreamParams =
            serde_json::from_str(r#"{"courseid":1,"prompt":"  Plan a lesson  "}"#).unwrap();
        assert_eq!(params.provider, "ollama");
        assert_eq!(params.prompt(), "Plan a lesson");
    }
}
