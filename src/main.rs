mod api;
mod app;
mod config;
mod events;
mod markdown;
mod models;
mod storage;
mod stream;
mod strings;
mod ui;
mod view;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::Backend, prelude::*};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use api::{Provider, ProviderClient};
use app::App;
use events::AppEvent;
use models::AppConfig;
use storage::Exporter;
use stream::controller::EffectSink;
use stream::StreamController;

#[derive(Parser, Debug)]
#[command(name = "lessonstream", version, about)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, env = "LESSONSTREAM_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the SSE proxy in front of the local model
    Serve {
        /// Address to listen on
        #[arg(short, long, env = "LESSONSTREAM_BIND")]
        bind: Option<String>,
    },
    /// Open the terminal client
    Chat {
        /// SSE endpoint of a running proxy
        #[arg(long, env = "LESSONSTREAM_STREAM_URL")]
        stream_url: Option<String>,
        /// Always send one blocking request instead of streaming
        #[arg(long)]
        no_stream: bool,
        #[arg(short, long)]
        provider: Option<Provider>,
        #[arg(long)]
        courseid: Option<i64>,
    },
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lessonstream=info,tower_http=info"))
}

fn init_stderr_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(io::stderr)
        .init();
}

/// The TUI owns the terminal, so logs go to a file.
fn init_file_logging(path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => config::get_config_path()?,
    };
    let mut config = config::load_config_from(&config_path)?;

    match cli.command.unwrap_or(Command::Chat {
        stream_url: None,
        no_stream: false,
        provider: None,
        courseid: None,
    }) {
        Command::Serve { bind } => {
            init_stderr_logging();
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            stream::server::serve(&bind, &config).await
        }
        Command::Chat {
            stream_url,
            no_stream,
            provider,
            courseid,
        } => {
            init_file_logging(&config::get_log_path(&config_path)?)?;

            if stream_url.is_some() {
                config.client.stream_url = stream_url;
            }
            if no_stream {
                config.client.stream_url = None;
            }
            if let Some(provider) = provider {
                config.client.provider = provider;
            }
            if let Some(courseid) = courseid {
                config.client.courseid = courseid;
            }

            let provider = run_chat(&config).await?;
            if provider != config.client.provider {
                config.client.provider = provider;
                config::save_config_to(&config_path, &config)?;
            }
            Ok(())
        }
    }
}

/// Run the terminal client and return the provider selected on exit.
async fn run_chat(config: &AppConfig) -> Result<Provider> {
    let (tx, mut rx) = mpsc::unbounded_channel::<AppEvent>();

    let sink_tx = tx.clone();
    let sink: EffectSink = Arc::new(move |id, effect| {
        let _ = sink_tx.send(AppEvent::Stream(id, effect));
    });
    let completion = Arc::new(ProviderClient::new(config)?);
    let mut controller = StreamController::new(config.client.clone(), completion, sink)?;
    let exporter = Exporter::new()?;
    info!(dir = %exporter.dir().display(), "exports are saved here");

    if let Some(url) = config.client.stream_url.clone() {
        tokio::spawn(check_proxy_health(url, tx.clone()));
    }

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(&config.client);
    info!(provider = %app.provider, "client started");

    let res = run_app(&mut terminal, &mut app, &mut controller, &exporter, &mut rx);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    controller.stop();
    info!(render_errors = app.switcher.render_errors(), "client stopped");
    if let Err(err) = res {
        eprintln!("Error: {err:?}");
    }

    Ok(app.provider)
}

/// Ask the proxy whether the model backend is reachable.
async fn check_proxy_health(stream_url: String, tx: mpsc::UnboundedSender<AppEvent>) {
    let health_url = match stream_url.rsplit_once('/') {
        Some((base, _)) => format!("{base}/health"),
        None => return,
    };

    let notice = match reqwest::get(&health_url).await {
        Ok(response) => match response.json::<serde_json::Value>().await {
            Ok(body) if body["ollama"] == true => "Proxy ready".to_string(),
            Ok(_) => "Proxy is up but Ollama is unreachable".to_string(),
            Err(e) => {
                warn!(error = %e, "unexpected health response");
                "Proxy health check failed".to_string()
            }
        },
        Err(e) => {
            warn!(error = %e, url = %health_url, "proxy not reachable");
            "Streaming proxy not reachable".to_string()
        }
    };
    let _ = tx.send(AppEvent::Notice(notice));
}

fn handle_help_keys(app: &mut App, key: KeyCode, modifiers: KeyModifiers) -> bool {
    if !app.show_help {
        return false;
    }

    match key {
        KeyCode::Char('h') if modifiers.contains(KeyModifiers::CONTROL) => app.toggle_help(),
        KeyCode::Esc => app.show_help = false,
        _ => {}
    }
    true
}

fn handle_keyboard_input(
    app: &mut App,
    key: KeyCode,
    modifiers: KeyModifiers,
    controller: &mut StreamController,
    exporter: &Exporter,
) {
    match key {
        KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
            if app.exit_pending {
                app.quit();
            } else {
                app.exit_pending = true;
            }
            return;
        }
        KeyCode::Esc if app.exit_pending => {
            app.exit_pending = false;
            return;
        }
        _ if app.exit_pending => {
            // Any other key cancels pending exit
            app.exit_pending = false;
        }
        _ => {}
    }

    let ctrl = modifiers.contains(KeyModifiers::CONTROL);
    match key {
        KeyCode::Char('h') if ctrl => app.toggle_help(),
        KeyCode::Char('p') if ctrl => {
            app.toggle_provider();
            app.notice = Some(format!("Provider: {}", app.provider));
        }
        KeyCode::Char('s') if ctrl => app.export(exporter),
        KeyCode::Esc => {
            if controller.is_active() && controller.stop() {
                info!("request cancelled");
            }
        }
        KeyCode::Tab => app.cycle_view(),

        KeyCode::Up => app.scroll_up(1),
        KeyCode::Down => app.scroll_down(1),
        KeyCode::PageUp => app.scroll_up(10),
        KeyCode::PageDown => app.scroll_down(10),
        KeyCode::Home => app.scroll_to_top(),
        KeyCode::End => app.scroll_to_bottom(),

        KeyCode::Backspace => {
            app.input_buffer.pop();
        }
        KeyCode::Enter => {
            if let Some(request) = app.begin_request() {
                let id = controller.start(request);
                app.track_stream(id);
            }
        }
        KeyCode::Char(c) if !ctrl => app.input_buffer.push(c),
        _ => {}
    }
}

fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    controller: &mut StreamController,
    exporter: &Exporter,
    event_rx: &mut mpsc::UnboundedReceiver<AppEvent>,
) -> Result<()> {
    loop {
        terminal.draw(|f| ui::render(f, app))?;

        while let Ok(app_event) = event_rx.try_recv() {
            app.handle_event(app_event);
        }

        // ~60fps for smooth scrolling while text streams in
        if event::poll(Duration::from_millis(16))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press
                    && !handle_help_keys(app, key.code, key.modifiers)
                {
                    handle_keyboard_input(app, key.code, key.modifiers, controller, exporter);
                }
            }
        }

        if app.should_quit {
            break;
        }
    }
    Ok(())
}
