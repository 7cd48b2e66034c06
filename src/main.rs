use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod api;
mod app;
mod attachment;
mod config;
mod handler;
mod redaction;
mod session;
mod tui;
mod ui;

use app::App;
use config::Config;

#[derive(Parser)]
#[command(name = "piichat")]
#[command(about = "Terminal chat client with PII redaction review", version)]
struct Cli {
    /// Backend base URL, overrides the config file
    #[arg(short, long, env = "PIICHAT_SERVER")]
    server: Option<String>,

    /// tracing filter directive, e.g. "piichat=debug"
    #[arg(long, env = "PIICHAT_LOG")]
    log: Option<String>,

    /// Skip the PII detection step and send directly
    #[arg(long)]
    no_redaction: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_init();
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    if cli.no_redaction {
        config.redaction = false;
    }

    let filter = cli
        .log
        .as_deref()
        .or(config.log_filter.as_deref())
        .unwrap_or("piichat=info");
    init_tracing(filter)?;
    tracing::info!(server = %config.server_url, redaction = config.redaction, "starting");

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new();
    let mut app = App::new(config);

    let result = run(&mut terminal, &mut events, &mut app).await;

    tui::restore()?;
    result
}

async fn run(terminal: &mut tui::Tui, events: &mut tui::EventHandler, app: &mut App) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        if let Some(event) = events.next().await {
            handler::handle_event(app, event).await?;
        }

        // The tick stream guarantees this runs shortly after a task finishes.
        app.poll_task().await;
    }
    Ok(())
}

/// Log to a file under the config dir; the terminal belongs to the TUI.
fn init_tracing(filter: &str) -> Result<()> {
    let dir = Config::config_dir()?;
    std::fs::create_dir_all(&dir)?;
    let file = std::fs::File::create(dir.join("piichat.log"))?;

    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Arc::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}
