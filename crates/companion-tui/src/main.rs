mod app;
mod handler;
mod tui;
mod ui;

use anyhow::Result;
use companion_core::logging::{default_log_dir, init_file_logging};
use companion_core::Config;

use crate::app::App;
use crate::tui::EventHandler;

#[tokio::main]
async fn main() -> Result<()> {
    // Logging is best effort; the app still runs without a log file
    let _log_guard = match default_log_dir().and_then(|dir| init_file_logging(&dir)) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        }
    };

    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "could not load config, using defaults");
        Config::new()
    });

    let mut app = App::new(&config);

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new();

    app.refresh_installed_models();
    app.scroll_chat_to_bottom();

    let result = run(&mut app, &mut terminal, &mut events).await;

    app.shutdown().await;
    tui::restore()?;

    if let Err(e) = &result {
        tracing::error!(error = %e, "companion exited with error");
    }
    result
}

async fn run(app: &mut App, terminal: &mut tui::Tui, events: &mut EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        let Some(event) = events.next().await else {
            break;
        };
        handler::handle_event(app, event).await?;
        app.poll_tasks().await;
    }
    Ok(())
}
