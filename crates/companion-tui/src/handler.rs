use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;

use crate::app::{App, FocusPane, InputMode, TextInput};
use crate::tui::AppEvent;

pub async fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key).await?,
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Paste(text) => {
            if app.input_mode == InputMode::Editing {
                focused_input(app).insert_str(&text);
            }
        }
        AppEvent::Resize => app.scroll_chat_to_bottom(),
        AppEvent::Tick => app.tick_animation(),
    }
    Ok(())
}

fn focused_input(app: &mut App) -> &mut TextInput {
    match app.focus {
        FocusPane::Chat => &mut app.chat_input,
        FocusPane::Download => &mut app.download_input,
    }
}

async fn handle_key(app: &mut App, key: KeyEvent) -> Result<()> {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return Ok(());
    }
    if key.code == KeyCode::Char('s') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.stop_download().await;
        return Ok(());
    }

    if app.show_model_picker {
        handle_model_picker(app, key);
        return Ok(());
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key).await,
        InputMode::Editing => handle_editing_mode(app, key),
    }

    Ok(())
}

fn handle_model_picker(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => app.model_picker_nav_down(),
        KeyCode::Char('k') | KeyCode::Up => app.model_picker_nav_up(),
        KeyCode::Enter => app.select_model(),
        KeyCode::Char('p') => app.prepare_pull_for_picked(),
        KeyCode::Esc | KeyCode::Char('q') => app.show_model_picker = false,
        _ => {}
    }
}

async fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,

        KeyCode::Char('i') | KeyCode::Enter => app.input_mode = InputMode::Editing,
        KeyCode::Tab => {
            app.focus = match app.focus {
                FocusPane::Chat => FocusPane::Download,
                FocusPane::Download => FocusPane::Chat,
            };
        }

        // Chat scrolling
        KeyCode::Char('j') | KeyCode::Down => app.scroll_down(1),
        KeyCode::Char('k') | KeyCode::Up => app.scroll_up(1),
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_down(app.chat_height / 2)
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_up(app.chat_height / 2)
        }
        KeyCode::Char('G') => app.scroll_chat_to_bottom(),
        KeyCode::Char('g') => app.chat_scroll = 0,

        KeyCode::Char('m') => app.open_model_picker(),
        KeyCode::Char('D') => {
            app.start_download();
        }
        KeyCode::Char('S') => app.stop_download().await,
        KeyCode::Char('n') => app.reset_conversation(),

        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.input_mode = InputMode::Normal,
        KeyCode::Tab => {
            app.focus = match app.focus {
                FocusPane::Chat => FocusPane::Download,
                FocusPane::Download => FocusPane::Chat,
            };
        }
        KeyCode::Enter => match app.focus {
            FocusPane::Chat => app.submit_chat(),
            FocusPane::Download => app.start_download(),
        },
        KeyCode::Backspace => focused_input(app).backspace(),
        KeyCode::Delete => focused_input(app).delete(),
        KeyCode::Left => focused_input(app).left(),
        KeyCode::Right => focused_input(app).right(),
        KeyCode::Home => focused_input(app).home(),
        KeyCode::End => focused_input(app).end(),
        KeyCode::Char(c) => focused_input(app).insert(c),
        _ => {}
    }
}

/// Check if a point is within a rectangle
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let in_chat = app
        .chat_area
        .map(|r| point_in_rect(mouse.column, mouse.row, r))
        .unwrap_or(false);
    if !in_chat {
        return;
    }

    match mouse.kind {
        MouseEventKind::ScrollDown => app.scroll_down(3),
        MouseEventKind::ScrollUp => app.scroll_up(3),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use companion_core::Config;

    fn key(code: KeyCode) -> AppEvent {
        AppEvent::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    #[tokio::test]
    async fn typing_goes_to_focused_box() {
        let mut app = App::new(&Config::new());
        app.download_input.take();

        handle_event(&mut app, key(KeyCode::Char('h'))).await.unwrap();
        handle_event(&mut app, key(KeyCode::Tab)).await.unwrap();
        handle_event(&mut app, key(KeyCode::Char('x'))).await.unwrap();

        assert_eq!(app.chat_input.text, "h");
        assert_eq!(app.download_input.text, "x");
        assert_eq!(app.focus, FocusPane::Download);
    }

    #[tokio::test]
    async fn picker_prefills_pull_command() {
        let mut app = App::new(&Config::new());
        handle_event(&mut app, key(KeyCode::Esc)).await.unwrap();
        handle_event(&mut app, key(KeyCode::Char('m'))).await.unwrap();
        assert!(app.show_model_picker);

        handle_event(&mut app, key(KeyCode::Down)).await.unwrap();
        handle_event(&mut app, key(KeyCode::Char('p'))).await.unwrap();

        assert!(!app.show_model_picker);
        assert_eq!(app.download_input.text, "ollama pull deepseek-r1:3b");
        assert_eq!(app.focus, FocusPane::Download);
    }

    #[tokio::test]
    async fn stop_without_download_is_informational() {
        let mut app = App::new(&Config::new());
        let stop = AppEvent::Key(KeyEvent::new(KeyCode::Char('s'), KeyModifiers::CONTROL));
        handle_event(&mut app, stop).await.unwrap();
        assert_eq!(app.download_notice.as_deref(), Some("No download in progress."));
    }
}
