use std::sync::Arc;

use companion_core::{
    Config, ConversationSession, DownloadManager, DownloadSnapshot, ModelChoice, ModelClient,
    ModelError, OllamaClient, PendingTurn, Reply,
};
use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

/// Which text box receives keystrokes in editing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Chat,
    Download,
}

/// A single-line text box with a character cursor.
#[derive(Debug, Default, Clone)]
pub struct TextInput {
    pub text: String,
    pub cursor: usize,
}

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

impl TextInput {
    pub fn set(&mut self, text: &str) {
        self.text = text.to_string();
        self.cursor = self.text.chars().count();
    }

    pub fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.text)
    }

    pub fn insert(&mut self, c: char) {
        let byte_pos = char_to_byte_index(&self.text, self.cursor);
        self.text.insert(byte_pos, c);
        self.cursor += 1;
    }

    pub fn insert_str(&mut self, s: &str) {
        // Single-line box: pasted newlines become spaces
        for c in s.chars() {
            self.insert(if c == '\n' || c == '\r' { ' ' } else { c });
        }
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = char_to_byte_index(&self.text, self.cursor);
            self.text.remove(byte_pos);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.text.chars().count() {
            let byte_pos = char_to_byte_index(&self.text, self.cursor);
            self.text.remove(byte_pos);
        }
    }

    pub fn left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.text.chars().count());
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.text.chars().count();
    }
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub focus: FocusPane,

    // Chat state
    pub chat_input: TextInput,
    pub chat_scroll: u16,
    pub chat_height: u16, // Height of chat area for scroll calculations
    pub chat_width: u16,  // Width of chat area for wrap calculations
    pub query_loading: bool,
    pub query_task: Option<JoinHandle<Reply>>,
    pub pending_turn: Option<PendingTurn>,
    pub cancel: CancellationToken,
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Model picker state
    pub show_model_picker: bool,
    pub model_picker_state: ListState,
    pub installed_models: Vec<String>,
    pub models_task: Option<JoinHandle<anyhow::Result<Vec<String>>>>,

    // Download state
    pub download_input: TextInput,
    pub download: DownloadSnapshot,
    /// Message from the last start/stop request, cleared by the next one.
    pub download_notice: Option<String>,

    // Panel areas for mouse hit-testing (updated during render)
    pub chat_area: Option<Rect>,

    // Core
    pub session: ConversationSession,
    pub downloads: Arc<DownloadManager>,
    pub ollama: OllamaClient,
}

impl App {
    pub fn new(config: &Config) -> Self {
        let host = config.ollama_host();
        tracing::info!(host = %host, "connecting to Ollama");

        let ollama = OllamaClient::with_timeout(&host, config.request_timeout());
        let client = ModelClient::new(Arc::new(ollama.clone()), config.model())
            .with_language(config.language());
        let session =
            ConversationSession::new(client).with_replay_diagnostics(config.replay_diagnostics());

        let downloads = Arc::new(DownloadManager::new());

        let mut download_input = TextInput::default();
        download_input.set(&config.model().pull_command());

        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            focus: FocusPane::Chat,

            chat_input: TextInput::default(),
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            query_loading: false,
            query_task: None,
            pending_turn: None,
            cancel: CancellationToken::new(),
            animation_frame: 0,

            show_model_picker: false,
            model_picker_state: ListState::default(),
            installed_models: Vec::new(),
            models_task: None,

            download_input,
            download: downloads.poll(),
            download_notice: None,

            chat_area: None,

            session,
            downloads,
            ollama,
        }
    }

    /// Send the chat box contents to the model in the background.
    pub fn submit_chat(&mut self) {
        if self.query_task.is_some() {
            return;
        }

        let input = self.chat_input.take();
        let Some(pending) = self.session.begin(&input) else {
            return;
        };

        let client = self.session.client().clone();
        let cancel = self.cancel.clone();
        let request = pending.clone();
        self.query_task = Some(tokio::spawn(async move {
            client
                .complete_with_cancel(request.input(), request.history(), &cancel)
                .await
        }));
        self.pending_turn = Some(pending);
        self.query_loading = true;

        // Scroll to bottom so "Thinking..." is visible
        self.scroll_chat_to_bottom();
    }

    pub fn start_download(&mut self) {
        let command = self.download_input.text.clone();
        match self.downloads.start(&command) {
            Ok(()) => self.download_notice = None,
            Err(e) => self.download_notice = Some(e.to_string()),
        }
        self.download = self.downloads.poll();
    }

    pub async fn stop_download(&mut self) {
        let message = self.downloads.stop().await;
        self.download_notice = Some(message);
        self.download = self.downloads.poll();
    }

    pub fn refresh_installed_models(&mut self) {
        if self.models_task.is_some() {
            return;
        }
        let ollama = self.ollama.clone();
        self.models_task = Some(tokio::spawn(async move { ollama.list_models().await }));
    }

    /// Collect finished background work. Called after every event.
    pub async fn poll_tasks(&mut self) {
        if self.query_task.as_ref().is_some_and(|t| t.is_finished()) {
            if let (Some(task), Some(pending)) = (self.query_task.take(), self.pending_turn.take()) {
                let reply = match task.await {
                    Ok(reply) => reply,
                    Err(e) => {
                        tracing::error!(error = %e, "chat task failed");
                        Reply::from_error(ModelError::Cancelled)
                    }
                };
                self.session.finish(pending, reply);
                self.query_loading = false;
                self.scroll_chat_to_bottom();
            }
        }

        if self.models_task.as_ref().is_some_and(|t| t.is_finished()) {
            if let Some(task) = self.models_task.take() {
                match task.await {
                    Ok(Ok(models)) => self.installed_models = models,
                    Ok(Err(e)) => tracing::warn!(error = %e, "could not list installed models"),
                    Err(e) => tracing::error!(error = %e, "model listing task failed"),
                }
            }
        }

        let previous = self.download.status;
        self.download = self.downloads.poll();
        if previous != self.download.status && self.download.status.is_terminal() {
            // A finished pull may have added a model
            self.refresh_installed_models();
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.query_loading {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn is_installed(&self, model: ModelChoice) -> bool {
        self.installed_models.iter().any(|m| m == model.as_str())
    }

    /// Scroll chat to bottom so the latest reply is visible
    pub fn scroll_chat_to_bottom(&mut self) {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;

        for turn in self.session.turns() {
            total_lines = total_lines.saturating_add(1); // Role line ("You:" or "AI:")
            for line in turn.text.lines() {
                // Use character count, not byte length, for proper UTF-8 handling
                let char_count = line.chars().count();
                let wrapped = (char_count / wrap_width + 1) as u16;
                total_lines = total_lines.saturating_add(wrapped);
            }
            total_lines = total_lines.saturating_add(1); // Blank line after message
        }

        if self.query_loading {
            total_lines = total_lines.saturating_add(2); // "AI:" + "Thinking..."
        }

        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };

        self.chat_scroll = total_lines.saturating_sub(visible_height);
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(lines);
    }

    pub fn reset_conversation(&mut self) {
        if self.query_task.is_some() {
            return;
        }
        self.session.reset();
        self.chat_scroll = 0;
    }

    // Model picker methods
    pub fn open_model_picker(&mut self) {
        let current = ModelChoice::all()
            .iter()
            .position(|m| *m == self.session.model());
        self.model_picker_state.select(current.or(Some(0)));
        self.show_model_picker = true;
        self.refresh_installed_models();
    }

    pub fn model_picker_nav_down(&mut self) {
        let len = ModelChoice::all().len();
        let i = self.model_picker_state.selected().unwrap_or(0);
        self.model_picker_state.select(Some((i + 1).min(len - 1)));
    }

    pub fn model_picker_nav_up(&mut self) {
        let i = self.model_picker_state.selected().unwrap_or(0);
        self.model_picker_state.select(Some(i.saturating_sub(1)));
    }

    fn picked_model(&self) -> Option<ModelChoice> {
        self.model_picker_state
            .selected()
            .and_then(|i| ModelChoice::all().get(i).copied())
    }

    pub fn select_model(&mut self) {
        if let Some(model) = self.picked_model() {
            self.session.set_model(model);
            self.show_model_picker = false;
            tracing::info!(model = model.as_str(), "model selected");
            // Save to config
            if let Err(e) = Config::save_default_model(model) {
                tracing::warn!(error = %e, "could not save default model");
            }
        }
    }

    /// Put the pull command for the highlighted model in the download box.
    pub fn prepare_pull_for_picked(&mut self) {
        if let Some(model) = self.picked_model() {
            self.download_input.set(&model.pull_command());
            self.show_model_picker = false;
            self.focus = FocusPane::Download;
            self.input_mode = InputMode::Editing;
        }
    }

    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.query_task.take() {
            task.abort();
        }
        if self.downloads.is_running() {
            let message = self.downloads.stop().await;
            tracing::info!(outcome = %message, "download stopped on exit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_input_edits_by_character() {
        let mut input = TextInput::default();
        for c in "héllo".chars() {
            input.insert(c);
        }
        input.left();
        input.left();
        input.backspace();
        assert_eq!(input.text, "hélo");
        input.home();
        input.delete();
        assert_eq!(input.text, "élo");
        input.end();
        input.insert_str("!\n?");
        assert_eq!(input.text, "élo! ?");
        assert_eq!(input.take(), "élo! ?");
        assert_eq!(input.cursor, 0);
    }

    #[tokio::test]
    async fn blank_chat_input_does_not_start_a_turn() {
        let mut app = App::new(&Config::new());
        app.chat_input.set("   ");
        app.submit_chat();
        assert!(app.query_task.is_none());
        assert_eq!(app.session.turns().len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_download_reports_busy_notice() {
        let mut app = App::new(&Config::new());
        app.download_input.set("sleep 5");
        app.start_download();
        assert!(app.download_notice.is_none());

        app.download_input.set("echo second");
        app.start_download();
        let notice = app.download_notice.clone().unwrap();
        assert!(notice.contains("already in progress"));
        assert_eq!(app.download.command, "sleep 5");

        app.stop_download().await;
        assert_eq!(app.download_notice.as_deref(), Some("Download stopped."));
    }
}
