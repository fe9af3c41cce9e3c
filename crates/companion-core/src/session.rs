//! Conversation state shared by every front end.
//!
//! The session keeps two views of the conversation. The turn log is
//! append-only and starts with the greeting, which is shown to the user but
//! never sent to the model. The transcript is the list of (message, response)
//! pairs the UI renders. Every transcript entry has a matching User/Assistant
//! pair in the model-facing part of the log.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ModelError;
use crate::model::{ModelChoice, ModelClient, Reply};

pub const GREETING: &str = "Hi! I'm DeepSeek. How can I help you code today? 💻";

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One party's contribution to the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    /// Position in the session log.
    pub seq: usize,
    /// Synthesized failure text rather than real model output.
    pub diagnostic: bool,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>, seq: usize) -> Self {
        Self {
            role,
            text: text.into(),
            seq,
            diagnostic: false,
        }
    }

    fn diagnostic(text: impl Into<String>, seq: usize) -> Self {
        Self {
            diagnostic: true,
            ..Self::new(Role::Assistant, text, seq)
        }
    }
}

/// A displayed (user message, assistant response) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub message: String,
    pub response: String,
}

#[derive(Debug)]
pub struct SubmitOutcome {
    /// The assistant text to show for this submit, empty for a no-op.
    pub display_text: String,
    pub transcript: Vec<Exchange>,
    /// Set when the reply is a diagnostic rather than model output.
    pub error: Option<ModelError>,
}

/// A user turn that has been logged but not yet answered.
#[derive(Debug, Clone)]
pub struct PendingTurn {
    input: String,
    history: Vec<Turn>,
}

impl PendingTurn {
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Model-facing history preceding this turn.
    pub fn history(&self) -> &[Turn] {
        &self.history
    }
}

pub struct ConversationSession {
    client: ModelClient,
    turns: Vec<Turn>,
    /// First log index that is sent to the model.
    context_start: usize,
    /// Number of log entries covered by the most recent request.
    sent_cursor: usize,
    transcript: Vec<Exchange>,
    replay_diagnostics: bool,
}

impl ConversationSession {
    pub fn new(client: ModelClient) -> Self {
        let mut session = Self {
            client,
            turns: Vec::new(),
            context_start: 0,
            sent_cursor: 0,
            transcript: Vec::new(),
            replay_diagnostics: true,
        };
        session.reset();
        session
    }

    /// Whether diagnostic turns are replayed to the model on later requests.
    pub fn with_replay_diagnostics(mut self, replay: bool) -> Self {
        self.replay_diagnostics = replay;
        self
    }

    /// Drop the conversation, keeping only the greeting.
    pub fn reset(&mut self) {
        self.turns = vec![Turn::new(Role::Assistant, GREETING, 0)];
        self.context_start = self.turns.len();
        self.sent_cursor = self.context_start;
        self.transcript.clear();
    }

    pub fn greeting(&self) -> Option<&Turn> {
        if self.context_start > 0 {
            self.turns.first()
        } else {
            None
        }
    }

    /// The full log, greeting included.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn model_history(&self) -> &[Turn] {
        &self.turns[self.context_start..]
    }

    pub fn sent_cursor(&self) -> usize {
        self.sent_cursor
    }

    pub fn transcript(&self) -> &[Exchange] {
        &self.transcript
    }

    pub fn model(&self) -> ModelChoice {
        self.client.model()
    }

    pub fn set_model(&mut self, model: ModelChoice) {
        self.client.set_model(model);
    }

    pub fn client(&self) -> &ModelClient {
        &self.client
    }

    /// Log the user's turn and snapshot the history to send with it.
    ///
    /// Returns `None` for blank input, leaving the session untouched.
    pub fn begin(&mut self, user_input: &str) -> Option<PendingTurn> {
        if user_input.trim().is_empty() {
            return None;
        }

        let history: Vec<Turn> = self
            .model_history()
            .iter()
            .filter(|turn| self.replay_diagnostics || !turn.diagnostic)
            .cloned()
            .collect();

        let seq = self.turns.len();
        self.turns.push(Turn::new(Role::User, user_input, seq));
        self.sent_cursor = self.turns.len();

        Some(PendingTurn {
            input: user_input.to_string(),
            history,
        })
    }

    /// Record the reply to a turn started with [`begin`](Self::begin).
    pub fn finish(&mut self, pending: PendingTurn, reply: Reply) -> SubmitOutcome {
        let seq = self.turns.len();
        let (text, error) = match reply {
            Reply::Model(text) => {
                self.turns.push(Turn::new(Role::Assistant, text.clone(), seq));
                (text, None)
            }
            Reply::Diagnostic { text, error } => {
                self.turns.push(Turn::diagnostic(text.clone(), seq));
                (text, Some(error))
            }
        };

        self.transcript.push(Exchange {
            message: pending.input,
            response: text.clone(),
        });

        tracing::info!(
            turns = self.turns.len(),
            exchanges = self.transcript.len(),
            diagnostic = error.is_some(),
            "turn recorded"
        );

        SubmitOutcome {
            display_text: text,
            transcript: self.transcript.clone(),
            error,
        }
    }

    pub async fn submit(&mut self, user_input: &str) -> SubmitOutcome {
        self.submit_with_cancel(user_input, &CancellationToken::new())
            .await
    }

    pub async fn submit_with_cancel(
        &mut self,
        user_input: &str,
        cancel: &CancellationToken,
    ) -> SubmitOutcome {
        let Some(pending) = self.begin(user_input) else {
            return SubmitOutcome {
                display_text: String::new(),
                transcript: self.transcript.clone(),
                error: None,
            };
        };

        let reply = self
            .client
            .complete_with_cancel(pending.input(), pending.history(), cancel)
            .await;
        self.finish(pending, reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{ChatBackend, ChatRequest, PromptRole};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Answers every request and remembers what it was sent.
    #[derive(Default)]
    struct Recorder {
        requests: Mutex<Vec<ChatRequest>>,
        fail: bool,
    }

    impl Recorder {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn last(&self) -> ChatRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl ChatBackend for Recorder {
        async fn chat(&self, request: &ChatRequest) -> Result<String, ModelError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(ModelError::Decode("backend offline".to_string()));
            }
            Ok(format!("reply {}", self.calls()))
        }
    }

    fn session_with(backend: Arc<Recorder>) -> ConversationSession {
        ConversationSession::new(ModelClient::new(backend, ModelChoice::default()))
    }

    #[tokio::test]
    async fn each_submit_appends_two_turns() {
        let backend = Arc::new(Recorder::default());
        let mut session = session_with(backend.clone());
        let before = session.model_history().len();

        for i in 0..4 {
            session.submit(&format!("question {}", i)).await;
            assert_eq!(session.model_history().len(), before + 2 * (i + 1));
        }
        assert_eq!(backend.calls(), 4);
        assert_eq!(session.transcript().len(), 4);
    }

    #[tokio::test]
    async fn blank_submit_is_a_no_op() {
        let backend = Arc::new(Recorder::default());
        let mut session = session_with(backend.clone());
        session.submit("hello").await;
        let turns_before = session.turns().to_vec();

        for input in ["", "   ", "\n\t"] {
            let outcome = session.submit(input).await;
            assert!(outcome.display_text.is_empty());
            assert_eq!(outcome.transcript.len(), 1);
        }

        assert_eq!(session.turns(), turns_before.as_slice());
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn failure_is_recorded_as_tagged_assistant_turn() {
        let backend = Arc::new(Recorder::failing());
        let mut session = session_with(backend);

        let outcome = session.submit("x").await;

        assert!(outcome.display_text.contains("Error"));
        assert!(outcome.display_text.contains("backend offline"));
        assert!(matches!(outcome.error, Some(ModelError::Decode(_))));

        let last = session.turns().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.diagnostic);
        assert_eq!(last.text, outcome.display_text);
        assert_eq!(session.transcript()[0].response, outcome.display_text);
    }

    #[tokio::test]
    async fn greeting_is_displayed_but_never_sent() {
        let backend = Arc::new(Recorder::default());
        let mut session = session_with(backend.clone());

        let outcome = session.submit("write a function to reverse a string").await;

        assert_eq!(outcome.transcript.len(), 1);
        assert_eq!(session.turns()[0].text, GREETING);
        assert_eq!(session.greeting().map(|t| t.text.as_str()), Some(GREETING));

        let sent = backend.last();
        assert!(sent.messages.iter().all(|m| m.content != GREETING));
        // system instruction + the new input
        assert_eq!(sent.messages.len(), 2);
        assert_eq!(sent.messages[1].role, PromptRole::User);
        assert_eq!(sent.messages[1].content, "write a function to reverse a string");
    }

    #[tokio::test]
    async fn history_is_replayed_in_order_without_duplicates() {
        let backend = Arc::new(Recorder::default());
        let mut session = session_with(backend.clone());

        session.submit("one").await;
        session.submit("two").await;

        let contents: Vec<String> = backend
            .last()
            .messages
            .iter()
            .skip(1)
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(contents, vec!["one", "reply 1", "two"]);
        assert_eq!(session.sent_cursor(), session.turns().len() - 1);
    }

    #[tokio::test]
    async fn diagnostics_can_be_kept_out_of_the_prompt() {
        let backend = Arc::new(Recorder::failing());
        let mut session = session_with(backend.clone()).with_replay_diagnostics(false);

        session.submit("one").await;
        session.submit("two").await;

        let sent = backend.last();
        assert!(sent.messages.iter().all(|m| !m.content.starts_with("Error:")));
        // the failed reply is still part of the log
        assert_eq!(session.model_history().len(), 4);
    }

    #[tokio::test]
    async fn transcript_pairs_match_model_history() {
        let backend = Arc::new(Recorder::default());
        let mut session = session_with(backend);

        session.submit("a").await;
        session.submit("b").await;

        let history = session.model_history();
        for (i, exchange) in session.transcript().iter().enumerate() {
            assert_eq!(history[2 * i].role, Role::User);
            assert_eq!(history[2 * i].text, exchange.message);
            assert_eq!(history[2 * i + 1].role, Role::Assistant);
            assert_eq!(history[2 * i + 1].text, exchange.response);
        }
    }

    #[tokio::test]
    async fn split_begin_finish_matches_submit() {
        let backend = Arc::new(Recorder::default());
        let mut session = session_with(backend.clone());

        let pending = session.begin("hi").unwrap();
        assert_eq!(session.turns().last().unwrap().role, Role::User);
        let reply = session
            .client()
            .complete(pending.input(), pending.history())
            .await;
        let outcome = session.finish(pending, reply);

        assert_eq!(outcome.display_text, "reply 1");
        assert_eq!(session.model_history().len(), 2);
    }

    #[test]
    fn reset_keeps_only_greeting() {
        let mut session = session_with(Arc::new(Recorder::default()));
        session.begin("dangling");
        session.reset();
        assert_eq!(session.turns().len(), 1);
        assert!(session.model_history().is_empty());
        assert!(session.transcript().is_empty());
    }

    #[test]
    fn model_selection_is_forwarded() {
        let mut session = session_with(Arc::new(Recorder::default()));
        session.set_model(ModelChoice::DeepSeekR1Large);
        assert_eq!(session.model(), ModelChoice::DeepSeekR1Large);
        let request = session.client().build_request("x", &[]);
        assert_eq!(request.model, "deepseek-r1:3b");
    }
}
