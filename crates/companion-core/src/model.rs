use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::ai::{ChatBackend, ChatRequest, PromptMessage, PromptRole};
use crate::error::ModelError;
use crate::session::{Role, Turn};

/// Sampling temperature used for every chat turn.
pub const TEMPERATURE: f32 = 0.3;

pub const DEFAULT_LANGUAGE: &str = "English";

/// Models the companion knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelChoice {
    #[default]
    DeepSeekR1Small,
    DeepSeekR1Large,
}

impl ModelChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelChoice::DeepSeekR1Small => "deepseek-r1:1.5b",
            ModelChoice::DeepSeekR1Large => "deepseek-r1:3b",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "deepseek-r1:1.5b" => Some(ModelChoice::DeepSeekR1Small),
            "deepseek-r1:3b" => Some(ModelChoice::DeepSeekR1Large),
            _ => None,
        }
    }

    pub fn all() -> Vec<ModelChoice> {
        vec![ModelChoice::DeepSeekR1Small, ModelChoice::DeepSeekR1Large]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelChoice::DeepSeekR1Small => "DeepSeek R1 1.5B",
            ModelChoice::DeepSeekR1Large => "DeepSeek R1 3B",
        }
    }

    /// The download command that fetches this model.
    pub fn pull_command(&self) -> String {
        format!("ollama pull {}", self.as_str())
    }
}

/// Result of one completion attempt.
///
/// Failures are never returned as `Err`: they become a diagnostic reply whose
/// text is shown in the conversation, with the error kept alongside it.
#[derive(Debug)]
pub enum Reply {
    Model(String),
    Diagnostic { text: String, error: ModelError },
}

impl Reply {
    pub fn from_error(error: ModelError) -> Self {
        Reply::Diagnostic {
            text: format!(
                "Error: Could not generate response. Ensure Ollama is running. Details: {}",
                error
            ),
            error,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Reply::Model(text) => text,
            Reply::Diagnostic { text, .. } => text,
        }
    }

    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Reply::Diagnostic { .. })
    }
}

pub fn system_prompt(language: &str) -> String {
    format!(
        "You are an expert AI coding assistant. Provide concise, correct solutions \
         with strategic print statements for debugging. Always respond in {}.",
        language
    )
}

/// Executes one chat completion per turn against a [`ChatBackend`].
#[derive(Clone)]
pub struct ModelClient {
    backend: Arc<dyn ChatBackend>,
    model: ModelChoice,
    language: String,
}

impl ModelClient {
    pub fn new(backend: Arc<dyn ChatBackend>, model: ModelChoice) -> Self {
        Self {
            backend,
            model,
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn model(&self) -> ModelChoice {
        self.model
    }

    pub fn set_model(&mut self, model: ModelChoice) {
        self.model = model;
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// System instruction, then `history` in order, then `user_input`.
    pub fn build_request(&self, user_input: &str, history: &[Turn]) -> ChatRequest {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(PromptMessage::new(
            PromptRole::System,
            system_prompt(&self.language),
        ));

        for turn in history {
            let role = match turn.role {
                Role::User => PromptRole::User,
                Role::Assistant => PromptRole::Assistant,
                Role::System => PromptRole::System,
            };
            messages.push(PromptMessage::new(role, turn.text.clone()));
        }

        messages.push(PromptMessage::new(PromptRole::User, user_input));

        ChatRequest {
            model: self.model.as_str().to_string(),
            messages,
            temperature: TEMPERATURE,
        }
    }

    pub async fn complete(&self, user_input: &str, history: &[Turn]) -> Reply {
        self.complete_with_cancel(user_input, history, &CancellationToken::new())
            .await
    }

    /// Like [`complete`](Self::complete), but gives up with
    /// [`ModelError::Cancelled`] as soon as `cancel` fires.
    pub async fn complete_with_cancel(
        &self,
        user_input: &str,
        history: &[Turn],
        cancel: &CancellationToken,
    ) -> Reply {
        let request = self.build_request(user_input, history);

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(ModelError::Cancelled),
            result = self.backend.chat(&request) => result,
        };

        match result {
            Ok(text) => {
                tracing::info!(model = %request.model, chars = text.len(), "model replied");
                Reply::Model(text)
            }
            Err(error) => {
                tracing::warn!(model = %request.model, error = %error, "model call failed");
                Reply::from_error(error)
            }
        }
    }
}
