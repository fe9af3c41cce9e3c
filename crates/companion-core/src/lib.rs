pub mod ai;
pub mod config;
pub mod download;
pub mod error;
pub mod logging;
pub mod model;
pub mod session;

// Re-export main types for convenience
pub use ai::{ChatBackend, ChatRequest, OllamaClient, PromptMessage, PromptRole};
pub use config::Config;
pub use download::{DownloadManager, DownloadSnapshot, DownloadStatus, DownloadTask};
pub use error::{DownloadError, ModelError};
pub use model::{ModelChoice, ModelClient, Reply};
pub use session::{ConversationSession, Exchange, PendingTurn, Role, SubmitOutcome, Turn};
