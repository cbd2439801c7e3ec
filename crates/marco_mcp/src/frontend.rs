//! User-facing collaborator: answers clarification questions and confirms
//! destructive actions.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrontendError {
    /// Input stream ended; treated as the user walking away.
    #[error("front-end closed")]
    Closed,

    #[error("front-end I/O error: {0}")]
    Io(String),
}

/// Reply to a clarification question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Text(String),
    /// User declined to answer; the command is cancelled.
    Abandon,
}

impl Answer {
    pub fn text(text: impl Into<String>) -> Self {
        Answer::Text(text.into())
    }
}

#[async_trait]
pub trait Frontend: Send + Sync {
    async fn ask_user(&self, question: &str, options: &[String]) -> Result<Answer, FrontendError>;

    /// `true` only on explicit confirmation.
    async fn confirm_destructive(&self, description: &str) -> Result<bool, FrontendError>;
}
