//! # contract: the chat-platform client the delivery loop talks to
//!
//! The delivery loop never speaks a wire protocol itself. It drives a [`ChatClient`], which the
//! CLI crate implements against the Telegram Bot API and tests replace with the generated
//! [`MockChatClient`].
//!
//! ## Error contract
//! - Implementors map a platform back-off instruction to [`ClientError::RateLimited`] carrying
//!   the wait the platform asked for; the delivery loop waits and retries on that variant only.
//! - Every other failure is returned as-is and handled by the caller's retry policy.

use std::path::PathBuf;

use async_trait::async_trait;
use indicatif::ProgressBar;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

pub use crate::error::ClientError;

/// Destination chat identifier as accepted by the platform (`-100…` id or `@username`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The account the client is authenticated as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: i64,
    pub first_name: String,
    pub username: Option<String>,
}

/// A chat the client can see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInfo {
    pub id: i64,
    pub title: Option<String>,
    pub username: Option<String>,
    /// Platform chat type, e.g. `channel`, `supergroup`.
    pub kind: String,
}

/// How a file is presented in the chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Sticker,
    Document,
}

/// One file to send.
pub struct FileUpload {
    pub path: PathBuf,
    /// Name shown in the chat; documents keep their file name.
    pub file_name: String,
    pub kind: MediaKind,
    /// Only honoured for photos.
    pub caption: Option<String>,
    /// Advanced by the implementor as bytes are transmitted.
    pub progress: ProgressBar,
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Who we are connected as; doubles as a connectivity/authorization check.
    async fn get_me(&self) -> Result<Identity, ClientError>;

    /// Resolve a chat reference, failing if it does not exist or is not accessible.
    async fn get_chat(&self, chat_ref: &str) -> Result<ChatInfo, ClientError>;

    /// Post a text message (HTML formatting).
    async fn send_message(&self, chat: &ChatId, text: &str) -> Result<(), ClientError>;

    /// Upload one file.
    async fn send_file(&self, chat: &ChatId, upload: FileUpload) -> Result<(), ClientError>;
}
