//! Durable per-conversation message history.
//!
//! One JSON file per conversation id, rewritten whole on every save so a
//! crash mid-write can never leave a half-appended exchange behind.
//! Budgets are enforced after every append: message count first, then the
//! character-cost budget, both evicting oldest-first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::api::{ContentPart, MessageContent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: HistoryRole,
    pub content: MessageContent,
    /// Character-equivalent weight used for budget accounting.
    pub size: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatHistory {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
}

impl ChatHistory {
    fn empty(id: &str) -> Self {
        ChatHistory {
            id: id.to_string(),
            messages: Vec::new(),
        }
    }

    pub fn total_cost(&self) -> usize {
        self.messages.iter().map(|m| m.size).sum()
    }
}

#[derive(Debug)]
pub enum HistoryError {
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryError::Write { path, source } => {
                write!(
                    f,
                    "failed to write conversation {}: {}",
                    path.display(),
                    source
                )
            }
            HistoryError::Serialize { path, source } => {
                write!(
                    f,
                    "failed to encode conversation {}: {}",
                    path.display(),
                    source
                )
            }
        }
    }
}

impl std::error::Error for HistoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HistoryError::Write { source, .. } => Some(source),
            HistoryError::Serialize { source, .. } => Some(source),
        }
    }
}

pub struct HistoryStore {
    dir: PathBuf,
    max_messages: usize,
    max_chars: usize,
    attachment_char_cost: usize,
}

impl HistoryStore {
    pub fn new(
        dir: PathBuf,
        max_messages: usize,
        max_chars: usize,
        attachment_char_cost: usize,
    ) -> Self {
        HistoryStore {
            dir,
            max_messages,
            max_chars,
            attachment_char_cost,
        }
    }

    /// Load a conversation, returning a fresh empty history when the file
    /// is missing or unreadable. Availability wins over a missing file
    /// being fatal.
    pub fn load(&self, id: &str) -> ChatHistory {
        let path = self.path_for(id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(_) => return ChatHistory::empty(id),
        };
        match serde_json::from_str::<ChatHistory>(&contents) {
            Ok(history) => history,
            Err(err) => {
                debug!(id, error = %err, "corrupt conversation file, starting fresh");
                ChatHistory::empty(id)
            }
        }
    }

    /// Record a completed exchange and persist. An assistant turn that is
    /// empty (never completed) is never written; in that case the history
    /// is left untouched.
    pub fn append(
        &self,
        history: &mut ChatHistory,
        user: MessageContent,
        assistant: &str,
    ) -> Result<(), HistoryError> {
        if assistant.trim().is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let user_size = self.message_cost(&user);
        history.messages.push(HistoryMessage {
            role: HistoryRole::User,
            content: user,
            size: user_size,
            timestamp: now,
        });
        history.messages.push(HistoryMessage {
            role: HistoryRole::Assistant,
            content: MessageContent::text(assistant),
            size: assistant.chars().count(),
            timestamp: now,
        });

        self.apply_limits(history);
        self.save(history)
    }

    /// Delete the persisted conversation. Deleting a conversation that was
    /// never saved is not an error.
    pub fn clear(&self, id: &str) -> Result<(), HistoryError> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(HistoryError::Write { path, source }),
        }
    }

    /// Character-equivalent cost of a message: text costs its length, each
    /// attachment part costs the fixed configured weight so budgets stay
    /// meaningful without decoding payloads.
    pub fn message_cost(&self, content: &MessageContent) -> usize {
        match content {
            MessageContent::Text(text) => text.chars().count(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => text.chars().count(),
                    ContentPart::ImageUrl { .. } => self.attachment_char_cost,
                })
                .sum(),
        }
    }

    /// Two-pass eviction, oldest first: trim to the message-count budget,
    /// then drop further messages until the character budget holds.
    fn apply_limits(&self, history: &mut ChatHistory) {
        let max_len = self.max_messages * 2;
        if history.messages.len() > max_len {
            let excess = history.messages.len() - max_len;
            history.messages.drain(..excess);
        }
        while history.total_cost() > self.max_chars && !history.messages.is_empty() {
            history.messages.remove(0);
        }
    }

    fn save(&self, history: &ChatHistory) -> Result<(), HistoryError> {
        let path = self.path_for(&history.id);
        let write_err = |source: std::io::Error| HistoryError::Write {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(write_err)?;

        let contents =
            serde_json::to_string_pretty(history).map_err(|source| HistoryError::Serialize {
                path: path.clone(),
                source,
            })?;

        let mut temp_file = NamedTempFile::new_in(&self.dir).map_err(write_err)?;
        temp_file.write_all(contents.as_bytes()).map_err(write_err)?;
        temp_file.as_file_mut().sync_all().map_err(write_err)?;
        temp_file
            .persist(&path)
            .map_err(|err| write_err(err.error))?;
        Ok(())
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_id(id)))
    }

    #[cfg(test)]
    pub fn file_path(&self, id: &str) -> PathBuf {
        self.path_for(id)
    }
}

/// Conversation ids come from the command line; strip anything that could
/// escape the conversations directory.
fn sanitize_id(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}
