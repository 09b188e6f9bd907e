//! JSONL-based conversation store: messages are append-only JSONL files.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::conversation::{Conversation, ConversationSink, MessageId, NewMessage, StoredMessage};
use crate::error::{DeskError, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConversationIndex {
    #[serde(default)]
    next_message_id: MessageId,
    #[serde(default)]
    conversations: Vec<Conversation>,
}

/// File-based conversation store.
///
/// Layout:
/// - `<base>/conversations.json`: conversation metadata and the message id counter
/// - `<base>/messages/<conversation>.jsonl`: one message per line
pub struct JsonlConversationStore {
    base: PathBuf,
    lock: Mutex<()>,
}

impl JsonlConversationStore {
    pub fn new(base: PathBuf) -> Self {
        Self {
            base,
            lock: Mutex::new(()),
        }
    }

    fn index_path(&self) -> PathBuf {
        self.base.join("conversations.json")
    }

    fn messages_dir(&self) -> PathBuf {
        self.base.join("messages")
    }

    /// File for a conversation's messages.
    ///
    /// Bytes outside `[A-Za-z0-9-]` are escaped as `_XX`, so distinct ids
    /// never share a file.
    fn messages_path(&self, conversation_id: &str) -> PathBuf {
        let mut file_stem = String::with_capacity(conversation_id.len());
        for byte in conversation_id.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                file_stem.push(byte as char);
            } else {
                file_stem.push_str(&format!("_{byte:02x}"));
            }
        }
        self.messages_dir().join(format!("{file_stem}.jsonl"))
    }

    async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base).await?;
        tokio::fs::create_dir_all(self.messages_dir()).await?;
        Ok(())
    }

    async fn load_index(&self) -> Result<ConversationIndex> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(ConversationIndex {
                next_message_id: 1,
                conversations: Vec::new(),
            });
        }
        let data = tokio::fs::read_to_string(&path).await?;
        serde_json::from_str(&data).map_err(|e| {
            DeskError::Store(format!("corrupt conversation index {}: {e}", path.display()))
        })
    }

    async fn save_index(&self, index: &ConversationIndex) -> Result<()> {
        self.ensure_dirs().await?;
        let data = serde_json::to_string_pretty(index)?;
        let path = self.index_path();
        // Atomic write: write to temp then rename
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        let path = self.messages_path(conversation_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let mut messages = Vec::new();
        for line in data.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let message: StoredMessage = serde_json::from_str(line)
                .map_err(|e| DeskError::Store(format!("corrupt message line: {e}")))?;
            messages.push(message);
        }
        messages.sort_by_key(|m| (m.created_at, m.id));
        Ok(messages)
    }

    async fn write_lines(&self, conversation_id: &str, messages: &[StoredMessage]) -> Result<()> {
        let mut data = String::new();
        for message in messages {
            data.push_str(&serde_json::to_string(message)?);
            data.push('\n');
        }
        let path = self.messages_path(conversation_id);
        let tmp = path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Bump `updated_at`, creating the conversation if it does not exist yet.
    fn touch(index: &mut ConversationIndex, conversation_id: &str) {
        let now = Utc::now();
        match index
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            Some(existing) => existing.updated_at = now,
            None => index.conversations.push(Conversation {
                id: conversation_id.to_string(),
                title: None,
                created_at: now,
                updated_at: now,
            }),
        }
    }

    /// Create an empty conversation and return its id.
    pub async fn create(&self, title: Option<&str>) -> Result<String> {
        let _guard = self.lock.lock().await;
        let mut index = self.load_index().await?;
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        let title = title
            .map(str::to_string)
            .unwrap_or_else(|| format!("New Conversation {}", now.format("%H:%M:%S")));
        index.conversations.push(Conversation {
            id: id.clone(),
            title: Some(title),
            created_at: now,
            updated_at: now,
        });
        self.save_index(&index).await?;
        debug!(conversation_id = %id, "Created conversation");
        Ok(id)
    }

    /// Most recently updated conversation, creating one if none exist.
    pub async fn latest_or_create(&self) -> Result<Conversation> {
        if let Some(latest) = self.list().await?.pop() {
            return Ok(latest);
        }
        let id = self.create(None).await?;
        self.get(&id)
            .await?
            .ok_or_else(|| DeskError::Store(format!("conversation {id} vanished after create")))
    }

    pub async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let index = self.load_index().await?;
        Ok(index
            .conversations
            .into_iter()
            .find(|c| c.id == conversation_id))
    }

    /// All conversations, least recently updated first.
    pub async fn list(&self) -> Result<Vec<Conversation>> {
        let mut conversations = self.load_index().await?.conversations;
        conversations.sort_by_key(|c| c.updated_at);
        Ok(conversations)
    }

    /// Messages of a conversation ordered by creation time.
    pub async fn messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        self.load_messages(conversation_id).await
    }

    /// Copy a conversation into a new one, optionally only up to (and including) a message.
    pub async fn branch(
        &self,
        conversation_id: &str,
        up_to: Option<MessageId>,
    ) -> Result<String> {
        let _guard = self.lock.lock().await;
        let mut index = self.load_index().await?;
        let original = index
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned()
            .ok_or_else(|| DeskError::NotFound(format!("conversation {conversation_id}")))?;

        let mut messages = self.load_messages(conversation_id).await?;
        if let Some(branch_id) = up_to {
            match messages.iter().find(|m| m.id == branch_id).map(|m| m.created_at) {
                Some(cutoff) => messages.retain(|m| m.created_at <= cutoff),
                None => warn!(
                    message_id = branch_id,
                    "Branch message not found, copying all messages"
                ),
            }
        }

        let now = Utc::now();
        let new_id = uuid::Uuid::new_v4().to_string();
        let short: String = conversation_id.chars().take(8).collect();
        let title = format!(
            "Branch of {}",
            original
                .title
                .unwrap_or_else(|| format!("Conversation {short}"))
        );

        let copied: Vec<StoredMessage> = messages
            .into_iter()
            .map(|m| {
                let id = index.next_message_id.max(1);
                index.next_message_id = id + 1;
                StoredMessage {
                    id,
                    conversation_id: new_id.clone(),
                    ..m
                }
            })
            .collect();

        self.ensure_dirs().await?;
        if !copied.is_empty() {
            self.write_lines(&new_id, &copied).await?;
        }
        index.conversations.push(Conversation {
            id: new_id.clone(),
            title: Some(title),
            created_at: now,
            updated_at: now,
        });
        self.save_index(&index).await?;

        debug!(from = %conversation_id, to = %new_id, messages = copied.len(), "Branched conversation");
        Ok(new_id)
    }

    /// Delete a conversation and its messages.
    pub async fn delete(&self, conversation_id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut index = self.load_index().await?;
        index.conversations.retain(|c| c.id != conversation_id);
        self.save_index(&index).await?;

        let path = self.messages_path(conversation_id);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }

        debug!(conversation_id = %conversation_id, "Deleted conversation");
        Ok(())
    }
}

#[async_trait]
impl ConversationSink for JsonlConversationStore {
    async fn append(&self, message: NewMessage) -> Result<MessageId> {
        let _guard = self.lock.lock().await;
        self.ensure_dirs().await?;

        let mut index = self.load_index().await?;
        let id = index.next_message_id.max(1);
        index.next_message_id = id + 1;

        let stored = StoredMessage {
            id,
            conversation_id: message.conversation_id,
            role: message.role,
            content: message.content,
            created_at: Utc::now(),
            model: message.model,
        };
        let line = serde_json::to_string(&stored)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.messages_path(&stored.conversation_id))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        Self::touch(&mut index, &stored.conversation_id);
        self.save_index(&index).await?;

        debug!(conversation_id = %stored.conversation_id, message_id = id, role = %stored.role, "Appended message");
        Ok(id)
    }
}
