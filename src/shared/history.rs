use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::shared::models::{Chat, Message, Prompt, ROLE_ASSISTANT};
use crate::shared::store::{KvStore, StoreError};

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type HistoryResult<T> = Result<T, HistoryError>;

/// Per-user chats and prompts: one hash per record plus a sorted index per user.
#[derive(Clone)]
pub struct ChatHistory {
    store: Arc<dyn KvStore>,
}

impl ChatHistory {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Newest first. Listing never fails: outages read as an empty history.
    pub async fn get_chats(&self, user_id: Option<&str>) -> Vec<Chat> {
        let Some(user_id) = user_id.filter(|u| !u.is_empty()) else {
            return Vec::new();
        };

        let index = Chat::user_index_key(user_id);
        match self.load_index(&index, Chat::from_fields, |c| c.user_id == user_id).await {
            Ok(chats) => chats,
            Err(e) => {
                warn!(user = %user_id, "Failed to list chats: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn get_prompts(&self, user_id: Option<&str>) -> Vec<Prompt> {
        let Some(user_id) = user_id.filter(|u| !u.is_empty()) else {
            return Vec::new();
        };

        let index = Prompt::user_index_key(user_id);
        match self.load_index(&index, Prompt::from_fields, |p| p.user_id == user_id).await {
            Ok(prompts) => prompts,
            Err(e) => {
                warn!(user = %user_id, "Failed to list prompts: {}", e);
                Vec::new()
            }
        }
    }

    async fn load_index<T, F, O>(
        &self,
        index_key: &str,
        decode: F,
        owned: O,
    ) -> Result<Vec<T>, StoreError>
    where
        F: Fn(std::collections::HashMap<String, String>) -> Result<Option<T>, StoreError>,
        O: Fn(&T) -> bool,
    {
        let keys = self.store.zrange(index_key, true).await?;
        let hashes = self.store.hgetall_many(&keys).await?;

        let mut records = Vec::with_capacity(hashes.len());
        for (key, fields) in keys.iter().zip(hashes) {
            match decode(fields) {
                Ok(Some(record)) if owned(&record) => records.push(record),
                Ok(Some(_)) => {
                    warn!(key = %key, index = %index_key, "Skipping record owned by another user")
                }
                // Index entry whose hash is gone; skip it.
                Ok(None) => {}
                Err(e) => warn!(key = %key, "Skipping unreadable record: {}", e),
            }
        }
        Ok(records)
    }

    /// `None` when the chat is missing or, for a non-empty `user_id`, owned by someone else.
    pub async fn get_chat(&self, id: &str, user_id: &str) -> HistoryResult<Option<Chat>> {
        let chat = Chat::from_fields(self.store.hgetall(&Chat::key(id)).await?)?;
        Ok(chat.filter(|c| user_id.is_empty() || c.user_id == user_id))
    }

    pub async fn remove_chat(&self, id: &str, user_id: &str) -> HistoryResult<()> {
        let key = Chat::key(id);
        self.ensure_owner(&key, user_id).await?;

        self.store.del(&key).await?;
        self.store.zrem(&Chat::user_index_key(user_id), &key).await?;
        info!(chat = %id, user = %user_id, "Removed chat");
        Ok(())
    }

    pub async fn remove_prompt(&self, id: &str, user_id: &str) -> HistoryResult<()> {
        let key = Prompt::key(id);
        self.ensure_owner(&key, user_id).await?;

        self.store.del(&key).await?;
        self.store.zrem(&Prompt::user_index_key(user_id), &key).await?;
        info!(prompt = %id, user = %user_id, "Removed prompt");
        Ok(())
    }

    /// Fails when `id` names a chat that belongs to someone else; unknown ids are free to use.
    pub async fn check_chat_owner(&self, id: &str, user_id: &str) -> HistoryResult<()> {
        self.ensure_writable(&Chat::key(id), user_id).await
    }

    async fn ensure_writable(&self, key: &str, user_id: &str) -> HistoryResult<()> {
        match self.store.hget(key, "userId").await? {
            Some(owner) if owner != user_id => Err(HistoryError::Unauthorized),
            _ => Ok(()),
        }
    }

    async fn ensure_owner(&self, key: &str, user_id: &str) -> HistoryResult<()> {
        let owner = self.store.hget(key, "userId").await?;
        if owner.as_deref() != Some(user_id) {
            return Err(HistoryError::Unauthorized);
        }
        Ok(())
    }

    /// Records a finished turn: the conversation so far plus the assistant's completion.
    pub async fn save_chat(
        &self,
        title: &str,
        id: &str,
        user_id: &str,
        messages: &[Message],
        completion: &str,
    ) -> HistoryResult<Chat> {
        let key = Chat::key(id);
        self.ensure_writable(&key, user_id).await?;

        let created_at = chrono::Utc::now().timestamp_millis();
        let mut transcript = messages.to_vec();
        transcript.push(Message::new(ROLE_ASSISTANT, completion));

        let chat = Chat {
            id: id.to_string(),
            title: title.to_string(),
            user_id: user_id.to_string(),
            created_at,
            path: Chat::chat_path(id),
            messages: transcript,
            share_path: None,
        };

        self.store.hset_multiple(&key, &chat.to_fields()?).await?;
        self.store
            .zadd(&Chat::user_index_key(user_id), &key, created_at)
            .await?;

        info!(chat = %id, user = %user_id, messages = chat.messages.len(), "Saved chat");
        Ok(chat)
    }

    /// Returns how many chats were removed.
    pub async fn clear_chats(&self, user_id: &str) -> HistoryResult<usize> {
        let index = Chat::user_index_key(user_id);
        let keys = self.store.zrange(&index, false).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let removed = self.store.remove_members(&index, &keys).await?;
        info!(user = %user_id, removed, "Cleared chats");
        Ok(removed)
    }

    pub async fn get_shared_chat(&self, id: &str) -> HistoryResult<Option<Chat>> {
        let chat = Chat::from_fields(self.store.hgetall(&Chat::key(id)).await?)?;
        Ok(chat.filter(|c| c.share_path.is_some()))
    }

    pub async fn share_chat(&self, id: &str, user_id: &str) -> HistoryResult<Chat> {
        let mut chat = Chat::from_fields(self.store.hgetall(&Chat::key(id)).await?)?
            .ok_or(HistoryError::NotFound("Chat"))?;
        if chat.user_id != user_id {
            return Err(HistoryError::Unauthorized);
        }

        let share_path = Chat::share_path_for(&chat.id);
        self.store
            .hset_multiple(
                &Chat::key(&chat.id),
                &[("sharePath".to_string(), share_path.clone())],
            )
            .await?;
        chat.share_path = Some(share_path);

        info!(chat = %id, user = %user_id, "Shared chat");
        Ok(chat)
    }

    pub async fn save_prompt(&self, id: &str, text: Vec<String>, user_id: &str) -> HistoryResult<Prompt> {
        let key = Prompt::key(id);
        self.ensure_writable(&key, user_id).await?;

        let prompt = Prompt {
            id: id.to_string(),
            user_id: user_id.to_string(),
            text,
            created_at: chrono::Utc::now().timestamp_millis(),
        };

        self.store.hset_multiple(&key, &prompt.to_fields()?).await?;
        self.store
            .zadd(&Prompt::user_index_key(user_id), &key, prompt.created_at)
            .await?;

        info!(prompt = %id, user = %user_id, "Saved prompt");
        Ok(prompt)
    }
}
