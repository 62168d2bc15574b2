use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::shared::store::StoreError;

pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: None,
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn is_conversational(&self) -> bool {
        self.role == ROLE_USER || self.role == ROLE_ASSISTANT
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub title: String,
    pub user_id: String,
    pub created_at: i64,
    pub path: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_path: Option<String>,
}

impl Chat {
    pub fn key(id: &str) -> String {
        format!("chat:{id}")
    }

    pub fn user_index_key(user_id: &str) -> String {
        format!("user:chat:{user_id}")
    }

    pub fn chat_path(id: &str) -> String {
        format!("/chat/{id}")
    }

    pub fn share_path_for(id: &str) -> String {
        format!("/share/{id}")
    }

    /// Flattens the chat into hash fields; `messages` is stored as JSON.
    pub fn to_fields(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut fields = vec![
            ("id".to_string(), self.id.clone()),
            ("title".to_string(), self.title.clone()),
            ("userId".to_string(), self.user_id.clone()),
            ("createdAt".to_string(), self.created_at.to_string()),
            ("path".to_string(), self.path.clone()),
            ("messages".to_string(), serde_json::to_string(&self.messages)?),
        ];
        if let Some(share) = &self.share_path {
            fields.push(("sharePath".to_string(), share.clone()));
        }
        Ok(fields)
    }

    /// Returns `Ok(None)` for an empty hash, which is how a missing key reads back.
    pub fn from_fields(mut fields: HashMap<String, String>) -> Result<Option<Self>, StoreError> {
        if fields.is_empty() {
            return Ok(None);
        }

        let id = take_required(&mut fields, "id", "chat")?;
        let messages = match fields.remove("messages") {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Vec::new(),
        };

        Ok(Some(Self {
            title: fields.remove("title").unwrap_or_default(),
            user_id: take_required(&mut fields, "userId", "chat")?,
            created_at: parse_timestamp(fields.remove("createdAt"), &id)?,
            path: fields
                .remove("path")
                .unwrap_or_else(|| Self::chat_path(&id)),
            messages,
            share_path: fields.remove("sharePath").filter(|s| !s.is_empty()),
            id,
        }))
    }
}

pub(crate) fn take_required(
    fields: &mut HashMap<String, String>,
    name: &str,
    kind: &str,
) -> Result<String, StoreError> {
    fields
        .remove(name)
        .ok_or_else(|| StoreError::Corrupt(format!("{kind} record is missing '{name}'")))
}

pub(crate) fn parse_timestamp(raw: Option<String>, id: &str) -> Result<i64, StoreError> {
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("record {id} has invalid createdAt '{value}'"))),
        None => Ok(0),
    }
}
