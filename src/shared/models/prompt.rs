use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::chat::{parse_timestamp, take_required};
use crate::shared::store::StoreError;

/// A saved prompt; `text` segments are joined with a space when used as input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub id: String,
    pub user_id: String,
    pub text: Vec<String>,
    pub created_at: i64,
}

impl Prompt {
    pub fn key(id: &str) -> String {
        format!("prompt:{id}")
    }

    pub fn user_index_key(user_id: &str) -> String {
        format!("user:prompt:{user_id}")
    }

    pub fn joined_text(&self) -> String {
        self.text.join(" ")
    }

    pub fn to_fields(&self) -> Result<Vec<(String, String)>, StoreError> {
        Ok(vec![
            ("id".to_string(), self.id.clone()),
            ("userId".to_string(), self.user_id.clone()),
            ("text".to_string(), serde_json::to_string(&self.text)?),
            ("createdAt".to_string(), self.created_at.to_string()),
        ])
    }

    pub fn from_fields(mut fields: HashMap<String, String>) -> Result<Option<Self>, StoreError> {
        if fields.is_empty() {
            return Ok(None);
        }

        let id = take_required(&mut fields, "id", "prompt")?;
        let text = match fields.remove("text") {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Vec::new(),
        };

        Ok(Some(Self {
            user_id: take_required(&mut fields, "userId", "prompt")?,
            created_at: parse_timestamp(fields.remove("createdAt"), &id)?,
            text,
            id,
        }))
    }
}
