//! Wire-shape normalization. The hosted Conversations table has two
//! observed column layouts: the legacy paired user-id columns and the
//! newer participant id/name columns. Each raw row is mapped to the
//! single normalized [`Conversation`] here, once, so nothing downstream
//! ever inspects column presence again.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::domain::{Conversation, Message, Participant};
use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize)]
struct RawConversation {
    id: String,

    // Legacy layout
    #[serde(default)]
    user1_id: Option<String>,
    #[serde(default)]
    user2_id: Option<String>,
    #[serde(default)]
    user1_name: Option<String>,
    #[serde(default)]
    user2_name: Option<String>,

    // Newer layout; participant ids are auth ids or anonymous tokens
    #[serde(default)]
    participant1_id: Option<String>,
    #[serde(default)]
    participant1_name: Option<String>,
    #[serde(default)]
    participant2_id: Option<String>,
    #[serde(default)]
    participant2_name: Option<String>,

    #[serde(default)]
    post_id: Option<String>,
    #[serde(default)]
    post_title: Option<String>,
    #[serde(default)]
    last_message_at: Option<DateTime<Utc>>,
}

pub fn conversation(row: &Value) -> AppResult<Conversation> {
    let raw: RawConversation = serde_json::from_value(row.clone())?;

    // The newer layout is detected by its marker column; otherwise the
    // row must carry the legacy pair.
    let participants = if raw.participant1_id.is_some() {
        let p1 = raw
            .participant1_id
            .ok_or_else(|| shape_error(&raw.id))?;
        let p2 = raw
            .participant2_id
            .ok_or_else(|| shape_error(&raw.id))?;
        [
            Participant {
                id: p1,
                display_name: raw.participant1_name,
            },
            Participant {
                id: p2,
                display_name: raw.participant2_name,
            },
        ]
    } else {
        let p1 = raw.user1_id.ok_or_else(|| shape_error(&raw.id))?;
        let p2 = raw.user2_id.ok_or_else(|| shape_error(&raw.id))?;
        [
            Participant {
                id: p1,
                display_name: raw.user1_name,
            },
            Participant {
                id: p2,
                display_name: raw.user2_name,
            },
        ]
    };

    Ok(Conversation {
        id: raw.id,
        participants,
        post_id: raw.post_id,
        post_title: raw.post_title,
        last_message_at: raw.last_message_at,
    })
}

fn shape_error(id: &str) -> AppError {
    AppError::Backend(format!(
        "conversation {} matches no known column layout",
        id
    ))
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: String,
    conversation_id: String,
    sender_id: String,
    content: String,
    #[serde(default)]
    read: Option<bool>,
    #[serde(default)]
    read_by_recipient: Option<bool>,
    created_at: DateTime<Utc>,
}

pub fn message(row: &Value) -> AppResult<Message> {
    let raw: RawMessage = serde_json::from_value(row.clone())?;
    Ok(Message {
        id: raw.id,
        conversation_id: raw.conversation_id,
        sender_id: raw.sender_id,
        content: raw.content,
        read: raw.read.or(raw.read_by_recipient).unwrap_or(false),
        created_at: raw.created_at,
    })
}
