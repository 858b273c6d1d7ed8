use chrono::Utc;
use serde_json::{json, Value};

use crate::backend::{
    normalize, tables, Cond, Direction, DynBackend, Select, Subscription,
};
use crate::domain::{Conversation, Message, NotificationKind, OtherParty, Post};
use crate::error::{AppError, AppResult, FieldError};
use crate::identity::IdentityResolver;
use crate::store::LocalStore;

/// One row of the conversation list.
#[derive(Debug)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub unread: usize,
}

#[derive(Debug)]
pub struct OpenConversation {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

#[derive(Debug, PartialEq)]
pub struct InterestOutcome {
    pub conversation_id: String,
    pub created_conversation: bool,
}

/// Unread = not yet read and not authored by the viewer, computed over
/// normalized messages so both wire shapes count the same way.
pub fn unread_count(messages: &[Message], viewer_key: &str) -> usize {
    messages
        .iter()
        .filter(|m| !m.read && !m.is_from(viewer_key))
        .count()
}

/// Id-based upsert of a pushed row into the visible list. Returns true
/// when the message was new; a duplicate echo of an optimistic local
/// insert replaces in place instead of appending twice.
pub fn upsert_message(messages: &mut Vec<Message>, message: Message) -> bool {
    if let Some(existing) = messages.iter_mut().find(|m| m.id == message.id) {
        *existing = message;
        false
    } else {
        messages.push(message);
        true
    }
}

#[derive(Clone)]
pub struct ConversationService {
    backend: DynBackend,
    store: LocalStore,
    identity: IdentityResolver,
}

impl ConversationService {
    pub fn new(backend: DynBackend, store: LocalStore, identity: IdentityResolver) -> Self {
        Self {
            backend,
            store,
            identity,
        }
    }

    fn participant_conds(key: &str) -> Vec<Cond> {
        vec![
            Cond::eq("user1_id", key),
            Cond::eq("user2_id", key),
            Cond::eq("participant1_id", key),
            Cond::eq("participant2_id", key),
        ]
    }

    /// Conversations the viewer is part of, most recent activity first,
    /// with unread counts. Conversations started from this device while
    /// anonymous are folded in even if a participant column match
    /// misses them.
    pub async fn list(&self) -> AppResult<Vec<ConversationSummary>> {
        let viewer = self.identity.resolve_viewer(self.backend.as_ref()).await?;
        let key = viewer.key().to_string();

        let rows = self
            .backend
            .select(
                tables::CONVERSATIONS,
                Select::new()
                    .any_of(Self::participant_conds(&key))
                    .order("last_message_at", Direction::Desc),
            )
            .await?;
        let mut conversations = parse_conversations(rows);

        for tracked_id in self.store.anonymous_conversations()? {
            if conversations.iter().any(|c| c.id == tracked_id) {
                continue;
            }
            let rows = self
                .backend
                .select(
                    tables::CONVERSATIONS,
                    Select::new().filter(Cond::eq("id", tracked_id.clone())),
                )
                .await?;
            conversations.extend(parse_conversations(rows));
        }

        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let messages = self.fetch_messages(&conversation.id).await?;
            summaries.push(ConversationSummary {
                unread: unread_count(&messages, &key),
                conversation,
            });
        }
        Ok(summaries)
    }

    /// Open a conversation: fetch its messages oldest-first and mark
    /// the unread incoming ones read.
    pub async fn open(&self, conversation_id: &str) -> AppResult<OpenConversation> {
        let viewer = self.identity.resolve_viewer(self.backend.as_ref()).await?;
        let conversation = self.fetch_conversation(conversation_id).await?;
        let messages = self.fetch_messages(conversation_id).await?;

        self.mark_conversation_read(conversation_id, viewer.key())
            .await?;

        Ok(OpenConversation {
            conversation,
            messages,
        })
    }

    /// Open the conversation attached to a listing, when the viewer is
    /// part of one. Arriving from a notification without an existing
    /// thread is normal, hence the Option.
    pub async fn open_by_post(&self, post_id: &str) -> AppResult<Option<OpenConversation>> {
        let viewer = self.identity.resolve_viewer(self.backend.as_ref()).await?;
        let rows = self
            .backend
            .select(
                tables::CONVERSATIONS,
                Select::new()
                    .filter(Cond::eq("post_id", post_id))
                    .any_of(Self::participant_conds(viewer.key())),
            )
            .await?;
        match parse_conversations(rows).into_iter().next() {
            Some(conversation) => Ok(Some(self.open(&conversation.id).await?)),
            None => Ok(None),
        }
    }

    pub async fn send(&self, conversation_id: &str, content: &str) -> AppResult<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::Validation(vec![FieldError {
                field: "message",
                message: "Message cannot be empty",
            }]));
        }

        let viewer = self.identity.resolve_viewer(self.backend.as_ref()).await?;
        let conversation = self.fetch_conversation(conversation_id).await?;

        let stored = self
            .backend
            .insert(
                tables::MESSAGES,
                vec![json!({
                    "conversation_id": conversation_id,
                    "sender_id": viewer.key(),
                    "content": content,
                    "read": false,
                    "created_at": Utc::now(),
                })],
            )
            .await?;
        let message = normalize::message(
            &stored
                .into_iter()
                .next()
                .ok_or_else(|| AppError::Backend("insert returned no row".into()))?,
        )?;

        self.backend
            .update(
                tables::CONVERSATIONS,
                json!({"last_message_at": Utc::now()}),
                vec![Cond::eq("id", conversation_id)],
            )
            .await?;

        if let OtherParty::Known(recipient) = conversation.other_party(viewer.key()) {
            let preview: String = content.chars().take(50).collect();
            let ellipsis = if content.chars().count() > 50 { "..." } else { "" };
            let notification = json!({
                "recipient_id": recipient.id,
                "sender_id": viewer.key(),
                "type": NotificationKind::Message,
                "content": format!("New message: \"{}{}\"", preview, ellipsis),
                "post_id": conversation.post_id,
                "read": false,
                "created_at": Utc::now(),
            });
            if let Err(e) = self
                .backend
                .insert(tables::NOTIFICATIONS, vec![notification])
                .await
            {
                tracing::warn!("Could not notify recipient about message: {}", e);
            }
        }

        Ok(message)
    }

    /// Express interest in a listing: notify the owner, find or create
    /// the conversation pair, and open with a canned greeting. The
    /// steps are sequential with no rollback; a failure mid-way leaves
    /// earlier writes in place.
    pub async fn express_interest(&self, post: &Post) -> AppResult<InterestOutcome> {
        let viewer = self.identity.resolve_viewer(self.backend.as_ref()).await?;
        let owner = post
            .owner_key()
            .ok_or_else(|| AppError::Backend("listing has no owner identity".into()))?;
        if owner == viewer.key() {
            return Err(AppError::Validation(vec![FieldError {
                field: "post",
                message: "This is your own listing",
            }]));
        }

        self.backend
            .insert(
                tables::NOTIFICATIONS,
                vec![json!({
                    "recipient_id": owner,
                    "sender_id": viewer.key(),
                    "type": NotificationKind::Interest,
                    "content": format!("Someone is interested in your listing: \"{}\"", post.title),
                    "post_id": post.id,
                    "read": false,
                    "created_at": Utc::now(),
                })],
            )
            .await?;

        let rows = self
            .backend
            .select(
                tables::CONVERSATIONS,
                Select::new().any_of(Self::participant_conds(viewer.key())),
            )
            .await?;
        let existing = parse_conversations(rows)
            .into_iter()
            .find(|c| c.involves(owner));

        let (conversation_id, created) = match existing {
            Some(conversation) => (conversation.id, false),
            None => {
                // Only the newer column layout is ever written.
                let display_name = self.identity.display_label(&viewer)?;
                let stored = self
                    .backend
                    .insert(
                        tables::CONVERSATIONS,
                        vec![json!({
                            "participant1_id": viewer.key(),
                            "participant1_name": display_name,
                            "participant2_id": owner,
                            "participant2_name": Value::Null,
                            "post_id": post.id,
                            "post_title": post.title,
                            "last_message_at": Utc::now(),
                        })],
                    )
                    .await?;
                let conversation = normalize::conversation(
                    &stored
                        .into_iter()
                        .next()
                        .ok_or_else(|| AppError::Backend("insert returned no row".into()))?,
                )?;
                (conversation.id, true)
            }
        };

        self.backend
            .insert(
                tables::MESSAGES,
                vec![json!({
                    "conversation_id": conversation_id,
                    "sender_id": viewer.key(),
                    "content": format!("Hi! I'm interested in your listing \"{}\".", post.title),
                    "read": false,
                    "created_at": Utc::now(),
                })],
            )
            .await?;

        if viewer.is_anonymous() {
            self.store.track_conversation(&conversation_id)?;
        }

        Ok(InterestOutcome {
            conversation_id,
            created_conversation: created,
        })
    }

    /// Subscribe to message inserts for one conversation.
    pub async fn watch(&self, conversation_id: &str) -> AppResult<Subscription> {
        self.backend
            .subscribe(
                tables::MESSAGES,
                vec![Cond::eq("conversation_id", conversation_id)],
            )
            .await
    }

    /// Apply a pushed row to the open message list. Non-viewer messages
    /// trigger a mark-as-read request, mirroring the open-conversation
    /// behavior.
    pub async fn apply_event(
        &self,
        messages: &mut Vec<Message>,
        row: &Value,
        viewer_key: &str,
    ) -> AppResult<Option<Message>> {
        let message = normalize::message(row)?;
        let appended = upsert_message(messages, message.clone());
        if !message.is_from(viewer_key) && !message.read {
            self.mark_message_read(&message.id).await?;
        }
        Ok(appended.then_some(message))
    }

    pub async fn mark_message_read(&self, message_id: &str) -> AppResult<()> {
        self.backend
            .update(
                tables::MESSAGES,
                json!({"read": true}),
                vec![Cond::eq("id", message_id)],
            )
            .await?;
        Ok(())
    }

    async fn mark_conversation_read(&self, conversation_id: &str, viewer_key: &str) -> AppResult<()> {
        self.backend
            .update(
                tables::MESSAGES,
                json!({"read": true}),
                vec![
                    Cond::eq("conversation_id", conversation_id),
                    Cond::neq("sender_id", viewer_key),
                    Cond::eq("read", false),
                ],
            )
            .await?;
        Ok(())
    }

    /// Display name for the other side: the normalized record's name
    /// when it carries one, else a profile lookup, else the generic
    /// placeholder.
    pub async fn other_party_label(&self, conversation: &Conversation) -> AppResult<String> {
        let viewer = self.identity.resolve_viewer(self.backend.as_ref()).await?;
        match conversation.other_party(viewer.key()) {
            OtherParty::Known(participant) => {
                if let Some(name) = &participant.display_name {
                    return Ok(name.clone());
                }
                let rows = self
                    .backend
                    .select(
                        tables::PROFILES,
                        Select::new().filter(Cond::eq("id", participant.id.clone())),
                    )
                    .await?;
                Ok(rows
                    .first()
                    .and_then(|p| p.get("username"))
                    .and_then(|u| u.as_str())
                    .unwrap_or("Neighbor")
                    .to_string())
            }
            OtherParty::Unknown => Ok("Neighbor".to_string()),
        }
    }

    async fn fetch_conversation(&self, conversation_id: &str) -> AppResult<Conversation> {
        let rows = self
            .backend
            .select(
                tables::CONVERSATIONS,
                Select::new().filter(Cond::eq("id", conversation_id)),
            )
            .await?;
        let row = rows.into_iter().next().ok_or(AppError::NotFound)?;
        normalize::conversation(&row)
    }

    async fn fetch_messages(&self, conversation_id: &str) -> AppResult<Vec<Message>> {
        let rows = self
            .backend
            .select(
                tables::MESSAGES,
                Select::new()
                    .filter(Cond::eq("conversation_id", conversation_id))
                    .order("created_at", Direction::Asc),
            )
            .await?;
        rows.iter().map(normalize::message).collect()
    }
}

/// Normalize rows, skipping ones matching no known layout.
fn parse_conversations(rows: Vec<Value>) -> Vec<Conversation> {
    rows.iter()
        .filter_map(|row| match normalize::conversation(row) {
            Ok(conversation) => Some(conversation),
            Err(e) => {
                tracing::warn!("Skipping malformed conversation row: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(id: &str, sender: &str, read: bool) -> Message {
        Message {
            id: id.into(),
            conversation_id: "c1".into(),
            sender_id: sender.into(),
            content: "hi".into(),
            read,
            created_at: chrono::Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn unread_counts_only_unread_incoming() {
        let messages = vec![
            message("m1", "them", false),
            message("m2", "them", true),
            message("m3", "me", false),
        ];
        assert_eq!(unread_count(&messages, "me"), 1);
        assert_eq!(unread_count(&messages, "them"), 1);
    }

    #[test]
    fn upsert_appends_new_and_replaces_duplicates() {
        let mut messages = vec![message("m1", "me", false)];

        assert!(upsert_message(&mut messages, message("m2", "them", false)));
        assert_eq!(messages.len(), 2);

        // Realtime echo of an already-applied message must not duplicate.
        assert!(!upsert_message(&mut messages, message("m2", "them", true)));
        assert_eq!(messages.len(), 2);
        assert!(messages[1].read);
    }
}
