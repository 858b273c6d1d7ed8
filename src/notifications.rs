use serde_json::{json, Value};

use crate::backend::{tables, Cond, Direction, DynBackend, Select, Subscription};
use crate::domain::UserNotification;
use crate::error::AppResult;
use crate::identity::IdentityResolver;

pub fn unread_total(notifications: &[UserNotification]) -> usize {
    notifications.iter().filter(|n| !n.read).count()
}

/// Id-based upsert of a pushed notification row. Returns the
/// notification when it was new to the list.
pub fn apply_event(
    notifications: &mut Vec<UserNotification>,
    row: &Value,
) -> AppResult<Option<UserNotification>> {
    let notification: UserNotification = serde_json::from_value(row.clone())?;
    if let Some(existing) = notifications.iter_mut().find(|n| n.id == notification.id) {
        *existing = notification;
        Ok(None)
    } else {
        notifications.insert(0, notification.clone());
        Ok(Some(notification))
    }
}

#[derive(Clone)]
pub struct NotificationService {
    backend: DynBackend,
    identity: IdentityResolver,
}

impl NotificationService {
    pub fn new(backend: DynBackend, identity: IdentityResolver) -> Self {
        Self { backend, identity }
    }

    pub async fn list(&self) -> AppResult<Vec<UserNotification>> {
        let viewer = self.identity.resolve_viewer(self.backend.as_ref()).await?;
        let rows = self
            .backend
            .select(
                tables::NOTIFICATIONS,
                Select::new()
                    .filter(Cond::eq("recipient_id", viewer.key()))
                    .order("created_at", Direction::Desc),
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value(row) {
                Ok(notification) => Some(notification),
                Err(e) => {
                    tracing::warn!("Skipping malformed notification row: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Mark the given notifications read, by id list. No-op when
    /// everything is already read.
    pub async fn mark_all_read(&self, notifications: &[UserNotification]) -> AppResult<u64> {
        let unread_ids: Vec<Value> = notifications
            .iter()
            .filter(|n| !n.read)
            .map(|n| Value::String(n.id.clone()))
            .collect();
        if unread_ids.is_empty() {
            return Ok(0);
        }
        self.backend
            .update(
                tables::NOTIFICATIONS,
                json!({"read": true}),
                vec![Cond::is_in("id", unread_ids)],
            )
            .await
    }

    /// Subscribe to notification inserts addressed to the viewer.
    pub async fn watch(&self) -> AppResult<Subscription> {
        let viewer = self.identity.resolve_viewer(self.backend.as_ref()).await?;
        self.backend
            .subscribe(
                tables::NOTIFICATIONS,
                vec![Cond::eq("recipient_id", viewer.key())],
            )
            .await
    }
}
