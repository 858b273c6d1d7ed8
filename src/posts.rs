use chrono::Utc;
use serde_json::json;

use crate::backend::{tables, Cond, Direction, DynBackend, Select};
use crate::domain::{Comment, NotificationKind, Post, PostImage};
use crate::error::{AppError, AppResult};
use crate::feed::parse_posts;
use crate::identity::{Identity, IdentityResolver};
use crate::store::LocalStore;

/// Everything the listing detail view shows.
#[derive(Debug)]
pub struct PostDetail {
    pub post: Post,
    pub images: Vec<PostImage>,
    pub comments: Vec<Comment>,
}

impl PostDetail {
    /// Image URLs to display, falling back to the legacy single-image
    /// column for listings that predate PostImage rows.
    pub fn display_images(&self) -> Vec<&str> {
        if self.images.is_empty() {
            self.post.image_url.as_deref().into_iter().collect()
        } else {
            self.images.iter().map(|i| i.image_url.as_str()).collect()
        }
    }
}

#[derive(Clone)]
pub struct PostService {
    backend: DynBackend,
    store: LocalStore,
    identity: IdentityResolver,
}

impl PostService {
    pub fn new(backend: DynBackend, store: LocalStore, identity: IdentityResolver) -> Self {
        Self {
            backend,
            store,
            identity,
        }
    }

    pub async fn detail(&self, post_id: &str) -> AppResult<PostDetail> {
        let rows = self
            .backend
            .select(tables::POSTS, Select::new().filter(Cond::eq("id", post_id)))
            .await?;
        let post: Post =
            serde_json::from_value(rows.into_iter().next().ok_or(AppError::NotFound)?)?;

        let images = self
            .backend
            .select(
                tables::POST_IMAGES,
                Select::new()
                    .filter(Cond::eq("post_id", post_id))
                    .order("order_index", Direction::Asc),
            )
            .await?
            .into_iter()
            .map(|row| Ok(serde_json::from_value(row)?))
            .collect::<AppResult<Vec<PostImage>>>()?;

        let comments = self
            .backend
            .select(
                tables::COMMENTS,
                Select::new()
                    .filter(Cond::eq("post_id", post_id))
                    .order("created_at", Direction::Asc),
            )
            .await?
            .into_iter()
            .map(|row| Ok(serde_json::from_value(row)?))
            .collect::<AppResult<Vec<Comment>>>()?;

        Ok(PostDetail {
            post,
            images,
            comments,
        })
    }

    /// Insert the comment, bump the listing's comment counter, and
    /// notify the owner. The notification is best-effort; its failure
    /// never undoes the comment.
    pub async fn add_comment(&self, post_id: &str, content: &str) -> AppResult<Comment> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::Validation(vec![crate::error::FieldError {
                field: "comment",
                message: "Comment cannot be empty",
            }]));
        }

        let detail = self.detail(post_id).await?;
        let viewer = self.identity.resolve_viewer(self.backend.as_ref()).await?;

        let mut row = json!({
            "post_id": post_id,
            "content": content,
            "created_at": Utc::now(),
        });
        let obj = row.as_object_mut().unwrap();
        match &viewer {
            Identity::User(id) => {
                let name = self
                    .backend
                    .current_user()
                    .await?
                    .and_then(|u| u.email)
                    .and_then(|e| e.split('@').next().map(str::to_string))
                    .unwrap_or_else(|| "User".to_string());
                obj.insert("user_id".into(), json!(id));
                obj.insert("user_name".into(), json!(name));
            }
            Identity::Anonymous(id) => {
                obj.insert("anonymous_id".into(), json!(id));
                obj.insert("user_name".into(), json!(self.identity.display_label(&viewer)?));
            }
        }

        let stored = self.backend.insert(tables::COMMENTS, vec![row]).await?;
        let comment: Comment = serde_json::from_value(
            stored
                .into_iter()
                .next()
                .ok_or_else(|| AppError::Backend("insert returned no row".into()))?,
        )?;

        self.backend
            .update(
                tables::POSTS,
                json!({"comments": detail.post.comments + 1}),
                vec![Cond::eq("id", post_id)],
            )
            .await?;

        if let Some(owner) = detail.post.owner_key() {
            if owner != viewer.key() {
                let notification = json!({
                    "recipient_id": owner,
                    "sender_id": viewer.key(),
                    "type": NotificationKind::Comment,
                    "content": format!("New comment on your listing: \"{}\"", detail.post.title),
                    "post_id": post_id,
                    "read": false,
                    "created_at": Utc::now(),
                });
                if let Err(e) = self
                    .backend
                    .insert(tables::NOTIFICATIONS, vec![notification])
                    .await
                {
                    tracing::warn!("Could not notify listing owner about comment: {}", e);
                }
            }
        }

        Ok(comment)
    }

    pub async fn like(&self, post_id: &str) -> AppResult<i64> {
        let rows = self
            .backend
            .select(tables::POSTS, Select::new().filter(Cond::eq("id", post_id)))
            .await?;
        let post: Post =
            serde_json::from_value(rows.into_iter().next().ok_or(AppError::NotFound)?)?;
        let likes = post.likes + 1;
        self.backend
            .update(
                tables::POSTS,
                json!({ "likes": likes }),
                vec![Cond::eq("id", post_id)],
            )
            .await?;
        Ok(likes)
    }

    /// Listings owned by the viewer: the backend fetch is the source of
    /// truth, and locally tracked references whose row is gone are
    /// pruned.
    pub async fn my_posts(&self) -> AppResult<Vec<Post>> {
        let viewer = self.identity.resolve_viewer(self.backend.as_ref()).await?;
        let owner_cond = match &viewer {
            Identity::User(id) => Cond::eq("user_id", id.clone()),
            Identity::Anonymous(id) => Cond::eq("anonymous_id", id.clone()),
        };
        let rows = self
            .backend
            .select(
                tables::POSTS,
                Select::new()
                    .filter(owner_cond)
                    .order("created_at", Direction::Desc),
            )
            .await?;
        let posts = parse_posts(rows);

        for stale in self
            .store
            .owned_posts()?
            .iter()
            .filter(|r| r.owner_key == viewer.key() && !posts.iter().any(|p| p.id == r.id))
        {
            tracing::debug!("Pruning local reference to deleted listing {}", stale.id);
            self.store.remove_owned_post(&stale.id)?;
        }

        Ok(posts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::Backend;
    use std::sync::Arc;

    fn service() -> (PostService, Arc<MemoryBackend>, LocalStore) {
        let backend = Arc::new(MemoryBackend::new());
        let store = LocalStore::in_memory();
        let identity = IdentityResolver::new(store.clone());
        (
            PostService::new(backend.clone(), store.clone(), identity),
            backend,
            store,
        )
    }

    async fn seed_post(backend: &MemoryBackend, id: &str, owner: &str) {
        backend
            .insert(
                tables::POSTS,
                vec![json!({
                    "id": id,
                    "offer_type": "offering",
                    "content_type": "item",
                    "title": "Ladder",
                    "description": "8ft",
                    "category": "Tools",
                    "condition": "Good",
                    "contact_method": "email",
                    "contact_info": "a@b.c",
                    "is_anonymous": true,
                    "anonymous_id": owner,
                    "likes": 0,
                    "comments": 0,
                    "created_at": "2026-01-01T00:00:00Z"
                })],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn detail_falls_back_to_legacy_image_url() {
        let (service, backend, _) = service();
        seed_post(&backend, "p1", "anon-owner").await;
        backend
            .update(
                tables::POSTS,
                json!({"image_url": "legacy.jpg"}),
                vec![Cond::eq("id", "p1")],
            )
            .await
            .unwrap();

        let detail = service.detail("p1").await.unwrap();
        assert_eq!(detail.display_images(), vec!["legacy.jpg"]);

        backend
            .insert(
                tables::POST_IMAGES,
                vec![
                    json!({"post_id": "p1", "image_url": "b.jpg", "order_index": 1}),
                    json!({"post_id": "p1", "image_url": "a.jpg", "order_index": 0}),
                ],
            )
            .await
            .unwrap();
        let detail = service.detail("p1").await.unwrap();
        assert_eq!(detail.display_images(), vec!["a.jpg", "b.jpg"]);
    }

    #[tokio::test]
    async fn add_comment_bumps_counter_and_notifies_owner() {
        let (service, backend, _) = service();
        seed_post(&backend, "p1", "anon-owner").await;

        let comment = service.add_comment("p1", " Nice ladder ").await.unwrap();
        assert_eq!(comment.content, "Nice ladder");
        assert_eq!(comment.author_label(), "Anonymous");

        let detail = service.detail("p1").await.unwrap();
        assert_eq!(detail.post.comments, 1);
        assert_eq!(detail.comments.len(), 1);
        assert_eq!(backend.row_count(tables::NOTIFICATIONS), 1);
    }

    #[tokio::test]
    async fn own_comment_does_not_notify_self() {
        let (service, backend, store) = service();
        let identity = IdentityResolver::new(store);
        let anon = identity.get_or_create_anonymous_id().unwrap();
        seed_post(&backend, "p1", &anon).await;

        service.add_comment("p1", "bump").await.unwrap();
        assert_eq!(backend.row_count(tables::NOTIFICATIONS), 0);
    }

    #[tokio::test]
    async fn empty_comment_is_rejected_before_any_write() {
        let (service, backend, _) = service();
        seed_post(&backend, "p1", "anon-owner").await;

        let err = service.add_comment("p1", "   ").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(backend.row_count(tables::COMMENTS), 0);
    }

    #[tokio::test]
    async fn like_increments() {
        let (service, backend, _) = service();
        seed_post(&backend, "p1", "anon-owner").await;
        assert_eq!(service.like("p1").await.unwrap(), 1);
        assert_eq!(service.like("p1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn my_posts_prunes_stale_local_references() {
        let (service, backend, store) = service();
        let identity = IdentityResolver::new(store.clone());
        let anon = identity.get_or_create_anonymous_id().unwrap();

        seed_post(&backend, "kept", &anon).await;
        store
            .add_owned_post(crate::store::OwnedPostRef {
                id: "kept".into(),
                title: "Ladder".into(),
                owner_key: anon.clone(),
                created_at: Utc::now(),
            })
            .unwrap();
        store
            .add_owned_post(crate::store::OwnedPostRef {
                id: "gone".into(),
                title: "Old".into(),
                owner_key: anon.clone(),
                created_at: Utc::now(),
            })
            .unwrap();

        let posts = service.my_posts().await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "kept");

        let refs = store.owned_posts().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].id, "kept");
    }
}
