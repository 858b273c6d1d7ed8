use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::backend::{tables, Cond, Direction, DynBackend, Select, IMAGE_BUCKET};
use crate::domain::{ContactMethod, ContentType, OfferType, Post, PostImage, RateType};
use crate::error::{AppError, AppResult, FieldError};
use crate::identity::{Identity, IdentityResolver};
use crate::store::{keys, EditIntent, LocalStore, OwnedPostRef};

pub const MAX_IMAGES: usize = 5;

/// In-progress listing form. Persisted to the local store so a half
/// finished draft survives restarts; cleared on successful submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostDraft {
    pub offer_type: OfferType,
    pub content_type: ContentType,
    pub title: String,
    pub description: String,
    pub contact_method: ContactMethod,
    pub contact_info: String,
    pub is_anonymous: bool,

    // Item listings
    pub item_category: String,
    pub condition: String,
    pub looking_for: String,
    pub can_offer: String,

    // Service listings
    pub service_category: String,
    pub experience_level: String,
    pub availability: String,
    pub rate_type: RateType,
    pub rate_amount: String,
    pub rate_notes: String,
}

impl Default for PostDraft {
    fn default() -> Self {
        Self {
            offer_type: OfferType::Offering,
            content_type: ContentType::Item,
            title: String::new(),
            description: String::new(),
            contact_method: ContactMethod::Email,
            contact_info: String::new(),
            is_anonymous: true,
            item_category: String::new(),
            condition: "Good".to_string(),
            looking_for: String::new(),
            can_offer: String::new(),
            service_category: String::new(),
            experience_level: "Intermediate".to_string(),
            availability: String::new(),
            rate_type: RateType::Trade,
            rate_amount: String::new(),
            rate_notes: String::new(),
        }
    }
}

/// Required-field rules per content-type/offer-type combination.
/// Violations block submission before any backend call.
pub fn validate(draft: &PostDraft) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if draft.title.trim().is_empty() {
        errors.push(FieldError {
            field: "title",
            message: "Title is required",
        });
    }
    if draft.description.trim().is_empty() {
        errors.push(FieldError {
            field: "description",
            message: "Description is required",
        });
    }
    if draft.contact_info.trim().is_empty() {
        errors.push(FieldError {
            field: "contact_info",
            message: "Contact information is required",
        });
    }

    match draft.content_type {
        ContentType::Item => {
            if draft.item_category.is_empty() {
                errors.push(FieldError {
                    field: "item_category",
                    message: "Please select a category",
                });
            }
            if draft.offer_type == OfferType::Offering && draft.condition.is_empty() {
                errors.push(FieldError {
                    field: "condition",
                    message: "Please select a condition",
                });
            }
        }
        ContentType::Service => {
            if draft.service_category.is_empty() {
                errors.push(FieldError {
                    field: "service_category",
                    message: "Please select a service category",
                });
            }
            if draft.availability.trim().is_empty() {
                errors.push(FieldError {
                    field: "availability",
                    message: "Availability is required",
                });
            }
            if draft.rate_type != RateType::Trade && draft.rate_amount.trim().is_empty() {
                errors.push(FieldError {
                    field: "rate_amount",
                    message: "Please specify a rate amount",
                });
            }
        }
    }

    errors
}

/// One image picked for upload.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub file_name: String,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct UploadFailure {
    pub file_name: String,
    pub error: String,
}

#[derive(Debug)]
pub struct SubmitOutcome {
    pub post_id: String,
    pub image_urls: Vec<String>,
    pub failed_uploads: Vec<UploadFailure>,
}

struct UploadedImage {
    url: String,
    path: String,
}

#[derive(Clone)]
pub struct ComposerService {
    backend: DynBackend,
    store: LocalStore,
    identity: IdentityResolver,
}

impl ComposerService {
    pub fn new(backend: DynBackend, store: LocalStore, identity: IdentityResolver) -> Self {
        Self {
            backend,
            store,
            identity,
        }
    }

    pub fn draft(&self) -> AppResult<Option<PostDraft>> {
        self.store.get(keys::DRAFT_POST)
    }

    pub fn save_draft(&self, draft: &PostDraft) -> AppResult<()> {
        self.store.set(keys::DRAFT_POST, draft)
    }

    pub fn clear_draft(&self) -> AppResult<()> {
        self.store.remove(keys::DRAFT_POST)
    }

    /// Create the listing: upload images (each failure isolated), then
    /// the Post row, then its PostImage rows. The PostImage inserts need
    /// the Post id, hence the order.
    pub async fn submit(
        &self,
        draft: &PostDraft,
        images: Vec<ImageInput>,
    ) -> AppResult<SubmitOutcome> {
        let mut errors = validate(draft);
        if images.len() > MAX_IMAGES {
            errors.push(FieldError {
                field: "images",
                message: "At most 5 images per listing",
            });
        }
        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }

        let viewer = self.identity.resolve_viewer(self.backend.as_ref()).await?;

        let (uploaded, failed_uploads) = self.upload_images(images).await;

        let mut row = draft_to_row(draft, &viewer);
        if let Some(first) = uploaded.first() {
            row["image_url"] = json!(first.url);
        }

        let stored = self.backend.insert(tables::POSTS, vec![row]).await?;
        let post: Post = serde_json::from_value(
            stored
                .into_iter()
                .next()
                .ok_or_else(|| AppError::Backend("insert returned no row".into()))?,
        )?;

        if !uploaded.is_empty() {
            let image_rows: Vec<Value> = uploaded
                .iter()
                .enumerate()
                .map(|(index, image)| {
                    json!({
                        "post_id": post.id,
                        "image_url": image.url,
                        "storage_path": image.path,
                        "order_index": index as i64,
                    })
                })
                .collect();
            self.backend.insert(tables::POST_IMAGES, image_rows).await?;
        }

        self.store.add_owned_post(OwnedPostRef {
            id: post.id.clone(),
            title: post.title.clone(),
            owner_key: viewer.key().to_string(),
            created_at: post.created_at,
        })?;
        self.clear_draft()?;

        Ok(SubmitOutcome {
            post_id: post.id,
            image_urls: uploaded.into_iter().map(|i| i.url).collect(),
            failed_uploads,
        })
    }

    /// Upload in parallel; survivors keep their relative order, each
    /// failure is reported per file and aborts nothing else.
    async fn upload_images(
        &self,
        images: Vec<ImageInput>,
    ) -> (Vec<UploadedImage>, Vec<UploadFailure>) {
        let results = futures::future::join_all(images.into_iter().map(|image| {
            let backend = self.backend.clone();
            async move {
                let ext = std::path::Path::new(&image.file_name)
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("jpg")
                    .to_string();
                let path = format!("{}.{}", uuid::Uuid::now_v7().simple(), ext);
                let content_type = mime_guess::from_path(&image.file_name)
                    .first_or_octet_stream()
                    .to_string();
                match backend
                    .upload_file(IMAGE_BUCKET, &path, image.data, &content_type)
                    .await
                {
                    Ok(()) => Ok(UploadedImage {
                        url: backend.public_url(IMAGE_BUCKET, &path),
                        path,
                    }),
                    Err(e) => Err(UploadFailure {
                        file_name: image.file_name,
                        error: e.to_string(),
                    }),
                }
            }
        }))
        .await;

        let mut uploaded = Vec::new();
        let mut failed = Vec::new();
        for result in results {
            match result {
                Ok(image) => uploaded.push(image),
                Err(failure) => {
                    tracing::warn!("Image upload failed for {}: {}", failure.file_name, failure.error);
                    failed.push(failure);
                }
            }
        }
        (uploaded, failed)
    }

    /// Open the editor: refetch the listing, check ownership against
    /// the viewer, cache the edit intent for the final authorization
    /// check at submit time.
    pub async fn begin_edit(&self, post_id: &str) -> AppResult<(Post, PostDraft)> {
        let post = self.fetch_post(post_id).await?;
        let viewer = self.identity.resolve_viewer(self.backend.as_ref()).await?;
        if post.owner_key() != Some(viewer.key()) {
            return Err(AppError::Unauthorized);
        }
        self.store.set_edit_intent(&EditIntent {
            post_id: post.id.clone(),
            owner_key: viewer.key().to_string(),
        })?;
        Ok((post.clone(), draft_from_post(&post)))
    }

    /// Apply an edit. Ownership is re-derived from a fresh fetch and
    /// the cached intent, and the update filter re-asserts the owner
    /// column so the server can reject a stale or forged intent.
    pub async fn submit_edit(&self, post_id: &str, draft: &PostDraft) -> AppResult<()> {
        let errors = validate(draft);
        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }

        let intent = self
            .store
            .edit_intent()?
            .filter(|i| i.post_id == post_id)
            .ok_or(AppError::Unauthorized)?;
        let post = self.fetch_post(post_id).await?;
        let viewer = self.identity.resolve_viewer(self.backend.as_ref()).await?;
        if post.owner_key() != Some(viewer.key()) || intent.owner_key != viewer.key() {
            return Err(AppError::Unauthorized);
        }

        let mut patch = draft_to_row(draft, &viewer);
        if let Some(obj) = patch.as_object_mut() {
            // Creation-only columns stay untouched on edit; images are
            // managed through the image operations, not the form patch.
            obj.remove("created_at");
            obj.remove("likes");
            obj.remove("comments");
            obj.remove("image_url");
        }

        let updated = self
            .backend
            .update(
                tables::POSTS,
                patch,
                vec![Cond::eq("id", post_id), owner_cond(&viewer)],
            )
            .await?;
        if updated == 0 {
            return Err(AppError::Unauthorized);
        }

        self.store.update_owned_post(post_id, draft.title.trim())?;
        self.store.clear_edit_intent()?;
        Ok(())
    }

    /// Delete a listing and its images. Images first; they reference
    /// the post.
    pub async fn delete(&self, post_id: &str) -> AppResult<()> {
        let post = self.fetch_post(post_id).await?;
        let viewer = self.identity.resolve_viewer(self.backend.as_ref()).await?;
        if post.owner_key() != Some(viewer.key()) {
            return Err(AppError::Unauthorized);
        }

        self.backend
            .delete(tables::POST_IMAGES, vec![Cond::eq("post_id", post_id)])
            .await?;
        self.backend
            .delete(
                tables::POSTS,
                vec![Cond::eq("id", post_id), owner_cond(&viewer)],
            )
            .await?;
        self.store.remove_owned_post(post_id)?;
        Ok(())
    }

    /// Remove one image and close the ordering gap. The primary
    /// image_url follows the new first image.
    pub async fn remove_image(&self, post_id: &str, image_id: &str) -> AppResult<Vec<PostImage>> {
        let post = self.fetch_post(post_id).await?;
        let viewer = self.identity.resolve_viewer(self.backend.as_ref()).await?;
        if post.owner_key() != Some(viewer.key()) {
            return Err(AppError::Unauthorized);
        }

        let mut images = self.fetch_images(post_id).await?;
        let before = images.len();
        images.retain(|i| i.id != image_id);
        if images.len() == before {
            return Err(AppError::NotFound);
        }

        self.backend
            .delete(tables::POST_IMAGES, vec![Cond::eq("id", image_id)])
            .await?;
        let changed = renumber(&mut images);
        for image in &changed {
            self.backend
                .update(
                    tables::POST_IMAGES,
                    json!({"order_index": image.order_index}),
                    vec![Cond::eq("id", image.id.clone())],
                )
                .await?;
        }

        let primary = images.first().map(|i| i.image_url.clone());
        self.backend
            .update(
                tables::POSTS,
                json!({ "image_url": primary }),
                vec![Cond::eq("id", post_id)],
            )
            .await?;

        Ok(images)
    }

    /// Reorder to the given id sequence; order_index is recomputed
    /// contiguously from 0.
    pub async fn reorder_images(
        &self,
        post_id: &str,
        ordered_ids: &[String],
    ) -> AppResult<Vec<PostImage>> {
        let post = self.fetch_post(post_id).await?;
        let viewer = self.identity.resolve_viewer(self.backend.as_ref()).await?;
        if post.owner_key() != Some(viewer.key()) {
            return Err(AppError::Unauthorized);
        }

        let mut images = self.fetch_images(post_id).await?;
        images.sort_by_key(|image| {
            ordered_ids
                .iter()
                .position(|id| *id == image.id)
                .unwrap_or(usize::MAX)
        });
        let changed = renumber(&mut images);
        for image in &changed {
            self.backend
                .update(
                    tables::POST_IMAGES,
                    json!({"order_index": image.order_index}),
                    vec![Cond::eq("id", image.id.clone())],
                )
                .await?;
        }

        let primary = images.first().map(|i| i.image_url.clone());
        self.backend
            .update(
                tables::POSTS,
                json!({ "image_url": primary }),
                vec![Cond::eq("id", post_id)],
            )
            .await?;

        Ok(images)
    }

    async fn fetch_post(&self, post_id: &str) -> AppResult<Post> {
        let rows = self
            .backend
            .select(tables::POSTS, Select::new().filter(Cond::eq("id", post_id)))
            .await?;
        let row = rows.into_iter().next().ok_or(AppError::NotFound)?;
        Ok(serde_json::from_value(row)?)
    }

    async fn fetch_images(&self, post_id: &str) -> AppResult<Vec<PostImage>> {
        let rows = self
            .backend
            .select(
                tables::POST_IMAGES,
                Select::new()
                    .filter(Cond::eq("post_id", post_id))
                    .order("order_index", Direction::Asc),
            )
            .await?;
        rows.into_iter()
            .map(|row| Ok(serde_json::from_value(row)?))
            .collect()
    }
}

fn owner_cond(viewer: &Identity) -> Cond {
    match viewer {
        Identity::User(id) => Cond::eq("user_id", id.clone()),
        Identity::Anonymous(id) => Cond::eq("anonymous_id", id.clone()),
    }
}

/// Reassign order_index 0..N-1 preserving current order; returns the
/// images whose index changed.
pub fn renumber(images: &mut [PostImage]) -> Vec<PostImage> {
    let mut changed = Vec::new();
    for (index, image) in images.iter_mut().enumerate() {
        if image.order_index != index as i64 {
            image.order_index = index as i64;
            changed.push(image.clone());
        }
    }
    changed
}

fn draft_to_row(draft: &PostDraft, viewer: &Identity) -> Value {
    let mut row = json!({
        "offer_type": draft.offer_type,
        "content_type": draft.content_type,
        "title": draft.title.trim(),
        "description": draft.description.trim(),
        "contact_method": draft.contact_method,
        "contact_info": draft.contact_info.trim(),
        "is_anonymous": draft.is_anonymous,
        "image_url": Value::Null,
        "likes": 0,
        "comments": 0,
        "created_at": Utc::now(),
    });
    let obj = row.as_object_mut().unwrap();

    match viewer {
        Identity::User(id) => obj.insert("user_id".into(), json!(id)),
        Identity::Anonymous(id) => obj.insert("anonymous_id".into(), json!(id)),
    };

    match draft.content_type {
        ContentType::Item => {
            obj.insert("category".into(), json!(draft.item_category));
            obj.insert(
                "condition".into(),
                match draft.offer_type {
                    OfferType::Offering => json!(draft.condition),
                    OfferType::Requesting => Value::Null,
                },
            );
            obj.insert(
                "looking_for".into(),
                match draft.offer_type {
                    OfferType::Offering => opt(&draft.looking_for),
                    OfferType::Requesting => Value::Null,
                },
            );
            obj.insert(
                "can_offer".into(),
                match draft.offer_type {
                    OfferType::Requesting => opt(&draft.can_offer),
                    OfferType::Offering => Value::Null,
                },
            );
        }
        ContentType::Service => {
            obj.insert("category".into(), json!(draft.service_category));
            obj.insert("experience_level".into(), json!(draft.experience_level));
            obj.insert("availability".into(), json!(draft.availability.trim()));
            obj.insert("rate_type".into(), json!(draft.rate_type));
            obj.insert(
                "rate_amount".into(),
                if draft.rate_type == RateType::Trade {
                    Value::Null
                } else {
                    json!(draft.rate_amount.trim())
                },
            );
            obj.insert("rate_notes".into(), opt(&draft.rate_notes));
        }
    }

    row
}

fn opt(s: &str) -> Value {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        Value::Null
    } else {
        json!(trimmed)
    }
}

fn draft_from_post(post: &Post) -> PostDraft {
    let mut draft = PostDraft {
        offer_type: post.offer_type,
        content_type: post.content_type,
        title: post.title.clone(),
        description: post.description.clone(),
        contact_method: post.contact_method,
        contact_info: post.contact_info.clone(),
        is_anonymous: post.is_anonymous,
        ..Default::default()
    };
    match post.content_type {
        ContentType::Item => {
            draft.item_category = post.category.clone().unwrap_or_default();
            draft.condition = post.condition.clone().unwrap_or_default();
            draft.looking_for = post.looking_for.clone().unwrap_or_default();
            draft.can_offer = post.can_offer.clone().unwrap_or_default();
        }
        ContentType::Service => {
            draft.service_category = post.category.clone().unwrap_or_default();
            draft.experience_level = post.experience_level.clone().unwrap_or_default();
            draft.availability = post.availability.clone().unwrap_or_default();
            draft.rate_type = post.rate_type.unwrap_or(RateType::Trade);
            draft.rate_amount = post.rate_amount.clone().unwrap_or_default();
            draft.rate_notes = post.rate_notes.clone().unwrap_or_default();
        }
    }
    draft
}
