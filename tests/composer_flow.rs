use std::sync::Arc;

use bytes::Bytes;
use tradepost::backend::memory::MemoryBackend;
use tradepost::backend::{tables, Backend, Cond, Direction, Select};
use tradepost::composer::{ComposerService, ImageInput, PostDraft};
use tradepost::domain::{ContentType, OfferType, RateType};
use tradepost::error::AppError;
use tradepost::identity::IdentityResolver;
use tradepost::store::LocalStore;

fn composer_on(backend: Arc<MemoryBackend>) -> (ComposerService, LocalStore) {
    let store = LocalStore::in_memory();
    let identity = IdentityResolver::new(store.clone());
    (
        ComposerService::new(backend, store.clone(), identity),
        store,
    )
}

fn item_draft() -> PostDraft {
    PostDraft {
        title: "Garden tools".into(),
        description: "Hand trowel, pruners, gloves".into(),
        contact_info: "ada@example.org".into(),
        item_category: "Garden".into(),
        ..Default::default()
    }
}

fn image(name: &str) -> ImageInput {
    ImageInput {
        file_name: name.to_string(),
        data: Bytes::from_static(b"fake image bytes"),
    }
}

#[tokio::test]
async fn submit_creates_post_then_images_in_order() {
    let backend = Arc::new(MemoryBackend::new());
    let (composer, store) = composer_on(backend.clone());

    composer.save_draft(&item_draft()).unwrap();

    let outcome = composer
        .submit(&item_draft(), vec![image("front.jpg"), image("back.png")])
        .await
        .unwrap();
    assert_eq!(outcome.image_urls.len(), 2);
    assert!(outcome.failed_uploads.is_empty());

    // Post row carries the first image as its primary image_url.
    let posts = backend
        .select(tables::POSTS, Select::new())
        .await
        .unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(
        posts[0]["image_url"].as_str().unwrap(),
        outcome.image_urls[0]
    );

    // Image rows are contiguous from 0 in upload order.
    let images = backend
        .select(
            tables::POST_IMAGES,
            Select::new().order("order_index", Direction::Asc),
        )
        .await
        .unwrap();
    let orders: Vec<i64> = images
        .iter()
        .map(|i| i["order_index"].as_i64().unwrap())
        .collect();
    assert_eq!(orders, vec![0, 1]);
    assert!(images[0]["image_url"].as_str().unwrap().ends_with(".jpg"));

    // The listing is tracked locally and the draft is gone.
    let owned = store.owned_posts().unwrap();
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].id, outcome.post_id);
    assert!(composer.draft().unwrap().is_none());
}

#[tokio::test]
async fn missing_condition_blocks_submission_before_any_backend_call() {
    let backend = Arc::new(MemoryBackend::new());
    let (composer, _) = composer_on(backend.clone());

    let mut draft = item_draft();
    draft.condition = String::new(); // offering an item requires condition

    let err = composer.submit(&draft, vec![]).await.unwrap_err();
    match err {
        AppError::Validation(errors) => {
            assert!(errors.iter().any(|e| e.field == "condition"));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
    assert_eq!(backend.row_count(tables::POSTS), 0);
}

#[tokio::test]
async fn hourly_service_without_rate_amount_is_rejected() {
    let backend = Arc::new(MemoryBackend::new());
    let (composer, _) = composer_on(backend.clone());

    let draft = PostDraft {
        content_type: ContentType::Service,
        title: "Tutoring".into(),
        description: "Algebra".into(),
        contact_info: "a@b.c".into(),
        service_category: "Education & Tutoring".into(),
        availability: "Weekends".into(),
        rate_type: RateType::Hourly,
        rate_amount: String::new(),
        ..Default::default()
    };

    let err = composer.submit(&draft, vec![]).await.unwrap_err();
    match err {
        AppError::Validation(errors) => {
            assert!(errors.iter().any(|e| e.field == "rate_amount"));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
    assert_eq!(backend.row_count(tables::POSTS), 0);
}

#[tokio::test]
async fn only_the_owner_may_edit_or_delete() {
    let backend = Arc::new(MemoryBackend::new());
    let (owner, _) = composer_on(backend.clone());
    let (stranger, _) = composer_on(backend.clone());

    let outcome = owner.submit(&item_draft(), vec![]).await.unwrap();

    // A different device (different anonymous id) is turned away.
    let err = stranger.begin_edit(&outcome.post_id).await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized));
    let err = stranger.delete(&outcome.post_id).await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized));

    // The owner goes through.
    let (_, mut draft) = owner.begin_edit(&outcome.post_id).await.unwrap();
    draft.title = "Garden tools (updated)".into();
    owner.submit_edit(&outcome.post_id, &draft).await.unwrap();

    let posts = backend.select(tables::POSTS, Select::new()).await.unwrap();
    assert_eq!(posts[0]["title"], "Garden tools (updated)");
}

#[tokio::test]
async fn edit_without_a_cached_intent_is_refused() {
    let backend = Arc::new(MemoryBackend::new());
    let (composer, store) = composer_on(backend.clone());

    let outcome = composer.submit(&item_draft(), vec![]).await.unwrap();
    let (_, draft) = composer.begin_edit(&outcome.post_id).await.unwrap();
    store.clear_edit_intent().unwrap();

    let err = composer
        .submit_edit(&outcome.post_id, &draft)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized));
}

#[tokio::test]
async fn delete_removes_listing_images_and_local_reference() {
    let backend = Arc::new(MemoryBackend::new());
    let (composer, store) = composer_on(backend.clone());

    let outcome = composer
        .submit(&item_draft(), vec![image("a.jpg")])
        .await
        .unwrap();
    assert_eq!(backend.row_count(tables::POST_IMAGES), 1);

    composer.delete(&outcome.post_id).await.unwrap();
    assert_eq!(backend.row_count(tables::POSTS), 0);
    assert_eq!(backend.row_count(tables::POST_IMAGES), 0);
    assert!(store.owned_posts().unwrap().is_empty());
}

#[tokio::test]
async fn removing_an_image_keeps_order_contiguous_and_updates_primary() {
    let backend = Arc::new(MemoryBackend::new());
    let (composer, _) = composer_on(backend.clone());

    let outcome = composer
        .submit(
            &item_draft(),
            vec![image("one.jpg"), image("two.jpg"), image("three.jpg")],
        )
        .await
        .unwrap();

    let images = backend
        .select(
            tables::POST_IMAGES,
            Select::new().order("order_index", Direction::Asc),
        )
        .await
        .unwrap();
    let first_id = images[0]["id"].as_str().unwrap().to_string();
    let second_url = images[1]["image_url"].as_str().unwrap().to_string();

    // Remove the primary image; the rest close the gap in order.
    let remaining = composer
        .remove_image(&outcome.post_id, &first_id)
        .await
        .unwrap();
    let orders: Vec<i64> = remaining.iter().map(|i| i.order_index).collect();
    assert_eq!(orders, vec![0, 1]);
    assert_eq!(remaining[0].image_url, second_url);

    let posts = backend
        .select(
            tables::POSTS,
            Select::new().filter(Cond::eq("id", outcome.post_id.clone())),
        )
        .await
        .unwrap();
    assert_eq!(posts[0]["image_url"].as_str().unwrap(), second_url);
}

#[tokio::test]
async fn reordering_images_renumbers_from_zero() {
    let backend = Arc::new(MemoryBackend::new());
    let (composer, _) = composer_on(backend.clone());

    let outcome = composer
        .submit(&item_draft(), vec![image("one.jpg"), image("two.jpg")])
        .await
        .unwrap();
    let images = backend
        .select(
            tables::POST_IMAGES,
            Select::new().order("order_index", Direction::Asc),
        )
        .await
        .unwrap();
    let ids: Vec<String> = images
        .iter()
        .map(|i| i["id"].as_str().unwrap().to_string())
        .collect();

    let reordered = composer
        .reorder_images(&outcome.post_id, &[ids[1].clone(), ids[0].clone()])
        .await
        .unwrap();
    assert_eq!(reordered[0].id, ids[1]);
    assert_eq!(reordered[0].order_index, 0);
    assert_eq!(reordered[1].id, ids[0]);
    assert_eq!(reordered[1].order_index, 1);
}

#[tokio::test]
async fn six_images_are_rejected() {
    let backend = Arc::new(MemoryBackend::new());
    let (composer, _) = composer_on(backend.clone());

    let images = (0..6).map(|i| image(&format!("{}.jpg", i))).collect();
    let err = composer.submit(&item_draft(), images).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(backend.row_count(tables::POSTS), 0);
}
