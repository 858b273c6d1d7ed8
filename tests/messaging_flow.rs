use std::sync::Arc;

use serde_json::json;
use tradepost::backend::memory::MemoryBackend;
use tradepost::backend::{tables, Backend, Cond, Select};
use tradepost::composer::{ComposerService, PostDraft};
use tradepost::domain::Post;
use tradepost::identity::IdentityResolver;
use tradepost::messages::ConversationService;
use tradepost::store::LocalStore;

/// One device: its own local store and anonymous identity, sharing the
/// hosted backend with everyone else.
struct Device {
    conversations: ConversationService,
    composer: ComposerService,
    identity: IdentityResolver,
    key: String,
}

fn device(backend: Arc<MemoryBackend>) -> Device {
    let store = LocalStore::in_memory();
    let identity = IdentityResolver::new(store.clone());
    let key = identity.get_or_create_anonymous_id().unwrap();
    Device {
        conversations: ConversationService::new(backend.clone(), store.clone(), identity.clone()),
        composer: ComposerService::new(backend, store, identity.clone()),
        identity,
        key,
    }
}

async fn seed_listing(owner: &Device) -> Post {
    let draft = PostDraft {
        title: "Standing desk".into(),
        description: "Adjustable height".into(),
        contact_info: "owner@example.org".into(),
        item_category: "Furniture".into(),
        ..Default::default()
    };
    let outcome = owner.composer.submit(&draft, vec![]).await.unwrap();
    let (post, _) = owner.composer.begin_edit(&outcome.post_id).await.unwrap();
    post
}

#[tokio::test]
async fn both_conversation_layouts_resolve_the_other_party() {
    let backend = Arc::new(MemoryBackend::new());
    let viewer = device(backend.clone());

    backend
        .insert(
            tables::CONVERSATIONS,
            vec![
                // Legacy paired user-id columns
                json!({
                    "id": "legacy",
                    "user1_id": viewer.key,
                    "user2_id": "u-other",
                    "user2_name": "Ben",
                    "last_message_at": "2026-02-01T10:00:00Z"
                }),
                // Newer participant columns
                json!({
                    "id": "newer",
                    "participant1_id": "anon-999-stranger",
                    "participant1_name": "Maple St Ada",
                    "participant2_id": viewer.key,
                    "last_message_at": "2026-02-02T10:00:00Z"
                }),
            ],
        )
        .await
        .unwrap();

    let summaries = viewer.conversations.list().await.unwrap();
    assert_eq!(summaries.len(), 2);

    // Ordered by last activity, newest first.
    assert_eq!(summaries[0].conversation.id, "newer");
    assert_eq!(summaries[1].conversation.id, "legacy");

    let newer_label = viewer
        .conversations
        .other_party_label(&summaries[0].conversation)
        .await
        .unwrap();
    assert_eq!(newer_label, "Maple St Ada");

    let legacy_label = viewer
        .conversations
        .other_party_label(&summaries[1].conversation)
        .await
        .unwrap();
    assert_eq!(legacy_label, "Ben");
}

#[tokio::test]
async fn conversation_with_no_matching_side_gets_a_placeholder() {
    let backend = Arc::new(MemoryBackend::new());
    let viewer = device(backend.clone());

    backend
        .insert(
            tables::CONVERSATIONS,
            vec![json!({
                "id": "foreign",
                "user1_id": "u-a",
                "user2_id": "u-b"
            })],
        )
        .await
        .unwrap();

    let open = viewer.conversations.open("foreign").await.unwrap();
    let label = viewer
        .conversations
        .other_party_label(&open.conversation)
        .await
        .unwrap();
    assert_eq!(label, "Neighbor");
}

#[tokio::test]
async fn interest_notifies_owner_and_opens_a_conversation_once() {
    let backend = Arc::new(MemoryBackend::new());
    let owner = device(backend.clone());
    let buyer = device(backend.clone());

    let post = seed_listing(&owner).await;

    let first = buyer.conversations.express_interest(&post).await.unwrap();
    assert!(first.created_conversation);

    // Owner got an interest notification and the canned greeting.
    let notifications = backend
        .select(
            tables::NOTIFICATIONS,
            Select::new().filter(Cond::eq("recipient_id", owner.key.clone())),
        )
        .await
        .unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["type"], "interest");

    let messages = backend
        .select(tables::MESSAGES, Select::new())
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0]["content"]
        .as_str()
        .unwrap()
        .contains("Standing desk"));

    // A second interest reuses the conversation pair.
    let second = buyer.conversations.express_interest(&post).await.unwrap();
    assert!(!second.created_conversation);
    assert_eq!(second.conversation_id, first.conversation_id);
    assert_eq!(backend.row_count(tables::CONVERSATIONS), 1);
}

#[tokio::test]
async fn interest_in_your_own_listing_is_rejected() {
    let backend = Arc::new(MemoryBackend::new());
    let owner = device(backend.clone());
    let post = seed_listing(&owner).await;

    assert!(owner.conversations.express_interest(&post).await.is_err());
}

#[tokio::test]
async fn send_updates_activity_and_notifies_the_recipient() {
    let backend = Arc::new(MemoryBackend::new());
    let owner = device(backend.clone());
    let buyer = device(backend.clone());
    let post = seed_listing(&owner).await;

    let interest = buyer.conversations.express_interest(&post).await.unwrap();
    let before = backend
        .select(
            tables::CONVERSATIONS,
            Select::new().filter(Cond::eq("id", interest.conversation_id.clone())),
        )
        .await
        .unwrap()[0]["last_message_at"]
        .as_str()
        .unwrap()
        .to_string();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    buyer
        .conversations
        .send(&interest.conversation_id, "Is it still available?")
        .await
        .unwrap();

    let after = backend
        .select(
            tables::CONVERSATIONS,
            Select::new().filter(Cond::eq("id", interest.conversation_id.clone())),
        )
        .await
        .unwrap()[0]["last_message_at"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(after > before);

    let message_notes = backend
        .select(
            tables::NOTIFICATIONS,
            Select::new()
                .filter(Cond::eq("recipient_id", owner.key.clone()))
                .filter(Cond::eq("type", "message")),
        )
        .await
        .unwrap();
    assert_eq!(message_notes.len(), 1);
    assert!(message_notes[0]["content"]
        .as_str()
        .unwrap()
        .starts_with("New message:"));
}

#[tokio::test]
async fn unread_counts_and_open_marks_incoming_read() {
    let backend = Arc::new(MemoryBackend::new());
    let owner = device(backend.clone());
    let buyer = device(backend.clone());
    let post = seed_listing(&owner).await;

    let interest = buyer.conversations.express_interest(&post).await.unwrap();
    buyer
        .conversations
        .send(&interest.conversation_id, "Still there?")
        .await
        .unwrap();

    // Two unread incoming messages for the owner, none for the buyer.
    let owner_view = owner.conversations.list().await.unwrap();
    assert_eq!(owner_view.len(), 1);
    assert_eq!(owner_view[0].unread, 2);
    let buyer_view = buyer.conversations.list().await.unwrap();
    assert_eq!(buyer_view[0].unread, 0);

    // Opening the thread marks them read.
    owner
        .conversations
        .open(&interest.conversation_id)
        .await
        .unwrap();
    let owner_view = owner.conversations.list().await.unwrap();
    assert_eq!(owner_view[0].unread, 0);
}

#[tokio::test]
async fn realtime_insert_is_appended_and_marked_read() {
    let backend = Arc::new(MemoryBackend::new());
    let owner = device(backend.clone());
    let buyer = device(backend.clone());
    let post = seed_listing(&owner).await;

    let interest = buyer.conversations.express_interest(&post).await.unwrap();
    let open = owner
        .conversations
        .open(&interest.conversation_id)
        .await
        .unwrap();
    let mut visible = open.messages;
    assert_eq!(visible.len(), 1);

    let mut sub = owner
        .conversations
        .watch(&interest.conversation_id)
        .await
        .unwrap();

    let sent = buyer
        .conversations
        .send(&interest.conversation_id, "Can you do Saturday?")
        .await
        .unwrap();

    let event = sub.next_event().await.unwrap();
    let applied = owner
        .conversations
        .apply_event(&mut visible, &event.row, &owner.key)
        .await
        .unwrap();
    assert!(applied.is_some());
    assert_eq!(visible.len(), 2);
    assert_eq!(visible[1].content, "Can you do Saturday?");

    // Not authored by the viewer, so a mark-as-read request went out.
    let rows = backend
        .select(
            tables::MESSAGES,
            Select::new().filter(Cond::eq("id", sent.id.clone())),
        )
        .await
        .unwrap();
    assert_eq!(rows[0]["read"], true);

    // The realtime echo of the same row must not duplicate the list.
    let echoed = owner
        .conversations
        .apply_event(&mut visible, &rows[0], &owner.key)
        .await
        .unwrap();
    assert!(echoed.is_none());
    assert_eq!(visible.len(), 2);
}

#[tokio::test]
async fn anonymous_identity_survives_and_scopes_the_viewer() {
    let backend = Arc::new(MemoryBackend::new());
    let dev = device(backend.clone());

    // Same store, same id, no matter how often it is asked for.
    let again = dev.identity.get_or_create_anonymous_id().unwrap();
    assert_eq!(again, dev.key);

    // Signing in switches the viewer key to the account id.
    backend.sign_in("account-1");
    let viewer = dev.identity.resolve_viewer(backend.as_ref()).await.unwrap();
    assert_eq!(viewer.key(), "account-1");
    backend.sign_out();
    let viewer = dev.identity.resolve_viewer(backend.as_ref()).await.unwrap();
    assert_eq!(viewer.key(), dev.key);
}
