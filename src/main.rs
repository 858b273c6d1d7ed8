mod backend;
mod composer;
mod config;
mod domain;
mod error;
mod feed;
mod identity;
mod messages;
mod notifications;
mod posts;
mod realtime;
mod state;
mod store;

use bytes::Bytes;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::composer::{ImageInput, PostDraft};
use crate::config::{Cli, Command, Config};
use crate::domain::{ContentType, Post, ITEM_CATEGORIES, SERVICE_CATEGORIES};
use crate::error::{AppError, AppResult};
use crate::feed::FeedFilter;
use crate::realtime::ScopedSubscription;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    let config = Config::load(&cli)?;
    let state = AppState::connect(config, cli.offline)?;

    if let Err(e) = run(&state, cli.command).await {
        eprintln!("{}", e.user_message());
        std::process::exit(1);
    }
    Ok(())
}

async fn run(state: &AppState, command: Command) -> AppResult<()> {
    match command {
        Command::Feed {
            offer,
            content,
            category,
            search,
            sort,
        } => {
            // No explicit category falls back to the saved preference.
            let category = match category {
                Some(c) => Some(c),
                None => {
                    let prefs = state.store.preferences()?;
                    (!prefs.default_category.is_empty()).then_some(prefs.default_category)
                }
            };
            let filter = FeedFilter {
                offer_type: offer,
                content_type: content,
                category,
                search,
            };
            let posts = state.feed().load(&filter, sort).await?;
            if posts.is_empty() {
                println!("No listings match. Try adjusting your filters or search term.");
            }
            for post in posts {
                print_feed_line(&post);
            }
        }

        Command::Show { id } => {
            let detail = state.posts().detail(&id).await?;
            print_detail(&detail);
        }

        Command::Post {
            title,
            description,
            offer,
            content,
            category,
            condition,
            looking_for,
            can_offer,
            experience,
            availability,
            rate_type,
            rate_amount,
            rate_notes,
            contact_method,
            contact_info,
            public,
            image,
            from_draft,
            save_draft,
        } => {
            let composer = state.composer();
            let mut draft = if from_draft {
                composer.draft()?.unwrap_or_default()
            } else {
                PostDraft::default()
            };
            draft.offer_type = offer;
            draft.content_type = content;
            if let Some(v) = title {
                draft.title = v;
            }
            if let Some(v) = description {
                draft.description = v;
            }
            if let Some(v) = category {
                match content {
                    ContentType::Item => draft.item_category = v,
                    ContentType::Service => draft.service_category = v,
                }
            }
            if let Some(v) = condition {
                draft.condition = v;
            }
            if let Some(v) = looking_for {
                draft.looking_for = v;
            }
            if let Some(v) = can_offer {
                draft.can_offer = v;
            }
            if let Some(v) = experience {
                draft.experience_level = v;
            }
            if let Some(v) = availability {
                draft.availability = v;
            }
            if let Some(v) = rate_type {
                draft.rate_type = v;
            }
            if let Some(v) = rate_amount {
                draft.rate_amount = v;
            }
            if let Some(v) = rate_notes {
                draft.rate_notes = v;
            }
            if let Some(v) = contact_method {
                draft.contact_method = v;
            }
            if let Some(v) = contact_info {
                draft.contact_info = v;
            }
            if public {
                draft.is_anonymous = false;
            }

            if save_draft {
                composer.save_draft(&draft)?;
                println!("Draft saved.");
                return Ok(());
            }

            let images = read_images(&image)?;
            let outcome = composer.submit(&draft, images).await?;
            println!("Listing posted: {}", outcome.post_id);
            for url in &outcome.image_urls {
                println!("  image: {}", url);
            }
            for failure in &outcome.failed_uploads {
                println!("  upload failed for {}: {}", failure.file_name, failure.error);
            }
        }

        Command::Edit {
            id,
            title,
            description,
            category,
            condition,
            availability,
            rate_amount,
            contact_info,
        } => {
            let composer = state.composer();
            let (post, mut draft) = composer.begin_edit(&id).await?;
            if let Some(v) = title {
                draft.title = v;
            }
            if let Some(v) = description {
                draft.description = v;
            }
            if let Some(v) = category {
                match post.content_type {
                    ContentType::Item => draft.item_category = v,
                    ContentType::Service => draft.service_category = v,
                }
            }
            if let Some(v) = condition {
                draft.condition = v;
            }
            if let Some(v) = availability {
                draft.availability = v;
            }
            if let Some(v) = rate_amount {
                draft.rate_amount = v;
            }
            if let Some(v) = contact_info {
                draft.contact_info = v;
            }
            composer.submit_edit(&id, &draft).await?;
            println!("Listing {} updated.", id);
        }

        Command::Delete { id } => {
            state.composer().delete(&id).await?;
            println!("Listing {} deleted.", id);
        }

        Command::MyPosts => {
            let posts = state.posts().my_posts().await?;
            if posts.is_empty() {
                println!("You have no listings yet.");
            }
            for post in posts {
                print_feed_line(&post);
            }
        }

        Command::Comment { id, text } => {
            let comment = state.posts().add_comment(&id, &text).await?;
            println!("Comment posted as {}.", comment.author_label());
        }

        Command::Like { id } => {
            let likes = state.posts().like(&id).await?;
            println!("Liked. {} likes total.", likes);
        }

        Command::Interested { id } => {
            let detail = state.posts().detail(&id).await?;
            let outcome = state.conversations().express_interest(&detail.post).await?;
            if outcome.created_conversation {
                println!(
                    "Interest sent! Conversation {} started; check your messages to continue.",
                    outcome.conversation_id
                );
            } else {
                println!(
                    "Interest sent! Continuing conversation {}.",
                    outcome.conversation_id
                );
            }
        }

        Command::Messages {
            conversation,
            post,
            watch,
        } => {
            let service = state.conversations();
            let target = match (conversation, post) {
                (Some(id), _) => Some(service.open(&id).await?),
                (None, Some(post_id)) => {
                    let opened = service.open_by_post(&post_id).await?;
                    if opened.is_none() {
                        println!("No conversation for that listing yet.");
                    }
                    opened
                }
                (None, None) => None,
            };

            match target {
                Some(open) => {
                    let viewer = state.identity.resolve_viewer(state.backend.as_ref()).await?;
                    let label = service.other_party_label(&open.conversation).await?;
                    println!("Conversation with {}", label);
                    if let Some(title) = &open.conversation.post_title {
                        println!("Re: {}", title);
                    }
                    let mut messages = open.messages;
                    for message in &messages {
                        print_message(message, viewer.key(), &label);
                    }
                    if watch {
                        watch_conversation(
                            state,
                            &open.conversation.id,
                            &mut messages,
                            viewer.key(),
                            &label,
                        )
                        .await?;
                    }
                }
                None => {
                    let summaries = service.list().await?;
                    if summaries.is_empty() {
                        println!(
                            "No conversations yet. When someone expresses interest in one of \
                             your listings, or you express interest in someone else's, your \
                             conversations will appear here."
                        );
                    }
                    for summary in summaries {
                        let label = service.other_party_label(&summary.conversation).await?;
                        let unread = if summary.unread > 0 {
                            format!(" ({} unread)", summary.unread)
                        } else {
                            String::new()
                        };
                        match &summary.conversation.post_title {
                            Some(title) => println!(
                                "{}  {}  about: {}{}",
                                summary.conversation.id, label, title, unread
                            ),
                            None => println!("{}  {}{}", summary.conversation.id, label, unread),
                        }
                    }
                }
            }
        }

        Command::Send { conversation, text } => {
            let message = state.conversations().send(&conversation, &text).await?;
            println!("Sent at {}.", message.created_at.format("%H:%M"));
        }

        Command::Notifications { mark_read } => {
            let service = state.notifications();
            let notifications = service.list().await?;
            if notifications.is_empty() {
                println!("No notifications.");
            }
            for notification in &notifications {
                let marker = if notification.read { " " } else { "*" };
                println!(
                    "{} {}  {}",
                    marker,
                    notification.created_at.format("%Y-%m-%d %H:%M"),
                    notification.content
                );
            }
            if mark_read {
                let marked = service.mark_all_read(&notifications).await?;
                println!("{} marked read.", marked);
            }
        }

        Command::Profile { name } => {
            use crate::backend::{tables, Cond, Select};
            let viewer = state.identity.resolve_viewer(state.backend.as_ref()).await?;
            if let Some(name) = name {
                if viewer.is_anonymous() {
                    let profile = state.identity.set_display_name(&name)?;
                    println!(
                        "Display name set to {}.",
                        profile.display_name.as_deref().unwrap_or("(none)")
                    );
                } else {
                    state
                        .backend
                        .update(
                            tables::PROFILES,
                            serde_json::json!({"username": name}),
                            vec![Cond::eq("id", viewer.key())],
                        )
                        .await?;
                    println!("Username set to {}.", name);
                }
            } else if viewer.is_anonymous() {
                let profile = state.identity.profile()?;
                println!("Identity: anonymous ({})", viewer.key());
                println!(
                    "Display name: {}",
                    profile.display_name.as_deref().unwrap_or("(not set)")
                );
                let owned = state.store.owned_posts()?;
                println!("Listings from this device: {}", owned.len());
            } else {
                let rows = state
                    .backend
                    .select(
                        tables::PROFILES,
                        Select::new().filter(Cond::eq("id", viewer.key())),
                    )
                    .await?;
                println!("Identity: signed in ({})", viewer.key());
                if let Some(username) = rows
                    .first()
                    .and_then(|p| p.get("username"))
                    .and_then(|u| u.as_str())
                {
                    println!("Username: {}", username);
                }
                let owned = state.store.owned_posts()?;
                println!("Listings from this device: {}", owned.len());
            }
        }

        Command::About => {
            println!("tradepost: offer, request, and trade items and services with neighbors.");
            println!();
            println!("Item categories:    {}", ITEM_CATEGORIES.join(", "));
            println!("Service categories: {}", SERVICE_CATEGORIES.join(", "));
        }
    }
    Ok(())
}

/// Stream incoming messages for the open conversation until Ctrl-C.
async fn watch_conversation(
    state: &AppState,
    conversation_id: &str,
    messages: &mut Vec<domain::Message>,
    viewer_key: &str,
    label: &str,
) -> AppResult<()> {
    let service = state.conversations();
    let mut scoped = ScopedSubscription::new();
    scoped
        .enter(conversation_id.to_string(), || {
            service.watch(conversation_id)
        })
        .await?;

    println!("Watching for new messages (Ctrl-C to stop)...");
    loop {
        let next = {
            let subscription = scoped
                .subscription_mut()
                .ok_or_else(|| AppError::Realtime("subscription closed".into()))?;
            tokio::select! {
                _ = tokio::signal::ctrl_c() => None,
                event = subscription.next_event() => Some(event),
            }
        };
        match next {
            // Ctrl-C: leave the scope, which tears the subscription down.
            None => {
                scoped.exit();
                return Ok(());
            }
            Some(None) => return Err(AppError::Realtime("channel closed".into())),
            Some(Some(event)) => {
                if let Some(message) = service
                    .apply_event(messages, &event.row, viewer_key)
                    .await?
                {
                    print_message(&message, viewer_key, label);
                }
            }
        }
    }
}

fn read_images(paths: &[std::path::PathBuf]) -> AppResult<Vec<ImageInput>> {
    paths
        .iter()
        .map(|path| {
            let data = std::fs::read(path)
                .map_err(|e| AppError::Internal(format!("{}: {}", path.display(), e)))?;
            Ok(ImageInput {
                file_name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "image.jpg".to_string()),
                data: Bytes::from(data),
            })
        })
        .collect()
}

fn print_feed_line(post: &Post) {
    println!(
        "{}  [{}/{}] {}  {}  {} likes, {} comments",
        post.id,
        post.offer_type,
        post.content_type,
        post.title,
        post.created_at.format("%Y-%m-%d"),
        post.likes,
        post.comments
    );
}

fn print_detail(detail: &posts::PostDetail) {
    let post = &detail.post;
    println!("{} ({} / {})", post.title, post.offer_type, post.content_type);
    if let Some(category) = &post.category {
        println!("Category: {}", category);
    }
    if let Some(condition) = &post.condition {
        println!("Condition: {}", condition);
    }
    if let Some(availability) = &post.availability {
        println!("Availability: {}", availability);
    }
    if let Some(rate) = &post.rate_amount {
        println!("Rate: {}", rate);
    }
    println!();
    println!("{}", post.description);
    if let Some(looking_for) = &post.looking_for {
        println!("Looking for in exchange: {}", looking_for);
    }
    if let Some(can_offer) = &post.can_offer {
        println!("Can offer in return: {}", can_offer);
    }
    let images = detail.display_images();
    if !images.is_empty() {
        println!();
        for url in images {
            println!("  image: {}", url);
        }
    }
    if !post.is_anonymous {
        println!();
        println!("Contact ({:?}): {}", post.contact_method, post.contact_info);
    }
    println!();
    println!("{} likes, {} comments", post.likes, post.comments);
    for comment in &detail.comments {
        println!(
            "  {} ({}): {}",
            comment.author_label(),
            comment.created_at.format("%Y-%m-%d %H:%M"),
            comment.content
        );
    }
}

fn print_message(message: &domain::Message, viewer_key: &str, other_label: &str) {
    let who = if message.is_from(viewer_key) {
        "me"
    } else {
        other_label
    };
    println!(
        "[{}] {}: {}",
        message.created_at.format("%H:%M"),
        who,
        message.content
    );
}
