use serde_json::Value;

use crate::backend::{tables, Direction, DynBackend, Select};
use crate::domain::{ContentType, OfferType, Post};
use crate::error::AppResult;

/// Community feed filters. All predicates compose conjunctively; a
/// `None` predicate matches everything.
#[derive(Debug, Clone, Default)]
pub struct FeedFilter {
    pub offer_type: Option<OfferType>,
    pub search: Option<String>,
    pub category: Option<String>,
    pub content_type: Option<ContentType>,
}

impl FeedFilter {
    pub fn matches(&self, post: &Post) -> bool {
        let matches_offer = self
            .offer_type
            .map(|o| post.offer_type == o)
            .unwrap_or(true);

        let matches_search = match self.search.as_deref() {
            None | Some("") => true,
            Some(term) => {
                let term = term.to_lowercase();
                post.title.to_lowercase().contains(&term)
                    || post.description.to_lowercase().contains(&term)
            }
        };

        let matches_category = match self.category.as_deref() {
            None | Some("") => true,
            Some(category) => post.category.as_deref() == Some(category),
        };

        let matches_content = self
            .content_type
            .map(|c| post.content_type == c)
            .unwrap_or(true);

        matches_offer && matches_search && matches_category && matches_content
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum FeedSort {
    #[default]
    Newest,
    Popular,
}

impl std::fmt::Display for FeedSort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedSort::Newest => write!(f, "newest"),
            FeedSort::Popular => write!(f, "popular"),
        }
    }
}

/// Filter then sort, entirely client-side over the full fetch. Sorts
/// are stable so ties keep the order the rows arrived in.
pub fn apply(posts: &[Post], filter: &FeedFilter, sort: FeedSort) -> Vec<Post> {
    let mut out: Vec<Post> = posts.iter().filter(|p| filter.matches(p)).cloned().collect();
    match sort {
        FeedSort::Newest => out.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        FeedSort::Popular => out.sort_by(|a, b| b.engagement().cmp(&a.engagement())),
    }
    out
}

#[derive(Clone)]
pub struct FeedService {
    backend: DynBackend,
}

impl FeedService {
    pub fn new(backend: DynBackend) -> Self {
        Self { backend }
    }

    /// Full fetch newest-first, then local filter + sort. No
    /// pagination; the design assumes small total listing counts.
    pub async fn load(&self, filter: &FeedFilter, sort: FeedSort) -> AppResult<Vec<Post>> {
        let rows = self
            .backend
            .select(
                tables::POSTS,
                Select::new().order("created_at", Direction::Desc),
            )
            .await?;
        Ok(apply(&parse_posts(rows), filter, sort))
    }
}

/// Decode rows, skipping ones that do not parse. A malformed listing
/// should cost itself, not the whole feed.
pub(crate) fn parse_posts(rows: Vec<Value>) -> Vec<Post> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value::<Post>(row) {
            Ok(post) => Some(post),
            Err(e) => {
                tracing::warn!("Skipping malformed post row: {}", e);
                None
            }
        })
        .collect()
}
