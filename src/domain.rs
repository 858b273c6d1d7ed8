use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a listing offers something or asks for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OfferType {
    Offering,
    Requesting,
}

impl fmt::Display for OfferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfferType::Offering => write!(f, "offering"),
            OfferType::Requesting => write!(f, "requesting"),
        }
    }
}

/// Whether a listing concerns a physical item or a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Item,
    Service,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentType::Item => write!(f, "item"),
            ContentType::Service => write!(f, "service"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RateType {
    Trade,
    Hourly,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ContactMethod {
    Email,
    Phone,
    Both,
}

pub const ITEM_CATEGORIES: &[&str] = &[
    "Books & Media",
    "Clothing",
    "Electronics",
    "Furniture",
    "Garden",
    "Home Goods",
    "Kids & Toys",
    "Music",
    "Outdoors",
    "Pet Supplies",
    "Sports",
    "Tools",
    "Other",
];

pub const SERVICE_CATEGORIES: &[&str] = &[
    "Education & Tutoring",
    "Home Repair",
    "Computer & Tech Support",
    "Creative & Design",
    "Health & Wellness",
    "Events & Entertainment",
    "Professional Services",
    "Crafts & Handmade",
    "Transportation",
    "Cleaning & Organization",
    "Pet Care",
    "Yard & Garden Work",
    "Other",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub offer_type: OfferType,
    pub content_type: ContentType,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,

    // Item listings
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub looking_for: Option<String>,
    #[serde(default)]
    pub can_offer: Option<String>,

    // Service listings
    #[serde(default)]
    pub experience_level: Option<String>,
    #[serde(default)]
    pub availability: Option<String>,
    #[serde(default)]
    pub rate_type: Option<RateType>,
    #[serde(default)]
    pub rate_amount: Option<String>,
    #[serde(default)]
    pub rate_notes: Option<String>,

    pub contact_method: ContactMethod,
    pub contact_info: String,
    pub is_anonymous: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub anonymous_id: Option<String>,

    /// Primary image. Kept alongside PostImage rows for older listings
    /// that predate multi-image support.
    #[serde(default)]
    pub image_url: Option<String>,

    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub comments: i64,
    pub created_at: DateTime<Utc>,
}

impl Post {
    /// The identity key that may mutate this listing. Authenticated
    /// ownership wins when both columns are somehow populated.
    pub fn owner_key(&self) -> Option<&str> {
        self.user_id
            .as_deref()
            .or(self.anonymous_id.as_deref())
    }

    pub fn engagement(&self) -> i64 {
        self.likes + self.comments
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostImage {
    pub id: String,
    pub post_id: String,
    pub image_url: String,
    #[serde(default)]
    pub storage_path: String,
    pub order_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub content: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub anonymous_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn author_label(&self) -> &str {
        self.user_name.as_deref().unwrap_or("Anonymous")
    }
}

/// One side of a conversation: an opaque identity key (authenticated
/// user id or anonymous token) plus whatever display name the wire
/// record carried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub display_name: Option<String>,
}

impl Participant {
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or("Neighbor")
    }
}

/// Normalized two-party thread. Raw wire records come in two column
/// layouts; both are mapped to this shape at the backend boundary and
/// nothing downstream ever sees the raw layout again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub participants: [Participant; 2],
    pub post_id: Option<String>,
    pub post_title: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// The non-viewer side of a conversation. Well-formed records always
/// resolve to `Known`; `Unknown` covers records where neither stored
/// side matches the viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtherParty<'a> {
    Known(&'a Participant),
    Unknown,
}

impl OtherParty<'_> {
    pub fn label(&self) -> &str {
        match self {
            OtherParty::Known(p) => p.label(),
            OtherParty::Unknown => "Neighbor",
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            OtherParty::Known(p) => Some(&p.id),
            OtherParty::Unknown => None,
        }
    }
}

impl Conversation {
    /// Resolve the non-viewer participant by comparing the viewer key
    /// against both stored sides.
    pub fn other_party(&self, viewer_key: &str) -> OtherParty<'_> {
        let [a, b] = &self.participants;
        if a.id == viewer_key {
            OtherParty::Known(b)
        } else if b.id == viewer_key {
            OtherParty::Known(a)
        } else {
            OtherParty::Unknown
        }
    }

    pub fn involves(&self, key: &str) -> bool {
        self.participants.iter().any(|p| p.id == key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_from(&self, viewer_key: &str) -> bool {
        self.sender_id == viewer_key
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Interest,
    Comment,
    Message,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserNotification {
    pub id: String,
    pub recipient_id: String,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub content: String,
    #[serde(default)]
    pub post_id: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
