use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;

use crate::domain::{ContactMethod, ContentType, OfferType, RateType};
use crate::feed::FeedSort;

#[derive(Parser, Debug)]
#[command(name = "tradepost", about = "A neighborhood trading marketplace client")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Hosted backend base URL
    #[arg(long)]
    pub backend_url: Option<String>,

    /// Hosted backend API key
    #[arg(long)]
    pub api_key: Option<String>,

    /// Session access token for authenticated use
    #[arg(long)]
    pub access_token: Option<String>,

    /// Run against an in-memory backend instead of the hosted service
    #[arg(long)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Browse the community feed
    Feed {
        #[arg(long)]
        offer: Option<OfferType>,
        #[arg(long)]
        content: Option<ContentType>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, value_enum, default_value_t = FeedSort::Newest)]
        sort: FeedSort,
    },
    /// Show one listing with its images and comments
    Show { id: String },
    /// Create a listing
    Post {
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value_t = OfferType::Offering, value_enum)]
        offer: OfferType,
        #[arg(long, default_value_t = ContentType::Item, value_enum)]
        content: ContentType,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        condition: Option<String>,
        #[arg(long)]
        looking_for: Option<String>,
        #[arg(long)]
        can_offer: Option<String>,
        #[arg(long)]
        experience: Option<String>,
        #[arg(long)]
        availability: Option<String>,
        #[arg(long)]
        rate_type: Option<RateType>,
        #[arg(long)]
        rate_amount: Option<String>,
        #[arg(long)]
        rate_notes: Option<String>,
        #[arg(long)]
        contact_method: Option<ContactMethod>,
        #[arg(long)]
        contact_info: Option<String>,
        /// Attach your name instead of posting anonymously
        #[arg(long)]
        public: bool,
        /// Image files, first becomes the primary image (up to 5)
        #[arg(long)]
        image: Vec<PathBuf>,
        /// Start from the saved draft
        #[arg(long)]
        from_draft: bool,
        /// Save as draft instead of submitting
        #[arg(long)]
        save_draft: bool,
    },
    /// Edit a listing you own
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        condition: Option<String>,
        #[arg(long)]
        availability: Option<String>,
        #[arg(long)]
        rate_amount: Option<String>,
        #[arg(long)]
        contact_info: Option<String>,
    },
    /// Delete a listing you own
    Delete { id: String },
    /// Listings created from this device or account
    MyPosts,
    /// Comment on a listing
    Comment { id: String, text: String },
    /// Like a listing
    Like { id: String },
    /// Express interest in a listing and start a conversation
    Interested { id: String },
    /// List conversations, or open one
    Messages {
        /// Conversation id to open
        #[arg(long)]
        conversation: Option<String>,
        /// Open the conversation attached to a listing
        #[arg(long)]
        post: Option<String>,
        /// Keep the conversation open and stream incoming messages
        #[arg(long)]
        watch: bool,
    },
    /// Send a message in a conversation
    Send { conversation: String, text: String },
    /// Show notifications
    Notifications {
        /// Mark everything read after showing
        #[arg(long)]
        mark_read: bool,
    },
    /// Show or update your profile
    Profile {
        /// Set the display name used on anonymous posts and messages
        #[arg(long)]
        name: Option<String>,
    },
    /// What this marketplace is
    About,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub database: DatabaseConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    pub api_key: String,
    pub access_token: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            access_token: None,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref url) = cli.backend_url {
            config.backend.url = url.clone();
        }
        if let Some(ref key) = cli.api_key {
            config.backend.api_key = key.clone();
        }
        if let Some(ref token) = cli.access_token {
            config.backend.access_token = Some(token.clone());
        }

        // Resolve paths relative to data dir
        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("tradepost.db"));
        }

        Ok(config)
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .expect("Could not determine home directory")
                .join(".tradepost")
        })
    }

    pub fn db_path(&self) -> &PathBuf {
        self.database.path.as_ref().unwrap()
    }
}
