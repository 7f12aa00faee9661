use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

pub mod config;
pub mod service;

use crate::config::{AppConfig, StoreBackend};
use crate::service::sqlite::SqlitePasteStore;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
pub enum ExpiresIn {
    #[default]
    #[serde(rename = "never")]
    Never,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHours,
    #[serde(rename = "10h")]
    TenHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "2d")]
    TwoDays,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1m")]
    OneMonth,
    #[serde(rename = "1y")]
    OneYear,
}

/// Capability grants carried by a session or access token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Read and write access to pastes.
    #[serde(rename = "paste")]
    Paste,
    /// Read-only access to pastes.
    #[serde(rename = "paste:read")]
    PasteRead,
    /// Read and write access to user info.
    #[serde(rename = "user")]
    User,
    /// Read-only access to user info.
    #[serde(rename = "user:read")]
    UserRead,
    /// Management of the user's access tokens.
    #[serde(rename = "user:access_tokens")]
    UserAccessTokens,
}

impl Scope {
    pub const ALL: [Scope; 5] = [
        Scope::Paste,
        Scope::PasteRead,
        Scope::User,
        Scope::UserRead,
        Scope::UserAccessTokens,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Paste => "paste",
            Scope::PasteRead => "paste:read",
            Scope::User => "user",
            Scope::UserRead => "user:read",
            Scope::UserAccessTokens => "user:access_tokens",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Scope::ALL
            .into_iter()
            .find(|scope| scope.as_str() == value.trim())
            .ok_or_else(|| format!("unknown scope: {value}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pasty {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub content: String,
    pub language: String,
}

/// Snapshot of a paste's title and pasties taken right before an edit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PasteHistory {
    pub id: String,
    pub edited_at: DateTime<Utc>,
    pub title: String,
    pub pasties: Vec<Pasty>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PasteHistoryCompact {
    pub id: String,
    pub edited_at: DateTime<Utc>,
}

/// The unit sealed by the encryption engine: pasties and their history travel together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DecryptedPasteData {
    pub pasties: Vec<Pasty>,
    pub history: Vec<PasteHistory>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredContent {
    Plain {
        pasties: Vec<Pasty>,
        #[serde(default)]
        history: Vec<PasteHistory>,
    },
    Encrypted {
        #[serde(rename = "encryptedData")]
        encrypted_data: String,
        iv: String,
        salt: String,
        #[serde(rename = "encryptionVersion")]
        encryption_version: u32,
    },
}

impl StoredContent {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, StoredContent::Encrypted { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredPaste {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_in: ExpiresIn,
    pub deletes_at: Option<DateTime<Utc>>,
    pub owner_id: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub stars: Vec<String>,
    pub content: StoredContent,
}

impl StoredPaste {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.deletes_at, Some(deletes_at) if deletes_at <= now)
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id.as_deref() == Some(user_id)
    }
}

/// Read model handed back to callers. Encrypted pastes appear here already unsealed.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Paste {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub expires_in: ExpiresIn,
    pub deletes_at: Option<DateTime<Utc>>,
    pub owner_id: Option<String>,
    pub private: bool,
    pub pinned: bool,
    pub tags: Vec<String>,
    pub stars_count: usize,
    pub encrypted: bool,
    pub pasties: Vec<Pasty>,
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub history: Vec<PasteHistory>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PasteDiff {
    pub old: PasteHistory,
    pub new: PasteHistory,
    pub current: Paste,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub token_hash: String,
    pub owner_id: String,
    pub scopes: Vec<Scope>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hidden: bool,
}

impl AccessToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }
}

/// Field-level change applied atomically to a single stored paste.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasteUpdate {
    Body {
        title: String,
        content: StoredContent,
    },
    Stars(Vec<String>),
    Pinned(bool),
    Private(bool),
    Tags(Vec<String>),
}

impl PasteUpdate {
    pub fn apply(self, paste: &mut StoredPaste) {
        match self {
            PasteUpdate::Body { title, content } => {
                paste.title = title;
                paste.content = content;
            }
            PasteUpdate::Stars(stars) => paste.stars = stars,
            PasteUpdate::Pinned(pinned) => paste.pinned = pinned,
            PasteUpdate::Private(private) => paste.private = private,
            PasteUpdate::Tags(tags) => paste.tags = tags,
        }
    }
}

/// Query over stored pastes. Results come back newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasteFilter {
    pub owner_id: Option<String>,
    pub private: Option<bool>,
    pub pinned: Option<bool>,
    pub tag: Option<String>,
    /// Leaves out pastes whose deadline has passed at this instant.
    pub live_at: Option<DateTime<Utc>>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl PasteFilter {
    pub fn owned_by(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, paste: &StoredPaste) -> bool {
        if let Some(owner_id) = self.owner_id.as_deref() {
            if !paste.is_owned_by(owner_id) {
                return false;
            }
        }
        if self.private.is_some_and(|private| paste.private != private) {
            return false;
        }
        if self.pinned.is_some_and(|pinned| paste.pinned != pinned) {
            return false;
        }
        if let Some(tag) = self.tag.as_deref() {
            if !paste.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        if self.live_at.is_some_and(|now| paste.is_expired_at(now)) {
            return false;
        }
        true
    }

    pub(crate) fn paginate(&self, mut pastes: Vec<StoredPaste>) -> Vec<StoredPaste> {
        pastes.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        let iter = pastes.into_iter().skip(self.skip);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("record already exists: {0}")]
    Duplicate(String),
    #[error("storage task failed: {0}")]
    Task(String),
}

#[async_trait]
pub trait PasteStore: Send + Sync + 'static {
    async fn insert_paste(&self, paste: StoredPaste) -> Result<(), StoreError>;
    async fn get_paste(&self, id: &str) -> Result<Option<StoredPaste>, StoreError>;
    async fn paste_exists(&self, id: &str) -> Result<bool, StoreError>;
    /// Returns `false` when no paste with this id exists.
    async fn update_paste(&self, id: &str, update: PasteUpdate) -> Result<bool, StoreError>;
    /// Deleting an absent id is not an error; the flag reports whether anything was removed.
    async fn delete_paste(&self, id: &str) -> Result<bool, StoreError>;
    async fn find_pastes(&self, filter: &PasteFilter) -> Result<Vec<StoredPaste>, StoreError>;
    /// Counts matches ignoring `skip` and `limit`.
    async fn count_pastes(&self, filter: &PasteFilter) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait AccessTokenStore: Send + Sync + 'static {
    async fn insert_token(&self, token: AccessToken) -> Result<(), StoreError>;
    async fn get_token(&self, id: &str) -> Result<Option<AccessToken>, StoreError>;
    async fn delete_token(&self, id: &str) -> Result<bool, StoreError>;
    async fn tokens_for_owner(&self, owner_id: &str) -> Result<Vec<AccessToken>, StoreError>;
}

#[derive(Default)]
pub struct MemoryPasteStore {
    pastes: RwLock<HashMap<String, StoredPaste>>,
    tokens: RwLock<HashMap<String, AccessToken>>,
}

impl MemoryPasteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PasteStore for MemoryPasteStore {
    async fn insert_paste(&self, paste: StoredPaste) -> Result<(), StoreError> {
        let mut map = self.pastes.write().await;
        if map.contains_key(&paste.id) {
            return Err(StoreError::Duplicate(paste.id));
        }
        map.insert(paste.id.clone(), paste);
        Ok(())
    }

    async fn get_paste(&self, id: &str) -> Result<Option<StoredPaste>, StoreError> {
        let map = self.pastes.read().await;
        Ok(map.get(id).cloned())
    }

    async fn paste_exists(&self, id: &str) -> Result<bool, StoreError> {
        let map = self.pastes.read().await;
        Ok(map.contains_key(id))
    }

    async fn update_paste(&self, id: &str, update: PasteUpdate) -> Result<bool, StoreError> {
        let mut map = self.pastes.write().await;
        match map.get_mut(id) {
            Some(paste) => {
                update.apply(paste);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_paste(&self, id: &str) -> Result<bool, StoreError> {
        let mut map = self.pastes.write().await;
        Ok(map.remove(id).is_some())
    }

    async fn find_pastes(&self, filter: &PasteFilter) -> Result<Vec<StoredPaste>, StoreError> {
        let map = self.pastes.read().await;
        let matching = map
            .values()
            .filter(|paste| filter.matches(paste))
            .cloned()
            .collect();
        Ok(filter.paginate(matching))
    }

    async fn count_pastes(&self, filter: &PasteFilter) -> Result<usize, StoreError> {
        let map = self.pastes.read().await;
        Ok(map.values().filter(|paste| filter.matches(paste)).count())
    }
}

#[async_trait]
impl AccessTokenStore for MemoryPasteStore {
    async fn insert_token(&self, token: AccessToken) -> Result<(), StoreError> {
        let mut map = self.tokens.write().await;
        if map.contains_key(&token.id) {
            return Err(StoreError::Duplicate(token.id));
        }
        map.insert(token.id.clone(), token);
        Ok(())
    }

    async fn get_token(&self, id: &str) -> Result<Option<AccessToken>, StoreError> {
        let map = self.tokens.read().await;
        Ok(map.get(id).cloned())
    }

    async fn delete_token(&self, id: &str) -> Result<bool, StoreError> {
        let mut map = self.tokens.write().await;
        Ok(map.remove(id).is_some())
    }

    async fn tokens_for_owner(&self, owner_id: &str) -> Result<Vec<AccessToken>, StoreError> {
        let map = self.tokens.read().await;
        let mut tokens: Vec<AccessToken> = map
            .values()
            .filter(|token| token.owner_id == owner_id)
            .cloned()
            .collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tokens)
    }
}

pub type SharedPasteStore = Arc<dyn PasteStore>;
pub type SharedTokenStore = Arc<dyn AccessTokenStore>;

/// Both stores handed out by [`create_stores`]; they share one backend.
#[derive(Clone)]
pub struct Stores {
    pub pastes: SharedPasteStore,
    pub tokens: SharedTokenStore,
}

pub fn create_stores(config: &AppConfig) -> Result<Stores, StoreError> {
    match &config.store {
        StoreBackend::Memory => {
            let store = Arc::new(MemoryPasteStore::new());
            Ok(Stores {
                pastes: store.clone(),
                tokens: store,
            })
        }
        StoreBackend::Sqlite { path } => {
            let store = Arc::new(SqlitePasteStore::open(path)?);
            log::info!("opened sqlite store at {}", path.display());
            Ok(Stores {
                pastes: store.clone(),
                tokens: store,
            })
        }
    }
}
