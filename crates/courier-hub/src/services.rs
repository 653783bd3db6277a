//! External collaborators the hub calls into: chat persistence and the user
//! directory, plus in-memory implementations for the binary and tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// Chat message kind, derived from which parts are present.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    /// Text only.
    Text,
    /// Images only.
    Image,
    /// Audio only.
    Audio,
    /// Attachments only.
    File,
    /// Anything else.
    Mixed,
}

impl MessageType {
    /// Classify a message by its parts.
    pub fn infer(has_text: bool, has_images: bool, has_audio: bool) -> Self {
        match (has_text, has_images, has_audio) {
            (true, false, false) => Self::Text,
            (false, true, false) => Self::Image,
            (false, false, true) => Self::Audio,
            _ => Self::Mixed,
        }
    }
}

/// Request to persist a chat message.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatMessageCreate {
    /// Target room.
    pub room_id: i64,
    /// Text content.
    pub message: Option<String>,
    /// Previously uploaded image URLs.
    pub image_urls: Vec<String>,
    /// Inline audio payload (upload handling lives elsewhere).
    pub audio_data: Option<String>,
    /// Previously uploaded audio URL.
    pub audio_url: Option<String>,
    /// Client-declared kind; inferred when absent.
    pub message_type: Option<MessageType>,
}

/// Sender details embedded in a message record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatParticipant {
    /// Sender id.
    pub user_id: String,
    /// Display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Avatar URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

/// Canonical stored message, published verbatim to the room destination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageRecord {
    /// Store-assigned id.
    pub message_id: i64,
    /// Room the message belongs to.
    pub room_id: i64,
    /// Sender.
    pub sender: ChatParticipant,
    /// Text content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Attached image URLs.
    pub image_urls: Vec<String>,
    /// Attached audio URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    /// Message kind.
    pub message_type: MessageType,
    /// RFC 3339 creation time.
    pub sent_at: String,
}

/// Display profile resolved at `CONNECT`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Display name.
    pub name: Option<String>,
    /// Avatar URL.
    pub profile_image: Option<String>,
}

/// Persists chat messages and returns the canonical record.
#[async_trait]
pub trait ChatMessageService: Send + Sync {
    /// Store a message sent by `user_id`.
    async fn create_message(
        &self,
        user_id: &str,
        request: ChatMessageCreate,
    ) -> Result<ChatMessageRecord, ServiceError>;
}

/// Resolves display profiles.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Profile for `user_id`. Unknown users get an empty profile.
    async fn profile(&self, user_id: &str) -> Result<UserProfile, ServiceError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory implementations
// ─────────────────────────────────────────────────────────────────────────────

/// Directory backed by a concurrent map.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    profiles: DashMap<String, UserProfile>,
}

impl InMemoryUserDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a profile.
    pub fn insert(&self, user_id: impl Into<String>, profile: UserProfile) {
        let _ = self.profiles.insert(user_id.into(), profile);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn profile(&self, user_id: &str) -> Result<UserProfile, ServiceError> {
        Ok(self
            .profiles
            .get(user_id)
            .map(|p| p.value().clone())
            .unwrap_or_default())
    }
}

/// Message store that keeps records in memory.
pub struct InMemoryChatService {
    users: Arc<dyn UserDirectory>,
    rooms: Option<HashSet<i64>>,
    next_id: AtomicI64,
    messages: Mutex<Vec<ChatMessageRecord>>,
}

impl InMemoryChatService {
    /// Store accepting any room id.
    pub fn new(users: Arc<dyn UserDirectory>) -> Self {
        Self {
            users,
            rooms: None,
            next_id: AtomicI64::new(1),
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Restrict to known rooms; others are `NotFound`.
    #[must_use]
    pub fn with_rooms(mut self, rooms: impl IntoIterator<Item = i64>) -> Self {
        self.rooms = Some(rooms.into_iter().collect());
        self
    }

    /// Stored records, oldest first.
    pub fn messages(&self) -> Vec<ChatMessageRecord> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl ChatMessageService for InMemoryChatService {
    async fn create_message(
        &self,
        user_id: &str,
        request: ChatMessageCreate,
    ) -> Result<ChatMessageRecord, ServiceError> {
        if let Some(rooms) = &self.rooms {
            if !rooms.contains(&request.room_id) {
                return Err(ServiceError::NotFound(format!("chat room {}", request.room_id)));
            }
        }

        let message = request.message.filter(|m| !m.trim().is_empty());
        let has_audio = request.audio_url.is_some();
        if message.is_none() && request.image_urls.is_empty() && !has_audio {
            return Err(ServiceError::Rejected("message is empty".to_string()));
        }

        let profile = self.users.profile(user_id).await?;
        let message_type = request
            .message_type
            .unwrap_or_else(|| MessageType::infer(message.is_some(), !request.image_urls.is_empty(), has_audio));

        let record = ChatMessageRecord {
            message_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            room_id: request.room_id,
            sender: ChatParticipant {
                user_id: user_id.to_owned(),
                name: profile.name,
                profile_image: profile.profile_image,
            },
            message,
            image_urls: request.image_urls,
            audio_url: request.audio_url,
            message_type,
            sent_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        };
        self.messages.lock().push(record.clone());
        Ok(record)
    }
}
