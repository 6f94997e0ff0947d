use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Primary key of every row published on the change feed.
pub type RowId = i64;

/// Label shown for presence entries whose display name could not be resolved.
pub const UNKNOWN_DISPLAY_NAME: &str = "کاربر ناشناس";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Admin,
    Moderator,
    Member,
}

impl SenderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Moderator => "moderator",
            Self::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "moderator" => Some(Self::Moderator),
            "member" => Some(Self::Member),
            _ => None,
        }
    }

    /// Admins and moderators may pin and remove other people's messages.
    pub fn can_moderate(&self) -> bool {
        matches!(self, Self::Admin | Self::Moderator)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub role: SenderRole,
    pub subscription_enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// A group chat message. The body never changes once sent; only the pin flag does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: RowId,
    pub sender_name: String,
    pub sender_role: SenderRole,
    pub message: String,
    pub topic_id: Option<RowId>,
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub is_pinned: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: RowId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub room_id: Option<RowId>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Banner,
    Floating,
    Popup,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Banner => "banner",
            Self::Floating => "floating",
            Self::Popup => "popup",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "banner" => Some(Self::Banner),
            "floating" => Some(Self::Floating),
            "popup" => Some(Self::Popup),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: RowId,
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
    pub color: String,
    pub link: Option<String>,
    #[serde(default)]
    pub priority: i32,
    pub is_active: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Whether the notification should be shown at `now`.
    ///
    /// Both window bounds are inclusive and optional. This depends on the wall
    /// clock, so callers must not cache the result across time.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.start_date.is_none_or(|start| start <= now)
            && self.end_date.is_none_or(|end| now <= end)
    }
}

/// A single webinar reaction. Reactions are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub id: RowId,
    pub webinar_id: RowId,
    pub participant_id: Uuid,
    pub reaction_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateMessage {
    pub id: RowId,
    pub conversation_key: String,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub sender_name: String,
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Key shared by both directions of a two-party conversation.
pub fn conversation_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}", lo.simple(), hi.simple())
}

/// Whether `user_id` is one of the two parties of a conversation key.
pub fn is_participant(conversation_key: &str, user_id: Uuid) -> bool {
    let me = user_id.simple().to_string();
    conversation_key.split(':').any(|part| part == me)
}

/// Payload a client attaches when joining a presence channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceMeta {
    pub display_name: Option<String>,
    pub user_id: Option<Uuid>,
    pub online_at: Option<DateTime<Utc>>,
}
