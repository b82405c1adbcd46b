//! Normalized chat types shared by every parser.
//!
//! All format parsers convert their native structures into these types,
//! enabling uniform normalization and storage regardless of source. The
//! parser contract itself is the tagged [`ParseEvent`] stream: exactly one
//! [`ParseEvent::Meta`], exactly one [`ParseEvent::Members`], zero or more
//! bounded [`ParseEvent::Messages`] batches with interleaved
//! [`ParseEvent::Progress`] updates, and a terminal [`ParseEvent::Done`].
//!
//! # Example
//!
//! ```rust
//! use chatlens::message::{MessageKind, RawMessage};
//!
//! let msg = RawMessage::new("u1001", 1735790100, MessageKind::Text)
//!     .with_name("Alice")
//!     .with_content("hi");
//!
//! assert_eq!(msg.sender_id, "u1001");
//! assert_eq!(msg.kind, MessageKind::Text);
//! ```

use serde::{Deserialize, Serialize};

use crate::progress::ImportProgress;

/// Whether a corpus is a one-on-one or a group conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    /// Two participants.
    Private,
    /// Three or more participants.
    Group,
}

impl ChatKind {
    /// Stable tag used in the store and in native exports.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
        }
    }

    /// Parses a stored tag; unknown tags default to `Group`.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "private" => ChatKind::Private,
            _ => ChatKind::Group,
        }
    }
}

impl std::fmt::Display for ChatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform message classification across all source formats.
///
/// Each parser maps its native tokens (e.g. `[Photo]`, `[写真]`, `[图片]`)
/// onto this enum; the store persists the stable string tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// Photo or picture.
    Image,
    /// Voice note / audio message.
    Voice,
    /// Video clip.
    Video,
    /// Attached file.
    File,
    /// Sticker or animated emoji.
    Sticker,
    /// Shared location.
    Location,
    /// Shared link / card.
    Link,
    /// Join/leave/add/rename/recall/announcement notices.
    System,
    /// Anything the parser could not classify.
    Other,
}

impl MessageKind {
    /// Stable tag used in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Voice => "voice",
            MessageKind::Video => "video",
            MessageKind::File => "file",
            MessageKind::Sticker => "sticker",
            MessageKind::Location => "location",
            MessageKind::Link => "link",
            MessageKind::System => "system",
            MessageKind::Other => "other",
        }
    }

    /// Parses a stored tag; unknown tags map to `Other`.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "text" => MessageKind::Text,
            "image" => MessageKind::Image,
            "voice" => MessageKind::Voice,
            "video" => MessageKind::Video,
            "file" => MessageKind::File,
            "sticker" => MessageKind::Sticker,
            "location" => MessageKind::Location,
            "link" => MessageKind::Link,
            "system" => MessageKind::System,
            _ => MessageKind::Other,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversation-level metadata emitted once at the head of a parse stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMeta {
    /// Display name of the conversation.
    pub name: String,

    /// Source platform tag (`line`, `qq`, `wechat`, `chatlens`, ...).
    pub platform: String,

    /// Private or group chat.
    pub kind: ChatKind,

    /// `true` when `kind` was inferred from the distinct-sender fallback
    /// rather than explicit header wording. Only then may the normalizer
    /// override it.
    #[serde(default)]
    pub kind_is_fallback: bool,
}

impl ChatMeta {
    /// Creates metadata with an explicitly detected chat kind.
    pub fn new(name: impl Into<String>, platform: impl Into<String>, kind: ChatKind) -> Self {
        Self {
            name: name.into(),
            platform: platform.into(),
            kind,
            kind_is_fallback: false,
        }
    }

    /// Marks the chat kind as a fallback guess.
    #[must_use]
    pub fn with_fallback_kind(mut self) -> Self {
        self.kind_is_fallback = true;
        self
    }
}

/// A participant record as seen in a parsed roster.
///
/// Formats without a roster emit an empty `Members` event; members are then
/// inferred from message senders by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    /// Raw identifier from the source platform.
    pub platform_id: String,

    /// Account-level name, if the format carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub account_name: Option<String>,

    /// Per-group nickname, if the format carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub group_nickname: Option<String>,

    /// Known alternate names.
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Roles (owner, admin, ...), format-specific strings.
    #[serde(default)]
    pub roles: Vec<String>,

    /// Reference to an avatar in the media folder, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub avatar: Option<String>,
}

impl MemberRecord {
    /// Creates a bare member known only by platform id.
    pub fn new(platform_id: impl Into<String>) -> Self {
        Self {
            platform_id: platform_id.into(),
            account_name: None,
            group_nickname: None,
            aliases: Vec::new(),
            roles: Vec::new(),
            avatar: None,
        }
    }

    /// Sets the account name.
    #[must_use]
    pub fn with_account_name(mut self, name: impl Into<String>) -> Self {
        self.account_name = Some(name.into());
        self
    }

    /// Sets the group nickname.
    #[must_use]
    pub fn with_group_nickname(mut self, name: impl Into<String>) -> Self {
        self.group_nickname = Some(name.into());
        self
    }

    /// Display name: first of group nickname, account name, platform id.
    pub fn display_name(&self) -> &str {
        self.group_nickname
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.account_name.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or(&self.platform_id)
    }
}

/// One parsed chat record, prior to normalization.
///
/// Timestamps are UTC seconds; wall-clock conversion already happened in the
/// parser using the corpus timezone offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Platform identifier of the sender.
    pub sender_id: String,

    /// Display name as seen at this point of the log, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub sender_name: Option<String>,

    /// UTC seconds since epoch.
    pub ts: i64,

    /// Uniform classification.
    pub kind: MessageKind,

    /// Text content. `None` for media-only records.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub content: Option<String>,

    /// Platform-native message id, if the format carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub platform_msg_id: Option<String>,

    /// Platform-native id of the message this replies to.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub reply_to: Option<String>,

    /// Auxiliary payload (media path, link URL, location), opaque to the core.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
}

impl RawMessage {
    /// Creates a message with the required fields.
    pub fn new(sender_id: impl Into<String>, ts: i64, kind: MessageKind) -> Self {
        Self {
            sender_id: sender_id.into(),
            sender_name: None,
            ts,
            kind,
            content: None,
            platform_msg_id: None,
            reply_to: None,
            extra: None,
        }
    }

    /// Sets the sender display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    /// Sets the text content.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Sets the platform message id.
    #[must_use]
    pub fn with_platform_msg_id(mut self, id: impl Into<String>) -> Self {
        self.platform_msg_id = Some(id.into());
        self
    }

    /// Sets the reply target (platform id).
    #[must_use]
    pub fn with_reply_to(mut self, id: impl Into<String>) -> Self {
        self.reply_to = Some(id.into());
        self
    }

    /// Attaches an auxiliary payload.
    #[must_use]
    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = Some(extra);
        self
    }
}

/// Terminal accounting carried by [`ParseEvent::Done`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseSummary {
    /// Messages emitted across all batches.
    pub message_count: u64,
    /// Distinct members seen (roster plus inferred senders).
    pub member_count: u64,
    /// Records skipped due to per-record parse errors.
    pub skipped_records: u64,
}

/// Tagged event stream produced by every parser.
///
/// Ordering contract: `Meta`, then `Members`, then zero or more `Messages`
/// batches with `Progress` interleaved at a bounded rate, then exactly one
/// `Done`. Errors terminate the stream through the iterator's `Result` item.
#[derive(Debug, Clone)]
pub enum ParseEvent {
    /// Conversation metadata (exactly one, first).
    Meta(ChatMeta),
    /// Roster (exactly one, possibly empty, second).
    Members(Vec<MemberRecord>),
    /// A bounded batch of parsed messages.
    Messages(Vec<RawMessage>),
    /// Parsing progress.
    Progress(ImportProgress),
    /// Terminal accounting (exactly one, last).
    Done(ParseSummary),
}
