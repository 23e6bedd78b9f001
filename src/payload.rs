//! Inbound chat-message payload and the condition variable schema.
//!
//! # Responsibilities
//! - Decode the webhook body into a typed message structure
//! - Declare, explicitly, the variable schema conditions compile against
//! - Convert a decoded message into an expression [`Value`]
//!
//! # Design Decisions
//! - The schema is written out by hand next to the types it mirrors,
//!   so the fields a condition may reference are a reviewable artifact
//! - All fields default: senders omit most of them, and absent fields
//!   evaluate as empty rather than null

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::expr::{Kind, Schema, Value};

/// An incoming webhook message. Mirrors the common fields of the
/// downstream provider's message format.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChatMessage {
    pub channel: String,
    pub user: String,
    pub username: String,
    pub text: String,
    pub icon_emoji: String,
    pub icon_url: String,
    pub thread_ts: String,
    pub mrkdwn: bool,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Attachment {
    pub fallback: String,
    pub color: String,
    pub pretext: String,
    pub author_name: String,
    pub title: String,
    pub title_link: String,
    pub text: String,
    pub footer: String,
    pub fields: Vec<AttachmentField>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AttachmentField {
    pub title: String,
    pub value: String,
    pub short: bool,
}

/// The fixed variable schema visible to rule conditions: the decoded
/// payload plus the three path identifiers.
pub fn condition_schema() -> Schema {
    Schema::new()
        .declare("payload", message_kind())
        .declare("team_id", Kind::String)
        .declare("bot_id", Kind::String)
        .declare("token", Kind::String)
}

fn message_kind() -> Kind {
    Kind::object([
        ("channel", Kind::String),
        ("user", Kind::String),
        ("username", Kind::String),
        ("text", Kind::String),
        ("icon_emoji", Kind::String),
        ("icon_url", Kind::String),
        ("thread_ts", Kind::String),
        ("mrkdwn", Kind::Bool),
        ("attachments", Kind::list(attachment_kind())),
    ])
}

fn attachment_kind() -> Kind {
    Kind::object([
        ("fallback", Kind::String),
        ("color", Kind::String),
        ("pretext", Kind::String),
        ("author_name", Kind::String),
        ("title", Kind::String),
        ("title_link", Kind::String),
        ("text", Kind::String),
        ("footer", Kind::String),
        (
            "fields",
            Kind::list(Kind::object([
                ("title", Kind::String),
                ("value", Kind::String),
                ("short", Kind::Bool),
            ])),
        ),
    ])
}

impl ChatMessage {
    /// Expression-engine view of the message. Field names must stay in
    /// lockstep with [`condition_schema`].
    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("channel".to_string(), Value::from(self.channel.clone()));
        map.insert("user".to_string(), Value::from(self.user.clone()));
        map.insert("username".to_string(), Value::from(self.username.clone()));
        map.insert("text".to_string(), Value::from(self.text.clone()));
        map.insert(
            "icon_emoji".to_string(),
            Value::from(self.icon_emoji.clone()),
        );
        map.insert("icon_url".to_string(), Value::from(self.icon_url.clone()));
        map.insert("thread_ts".to_string(), Value::from(self.thread_ts.clone()));
        map.insert("mrkdwn".to_string(), Value::from(self.mrkdwn));
        map.insert(
            "attachments".to_string(),
            Value::List(self.attachments.iter().map(Attachment::to_value).collect()),
        );
        Value::Map(map)
    }
}

impl Attachment {
    fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("fallback".to_string(), Value::from(self.fallback.clone()));
        map.insert("color".to_string(), Value::from(self.color.clone()));
        map.insert("pretext".to_string(), Value::from(self.pretext.clone()));
        map.insert(
            "author_name".to_string(),
            Value::from(self.author_name.clone()),
        );
        map.insert("title".to_string(), Value::from(self.title.clone()));
        map.insert(
            "title_link".to_string(),
            Value::from(self.title_link.clone()),
        );
        map.insert("text".to_string(), Value::from(self.text.clone()));
        map.insert("footer".to_string(), Value::from(self.footer.clone()));
        map.insert(
            "fields".to_string(),
            Value::List(self.fields.iter().map(AttachmentField::to_value).collect()),
        );
        Value::Map(map)
    }
}

impl AttachmentField {
    fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("title".to_string(), Value::from(self.title.clone()));
        map.insert("value".to_string(), Value::from(self.value.clone()));
        map.insert("short".to_string(), Value::from(self.short));
        Value::Map(map)
    }
}
