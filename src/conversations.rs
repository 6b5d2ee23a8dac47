use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{ApiClient, Transport, next_cursor};
use crate::error::{BackupError, Result};

const LIST_PAGE_LIMIT: u32 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConversationType {
    PublicChannel,
    PrivateChannel,
    DirectMessage,
    GroupDirectMessage,
}

impl ConversationType {
    /// Name used in the `types` parameter of `conversations.list`.
    pub fn request_name(self) -> &'static str {
        match self {
            ConversationType::PublicChannel => "public_channel",
            ConversationType::PrivateChannel => "private_channel",
            ConversationType::DirectMessage => "im",
            ConversationType::GroupDirectMessage => "mpim",
        }
    }

    /// Metadata listing file this type's conversations are recorded in.
    pub fn listing_file(self) -> &'static str {
        match self {
            ConversationType::PublicChannel => "channels.json",
            ConversationType::PrivateChannel => "groups.json",
            ConversationType::DirectMessage => "dms.json",
            ConversationType::GroupDirectMessage => "mpims.json",
        }
    }

    pub fn is_direct(self) -> bool {
        matches!(self, ConversationType::DirectMessage)
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "public_channel" => Ok(ConversationType::PublicChannel),
            "private_channel" | "group" => Ok(ConversationType::PrivateChannel),
            "im" | "direct_message" => Ok(ConversationType::DirectMessage),
            "mpim" | "group_direct_message" => Ok(ConversationType::GroupDirectMessage),
            other => Err(BackupError::UnknownConversationType(other.to_string())),
        }
    }
}

/// Parses a comma-separated type list, dropping duplicates but keeping
/// order.
pub fn parse_types(list: &str) -> Result<Vec<ConversationType>> {
    let mut types = Vec::new();
    for part in list.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let ty = ConversationType::parse(part)?;
        if !types.contains(&ty) {
            types.push(ty);
        }
    }
    if types.is_empty() {
        return Err(BackupError::UnknownConversationType(list.to_string()));
    }
    Ok(types)
}

/// Topic or purpose entry as Slack reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicEntry {
    pub value: String,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub last_set: i64,
}

/// One record from the remote conversation directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub is_im: bool,
    #[serde(default)]
    pub is_mpim: bool,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_archived: Option<bool>,
    #[serde(default)]
    pub is_general: Option<bool>,
    #[serde(default)]
    pub topic: Option<TopicEntry>,
    #[serde(default)]
    pub purpose: Option<TopicEntry>,
}

impl Conversation {
    /// `is_mpim` implies `is_private`, so the order of checks matters.
    pub fn conversation_type(&self) -> ConversationType {
        if self.is_im {
            ConversationType::DirectMessage
        } else if self.is_mpim {
            ConversationType::GroupDirectMessage
        } else if self.is_private {
            ConversationType::PrivateChannel
        } else {
            ConversationType::PublicChannel
        }
    }
}

/// Archived metadata record, the shape written to the per-type listing
/// files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMeta {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    pub members: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_archived: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_general: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<TopicEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<TopicEntry>,
}

impl ConversationMeta {
    pub fn from_conversation(
        conversation: &Conversation,
        label: &str,
        mut members: Vec<String>,
    ) -> Self {
        // A DM with a single member is a conversation with oneself; readers
        // expect both ends of a DM, so the member is doubled.
        if conversation.is_im && members.len() == 1 {
            if let Some(only) = members.first().cloned() {
                members.push(only);
            }
        }

        if conversation.conversation_type().is_direct() {
            return Self {
                id: conversation.id.clone(),
                created: conversation.created,
                members,
                name: None,
                creator: None,
                is_archived: None,
                is_general: None,
                topic: None,
                purpose: None,
            };
        }

        Self {
            id: conversation.id.clone(),
            created: conversation.created,
            members,
            name: Some(label.to_string()),
            creator: conversation.creator.clone(),
            is_archived: conversation.is_archived,
            is_general: conversation.is_general,
            topic: set_entry(&conversation.topic),
            purpose: set_entry(&conversation.purpose),
        }
    }
}

/// Topic/purpose are archived only when a value was ever set upstream.
fn set_entry(entry: &Option<TopicEntry>) -> Option<TopicEntry> {
    entry.as_ref().filter(|e| !e.value.is_empty()).cloned()
}

/// Produces the set of conversations to back up. An explicit id skips the
/// directory walk entirely and resolves through `conversations.info`.
pub async fn enumerate<T: Transport>(
    client: &ApiClient<T>,
    types: &[ConversationType],
    explicit_id: Option<&str>,
) -> Result<Vec<Conversation>> {
    if let Some(id) = explicit_id {
        return Ok(vec![fetch_info(client, id).await?]);
    }

    let types_param = types
        .iter()
        .map(|t| t.request_name())
        .collect::<Vec<_>>()
        .join(",");

    let mut conversations = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let mut params: Vec<(&str, String)> = vec![
            ("types", types_param.clone()),
            ("limit", LIST_PAGE_LIMIT.to_string()),
            ("exclude_archived", "true".to_string()),
        ];
        if let Some(cursor) = &cursor {
            params.push(("cursor", cursor.clone()));
        }

        let body = client.call("conversations.list", &params).await?;
        conversations.extend(parse_channel_array(&body)?);

        match next_cursor(&body) {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok(conversations)
}

async fn fetch_info<T: Transport>(client: &ApiClient<T>, id: &str) -> Result<Conversation> {
    let body = client
        .call("conversations.info", &[("channel", id.to_string())])
        .await?;
    let channel = body.get("channel").cloned().unwrap_or(Value::Null);
    serde_json::from_value(channel).map_err(|e| BackupError::Api {
        method: "conversations.info".to_string(),
        error: format!("undecodable channel record: {e}"),
    })
}

fn parse_channel_array(body: &Value) -> Result<Vec<Conversation>> {
    match body.get("channels") {
        None => Ok(Vec::new()),
        Some(channels) => {
            serde_json::from_value(channels.clone()).map_err(|e| BackupError::Api {
                method: "conversations.list".to_string(),
                error: format!("undecodable channels array: {e}"),
            })
        }
    }
}

/// Full member list of one conversation, paginated to exhaustion.
pub async fn fetch_members<T: Transport>(
    client: &ApiClient<T>,
    channel_id: &str,
) -> Result<Vec<String>> {
    let mut members = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let mut params: Vec<(&str, String)> = vec![
            ("channel", channel_id.to_string()),
            ("limit", LIST_PAGE_LIMIT.to_string()),
        ];
        if let Some(cursor) = &cursor {
            params.push(("cursor", cursor.clone()));
        }

        let body = client.call("conversations.members", &params).await?;
        if let Some(page) = body.get("members").and_then(Value::as_array) {
            members.extend(
                page.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string),
            );
        }

        match next_cursor(&body) {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok(members)
}
