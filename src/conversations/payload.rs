//! Typed view over the `messages.message` jsonb column.
//!
//! Rows were written by several producers over time: chat-memory style
//! objects (`{"type": "human", "content": ...}`), bare strings, media
//! objects, system notices and rows written by this service. Anything not
//! recognised is kept as `Legacy` so it still counts and still previews.

use serde::Serialize;
use serde_json::{json, Map, Value};

const PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Human,
    Assistant,
    System,
}

impl Role {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "human" | "user" | "contact" => Some(Self::Human),
            "ai" | "assistant" | "bot" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }

    fn stored(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Assistant => "ai",
            Self::System => "system",
        }
    }
}

/// Who produced the message, independent of its chat role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    Contact,
    Agent,
    Automation,
}

impl Author {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "contact" | "lead" | "cliente" => Some(Self::Contact),
            "agent" | "atendente" | "human_agent" => Some(Self::Agent),
            "automation" | "bot" | "ai" | "n8n" => Some(Self::Automation),
            _ => None,
        }
    }

    fn stored(&self) -> &'static str {
        match self {
            Self::Contact => "contact",
            Self::Agent => "agent",
            Self::Automation => "automation",
        }
    }

    fn default_for(role: Role) -> Self {
        match role {
            Role::Human => Self::Contact,
            Role::Assistant | Role::System => Self::Automation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePayload {
    Text {
        role: Role,
        author: Author,
        content: String,
    },
    Attachment {
        role: Role,
        author: Author,
        url: String,
        mime_type: Option<String>,
        caption: Option<String>,
    },
    SystemEvent {
        event: String,
        detail: Option<String>,
    },
    Legacy {
        raw: Value,
    },
}

fn str_field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn truncate(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= PREVIEW_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(PREVIEW_CHARS).collect();
        format!("{}…", cut)
    }
}

impl MessagePayload {
    pub fn agent_text(content: impl Into<String>) -> Self {
        Self::Text {
            role: Role::Assistant,
            author: Author::Agent,
            content: content.into(),
        }
    }

    pub fn contact_text(content: impl Into<String>) -> Self {
        Self::Text {
            role: Role::Human,
            author: Author::Contact,
            content: content.into(),
        }
    }

    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(inner @ Value::Object(_)) => Self::from_value(&inner),
                _ => Self::contact_text(text.clone()),
            },
            Value::Object(obj) => Self::from_object(obj).unwrap_or_else(|| Self::Legacy {
                raw: value.clone(),
            }),
            other => Self::Legacy { raw: other.clone() },
        }
    }

    fn from_object(obj: &Map<String, Value>) -> Option<Self> {
        if let Some(event) = str_field(obj, &["event", "system_event"]) {
            return Some(Self::SystemEvent {
                event: event.to_string(),
                detail: str_field(obj, &["detail", "content"]).map(str::to_string),
            });
        }

        let role = str_field(obj, &["role", "type"]).and_then(Role::parse)?;
        let author = str_field(obj, &["author", "sender", "remetente"])
            .and_then(Author::parse)
            .unwrap_or_else(|| Author::default_for(role));

        if let Some(url) = str_field(obj, &["media_url", "mediaUrl", "url"]) {
            return Some(Self::Attachment {
                role,
                author,
                url: url.to_string(),
                mime_type: str_field(obj, &["mime_type", "mimetype", "mimeType"])
                    .map(str::to_string),
                caption: str_field(obj, &["caption", "content"]).map(str::to_string),
            });
        }

        let content = str_field(obj, &["content", "text", "message"])?;
        if role == Role::System {
            return Some(Self::SystemEvent {
                event: "system".to_string(),
                detail: Some(content.to_string()),
            });
        }
        Some(Self::Text {
            role,
            author,
            content: content.to_string(),
        })
    }

    /// Shape written back to the jsonb column; readable by older consumers
    /// that only know `type` + `content`.
    pub fn to_stored(&self) -> Value {
        match self {
            Self::Text {
                role,
                author,
                content,
            } => json!({
                "type": role.stored(),
                "sender": author.stored(),
                "content": content,
            }),
            Self::Attachment {
                role,
                author,
                url,
                mime_type,
                caption,
            } => json!({
                "type": role.stored(),
                "sender": author.stored(),
                "media_url": url,
                "mime_type": mime_type,
                "caption": caption,
            }),
            Self::SystemEvent { event, detail } => json!({
                "type": "system",
                "event": event,
                "detail": detail,
            }),
            Self::Legacy { raw } => raw.clone(),
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            Self::Text { role, .. } | Self::Attachment { role, .. } => Some(*role),
            Self::SystemEvent { .. } => Some(Role::System),
            Self::Legacy { .. } => None,
        }
    }

    /// Written by the contact and therefore waiting on the team.
    pub fn awaits_reply(&self) -> bool {
        matches!(
            self,
            Self::Text {
                role: Role::Human,
                author: Author::Contact,
                ..
            } | Self::Attachment {
                role: Role::Human,
                author: Author::Contact,
                ..
            }
        )
    }

    pub fn preview(&self) -> String {
        match self {
            Self::Text { content, .. } => truncate(content),
            Self::Attachment { caption, .. } => caption
                .as_deref()
                .map(truncate)
                .unwrap_or_else(|| "[attachment]".to_string()),
            Self::SystemEvent { event, detail } => {
                truncate(detail.as_deref().unwrap_or(event.as_str()))
            }
            Self::Legacy { raw } => match raw {
                Value::Object(obj) => str_field(obj, &["content", "text", "message", "body"])
                    .map(truncate)
                    .unwrap_or_default(),
                Value::Null => String::new(),
                other => truncate(&other.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_memory_shapes() {
        let human = MessagePayload::from_value(&json!({"type": "human", "content": "oi"}));
        assert!(human.awaits_reply());

        let ai = MessagePayload::from_value(&json!({"type": "ai", "content": "olá!"}));
        assert_eq!(ai.role(), Some(Role::Assistant));
        assert!(!ai.awaits_reply());
    }

    #[test]
    fn test_agent_authored_human_role_is_not_unread() {
        let payload = MessagePayload::from_value(
            &json!({"type": "human", "sender": "agent", "content": "respondido"}),
        );
        assert!(!payload.awaits_reply());
    }

    #[test]
    fn test_bare_and_encoded_strings() {
        let bare = MessagePayload::from_value(&json!("quero um orçamento"));
        assert_eq!(bare.preview(), "quero um orçamento");

        let encoded = MessagePayload::from_value(&json!(r#"{"type":"ai","content":"ok"}"#));
        assert_eq!(encoded.role(), Some(Role::Assistant));
    }

    #[test]
    fn test_attachment_and_unknown() {
        let media = MessagePayload::from_value(
            &json!({"type": "human", "mediaUrl": "https://cdn/x.jpg", "mimetype": "image/jpeg"}),
        );
        assert_eq!(media.preview(), "[attachment]");
        assert!(media.awaits_reply());

        let unknown = MessagePayload::from_value(&json!({"foo": 1}));
        assert!(matches!(unknown, MessagePayload::Legacy { .. }));
        assert_eq!(unknown.preview(), "");
    }

    #[test]
    fn test_stored_shape_reads_back() {
        let original = MessagePayload::agent_text("Seu pedido saiu");
        assert_eq!(MessagePayload::from_value(&original.to_stored()), original);
    }

    #[test]
    fn test_preview_truncates() {
        let long = "a".repeat(300);
        let preview = MessagePayload::contact_text(long).preview();
        assert_eq!(preview.chars().count(), PREVIEW_CHARS + 1);
    }
}
