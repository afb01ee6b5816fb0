use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;

use super::payload::MessagePayload;
use crate::core::shared::models::MessageRow;

pub const ACTIVE_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize)]
pub struct ConversationMessage {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub payload: MessagePayload,
}

impl From<MessageRow> for ConversationMessage {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            created_at: row.created_at,
            payload: MessagePayload::from_value(&row.message),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub session_id: String,
    pub messages: Vec<ConversationMessage>,
    pub message_count: usize,
    pub last_activity: DateTime<Utc>,
    pub last_message_preview: String,
    pub unread: bool,
}

impl Conversation {
    fn from_sorted(session_id: String, messages: Vec<ConversationMessage>) -> Option<Self> {
        let last = messages.last()?;
        Some(Self {
            last_activity: last.created_at,
            last_message_preview: last.payload.preview(),
            unread: last.payload.awaits_reply(),
            message_count: messages.len(),
            session_id,
            messages,
        })
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.last_activity >= now - Duration::hours(ACTIVE_WINDOW_HOURS)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Aggregate {
    pub conversations: Vec<Conversation>,
    pub active_sessions: usize,
    pub average_messages: f64,
    pub total_messages: usize,
    /// The input hit the row cap, so older history may be missing.
    pub truncated: bool,
}

/// Groups raw rows into per-session conversations.
///
/// Rows with no session id are dropped. Each conversation is ordered oldest
/// first; conversations are ordered by last activity, newest first.
pub fn aggregate(rows: Vec<MessageRow>, cap: i64, now: DateTime<Utc>) -> Aggregate {
    let truncated = cap > 0 && rows.len() as i64 >= cap;

    let mut sessions: HashMap<String, Vec<ConversationMessage>> = HashMap::new();
    for mut row in rows {
        let Some(session_id) = row.session_id.take() else {
            continue;
        };
        sessions.entry(session_id).or_default().push(row.into());
    }

    let mut conversations: Vec<Conversation> = sessions
        .into_iter()
        .filter_map(|(session_id, mut messages)| {
            messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            Conversation::from_sorted(session_id, messages)
        })
        .collect();
    conversations.sort_by(|a, b| {
        b.last_activity
            .cmp(&a.last_activity)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });

    let total_messages: usize = conversations.iter().map(|c| c.message_count).sum();
    let active_sessions = conversations.iter().filter(|c| c.is_active(now)).count();
    let average_messages = if conversations.is_empty() {
        0.0
    } else {
        let raw = total_messages as f64 / conversations.len() as f64;
        (raw * 100.0).round() / 100.0
    };

    Aggregate {
        conversations,
        active_sessions,
        average_messages,
        total_messages,
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: i64, session: Option<&str>, minutes_ago: i64, kind: &str) -> MessageRow {
        let now = Utc::now();
        MessageRow {
            id,
            company_id: 1,
            session_id: session.map(str::to_string),
            message: json!({"type": kind, "content": format!("msg {}", id)}),
            created_at: now - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn test_empty_input() {
        let result = aggregate(vec![], 1000, Utc::now());
        assert!(result.conversations.is_empty());
        assert_eq!(result.active_sessions, 0);
        assert_eq!(result.average_messages, 0.0);
        assert!(!result.truncated);
    }

    #[test]
    fn test_grouping_preserves_rows_and_sorts_each_group() {
        // newest first, as the store returns them
        let rows = vec![
            row(6, Some("b"), 1, "ai"),
            row(5, Some("a"), 2, "human"),
            row(4, None, 3, "human"),
            row(3, Some("b"), 4, "human"),
            row(2, Some("a"), 5, "ai"),
            row(1, Some("a"), 6, "human"),
        ];
        let with_session = rows.iter().filter(|r| r.session_id.is_some()).count();

        let result = aggregate(rows, 1000, Utc::now());
        let flattened: usize = result.conversations.iter().map(|c| c.messages.len()).sum();
        assert_eq!(flattened, with_session);
        assert_eq!(result.total_messages, with_session);

        for conversation in &result.conversations {
            assert!(conversation
                .messages
                .windows(2)
                .all(|w| w[0].created_at <= w[1].created_at));
        }
        assert_eq!(result.conversations[0].session_id, "b");
        assert_eq!(result.average_messages, 2.5);
    }

    #[test]
    fn test_unread_follows_last_message() {
        let rows = vec![
            row(3, Some("waiting"), 1, "human"),
            row(2, Some("answered"), 2, "ai"),
            row(1, Some("answered"), 3, "human"),
        ];
        let result = aggregate(rows, 1000, Utc::now());
        let by_id: HashMap<_, _> = result
            .conversations
            .iter()
            .map(|c| (c.session_id.as_str(), c.unread))
            .collect();
        assert_eq!(by_id["waiting"], true);
        assert_eq!(by_id["answered"], false);
    }

    #[test]
    fn test_active_sessions_window() {
        let rows = vec![
            row(2, Some("recent"), 60, "human"),
            row(1, Some("stale"), 60 * 30, "human"),
        ];
        let result = aggregate(rows, 1000, Utc::now());
        assert_eq!(result.active_sessions, 1);
    }

    #[test]
    fn test_truncated_when_cap_reached() {
        let rows = vec![row(2, Some("a"), 1, "human"), row(1, Some("a"), 2, "human")];
        assert!(aggregate(rows.clone(), 2, Utc::now()).truncated);
        assert!(!aggregate(rows, 3, Utc::now()).truncated);
    }
}
