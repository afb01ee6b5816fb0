//! Change notifications.
//!
//! Every successful mutation publishes a `ChangeEvent`. Subscribers are the
//! per-company SSE stream and the cache invalidator, which drops the company's
//! cached aggregates so the next read re-fetches in full.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::core::cache::{company_prefix, TtlCache};
use crate::core::permissions::{authorize, scopes, Caller};
use crate::core::shared::error::CrmResult;
use crate::core::shared::models::CompanyId;
use crate::core::shared::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    LeadCreated,
    LeadUpdated,
    LeadDeleted,
    MessageAppended,
    ConversationResolved,
    FollowupChanged,
    MembershipChanged,
    FavoritesChanged,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeadCreated => "lead_created",
            Self::LeadUpdated => "lead_updated",
            Self::LeadDeleted => "lead_deleted",
            Self::MessageAppended => "message_appended",
            Self::ConversationResolved => "conversation_resolved",
            Self::FollowupChanged => "followup_changed",
            Self::MembershipChanged => "membership_changed",
            Self::FavoritesChanged => "favorites_changed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub company_id: CompanyId,
    pub kind: ChangeKind,
    /// Phone, session id or other key of the row that changed.
    pub subject: String,
    pub at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(company_id: CompanyId, kind: ChangeKind, subject: impl Into<String>) -> Self {
        Self {
            company_id,
            kind,
            subject: subject.into(),
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: ChangeEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("Change event dropped: no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}

/// Invalidates cached aggregates for every company that changes. A lagged
/// receiver drops the whole cache since it no longer knows what changed.
pub fn spawn_cache_invalidator<V>(feed: &ChangeFeed, cache: Arc<TtlCache<V>>) -> JoinHandle<()>
where
    V: Clone + Send + Sync + 'static,
{
    let mut rx = feed.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let removed = cache.invalidate_prefix(&company_prefix(event.company_id)).await;
                    log::debug!(
                        "{} on company {}: {} cache entries invalidated",
                        event.kind.as_str(),
                        event.company_id,
                        removed
                    );
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Cache invalidator lagged by {} events, clearing cache", skipped);
                    cache.invalidate_prefix("").await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn company_events(
    rx: broadcast::Receiver<ChangeEvent>,
    company_id: CompanyId,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(move |item| async move {
        match item {
            Ok(event) if event.company_id == company_id => {
                match serde_json::to_string(&event) {
                    Ok(data) => Some(Ok(Event::default().event(event.kind.as_str()).data(data))),
                    Err(e) => {
                        log::error!("Failed to encode change event: {}", e);
                        None
                    }
                }
            }
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => Some(Ok(Event::default()
                .event("resync")
                .data(skipped.to_string()))),
        }
    })
}

async fn stream_changes(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<CompanyId>,
    caller: Caller,
) -> CrmResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    authorize(&state, &caller, company_id, &[scopes::WHATSAPP_READ, scopes::LEADS_READ]).await?;
    log::info!(
        "Realtime stream opened for company {} by {}",
        company_id,
        caller.user_id
    );

    let stream = company_events(state.changes.subscribe(), company_id);
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route("/api/companies/:company/realtime", get(stream_changes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalidator_drops_company_entries() {
        let feed = ChangeFeed::new(16);
        let cache = Arc::new(TtlCache::new(Duration::from_secs(60)));
        cache.insert(format!("{}dashboard", company_prefix(3)), 1u32).await;
        cache.insert(format!("{}dashboard", company_prefix(4)), 2u32).await;

        let handle = spawn_cache_invalidator(&feed, cache.clone());
        feed.publish(ChangeEvent::new(3, ChangeKind::LeadCreated, "5511999990000"));

        for _ in 0..50 {
            if cache.len().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cache.len().await, 1);
        handle.abort();
    }

    #[tokio::test]
    async fn test_company_stream_filters_other_tenants() {
        let feed = ChangeFeed::new(16);
        let stream = company_events(feed.subscribe(), 1);
        tokio::pin!(stream);

        feed.publish(ChangeEvent::new(2, ChangeKind::LeadDeleted, "a"));
        feed.publish(ChangeEvent::new(1, ChangeKind::LeadDeleted, "b"));

        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert!(next.is_some());
    }
}
