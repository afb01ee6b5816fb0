//! Background reconciliation for lead deletions that stopped halfway.
//!
//! A purge request is written before the deletes and completed after them.
//! Anything still open past the grace period gets its deletes re-run, limited
//! to rows that already existed when the request was raised.

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::contacts::purge_rows;
use crate::core::realtime::{ChangeEvent, ChangeKind};
use crate::core::shared::error::CrmResult;
use crate::core::shared::state::AppState;

const SWEEP_BATCH: i64 = 100;

/// Returns how many open purge requests were completed.
pub async fn sweep_once(state: &AppState, now: DateTime<Utc>) -> CrmResult<usize> {
    let grace = Duration::seconds(state.config.maintenance.purge_grace_secs.max(0));
    let stale = state.stores.purges.stale(now - grace, SWEEP_BATCH).await?;
    if stale.is_empty() {
        debug!("Purge sweep: nothing to reconcile");
        return Ok(0);
    }

    let mut completed = 0;
    for request in stale {
        let counts = match purge_rows(
            &state.stores,
            request.company_id,
            &request.phone,
            request.requested_at,
        )
        .await
        {
            Ok(counts) => counts,
            Err(e) => {
                warn!(
                    "Purge sweep failed for {} in company {}: {}",
                    request.phone, request.company_id, e
                );
                continue;
            }
        };
        if let Err(e) = state.stores.purges.complete(request.id, now).await {
            warn!("Purge sweep could not close request {}: {}", request.id, e);
            continue;
        }

        info!(
            "Purge sweep finished {} in company {} ({} leads, {} messages)",
            request.phone, request.company_id, counts.leads, counts.messages
        );
        if counts.leads > 0 {
            state.changes.publish(ChangeEvent::new(
                request.company_id,
                ChangeKind::LeadDeleted,
                request.phone.as_str(),
            ));
        }
        completed += 1;
    }
    Ok(completed)
}

pub fn spawn_purge_sweeper(state: Arc<AppState>) -> JoinHandle<()> {
    let every = std::time::Duration::from_secs(
        state.config.maintenance.purge_sweep_interval_secs.max(1),
    );
    tokio::spawn(async move {
        info!("Purge sweeper started, every {:?}", every);
        let mut ticker = interval(every);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_once(&state, Utc::now()).await {
                error!("Purge sweep failed: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::service::InboundMessage;
    use crate::conversations::ConversationsService;
    use crate::core::shared::models::PurgeRequest;
    use crate::contacts::types::AddContactRequest;
    use crate::contacts::ContactsService;
    use crate::core::permissions::{authorize, Caller};
    use crate::core::shared::error::CrmError;
    use crate::core::shared::models::NewMembership;
    use crate::core::shared::test_utils::{TestAppStateBuilder, TestHarness};
    use uuid::Uuid;

    const PHONE: &str = "5511999990000";

    fn inbound() -> InboundMessage {
        InboundMessage {
            phone: PHONE.into(),
            name: Some("Ana".into()),
            content: Some("Olá".into()),
            media_url: None,
            mime_type: None,
            caption: None,
            received_at: None,
        }
    }

    async fn open_request(harness: &TestHarness, age_secs: i64) {
        harness
            .state
            .stores
            .purges
            .record(PurgeRequest {
                id: Uuid::new_v4(),
                company_id: 5,
                phone: PHONE.into(),
                requested_at: Utc::now() - Duration::seconds(age_secs),
                completed_at: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_only_removes_rows_older_than_request() {
        let harness = TestAppStateBuilder::new().build();
        let conversations = ConversationsService::new(harness.state.clone());
        conversations.ingest(5, inbound()).await.unwrap();
        open_request(&harness, 0).await;

        let mut later = inbound();
        later.received_at = Some((Utc::now() + Duration::minutes(1)).to_rfc3339());
        conversations.ingest(5, later).await.unwrap();
        assert_eq!(harness.store.message_count(5, PHONE).await, 2);

        let done = sweep_once(&harness.state, Utc::now() + Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(done, 1);
        assert_eq!(harness.store.lead_count(5, PHONE).await, 0);
        assert_eq!(harness.store.message_count(5, PHONE).await, 1);
        assert!(harness.store.purge_requests().await[0].completed_at.is_some());

        assert_eq!(sweep_once(&harness.state, Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retried_delete_closes_failed_request() {
        let harness = TestAppStateBuilder::new().build();
        let contacts = ContactsService::new(harness.state.clone());
        contacts
            .add_contact(
                5,
                AddContactRequest {
                    name: "Ana".into(),
                    phone: PHONE.into(),
                    qualification: None,
                    tags: vec![],
                },
            )
            .await
            .unwrap();

        let user_id = Uuid::new_v4();
        harness
            .store
            .seed_membership(NewMembership {
                id: Uuid::new_v4(),
                user_id,
                company_id: 5,
                email: "admin@example.com".into(),
                role: "admin".into(),
                scopes: vec![],
                active: true,
                created_at: Utc::now(),
            })
            .await;
        let caller = Caller {
            user_id,
            email: Some("admin@example.com".into()),
        };
        let access = authorize(&harness.state, &caller, 5, &["leads:delete"])
            .await
            .unwrap();

        harness.store.fail_next("messages.delete_session").await;
        let err = contacts
            .delete_with_conversations(&access, 5, PHONE)
            .await
            .unwrap_err();
        assert!(matches!(err, CrmError::Internal(_)));
        contacts
            .delete_with_conversations(&access, 5, PHONE)
            .await
            .unwrap();

        let purges = harness.store.purge_requests().await;
        assert_eq!(purges.len(), 2);
        assert!(purges.iter().all(|p| p.completed_at.is_some()));

        // The same customer writes in again after the delete.
        ConversationsService::new(harness.state.clone())
            .ingest(5, inbound())
            .await
            .unwrap();

        let done = sweep_once(&harness.state, Utc::now() + Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(done, 0);
        assert_eq!(harness.store.lead_count(5, PHONE).await, 1);
        assert_eq!(harness.store.message_count(5, PHONE).await, 1);
    }

    #[tokio::test]
    async fn test_sweep_leaves_fresh_requests_alone() {
        let harness = TestAppStateBuilder::new().build();
        ConversationsService::new(harness.state.clone())
            .ingest(5, inbound())
            .await
            .unwrap();
        open_request(&harness, 5).await;

        assert_eq!(sweep_once(&harness.state, Utc::now()).await.unwrap(), 0);
        assert_eq!(harness.store.lead_count(5, PHONE).await, 1);
    }

    #[tokio::test]
    async fn test_sweep_retries_after_store_failure() {
        let harness = TestAppStateBuilder::new().build();
        open_request(&harness, 3600).await;
        harness.store.fail_next("messages.delete_session").await;

        assert_eq!(sweep_once(&harness.state, Utc::now()).await.unwrap(), 0);
        assert!(harness.store.purge_requests().await[0].completed_at.is_none());
        assert_eq!(sweep_once(&harness.state, Utc::now()).await.unwrap(), 1);
    }
}
