//! Per-user favorite conversations, kept as a JSON array of phone numbers in
//! one file per `<namespace>:favorites:<company>:<user>` key.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::permissions::{authorize, scopes, Caller};
use crate::core::realtime::{ChangeEvent, ChangeKind};
use crate::core::shared::error::{CrmError, CrmResult};
use crate::core::shared::models::CompanyId;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::normalize_phone;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoritesBody {
    pub favorites: Vec<String>,
}

#[derive(Debug)]
pub struct FavoritesStore {
    data_dir: PathBuf,
    namespace: String,
    write_lock: Mutex<()>,
}

/// Keeps the string elements of a stored array. Anything else is `None`.
fn coerce(raw: &Value) -> Option<Vec<String>> {
    let items = raw.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
    )
}

fn dedup_in_order(phones: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(phones.len());
    for phone in phones {
        if !out.contains(&phone) {
            out.push(phone);
        }
    }
    out
}

impl FavoritesStore {
    pub fn new(data_dir: PathBuf, namespace: String) -> Self {
        Self {
            data_dir,
            namespace,
            write_lock: Mutex::new(()),
        }
    }

    pub fn key(&self, company_id: CompanyId, user_id: Uuid) -> String {
        format!("{}:favorites:{}:{}", self.namespace, company_id, user_id)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", key.replace(':', "_")))
    }

    async fn write(&self, key: &str, phones: &[String]) -> CrmResult<()> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| CrmError::Internal(format!("create data dir: {}", e)))?;
        let bytes = serde_json::to_vec(phones)
            .map_err(|e| CrmError::Internal(format!("encode favorites: {}", e)))?;

        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| CrmError::Internal(format!("write favorites: {}", e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CrmError::Internal(format!("write favorites: {}", e)))?;
        Ok(())
    }

    /// Missing file reads as empty. Unparseable or mistyped content is
    /// repaired on the way out.
    pub async fn load(&self, company_id: CompanyId, user_id: Uuid) -> CrmResult<Vec<String>> {
        let key = self.key(company_id, user_id);
        let path = self.path_for(&key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CrmError::Internal(format!("read favorites: {}", e))),
        };

        let raw: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        match coerce(&raw) {
            Some(phones) if phones.len() == raw.as_array().map_or(0, Vec::len) => Ok(phones),
            repaired => {
                let phones = repaired.unwrap_or_default();
                warn!("Repairing corrupted favorites for {}", key);
                let _guard = self.write_lock.lock().await;
                self.write(&key, &phones).await?;
                Ok(phones)
            }
        }
    }

    pub async fn save(
        &self,
        company_id: CompanyId,
        user_id: Uuid,
        phones: Vec<String>,
    ) -> CrmResult<Vec<String>> {
        let normalized = phones
            .iter()
            .map(|p| normalize_phone(p))
            .collect::<CrmResult<Vec<_>>>()?;
        let phones = dedup_in_order(normalized);

        let key = self.key(company_id, user_id);
        let _guard = self.write_lock.lock().await;
        self.write(&key, &phones).await?;
        debug!("Saved {} favorites for {}", phones.len(), key);
        Ok(phones)
    }
}

pub async fn get_favorites_handler(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<CompanyId>,
    caller: Caller,
) -> CrmResult<Json<FavoritesBody>> {
    let access = authorize(&state, &caller, company_id, &[scopes::WHATSAPP_READ]).await?;
    let favorites = state.favorites.load(company_id, access.user_id()).await?;
    Ok(Json(FavoritesBody { favorites }))
}

pub async fn put_favorites_handler(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<CompanyId>,
    caller: Caller,
    Json(body): Json<FavoritesBody>,
) -> CrmResult<Json<FavoritesBody>> {
    let access = authorize(&state, &caller, company_id, &[scopes::WHATSAPP_READ]).await?;
    let favorites = state
        .favorites
        .save(company_id, access.user_id(), body.favorites)
        .await?;
    state.changes.publish(ChangeEvent::new(
        company_id,
        ChangeKind::FavoritesChanged,
        access.user_id().to_string(),
    ));
    Ok(Json(FavoritesBody { favorites }))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route(
        "/api/companies/:company/favorites",
        get(get_favorites_handler).put(put_favorites_handler),
    )
}
