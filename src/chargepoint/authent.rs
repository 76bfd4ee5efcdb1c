//! Authentication manager
//!
//! Resolves `authorize` requests against the local list, the cache and the
//! Central System, in that precedence order:
//!
//! 1. an enabled local list containing the tag is authoritative;
//! 2. online with `LocalPreAuthorize` disabled: always ask the Central
//!    System;
//! 3. online with `LocalPreAuthorize` enabled: an Accepted cache hit
//!    short-circuits, otherwise ask and cache the answer;
//! 4. offline: an Accepted cache hit is used when `LocalAuthorizeOffline`
//!    is enabled, otherwise the tag is Invalid.
//!
//! The cache stores Accepted entries only; a non-Accepted online answer
//! for a cached tag invalidates it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::chargepoint::ocppconfig::OcppConfigStore;
use crate::database::repositories::{
    AuthentCacheRepository, AuthentEntry, InternalConfigRepository, LocalListRepository,
};
use crate::messages::{
    AuthorizeRequest, ClearCacheResponse, GetLocalListVersionResponse, SendLocalListRequest,
    SendLocalListResponse,
};
use crate::rpc::{from_payload, to_payload, CallResult, HandlerResult, MessageHandler, MessageSender, OcppError};
use crate::support::errors::ChargePointResult;
use crate::types::{
    AuthorizationStatus, ClearCacheStatus, IdTagInfo, UpdateStatus, UpdateType,
};

const LOCAL_LIST_VERSION_KEY: &str = "LocalListVersion";

pub struct AuthentManager {
    cache_capacity: u32,
    ocpp_config: Arc<OcppConfigStore>,
    sender: Arc<MessageSender>,
    cache: AuthentCacheRepository,
    local_list: LocalListRepository,
    internal_config: InternalConfigRepository,
}

impl AuthentManager {
    pub async fn open(
        cache_capacity: u32,
        ocpp_config: Arc<OcppConfigStore>,
        sender: Arc<MessageSender>,
        cache: AuthentCacheRepository,
        local_list: LocalListRepository,
        internal_config: InternalConfigRepository,
    ) -> ChargePointResult<Self> {
        internal_config.init_key(LOCAL_LIST_VERSION_KEY, "0").await?;

        let manager = Self {
            cache_capacity,
            ocpp_config,
            sender,
            cache,
            local_list,
            internal_config,
        };
        let purged = manager.cache.purge_expired(Utc::now()).await?;
        if purged > 0 {
            debug!(purged, "Purged expired cache entries");
        }
        Ok(manager)
    }

    /// Resolve an id tag to its authorization status and parent id.
    pub async fn authorize(
        &self,
        id_tag: &str,
    ) -> ChargePointResult<(AuthorizationStatus, Option<String>)> {
        let cfg = self.ocpp_config.snapshot();
        let now = Utc::now();

        if cfg.local_auth_list_enabled {
            if let Some(entry) = self.local_list.get(id_tag).await? {
                // an expired entry is treated as no match
                if entry.expiry_date.map_or(true, |expiry| expiry > now) {
                    debug!(id_tag, status = %entry.status, "Authorized from local list");
                    return Ok((entry.status, entry.parent_id_tag));
                }
            }
        }

        if self.sender.is_connected() {
            if cfg.local_pre_authorize && cfg.authorization_cache_enabled {
                if let Some(entry) = self.cache.get(id_tag).await? {
                    if entry.status == AuthorizationStatus::Accepted
                        && entry.expiry_date.map_or(true, |expiry| expiry > now)
                    {
                        debug!(id_tag, "Authorized from cache");
                        return Ok((AuthorizationStatus::Accepted, entry.parent_id_tag));
                    }
                }
            }

            let request = AuthorizeRequest {
                id_tag: id_tag.to_string(),
            };
            return match self.sender.send(&request).await {
                CallResult::Ok(response) => {
                    let info = response.id_tag_info;
                    self.update_cache_entry(id_tag, &info).await?;
                    info!(id_tag, status = %info.status, "Authorized online");
                    Ok((info.status, info.parent_id_tag))
                }
                other => {
                    warn!(id_tag, "Online authorization failed: {other:?}");
                    Ok((AuthorizationStatus::Invalid, None))
                }
            };
        }

        // Disconnected
        if cfg.local_authorize_offline && cfg.authorization_cache_enabled {
            if let Some(entry) = self.cache.get(id_tag).await? {
                if entry.status == AuthorizationStatus::Accepted
                    && entry.expiry_date.map_or(true, |expiry| expiry > now)
                {
                    debug!(id_tag, "Authorized offline from cache");
                    return Ok((AuthorizationStatus::Accepted, entry.parent_id_tag));
                }
            }
        }
        if cfg.allow_offline_tx_for_unknown_id {
            return Ok((AuthorizationStatus::Accepted, None));
        }
        Ok((AuthorizationStatus::Invalid, None))
    }

    /// Fold an id tag status received in any Central System response into
    /// the cache: Accepted entries are stored, anything else invalidates.
    pub async fn update_cache_entry(
        &self,
        id_tag: &str,
        info: &IdTagInfo,
    ) -> ChargePointResult<()> {
        if !self.ocpp_config.snapshot().authorization_cache_enabled {
            return Ok(());
        }
        if info.status == AuthorizationStatus::Accepted {
            self.cache
                .put(
                    &AuthentEntry {
                        id_tag: id_tag.to_string(),
                        status: info.status,
                        parent_id_tag: info.parent_id_tag.clone(),
                        expiry_date: info.expiry_date,
                    },
                    self.cache_capacity,
                )
                .await?;
        } else {
            self.cache.remove(id_tag).await?;
        }
        Ok(())
    }

    pub async fn local_list_version(&self) -> ChargePointResult<i32> {
        Ok(self
            .internal_config
            .get_key(LOCAL_LIST_VERSION_KEY)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    async fn set_local_list_version(&self, version: i32) -> ChargePointResult<()> {
        self.internal_config
            .set_key(LOCAL_LIST_VERSION_KEY, &version.to_string())
            .await
    }

    async fn send_local_list(
        &self,
        request: SendLocalListRequest,
    ) -> ChargePointResult<UpdateStatus> {
        let cfg = self.ocpp_config.snapshot();
        if !cfg.local_auth_list_enabled {
            return Ok(UpdateStatus::NotSupported);
        }

        let current = self.local_list_version().await?;
        if request.list_version <= current {
            warn!(
                requested = request.list_version,
                current, "Local list version must increase"
            );
            return Ok(UpdateStatus::VersionMismatch);
        }

        let entries = request.local_authorization_list.unwrap_or_default();
        if entries.len() > cfg.send_local_list_max_length as usize {
            return Ok(UpdateStatus::Failed);
        }

        match request.update_type {
            UpdateType::Full => {
                if entries.iter().any(|e| e.id_tag_info.is_none()) {
                    return Ok(UpdateStatus::Failed);
                }
                if entries.len() > cfg.local_auth_list_max_length as usize {
                    return Ok(UpdateStatus::Failed);
                }
                let rows: Vec<AuthentEntry> = entries
                    .iter()
                    .map(|e| {
                        let info = e.id_tag_info.as_ref().unwrap();
                        AuthentEntry {
                            id_tag: e.id_tag.clone(),
                            status: info.status,
                            parent_id_tag: info.parent_id_tag.clone(),
                            expiry_date: info.expiry_date,
                        }
                    })
                    .collect();
                self.local_list.replace_all(&rows).await?;
            }
            UpdateType::Differential => {
                // Pre-compute the resulting length so a too-long update
                // fails without touching the stored list
                let mut projected = self.local_list.count().await? as i64;
                for entry in &entries {
                    let exists = self.local_list.get(&entry.id_tag).await?.is_some();
                    match (&entry.id_tag_info, exists) {
                        (Some(_), false) => projected += 1,
                        (None, true) => projected -= 1,
                        _ => {}
                    }
                }
                if projected > i64::from(cfg.local_auth_list_max_length) {
                    return Ok(UpdateStatus::Failed);
                }

                for entry in entries {
                    match entry.id_tag_info {
                        Some(info) => {
                            self.local_list
                                .upsert(&AuthentEntry {
                                    id_tag: entry.id_tag,
                                    status: info.status,
                                    parent_id_tag: info.parent_id_tag,
                                    expiry_date: info.expiry_date,
                                })
                                .await?;
                        }
                        None => self.local_list.remove(&entry.id_tag).await?,
                    }
                }
            }
        }

        self.set_local_list_version(request.list_version).await?;
        info!(version = request.list_version, "Local list updated");
        Ok(UpdateStatus::Accepted)
    }

    async fn clear_cache(&self) -> ChargePointResult<ClearCacheStatus> {
        if !self.ocpp_config.snapshot().authorization_cache_enabled {
            return Ok(ClearCacheStatus::Rejected);
        }
        self.cache.clear().await?;
        Ok(ClearCacheStatus::Accepted)
    }
}

#[async_trait]
impl MessageHandler for AuthentManager {
    async fn handle(&self, action: &str, payload: Value) -> HandlerResult {
        match action {
            "GetLocalListVersion" => {
                let list_version = if self.ocpp_config.snapshot().local_auth_list_enabled {
                    self.local_list_version()
                        .await
                        .map_err(|e| OcppError::internal(e.to_string()))?
                } else {
                    -1
                };
                to_payload(&GetLocalListVersionResponse { list_version })
            }
            "SendLocalList" => {
                let request: SendLocalListRequest = from_payload(payload)?;
                let status = self
                    .send_local_list(request)
                    .await
                    .map_err(|e| OcppError::internal(e.to_string()))?;
                to_payload(&SendLocalListResponse { status })
            }
            "ClearCache" => {
                let status = self
                    .clear_cache()
                    .await
                    .map_err(|e| OcppError::internal(e.to_string()))?;
                to_payload(&ClearCacheResponse { status })
            }
            _ => Err(OcppError::not_implemented(action)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OcppConfig;
    use crate::database::open_in_memory;
    use crate::rpc::{MessageDispatcher, RpcClient};
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::time::Duration;

    async fn manager_with(config: OcppConfig) -> AuthentManager {
        let db = open_in_memory().await.unwrap();
        // a client that was never started: the offline code paths apply
        let rpc = Arc::new(RpcClient::new(
            Arc::new(MessageDispatcher::new()),
            Duration::from_secs(1),
            Duration::from_secs(1),
        ));
        AuthentManager::open(
            3,
            Arc::new(OcppConfigStore::new(config)),
            Arc::new(MessageSender::new(rpc)),
            AuthentCacheRepository::new(db.clone()),
            LocalListRepository::new(db.clone()),
            InternalConfigRepository::new(db),
        )
        .await
        .unwrap()
    }

    fn offline_config() -> OcppConfig {
        OcppConfig {
            local_auth_list_enabled: true,
            authorization_cache_enabled: true,
            local_authorize_offline: true,
            local_pre_authorize: true,
            ..OcppConfig::default()
        }
    }

    async fn send_local_list(manager: &AuthentManager, payload: serde_json::Value) -> UpdateStatus {
        let response = manager.handle("SendLocalList", payload).await.unwrap();
        serde_json::from_value::<SendLocalListResponse>(response)
            .unwrap()
            .status
    }

    async fn list_version(manager: &AuthentManager) -> i32 {
        let response = manager
            .handle("GetLocalListVersion", json!({}))
            .await
            .unwrap();
        serde_json::from_value::<GetLocalListVersionResponse>(response)
            .unwrap()
            .list_version
    }

    #[tokio::test]
    async fn full_update_then_differential() {
        let manager = manager_with(offline_config()).await;
        let expiry = (Utc::now() + ChronoDuration::seconds(1000)).to_rfc3339();

        let status = send_local_list(
            &manager,
            json!({
                "listVersion": 1,
                "updateType": "Full",
                "localAuthorizationList": [
                    {"idTag": "TAG1", "idTagInfo": {"status": "Accepted", "parentIdTag": "PARENT_TAG1", "expiryDate": expiry}},
                    {"idTag": "TAG2", "idTagInfo": {"status": "Invalid"}},
                    {"idTag": "TAG3", "idTagInfo": {"status": "Blocked"}}
                ]
            }),
        )
        .await;
        assert_eq!(status, UpdateStatus::Accepted);
        assert_eq!(list_version(&manager).await, 1);

        let (status, parent) = manager.authorize("TAG1").await.unwrap();
        assert_eq!(status, AuthorizationStatus::Accepted);
        assert_eq!(parent.as_deref(), Some("PARENT_TAG1"));
        // unknown tag, offline, empty cache
        let (status, _) = manager.authorize("TAG4").await.unwrap();
        assert_eq!(status, AuthorizationStatus::Invalid);

        // a second Full update replaces the list entirely
        let status = send_local_list(
            &manager,
            json!({
                "listVersion": 2,
                "updateType": "Full",
                "localAuthorizationList": [
                    {"idTag": "TAG4", "idTagInfo": {"status": "Accepted"}}
                ]
            }),
        )
        .await;
        assert_eq!(status, UpdateStatus::Accepted);
        assert_eq!(list_version(&manager).await, 2);
        assert!(manager.local_list.get("TAG1").await.unwrap().is_none());
        assert!(manager.local_list.get("TAG2").await.unwrap().is_none());
        assert!(manager.local_list.get("TAG3").await.unwrap().is_none());
        let (status, _) = manager.authorize("TAG4").await.unwrap();
        assert_eq!(status, AuthorizationStatus::Accepted);

        // differential: missing idTagInfo deletes, expired entries are
        // dead on lookup, future entries are authoritative
        let past = (Utc::now() - ChronoDuration::seconds(1000)).to_rfc3339();
        let future = (Utc::now() + ChronoDuration::seconds(1000)).to_rfc3339();
        let status = send_local_list(
            &manager,
            json!({
                "listVersion": 3,
                "updateType": "Differential",
                "localAuthorizationList": [
                    {"idTag": "TAG4"},
                    {"idTag": "TAG7", "idTagInfo": {"status": "Blocked", "expiryDate": past}},
                    {"idTag": "TAG8", "idTagInfo": {"status": "Blocked", "parentIdTag": "PARENT_TAG8", "expiryDate": future}}
                ]
            }),
        )
        .await;
        assert_eq!(status, UpdateStatus::Accepted);
        assert!(manager.local_list.get("TAG4").await.unwrap().is_none());
        let (status, _) = manager.authorize("TAG7").await.unwrap();
        assert_eq!(status, AuthorizationStatus::Invalid);
        let (status, parent) = manager.authorize("TAG8").await.unwrap();
        assert_eq!(status, AuthorizationStatus::Blocked);
        assert_eq!(parent.as_deref(), Some("PARENT_TAG8"));
    }

    #[tokio::test]
    async fn version_must_strictly_increase() {
        let manager = manager_with(offline_config()).await;
        let payload = json!({
            "listVersion": 1,
            "updateType": "Full",
            "localAuthorizationList": [
                {"idTag": "TAG1", "idTagInfo": {"status": "Accepted"}}
            ]
        });
        assert_eq!(send_local_list(&manager, payload.clone()).await, UpdateStatus::Accepted);
        assert_eq!(
            send_local_list(&manager, payload).await,
            UpdateStatus::VersionMismatch
        );
        assert_eq!(list_version(&manager).await, 1);
    }

    #[tokio::test]
    async fn full_update_with_missing_info_changes_nothing() {
        let manager = manager_with(offline_config()).await;
        let status = send_local_list(
            &manager,
            json!({
                "listVersion": 1,
                "updateType": "Full",
                "localAuthorizationList": [{"idTag": "TAG1"}]
            }),
        )
        .await;
        assert_eq!(status, UpdateStatus::Failed);
        assert_eq!(list_version(&manager).await, 0);
        assert_eq!(manager.local_list.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn disabled_list_is_not_supported() {
        let manager = manager_with(OcppConfig {
            local_auth_list_enabled: false,
            ..offline_config()
        })
        .await;
        let status = send_local_list(
            &manager,
            json!({"listVersion": 1, "updateType": "Full", "localAuthorizationList": []}),
        )
        .await;
        assert_eq!(status, UpdateStatus::NotSupported);
        assert_eq!(list_version(&manager).await, -1);
    }

    #[tokio::test]
    async fn local_list_preempts_cache() {
        let manager = manager_with(offline_config()).await;
        // TAG2 invalid in the list, but Accepted in the cache
        send_local_list(
            &manager,
            json!({
                "listVersion": 1,
                "updateType": "Full",
                "localAuthorizationList": [{"idTag": "TAG2", "idTagInfo": {"status": "Invalid"}}]
            }),
        )
        .await;
        manager
            .update_cache_entry(
                "TAG2",
                &IdTagInfo {
                    status: AuthorizationStatus::Accepted,
                    parent_id_tag: None,
                    expiry_date: None,
                },
            )
            .await
            .unwrap();

        let (status, _) = manager.authorize("TAG2").await.unwrap();
        assert_eq!(status, AuthorizationStatus::Invalid);
    }

    #[tokio::test]
    async fn offline_cache_usage_honours_local_authorize_offline() {
        let manager = manager_with(offline_config()).await;
        let info = IdTagInfo {
            status: AuthorizationStatus::Accepted,
            parent_id_tag: Some("PARENT".to_string()),
            expiry_date: None,
        };
        manager.update_cache_entry("TAG4", &info).await.unwrap();

        let (status, parent) = manager.authorize("TAG4").await.unwrap();
        assert_eq!(status, AuthorizationStatus::Accepted);
        assert_eq!(parent.as_deref(), Some("PARENT"));

        // with offline authorization disabled, the cache must not answer
        let manager = manager_with(OcppConfig {
            local_authorize_offline: false,
            ..offline_config()
        })
        .await;
        manager.update_cache_entry("TAG4", &info).await.unwrap();
        let (status, _) = manager.authorize("TAG4").await.unwrap();
        assert_eq!(status, AuthorizationStatus::Invalid);
    }

    #[tokio::test]
    async fn clear_cache_forgets_entries() {
        let manager = manager_with(offline_config()).await;
        manager
            .update_cache_entry(
                "TAG9",
                &IdTagInfo {
                    status: AuthorizationStatus::Accepted,
                    parent_id_tag: None,
                    expiry_date: None,
                },
            )
            .await
            .unwrap();

        let response = manager.handle("ClearCache", json!({})).await.unwrap();
        assert_eq!(response["status"], "Accepted");

        let (status, _) = manager.authorize("TAG9").await.unwrap();
        assert_eq!(status, AuthorizationStatus::Invalid);
    }

    #[tokio::test]
    async fn clear_cache_rejected_when_cache_disabled() {
        let manager = manager_with(OcppConfig {
            authorization_cache_enabled: false,
            ..offline_config()
        })
        .await;
        let response = manager.handle("ClearCache", json!({})).await.unwrap();
        assert_eq!(response["status"], "Rejected");
    }

    #[tokio::test]
    async fn cache_only_keeps_accepted_and_evicts_lru() {
        let manager = manager_with(offline_config()).await;
        let accepted = IdTagInfo {
            status: AuthorizationStatus::Accepted,
            parent_id_tag: None,
            expiry_date: None,
        };
        // non-Accepted entries never enter the cache
        manager
            .update_cache_entry(
                "BLOCKED",
                &IdTagInfo {
                    status: AuthorizationStatus::Blocked,
                    parent_id_tag: None,
                    expiry_date: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(manager.cache.count().await.unwrap(), 0);

        // capacity is 3: a fourth entry evicts the least recently used
        for tag in ["A", "B", "C"] {
            manager.update_cache_entry(tag, &accepted).await.unwrap();
        }
        let _ = manager.authorize("A").await.unwrap(); // refresh A
        manager.update_cache_entry("D", &accepted).await.unwrap();
        assert_eq!(manager.cache.count().await.unwrap(), 3);
        assert!(manager.cache.get("B").await.unwrap().is_none());
        assert!(manager.cache.get("A").await.unwrap().is_some());

        // a later non-Accepted answer invalidates the cached entry
        manager
            .update_cache_entry(
                "A",
                &IdTagInfo {
                    status: AuthorizationStatus::Expired,
                    parent_id_tag: None,
                    expiry_date: None,
                },
            )
            .await
            .unwrap();
        assert!(manager.cache.get("A").await.unwrap().is_none());
    }
}
