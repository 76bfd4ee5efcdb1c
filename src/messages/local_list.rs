//! Local authorization list messages

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::types::{AuthorizationData, UpdateStatus, UpdateType};

// ── GetLocalListVersion ────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GetLocalListVersionRequest {}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GetLocalListVersionResponse {
    /// Current list version; 0 when the list is empty, -1 when the local
    /// authorization list is not supported.
    pub list_version: i32,
}

// ── SendLocalList ──────────────────────────────────────────────

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendLocalListRequest {
    pub list_version: i32,
    pub local_authorization_list: Option<Vec<AuthorizationData>>,
    pub update_type: UpdateType,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendLocalListResponse {
    pub status: UpdateStatus,
}
