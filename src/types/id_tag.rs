//! Authorization data attached to an id tag

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use super::enums::AuthorizationStatus;

/// Status information about an identifier, as returned by Authorize,
/// StartTransaction and StopTransaction and carried by the local
/// authorization list.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IdTagInfo {
    /// Whether the identifier is allowed for charging.
    pub status: AuthorizationStatus,
    /// Date at which the identifier should be removed from the cache.
    pub expiry_date: Option<DateTime<Utc>>,
    /// Parent identifier, used to group id tags.
    pub parent_id_tag: Option<String>,
}

impl IdTagInfo {
    /// Whether this entry grants access right now.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.status == AuthorizationStatus::Accepted
            && self.expiry_date.map_or(true, |expiry| expiry > now)
    }
}

/// One element of a SendLocalList update. A missing `id_tag_info` in a
/// differential update means the identifier must be removed from the list.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationData {
    pub id_tag: String,
    pub id_tag_info: Option<IdTagInfo>,
}
