//! DTOs for interacting with the token service

use serde::{Deserialize, Serialize};

use crate::RoleToken;

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RoleTokenResponse {
    pub token: RoleToken,
    pub expiry_time: i64,
}
