use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Invite held in the browser context while the user authenticates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingInvite {
    pub token: String,
    pub team_name: String,
    pub stored_at: DateTime<Utc>,
}

/// Signed body of an invite token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InviteClaims {
    pub team_id: Uuid,
    /// Unix seconds; absent for invites that never expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

/// `?invite=<token>&invite_name=<teamName>` hand-off parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InviteParams {
    pub invite: Option<String>,
    pub invite_name: Option<String>,
}
