//! Teams and the membership rows that bind users to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    /// Identity-provider id of the LEADER or ORGANIZATION account that created it.
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

impl Team {
    pub fn new(name: String, owner_id: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            owner_id,
            created_at: Utc::now(),
        }
    }
}

/// Membership status. Moves forward only: `Invited` → `Answered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Invited,
    Answered,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Invited => "invited",
            MembershipStatus::Answered => "answered",
        }
    }
}

impl FromStr for MembershipStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invited" => Ok(MembershipStatus::Invited),
            "answered" => Ok(MembershipStatus::Answered),
            other => Err(format!("unknown membership status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMembership {
    pub user_id: String,
    pub team_id: Uuid,
    pub status: MembershipStatus,
    pub joined_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
}

impl TeamMembership {
    pub fn invited(user_id: String, team_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            team_id,
            status: MembershipStatus::Invited,
            joined_at: now,
            answered_at: None,
        }
    }

    /// Returns false when already answered; the original timestamp is kept.
    pub fn mark_answered(&mut self, now: DateTime<Utc>) -> bool {
        match self.status {
            MembershipStatus::Answered => false,
            MembershipStatus::Invited => {
                self.status = MembershipStatus::Answered;
                self.answered_at = Some(now);
                true
            }
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTeamRequest {
    #[validate(length(min = 1, max = 120, message = "Team name must be 1-120 characters"))]
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CreateTeamResponse {
    pub team: Team,
    pub invite_url: String,
}
