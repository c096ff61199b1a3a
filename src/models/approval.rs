use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::Error;

use super::DraftStatus;

/// Lifetime of an approval token, fixed for every request
pub const TOKEN_TTL_DAYS: i64 = 7;

pub fn token_ttl() -> Duration {
    Duration::days(TOKEN_TTL_DAYS)
}

/// The approver's decision on a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn from_approved(approved: bool) -> Self {
        if approved {
            Self::Approved
        } else {
            Self::Rejected
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Draft status reached by this decision
    pub fn status(&self) -> DraftStatus {
        match self {
            Self::Approved => DraftStatus::Approved,
            Self::Rejected => DraftStatus::Rejected,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(Error::Parse(format!("unknown approval response '{}'", other))),
        }
    }
}

/// A token-bearing invitation to decide one draft
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub id: i64,
    pub draft_id: i64,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub token: String,
    pub token_expires_at: DateTime<Utc>,
    pub email_sent: bool,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub response: Option<Decision>,
    pub response_note: Option<String>,
}

impl ApprovalRequest {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.token_expires_at < now
    }

    pub fn is_resolved(&self) -> bool {
        self.responded_at.is_some()
    }
}

/// Returned to the requester after an approval request is issued
#[derive(Debug, Clone, Serialize)]
pub struct IssuedApproval {
    pub approval_request_id: i64,
    pub approval_token: String,
    pub expires_at: DateTime<Utc>,
    pub email_sent: bool,
}

/// Read-only projection of a draft's approval state
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalStatus {
    pub draft_id: i64,
    pub status: DraftStatus,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub rejection_reason: Option<String>,
    /// Most recent first
    pub approval_requests: Vec<ApprovalRequest>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_maps_to_terminal_status() {
        assert_eq!(Decision::from_approved(true).status(), DraftStatus::Approved);
        assert_eq!(Decision::from_approved(false).status(), DraftStatus::Rejected);
        assert_eq!("approved".parse::<Decision>().unwrap(), Decision::Approved);
    }

    #[test]
    fn test_expiry_is_strictly_after_deadline() {
        let now = Utc::now();
        let request = ApprovalRequest {
            id: 1,
            draft_id: 1,
            requested_by: "system".into(),
            requested_at: now,
            token: "t".into(),
            token_expires_at: now + token_ttl(),
            email_sent: false,
            email_sent_at: None,
            responded_at: None,
            response: None,
            response_note: None,
        };
        assert!(!request.is_expired_at(now + token_ttl()));
        assert!(request.is_expired_at(now + token_ttl() + Duration::seconds(1)));
    }
}
