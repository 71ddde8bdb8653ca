//! Lifecycle records for applications and partner requests.
//!
//! Records are keyed by the message identifier returned by the
//! notification channel when the submission is forwarded. Keys are
//! assigned externally and never chosen by this system.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the forwarded notification message, used as the primary
/// key for lifecycle records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        MessageId(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        MessageId(s.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A Discord user id (17-20 decimal digits, validated at intake).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl From<String> for UserId {
    fn from(s: String) -> Self {
        UserId(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(s.to_string())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Denied,
}

impl ApplicationStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ApplicationStatus::Pending),
            "accepted" => Some(ApplicationStatus::Accepted),
            "denied" => Some(ApplicationStatus::Denied),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::Denied => "denied",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartnerStatus {
    Pending,
    Accepted,
    Removed,
}

impl PartnerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartnerStatus::Pending => "pending",
            PartnerStatus::Accepted => "accepted",
            PartnerStatus::Removed => "removed",
        }
    }
}

/// A stored team application.
///
/// Created when intake successfully forwards the submission; mutated only
/// by the reactor (accept/deny) or by staff status overrides. Never
/// deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub name: String,
    pub email: String,
    pub discord_username: String,
    pub discord_id: UserId,
    pub position: String,
    pub message: String,
    /// Blob-store URL, or `attachment:<filename>` when the resume was
    /// delivered inline with the notification message.
    #[serde(rename = "resumeUrl")]
    pub resume_url: String,
    pub status: ApplicationStatus,
    #[serde(rename = "inviteCode", default, skip_serializing_if = "Option::is_none")]
    pub invite_code: Option<String>,
    #[serde(rename = "acceptedBy", default, skip_serializing_if = "Option::is_none")]
    pub accepted_by: Option<UserId>,
    #[serde(
        rename = "acceptedByTag",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub accepted_by_tag: Option<String>,
}

impl ApplicationRecord {
    /// Tester positions never receive a team-server invite.
    pub fn is_tester(&self) -> bool {
        self.position.to_lowercase().contains("tester")
    }
}

/// A stored partner request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerRecord {
    /// Human-readable request id (`PR-<base36 millis>-<4 digits>`),
    /// monotonic-ish across a single process.
    pub request_id: String,
    pub requester_username: String,
    pub requester_user_id: UserId,
    pub server_name: String,
    pub server_link: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_count_provided: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_provided: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_count_detected: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_detected: Option<u64>,
    pub status: PartnerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_by: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_by_tag: Option<String>,
    /// Name of the per-partner server role, once provisioning has been
    /// attempted at least once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,
    /// Accepted but role provisioning has not yet succeeded.
    #[serde(default)]
    pub pending_role_assignment: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_role_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_by: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<String>,
}

impl PartnerRecord {
    /// Accepted but still waiting for role provisioning to succeed.
    pub fn needs_role_retry(&self) -> bool {
        self.status == PartnerStatus::Accepted && self.pending_role_assignment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_application() -> ApplicationRecord {
        ApplicationRecord {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            discord_username: "ada".to_string(),
            discord_id: UserId::from("12345678901234567"),
            position: "Programmer".to_string(),
            message: "hello".to_string(),
            resume_url: "attachment:resume.pdf".to_string(),
            status: ApplicationStatus::Pending,
            invite_code: None,
            accepted_by: None,
            accepted_by_tag: None,
        }
    }

    #[test]
    fn test_application_round_trips_with_stored_field_names() {
        let record = sample_application();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["resumeUrl"], "attachment:resume.pdf");
        // Optional fields are omitted until set
        assert!(json.get("inviteCode").is_none());

        let back: ApplicationRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_partner_defaults_tolerate_missing_optionals() {
        // Records written by earlier versions lack the pending-role fields.
        let json = serde_json::json!({
            "requestId": "PR-abc-1234",
            "requesterUsername": "gatekeeper",
            "requesterUserId": "12345678901234567",
            "serverName": "Example Server",
            "serverLink": "https://discord.gg/abc",
            "reason": "friends",
            "status": "pending"
        });
        let record: PartnerRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.status, PartnerStatus::Pending);
        assert!(!record.pending_role_assignment);
        assert!(record.role_name.is_none());
    }

    #[test]
    fn test_tester_position_detection() {
        let mut record = sample_application();
        assert!(!record.is_tester());
        record.position = "Game Tester".to_string();
        assert!(record.is_tester());
        record.position = "TESTER".to_string();
        assert!(record.is_tester());
    }

    #[test]
    fn test_needs_role_retry_requires_accepted() {
        let mut record = PartnerRecord {
            request_id: "PR-abc-1234".to_string(),
            requester_username: "gatekeeper".to_string(),
            requester_user_id: UserId::from("12345678901234567"),
            server_name: "Example Server".to_string(),
            server_link: "https://discord.gg/abc".to_string(),
            reason: "friends".to_string(),
            member_count_provided: None,
            activity_provided: None,
            member_count_detected: None,
            activity_detected: None,
            status: PartnerStatus::Pending,
            accepted_by: None,
            accepted_by_tag: None,
            role_name: None,
            pending_role_assignment: true,
            pending_role_reason: None,
            role_color: None,
            removed_by: None,
            removed_at: None,
        };
        assert!(!record.needs_role_retry());
        record.status = PartnerStatus::Accepted;
        assert!(record.needs_role_retry());
        record.pending_role_assignment = false;
        assert!(!record.needs_role_retry());
    }
}
