//! Domain entities shared by the store, the services, and the routes.
//!
//! DESIGN
//! ======
//! Entities are plain data. Status enums own their transition tables so the
//! lifecycle services ask `can_transition_to` instead of re-encoding the
//! state machine at every call site.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// USERS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Provider,
    Admin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Provider => "provider",
            Self::Admin => "admin",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "customer" => Some(Self::Customer),
            "provider" => Some(Self::Provider),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Marketplace identity. Profile data lives elsewhere; the core only needs
/// the role to authorize actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
}

// =============================================================================
// SERVICE REQUESTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Completed,
    Rejected,
    Cancelled,
}

impl RequestStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "completed" => Some(Self::Completed),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Cancelled)
    }

    /// Edges of the request state machine.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Accepted | Self::Rejected | Self::Cancelled)
                | (Self::Accepted, Self::Completed | Self::Cancelled)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: Uuid,
    pub customer_id: Uuid,
    /// Assigned provider. Set only when the request enters `accepted`.
    pub provider_id: Option<Uuid>,
    /// Provider the customer booked directly, if any. Only that provider may
    /// accept, and their rejection closes the request.
    pub target_provider_id: Option<Uuid>,
    pub category: String,
    pub description: String,
    pub status: RequestStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub rating: Option<u8>,
}

impl ServiceRequest {
    /// Customer or assigned provider.
    #[must_use]
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.customer_id == user_id || self.provider_id == Some(user_id)
    }

    /// Participant, or the provider the request is booked with. Parties see
    /// the request's live events and conversation before it is accepted.
    #[must_use]
    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.is_participant(user_id) || self.target_provider_id == Some(user_id)
    }
}

// =============================================================================
// COMPLAINTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplaintStatus {
    Pending,
    Reviewed,
    Resolved,
    Closed,
}

impl ComplaintStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Reviewed => "reviewed",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "reviewed" => Some(Self::Reviewed),
            "resolved" => Some(Self::Resolved),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Reviewed | Self::Resolved | Self::Closed)
                | (Self::Reviewed, Self::Resolved | Self::Closed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Complaint {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub request_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub status: ComplaintStatus,
    pub admin_response: Option<String>,
    /// Admin who last reviewed the complaint.
    pub handled_by: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

// =============================================================================
// SCOPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Request,
    Complaint,
}

impl ScopeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Complaint => "complaint",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "request" => Some(Self::Request),
            "complaint" => Some(Self::Complaint),
            _ => None,
        }
    }
}

// =============================================================================
// CHAT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub scope_id: Uuid,
    pub scope_kind: ScopeKind,
    pub sender_id: Uuid,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Position within the scope. Starts at 1, no gaps.
    pub seq: i64,
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RequestStatusChanged,
    ChatMessagePosted,
    ComplaintStatusChanged,
}

impl EventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestStatusChanged => "request_status_changed",
            Self::ChatMessagePosted => "chat_message_posted",
            Self::ComplaintStatusChanged => "complaint_status_changed",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "request_status_changed" => Some(Self::RequestStatusChanged),
            "chat_message_posted" => Some(Self::ChatMessagePosted),
            "complaint_status_changed" => Some(Self::ComplaintStatusChanged),
            _ => None,
        }
    }
}

/// Pointer back to the domain event that produced a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    pub event_id: Uuid,
    pub kind: EventKind,
    pub scope_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub message: String,
    pub is_read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub source: EventRef,
}

#[cfg(test)]
#[path = "domain_test.rs"]
mod tests;
