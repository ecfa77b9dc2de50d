//! Domain events emitted by the lifecycle, complaint, and chat services.
//!
//! An event is an immutable record of a committed change. The dispatcher
//! turns it into a scope broadcast plus one persisted notification per
//! affected recipient.

use serde_json::json;
use uuid::Uuid;

use crate::domain::{ChatMessage, Complaint, ComplaintStatus, EventKind, EventRef, RequestStatus, ServiceRequest};
use crate::frame::{Data, Frame};

/// Live event type names on the wire.
pub const EVENT_REQUEST_STATUS_CHANGED: &str = "request_status_changed";
pub const EVENT_CHAT_MESSAGE: &str = "chat_message";
pub const EVENT_COMPLAINT_STATUS_CHANGED: &str = "complaint_status_changed";
pub const EVENT_NOTIFICATION: &str = "notification";

#[derive(Debug, Clone)]
pub enum DomainEvent {
    RequestStatusChanged {
        event_id: Uuid,
        request: ServiceRequest,
        old_status: RequestStatus,
        new_status: RequestStatus,
        actor_id: Uuid,
    },
    ChatMessagePosted {
        event_id: Uuid,
        message: ChatMessage,
        /// Participants other than the sender who should be notified.
        recipients: Vec<Uuid>,
    },
    ComplaintStatusChanged {
        event_id: Uuid,
        complaint: Complaint,
        old_status: ComplaintStatus,
        new_status: ComplaintStatus,
        actor_id: Uuid,
    },
}

impl DomainEvent {
    #[must_use]
    pub fn request_status_changed(request: &ServiceRequest, old_status: RequestStatus, actor_id: Uuid) -> Self {
        Self::RequestStatusChanged {
            event_id: Uuid::new_v4(),
            request: request.clone(),
            old_status,
            new_status: request.status,
            actor_id,
        }
    }

    #[must_use]
    pub fn chat_message_posted(message: &ChatMessage, recipients: Vec<Uuid>) -> Self {
        Self::ChatMessagePosted { event_id: Uuid::new_v4(), message: message.clone(), recipients }
    }

    #[must_use]
    pub fn complaint_status_changed(complaint: &Complaint, old_status: ComplaintStatus, actor_id: Uuid) -> Self {
        Self::ComplaintStatusChanged {
            event_id: Uuid::new_v4(),
            complaint: complaint.clone(),
            old_status,
            new_status: complaint.status,
            actor_id,
        }
    }

    #[must_use]
    pub fn scope_id(&self) -> Uuid {
        match self {
            Self::RequestStatusChanged { request, .. } => request.id,
            Self::ChatMessagePosted { message, .. } => message.scope_id,
            Self::ComplaintStatusChanged { complaint, .. } => complaint.id,
        }
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::RequestStatusChanged { .. } => EventKind::RequestStatusChanged,
            Self::ChatMessagePosted { .. } => EventKind::ChatMessagePosted,
            Self::ComplaintStatusChanged { .. } => EventKind::ComplaintStatusChanged,
        }
    }

    #[must_use]
    pub fn event_ref(&self) -> EventRef {
        let event_id = match self {
            Self::RequestStatusChanged { event_id, .. }
            | Self::ChatMessagePosted { event_id, .. }
            | Self::ComplaintStatusChanged { event_id, .. } => *event_id,
        };
        EventRef { event_id, kind: self.kind(), scope_id: self.scope_id() }
    }

    /// The live frame broadcast to the scope's subscribers.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        let mut data = Data::new();
        let kind = match self {
            Self::RequestStatusChanged { event_id, request, old_status, new_status, actor_id } => {
                data.insert("event_id".into(), json!(event_id));
                data.insert("request_id".into(), json!(request.id));
                data.insert("old_status".into(), json!(old_status));
                data.insert("new_status".into(), json!(new_status));
                data.insert("actor_id".into(), json!(actor_id));
                data.insert("request".into(), serde_json::to_value(request).unwrap_or_default());
                EVENT_REQUEST_STATUS_CHANGED
            }
            Self::ChatMessagePosted { event_id, message, .. } => {
                data.insert("event_id".into(), json!(event_id));
                data.insert("message".into(), serde_json::to_value(message).unwrap_or_default());
                EVENT_CHAT_MESSAGE
            }
            Self::ComplaintStatusChanged { event_id, complaint, old_status, new_status, actor_id } => {
                data.insert("event_id".into(), json!(event_id));
                data.insert("complaint_id".into(), json!(complaint.id));
                data.insert("old_status".into(), json!(old_status));
                data.insert("new_status".into(), json!(new_status));
                data.insert("actor_id".into(), json!(actor_id));
                data.insert("complaint".into(), serde_json::to_value(complaint).unwrap_or_default());
                EVENT_COMPLAINT_STATUS_CHANGED
            }
        };
        Frame::event(kind, self.scope_id(), data)
    }
}
