//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! passed by reference into every service. It holds the two external
//! collaborators (entity store, authenticator) behind trait objects, the
//! live connection broker, and the per-scope lock registry.

use std::sync::Arc;

use crate::services::broker::ChannelBroker;
use crate::services::locks::ScopeLocks;
use crate::services::session::Authenticator;
use crate::store::EntityStore;

// =============================================================================
// APP STATE
// =============================================================================

/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EntityStore>,
    pub auth: Arc<dyn Authenticator>,
    pub broker: Arc<ChannelBroker>,
    pub locks: ScopeLocks,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, auth: Arc<dyn Authenticator>, queue_capacity: usize) -> Self {
        Self { store, auth, broker: Arc::new(ChannelBroker::new(queue_capacity)), locks: ScopeLocks::new() }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::domain::{Complaint, ComplaintStatus, RequestStatus, Role, ServiceRequest, User};
    use crate::frame::Frame;
    use crate::services::session::MemorySessions;
    use crate::store::MemoryStore;
    use time::OffsetDateTime;
    use tokio::sync::mpsc;
    use tokio::time::{Duration, timeout};
    use uuid::Uuid;

    /// Create a test `AppState` backed by the in-memory store.
    #[must_use]
    pub fn test_app_state() -> AppState {
        test_app_state_with_sessions().0
    }

    /// Same as [`test_app_state`], also returning the session table so tests
    /// can mint cookies.
    #[must_use]
    pub fn test_app_state_with_sessions() -> (AppState, Arc<MemorySessions>) {
        let sessions = Arc::new(MemorySessions::new());
        let state = AppState::new(Arc::new(MemoryStore::new()), sessions.clone(), 64);
        (state, sessions)
    }

    /// Seed a user with `role` and return it.
    pub async fn seed_user(state: &AppState, role: Role) -> User {
        let id = Uuid::new_v4();
        let user = User { id, name: format!("{}-{}", role.as_str(), &id.to_string()[..8]), role };
        state.store.save_user(&user).await.expect("seed user");
        user
    }

    /// Seed a pending open request owned by `customer_id`.
    pub async fn seed_request(state: &AppState, customer_id: Uuid) -> ServiceRequest {
        let request = ServiceRequest {
            id: Uuid::new_v4(),
            customer_id,
            provider_id: None,
            target_provider_id: None,
            category: "plumber".into(),
            description: "kitchen sink leaks".into(),
            status: RequestStatus::Pending,
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
            rating: None,
        };
        state.store.save_request(&request).await.expect("seed request");
        request
    }

    /// Seed a request already accepted by `provider_id`.
    pub async fn seed_accepted_request(state: &AppState, customer_id: Uuid, provider_id: Uuid) -> ServiceRequest {
        let mut request = seed_request(state, customer_id).await;
        request.status = RequestStatus::Accepted;
        request.provider_id = Some(provider_id);
        state.store.save_request(&request).await.expect("seed accepted request");
        request
    }

    /// Seed a pending complaint filed by `reporter_id`.
    pub async fn seed_complaint(state: &AppState, reporter_id: Uuid) -> Complaint {
        let complaint = Complaint {
            id: Uuid::new_v4(),
            reporter_id,
            provider_id: None,
            request_id: None,
            title: "late arrival".into(),
            description: "provider was two hours late".into(),
            status: ComplaintStatus::Pending,
            admin_response: None,
            handled_by: None,
            created_at: OffsetDateTime::now_utc(),
        };
        state.store.save_complaint(&complaint).await.expect("seed complaint");
        complaint
    }

    pub async fn assert_channel_has_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
        timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("frame receive timed out")
            .expect("channel closed")
    }

    pub async fn assert_channel_empty(rx: &mut mpsc::Receiver<Frame>) {
        assert!(
            timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
            "expected channel to remain empty"
        );
    }

    /// Receive frames until one with `syscall` arrives.
    pub async fn recv_syscall(rx: &mut mpsc::Receiver<Frame>, syscall: &str) -> Frame {
        loop {
            let frame = assert_channel_has_frame(rx).await;
            if frame.syscall == syscall {
                return frame;
            }
        }
    }
}
