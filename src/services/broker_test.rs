use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::*;
use crate::domain::{ChatMessage, Complaint, Notification, ServiceRequest};
use crate::error::StoreError;
use crate::frame::Data;
use crate::services::lifecycle;
use crate::services::session::MemorySessions;
use crate::store::{EntityStore, MemoryStore};
use crate::state::test_helpers::{self, assert_channel_empty, assert_channel_has_frame};

fn event(scope_id: Uuid, n: i64) -> Frame {
    Frame::event("chat_message", scope_id, Data::new()).with_data("n", n)
}

// =============================================================================
// ChannelBroker
// =============================================================================

#[tokio::test]
async fn publish_reaches_only_subscribed_connections() {
    let broker = ChannelBroker::new(8);
    let scope = Uuid::new_v4();
    let (a, mut rx_a) = broker.register(Uuid::new_v4(), Role::Customer);
    let (_b, mut rx_b) = broker.register(Uuid::new_v4(), Role::Customer);

    assert!(broker.attach(a, scope));
    assert_eq!(broker.publish(scope, &event(scope, 1)), 1);

    let got = assert_channel_has_frame(&mut rx_a).await;
    assert_eq!(got.scope_id, Some(scope));
    assert_channel_empty(&mut rx_b).await;
}

#[tokio::test]
async fn attach_and_detach_are_idempotent() {
    let broker = ChannelBroker::new(8);
    let scope = Uuid::new_v4();
    let (a, mut rx_a) = broker.register(Uuid::new_v4(), Role::Provider);

    broker.attach(a, scope);
    broker.attach(a, scope);
    assert_eq!(broker.subscriber_count(scope), 1);
    broker.publish(scope, &event(scope, 1));
    assert_channel_has_frame(&mut rx_a).await;
    assert_channel_empty(&mut rx_a).await;

    broker.detach(a, scope);
    broker.detach(a, scope);
    assert_eq!(broker.subscriber_count(scope), 0);
    assert_eq!(broker.publish(scope, &event(scope, 2)), 0);
}

#[tokio::test]
async fn attach_unknown_connection_fails() {
    let broker = ChannelBroker::new(8);
    assert!(!broker.attach(Uuid::new_v4(), Uuid::new_v4()));
}

#[tokio::test]
async fn same_scope_events_arrive_in_publish_order() {
    let broker = ChannelBroker::new(64);
    let scope = Uuid::new_v4();
    let (a, mut rx) = broker.register(Uuid::new_v4(), Role::Customer);
    broker.attach(a, scope);

    for n in 0..20 {
        broker.publish(scope, &event(scope, n));
    }
    for n in 0..20 {
        let frame = assert_channel_has_frame(&mut rx).await;
        assert_eq!(frame.data.get("n").and_then(serde_json::Value::as_i64), Some(n));
    }
}

#[tokio::test]
async fn full_queue_drops_events_without_blocking() {
    let broker = ChannelBroker::new(2);
    let scope = Uuid::new_v4();
    let (a, mut rx) = broker.register(Uuid::new_v4(), Role::Customer);
    broker.attach(a, scope);

    assert_eq!(broker.publish(scope, &event(scope, 1)), 1);
    assert_eq!(broker.publish(scope, &event(scope, 2)), 1);
    assert_eq!(broker.publish(scope, &event(scope, 3)), 0);

    assert_channel_has_frame(&mut rx).await;
    assert_channel_has_frame(&mut rx).await;
    assert_channel_empty(&mut rx).await;
    // Still subscribed: a full queue is not a dead connection.
    assert_eq!(broker.subscriber_count(scope), 1);
}

#[tokio::test]
async fn closed_connection_is_pruned_on_publish() {
    let broker = ChannelBroker::new(8);
    let scope = Uuid::new_v4();
    let (a, rx) = broker.register(Uuid::new_v4(), Role::Customer);
    broker.attach(a, scope);
    drop(rx);

    assert_eq!(broker.publish(scope, &event(scope, 1)), 0);
    assert_eq!(broker.connection_count(), 0);
    assert_eq!(broker.subscriber_count(scope), 0);
}

#[tokio::test]
async fn disconnect_removes_every_subscription() {
    let broker = ChannelBroker::new(8);
    let user = Uuid::new_v4();
    let (a, _rx) = broker.register(user, Role::Customer);
    let scopes = [Uuid::new_v4(), Uuid::new_v4()];
    for s in scopes {
        broker.attach(a, s);
    }

    broker.disconnect(a);
    broker.disconnect(a);

    assert_eq!(broker.connection_count(), 0);
    for s in scopes {
        assert_eq!(broker.subscriber_count(s), 0);
    }
    assert_eq!(broker.publish_to_user(user, &event(scopes[0], 1)), 0);
}

#[tokio::test]
async fn publish_to_user_reaches_every_connection_of_that_user() {
    let broker = ChannelBroker::new(8);
    let user = Uuid::new_v4();
    let (_a, mut rx_a) = broker.register(user, Role::Customer);
    let (_b, mut rx_b) = broker.register(user, Role::Customer);
    let (_c, mut rx_c) = broker.register(Uuid::new_v4(), Role::Customer);

    assert_eq!(broker.publish_to_user(user, &event(Uuid::new_v4(), 1)), 2);
    assert_channel_has_frame(&mut rx_a).await;
    assert_channel_has_frame(&mut rx_b).await;
    assert_channel_empty(&mut rx_c).await;
}

#[tokio::test]
async fn attach_role_only_touches_matching_connections() {
    let broker = ChannelBroker::new(8);
    let scope = Uuid::new_v4();
    let (admin, _rx1) = broker.register(Uuid::new_v4(), Role::Admin);
    let (customer, _rx2) = broker.register(Uuid::new_v4(), Role::Customer);

    broker.attach_role(Role::Admin, scope);

    assert_eq!(broker.subscriptions(admin), vec![scope]);
    assert!(broker.subscriptions(customer).is_empty());
}

// =============================================================================
// connect / subscribe
// =============================================================================

#[tokio::test]
async fn connect_subscribes_to_participated_scopes() {
    let state = test_helpers::test_app_state();
    let customer = test_helpers::seed_user(&state, Role::Customer).await;
    let provider = test_helpers::seed_user(&state, Role::Provider).await;
    let mine = test_helpers::seed_accepted_request(&state, customer.id, provider.id).await;
    let other_customer = test_helpers::seed_user(&state, Role::Customer).await;
    let _theirs = test_helpers::seed_request(&state, other_customer.id).await;
    let complaint = test_helpers::seed_complaint(&state, customer.id).await;

    let handle = connect(&state, customer.id).await.unwrap();
    let mut expected = vec![mine.id, complaint.id];
    expected.sort_unstable();
    assert_eq!(handle.scopes, expected);

    let provider_handle = connect(&state, provider.id).await.unwrap();
    assert_eq!(provider_handle.scopes, vec![mine.id]);
}

#[tokio::test]
async fn connect_subscribes_admins_to_open_complaints() {
    let state = test_helpers::test_app_state();
    let reporter = test_helpers::seed_user(&state, Role::Customer).await;
    let admin = test_helpers::seed_user(&state, Role::Admin).await;
    let open = test_helpers::seed_complaint(&state, reporter.id).await;
    let mut done = test_helpers::seed_complaint(&state, reporter.id).await;
    done.status = ComplaintStatus::Resolved;
    state.store.save_complaint(&done).await.unwrap();

    let handle = connect(&state, admin.id).await.unwrap();
    assert_eq!(handle.scopes, vec![open.id]);
}

#[tokio::test]
async fn connect_unknown_user_is_not_found() {
    let state = test_helpers::test_app_state();
    let err = connect(&state, Uuid::new_v4()).await.err().unwrap();
    assert!(matches!(err, CoreError::NotFound { kind: "user", .. }));
}

#[tokio::test]
async fn subscribe_requires_participation() {
    let state = test_helpers::test_app_state();
    let customer = test_helpers::seed_user(&state, Role::Customer).await;
    let outsider = test_helpers::seed_user(&state, Role::Provider).await;
    let request = test_helpers::seed_request(&state, customer.id).await;

    let handle = connect(&state, outsider.id).await.unwrap();
    let err = subscribe(&state, handle.id, request.id).await.unwrap_err();
    assert!(matches!(err, CoreError::Unauthorized { .. }));
    assert_eq!(state.broker.subscriber_count(request.id), 0);
}

#[tokio::test]
async fn subscribe_unknown_scope_is_not_found() {
    let state = test_helpers::test_app_state();
    let customer = test_helpers::seed_user(&state, Role::Customer).await;
    let handle = connect(&state, customer.id).await.unwrap();

    let err = subscribe(&state, handle.id, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound { kind: "scope", .. }));
}

#[tokio::test]
async fn subscribe_then_unsubscribe_round_trip() {
    let state = test_helpers::test_app_state();
    let customer = test_helpers::seed_user(&state, Role::Customer).await;
    let handle = connect(&state, customer.id).await.unwrap();
    let request = test_helpers::seed_request(&state, customer.id).await;

    subscribe(&state, handle.id, request.id).await.unwrap();
    subscribe(&state, handle.id, request.id).await.unwrap();
    assert_eq!(state.broker.subscriber_count(request.id), 1);

    unsubscribe(&state, handle.id, request.id);
    unsubscribe(&state, handle.id, request.id);
    assert_eq!(state.broker.subscriber_count(request.id), 0);

    disconnect(&state, handle.id);
    assert_eq!(state.broker.connection_count(), 0);
}

// =============================================================================
// connect racing a commit
// =============================================================================

/// Memory store that parks `query_requests` for one party after it has
/// read, until the test releases it.
struct PausingStore {
    inner: MemoryStore,
    party: Uuid,
    paused: Notify,
    resume: Notify,
}

#[async_trait]
impl EntityStore for PausingStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.inner.get_user(id).await
    }
    async fn save_user(&self, user: &User) -> Result<(), StoreError> {
        self.inner.save_user(user).await
    }
    async fn get_request(&self, id: Uuid) -> Result<Option<ServiceRequest>, StoreError> {
        self.inner.get_request(id).await
    }
    async fn save_request(&self, request: &ServiceRequest) -> Result<(), StoreError> {
        self.inner.save_request(request).await
    }
    async fn query_requests(&self, filter: &RequestFilter) -> Result<Vec<ServiceRequest>, StoreError> {
        let found = self.inner.query_requests(filter).await;
        if filter.party == Some(self.party) {
            self.paused.notify_one();
            self.resume.notified().await;
        }
        found
    }
    async fn record_decline(&self, request_id: Uuid, provider_id: Uuid) -> Result<(), StoreError> {
        self.inner.record_decline(request_id, provider_id).await
    }
    async fn get_complaint(&self, id: Uuid) -> Result<Option<Complaint>, StoreError> {
        self.inner.get_complaint(id).await
    }
    async fn save_complaint(&self, complaint: &Complaint) -> Result<(), StoreError> {
        self.inner.save_complaint(complaint).await
    }
    async fn query_complaints(&self, filter: &ComplaintFilter) -> Result<Vec<Complaint>, StoreError> {
        self.inner.query_complaints(filter).await
    }
    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>, StoreError> {
        self.inner.get_notification(id).await
    }
    async fn save_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        self.inner.save_notification(notification).await
    }
    async fn list_notifications(&self, recipient_id: Uuid) -> Result<Vec<Notification>, StoreError> {
        self.inner.list_notifications(recipient_id).await
    }
    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        self.inner.append_message(message).await
    }
    async fn list_messages(&self, scope_id: Uuid, after_seq: i64) -> Result<Vec<ChatMessage>, StoreError> {
        self.inner.list_messages(scope_id, after_seq).await
    }
    async fn last_sequence(&self, scope_id: Uuid) -> Result<i64, StoreError> {
        self.inner.last_sequence(scope_id).await
    }
}

#[tokio::test]
async fn accept_committed_during_connect_bootstrap_still_reaches_connection() {
    let provider_id = Uuid::new_v4();
    let store = Arc::new(PausingStore {
        inner: MemoryStore::new(),
        party: provider_id,
        paused: Notify::new(),
        resume: Notify::new(),
    });
    let state = AppState::new(store.clone(), Arc::new(MemorySessions::new()), 64);
    let customer = test_helpers::seed_user(&state, Role::Customer).await;
    let provider = User { id: provider_id, name: "provider".into(), role: Role::Provider };
    state.store.save_user(&provider).await.unwrap();
    let request = test_helpers::seed_request(&state, customer.id).await;

    let connecting = tokio::spawn({
        let state = state.clone();
        async move { connect(&state, provider_id).await }
    });

    // The bootstrap query has already read: it cannot see the accept below.
    store.paused.notified().await;
    lifecycle::accept(&state, request.id, provider_id).await.unwrap();
    store.resume.notify_one();

    let mut conn = connecting.await.unwrap().ok().unwrap();
    assert!(conn.scopes.contains(&request.id));
    assert!(state.broker.subscriptions(conn.id).contains(&request.id));
    let accepted = test_helpers::recv_syscall(&mut conn.events, "request_status_changed").await;
    assert_eq!(accepted.scope_id, Some(request.id));
}
