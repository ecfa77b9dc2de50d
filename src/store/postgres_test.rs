//! Live-database tests. Run with `--features live-db-tests` and
//! `TEST_DATABASE_URL` pointing at a disposable Postgres.

use super::*;
use crate::db;
use time::OffsetDateTime;

async fn live_store() -> PgStore {
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL required for live-db-tests");
    let pool = db::init_pool(&url, 2).await.expect("pool should connect and migrate");
    PgStore::new(pool)
}

async fn seed_user(store: &PgStore, role: Role) -> User {
    let user = User { id: Uuid::new_v4(), name: format!("{}-{}", role.as_str(), Uuid::new_v4()), role };
    store.save_user(&user).await.expect("user insert");
    user
}

#[tokio::test]
async fn request_upsert_and_decline_filter() {
    let store = live_store().await;
    let customer = seed_user(&store, Role::Customer).await;
    let provider = seed_user(&store, Role::Provider).await;

    let mut req = ServiceRequest {
        id: Uuid::new_v4(),
        customer_id: customer.id,
        provider_id: None,
        target_provider_id: None,
        category: "plumber".into(),
        description: "leak".into(),
        status: RequestStatus::Pending,
        created_at: OffsetDateTime::now_utc(),
        completed_at: None,
        rating: None,
    };
    store.save_request(&req).await.unwrap();

    req.status = RequestStatus::Accepted;
    req.provider_id = Some(provider.id);
    store.save_request(&req).await.unwrap();
    let loaded = store.get_request(req.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, RequestStatus::Accepted);
    assert_eq!(loaded.provider_id, Some(provider.id));

    store.record_decline(req.id, provider.id).await.unwrap();
    let visible = store
        .query_requests(&RequestFilter {
            customer_id: Some(customer.id),
            hide_declined_for: Some(provider.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(visible.is_empty());
}

#[tokio::test]
async fn chat_sequence_is_unique_per_scope() {
    let store = live_store().await;
    let sender = seed_user(&store, Role::Customer).await;
    let scope_id = Uuid::new_v4();
    let msg = |seq| ChatMessage {
        id: Uuid::new_v4(),
        scope_id,
        scope_kind: ScopeKind::Request,
        sender_id: sender.id,
        body: "hi".into(),
        created_at: OffsetDateTime::now_utc(),
        seq,
    };

    store.append_message(&msg(1)).await.unwrap();
    let err = store.append_message(&msg(1)).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateSequence { seq: 1, .. }));
    assert_eq!(store.last_sequence(scope_id).await.unwrap(), 1);
}
