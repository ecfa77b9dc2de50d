//! `EntityStore` over Postgres via SQLx.
//!
//! DESIGN
//! ======
//! Every save is a single-row `INSERT ... ON CONFLICT DO UPDATE`, which makes
//! each entity write atomic on its own. Filtered listings are assembled with
//! `QueryBuilder` so optional predicates stay bound parameters.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, QueryBuilder, Row};
use uuid::Uuid;

use super::{ComplaintFilter, EntityStore, RequestFilter};
use crate::domain::{
    ChatMessage, Complaint, ComplaintStatus, EventKind, EventRef, Notification, RequestStatus, Role, ScopeKind,
    ServiceRequest, User,
};
use crate::error::StoreError;

const REQUEST_COLUMNS: &str =
    "id, customer_id, provider_id, target_provider_id, category, description, status, created_at, completed_at, rating";
const COMPLAINT_COLUMNS: &str =
    "id, reporter_id, provider_id, request_id, title, description, status, admin_response, handled_by, created_at";
const NOTIFICATION_COLUMNS: &str = "id, recipient_id, message, is_read, created_at, event_id, event_kind, scope_id";
const MESSAGE_COLUMNS: &str = "id, scope_id, scope_kind, sender_id, body, created_at, seq";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// =============================================================================
// ROW MAPPING
// =============================================================================

fn corrupt(what: &str, raw: &str) -> StoreError {
    StoreError::Corrupt(format!("{what}: {raw}"))
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let role: String = row.try_get("role")?;
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        role: Role::parse(&role).ok_or_else(|| corrupt("user role", &role))?,
    })
}

fn request_from_row(row: &PgRow) -> Result<ServiceRequest, StoreError> {
    let status: String = row.try_get("status")?;
    let rating: Option<i16> = row.try_get("rating")?;
    Ok(ServiceRequest {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        provider_id: row.try_get("provider_id")?,
        target_provider_id: row.try_get("target_provider_id")?,
        category: row.try_get("category")?,
        description: row.try_get("description")?,
        status: RequestStatus::parse(&status).ok_or_else(|| corrupt("request status", &status))?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
        rating: rating
            .map(|r| u8::try_from(r).map_err(|_| corrupt("rating", &r.to_string())))
            .transpose()?,
    })
}

fn complaint_from_row(row: &PgRow) -> Result<Complaint, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(Complaint {
        id: row.try_get("id")?,
        reporter_id: row.try_get("reporter_id")?,
        provider_id: row.try_get("provider_id")?,
        request_id: row.try_get("request_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        status: ComplaintStatus::parse(&status).ok_or_else(|| corrupt("complaint status", &status))?,
        admin_response: row.try_get("admin_response")?,
        handled_by: row.try_get("handled_by")?,
        created_at: row.try_get("created_at")?,
    })
}

fn notification_from_row(row: &PgRow) -> Result<Notification, StoreError> {
    let kind: String = row.try_get("event_kind")?;
    Ok(Notification {
        id: row.try_get("id")?,
        recipient_id: row.try_get("recipient_id")?,
        message: row.try_get("message")?,
        is_read: row.try_get("is_read")?,
        created_at: row.try_get("created_at")?,
        source: EventRef {
            event_id: row.try_get("event_id")?,
            kind: EventKind::parse(&kind).ok_or_else(|| corrupt("event kind", &kind))?,
            scope_id: row.try_get("scope_id")?,
        },
    })
}

fn message_from_row(row: &PgRow) -> Result<ChatMessage, StoreError> {
    let kind: String = row.try_get("scope_kind")?;
    Ok(ChatMessage {
        id: row.try_get("id")?,
        scope_id: row.try_get("scope_id")?,
        scope_kind: ScopeKind::parse(&kind).ok_or_else(|| corrupt("scope kind", &kind))?,
        sender_id: row.try_get("sender_id")?,
        body: row.try_get("body")?,
        created_at: row.try_get("created_at")?,
        seq: row.try_get("seq")?,
    })
}

// =============================================================================
// STORE
// =============================================================================

#[async_trait]
impl EntityStore for PgStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT id, name, role FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn save_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, name, role) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, role = EXCLUDED.role",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(user.role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<ServiceRequest>, StoreError> {
        let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM service_requests WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(request_from_row).transpose()
    }

    async fn save_request(&self, request: &ServiceRequest) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO service_requests ({REQUEST_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (id) DO UPDATE SET \
                 provider_id = EXCLUDED.provider_id, status = EXCLUDED.status, \
                 completed_at = EXCLUDED.completed_at, rating = EXCLUDED.rating"
        ))
        .bind(request.id)
        .bind(request.customer_id)
        .bind(request.provider_id)
        .bind(request.target_provider_id)
        .bind(&request.category)
        .bind(&request.description)
        .bind(request.status.as_str())
        .bind(request.created_at)
        .bind(request.completed_at)
        .bind(request.rating.map(i16::from))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query_requests(&self, filter: &RequestFilter) -> Result<Vec<ServiceRequest>, StoreError> {
        let mut builder = QueryBuilder::new(format!("SELECT {REQUEST_COLUMNS} FROM service_requests r WHERE true"));
        if let Some(user_id) = filter.party {
            builder.push(" AND (r.customer_id = ");
            builder.push_bind(user_id);
            builder.push(" OR r.provider_id = ");
            builder.push_bind(user_id);
            builder.push(" OR r.target_provider_id = ");
            builder.push_bind(user_id);
            builder.push(")");
        }
        if let Some(customer_id) = filter.customer_id {
            builder.push(" AND r.customer_id = ");
            builder.push_bind(customer_id);
        }
        if let Some(provider_id) = filter.provider_id {
            builder.push(" AND r.provider_id = ");
            builder.push_bind(provider_id);
        }
        if !filter.statuses.is_empty() {
            builder.push(" AND r.status IN (");
            {
                let mut separated = builder.separated(", ");
                for status in &filter.statuses {
                    separated.push_bind(status.as_str());
                }
            }
            builder.push(")");
        }
        if filter.open_only {
            builder.push(" AND r.target_provider_id IS NULL");
        }
        if let Some(target) = filter.target_provider_id {
            builder.push(" AND r.target_provider_id = ");
            builder.push_bind(target);
        }
        if let Some(provider_id) = filter.hide_declined_for {
            builder.push(" AND NOT EXISTS (SELECT 1 FROM request_declines d WHERE d.request_id = r.id AND d.provider_id = ");
            builder.push_bind(provider_id);
            builder.push(")");
        }
        builder.push(" ORDER BY r.created_at DESC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(request_from_row).collect()
    }

    async fn record_decline(&self, request_id: Uuid, provider_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO request_declines (request_id, provider_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(request_id)
            .bind(provider_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_complaint(&self, id: Uuid) -> Result<Option<Complaint>, StoreError> {
        let row = sqlx::query(&format!("SELECT {COMPLAINT_COLUMNS} FROM complaints WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(complaint_from_row).transpose()
    }

    async fn save_complaint(&self, complaint: &Complaint) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO complaints ({COMPLAINT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (id) DO UPDATE SET \
                 status = EXCLUDED.status, admin_response = EXCLUDED.admin_response, \
                 handled_by = EXCLUDED.handled_by"
        ))
        .bind(complaint.id)
        .bind(complaint.reporter_id)
        .bind(complaint.provider_id)
        .bind(complaint.request_id)
        .bind(&complaint.title)
        .bind(&complaint.description)
        .bind(complaint.status.as_str())
        .bind(&complaint.admin_response)
        .bind(complaint.handled_by)
        .bind(complaint.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query_complaints(&self, filter: &ComplaintFilter) -> Result<Vec<Complaint>, StoreError> {
        let mut builder = QueryBuilder::new(format!("SELECT {COMPLAINT_COLUMNS} FROM complaints WHERE true"));
        if let Some(reporter_id) = filter.reporter_id {
            builder.push(" AND reporter_id = ");
            builder.push_bind(reporter_id);
        }
        if !filter.statuses.is_empty() {
            builder.push(" AND status IN (");
            {
                let mut separated = builder.separated(", ");
                for status in &filter.statuses {
                    separated.push_bind(status.as_str());
                }
            }
            builder.push(")");
        }
        builder.push(" ORDER BY created_at DESC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(complaint_from_row).collect()
    }

    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>, StoreError> {
        let row = sqlx::query(&format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(notification_from_row).transpose()
    }

    async fn save_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO notifications ({NOTIFICATION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET is_read = EXCLUDED.is_read"
        ))
        .bind(notification.id)
        .bind(notification.recipient_id)
        .bind(&notification.message)
        .bind(notification.is_read)
        .bind(notification.created_at)
        .bind(notification.source.event_id)
        .bind(notification.source.kind.as_str())
        .bind(notification.source.scope_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_notifications(&self, recipient_id: Uuid) -> Result<Vec<Notification>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE recipient_id = $1 ORDER BY created_at DESC"
        ))
        .bind(recipient_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let result = sqlx::query(&format!(
            "INSERT INTO chat_messages ({MESSAGE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(message.id)
        .bind(message.scope_id)
        .bind(message.scope_kind.as_str())
        .bind(message.sender_id)
        .bind(&message.body)
        .bind(message.created_at)
        .bind(message.seq)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicateSequence { scope_id: message.scope_id, seq: message.seq })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_messages(&self, scope_id: Uuid, after_seq: i64) -> Result<Vec<ChatMessage>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE scope_id = $1 AND seq > $2 ORDER BY seq ASC"
        ))
        .bind(scope_id)
        .bind(after_seq)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn last_sequence(&self, scope_id: Uuid) -> Result<i64, StoreError> {
        let last: Option<i64> = sqlx::query_scalar("SELECT MAX(seq) FROM chat_messages WHERE scope_id = $1")
            .bind(scope_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(last.unwrap_or(0))
    }
}

#[cfg(all(test, feature = "live-db-tests"))]
#[path = "postgres_test.rs"]
mod tests;
