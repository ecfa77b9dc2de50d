//! Session and WS-ticket lookup: the Auth collaborator.
//!
//! ARCHITECTURE
//! ============
//! The core never checks credentials. HTTP requests carry a long-lived session
//! token issued elsewhere; websocket upgrades use one-time short-lived tickets
//! minted from an authenticated HTTP call so tokens never appear in WS query
//! strings.
//!
//! TRADE-OFFS
//! ==========
//! Ticket consumption is destructive (`DELETE ... RETURNING`) to guarantee
//! single use; this favors replay safety over reconnect convenience.

use std::fmt::Write;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::StoreError;

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a cryptographically random 32-byte hex token.
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

/// Generate a short-lived 16-byte hex WS ticket.
#[must_use]
pub(crate) fn generate_ws_ticket() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes_to_hex(&bytes)
}

// =============================================================================
// CONTRACT
// =============================================================================

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve a session token to its user.
    async fn session_user(&self, token: &str) -> Result<Option<Uuid>, StoreError>;
    /// Mint a single-use ticket for a websocket upgrade.
    async fn issue_ws_ticket(&self, user_id: Uuid) -> Result<String, StoreError>;
    /// Consume a ticket, returning its user if it was valid.
    async fn consume_ws_ticket(&self, ticket: &str) -> Result<Option<Uuid>, StoreError>;
}

// =============================================================================
// POSTGRES
// =============================================================================

pub struct PgSessions {
    pool: PgPool,
}

impl PgSessions {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Authenticator for PgSessions {
    async fn session_user(&self, token: &str) -> Result<Option<Uuid>, StoreError> {
        let row = sqlx::query("SELECT user_id FROM sessions WHERE token = $1 AND expires_at > now()")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("user_id")))
    }

    async fn issue_ws_ticket(&self, user_id: Uuid) -> Result<String, StoreError> {
        let ticket = generate_ws_ticket();
        sqlx::query("INSERT INTO ws_tickets (ticket, user_id) VALUES ($1, $2)")
            .bind(&ticket)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(ticket)
    }

    async fn consume_ws_ticket(&self, ticket: &str) -> Result<Option<Uuid>, StoreError> {
        let row = sqlx::query("DELETE FROM ws_tickets WHERE ticket = $1 AND expires_at > now() RETURNING user_id")
            .bind(ticket)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("user_id")))
    }
}

// =============================================================================
// IN-MEMORY
// =============================================================================

/// Process-local sessions for tests and `STORE_BACKEND=memory`. Tickets do
/// not expire; they are still single use.
#[derive(Default)]
pub struct MemorySessions {
    sessions: DashMap<String, Uuid>,
    tickets: DashMap<String, Uuid>,
}

impl MemorySessions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for `user_id` and return its token.
    pub fn grant(&self, user_id: Uuid) -> String {
        let token = generate_token();
        self.sessions.insert(token.clone(), user_id);
        token
    }
}

#[async_trait]
impl Authenticator for MemorySessions {
    async fn session_user(&self, token: &str) -> Result<Option<Uuid>, StoreError> {
        Ok(self.sessions.get(token).map(|u| *u))
    }

    async fn issue_ws_ticket(&self, user_id: Uuid) -> Result<String, StoreError> {
        let ticket = generate_ws_ticket();
        self.tickets.insert(ticket.clone(), user_id);
        Ok(ticket)
    }

    async fn consume_ws_ticket(&self, ticket: &str) -> Result<Option<Uuid>, StoreError> {
        Ok(self.tickets.remove(ticket).map(|(_, user_id)| user_id))
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
