//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business logic and persistence concerns so route
//! handlers can stay focused on protocol translation and auth plumbing.
//! Every operation takes `&AppState` and returns `Result<_, CoreError>`.

pub mod access;
pub mod broker;
pub mod chat;
pub mod complaint;
pub mod events;
pub mod lifecycle;
pub mod locks;
pub mod notify;
pub mod session;
