//! Reunite - case registry and face-matching gateway
//!
//! Reunite lets individuals, volunteers and authorities register missing
//! and found person cases, matches them by facial similarity against a
//! vector index, and routes case-lifecycle events to the right people
//! through durable and real-time notifications.
//!
//! ## Subsystems
//!
//! - **Registration**: multi-step saga coordinating moderation, the
//!   remote embedding function, object storage and the vector index,
//!   with compensating rollback
//! - **Cases**: guarded state machine (flag / assign / close) over the
//!   document store's atomic conditional updates
//! - **Search**: cooldown-gated similarity queries with cross-query
//!   deduplication
//! - **Notify**: durable per-user notification log plus multiplexed live
//!   push sessions
//! - **Ratelimit**: fixed-window request counter in the shared cache

pub mod auth;
pub mod cases;
pub mod config;
pub mod db;
pub mod notify;
pub mod outbox;
pub mod ratelimit;
pub mod registration;
pub mod routes;
pub mod search;
pub mod server;
pub mod services;
pub mod types;
pub mod vector;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{Error, Result};
