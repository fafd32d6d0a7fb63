//! # matchday-store
//!
//! Durable storage for direct messages and the participant directory, backed
//! by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every domain model.
//! The message table is the source of truth for both live and polling
//! clients; unread counters are derived from it on every query.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod participants;

mod codec;
mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
