//! # courier-store
//!
//! Durable state for the courier chat server, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for users,
//! credentials, sessions, groups, chat sessions and messages. Operations that
//! touch more than one table run inside a single transaction.

pub mod chats;
pub mod database;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod sessions;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
