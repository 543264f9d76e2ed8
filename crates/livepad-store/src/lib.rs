//! # livepad-store
//!
//! The room store: durable storage of room documents, backed by SQLite.
//!
//! A room document is spread over three tables (`rooms`, `notes`, `files`)
//! but is always read and written as a unit. Every mutation is a single
//! conditional statement or an immediate transaction, so concurrent writers
//! can never push a room past its caps or lose each other's updates.
//!
//! [`Database`] is the synchronous handle with typed CRUD helpers.
//! [`RoomStore`] wraps it for use from async tasks.

pub mod database;
pub mod files;
pub mod migrations;
pub mod notes;
pub mod rooms;
pub mod store;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use store::{RoomLimits, RoomStore};
