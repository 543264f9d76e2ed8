//! # livepad-shared
//!
//! Types shared between the room store and the server: the room data model,
//! the closed set of wire commands/events, protocol constants and the room
//! error taxonomy.
//!
//! Note and file contents are opaque ciphertext produced by clients. Nothing
//! in this crate (or anywhere on the server) ever sees plaintext.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::{ResourceKind, RoomError};
