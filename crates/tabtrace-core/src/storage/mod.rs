//! Structured Store
//!
//! SQLite-backed persistence for page sessions, trees, procedural rules
//! and episodic corrections.

mod migrations;
mod sqlite;

pub use migrations::MIGRATIONS;
pub use sqlite::{Result, Storage, StorageError};
