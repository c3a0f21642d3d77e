//! SQLite persistence.
//!
//! Owns the connection pool and the embedded schema migrations. The
//! remediation engine's tables are accessed through
//! [`crate::remediation::RemediationStorage`].

mod sqlite;

pub use sqlite::SqliteStorage;
