//! SQLite schema for the mesh log
//!
//! Migrations are managed by `rusqlite_migration`; the version lives in
//! SQLite's `user_version` pragma.

use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};

pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        r#"
        CREATE TABLE message_mesh (
            seq       INTEGER PRIMARY KEY AUTOINCREMENT,
            msg_id    TEXT NOT NULL UNIQUE,
            kind      TEXT NOT NULL,
            envelope  TEXT NOT NULL,
            stored_at TEXT NOT NULL
        );

        CREATE TABLE key_mesh (
            seq       INTEGER PRIMARY KEY AUTOINCREMENT,
            msg_id    TEXT NOT NULL UNIQUE,
            envelope  TEXT NOT NULL,
            stored_at TEXT NOT NULL
        );

        CREATE TABLE decrypted (
            seq       INTEGER PRIMARY KEY AUTOINCREMENT,
            msg_id    TEXT NOT NULL UNIQUE,
            record    TEXT NOT NULL,
            stored_at TEXT NOT NULL
        );

        CREATE TABLE dedupe (
            seq    INTEGER PRIMARY KEY AUTOINCREMENT,
            msg_id TEXT NOT NULL,
            kind   TEXT NOT NULL
        );

        CREATE TABLE identity (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE VIEW broadcasts AS
            SELECT seq, msg_id, envelope, stored_at
            FROM message_mesh
            WHERE kind = 'broadcast';
        "#,
    )])
}

pub fn run_migrations(conn: &mut Connection) -> Result<(), rusqlite_migration::Error> {
    migrations().to_latest(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_valid() {
        migrations().validate().unwrap();
    }
}
