//! Persistence bridge: the append-only mesh log
//!
//! Every envelope a node sees lands here, in four collections:
//! `message_mesh` (all message envelopes, with `broadcasts` as a derived
//! view), `key_mesh`, `decrypted` (admin only) and the bounded `dedupe`
//! trail used to rebuild the in-memory seen-set after a restart. The
//! identity table holds the node id and, on admin nodes, the key pair.
//!
//! Writes are last-writer-wins by `msg_id` and serialised by the
//! connection lock; readers get materialised snapshots.

pub mod schema;

use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use thiserror::Error;

use crate::dedupe::{SeenKind, DEDUPE_CAP};
use crate::envelope::{DecryptedMessage, EnvelopeKind, KeyEnvelope, MessageEnvelope};

// Identity table keys
pub const KEY_NODE_ID: &str = "nodeId";
pub const KEY_ADMIN_PUBLIC: &str = "adminPublicKey";
pub const KEY_ADMIN_PRIVATE: &str = "adminPrivateKey";

/// Persistence errors; fatal for the envelope being written
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("Envelope encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mutex-guarded SQLite handle for one node's mesh log
pub struct MeshStore {
    conn: Mutex<Connection>,
}

impl MeshStore {
    /// Open (creating if needed) the log at the given path
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        Self::configure(conn)
    }

    /// In-memory log for tests and ephemeral nodes
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(mut conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::run_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ---- envelope collections -------------------------------------------

    /// Record a message envelope (both broadcast and e2e)
    pub fn save_message(&self, env: &MessageEnvelope) -> Result<(), StoreError> {
        let kind = match env.kind {
            EnvelopeKind::Broadcast => "broadcast",
            EnvelopeKind::E2e => "e2e",
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO message_mesh (msg_id, kind, envelope, stored_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                env.msg_id,
                kind,
                serde_json::to_string(env)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Record a key envelope
    pub fn save_key(&self, key: &KeyEnvelope) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO key_mesh (msg_id, envelope, stored_at)
             VALUES (?1, ?2, ?3)",
            params![
                key.msg_id,
                serde_json::to_string(key)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Record a join result (admin nodes only)
    pub fn save_decrypted(&self, msg: &DecryptedMessage) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO decrypted (msg_id, record, stored_at)
             VALUES (?1, ?2, ?3)",
            params![
                msg.msg_id,
                serde_json::to_string(msg)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Every message envelope in arrival order
    pub fn messages(&self) -> Result<Vec<MessageEnvelope>, StoreError> {
        self.load_column("SELECT envelope FROM message_mesh ORDER BY seq")
    }

    /// The broadcast subset, via the derived view
    pub fn broadcasts(&self) -> Result<Vec<MessageEnvelope>, StoreError> {
        self.load_column("SELECT envelope FROM broadcasts ORDER BY seq")
    }

    /// Every key envelope in arrival order
    pub fn keys(&self) -> Result<Vec<KeyEnvelope>, StoreError> {
        self.load_column("SELECT envelope FROM key_mesh ORDER BY seq")
    }

    /// Every join result in emission order
    pub fn decrypted(&self) -> Result<Vec<DecryptedMessage>, StoreError> {
        self.load_column("SELECT record FROM decrypted ORDER BY seq")
    }

    /// True iff a join result for this id was already persisted
    pub fn has_decrypted(&self, msg_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM decrypted WHERE msg_id = ?1",
                params![msg_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn load_column<T: serde::de::DeserializeOwned>(
        &self,
        sql: &str,
    ) -> Result<Vec<T>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(serde_json::from_str(&raw?)?);
        }
        Ok(out)
    }

    // ---- dedupe trail ----------------------------------------------------

    /// Persist a sighting and trim the trail to the dedupe cap
    pub fn mark_seen(&self, msg_id: &str, kind: SeenKind) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO dedupe (msg_id, kind) VALUES (?1, ?2)",
            params![msg_id, kind.as_str()],
        )?;
        conn.execute(
            "DELETE FROM dedupe WHERE seq NOT IN
             (SELECT seq FROM dedupe ORDER BY seq DESC LIMIT ?1)",
            params![DEDUPE_CAP as i64],
        )?;
        Ok(())
    }

    /// The most recent sightings, oldest first, for seen-set rebuild
    pub fn recent_seen(&self, limit: usize) -> Result<Vec<(String, SeenKind)>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT msg_id, kind FROM
             (SELECT seq, msg_id, kind FROM dedupe ORDER BY seq DESC LIMIT ?1)
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (msg_id, kind) = row?;
            if let Some(kind) = SeenKind::from_str(&kind) {
                out.push((msg_id, kind));
            }
        }
        Ok(out)
    }

    // ---- identity --------------------------------------------------------

    pub fn get_identity(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM identity WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_identity(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO identity (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    // ---- operator surface ------------------------------------------------

    /// Serialise the four public collections into one JSON audit document
    pub fn export(&self) -> Result<serde_json::Value, StoreError> {
        Ok(json!({
            "broadcasts": self.broadcasts()?,
            "messageMesh": self.messages()?,
            "keyMesh": self.keys()?,
            "decrypted": self.decrypted()?,
        }))
    }

    /// Wipe every collection and the identity table
    ///
    /// The only way a nodeId or admin key is ever destroyed.
    pub fn reset(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "DELETE FROM message_mesh;
             DELETE FROM key_mesh;
             DELETE FROM decrypted;
             DELETE FROM dedupe;
             DELETE FROM identity;",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::HopRecord;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use chrono::Utc;

    fn store() -> MeshStore {
        MeshStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_save_and_load_messages() {
        let store = store();
        let env = MessageEnvelope::broadcast("hello", None, "a", "user_a");
        store.save_message(&env).unwrap();

        let loaded = store.messages().unwrap();
        assert_eq!(loaded, vec![env.clone()]);
        assert_eq!(store.broadcasts().unwrap(), vec![env]);
    }

    #[test]
    fn test_broadcasts_view_excludes_e2e() {
        let store = store();
        let b = MessageEnvelope::broadcast("public", None, "a", "user_a");
        let e = MessageEnvelope::e2e(BASE64.encode([0u8; 64]), None, "a", "user_a");
        store.save_message(&b).unwrap();
        store.save_message(&e).unwrap();

        assert_eq!(store.messages().unwrap().len(), 2);
        assert_eq!(store.broadcasts().unwrap(), vec![b]);
    }

    #[test]
    fn test_last_writer_wins_by_msg_id() {
        let store = store();
        let env = MessageEnvelope::broadcast("v1", None, "a", "user_a");
        store.save_message(&env).unwrap();

        let forwarded = env.add_hop("b").unwrap();
        store.save_message(&forwarded).unwrap();

        let loaded = store.messages().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].hops.len(), 2);
        assert_eq!(loaded[0].ttl, env.ttl - 1);
    }

    #[test]
    fn test_keys_roundtrip() {
        let store = store();
        let key = KeyEnvelope::new("m1", "d2VkZ2U=", "user_a");
        store.save_key(&key).unwrap();
        assert_eq!(store.keys().unwrap(), vec![key]);
    }

    #[test]
    fn test_decrypted_roundtrip_and_lookup() {
        let store = store();
        let msg = DecryptedMessage {
            msg_id: "m1".into(),
            content: "evacuate".into(),
            timestamp: Utc::now(),
            from: "user_a".into(),
            meta: None,
            message_path: vec![HopRecord::new("a")],
            key_path: vec![HopRecord::new("user_a")],
        };
        assert!(!store.has_decrypted("m1").unwrap());
        store.save_decrypted(&msg).unwrap();
        assert!(store.has_decrypted("m1").unwrap());
        assert_eq!(store.decrypted().unwrap(), vec![msg]);
    }

    #[test]
    fn test_dedupe_trail_trim_and_rebuild_order() {
        let store = store();
        for i in 0..(DEDUPE_CAP + 50) {
            store
                .mark_seen(&format!("m{i}"), SeenKind::Message)
                .unwrap();
        }
        let recent = store.recent_seen(DEDUPE_CAP).unwrap();
        assert_eq!(recent.len(), DEDUPE_CAP);
        // oldest surviving entry first
        assert_eq!(recent[0].0, "m50");
        assert_eq!(recent.last().unwrap().0, format!("m{}", DEDUPE_CAP + 49));
    }

    #[test]
    fn test_identity_kv() {
        let store = store();
        assert!(store.get_identity(KEY_NODE_ID).unwrap().is_none());
        store.set_identity(KEY_NODE_ID, "00ff").unwrap();
        assert_eq!(
            store.get_identity(KEY_NODE_ID).unwrap().as_deref(),
            Some("00ff")
        );
    }

    #[test]
    fn test_export_document_shape() {
        let store = store();
        let env = MessageEnvelope::broadcast("hello", None, "a", "user_a");
        store.save_message(&env).unwrap();

        let doc = store.export().unwrap();
        assert!(doc["broadcasts"].is_array());
        assert!(doc["messageMesh"].is_array());
        assert!(doc["keyMesh"].is_array());
        assert!(doc["decrypted"].is_array());
        assert_eq!(doc["messageMesh"][0]["msgId"], env.msg_id);
    }

    #[test]
    fn test_reset_wipes_everything() {
        let store = store();
        store.set_identity(KEY_NODE_ID, "00ff").unwrap();
        store
            .save_message(&MessageEnvelope::broadcast("x", None, "a", "user_a"))
            .unwrap();
        store.mark_seen("m", SeenKind::Message).unwrap();

        store.reset().unwrap();
        assert!(store.messages().unwrap().is_empty());
        assert!(store.recent_seen(10).unwrap().is_empty());
        assert!(store.get_identity(KEY_NODE_ID).unwrap().is_none());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.db");

        let env = MessageEnvelope::broadcast("persist me", None, "a", "user_a");
        {
            let store = MeshStore::open(&path).unwrap();
            store.save_message(&env).unwrap();
            store.mark_seen(&env.msg_id, SeenKind::Message).unwrap();
        }

        let store = MeshStore::open(&path).unwrap();
        assert_eq!(store.messages().unwrap(), vec![env.clone()]);
        assert_eq!(
            store.recent_seen(DEDUPE_CAP).unwrap(),
            vec![(env.msg_id, SeenKind::Message)]
        );
    }
}
