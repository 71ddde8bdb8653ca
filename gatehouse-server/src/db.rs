//! SQLite persistence for lifecycle collections.
//!
//! Each collection is a table of `(key, record JSON)` rows, where the
//! key is the notification message id. Storing records as JSON keeps
//! the on-disk values identical to the documented per-record layout
//! while SQLite provides atomic writes, so concurrent intake requests
//! cannot lose each other's updates the way whole-file rewrites can.
//!
//! Uses SQLite's `user_version` pragma for schema versioning.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use gatehouse_core::record::{ApplicationRecord, MessageId, PartnerRecord};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

const SCHEMA_VERSION: i32 = 1;

/// Staff-issued invite waiting for the target to join the team guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstantInvite {
    pub role_id: String,
    pub role_name: String,
    pub invited_by: String,
    pub invited_at: String,
}

/// Location of the pinned roster message for a guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterMessage {
    pub channel_id: String,
    pub message_id: String,
}

/// `rusqlite::Connection` is not `Sync`; the mutex provides the
/// required synchronization. Callers wrap operations in
/// `tokio::task::spawn_blocking`.
pub struct SqliteDb {
    conn: Mutex<Connection>,
}

impl SqliteDb {
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {:?}", path))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");

        let current_version: i32 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if current_version > SCHEMA_VERSION {
            anyhow::bail!(
                "Database schema version {} is newer than supported version {}",
                current_version,
                SCHEMA_VERSION
            );
        }

        if current_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS applications (
                    message_id TEXT PRIMARY KEY,
                    record     TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS partners (
                    message_id TEXT PRIMARY KEY,
                    record     TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS instant_invites (
                    user_id TEXT PRIMARY KEY,
                    record  TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS roster_messages (
                    guild_id   TEXT PRIMARY KEY,
                    channel_id TEXT NOT NULL,
                    message_id TEXT NOT NULL
                );
                "#,
            )?;
        }

        if current_version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        Ok(())
    }

    fn load_collection<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
    ) -> Result<Vec<(MessageId, T)>> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let mut stmt = conn.prepare(&format!("SELECT message_id, record FROM {}", table))?;
        let rows = stmt.query_map([], |row| {
            let key: String = row.get(0)?;
            let record: String = row.get(1)?;
            Ok((key, record))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (key, record_json) = row?;
            // Malformed backing storage is a fatal startup error.
            let record: T = serde_json::from_str(&record_json)
                .with_context(|| format!("Malformed {} record for key {}", table, key))?;
            out.push((MessageId::from(key), record));
        }
        Ok(out)
    }

    fn upsert_record<T: Serialize>(&self, table: &str, key: &MessageId, record: &T) -> Result<()> {
        let json = serde_json::to_string(record).context("Failed to serialize record")?;
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute(
            &format!(
                "INSERT INTO {table} (message_id, record, updated_at)
                 VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(message_id)
                 DO UPDATE SET record = ?2, updated_at = datetime('now')"
            ),
            params![key.0, json],
        )?;
        Ok(())
    }

    pub fn load_applications(&self) -> Result<Vec<(MessageId, ApplicationRecord)>> {
        self.load_collection("applications")
    }

    pub fn upsert_application(&self, key: &MessageId, record: &ApplicationRecord) -> Result<()> {
        self.upsert_record("applications", key, record)
    }

    pub fn load_partners(&self) -> Result<Vec<(MessageId, PartnerRecord)>> {
        self.load_collection("partners")
    }

    pub fn upsert_partner(&self, key: &MessageId, record: &PartnerRecord) -> Result<()> {
        self.upsert_record("partners", key, record)
    }

    pub fn get_instant_invite(&self, user_id: &str) -> Result<Option<InstantInvite>> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM instant_invites WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        match record {
            Some(json) => Ok(Some(
                serde_json::from_str(&json)
                    .with_context(|| format!("Malformed instant invite for {}", user_id))?,
            )),
            None => Ok(None),
        }
    }

    pub fn put_instant_invite(&self, user_id: &str, invite: &InstantInvite) -> Result<()> {
        let json = serde_json::to_string(invite).context("Failed to serialize instant invite")?;
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute(
            "INSERT INTO instant_invites (user_id, record) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET record = ?2",
            params![user_id, json],
        )?;
        Ok(())
    }

    pub fn delete_instant_invite(&self, user_id: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let changed = conn.execute(
            "DELETE FROM instant_invites WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(changed > 0)
    }

    pub fn get_roster_message(&self, guild_id: &str) -> Result<Option<RosterMessage>> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let row = conn
            .query_row(
                "SELECT channel_id, message_id FROM roster_messages WHERE guild_id = ?1",
                params![guild_id],
                |row| {
                    Ok(RosterMessage {
                        channel_id: row.get(0)?,
                        message_id: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn put_roster_message(&self, guild_id: &str, roster: &RosterMessage) -> Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute(
            "INSERT INTO roster_messages (guild_id, channel_id, message_id)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(guild_id) DO UPDATE SET channel_id = ?2, message_id = ?3",
            params![guild_id, roster.channel_id, roster.message_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::record::{ApplicationStatus, UserId};

    fn sample_application() -> ApplicationRecord {
        ApplicationRecord {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            discord_username: "ada_l".to_string(),
            discord_id: UserId::from("12345678901234567"),
            position: "Programmer".to_string(),
            message: "hello".to_string(),
            resume_url: "attachment:resume.pdf".to_string(),
            status: ApplicationStatus::Pending,
            invite_code: None,
            accepted_by: None,
            accepted_by_tag: None,
        }
    }

    #[test]
    fn test_upsert_and_load_applications() {
        let db = SqliteDb::new_in_memory().unwrap();
        let key = MessageId::from("m1");
        let record = sample_application();

        db.upsert_application(&key, &record).unwrap();
        let loaded = db.load_applications().unwrap();
        assert_eq!(loaded, vec![(key.clone(), record.clone())]);

        // Upsert overwrites
        let mut updated = record;
        updated.status = ApplicationStatus::Accepted;
        db.upsert_application(&key, &updated).unwrap();
        let loaded = db.load_applications().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].1.status, ApplicationStatus::Accepted);
    }

    #[test]
    fn test_malformed_record_is_fatal_on_load() {
        let db = SqliteDb::new_in_memory().unwrap();
        {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO applications (message_id, record) VALUES ('m1', 'not json')",
                [],
            )
            .unwrap();
        }
        assert!(db.load_applications().is_err());
    }

    #[test]
    fn test_instant_invite_lifecycle() {
        let db = SqliteDb::new_in_memory().unwrap();
        let invite = InstantInvite {
            role_id: "100".to_string(),
            role_name: "Scripter".to_string(),
            invited_by: "99999999999999999".to_string(),
            invited_at: "2025-01-01T00:00:00Z".to_string(),
        };
        assert!(db.get_instant_invite("123").unwrap().is_none());
        db.put_instant_invite("123", &invite).unwrap();
        assert_eq!(db.get_instant_invite("123").unwrap(), Some(invite));
        assert!(db.delete_instant_invite("123").unwrap());
        assert!(!db.delete_instant_invite("123").unwrap());
    }

    #[test]
    fn test_roster_message_upsert() {
        let db = SqliteDb::new_in_memory().unwrap();
        let roster = RosterMessage {
            channel_id: "c1".to_string(),
            message_id: "m1".to_string(),
        };
        db.put_roster_message("g1", &roster).unwrap();
        let replacement = RosterMessage {
            channel_id: "c1".to_string(),
            message_id: "m2".to_string(),
        };
        db.put_roster_message("g1", &replacement).unwrap();
        assert_eq!(db.get_roster_message("g1").unwrap(), Some(replacement));
    }
}
