//! Lifecycle store: the keyed record collections behind the
//! application/partner workflow.
//!
//! In-memory maps are the fast path; every mutation is written through
//! to SQLite before the per-key lock is released, so concurrent events
//! for the same record cannot interleave their persistence out of
//! order. Persistence failures are logged and never surfaced to the
//! caller: the in-memory state is authoritative within one process.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use gatehouse_core::record::{
    ApplicationRecord, ApplicationStatus, MessageId, PartnerRecord, PartnerStatus, UserId,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};

use crate::db::{InstantInvite, RosterMessage, SqliteDb};

pub struct LifecycleStore {
    applications: RwLock<HashMap<MessageId, ApplicationRecord>>,
    partners: RwLock<HashMap<MessageId, PartnerRecord>>,
    db: Arc<SqliteDb>,
    /// Serializes "mutate memory, persist to DB" per record key.
    key_locks: RwLock<HashMap<MessageId, Arc<Mutex<()>>>>,
}

/// Snowflake ids are decimal and monotonically increasing, so "longer
/// string, then lexicographic" orders them numerically.
fn snowflake_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

impl LifecycleStore {
    pub async fn open(db_path: &Path) -> Result<Self> {
        let path = db_path.to_path_buf();
        let db = tokio::task::spawn_blocking(move || SqliteDb::new(&path))
            .await
            .context("spawn_blocking panicked")?
            .context("Failed to open lifecycle database")?;
        Self::from_db(Arc::new(db)).await
    }

    /// In-memory database, for tests.
    pub async fn in_memory() -> Result<Self> {
        let db = SqliteDb::new_in_memory()?;
        Self::from_db(Arc::new(db)).await
    }

    async fn from_db(db: Arc<SqliteDb>) -> Result<Self> {
        let db_clone = db.clone();
        let (applications, partners) = tokio::task::spawn_blocking(move || {
            let apps = db_clone.load_applications()?;
            let partners = db_clone.load_partners()?;
            Ok::<_, anyhow::Error>((apps, partners))
        })
        .await
        .context("spawn_blocking panicked")?
        .context("Failed to load lifecycle records")?;

        info!(
            "Loaded {} applications and {} partner requests",
            applications.len(),
            partners.len()
        );

        Ok(Self {
            applications: RwLock::new(applications.into_iter().collect()),
            partners: RwLock::new(partners.into_iter().collect()),
            db,
            key_locks: RwLock::new(HashMap::new()),
        })
    }

    async fn key_lock(&self, key: &MessageId) -> Arc<Mutex<()>> {
        {
            let locks = self.key_locks.read().await;
            if let Some(lock) = locks.get(key) {
                return lock.clone();
            }
        }
        let mut locks = self.key_locks.write().await;
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn persist_application(&self, key: &MessageId, record: &ApplicationRecord) {
        let db = self.db.clone();
        let key = key.clone();
        let record = record.clone();
        let result =
            tokio::task::spawn_blocking(move || db.upsert_application(&key, &record)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to persist application record: {:#}", e),
            Err(e) => error!("spawn_blocking panicked while persisting application: {}", e),
        }
    }

    async fn persist_partner(&self, key: &MessageId, record: &PartnerRecord) {
        let db = self.db.clone();
        let key = key.clone();
        let record = record.clone();
        let result = tokio::task::spawn_blocking(move || db.upsert_partner(&key, &record)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to persist partner record: {:#}", e),
            Err(e) => error!("spawn_blocking panicked while persisting partner: {}", e),
        }
    }

    // =========================================================================
    // Applications
    // =========================================================================

    pub async fn get_application(&self, key: &MessageId) -> Option<ApplicationRecord> {
        self.applications.read().await.get(key).cloned()
    }

    pub async fn insert_application(&self, key: MessageId, record: ApplicationRecord) {
        let lock = self.key_lock(&key).await;
        let _guard = lock.lock().await;
        self.applications
            .write()
            .await
            .insert(key.clone(), record.clone());
        self.persist_application(&key, &record).await;
    }

    /// Mutate an application under its key lock and write through.
    /// Returns the updated record, or None when the key is unknown.
    pub async fn update_application<F>(
        &self,
        key: &MessageId,
        mutate: F,
    ) -> Option<ApplicationRecord>
    where
        F: FnOnce(&mut ApplicationRecord),
    {
        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;
        let updated = {
            let mut applications = self.applications.write().await;
            let record = applications.get_mut(key)?;
            mutate(record);
            record.clone()
        };
        self.persist_application(key, &updated).await;
        Some(updated)
    }

    pub async fn find_application_by_discord_id(
        &self,
        discord_id: &UserId,
    ) -> Option<(MessageId, ApplicationRecord)> {
        let applications = self.applications.read().await;
        applications
            .iter()
            .filter(|(_, r)| &r.discord_id == discord_id)
            .max_by(|(a, _), (b, _)| snowflake_cmp(&a.0, &b.0))
            .map(|(k, r)| (k.clone(), r.clone()))
    }

    pub async fn accepted_application_for_user(
        &self,
        discord_id: &UserId,
    ) -> Option<(MessageId, ApplicationRecord)> {
        let applications = self.applications.read().await;
        applications
            .iter()
            .filter(|(_, r)| &r.discord_id == discord_id && r.status == ApplicationStatus::Accepted)
            .max_by(|(a, _), (b, _)| snowflake_cmp(&a.0, &b.0))
            .map(|(k, r)| (k.clone(), r.clone()))
    }

    pub async fn pending_application_count(&self) -> usize {
        self.applications
            .read()
            .await
            .values()
            .filter(|r| r.status == ApplicationStatus::Pending)
            .count()
    }

    // =========================================================================
    // Partners
    // =========================================================================

    pub async fn get_partner(&self, key: &MessageId) -> Option<PartnerRecord> {
        self.partners.read().await.get(key).cloned()
    }

    pub async fn insert_partner(&self, key: MessageId, record: PartnerRecord) {
        let lock = self.key_lock(&key).await;
        let _guard = lock.lock().await;
        self.partners.write().await.insert(key.clone(), record.clone());
        self.persist_partner(&key, &record).await;
    }

    pub async fn update_partner<F>(&self, key: &MessageId, mutate: F) -> Option<PartnerRecord>
    where
        F: FnOnce(&mut PartnerRecord),
    {
        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;
        let updated = {
            let mut partners = self.partners.write().await;
            let record = partners.get_mut(key)?;
            mutate(record);
            record.clone()
        };
        self.persist_partner(key, &updated).await;
        Some(updated)
    }

    /// Look up a partner request by `PR-...` request id, falling back to
    /// the requester's user id (latest request wins).
    pub async fn find_partner(&self, query: &str) -> Option<(MessageId, PartnerRecord)> {
        let partners = self.partners.read().await;
        if let Some((k, r)) = partners.iter().find(|(_, r)| r.request_id == query) {
            return Some((k.clone(), r.clone()));
        }
        partners
            .iter()
            .filter(|(_, r)| r.requester_user_id.0 == query)
            .max_by(|(_, a), (_, b)| a.request_id.cmp(&b.request_id))
            .map(|(k, r)| (k.clone(), r.clone()))
    }

    pub async fn accepted_partner_for_user(
        &self,
        user_id: &UserId,
    ) -> Option<(MessageId, PartnerRecord)> {
        let partners = self.partners.read().await;
        partners
            .iter()
            .filter(|(_, r)| {
                &r.requester_user_id == user_id && r.status == PartnerStatus::Accepted
            })
            .max_by(|(a, _), (b, _)| snowflake_cmp(&a.0, &b.0))
            .map(|(k, r)| (k.clone(), r.clone()))
    }

    pub async fn pending_partner_count(&self) -> usize {
        self.partners
            .read()
            .await
            .values()
            .filter(|r| r.status == PartnerStatus::Pending)
            .count()
    }

    /// Accepted partners whose role provisioning has not yet succeeded.
    pub async fn partners_pending_role(&self) -> Vec<(MessageId, PartnerRecord)> {
        let partners = self.partners.read().await;
        partners
            .iter()
            .filter(|(_, r)| r.needs_role_retry())
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect()
    }

    // =========================================================================
    // Instant invites and roster state (low-traffic; straight to SQLite)
    // =========================================================================

    pub async fn instant_invite(&self, user_id: &str) -> Result<Option<InstantInvite>> {
        let db = self.db.clone();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || db.get_instant_invite(&user_id))
            .await
            .context("spawn_blocking panicked")?
    }

    pub async fn put_instant_invite(&self, user_id: &str, invite: InstantInvite) -> Result<()> {
        let db = self.db.clone();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || db.put_instant_invite(&user_id, &invite))
            .await
            .context("spawn_blocking panicked")?
    }

    pub async fn take_instant_invite(&self, user_id: &str) -> Result<Option<InstantInvite>> {
        let db = self.db.clone();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || {
            let invite = db.get_instant_invite(&user_id)?;
            if invite.is_some() {
                db.delete_instant_invite(&user_id)?;
            }
            Ok(invite)
        })
        .await
        .context("spawn_blocking panicked")?
    }

    pub async fn roster_message(&self, guild_id: &str) -> Result<Option<RosterMessage>> {
        let db = self.db.clone();
        let guild_id = guild_id.to_string();
        tokio::task::spawn_blocking(move || db.get_roster_message(&guild_id))
            .await
            .context("spawn_blocking panicked")?
    }

    pub async fn put_roster_message(&self, guild_id: &str, roster: RosterMessage) -> Result<()> {
        let db = self.db.clone();
        let guild_id = guild_id.to_string();
        tokio::task::spawn_blocking(move || db.put_roster_message(&guild_id, &roster))
            .await
            .context("spawn_blocking panicked")?
    }
}
