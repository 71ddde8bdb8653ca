//! Community operations backend: form intake forwarded to Discord, a
//! lifecycle store keyed on the forwarded message ids, a decision
//! reactor, and a staff command surface.

pub mod audit;
pub mod blob;
pub mod commands;
pub mod config;
pub mod db;
pub mod discord;
pub mod error;
pub mod intake;
pub mod lookup;
pub mod notify;
pub mod reactor;
pub mod roster;
pub mod store;

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use gatehouse_core::cooldown::CooldownTracker;
use gatehouse_core::position::PositionRoles;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::audit::AuditLogger;
use crate::blob::BlobStore;
use crate::config::Config;
use crate::discord::DiscordClient;
use crate::error::GatehouseError;
use crate::reactor::{Reactor, ReactorEvent};
use crate::store::LifecycleStore;

/// Outcome of the most recent request per intake kind, for /ops.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IntakeOutcome {
    pub ok: bool,
    pub detail: String,
    pub at: String,
}

#[derive(Default)]
pub struct OpsState {
    pub last: std::collections::HashMap<&'static str, IntakeOutcome>,
}

/// Everything a request handler can reach. Built once at startup and
/// shared behind an Arc; no globals.
pub struct AppState {
    pub config: Config,
    pub store: Arc<LifecycleStore>,
    pub client: Option<Arc<DiscordClient>>,
    pub blob: Option<Arc<dyn BlobStore>>,
    pub audit: AuditLogger,
    pub reactor: Arc<Reactor>,
    pub reactor_tx: mpsc::UnboundedSender<ReactorEvent>,
    pub position_roles: Option<PositionRoles>,
    pub cooldowns: Mutex<CooldownTracker>,
    pub ops: RwLock<OpsState>,
    pub started_at: Instant,
    #[cfg(test)]
    reactor_rx: Mutex<mpsc::UnboundedReceiver<ReactorEvent>>,
}

impl AppState {
    pub fn client(&self) -> Result<&Arc<DiscordClient>, GatehouseError> {
        self.client
            .as_ref()
            .ok_or(GatehouseError::NotConfigured("bot token"))
    }

    #[cfg(test)]
    pub async fn for_tests() -> Self {
        use crate::discord::Disconnected;
        use std::path::PathBuf;

        let config = Config {
            port: 0,
            bot_token: None,
            main_guild_id: "g-main".to_string(),
            team_guild_id: "g-team".to_string(),
            application_channel_id: None,
            contact_channel_id: None,
            partner_channel_id: None,
            application_webhook_url: None,
            contact_webhook_url: None,
            partner_webhook_url: None,
            staff_role_ids: vec![],
            mention_role_ids: vec![],
            partner_role_id: None,
            partner_welcome_channel_id: None,
            audit_channel_id: None,
            roster_channel_id: None,
            team_invite_channel_id: None,
            dev_role_id: None,
            main_dev_role_id: None,
            discipline_roles: None,
            owner_notify_user_id: None,
            main_server_invite: None,
            support_email: None,
            admin_auth_token: None,
            state_dir: PathBuf::from("."),
            audit_log_path: "audit.jsonl".to_string(),
            s3: None,
        };
        let store = Arc::new(LifecycleStore::in_memory().await.unwrap());
        let (reactor_tx, reactor_rx) = mpsc::unbounded_channel();
        let reactor = Arc::new(Reactor::new(
            store.clone(),
            Arc::new(Disconnected),
            Arc::new(Disconnected),
            AuditLogger::disabled(),
            reactor::ReactorSettings {
                main_guild_id: config.main_guild_id.clone(),
                team_guild_id: config.team_guild_id.clone(),
                staff_role_ids: config.staff_role_ids.clone(),
                team_invite_channel_id: None,
                partner_role_id: None,
                partner_welcome_channel_id: None,
                main_server_invite: None,
                support_email: None,
                owner_notify_user_id: None,
                dev_role_id: None,
                position_roles: None,
            },
        ));
        Self {
            config,
            store,
            client: None,
            blob: None,
            audit: AuditLogger::disabled(),
            reactor,
            reactor_tx,
            position_roles: None,
            cooldowns: Mutex::new(CooldownTracker::new()),
            ops: RwLock::new(OpsState::default()),
            started_at: Instant::now(),
            reactor_rx: Mutex::new(reactor_rx),
        }
    }

    #[cfg(test)]
    pub async fn take_reactor_event_for_tests(&self) -> Option<ReactorEvent> {
        self.reactor_rx.lock().await.try_recv().ok()
    }
}

/// Full HTTP surface: public intake plus the admin router.
pub fn router(state: Arc<AppState>) -> Router {
    intake::routes()
        .merge(commands::routes())
        .with_state(state)
}
