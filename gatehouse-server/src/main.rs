use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use gatehouse_core::cooldown::CooldownTracker;
use gatehouse_core::position::PositionRoles;
use tokio::sync::{mpsc, Mutex, RwLock};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gatehouse_server::audit::AuditLogger;
use gatehouse_server::blob::{BlobStore, S3BlobStore};
use gatehouse_server::config::Config;
use gatehouse_server::discord::{Disconnected, DiscordClient, Messenger, RoleManager};
use gatehouse_server::reactor::{Reactor, ReactorSettings};
use gatehouse_server::store::LifecycleStore;
use gatehouse_server::{router, AppState, OpsState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    config.log_diagnostics();

    let db_path = config.state_dir.join("gatehouse.db");
    let store = Arc::new(LifecycleStore::open(&db_path).await?);

    let client = config
        .bot_token
        .clone()
        .map(|token| Arc::new(DiscordClient::new(token)));
    let (roles, messenger): (Arc<dyn RoleManager>, Arc<dyn Messenger>) = match &client {
        Some(client) => (client.clone(), client.clone()),
        None => (Arc::new(Disconnected), Arc::new(Disconnected)),
    };

    // Fail fast on a position table that names unknown roles.
    let position_roles = config.discipline_roles.as_ref().map(PositionRoles::new);
    if let (Some(table), Some(client)) = (&position_roles, &client) {
        let known: Vec<String> = client
            .list_roles(&config.team_guild_id)
            .await
            .context("Failed to list team guild roles for validation")?
            .into_iter()
            .map(|r| r.id)
            .collect();
        if let Err(missing) = table.validate_against(&known) {
            anyhow::bail!(
                "Discipline role ids not present in the team guild: {}",
                missing.join(", ")
            );
        }
        info!("Position role table validated against the team guild");
    }

    let blob: Option<Arc<dyn BlobStore>> = config
        .s3
        .clone()
        .map(|s3| Arc::new(S3BlobStore::new(s3)) as Arc<dyn BlobStore>);

    let audit_channel = match (&client, &config.audit_channel_id) {
        (Some(client), Some(channel_id)) => Some((client.clone(), channel_id.clone())),
        _ => None,
    };
    let (audit, _audit_task) = AuditLogger::start(config.audit_log_path.clone(), audit_channel);

    let (reactor_tx, reactor_rx) = mpsc::unbounded_channel();
    let reactor = Arc::new(Reactor::new(
        store.clone(),
        roles,
        messenger,
        audit.clone(),
        ReactorSettings {
            main_guild_id: config.main_guild_id.clone(),
            team_guild_id: config.team_guild_id.clone(),
            staff_role_ids: config.staff_role_ids.clone(),
            team_invite_channel_id: config.team_invite_channel_id.clone(),
            partner_role_id: config.partner_role_id.clone(),
            partner_welcome_channel_id: config.partner_welcome_channel_id.clone(),
            main_server_invite: config.main_server_invite.clone(),
            support_email: config.support_email.clone(),
            owner_notify_user_id: config.owner_notify_user_id.clone(),
            dev_role_id: config.dev_role_id.clone(),
            position_roles: position_roles.clone(),
        },
    ));

    // Catch up on partners whose role provisioning failed last run.
    reactor.startup_sync().await;
    tokio::spawn(reactor.clone().run(reactor_rx));

    let port = config.port;
    let state = Arc::new(AppState {
        config,
        store,
        client,
        blob,
        audit,
        reactor,
        reactor_tx,
        position_roles,
        cooldowns: Mutex::new(CooldownTracker::new()),
        ops: RwLock::new(OpsState::default()),
        started_at: Instant::now(),
    });

    let app = router(state).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!("Listening on port {}", port);
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
