use anyhow::{Context, Result};
use gatehouse_core::position::DisciplineRoleIds;
use std::env;
use std::path::PathBuf;

/// S3-compatible blob storage settings. All four core values must be
/// present together; resume delivery falls back to inline attachments
/// when the group is absent.
#[derive(Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    /// Public URL prefix for uploaded objects. When unset, the object
    /// key itself is stored as the resume reference.
    pub public_base: Option<String>,
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    /// Bot token. When absent the server can still run in webhook-only
    /// mode for intake, but role/DM side effects are unavailable.
    pub bot_token: Option<String>,
    /// Main community guild (staff, partners, roster).
    pub main_guild_id: String,
    /// Team guild accepted applicants are invited into.
    pub team_guild_id: String,
    pub application_channel_id: Option<String>,
    pub contact_channel_id: Option<String>,
    pub partner_channel_id: Option<String>,
    pub application_webhook_url: Option<String>,
    pub contact_webhook_url: Option<String>,
    pub partner_webhook_url: Option<String>,
    /// Roles allowed to drive accept/deny decisions and staff commands.
    pub staff_role_ids: Vec<String>,
    /// Roles mentioned on new submissions.
    pub mention_role_ids: Vec<String>,
    pub partner_role_id: Option<String>,
    pub partner_welcome_channel_id: Option<String>,
    pub audit_channel_id: Option<String>,
    pub roster_channel_id: Option<String>,
    /// Channel in the team guild used for single-use invites.
    pub team_invite_channel_id: Option<String>,
    pub dev_role_id: Option<String>,
    /// Developer marker role in the main guild, removed on kick.
    pub main_dev_role_id: Option<String>,
    pub discipline_roles: Option<DisciplineRoleIds>,
    pub owner_notify_user_id: Option<String>,
    pub main_server_invite: Option<String>,
    pub support_email: Option<String>,
    /// Bearer token for the staff/admin router. When unset the router
    /// rejects everything with 403.
    pub admin_auth_token: Option<String>,
    /// Directory for persistent state (SQLite database).
    pub state_dir: PathBuf,
    pub audit_log_path: String,
    pub s3: Option<S3Config>,
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn required(name: &str) -> Result<String> {
    env::var(name).with_context(|| format!("{} environment variable is required", name))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let main_guild_id = required("MAIN_GUILD_ID")?;
        let team_guild_id = required("TEAM_GUILD_ID")?;

        let staff_role_ids: Vec<String> = ["FOUNDERS_ROLE_ID", "MANAGERS_ROLE_ID"]
            .iter()
            .filter_map(|name| optional(name))
            .collect();

        let discipline_roles = match (
            optional("ROLE_SCRIPTER_ID"),
            optional("ROLE_VFX_ID"),
            optional("ROLE_SFX_ID"),
            optional("ROLE_MODELER_ID"),
            optional("ROLE_ANIMATOR_ID"),
            optional("ROLE_GUI_ID"),
        ) {
            (Some(scripter), Some(vfx), Some(sfx), Some(modeler), Some(animator), Some(gui)) => {
                Some(DisciplineRoleIds {
                    scripter,
                    vfx,
                    sfx,
                    modeler,
                    animator,
                    gui,
                })
            }
            (None, None, None, None, None, None) => None,
            _ => anyhow::bail!(
                "Discipline role ids must be set together: ROLE_SCRIPTER_ID, ROLE_VFX_ID, \
                 ROLE_SFX_ID, ROLE_MODELER_ID, ROLE_ANIMATOR_ID, ROLE_GUI_ID"
            ),
        };

        let s3 = match (
            optional("S3_ENDPOINT"),
            optional("S3_BUCKET"),
            optional("S3_ACCESS_KEY"),
            optional("S3_SECRET_KEY"),
        ) {
            (Some(endpoint), Some(bucket), Some(access_key), Some(secret_key)) => Some(S3Config {
                endpoint,
                region: optional("S3_REGION").unwrap_or_else(|| "auto".to_string()),
                bucket,
                access_key,
                secret_key,
                public_base: optional("S3_PUBLIC_BASE"),
            }),
            (None, None, None, None) => None,
            _ => anyhow::bail!(
                "S3 settings must be set together: S3_ENDPOINT, S3_BUCKET, S3_ACCESS_KEY, \
                 S3_SECRET_KEY"
            ),
        };

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        Ok(Config {
            port,
            bot_token: optional("DISCORD_BOT_TOKEN"),
            main_guild_id,
            team_guild_id,
            application_channel_id: optional("APPLICATION_CHANNEL_ID"),
            contact_channel_id: optional("CONTACT_CHANNEL_ID"),
            partner_channel_id: optional("PARTNER_CHANNEL_ID"),
            application_webhook_url: optional("APPLICATION_WEBHOOK_URL"),
            contact_webhook_url: optional("CONTACT_WEBHOOK_URL"),
            partner_webhook_url: optional("PARTNER_WEBHOOK_URL"),
            staff_role_ids,
            mention_role_ids: ["FOUNDERS_ROLE_ID", "MANAGERS_ROLE_ID"]
                .iter()
                .filter_map(|name| optional(name))
                .collect(),
            partner_role_id: optional("PARTNER_ROLE_ID"),
            partner_welcome_channel_id: optional("PARTNER_WELCOME_CHANNEL_ID"),
            audit_channel_id: optional("AUDIT_CHANNEL_ID"),
            roster_channel_id: optional("ROSTER_CHANNEL_ID"),
            team_invite_channel_id: optional("TEAM_INVITE_CHANNEL_ID"),
            dev_role_id: optional("DEV_ROLE_ID"),
            main_dev_role_id: optional("MAIN_DEV_ROLE_ID"),
            discipline_roles,
            owner_notify_user_id: optional("OWNER_NOTIFY_USER_ID"),
            main_server_invite: optional("MAIN_SERVER_INVITE"),
            support_email: optional("SUPPORT_EMAIL"),
            admin_auth_token: optional("ADMIN_AUTH_TOKEN"),
            state_dir,
            audit_log_path: env::var("AUDIT_LOG_PATH").unwrap_or_else(|_| "audit.jsonl".to_string()),
            s3,
        })
    }

    /// Log which integrations are wired, mirroring the startup checks a
    /// fresh deployment needs to see.
    pub fn log_diagnostics(&self) {
        let checks: [(&str, bool, &str); 8] = [
            ("DISCORD_BOT_TOKEN", self.bot_token.is_some(), "bot login + channel mode"),
            (
                "APPLICATION_CHANNEL_ID",
                self.application_channel_id.is_some(),
                "apply via bot channel",
            ),
            (
                "APPLICATION_WEBHOOK_URL",
                self.application_webhook_url.is_some(),
                "apply via webhook fallback",
            ),
            (
                "PARTNER_CHANNEL_ID",
                self.partner_channel_id.is_some(),
                "partner via bot channel",
            ),
            (
                "PARTNER_ROLE_ID",
                self.partner_role_id.is_some(),
                "base role for accepted partners",
            ),
            (
                "AUDIT_CHANNEL_ID",
                self.audit_channel_id.is_some(),
                "audit log channel",
            ),
            ("S3 config", self.s3.is_some(), "resume URL storage"),
            (
                "ADMIN_AUTH_TOKEN",
                self.admin_auth_token.is_some(),
                "staff command router",
            ),
        ];
        for (name, ok, note) in checks {
            if ok {
                tracing::info!("[env:OK] {} - {}", name, note);
            } else {
                tracing::warn!("[env:WARN] {} - {}", name, note);
            }
        }
    }
}
