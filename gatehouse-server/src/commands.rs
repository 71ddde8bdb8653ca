//! Staff command surface.
//!
//! Commands arrive over an admin router authenticated with a shared
//! bearer token; the relay that bridges Discord interactions posts here
//! with the actor's id, tag and roles, so authorization stays local.
//! Every command is rate limited per actor and audited.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use gatehouse_core::cooldown::CooldownCheck;
use gatehouse_core::partner::parse_role_color;
use gatehouse_core::record::{ApplicationStatus, MessageId, PartnerStatus, UserId};
use gatehouse_core::validate::is_valid_discord_id;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::db::InstantInvite;
use crate::discord::{Messenger, RoleManager};
use crate::error::GatehouseError;
use crate::lookup;
use crate::reactor::{Decision, DecisionSignal, ReactorEvent};
use crate::roster::refresh_roster;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/command", post(command))
        .route("/admin/signal", post(signal))
        .route("/admin/member-joined", post(member_joined))
}

fn cooldown_window(command: &str) -> Duration {
    let ms = match command {
        "ping" => 3000,
        "botstatus" => 5000,
        "appstatus" => 5000,
        "reply" => 8000,
        "dmuser" => 12000,
        "setappstatus" => 6000,
        "resendinvite" => 12000,
        "lookupdiscord" => 6000,
        "partnerstatus" => 5000,
        "partnerrolefix" => 7000,
        "partnerremove" => 7000,
        "devskillsrefresh" => 6000,
        "instinv" => 7000,
        "kickmem" => 7000,
        _ => 5000,
    };
    Duration::from_millis(ms)
}

fn authorize_request(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let denied = || {
        (
            StatusCode::FORBIDDEN,
            Json(json!({ "ok": false, "error": "Forbidden" })),
        )
            .into_response()
    };
    let Some(expected) = &state.config.admin_auth_token else {
        return Err(denied());
    };
    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(token) if token == expected => Ok(()),
        _ => Err(denied()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub command: String,
    pub actor_id: String,
    pub actor_tag: String,
    #[serde(default)]
    pub actor_roles: Vec<String>,
    #[serde(default)]
    pub can_manage_guild: bool,
    #[serde(default)]
    pub args: Value,
}

impl CommandRequest {
    fn is_staff(&self, staff_role_ids: &[String]) -> bool {
        self.can_manage_guild || self.actor_roles.iter().any(|r| staff_role_ids.contains(r))
    }

    fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).and_then(Value::as_str)
    }

    fn required_arg(&self, name: &str) -> Result<&str, GatehouseError> {
        self.arg(name)
            .filter(|v| !v.trim().is_empty())
            .ok_or(GatehouseError::Validation(
                gatehouse_core::ValidationError::MissingFields,
            ))
    }
}

fn reply(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "ok": true, "message": message.into() }))
}

fn refusal(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "ok": false, "message": message.into() }))
}

async fn command(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CommandRequest>,
) -> Result<Response, GatehouseError> {
    if let Err(denied) = authorize_request(&state, &headers) {
        return Ok(denied);
    }
    if !request.is_staff(&state.config.staff_role_ids) {
        return Ok(refusal("You don't have permission to use staff commands.").into_response());
    }

    let window = cooldown_window(&request.command);
    let check = state
        .cooldowns
        .lock()
        .await
        .check(&request.command, &request.actor_id, window);
    if let CooldownCheck::Wait(secs) = check {
        return Ok(refusal(format!(
            "Slow down! Try /{} again in {}s.",
            request.command, secs
        ))
        .into_response());
    }

    info!("Staff command /{} by {}", request.command, request.actor_tag);
    let response = dispatch(&state, &request).await?;
    Ok(response.into_response())
}

async fn dispatch(
    state: &Arc<AppState>,
    request: &CommandRequest,
) -> Result<Json<Value>, GatehouseError> {
    match request.command.as_str() {
        "ping" => Ok(reply(format!(
            "Pong! Up for {}s.",
            state.started_at.elapsed().as_secs()
        ))),
        "botstatus" => {
            let pending_apps = state.store.pending_application_count().await;
            let pending_partners = state.store.pending_partner_count().await;
            Ok(reply(format!(
                "Up {}s | bot mode: {} | pending applications: {} | pending partners: {}",
                state.started_at.elapsed().as_secs(),
                if state.client.is_some() { "on" } else { "off" },
                pending_apps,
                pending_partners,
            )))
        }
        "appstatus" => app_status(state, request).await,
        "setappstatus" => set_app_status(state, request).await,
        "dmuser" => dm_user(state, request).await,
        "reply" => reply_to(state, request).await,
        "resendinvite" => resend_invite(state, request).await,
        "lookupdiscord" => lookup_discord(state, request).await,
        "partnerstatus" => partner_status(state, request).await,
        "partnerrolefix" => partner_role_fix(state, request).await,
        "partnerremove" => partner_remove(state, request).await,
        "partnercolor" => partner_color(state, request).await,
        "devskillsrefresh" => dev_skills_refresh(state, request).await,
        "instinv" => instant_invite(state, request).await,
        "kickmem" => kick_member(state, request).await,
        _ => Ok(refusal(format!("Unknown command: {}", request.command))),
    }
}

fn describe_application(
    key: &MessageId,
    record: &gatehouse_core::record::ApplicationRecord,
) -> String {
    let accepted_by = record
        .accepted_by_tag
        .as_deref()
        .map(|tag| format!(" by {}", tag))
        .unwrap_or_default();
    format!(
        "{} ({}) applied for {} - status: {}{} (record {})",
        record.name,
        record.discord_username,
        record.position,
        record.status.as_str(),
        accepted_by,
        key
    )
}

/// Look up the lifecycle record behind a notification message id. The
/// store answers directly for known ids; for a message the store has
/// never seen (pre-dating the database, or recorded elsewhere) the
/// degraded path recovers the user id from the message itself and
/// matches on that.
async fn app_status(
    state: &Arc<AppState>,
    request: &CommandRequest,
) -> Result<Json<Value>, GatehouseError> {
    let target = request.required_arg("messageId")?;
    let key = MessageId::from(target);

    if let Some(record) = state.store.get_application(&key).await {
        return Ok(reply(describe_application(&key, &record)));
    }
    if let Some(record) = state.store.get_partner(&key).await {
        return Ok(reply(format!(
            "{} for **{}** by {} - status: {} (record {})",
            record.request_id,
            record.server_name,
            record.requester_username,
            record.status.as_str(),
            key
        )));
    }

    if let Some(client) = &state.client {
        let mut recovered = None;
        for channel_id in [
            &state.config.application_channel_id,
            &state.config.partner_channel_id,
        ]
        .into_iter()
        .flatten()
        {
            if let Some(id) = lookup::recover_user_id(client, channel_id, &key).await? {
                recovered = Some(id);
                break;
            }
        }
        if recovered.is_none() {
            recovered =
                lookup::scan_guild_for_message(client, &state.config.main_guild_id, &key).await?;
        }
        if let Some(user_id) = recovered {
            if let Some((found_key, record)) =
                state.store.find_application_by_discord_id(&user_id).await
            {
                return Ok(reply(format!(
                    "No record for that message, but <@{}> has one: {}",
                    user_id,
                    describe_application(&found_key, &record)
                )));
            }
            return Ok(refusal(format!(
                "Message belongs to <@{}>, but no application record exists for them.",
                user_id
            )));
        }
    }
    Ok(refusal("No record matched that message id."))
}

/// Force a stored application's status, for cleaning up records the
/// reaction flow missed or got wrong.
async fn set_app_status(
    state: &Arc<AppState>,
    request: &CommandRequest,
) -> Result<Json<Value>, GatehouseError> {
    let target = request.required_arg("messageId")?;
    let raw_status = request.required_arg("status")?;
    let Some(status) = ApplicationStatus::parse(raw_status.trim()) else {
        return Ok(refusal(
            "Unknown status. Use pending, accepted or denied.",
        ));
    };
    let key = MessageId::from(target);
    let updated = state
        .store
        .update_application(&key, |record| {
            record.status = status;
            if status != ApplicationStatus::Accepted {
                record.accepted_by = None;
                record.accepted_by_tag = None;
            }
        })
        .await;
    let Some(record) = updated else {
        return Ok(refusal("No application record for that message id."));
    };
    state.audit.log(
        "setappstatus",
        &request.actor_id,
        &request.actor_tag,
        Some(record.discord_id.0.clone()),
        json!({ "messageId": key.0, "status": status.as_str() }),
    );
    Ok(reply(format!(
        "Application from {} is now {}.",
        record.name,
        status.as_str()
    )))
}

async fn dm_user(
    state: &Arc<AppState>,
    request: &CommandRequest,
) -> Result<Json<Value>, GatehouseError> {
    let user_id = request.required_arg("userId")?;
    let message = request.required_arg("message")?;
    if !is_valid_discord_id(user_id) {
        return Err(GatehouseError::Validation(
            gatehouse_core::ValidationError::InvalidDiscordId,
        ));
    }
    let client = state.client()?;
    let sent = client.send_dm(&UserId::from(user_id), message).await;
    state.audit.log(
        "dmuser",
        &request.actor_id,
        &request.actor_tag,
        Some(user_id.to_string()),
        json!({ "delivered": sent }),
    );
    if sent {
        Ok(reply("Message delivered."))
    } else {
        Ok(refusal("Couldn't DM that user (privacy settings or unknown id)."))
    }
}

/// Resolve a reply target: notification message key first, then a raw
/// user id, then the degraded channel-scan fallback.
async fn resolve_target_user(
    state: &Arc<AppState>,
    target: &str,
) -> Result<Option<UserId>, GatehouseError> {
    let key = MessageId::from(target);
    if let Some(record) = state.store.get_application(&key).await {
        return Ok(Some(record.discord_id));
    }
    if let Some(record) = state.store.get_partner(&key).await {
        return Ok(Some(record.requester_user_id));
    }
    if is_valid_discord_id(target) {
        // Plausible as an unknown message id too; prefer treating it as
        // a user id only after the lookup chain misses. Known intake
        // channels first, full guild scan last.
        if let Some(client) = &state.client {
            for channel_id in [
                &state.config.application_channel_id,
                &state.config.partner_channel_id,
            ]
            .into_iter()
            .flatten()
            {
                if let Some(id) = lookup::recover_user_id(client, channel_id, &key).await? {
                    return Ok(Some(id));
                }
            }
            if let Some(id) =
                lookup::scan_guild_for_message(client, &state.config.main_guild_id, &key).await?
            {
                return Ok(Some(id));
            }
        }
        return Ok(Some(UserId::from(target)));
    }
    Ok(None)
}

async fn reply_to(
    state: &Arc<AppState>,
    request: &CommandRequest,
) -> Result<Json<Value>, GatehouseError> {
    let target = request.required_arg("target")?;
    let message = request.required_arg("message")?;
    let Some(user_id) = resolve_target_user(state, target).await? else {
        return Ok(refusal("No record or user matched that target."));
    };
    let client = state.client()?;
    let text = format!("**Reply from staff:**\n{}", message);
    let sent = client.send_dm(&user_id, &text).await;
    state.audit.log(
        "reply",
        &request.actor_id,
        &request.actor_tag,
        Some(user_id.0.clone()),
        json!({ "delivered": sent }),
    );
    if sent {
        Ok(reply(format!("Reply sent to <@{}>.", user_id)))
    } else {
        Ok(refusal("Couldn't DM that user."))
    }
}

async fn resend_invite(
    state: &Arc<AppState>,
    request: &CommandRequest,
) -> Result<Json<Value>, GatehouseError> {
    let target = request.required_arg("target")?;
    let Some(user_id) = resolve_target_user(state, target).await? else {
        return Ok(refusal("No record or user matched that target."));
    };
    let Some((key, record)) = state.store.accepted_application_for_user(&user_id).await else {
        return Ok(refusal("No accepted application found for that user."));
    };
    if record.is_tester() {
        return Ok(refusal("Testers don't receive team server invites."));
    }
    let client = state.client()?;
    let channel_id = state
        .config
        .team_invite_channel_id
        .as_deref()
        .ok_or(GatehouseError::NotConfigured("team invite channel"))?;
    let invite = client.create_single_use_invite(channel_id).await?;
    state
        .store
        .update_application(&key, |r| r.invite_code = Some(invite.code.clone()))
        .await;
    let dm = format!(
        "Here's a fresh invite to the team server (single-use, expires in 24h): {}",
        invite.url
    );
    let sent = client.send_dm(&user_id, &dm).await;
    state.audit.log(
        "resendinvite",
        &request.actor_id,
        &request.actor_tag,
        Some(user_id.0.clone()),
        json!({ "delivered": sent }),
    );
    if sent {
        Ok(reply(format!("New invite sent to <@{}>.", user_id)))
    } else {
        Ok(refusal(format!(
            "Invite created ({}) but the DM failed; send it manually.",
            invite.url
        )))
    }
}

async fn lookup_discord(
    state: &Arc<AppState>,
    request: &CommandRequest,
) -> Result<Json<Value>, GatehouseError> {
    let user_id = request.required_arg("userId")?;
    if !is_valid_discord_id(user_id) {
        return Err(GatehouseError::Validation(
            gatehouse_core::ValidationError::InvalidDiscordId,
        ));
    }
    let Some((key, record)) = state
        .store
        .find_application_by_discord_id(&UserId::from(user_id))
        .await
    else {
        return Ok(refusal("No application found for that user."));
    };
    Ok(reply(describe_application(&key, &record)))
}

async fn partner_status(
    state: &Arc<AppState>,
    request: &CommandRequest,
) -> Result<Json<Value>, GatehouseError> {
    let query = request.required_arg("query")?;
    let Some((key, record)) = state.store.find_partner(query).await else {
        return Ok(refusal("No partner request matched that query."));
    };
    let role = match (&record.role_name, record.pending_role_assignment) {
        (_, true) => format!(
            "role pending ({})",
            record.pending_role_reason.as_deref().unwrap_or("unknown")
        ),
        (Some(name), false) => format!("role: {}", name),
        (None, false) => "no role".to_string(),
    };
    Ok(reply(format!(
        "{} for **{}** by {} - status: {}, {} (record {})",
        record.request_id,
        record.server_name,
        record.requester_username,
        record.status.as_str(),
        role,
        key
    )))
}

async fn partner_role_fix(
    state: &Arc<AppState>,
    request: &CommandRequest,
) -> Result<Json<Value>, GatehouseError> {
    let query = request.required_arg("query")?;
    let Some((key, record)) = state.store.find_partner(query).await else {
        return Ok(refusal("No partner request matched that query."));
    };
    match state
        .reactor
        .retry_role_fix(&key, &UserId::from(request.actor_id.as_str()), &request.actor_tag)
        .await
    {
        Ok(assignment) if assignment.assigned => Ok(reply(format!(
            "Roles provisioned for {} ({}).",
            record.request_id,
            assignment.role_name.as_deref().unwrap_or("?")
        ))),
        Ok(assignment) => Ok(refusal(format!(
            "Still failing: {}",
            assignment.failure.as_deref().unwrap_or("unknown")
        ))),
        Err(message) => Ok(refusal(message)),
    }
}

async fn partner_remove(
    state: &Arc<AppState>,
    request: &CommandRequest,
) -> Result<Json<Value>, GatehouseError> {
    let query = request.required_arg("query")?;
    let Some((key, record)) = state.store.find_partner(query).await else {
        return Ok(refusal("No partner request matched that query."));
    };
    match state
        .reactor
        .remove_partner(&key, &UserId::from(request.actor_id.as_str()), &request.actor_tag)
        .await
    {
        Ok(report) => Ok(reply(format!(
            "Partner {} removed ({}).",
            record.request_id,
            report.summary()
        ))),
        Err(message) => Ok(refusal(message)),
    }
}

async fn partner_color(
    state: &Arc<AppState>,
    request: &CommandRequest,
) -> Result<Json<Value>, GatehouseError> {
    let query = request.required_arg("query")?;
    let raw_color = request.required_arg("color")?;
    let Some(color) = parse_role_color(raw_color) else {
        return Ok(refusal(format!(
            "Unknown color. Use a preset ({}) or a hex value like #a1b2c3.",
            gatehouse_core::partner::preset_names().join(", ")
        )));
    };
    let Some((key, record)) = state.store.find_partner(query).await else {
        return Ok(refusal("No partner request matched that query."));
    };
    if record.status != PartnerStatus::Accepted {
        return Ok(refusal("Partner request isn't accepted."));
    }
    let Some(role_name) = &record.role_name else {
        return Ok(refusal("Partner has no provisioned role yet; run the role fix first."));
    };
    let client = state.client()?;
    let Some(role) = client
        .find_role_by_name(&state.config.main_guild_id, role_name)
        .await?
    else {
        return Ok(refusal("Partner role no longer exists; run the role fix first."));
    };
    let value = gatehouse_core::partner::color_to_int(&color)
        .ok_or_else(|| GatehouseError::Internal(anyhow::anyhow!("unparseable color {}", color)))?;
    client
        .set_role_color(&state.config.main_guild_id, &role.id, value, "Partner color choice")
        .await?;
    state
        .store
        .update_partner(&key, |r| r.role_color = Some(color.clone()))
        .await;
    state.audit.log(
        "partnercolor",
        &request.actor_id,
        &request.actor_tag,
        Some(record.request_id.clone()),
        json!({ "color": color }),
    );
    Ok(reply(format!("Color for **{}** set to {}.", role_name, color)))
}

async fn dev_skills_refresh(
    state: &Arc<AppState>,
    request: &CommandRequest,
) -> Result<Json<Value>, GatehouseError> {
    let client = state.client()?;
    let channel_id = state
        .config
        .roster_channel_id
        .as_deref()
        .ok_or(GatehouseError::NotConfigured("roster channel"))?;
    let dev_role_id = state
        .config
        .dev_role_id
        .as_deref()
        .ok_or(GatehouseError::NotConfigured("developer role"))?;
    let message_id = refresh_roster(
        client,
        &state.store,
        &state.config.team_guild_id,
        channel_id,
        dev_role_id,
    )
    .await?;
    state.audit.log(
        "devskillsrefresh",
        &request.actor_id,
        &request.actor_tag,
        Some(message_id.clone()),
        Value::Null,
    );
    Ok(reply("Roster refreshed."))
}

async fn instant_invite(
    state: &Arc<AppState>,
    request: &CommandRequest,
) -> Result<Json<Value>, GatehouseError> {
    let user_id = request.required_arg("userId")?;
    let position = request.required_arg("position")?;
    if !is_valid_discord_id(user_id) {
        return Err(GatehouseError::Validation(
            gatehouse_core::ValidationError::InvalidDiscordId,
        ));
    }
    let Some(position_roles) = &state.position_roles else {
        return Err(GatehouseError::NotConfigured("discipline roles"));
    };
    let Some(descriptor) = position_roles.role_for(position) else {
        return Ok(refusal(format!("No role mapping for position '{}'.", position)));
    };
    let client = state.client()?;
    let channel_id = state
        .config
        .team_invite_channel_id
        .as_deref()
        .ok_or(GatehouseError::NotConfigured("team invite channel"))?;

    let invite = client.create_single_use_invite(channel_id).await?;
    state
        .store
        .put_instant_invite(
            user_id,
            InstantInvite {
                role_id: descriptor.role_id.clone(),
                role_name: descriptor.label.clone(),
                invited_by: request.actor_id.clone(),
                invited_at: chrono::Utc::now().to_rfc3339(),
            },
        )
        .await?;
    let dm = format!(
        "You've been invited to join the team as **{}**! Join here \
         (single-use, expires in 24h): {}",
        descriptor.label, invite.url
    );
    let sent = client.send_dm(&UserId::from(user_id), &dm).await;
    state.audit.log(
        "instinv",
        &request.actor_id,
        &request.actor_tag,
        Some(user_id.to_string()),
        json!({ "position": descriptor.label, "delivered": sent }),
    );
    if sent {
        Ok(reply(format!(
            "Invite sent to <@{}>; the {} role lands when they join.",
            user_id, descriptor.label
        )))
    } else {
        Ok(refusal(format!(
            "Invite created ({}) but the DM failed; send it manually.",
            invite.url
        )))
    }
}

async fn kick_member(
    state: &Arc<AppState>,
    request: &CommandRequest,
) -> Result<Json<Value>, GatehouseError> {
    let user_id = request.required_arg("userId")?;
    let reason = request.arg("reason").unwrap_or("No reason given");
    if !is_valid_discord_id(user_id) {
        return Err(GatehouseError::Validation(
            gatehouse_core::ValidationError::InvalidDiscordId,
        ));
    }
    let client = state.client()?;
    let target = UserId::from(user_id);
    client
        .kick(&state.config.team_guild_id, &target, reason)
        .await?;
    // The marker role in the main guild is best-effort cleanup.
    if let Some(role_id) = &state.config.main_dev_role_id {
        let _ = client
            .remove_roles(
                &state.config.main_guild_id,
                &target,
                std::slice::from_ref(role_id),
                "Removed from team",
            )
            .await;
    }
    state.audit.log(
        "kickmem",
        &request.actor_id,
        &request.actor_tag,
        Some(user_id.to_string()),
        json!({ "reason": reason }),
    );
    Ok(reply(format!("<@{}> removed from the team server.", user_id)))
}

// =============================================================================
// Signal and membership injection
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRequest {
    pub message_id: String,
    pub decision: String,
    pub actor_id: String,
    pub actor_tag: String,
    #[serde(default)]
    pub actor_roles: Vec<String>,
    #[serde(default)]
    pub can_manage_guild: bool,
}

async fn signal(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SignalRequest>,
) -> Result<Response, GatehouseError> {
    if let Err(denied) = authorize_request(&state, &headers) {
        return Ok(denied);
    }
    let decision = match request.decision.as_str() {
        "accept" => Decision::Accept,
        "deny" => Decision::Deny,
        other => {
            return Ok(
                refusal(format!("Unknown decision '{}'; use accept or deny.", other))
                    .into_response(),
            )
        }
    };
    let event = ReactorEvent::Decision(DecisionSignal {
        message_id: MessageId::from(request.message_id),
        actor_id: UserId::from(request.actor_id),
        actor_tag: request.actor_tag,
        actor_roles: request.actor_roles,
        actor_can_manage_guild: request.can_manage_guild,
        decision,
    });
    state
        .reactor_tx
        .send(event)
        .map_err(|_| GatehouseError::Internal(anyhow::anyhow!("reactor has shut down")))?;
    Ok(Json(json!({ "ok": true, "queued": true })).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberJoinedRequest {
    pub guild_id: String,
    pub user_id: String,
}

async fn member_joined(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<MemberJoinedRequest>,
) -> Result<Response, GatehouseError> {
    if let Err(denied) = authorize_request(&state, &headers) {
        return Ok(denied);
    }
    state
        .reactor_tx
        .send(ReactorEvent::MemberJoined {
            guild_id: request.guild_id,
            user_id: UserId::from(request.user_id),
        })
        .map_err(|_| GatehouseError::Internal(anyhow::anyhow!("reactor has shut down")))?;
    Ok(Json(json!({ "ok": true, "queued": true })).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use gatehouse_core::record::{ApplicationRecord, PartnerRecord, UserId};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const TOKEN: &str = "test-admin-token";

    async fn test_app() -> (Router, Arc<AppState>) {
        let mut state = crate::AppState::for_tests().await;
        state.config.admin_auth_token = Some(TOKEN.to_string());
        state.config.staff_role_ids = vec!["staff-1".to_string()];
        let state = Arc::new(state);
        (routes().with_state(state.clone()), state)
    }

    fn command_request(command: &str, args: Value) -> Request<Body> {
        let body = json!({
            "command": command,
            "actorId": "99999999999999999",
            "actorTag": "staff#0",
            "actorRoles": ["staff-1"],
            "args": args,
        });
        Request::post("/admin/command")
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", TOKEN))
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_missing_token_is_forbidden() {
        let (app, _) = test_app().await;
        let request = Request::post("/admin/command")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "command": "ping",
                    "actorId": "1",
                    "actorTag": "x#0",
                })
                .to_string(),
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_non_staff_actor_is_refused() {
        let (app, _) = test_app().await;
        let body = json!({
            "command": "ping",
            "actorId": "1",
            "actorTag": "x#0",
            "actorRoles": ["not-staff"],
        });
        let request = Request::post("/admin/command")
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", TOKEN))
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["ok"], false);
    }

    #[tokio::test]
    async fn test_ping_and_cooldown() {
        let (app, _) = test_app().await;
        let response = app
            .clone()
            .oneshot(command_request("ping", Value::Null))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["ok"], true);

        // Immediate reuse by the same actor hits the window
        let response = app
            .oneshot(command_request("ping", Value::Null))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["ok"], false);
        assert!(json["message"].as_str().unwrap().contains("Slow down"));
    }

    fn application_record() -> ApplicationRecord {
        ApplicationRecord {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            discord_username: "ada_l".to_string(),
            discord_id: UserId::from("12345678901234567"),
            position: "Programmer".to_string(),
            message: "hello".to_string(),
            resume_url: "Not provided".to_string(),
            status: ApplicationStatus::Pending,
            invite_code: None,
            accepted_by: None,
            accepted_by_tag: None,
        }
    }

    #[tokio::test]
    async fn test_appstatus_reports_stored_record() {
        let (app, state) = test_app().await;
        state
            .store
            .insert_application(MessageId::from("m1"), application_record())
            .await;
        let response = app
            .oneshot(command_request("appstatus", json!({ "messageId": "m1" })))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["ok"], true);
        let message = json["message"].as_str().unwrap();
        assert!(message.contains("Ada"));
        assert!(message.contains("pending"));
    }

    #[tokio::test]
    async fn test_appstatus_unknown_message_id() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(command_request("appstatus", json!({ "messageId": "nope" })))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["ok"], false);
    }

    #[tokio::test]
    async fn test_setappstatus_overrides_stored_status() {
        let (app, state) = test_app().await;
        let mut record = application_record();
        record.status = ApplicationStatus::Accepted;
        record.accepted_by = Some(UserId::from("99999999999999999"));
        record.accepted_by_tag = Some("staff#0".to_string());
        state
            .store
            .insert_application(MessageId::from("m1"), record)
            .await;

        let response = app
            .oneshot(command_request(
                "setappstatus",
                json!({ "messageId": "m1", "status": "denied" }),
            ))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["ok"], true);
        let record = state
            .store
            .get_application(&MessageId::from("m1"))
            .await
            .unwrap();
        assert_eq!(record.status, ApplicationStatus::Denied);
        assert!(record.accepted_by.is_none());
    }

    #[tokio::test]
    async fn test_setappstatus_rejects_unknown_status() {
        let (app, state) = test_app().await;
        state
            .store
            .insert_application(MessageId::from("m1"), application_record())
            .await;
        let response = app
            .oneshot(command_request(
                "setappstatus",
                json!({ "messageId": "m1", "status": "approved" }),
            ))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["ok"], false);
        assert_eq!(
            state
                .store
                .get_application(&MessageId::from("m1"))
                .await
                .unwrap()
                .status,
            ApplicationStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_partnerstatus_reports_pending_role() {
        let (app, state) = test_app().await;
        let record = PartnerRecord {
            request_id: "PR-abc-1234".to_string(),
            requester_username: "gatekeeper".to_string(),
            requester_user_id: UserId::from("12345678901234567"),
            server_name: "Example Server".to_string(),
            server_link: "https://discord.gg/abc".to_string(),
            reason: "events".to_string(),
            member_count_provided: None,
            activity_provided: None,
            member_count_detected: None,
            activity_detected: None,
            status: PartnerStatus::Accepted,
            accepted_by: None,
            accepted_by_tag: None,
            role_name: None,
            pending_role_assignment: true,
            pending_role_reason: Some("requester is not a member of the guild".to_string()),
            role_color: None,
            removed_by: None,
            removed_at: None,
        };
        state
            .store
            .insert_partner(MessageId::from("p1"), record)
            .await;

        let response = app
            .oneshot(command_request(
                "partnerstatus",
                json!({ "query": "PR-abc-1234" }),
            ))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["ok"], true);
        let message = json["message"].as_str().unwrap();
        assert!(message.contains("accepted"));
        assert!(message.contains("role pending"));
    }

    #[tokio::test]
    async fn test_signal_queues_decision() {
        let (app, state) = test_app().await;
        let body = json!({
            "messageId": "m1",
            "decision": "accept",
            "actorId": "99999999999999999",
            "actorTag": "staff#0",
            "actorRoles": ["staff-1"],
        });
        let request = Request::post("/admin/signal")
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", TOKEN))
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        // The event is waiting on the reactor channel
        let event = state.take_reactor_event_for_tests().await;
        assert!(matches!(event, Some(ReactorEvent::Decision(_))));
    }

    #[tokio::test]
    async fn test_dmuser_without_bot_token_is_config_error() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(command_request(
                "dmuser",
                json!({ "userId": "12345678901234567", "message": "hi" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (app, _) = test_app().await;
        let response = app
            .oneshot(command_request("frobnicate", Value::Null))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["ok"], false);
    }
}
