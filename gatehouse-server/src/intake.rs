//! Public intake surface: the application, contact and partner forms.
//!
//! Each handler validates, forwards the submission to Discord, and only
//! then (for applications and partner requests) creates the pending
//! lifecycle record keyed on the message id the forward returned. A
//! submission that fails to forward creates no record at all.

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use gatehouse_core::partner::parse_invite_code;
use gatehouse_core::record::{
    ApplicationRecord, ApplicationStatus, PartnerRecord, PartnerStatus, UserId,
};
use gatehouse_core::validate::{
    ApplicationSubmission, ContactSubmission, PartnerSubmission,
};
use rand::Rng;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::blob::resume_key;
use crate::error::GatehouseError;
use crate::notify::{
    application_embed, contact_embed, mention_line, partner_embed, Attachment,
    BotChannelNotifier, Notification, Notifier, WebhookNotifier,
};
use crate::{AppState, IntakeOutcome};

const MAX_RESUME_BYTES: usize = 8 * 1024 * 1024;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/ops", get(ops))
        .route("/apply", post(apply))
        .route("/contact", post(contact))
        .route("/partner-apply", post(partner_apply))
}

/// Collected multipart form: text fields by name, plus the resume file
/// if one was attached.
#[derive(Default)]
struct FormData {
    fields: HashMap<String, String>,
    resume: Option<Attachment>,
}

impl FormData {
    fn get(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }
}

async fn read_form(mut multipart: Multipart) -> Result<FormData, GatehouseError> {
    let mut form = FormData::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatehouseError::Internal(anyhow::anyhow!("multipart read failed: {}", e)))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == "resume" {
            let filename = field
                .file_name()
                .unwrap_or("resume.pdf")
                .to_string();
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| {
                    GatehouseError::Internal(anyhow::anyhow!("resume read failed: {}", e))
                })?;
            if bytes.len() > MAX_RESUME_BYTES {
                return Err(GatehouseError::Validation(
                    gatehouse_core::ValidationError::ResumeTooLarge,
                ));
            }
            if !bytes.is_empty() {
                form.resume = Some(Attachment {
                    filename,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
        } else {
            let value = field.text().await.map_err(|e| {
                GatehouseError::Internal(anyhow::anyhow!("multipart field read failed: {}", e))
            })?;
            form.fields.insert(name, value);
        }
    }
    Ok(form)
}

/// Delivery target resolution: bot channel when both the client and the
/// channel id are wired, the incoming webhook otherwise.
fn notifier_for(
    state: &AppState,
    channel_id: &Option<String>,
    webhook_url: &Option<String>,
    surface: &'static str,
) -> Result<Box<dyn Notifier>, GatehouseError> {
    if let (Some(client), Some(channel_id)) = (&state.client, channel_id) {
        return Ok(Box::new(BotChannelNotifier::new(
            client.clone(),
            channel_id.clone(),
        )));
    }
    if let Some(url) = webhook_url {
        return Ok(Box::new(WebhookNotifier::new(url.clone())));
    }
    Err(GatehouseError::NotConfigured(surface))
}

fn base36(mut n: u128) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ASCII")
}

/// Reference recorded when the resume travels inline on the Discord
/// message instead of in blob storage.
fn inline_resume_ref(filename: &str) -> String {
    format!("attachment:{}", filename)
}

/// `PR-<base36 millis>-<4 digits>`: sortable by creation time, unique
/// enough for a human-quoted id.
pub fn new_request_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u128;
    let suffix: u16 = rand::thread_rng().gen_range(1000..10000);
    format!("PR-{}-{}", base36(millis), suffix)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn ops(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let last = state.ops.read().await.last.clone();
    let pending_applications = state.store.pending_application_count().await;
    let pending_partners = state.store.pending_partner_count().await;
    Json(json!({
        "ok": true,
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "pendingApplications": pending_applications,
        "pendingPartners": pending_partners,
        "lastOutcomes": last,
        "botMode": state.client.is_some(),
        "blobStorage": state.blob.is_some(),
    }))
}

/// Record the most recent outcome per intake kind so /ops can answer
/// "is this surface healthy" without log access.
async fn note_outcome<T>(
    state: &AppState,
    kind: &'static str,
    result: &Result<T, GatehouseError>,
) {
    let outcome = match result {
        Ok(_) => IntakeOutcome {
            ok: true,
            detail: "ok".to_string(),
            at: chrono::Utc::now().to_rfc3339(),
        },
        Err(e) => IntakeOutcome {
            ok: false,
            detail: e.to_string(),
            at: chrono::Utc::now().to_rfc3339(),
        },
    };
    state.ops.write().await.last.insert(kind, outcome);
}

async fn apply(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, GatehouseError> {
    let result = handle_apply(&state, multipart).await;
    note_outcome(&state, "apply", &result).await;
    result
}

async fn handle_apply(
    state: &AppState,
    multipart: Multipart,
) -> Result<(StatusCode, Json<serde_json::Value>), GatehouseError> {
    let form = read_form(multipart).await?;
    let submission = ApplicationSubmission::validate(
        form.get("name"),
        form.get("email"),
        form.get("discordUsername"),
        form.get("discordId"),
        form.get("position"),
        form.get("message"),
    )?;

    let Some(resume) = form.resume else {
        return Err(GatehouseError::Validation(
            gatehouse_core::ValidationError::ResumeMissing,
        ));
    };

    let notifier = notifier_for(
        state,
        &state.config.application_channel_id,
        &state.config.application_webhook_url,
        "application destination",
    )?;

    // Resume handling: blob storage wins; bot mode can fall back to an
    // inline attachment recorded as `attachment:<filename>`; webhook
    // mode without blob storage cannot carry the file at all.
    let stored_url: Option<String>;
    let mut inline_attachment: Option<Attachment> = None;
    let resume_ref: String;
    if let Some(blob) = &state.blob {
        let key = resume_key(&resume.filename);
        let url = blob.put(&key, &resume.content_type, resume.bytes).await?;
        resume_ref = url.clone();
        stored_url = Some(url);
    } else if notifier.supports_attachments() {
        resume_ref = inline_resume_ref(&resume.filename);
        inline_attachment = Some(resume);
        stored_url = None;
    } else {
        return Err(GatehouseError::NotConfigured("resume storage"));
    }

    let embed = application_embed(&submission, stored_url.as_deref());
    let content = mention_line(&state.config.mention_role_ids, "New team application");
    let message_id = notifier
        .send(&Notification {
            content,
            embed,
            attachment: inline_attachment,
            username: None,
        })
        .await?;

    let record = ApplicationRecord {
        name: submission.name.clone(),
        email: submission.email,
        discord_username: submission.discord_username,
        discord_id: UserId::from(submission.discord_id),
        position: submission.position,
        message: submission.message,
        resume_url: resume_ref,
        status: ApplicationStatus::Pending,
        invite_code: None,
        accepted_by: None,
        accepted_by_tag: None,
    };
    state
        .store
        .insert_application(message_id.clone(), record)
        .await;
    info!("New application from {} recorded as {}", submission.name, message_id);

    Ok((
        StatusCode::OK,
        Json(json!({ "ok": true, "messageId": message_id.0 })),
    ))
}

async fn contact(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, GatehouseError> {
    let result = handle_contact(&state, multipart).await;
    note_outcome(&state, "contact", &result).await;
    result
}

async fn handle_contact(
    state: &AppState,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, GatehouseError> {
    let form = read_form(multipart).await?;
    let submission = ContactSubmission::validate(
        form.get("name"),
        form.get("email"),
        form.get("discordId"),
        form.get("topic"),
        form.get("message"),
        form.get("inquiryType"),
    )?;

    let notifier = notifier_for(
        state,
        &state.config.contact_channel_id,
        &state.config.contact_webhook_url,
        "contact destination",
    )?;
    let embed = contact_embed(&submission);
    let content = mention_line(&state.config.mention_role_ids, "New inquiry");
    notifier
        .send(&Notification {
            content,
            embed,
            attachment: None,
            username: None,
        })
        .await?;

    // Contact messages are forward-only; no lifecycle record.
    Ok(Json(json!({ "ok": true })))
}

async fn partner_apply(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, GatehouseError> {
    let result = handle_partner_apply(&state, multipart).await;
    note_outcome(&state, "partner", &result).await;
    result
}

async fn handle_partner_apply(
    state: &AppState,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, GatehouseError> {
    let form = read_form(multipart).await?;
    let submission = PartnerSubmission::validate(
        form.get("serverLink"),
        form.get("username"),
        form.get("userId"),
        form.get("reason"),
        form.get("serverName"),
        form.get("memberCount"),
        form.get("activity"),
    )?;

    let notifier = notifier_for(
        state,
        &state.config.partner_channel_id,
        &state.config.partner_webhook_url,
        "partner destination",
    )?;

    // Detected counts are advisory; any failure just leaves them blank.
    let detected = match (&state.client, parse_invite_code(&submission.server_link)) {
        (Some(client), Some(code)) => match client.invite_counts(&code).await {
            Ok(counts) => Some(counts),
            Err(e) => {
                warn!("Invite count lookup for {} failed: {}", code, e);
                None
            }
        },
        _ => None,
    };

    let request_id = new_request_id();
    let embed = partner_embed(&submission, detected, &request_id);
    let content = mention_line(&state.config.mention_role_ids, "New partner request");
    let message_id = notifier
        .send(&Notification {
            content,
            embed,
            attachment: None,
            username: None,
        })
        .await?;

    let record = PartnerRecord {
        request_id: request_id.clone(),
        requester_username: submission.username,
        requester_user_id: UserId::from(submission.user_id),
        server_name: submission.server_name,
        server_link: submission.server_link,
        reason: submission.reason,
        member_count_provided: submission.member_count,
        activity_provided: submission.activity,
        member_count_detected: detected.and_then(|c| c.member_count),
        activity_detected: detected.and_then(|c| c.online_count),
        status: PartnerStatus::Pending,
        accepted_by: None,
        accepted_by_tag: None,
        role_name: None,
        pending_role_assignment: false,
        pending_role_reason: None,
        role_color: None,
        removed_by: None,
        removed_at: None,
    };
    state.store.insert_partner(message_id.clone(), record).await;
    info!("New partner request {} recorded as {}", request_id, message_id);

    Ok(Json(json!({ "ok": true, "requestId": request_id })))
}
