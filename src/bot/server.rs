//! Slack Events API and interactivity endpoints.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use super::actions::ActionClick;
use super::handler::{InboundMessage, MessageHandler};

type HmacSha256 = Hmac<Sha256>;

const MAX_SIGNATURE_AGE_SECS: i64 = 60 * 5;

pub struct AppState {
    pub handler: Arc<MessageHandler>,
    pub signing_secret: String,
    pub bot_user_id: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing header: {0}")]
    MissingHeader(&'static str),
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),
    #[error("timestamp too old")]
    TimestampTooOld,
    #[error("invalid signing secret")]
    InvalidSecret,
    #[error("signature mismatch")]
    SignatureMismatch,
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, SignatureError> {
    headers
        .get(name)
        .ok_or(SignatureError::MissingHeader(name))?
        .to_str()
        .map_err(|_| SignatureError::InvalidHeader(name))
}

pub fn verify_slack_signature(
    signing_secret: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), SignatureError> {
    verify_signature_at(signing_secret, headers, body, Utc::now().timestamp())
}

/// `v0=hex(HMAC-SHA256(secret, "v0:{ts}:{body}"))`, checked in constant time.
fn verify_signature_at(
    signing_secret: &str,
    headers: &HeaderMap,
    body: &[u8],
    now: i64,
) -> Result<(), SignatureError> {
    let timestamp = header(headers, "X-Slack-Request-Timestamp")?;
    let signature = header(headers, "X-Slack-Signature")?;

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::InvalidHeader("X-Slack-Request-Timestamp"))?;
    if (now - ts).abs() > MAX_SIGNATURE_AGE_SECS {
        return Err(SignatureError::TimestampTooOld);
    }

    let expected = signature
        .strip_prefix("v0=")
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
        .ok_or(SignatureError::InvalidHeader("X-Slack-Signature"))?;

    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes())
        .map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::SignatureMismatch)
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum SlackEnvelope {
    #[serde(rename = "url_verification")]
    UrlVerification { challenge: String },

    #[serde(rename = "event_callback")]
    EventCallback { event: SlackEvent },

    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum SlackEvent {
    #[serde(rename = "app_mention")]
    AppMention {
        user: String,
        text: String,
        ts: String,
        channel: String,
        #[serde(default)]
        thread_ts: Option<String>,
    },

    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        user: Option<String>,
        #[serde(default)]
        text: Option<String>,
        ts: String,
        channel: String,
        #[serde(default)]
        thread_ts: Option<String>,
        #[serde(default)]
        channel_type: Option<String>,
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        bot_id: Option<String>,
    },

    #[serde(other)]
    Other,
}

/// Mentions anywhere, plain messages only in DMs. Bot traffic and edits are dropped.
fn inbound_from_event(event: SlackEvent, bot_user_id: Option<&str>) -> Option<InboundMessage> {
    let msg = match event {
        SlackEvent::AppMention {
            user,
            text,
            ts,
            channel,
            thread_ts,
        } => InboundMessage {
            text,
            author_id: user,
            channel_id: channel,
            thread_ts,
            ts,
        },
        SlackEvent::Message {
            user,
            text,
            ts,
            channel,
            thread_ts,
            channel_type,
            subtype,
            bot_id,
        } => {
            if bot_id.is_some() || subtype.is_some() || channel_type.as_deref() != Some("im") {
                return None;
            }
            InboundMessage {
                text: text.unwrap_or_default(),
                author_id: user?,
                channel_id: channel,
                thread_ts,
                ts,
            }
        }
        SlackEvent::Other => return None,
    };

    if Some(msg.author_id.as_str()) == bot_user_id {
        return None;
    }
    Some(msg)
}

#[derive(Debug, Deserialize)]
struct ActionUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ActionChannel {
    id: String,
}

#[derive(Debug, Deserialize)]
struct BlockAction {
    action_id: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActionPayload {
    #[serde(rename = "type")]
    kind: String,
    user: ActionUser,
    #[serde(default)]
    channel: Option<ActionChannel>,
    #[serde(default)]
    actions: Vec<BlockAction>,
}

/// Button clicks from an interactivity form body (`payload=<json>`).
fn clicks_from_form(body: &[u8]) -> Result<Vec<ActionClick>, String> {
    let raw = url::form_urlencoded::parse(body)
        .find(|(key, _)| key == "payload")
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| "missing payload".to_string())?;

    let payload: ActionPayload =
        serde_json::from_str(&raw).map_err(|e| format!("invalid payload: {}", e))?;
    if payload.kind != "block_actions" {
        return Ok(Vec::new());
    }

    let channel_id = payload.channel.map(|c| c.id);
    Ok(payload
        .actions
        .into_iter()
        .map(|action| ActionClick {
            action_id: action.action_id,
            value: action.value.unwrap_or_default(),
            user_id: payload.user.id.clone(),
            channel_id: channel_id.clone(),
        })
        .collect())
}

async fn slack_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(err) = verify_slack_signature(&state.signing_secret, &headers, &body) {
        warn!("Invalid slack signature: {}", err);
        return (StatusCode::UNAUTHORIZED, "invalid signature").into_response();
    }

    // Slack redelivers when we are slow to ack; the first delivery is already being handled.
    if headers.contains_key("X-Slack-Retry-Num") {
        debug!("Ignoring slack retry");
        return StatusCode::OK.into_response();
    }

    let envelope: SlackEnvelope = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(err) => {
            warn!("Invalid slack payload: {}", err);
            return (StatusCode::BAD_REQUEST, "invalid payload").into_response();
        }
    };

    match envelope {
        SlackEnvelope::UrlVerification { challenge } => {
            Json(json!({ "challenge": challenge })).into_response()
        }
        SlackEnvelope::EventCallback { event } => {
            if let Some(msg) = inbound_from_event(event, state.bot_user_id.as_deref()) {
                let handler = state.handler.clone();
                tokio::spawn(async move {
                    handler.handle_message(&msg).await;
                });
            }
            StatusCode::OK.into_response()
        }
        SlackEnvelope::Other => StatusCode::OK.into_response(),
    }
}

async fn slack_actions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(err) = verify_slack_signature(&state.signing_secret, &headers, &body) {
        warn!("Invalid slack signature (actions): {}", err);
        return (StatusCode::UNAUTHORIZED, "invalid signature").into_response();
    }

    let clicks = match clicks_from_form(&body) {
        Ok(clicks) => clicks,
        Err(err) => {
            warn!("Bad slack actions request: {}", err);
            return (StatusCode::BAD_REQUEST, err).into_response();
        }
    };

    for click in clicks {
        let handler = state.handler.clone();
        tokio::spawn(async move {
            handler.handle_action(&click).await;
        });
    }
    StatusCode::OK.into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/slack/events", post(slack_events))
        .route("/slack/actions", post(slack_actions))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
