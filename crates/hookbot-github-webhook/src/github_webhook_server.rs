//! axum server receiving GitHub webhook deliveries.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use hookbot_notify::{NotifyOutcome, PullRequestNotifier};
use serde_json::json;
use sha2::Sha256;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::github_payloads::GithubEvent;

pub const GITHUB_WEBHOOK_PATH: &str = "/webhooks/github";
pub const HEALTH_PATH: &str = "/healthz";

pub struct GithubWebhookState {
    secret: String,
    notifier: Arc<PullRequestNotifier>,
}

impl GithubWebhookState {
    pub fn new(secret: impl Into<String>, notifier: Arc<PullRequestNotifier>) -> Self {
        Self {
            secret: secret.into(),
            notifier,
        }
    }
}

pub fn build_github_webhook_router(state: Arc<GithubWebhookState>) -> Router {
    Router::new()
        .route(GITHUB_WEBHOOK_PATH, post(handle_github_webhook))
        .route(HEALTH_PATH, get(handle_health))
        .with_state(state)
}

/// Binds `bind` and serves the webhook router until `shutdown` flips to true
/// or its sender is dropped.
pub async fn run_github_webhook_server(
    bind: &str,
    state: Arc<GithubWebhookState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve github webhook bound address")?;
    tracing::info!(addr = %local_addr, path = GITHUB_WEBHOOK_PATH, "github webhook server listening");

    axum::serve(listener, build_github_webhook_router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow_and_update() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .context("github webhook server exited unexpectedly")?;
    tracing::info!("github webhook server stopped");
    Ok(())
}

async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, "hookbot OK")
}

async fn handle_github_webhook(
    State(state): State<Arc<GithubWebhookState>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let signature = header_str(&headers, "x-hub-signature-256");
    if let Err(error) = verify_sha256_hmac_signature(body.as_bytes(), signature, &state.secret) {
        tracing::warn!(error = %error, "rejected github webhook with invalid signature");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error":{"code":"invalid_signature","message":"github webhook signature verification failed"}})),
        );
    }

    let event_name = header_str(&headers, "x-github-event");
    let delivery = header_str(&headers, "x-github-delivery");
    if event_name.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error":{"code":"missing_event","message":"x-github-event header is required"}})),
        );
    }
    let event = match GithubEvent::parse(event_name, &body) {
        Ok(event) => event,
        Err(error) => {
            tracing::warn!(event = event_name, delivery, error = %format!("{error:#}"), "failed to parse github event");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error":{"code":"parse_failed","message":format!("{error:#}")}})),
            );
        }
    };

    let status = dispatch_github_event(&state.notifier, event, delivery).await;
    (StatusCode::OK, Json(json!({ "status": status })))
}

/// Routes an event to the notifier. Notification failures are logged only;
/// GitHub always receives a 200 for a well-formed delivery.
async fn dispatch_github_event(
    notifier: &PullRequestNotifier,
    event: GithubEvent,
    delivery: &str,
) -> &'static str {
    match event {
        GithubEvent::Ping(ping) => {
            tracing::info!(hook_id = ping.hook_id, zen = %ping.zen, "github ping received");
            "pong"
        }
        GithubEvent::Issues(issues) => {
            tracing::info!(
                action = %issues.action,
                repository = %issues.repository.full_name,
                issue = issues.issue.number,
                title = %issues.issue.title,
                "github issues event received"
            );
            "ignored"
        }
        GithubEvent::PullRequest(pr) if pr.action == "review_requested" => {
            tracing::info!(delivery, event = "pull_request", action = %pr.action, url = %pr.pull_request.html_url, "handling github event");
            let outcome = notifier
                .notify_review_requested(&pr.review_requested_notice())
                .await;
            outcome_status("pull_request", &pr.action, outcome)
        }
        GithubEvent::PullRequest(pr) => {
            tracing::info!(delivery, event = "pull_request", action = %pr.action, "received unhandled github action");
            "ignored"
        }
        GithubEvent::PullRequestReview(review) if review.action == "submitted" => {
            tracing::info!(delivery, event = "pull_request_review", action = %review.action, url = %review.review.html_url, "handling github event");
            let outcome = notifier
                .notify_review_submitted(&review.review_submitted_notice())
                .await;
            outcome_status("pull_request_review", &review.action, outcome)
        }
        GithubEvent::PullRequestReview(review) => {
            tracing::info!(delivery, event = "pull_request_review", action = %review.action, "received unhandled github action");
            "ignored"
        }
        GithubEvent::Unsupported(name) => {
            tracing::info!(delivery, event = %name, "received unsupported github event");
            "ignored"
        }
    }
}

fn outcome_status(event: &str, action: &str, outcome: Result<NotifyOutcome>) -> &'static str {
    match outcome {
        Ok(NotifyOutcome::Posted) => "posted",
        Ok(NotifyOutcome::SuppressedDuplicate) => "duplicate",
        Ok(NotifyOutcome::SkippedSelfReview) => "self_review",
        Err(error) => {
            tracing::error!(event, action, error = %format!("{error:#}"), "failed to notify slack");
            "notify_failed"
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or("")
}

pub fn verify_sha256_hmac_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
) -> Result<()> {
    let digest_hex = signature_header
        .strip_prefix("sha256=")
        .ok_or_else(|| anyhow!("signature must use sha256=<hex> format"))?;
    let signature_bytes = decode_hex(digest_hex)?;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .context("failed to initialize hmac verifier")?;
    mac.update(payload);
    mac.verify_slice(&signature_bytes)
        .map_err(|_| anyhow!("signature verification failed"))
}

fn decode_hex(raw: &str) -> Result<Vec<u8>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("signature digest cannot be empty");
    }
    if !trimmed.is_ascii() || trimmed.len() % 2 != 0 {
        bail!("signature digest must be an even number of hex characters");
    }
    trimmed
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let chunk = std::str::from_utf8(pair).context("signature digest is not ascii")?;
            u8::from_str_radix(chunk, 16)
                .with_context(|| format!("invalid hex byte '{chunk}' in signature digest"))
        })
        .collect()
}
