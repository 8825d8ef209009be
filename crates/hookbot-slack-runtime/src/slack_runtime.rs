//! Slack socket-mode loop: receives mentions, runs user commands and replies.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use hookbot_core::{DisplayTimeZone, ProcessClock};
use hookbot_identity::ProfileStore;
use hookbot_notify::DuplicateSuppressor;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::slack_helpers::truncate_chars;

mod slack_api_client;
mod slack_command_helpers;
mod slack_user_commands;

pub use slack_api_client::{SlackApiClient, SlackChannel};
use slack_command_helpers::{mentions_bot, parse_mention_command};
use slack_user_commands::{execute_mention_command, CommandReply};

/// Slack redelivers unacknowledged envelopes for a few minutes.
const EVENT_REPLAY_WINDOW: Duration = Duration::from_secs(10 * 60);
const EVENT_REPLAY_RETENTION: Duration = Duration::from_secs(60 * 60);
const SLACK_TEXT_REPLY_MAX_CHARS: usize = 3_500;

#[derive(Debug, Clone)]
pub struct SlackBridgeRuntimeConfig {
    pub api_base: String,
    pub app_token: String,
    pub bot_token: String,
    /// Skips the `auth.test` lookup when set.
    pub bot_user_id: Option<String>,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub reconnect_delay: Duration,
}

impl SlackBridgeRuntimeConfig {
    pub fn api_client(&self) -> Result<SlackApiClient> {
        SlackApiClient::new(
            self.api_base.clone(),
            self.app_token.clone(),
            self.bot_token.clone(),
            self.request_timeout_ms,
            self.retry_max_attempts,
            self.retry_base_delay_ms,
        )
    }
}

/// Shared state the user commands run against.
#[derive(Clone)]
pub struct SlackBridgeContext {
    pub profiles: Arc<dyn ProfileStore>,
    pub clock: ProcessClock,
    pub time_zone: DisplayTimeZone,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackSocketEnvelope {
    #[serde(default)]
    envelope_id: String,
    #[serde(rename = "type")]
    envelope_type: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SlackMentionKind {
    AppMention,
    DirectMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SlackMentionEvent {
    kind: SlackMentionKind,
    event_id: String,
    channel_id: String,
    user_id: String,
    text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Disconnected,
}

/// Runs the socket-mode loop until `shutdown` flips to true or its sender is
/// dropped. Connection failures are logged and retried after the configured
/// reconnect delay.
pub async fn run_slack_bridge(
    config: SlackBridgeRuntimeConfig,
    client: SlackApiClient,
    context: SlackBridgeContext,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let bot_user_id = match config.bot_user_id.as_deref().map(str::trim) {
        Some(user_id) if !user_id.is_empty() => user_id.to_string(),
        _ => client.resolve_bot_user_id().await?,
    };
    let runtime = SlackBridgeRuntime {
        reconnect_delay: config.reconnect_delay,
        client,
        context,
        bot_user_id,
        seen_events: DuplicateSuppressor::new(EVENT_REPLAY_RETENTION),
        shutdown,
    };
    let sweeper = runtime.seen_events.spawn_sweeper(EVENT_REPLAY_RETENTION);
    let result = runtime.run().await;
    sweeper.shutdown().await;
    result
}

struct SlackBridgeRuntime {
    reconnect_delay: Duration,
    client: SlackApiClient,
    context: SlackBridgeContext,
    bot_user_id: String,
    seen_events: DuplicateSuppressor,
    shutdown: watch::Receiver<bool>,
}

impl SlackBridgeRuntime {
    async fn run(&self) -> Result<()> {
        let mut failure_streak = 0_usize;
        loop {
            if shutdown_requested(&self.shutdown) {
                break;
            }
            match self.client.open_socket_connection().await {
                Ok(socket_url) => {
                    tracing::info!(bot_user_id = %self.bot_user_id, "slack socket connected");
                    match self.run_socket_session(&socket_url).await {
                        Ok(SessionEnd::Shutdown) => break,
                        Ok(SessionEnd::Disconnected) => {
                            failure_streak = 0;
                            tracing::info!("slack socket disconnected");
                        }
                        Err(error) => {
                            failure_streak = failure_streak.saturating_add(1);
                            tracing::warn!(
                                failure_streak,
                                error = %format!("{error:#}"),
                                "slack socket session error"
                            );
                        }
                    }
                }
                Err(error) => {
                    failure_streak = failure_streak.saturating_add(1);
                    tracing::warn!(
                        failure_streak,
                        error = %format!("{error:#}"),
                        "failed to open slack socket connection"
                    );
                }
            }

            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
        tracing::info!("slack bridge shutdown requested");
        Ok(())
    }

    async fn run_socket_session(&self, socket_url: &str) -> Result<SessionEnd> {
        let (stream, _response) = connect_async(socket_url)
            .await
            .context("failed to connect slack socket mode websocket")?;
        let (mut sink, mut source) = stream.split();
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
                maybe_message = source.next() => {
                    let Some(message_result) = maybe_message else {
                        return Ok(SessionEnd::Disconnected);
                    };
                    let message = message_result.context("failed reading slack websocket message")?;
                    if matches!(message, WsMessage::Close(_)) {
                        return Ok(SessionEnd::Disconnected);
                    }
                    let Some(envelope) = parse_socket_envelope(message)? else {
                        continue;
                    };
                    if !envelope.envelope_id.is_empty() {
                        ack_envelope(&mut sink, &envelope.envelope_id).await?;
                    }
                    if envelope.envelope_type == "disconnect" {
                        return Ok(SessionEnd::Disconnected);
                    }
                    self.handle_envelope(&envelope);
                }
            }
        }
    }

    /// Dispatches a mention to its own task so slow commands never delay acks.
    fn handle_envelope(&self, envelope: &SlackSocketEnvelope) -> Option<JoinHandle<()>> {
        let event = match normalize_socket_envelope(envelope, &self.bot_user_id) {
            Ok(Some(event)) => event,
            Ok(None) => return None,
            Err(error) => {
                tracing::warn!(error = %format!("{error:#}"), "dropping malformed slack event");
                return None;
            }
        };
        if !self
            .seen_events
            .should_notify(&event.event_id, EVENT_REPLAY_WINDOW)
        {
            tracing::debug!(event_id = %event.event_id, "skipping redelivered slack event");
            return None;
        }

        let client = self.client.clone();
        let context = self.context.clone();
        let bot_user_id = self.bot_user_id.clone();
        Some(tokio::spawn(async move {
            if let Err(error) = handle_mention_event(&client, &context, &bot_user_id, event).await
            {
                tracing::warn!(error = %format!("{error:#}"), "failed to handle slack mention");
            }
        }))
    }
}

async fn handle_mention_event(
    client: &SlackApiClient,
    context: &SlackBridgeContext,
    bot_user_id: &str,
    event: SlackMentionEvent,
) -> Result<()> {
    let author = client
        .user_info(&event.user_id)
        .await
        .with_context(|| format!("failed to look up slack user {}", event.user_id))?;
    let command = parse_mention_command(&event.text, bot_user_id);
    tracing::info!(
        event_id = %event.event_id,
        channel = %event.channel_id,
        user = %author.display_name,
        kind = ?event.kind,
        command = ?command,
        "handling slack mention"
    );
    match execute_mention_command(command, context, &author).await {
        CommandReply::Text(text) => {
            client
                .post_message(
                    &event.channel_id,
                    &truncate_chars(&text, SLACK_TEXT_REPLY_MAX_CHARS),
                )
                .await
        }
        CommandReply::Attachment(attachment) => {
            client
                .post_attachments(&event.channel_id, std::slice::from_ref(&attachment))
                .await
        }
    }
}

fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Resolves once shutdown is signalled or the sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn ack_envelope<S>(sink: &mut S, envelope_id: &str) -> Result<()>
where
    S: futures_util::Sink<WsMessage> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let ack = json!({ "envelope_id": envelope_id }).to_string();
    sink.send(WsMessage::Text(ack.into()))
        .await
        .context("failed to send slack socket ack")
}

fn parse_socket_envelope(message: WsMessage) -> Result<Option<SlackSocketEnvelope>> {
    let text = match message {
        WsMessage::Text(text) => text.as_str().to_string(),
        WsMessage::Binary(bytes) => {
            String::from_utf8(bytes.to_vec()).context("invalid utf-8 slack socket payload")?
        }
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Close(_) | WsMessage::Frame(_) => {
            return Ok(None)
        }
    };
    let envelope = serde_json::from_str::<SlackSocketEnvelope>(&text)
        .context("failed to parse slack socket envelope")?;
    Ok(Some(envelope))
}

#[derive(Debug, Deserialize)]
struct SlackEventCallbackEnvelope {
    #[serde(rename = "type")]
    callback_type: String,
    event_id: String,
    event: SlackEventPayload,
}

#[derive(Debug, Deserialize)]
struct SlackEventPayload {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    channel_type: Option<String>,
}

/// Direct messages are commands only when they mention the bot, the same as
/// channel traffic.
fn normalize_socket_envelope(
    envelope: &SlackSocketEnvelope,
    bot_user_id: &str,
) -> Result<Option<SlackMentionEvent>> {
    if envelope.envelope_type != "events_api" {
        return Ok(None);
    }

    let callback = serde_json::from_value::<SlackEventCallbackEnvelope>(envelope.payload.clone())
        .context("failed to decode slack event callback payload")?;
    if callback.callback_type != "event_callback" {
        return Ok(None);
    }

    let event = callback.event;
    if event.subtype.as_deref() == Some("bot_message") || event.bot_id.is_some() {
        return Ok(None);
    }
    let user_id = match event.user {
        Some(user) if !user.trim().is_empty() => user,
        _ => return Ok(None),
    };
    if user_id == bot_user_id {
        return Ok(None);
    }
    let channel_id = match event.channel {
        Some(channel) if !channel.trim().is_empty() => channel,
        _ => return Ok(None),
    };

    let kind = match event.event_type.as_str() {
        "app_mention" => SlackMentionKind::AppMention,
        "message"
            if event.subtype.is_none()
                && (event.channel_type.as_deref() == Some("im") || channel_id.starts_with('D'))
                && event
                    .text
                    .as_deref()
                    .is_some_and(|text| mentions_bot(text, bot_user_id)) =>
        {
            SlackMentionKind::DirectMessage
        }
        _ => return Ok(None),
    };

    Ok(Some(SlackMentionEvent {
        kind,
        event_id: callback.event_id,
        channel_id,
        user_id,
        text: event.text.unwrap_or_default(),
    }))
}
