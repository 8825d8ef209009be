//! Slack Web API client used by the socket loop, the identity resolver and
//! the pull-request notifier.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use hookbot_identity::{ChatDirectory, ChatUser};
use hookbot_notify::{ChatPoster, SlackAttachment};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::slack_helpers::{truncate_chars, RetryPolicy};

const SLACK_PAGE_LIMIT: &str = "200";

#[derive(Debug, Clone, Deserialize)]
struct SlackAuthTestResponse {
    ok: bool,
    user_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackOpenSocketResponse {
    ok: bool,
    url: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackChatMessageResponse {
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SlackResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SlackMemberProfile {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    image_48: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackMember {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    profile: SlackMemberProfile,
}

impl SlackMember {
    fn into_chat_user(self) -> ChatUser {
        let display_name = self
            .profile
            .display_name
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(self.name);
        ChatUser {
            id: self.id,
            email: self.profile.email.unwrap_or_default(),
            display_name,
            real_name: self.profile.real_name.unwrap_or_default(),
            image_48: self.profile.image_48,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SlackUsersListResponse {
    ok: bool,
    #[serde(default)]
    members: Vec<SlackMember>,
    #[serde(default)]
    response_metadata: SlackResponseMetadata,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackUserInfoResponse {
    ok: bool,
    user: Option<SlackMember>,
    error: Option<String>,
}

/// A Slack conversation as listed by `conversations.list`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SlackChannel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub name_normalized: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackConversationsListResponse {
    ok: bool,
    #[serde(default)]
    channels: Vec<SlackChannel>,
    #[serde(default)]
    response_metadata: SlackResponseMetadata,
    error: Option<String>,
}

fn slack_failure(operation: &str, error: Option<String>) -> anyhow::Error {
    anyhow!(
        "slack {operation} failed: {}",
        error.unwrap_or_else(|| "unknown error".to_string())
    )
}

fn next_cursor(metadata: SlackResponseMetadata) -> Option<String> {
    metadata
        .next_cursor
        .filter(|cursor| !cursor.trim().is_empty())
}

#[derive(Clone)]
pub struct SlackApiClient {
    http: reqwest::Client,
    api_base: String,
    app_token: String,
    bot_token: String,
    retry: RetryPolicy,
}

impl SlackApiClient {
    pub fn new(
        api_base: String,
        app_token: String,
        bot_token: String,
        request_timeout_ms: u64,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("hookbot"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create slack api client")?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            app_token: app_token.trim().to_string(),
            bot_token: bot_token.trim().to_string(),
            retry: RetryPolicy::new(retry_max_attempts, retry_base_delay_ms),
        })
    }

    pub async fn resolve_bot_user_id(&self) -> Result<String> {
        let response: SlackAuthTestResponse = self
            .request_json("auth.test", || {
                self.http
                    .post(format!("{}/auth.test", self.api_base))
                    .bearer_auth(&self.bot_token)
            })
            .await
            .context("authorization to slack failed. check your slack token")?;

        if !response.ok {
            return Err(slack_failure("auth.test", response.error));
        }

        response
            .user_id
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("slack auth.test did not return user_id"))
    }

    pub async fn open_socket_connection(&self) -> Result<String> {
        let response: SlackOpenSocketResponse = self
            .request_json("apps.connections.open", || {
                self.http
                    .post(format!("{}/apps.connections.open", self.api_base))
                    .bearer_auth(&self.app_token)
            })
            .await?;
        if !response.ok {
            return Err(slack_failure("apps.connections.open", response.error));
        }
        response
            .url
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("slack apps.connections.open did not return url"))
    }

    pub async fn post_message(&self, channel: &str, text: &str) -> Result<()> {
        self.chat_post_message(json!({
            "channel": channel,
            "text": text,
            "mrkdwn": true,
            "unfurl_links": false,
            "unfurl_media": false,
        }))
        .await
    }

    pub async fn post_attachments(
        &self,
        channel: &str,
        attachments: &[SlackAttachment],
    ) -> Result<()> {
        let fallback = attachments
            .first()
            .map(|attachment| attachment.fallback.clone())
            .unwrap_or_default();
        self.chat_post_message(json!({
            "channel": channel,
            "text": fallback,
            "attachments": attachments,
            "unfurl_links": false,
            "unfurl_media": false,
        }))
        .await
    }

    async fn chat_post_message(&self, payload: Value) -> Result<()> {
        let response: SlackChatMessageResponse = self
            .request_json("chat.postMessage", || {
                self.http
                    .post(format!("{}/chat.postMessage", self.api_base))
                    .bearer_auth(&self.bot_token)
                    .json(&payload)
            })
            .await?;
        if !response.ok {
            return Err(slack_failure("chat.postMessage", response.error));
        }
        Ok(())
    }

    /// Fetches every active workspace member, following pagination cursors.
    pub async fn list_users(&self) -> Result<Vec<ChatUser>> {
        let mut users = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let response: SlackUsersListResponse = self
                .request_json("users.list", || {
                    let mut query = vec![("limit", SLACK_PAGE_LIMIT.to_string())];
                    if let Some(cursor) = &cursor {
                        query.push(("cursor", cursor.clone()));
                    }
                    self.http
                        .get(format!("{}/users.list", self.api_base))
                        .bearer_auth(&self.bot_token)
                        .query(&query)
                })
                .await?;
            if !response.ok {
                return Err(slack_failure("users.list", response.error));
            }
            users.extend(
                response
                    .members
                    .into_iter()
                    .filter(|member| !member.deleted)
                    .map(SlackMember::into_chat_user),
            );
            cursor = next_cursor(response.response_metadata);
            if cursor.is_none() {
                return Ok(users);
            }
        }
    }

    pub async fn user_info(&self, user_id: &str) -> Result<ChatUser> {
        let response: SlackUserInfoResponse = self
            .request_json("users.info", || {
                self.http
                    .get(format!("{}/users.info", self.api_base))
                    .bearer_auth(&self.bot_token)
                    .query(&[("user", user_id)])
            })
            .await?;
        if !response.ok {
            return Err(slack_failure("users.info", response.error));
        }
        response
            .user
            .map(SlackMember::into_chat_user)
            .ok_or_else(|| anyhow!("slack users.info did not return user"))
    }

    /// Looks up a non-archived channel by name across all result pages.
    pub async fn find_channel_by_name(&self, name: &str) -> Result<Option<SlackChannel>> {
        let wanted = name.trim().trim_start_matches('#');
        let mut cursor: Option<String> = None;
        loop {
            let response: SlackConversationsListResponse = self
                .request_json("conversations.list", || {
                    let mut query = vec![
                        ("limit", SLACK_PAGE_LIMIT.to_string()),
                        ("exclude_archived", "true".to_string()),
                        ("types", "public_channel,private_channel".to_string()),
                    ];
                    if let Some(cursor) = &cursor {
                        query.push(("cursor", cursor.clone()));
                    }
                    self.http
                        .get(format!("{}/conversations.list", self.api_base))
                        .bearer_auth(&self.bot_token)
                        .query(&query)
                })
                .await?;
            if !response.ok {
                return Err(slack_failure("conversations.list", response.error));
            }
            if let Some(channel) = response
                .channels
                .into_iter()
                .find(|channel| channel.name == wanted)
            {
                return Ok(Some(channel));
            }
            cursor = next_cursor(response.response_metadata);
            if cursor.is_none() {
                return Ok(None);
            }
        }
    }

    async fn request_json<T, F>(&self, operation: &str, mut builder: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = builder()
                .header("x-hookbot-retry-attempt", attempt.saturating_sub(1).to_string())
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed = response
                            .json::<T>()
                            .await
                            .with_context(|| format!("failed to decode slack {operation}"))?;
                        return Ok(parsed);
                    }

                    let delay = self.retry.delay_after(attempt, Some(response.headers()));
                    let body = response.text().await.unwrap_or_default();
                    if self.retry.allows_retry_after(attempt) && RetryPolicy::retries_status(status)
                    {
                        tracing::debug!(operation, attempt, status = status.as_u16(), "retrying slack api call");
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    bail!(
                        "slack api {operation} failed with status {}: {}",
                        status.as_u16(),
                        truncate_chars(&body, 800)
                    );
                }
                Err(error) => {
                    if self.retry.allows_retry_after(attempt)
                        && RetryPolicy::retries_transport_error(&error)
                    {
                        tokio::time::sleep(self.retry.delay_after(attempt, None)).await;
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("slack api {operation} request failed"));
                }
            }
        }
    }
}

#[async_trait]
impl ChatDirectory for SlackApiClient {
    async fn list_users(&self) -> Result<Vec<ChatUser>> {
        SlackApiClient::list_users(self).await
    }
}

#[async_trait]
impl ChatPoster for SlackApiClient {
    async fn post_text(&self, channel: &str, text: &str) -> Result<()> {
        self.post_message(channel, text).await
    }

    async fn post_attachment(&self, channel: &str, attachment: &SlackAttachment) -> Result<()> {
        self.post_attachments(channel, std::slice::from_ref(attachment))
            .await
    }
}
