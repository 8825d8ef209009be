//! Pull-request notification dispatch to the Slack notification channel.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use hookbot_core::current_unix_timestamp;
use hookbot_identity::IdentityResolver;

use crate::message::{mention, ReviewRequestedNotice, ReviewSubmittedNotice, SlackAttachment};
use crate::suppressor::DuplicateSuppressor;

/// GitHub emits one `review_requested` delivery per reviewer; they arrive
/// within a couple of seconds of each other.
pub const REVIEW_REQUEST_DUPLICATE_WINDOW: Duration = Duration::from_secs(4);

/// Posts formatted messages to a chat channel.
#[async_trait]
pub trait ChatPoster: Send + Sync {
    async fn post_text(&self, channel: &str, text: &str) -> Result<()>;
    async fn post_attachment(&self, channel: &str, attachment: &SlackAttachment) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Posted,
    SuppressedDuplicate,
    SkippedSelfReview,
}

pub struct PullRequestNotifier {
    poster: Arc<dyn ChatPoster>,
    resolver: Arc<IdentityResolver>,
    suppressor: Arc<DuplicateSuppressor>,
    channel_id: String,
    duplicate_window: Duration,
    footer: String,
}

impl PullRequestNotifier {
    pub fn new(
        poster: Arc<dyn ChatPoster>,
        resolver: Arc<IdentityResolver>,
        suppressor: Arc<DuplicateSuppressor>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            poster,
            resolver,
            suppressor,
            channel_id: channel_id.into(),
            duplicate_window: REVIEW_REQUEST_DUPLICATE_WINDOW,
            footer: format!("Github webhook (v{})", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn with_duplicate_window(mut self, window: Duration) -> Self {
        self.duplicate_window = window;
        self
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub async fn notify_review_requested(
        &self,
        notice: &ReviewRequestedNotice,
    ) -> Result<NotifyOutcome> {
        if !self
            .suppressor
            .should_notify(&notice.url, self.duplicate_window)
        {
            tracing::debug!(url = %notice.url, "suppressed duplicate review request notification");
            return Ok(NotifyOutcome::SuppressedDuplicate);
        }

        let mut mentions = Vec::with_capacity(notice.requested_reviewers.len());
        for reviewer in &notice.requested_reviewers {
            mentions.push(self.mention_by_github_username(reviewer).await);
        }
        let attachment = notice.attachment(&mentions, &self.footer, current_unix_timestamp());
        self.poster
            .post_attachment(&self.channel_id, &attachment)
            .await?;
        Ok(NotifyOutcome::Posted)
    }

    pub async fn notify_review_submitted(
        &self,
        notice: &ReviewSubmittedNotice,
    ) -> Result<NotifyOutcome> {
        if notice.is_self_review() {
            tracing::info!(
                pr_owner = %notice.owner,
                reviewer = %notice.reviewer,
                "ignoring review event for self comment"
            );
            return Ok(NotifyOutcome::SkippedSelfReview);
        }

        let owner_mention = self.mention_by_github_username(&notice.owner).await;
        let attachment = notice.attachment(&owner_mention, &self.footer, current_unix_timestamp());
        self.poster
            .post_attachment(&self.channel_id, &attachment)
            .await?;
        Ok(NotifyOutcome::Posted)
    }

    /// Slack mention for a GitHub login, degrading to the raw login when the
    /// identity cannot be resolved.
    pub async fn mention_by_github_username(&self, github_user_name: &str) -> String {
        match self
            .resolver
            .resolve_by_source_username(github_user_name)
            .await
        {
            Ok(user) => mention(&user.id),
            Err(error) if error.is_user_not_found() => {
                format!("@{github_user_name} (could not resolve slack user by github user name)")
            }
            Err(error) => {
                tracing::warn!(github_user = %github_user_name, error = %error, "identity resolution failed");
                format!("@{github_user_name} ({error})")
            }
        }
    }
}
