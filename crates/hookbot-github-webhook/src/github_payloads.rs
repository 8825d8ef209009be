//! The subset of GitHub webhook payloads hookbot reacts to.

use anyhow::{Context, Result};
use hookbot_notify::{ReviewRequestedNotice, ReviewSubmittedNotice};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GithubUser {
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub avatar_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GithubRepository {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub full_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GithubPullRequest {
    #[serde(default)]
    pub number: u64,
    /// Browser URL; `url` in the payload points at the REST resource.
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub user: GithubUser,
    #[serde(default)]
    pub requested_reviewers: Vec<GithubUser>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GithubReview {
    #[serde(default)]
    pub user: GithubUser,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub html_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GithubIssue {
    #[serde(default)]
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub html_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: GithubPullRequest,
    #[serde(default)]
    pub repository: GithubRepository,
}

impl PullRequestEvent {
    /// One requested reviewer per delivery is typical; all listed are mentioned.
    pub fn review_requested_notice(&self) -> ReviewRequestedNotice {
        let pr = &self.pull_request;
        ReviewRequestedNotice {
            owner: pr.user.login.clone(),
            owner_avatar_url: pr.user.avatar_url.clone(),
            url: pr.html_url.clone(),
            title: pr.title.clone(),
            body: pr.body.clone().unwrap_or_default(),
            repo_name: self.repository.name.clone(),
            requested_reviewers: pr
                .requested_reviewers
                .iter()
                .map(|reviewer| reviewer.login.clone())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestReviewEvent {
    pub action: String,
    pub review: GithubReview,
    pub pull_request: GithubPullRequest,
    #[serde(default)]
    pub repository: GithubRepository,
}

impl PullRequestReviewEvent {
    pub fn review_submitted_notice(&self) -> ReviewSubmittedNotice {
        ReviewSubmittedNotice {
            owner: self.pull_request.user.login.clone(),
            title: self.pull_request.title.clone(),
            repo_name: self.repository.name.clone(),
            reviewer: self.review.user.login.clone(),
            reviewer_avatar_url: self.review.user.avatar_url.clone(),
            review_body: self.review.body.clone().unwrap_or_default(),
            review_state: self.review.state.clone(),
            review_url: self.review.html_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssuesEvent {
    pub action: String,
    #[serde(default)]
    pub issue: GithubIssue,
    #[serde(default)]
    pub repository: GithubRepository,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingEvent {
    #[serde(default)]
    pub zen: String,
    #[serde(default)]
    pub hook_id: u64,
}

/// A decoded delivery, selected by the `x-github-event` header.
#[derive(Debug, Clone)]
pub enum GithubEvent {
    Ping(PingEvent),
    Issues(IssuesEvent),
    PullRequest(Box<PullRequestEvent>),
    PullRequestReview(Box<PullRequestReviewEvent>),
    Unsupported(String),
}

impl GithubEvent {
    pub fn parse(event_name: &str, body: &str) -> Result<Self> {
        let event = match event_name {
            "ping" => Self::Ping(decode(event_name, body)?),
            "issues" => Self::Issues(decode(event_name, body)?),
            "pull_request" => Self::PullRequest(Box::new(decode(event_name, body)?)),
            "pull_request_review" => Self::PullRequestReview(Box::new(decode(event_name, body)?)),
            other => Self::Unsupported(other.to_string()),
        };
        Ok(event)
    }
}

fn decode<T: serde::de::DeserializeOwned>(event_name: &str, body: &str) -> Result<T> {
    serde_json::from_str(body).with_context(|| format!("invalid github {event_name} payload"))
}
