//! GitHub webhook intake: signature verification, payload decoding and
//! dispatch of pull-request events to the Slack notifier.

mod github_payloads;
mod github_webhook_server;

pub use github_payloads::{
    GithubEvent, GithubIssue, GithubPullRequest, GithubRepository, GithubReview, GithubUser,
    IssuesEvent, PingEvent, PullRequestEvent, PullRequestReviewEvent,
};
pub use github_webhook_server::{
    build_github_webhook_router, run_github_webhook_server, verify_sha256_hmac_signature,
    GithubWebhookState, GITHUB_WEBHOOK_PATH, HEALTH_PATH,
};
