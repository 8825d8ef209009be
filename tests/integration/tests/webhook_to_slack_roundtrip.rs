use std::{net::SocketAddr, sync::Arc, time::Duration};

use hmac::{Hmac, Mac};
use hookbot_github_webhook::{build_github_webhook_router, GithubWebhookState};
use hookbot_identity::{IdentityResolver, InMemoryProfileStore, Profile};
use hookbot_notify::{DuplicateSuppressor, PullRequestNotifier};
use hookbot_slack_runtime::{SlackApiClient, SlackBridgeRuntimeConfig};
use httpmock::prelude::*;
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::net::TcpListener;

const SECRET: &str = "integration-secret";

struct Harness {
    addr: SocketAddr,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn slack_client(base_url: &str) -> SlackApiClient {
    SlackBridgeRuntimeConfig {
        api_base: base_url.to_string(),
        app_token: "xapp-test".to_string(),
        bot_token: "xoxb-test".to_string(),
        bot_user_id: Some("UBOT".to_string()),
        request_timeout_ms: 2_000,
        retry_max_attempts: 2,
        retry_base_delay_ms: 1,
        reconnect_delay: Duration::from_millis(10),
    }
    .api_client()
    .expect("slack client")
}

async fn start_hookbot(slack_base_url: &str, profiles: Vec<Profile>) -> Harness {
    let slack = Arc::new(slack_client(slack_base_url));
    let channel = slack
        .find_channel_by_name("#pull-requests")
        .await
        .expect("channel lookup")
        .expect("channel exists");
    let store = Arc::new(InMemoryProfileStore::with_profiles(profiles));
    let resolver = Arc::new(IdentityResolver::new(store, slack.clone()));
    let notifier = PullRequestNotifier::new(
        slack,
        resolver,
        Arc::new(DuplicateSuppressor::default()),
        channel.id,
    );
    let state = Arc::new(GithubWebhookState::new(SECRET, Arc::new(notifier)));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = build_github_webhook_router(state);
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    tokio::time::sleep(Duration::from_millis(25)).await;
    Harness { addr, server }
}

fn sign(body: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).expect("hmac");
    mac.update(body.as_bytes());
    let digest = mac.finalize().into_bytes();
    format!(
        "sha256={}",
        digest
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>()
    )
}

async fn deliver(addr: SocketAddr, event: &str, body: &Value) -> Value {
    let body = body.to_string();
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/webhooks/github"))
        .header("x-github-event", event)
        .header("x-hub-signature-256", sign(&body))
        .body(body)
        .send()
        .await
        .expect("deliver webhook");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    response.json::<Value>().await.expect("json response")
}

fn mock_channel_lookup(server: &MockServer) -> httpmock::Mock<'_> {
    server.mock(|when, then| {
        when.method(GET).path("/conversations.list");
        then.status(200).json_body(json!({
            "ok": true,
            "channels": [
                {"id": "CGENERAL", "name": "general"},
                {"id": "CPR", "name": "pull-requests"}
            ],
            "response_metadata": {"next_cursor": ""}
        }));
    })
}

fn review_requested(url: &str, reviewer: &str) -> Value {
    json!({
        "action": "review_requested",
        "pull_request": {
            "html_url": url,
            "title": "Add widgets",
            "body": "adds the widget factory",
            "user": {"login": "octo", "avatar_url": "https://avatars.example/octo"},
            "requested_reviewers": [{"login": reviewer}]
        },
        "repository": {"name": "widgets", "full_name": "acme/widgets"}
    })
}

#[tokio::test]
async fn integration_review_request_fan_out_reaches_slack_once_with_resolved_mention() {
    let slack = MockServer::start();
    mock_channel_lookup(&slack);
    let users = slack.mock(|when, then| {
        when.method(GET).path("/users.list");
        then.status(200).json_body(json!({
            "ok": true,
            "members": [
                {"id": "UHUBOT", "name": "hubot", "profile": {"email": "hubot@example.com"}},
                {"id": "UOCTO", "name": "octo", "profile": {"email": "octo@example.com"}}
            ],
            "response_metadata": {"next_cursor": ""}
        }));
    });
    let post = slack.mock(|when, then| {
        when.method(POST)
            .path("/chat.postMessage")
            .header("authorization", "Bearer xoxb-test")
            .body_includes("\"channel\":\"CPR\"")
            .body_includes("<@UHUBOT> your review is requested")
            .body_includes("https://github.com/acme/widgets/pull/9");
        then.status(200)
            .json_body(json!({"ok": true, "channel": "CPR", "ts": "1.0"}));
    });

    let hookbot = start_hookbot(
        &slack.base_url(),
        vec![
            Profile::new("hubot", "hubot@example.com"),
            Profile::new("monalisa", "monalisa@example.com"),
        ],
    )
    .await;

    let url = "https://github.com/acme/widgets/pull/9";
    let first = deliver(hookbot.addr, "pull_request", &review_requested(url, "hubot")).await;
    let second = deliver(hookbot.addr, "pull_request", &review_requested(url, "monalisa")).await;

    assert_eq!(first["status"], json!("posted"));
    assert_eq!(second["status"], json!("duplicate"));
    assert_eq!(post.calls(), 1);
    assert_eq!(users.calls(), 1);
}

#[tokio::test]
async fn integration_review_submitted_mentions_pr_owner_and_skips_self_reviews() {
    let slack = MockServer::start();
    mock_channel_lookup(&slack);
    slack.mock(|when, then| {
        when.method(GET).path("/users.list");
        then.status(200).json_body(json!({
            "ok": true,
            "members": [
                {"id": "UOCTO", "name": "octo", "profile": {"email": "octo@example.com"}}
            ],
            "response_metadata": {"next_cursor": ""}
        }));
    });
    let post = slack.mock(|when, then| {
        when.method(POST)
            .path("/chat.postMessage")
            .body_includes(":ok_hand: <@UOCTO> your PR *approved*");
        then.status(200)
            .json_body(json!({"ok": true, "channel": "CPR", "ts": "2.0"}));
    });

    let hookbot = start_hookbot(
        &slack.base_url(),
        vec![Profile::new("octo", "octo@example.com")],
    )
    .await;

    let review = |reviewer: &str| {
        json!({
            "action": "submitted",
            "review": {
                "user": {"login": reviewer},
                "body": "ship it",
                "state": "approved",
                "html_url": "https://github.com/acme/widgets/pull/9#pullrequestreview-1"
            },
            "pull_request": {"title": "Add widgets", "user": {"login": "octo"}},
            "repository": {"name": "widgets"}
        })
    };

    let posted = deliver(hookbot.addr, "pull_request_review", &review("hubot")).await;
    let skipped = deliver(hookbot.addr, "pull_request_review", &review("octo")).await;

    assert_eq!(posted["status"], json!("posted"));
    assert_eq!(skipped["status"], json!("self_review"));
    assert_eq!(post.calls(), 1);
}

#[tokio::test]
async fn integration_unknown_reviewer_is_rendered_without_slack_mention() {
    let slack = MockServer::start();
    mock_channel_lookup(&slack);
    let post = slack.mock(|when, then| {
        when.method(POST)
            .path("/chat.postMessage")
            .body_includes("@ghost (could not resolve slack user by github user name)");
        then.status(200)
            .json_body(json!({"ok": true, "channel": "CPR", "ts": "3.0"}));
    });

    let hookbot = start_hookbot(&slack.base_url(), Vec::new()).await;
    let response = deliver(
        hookbot.addr,
        "pull_request",
        &review_requested("https://github.com/acme/widgets/pull/10", "ghost"),
    )
    .await;

    assert_eq!(response["status"], json!("posted"));
    assert_eq!(post.calls(), 1);
}
