use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use hookbot_core::DisplayTimeZone;
use hookbot_slack_runtime::SlackBridgeRuntimeConfig;
use tracing::level_filters::LevelFilter;

pub const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_time_zone(value: &str) -> Result<DisplayTimeZone, String> {
    value.parse().map_err(|error| format!("{error}"))
}

fn parse_log_level(value: &str) -> Result<LevelFilter, String> {
    value
        .trim()
        .parse::<LevelFilter>()
        .map_err(|_| format!("unknown log level '{}'", value.trim()))
}

fn parse_non_blank(value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("value must not be empty".to_string());
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Parser)]
#[command(
    name = "hookbot",
    about = "Relays GitHub pull-request review activity to Slack and maps GitHub users to Slack users",
    version
)]
pub struct Cli {
    #[arg(
        long = "slack-bot-token",
        env = "HOOKBOT_SLACK_BOT_TOKEN",
        value_parser = parse_non_blank,
        hide_env_values = true,
        help = "Slack bot token (xoxb-...) used for Web API calls"
    )]
    pub slack_bot_token: String,

    #[arg(
        long = "slack-app-token",
        env = "HOOKBOT_SLACK_APP_TOKEN",
        value_parser = parse_non_blank,
        hide_env_values = true,
        help = "Slack app-level token (xapp-...) used to open socket-mode connections"
    )]
    pub slack_app_token: String,

    #[arg(
        long = "slack-api-base",
        env = "HOOKBOT_SLACK_API_BASE",
        default_value = DEFAULT_SLACK_API_BASE,
        help = "Slack Web API base URL"
    )]
    pub slack_api_base: String,

    #[arg(
        long = "slack-bot-user-id",
        env = "HOOKBOT_SLACK_BOT_USER_ID",
        help = "Bot user id; resolved with auth.test when omitted"
    )]
    pub slack_bot_user_id: Option<String>,

    #[arg(
        long = "github-webhook-secret",
        env = "HOOKBOT_GITHUB_WEBHOOK_SECRET",
        value_parser = parse_non_blank,
        hide_env_values = true,
        help = "Shared secret used to verify x-hub-signature-256 on webhook deliveries"
    )]
    pub github_webhook_secret: String,

    #[arg(
        long = "pr-notification-channel",
        env = "HOOKBOT_PR_NOTIFICATION_CHANNEL",
        value_parser = parse_non_blank,
        help = "Slack channel name receiving pull-request notifications"
    )]
    pub pr_notification_channel: String,

    #[arg(
        long = "bind",
        env = "HOOKBOT_BIND",
        default_value = "0.0.0.0:8080",
        help = "Address the GitHub webhook server listens on"
    )]
    pub bind: String,

    #[arg(
        long = "profile-db",
        env = "HOOKBOT_PROFILE_DB",
        help = "SQLite database holding user profiles; profiles are kept in memory when omitted"
    )]
    pub profile_db: Option<PathBuf>,

    #[arg(
        long = "time-zone",
        env = "HOOKBOT_TIME_ZONE",
        default_value = "Asia/Tokyo",
        value_parser = parse_time_zone,
        help = "IANA time zone used when rendering profile timestamps"
    )]
    pub time_zone: DisplayTimeZone,

    #[arg(
        long = "log-level",
        env = "HOOKBOT_LOG_LEVEL",
        default_value = "info",
        value_parser = parse_log_level,
        help = "Default log level; RUST_LOG directives take precedence"
    )]
    pub log_level: LevelFilter,

    #[arg(
        long = "request-timeout-ms",
        env = "HOOKBOT_REQUEST_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "Timeout for Slack Web API requests"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "retry-max-attempts",
        env = "HOOKBOT_RETRY_MAX_ATTEMPTS",
        default_value_t = 3,
        value_parser = parse_positive_usize,
        help = "Attempts per Slack Web API call, including the first"
    )]
    pub retry_max_attempts: usize,

    #[arg(
        long = "retry-base-delay-ms",
        env = "HOOKBOT_RETRY_BASE_DELAY_MS",
        default_value_t = 500,
        help = "Base delay for exponential backoff between Slack retries"
    )]
    pub retry_base_delay_ms: u64,

    #[arg(
        long = "duplicate-window-ms",
        env = "HOOKBOT_DUPLICATE_WINDOW_MS",
        default_value_t = 4_000,
        value_parser = parse_positive_u64,
        help = "Window in which repeated review-request deliveries for one pull request are dropped"
    )]
    pub duplicate_window_ms: u64,

    #[arg(
        long = "ledger-retention-secs",
        env = "HOOKBOT_LEDGER_RETENTION_SECS",
        default_value_t = 3 * 60 * 60,
        value_parser = parse_positive_u64,
        help = "Age after which duplicate-ledger entries are evicted"
    )]
    pub ledger_retention_secs: u64,

    #[arg(
        long = "ledger-sweep-interval-secs",
        env = "HOOKBOT_LEDGER_SWEEP_INTERVAL_SECS",
        default_value_t = 3 * 60 * 60,
        value_parser = parse_positive_u64,
        help = "Period of the background duplicate-ledger sweep"
    )]
    pub ledger_sweep_interval_secs: u64,

    #[arg(
        long = "reconnect-delay-ms",
        env = "HOOKBOT_RECONNECT_DELAY_MS",
        default_value_t = 3_000,
        value_parser = parse_positive_u64,
        help = "Delay before reopening a dropped Slack socket-mode connection"
    )]
    pub reconnect_delay_ms: u64,
}

impl Cli {
    pub fn slack_bridge_config(&self) -> SlackBridgeRuntimeConfig {
        SlackBridgeRuntimeConfig {
            api_base: self.slack_api_base.trim_end_matches('/').to_string(),
            app_token: self.slack_app_token.clone(),
            bot_token: self.slack_bot_token.clone(),
            bot_user_id: self.slack_bot_user_id.clone(),
            request_timeout_ms: self.request_timeout_ms,
            retry_max_attempts: self.retry_max_attempts,
            retry_base_delay_ms: self.retry_base_delay_ms,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }

    pub fn duplicate_window(&self) -> Duration {
        Duration::from_millis(self.duplicate_window_ms)
    }

    pub fn ledger_retention(&self) -> Duration {
        Duration::from_secs(self.ledger_retention_secs)
    }

    pub fn ledger_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.ledger_sweep_interval_secs)
    }

    /// Cross-flag checks clap cannot express per argument.
    pub fn validate(&self) -> Result<()> {
        if self.ledger_retention() <= self.duplicate_window() {
            bail!(
                "--ledger-retention-secs ({}s) must be longer than --duplicate-window-ms ({}ms)",
                self.ledger_retention_secs,
                self.duplicate_window_ms
            );
        }
        Ok(())
    }
}
