//! Wires the profile store, Slack client, notifier and webhook server into
//! one process and coordinates their shutdown.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use hookbot_core::ProcessClock;
use hookbot_github_webhook::{run_github_webhook_server, GithubWebhookState};
use hookbot_identity::{IdentityResolver, InMemoryProfileStore, ProfileStore, SqliteProfileStore};
use hookbot_notify::{DuplicateSuppressor, PullRequestNotifier};
use hookbot_slack_runtime::{run_slack_bridge, SlackBridgeContext};
use tokio::sync::watch;

use crate::cli_args::Cli;

pub fn open_profile_store(path: Option<&Path>) -> Result<Arc<dyn ProfileStore>> {
    match path {
        Some(path) => {
            let store = SqliteProfileStore::new(path)
                .with_context(|| format!("failed to open profile database {}", path.display()))?;
            tracing::info!(path = %path.display(), "profile database opened");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("no profile database configured; profiles will not survive a restart");
            Ok(Arc::new(InMemoryProfileStore::new()))
        }
    }
}

/// Resolves once SIGINT or SIGTERM arrives.
pub async fn wait_for_termination_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("failed to listen for SIGINT")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    Ok(())
}

pub async fn run_hookbot(cli: Cli) -> Result<()> {
    cli.validate()?;
    let clock = ProcessClock::start();
    let profiles = open_profile_store(cli.profile_db.as_deref())?;

    let slack_config = cli.slack_bridge_config();
    let slack_client = slack_config.api_client()?;
    let channel = slack_client
        .find_channel_by_name(&cli.pr_notification_channel)
        .await
        .context("failed to look up pull-request notification channel")?
        .ok_or_else(|| {
            anyhow!(
                "slack channel '{}' not found; invite the bot or fix --pr-notification-channel",
                cli.pr_notification_channel
            )
        })?;
    tracing::info!(channel = %channel.name, channel_id = %channel.id, "pull-request notification channel resolved");

    let slack = Arc::new(slack_client.clone());
    let resolver = Arc::new(IdentityResolver::new(profiles.clone(), slack.clone()));
    let suppressor = Arc::new(DuplicateSuppressor::new(cli.ledger_retention()));
    let sweeper = suppressor.spawn_sweeper(cli.ledger_sweep_interval());
    let notifier = PullRequestNotifier::new(slack, resolver, suppressor, channel.id)
        .with_duplicate_window(cli.duplicate_window());
    let webhook_state = Arc::new(GithubWebhookState::new(
        cli.github_webhook_secret.clone(),
        Arc::new(notifier),
    ));
    let context = SlackBridgeContext {
        profiles,
        clock,
        time_zone: cli.time_zone,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = async {
        let result =
            run_github_webhook_server(&cli.bind, webhook_state, shutdown_rx.clone()).await;
        let _ = shutdown_tx.send(true);
        result
    };
    let bridge = async {
        let result =
            run_slack_bridge(slack_config, slack_client, context, shutdown_rx.clone()).await;
        let _ = shutdown_tx.send(true);
        result
    };
    let services = async { tokio::join!(server, bridge) };
    tokio::pin!(services);

    let (server_result, bridge_result) = tokio::select! {
        results = &mut services => results,
        signal = wait_for_termination_signal() => {
            if let Err(error) = signal {
                tracing::error!(error = %format!("{error:#}"), "signal handling failed; shutting down");
            } else {
                tracing::info!("shutdown requested");
            }
            let _ = shutdown_tx.send(true);
            services.await
        }
    };

    sweeper.shutdown().await;
    tracing::info!(uptime_secs = clock.uptime().as_secs(), "hookbot stopped");

    if let Err(error) = &bridge_result {
        tracing::error!(error = %format!("{error:#}"), "slack bridge failed");
    }
    server_result.context("github webhook server failed")?;
    bridge_result.context("slack bridge failed")
}
