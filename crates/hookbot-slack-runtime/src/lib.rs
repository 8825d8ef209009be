//! Slack side of hookbot.
//!
//! Hosts the Slack Web API client (directory listing, channel lookup and
//! message posting) and the socket-mode runtime that answers `@hookbot`
//! mentions with the profile command tree.

mod slack_helpers;
mod slack_runtime;

pub use slack_runtime::{
    run_slack_bridge, SlackApiClient, SlackBridgeContext, SlackBridgeRuntimeConfig, SlackChannel,
};
