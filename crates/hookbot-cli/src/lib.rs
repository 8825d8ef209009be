//! Process entry for hookbot: flags, tracing setup and service wiring.

mod bootstrap_helpers;
mod cli_args;
mod service;

pub use bootstrap_helpers::init_tracing;
pub use cli_args::{Cli, DEFAULT_SLACK_API_BASE};
pub use service::{open_profile_store, run_hookbot, wait_for_termination_signal};
