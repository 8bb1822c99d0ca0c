//! Best-effort webhook registration at startup.

use std::time::Duration;

use tracing::{info, warn};

use gitops::{GitProvider, WebhookRegistration};

use crate::config::Config;

pub const SETUP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    /// `PUBLIC_URL` is not configured.
    Disabled,
    /// No repository could be determined to register the hook on.
    NoRepository,
    Registered(WebhookRegistration),
    Failed(String),
    TimedOut,
}

/// Registers `<PUBLIC_URL>/webhook` on the configured repository. Failures are
/// logged and never stop startup.
pub async fn ensure_webhook(
    provider: &dyn GitProvider,
    config: &Config,
    timeout: Duration,
) -> SetupOutcome {
    let Some(url) = config.webhook_url() else {
        return SetupOutcome::Disabled;
    };
    let Some(location) = config.webhook_repository() else {
        warn!("PUBLIC_URL is set but the repository is unknown (set GIT_OWNER and GIT_REPO or GIT_REPO_URL); skipping webhook setup");
        return SetupOutcome::NoRepository;
    };

    info!(repository = %location, url = %url, "Setting up webhook");
    let registration = provider.setup_webhook(&location, &url, &config.webhook_secret);
    match tokio::time::timeout(timeout, registration).await {
        Ok(Ok(registration)) => {
            match registration {
                WebhookRegistration::Created => info!(repository = %location, "Webhook created"),
                WebhookRegistration::AlreadyPresent => {
                    info!(repository = %location, "Webhook already exists")
                }
                WebhookRegistration::Unsupported => info!(
                    provider = %provider.kind(),
                    "Provider does not support automatic webhook setup; configure it manually"
                ),
            }
            SetupOutcome::Registered(registration)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Failed to set up webhook");
            SetupOutcome::Failed(e.to_string())
        }
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "Webhook setup timed out");
            SetupOutcome::TimedOut
        }
    }
}
