//! Kubernetes client construction.

use std::fmt::Display;
use std::path::Path;

use kube::{Client, Config};
use tracing::info;

use gitops::ApplyError;

/// Token mounted into every pod that runs with a service account.
pub const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// `true` when the process runs inside a Kubernetes pod.
pub fn running_in_cluster() -> bool {
    Path::new(SERVICE_ACCOUNT_TOKEN).exists()
}

/// Builds a client from the pod's service account when `in_cluster` is set,
/// otherwise from `KUBECONFIG` or `~/.kube/config`.
pub async fn connect(in_cluster: bool) -> Result<Client, ApplyError> {
    let config = if in_cluster {
        info!("Using in-cluster Kubernetes configuration");
        Config::incluster().map_err(client_error)?
    } else {
        info!("Using kubeconfig");
        Config::infer().await.map_err(client_error)?
    };
    Client::try_from(config).map_err(client_error)
}

fn client_error(err: impl Display) -> ApplyError {
    ApplyError::Client {
        message: err.to_string(),
    }
}
