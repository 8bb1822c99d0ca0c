//! HTTP server lifecycle.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use thiserror::Error;
use tracing::info;

use gitops::SyncEngine;

use crate::routes::{handle_request, ListenerState};

/// Time allowed for a client to send its request headers.
pub const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: hyper::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] hyper::Error),
}

/// Webhook receiver bound to `0.0.0.0:<port>`.
pub struct WebhookServer {
    addr: SocketAddr,
    state: Arc<ListenerState>,
}

impl WebhookServer {
    pub fn new(engine: SyncEngine, secret: impl Into<String>, port: u16) -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            state: Arc::new(ListenerState::new(engine, secret)),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serves until `shutdown` resolves, then stops accepting connections and
    /// waits for in-flight requests to finish.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), ListenerError>
    where
        F: Future<Output = ()>,
    {
        let state = self.state;
        let make_svc = make_service_fn(move |_| {
            let state = state.clone();
            async move {
                Ok::<_, hyper::Error>(service_fn(move |req| handle_request(req, state.clone())))
            }
        });

        let builder = Server::try_bind(&self.addr).map_err(|source| ListenerError::Bind {
            addr: self.addr,
            source,
        })?;
        info!(addr = %self.addr, "Webhook server listening");

        builder
            .http1_header_read_timeout(HEADER_READ_TIMEOUT)
            .serve(make_svc)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Webhook server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    use gitops::{
        AppliedResource, ApplyAction, ApplyError, ChangedFiles, GitProvider, GitRef, ManifestPath,
        Namespace, ProviderError, ProviderKind, PushEvent, RepositoryLocation, ResourceApplier,
        Revision, WebhookRegistration, WebhookRequest,
    };

    /// Treats every delivery as a push of `app.yaml`, which takes a while to
    /// download.
    struct SlowProvider;

    #[async_trait]
    impl GitProvider for SlowProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Git
        }

        fn validate(&self, _: &WebhookRequest, _: &str) -> Result<(), ProviderError> {
            Ok(())
        }

        fn parse_push_event(&self, _: &WebhookRequest) -> Result<PushEvent, ProviderError> {
            Ok(PushEvent {
                location: RepositoryLocation::from_full_name("acme/cluster").unwrap(),
                git_ref: GitRef::new("refs/heads/main").unwrap(),
                revision: Revision::new("abc123").unwrap(),
                changes: ChangedFiles::Paths(vec![ManifestPath::new("app.yaml").unwrap()]),
            })
        }

        async fn download_file(
            &self,
            _: &RepositoryLocation,
            _: &Revision,
            _: &ManifestPath,
        ) -> Result<Vec<u8>, ProviderError> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(b"kind: ConfigMap".to_vec())
        }

        async fn list_files(
            &self,
            _: &RepositoryLocation,
            _: &Revision,
        ) -> Result<Vec<ManifestPath>, ProviderError> {
            Ok(Vec::new())
        }

        async fn setup_webhook(
            &self,
            _: &RepositoryLocation,
            _: &str,
            _: &str,
        ) -> Result<WebhookRegistration, ProviderError> {
            Ok(WebhookRegistration::Unsupported)
        }
    }

    #[derive(Default)]
    struct CountingApplier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ResourceApplier for CountingApplier {
        async fn apply_manifest(
            &self,
            _: &[u8],
            _: &Namespace,
        ) -> Result<Vec<AppliedResource>, ApplyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![AppliedResource {
                kind: "ConfigMap".into(),
                name: "settings".into(),
                namespace: Some("default".into()),
                action: ApplyAction::Updated,
            }])
        }
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    async fn connect(port: u16) -> TcpStream {
        for _ in 0..100 {
            if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await {
                return stream;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("webhook server did not start on port {port}");
    }

    #[tokio::test]
    async fn test_sync_completes_when_client_disconnects() {
        let applier = Arc::new(CountingApplier::default());
        let engine = SyncEngine::new(
            Arc::new(SlowProvider),
            applier.clone(),
            Namespace::new("default").unwrap(),
        );
        let port = free_port();
        let server = WebhookServer::new(engine, "", port);
        assert_eq!(server.addr().port(), port);

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let serving = tokio::spawn(server.serve(async move {
            let _ = stop_rx.await;
        }));

        let mut stream = connect(port).await;
        let body = "{}";
        let request = format!(
            "POST /webhook HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(stream);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(applier.calls.load(Ordering::SeqCst), 1);

        let _ = stop_tx.send(());
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_port_in_use_is_a_bind_error() {
        let taken = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let engine = SyncEngine::new(
            Arc::new(SlowProvider),
            Arc::new(CountingApplier::default()),
            Namespace::new("default").unwrap(),
        );

        let err = WebhookServer::new(engine, "", port)
            .serve(std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, ListenerError::Bind { .. }));
    }
}
