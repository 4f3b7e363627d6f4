//! Inbound endpoint for pushed result artifacts
//!
//! When a task is submitted with a callback URL, the queue PUTs the result
//! archive to `/callback/{token}` once grading finishes. Each token is
//! registered ahead of submission and resolved at most once; callbacks for
//! unknown or already-resolved tokens are logged and dropped.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::routing::put;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{QueueError, Result};
use crate::verdict::{decode_verdict_file, Verdict};

/// Result archives can be much larger than axum's default body limit
const MAX_CALLBACK_BODY_BYTES: usize = 256 * 1024 * 1024;

/// Token -> (registration id, sender). The id lets a dropped waiter tell
/// its own entry apart from a later registration of the same token.
type PendingMap = Mutex<HashMap<String, (u64, oneshot::Sender<Result<Verdict>>)>>;

/// Registry of tokens awaiting a callback, plus the HTTP routes serving them
#[derive(Clone, Default)]
pub struct CallbackReceiver {
    pending: Arc<PendingMap>,
    next_registration: Arc<AtomicU64>,
}

/// Single-use completion event for one token.
///
/// Dropping the waiter (including after a timeout) unregisters the token.
pub struct CallbackWaiter {
    token: String,
    registration: u64,
    pending: Weak<PendingMap>,
    rx: oneshot::Receiver<Result<Verdict>>,
}

impl CallbackWaiter {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Wait for the callback without a deadline
    pub async fn recv(mut self) -> Result<Verdict> {
        (&mut self.rx).await.unwrap_or_else(|_| {
            Err(QueueError::Io(io::Error::other(format!(
                "callback receiver dropped before token {} was resolved",
                self.token
            ))))
        })
    }

    /// Wait for the callback, failing with `Timeout` after `timeout`
    pub async fn wait(self, timeout: Duration) -> Result<Verdict> {
        let token = self.token.clone();
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(QueueError::Timeout {
                what: format!("callback for {}", token),
                waited: timeout,
                last_observed: None,
            }),
        }
    }
}

impl Drop for CallbackWaiter {
    fn drop(&mut self) {
        let Some(pending) = self.pending.upgrade() else {
            return;
        };
        let mut pending = pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending
            .get(&self.token)
            .is_some_and(|(registration, _)| *registration == self.registration)
        {
            pending.remove(&self.token);
            debug!("Unregistered callback token {}", self.token);
        }
    }
}

impl CallbackReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect one callback for `token`. Re-registering replaces the
    /// previous waiter.
    pub fn register(&self, token: impl Into<String>) -> CallbackWaiter {
        let token = token.into();
        let (tx, rx) = oneshot::channel();
        let registration = self.next_registration.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.insert(token.clone(), (registration, tx)).is_some() {
            warn!("Callback token {} registered twice; previous waiter dropped", token);
        }
        CallbackWaiter {
            token,
            registration,
            pending: Arc::downgrade(&self.pending),
            rx,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn take(&self, token: &str) -> Option<oneshot::Sender<Result<Verdict>>> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(token)
            .map(|(_, sender)| sender)
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/callback", put(receive_uncorrelated))
            .route("/callback/{token}", put(receive_callback))
            .layer(DefaultBodyLimit::max(MAX_CALLBACK_BODY_BYTES))
            .with_state(self.clone())
    }

    /// Serve the callback routes on `addr` in a background task
    pub async fn serve(&self, addr: &str) -> Result<CallbackServer> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let router = self.router();

        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            });
            if let Err(e) = server.await {
                error!("Callback server failed: {}", e);
            }
        });
        info!("Callback receiver listening on {}", local_addr);

        Ok(CallbackServer {
            local_addr,
            shutdown: Some(shutdown_tx),
            handle,
        })
    }
}

/// Handle on a running callback server
pub struct CallbackServer {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl CallbackServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL reaching this server directly, for `token`
    pub fn url_for(&self, token: &str) -> String {
        callback_url(&format!("http://{}", self.local_addr), token)
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            warn!("Callback server task ended abnormally: {}", e);
        }
    }
}

/// `<public_url>/callback/<token>`
pub fn callback_url(public_url: &str, token: &str) -> String {
    format!("{}/callback/{}", public_url.trim_end_matches('/'), token)
}

async fn receive_callback(
    State(receiver): State<CallbackReceiver>,
    Path(token): Path<String>,
    body: Bytes,
) -> StatusCode {
    info!("Received callback: token={}, {} bytes", token, body.len());

    let Some(sender) = receiver.take(&token) else {
        warn!("Discarding callback for unknown or resolved token {}", token);
        return StatusCode::OK;
    };

    let outcome = tokio::task::spawn_blocking(move || persist_and_decode(&body))
        .await
        .unwrap_or_else(|e| Err(QueueError::Io(io::Error::other(e))));

    match &outcome {
        Ok(verdict) => info!("Callback verdict: token={}, verdict={}", token, verdict),
        Err(e) => warn!("Callback for {} carried an unreadable result: {}", token, e),
    }
    if sender.send(outcome).is_err() {
        debug!("Waiter for {} is gone; late callback discarded", token);
    }
    StatusCode::OK
}

async fn receive_uncorrelated(body: Bytes) -> StatusCode {
    warn!("Discarding callback without token ({} bytes)", body.len());
    StatusCode::OK
}

/// Spool the body to a scoped temporary file and decode it
fn persist_and_decode(body: &[u8]) -> Result<Verdict> {
    let temp_dir = tempfile::tempdir()?;
    let archive_path = temp_dir.path().join("callback.tgz");
    std::fs::write(&archive_path, body)?;
    decode_verdict_file(&archive_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tar_gz_files;
    use crate::verdict::CORRECTION_MANIFEST;

    fn result_archive(verdict: &str) -> Vec<u8> {
        let manifest = format!("veredict: {}\n", verdict);
        tar_gz_files([(CORRECTION_MANIFEST, manifest.as_bytes())]).unwrap()
    }

    async fn push(server: &CallbackServer, token: &str, body: Vec<u8>) -> reqwest::StatusCode {
        reqwest::Client::new()
            .put(server.url_for(token))
            .body(body)
            .send()
            .await
            .unwrap()
            .status()
    }

    #[test]
    fn test_callback_url() {
        assert_eq!(
            callback_url("http://localhost:15555/", "test-1"),
            "http://localhost:15555/callback/test-1"
        );
    }

    #[tokio::test]
    async fn test_callback_resolves_waiter() {
        let receiver = CallbackReceiver::new();
        let server = receiver.serve("127.0.0.1:0").await.unwrap();
        let waiter = receiver.register("test-1");

        assert!(push(&server, "test-1", result_archive("AC")).await.is_success());
        let verdict = waiter.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(verdict, "AC");
        assert_eq!(receiver.pending_count(), 0);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_and_duplicate_tokens_are_discarded() {
        let receiver = CallbackReceiver::new();
        let server = receiver.serve("127.0.0.1:0").await.unwrap();

        assert!(push(&server, "nobody", result_archive("WA")).await.is_success());

        let waiter = receiver.register("test-2");
        assert!(push(&server, "test-2", result_archive("WA")).await.is_success());
        assert!(push(&server, "test-2", result_archive("AC")).await.is_success());
        assert_eq!(waiter.wait(Duration::from_secs(5)).await.unwrap(), "WA");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_body_reaches_waiter() {
        let receiver = CallbackReceiver::new();
        let server = receiver.serve("127.0.0.1:0").await.unwrap();
        let waiter = receiver.register("test-3");

        assert!(push(&server, "test-3", b"not an archive".to_vec()).await.is_success());
        let err = waiter.wait(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, QueueError::MalformedResult(_)));

        server.stop().await;
    }

    #[tokio::test]
    async fn test_waiter_times_out() {
        let receiver = CallbackReceiver::new();
        let waiter = receiver.register("never");
        let err = waiter.wait(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, QueueError::Timeout { .. }));
        assert_eq!(receiver.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_waiters_do_not_accumulate() {
        let receiver = CallbackReceiver::new();
        for i in 0..50 {
            let waiter = receiver.register(format!("expired-{}", i));
            assert!(waiter.wait(Duration::from_millis(1)).await.is_err());
        }
        assert_eq!(receiver.pending_count(), 0);
    }

    #[test]
    fn test_dropping_stale_waiter_keeps_newer_registration() {
        let receiver = CallbackReceiver::new();
        let stale = receiver.register("test-4");
        let current = receiver.register("test-4");
        drop(stale);
        assert_eq!(receiver.pending_count(), 1);
        drop(current);
        assert_eq!(receiver.pending_count(), 0);
    }
}
