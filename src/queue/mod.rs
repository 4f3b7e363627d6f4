//! HTTP client for the grading queue API
//!
//! Every request carries HTTP Basic credentials. Administrative calls
//! (flush, worker seeding) live in [`admin`] and are not reachable from
//! [`QueueClient`].

pub mod admin;
mod wire;

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::QueueSettings;
use crate::error::{QueueError, Result};

pub use admin::{AdminClient, WorkerSeed};

/// Task state reported once grading has finished
pub const TASK_COMPLETED: &str = "completed";

const REQUEST_TIMEOUT_SECS: u64 = 60;

/// A task as reported by the queue. Fields beyond these are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(deserialize_with = "wire::opaque_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "wire::opaque_id_opt")]
    pub image_id: Option<String>,
    #[serde(default)]
    pub callback: Option<String>,
}

impl Task {
    pub fn is_completed(&self) -> bool {
        self.state.as_deref() == Some(TASK_COMPLETED)
    }
}

/// A grading slot; `task_id == None` means idle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    #[serde(deserialize_with = "wire::opaque_id")]
    pub id: String,
    pub name: String,
    #[serde(default, alias = "ssh_uri")]
    pub uri: Option<String>,
    #[serde(default = "wire::enabled_default", deserialize_with = "wire::flag")]
    pub enabled: bool,
    #[serde(default, deserialize_with = "wire::opaque_id_opt")]
    pub task_id: Option<String>,
}

impl Worker {
    pub fn is_idle(&self) -> bool {
        self.task_id.is_none()
    }
}

/// Read side of the queue, as needed by the state tracker
#[async_trait]
pub trait QueueApi: Send + Sync {
    async fn get_task(&self, id: &str) -> Result<Task>;
    async fn get_worker(&self, name: &str) -> Result<Worker>;
}

/// Authenticated HTTP plumbing shared by the client and the admin interface
#[derive(Clone)]
pub(crate) struct Transport {
    base_url: String,
    http: Client,
}

impl Transport {
    pub(crate) fn new(settings: &QueueSettings) -> Result<Self> {
        let credentials = STANDARD.encode(format!("{}:{}", settings.username, settings.password));
        let mut auth = HeaderValue::from_str(&format!("Basic {}", credentials))
            .map_err(|e| QueueError::Config(format!("invalid queue credentials: {}", e)))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    /// GET a JSON resource; 404 becomes `NotFound { kind, id }`
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        kind: &'static str,
        id: &str,
    ) -> Result<T> {
        let url = self.url(path);
        debug!("GET {}", url);
        let response = self.http.get(&url).send().await?;
        match response.status() {
            status if status.is_success() => Ok(response.json::<T>().await?),
            StatusCode::NOT_FOUND => Err(QueueError::NotFound {
                kind,
                id: id.to_string(),
            }),
            _ => Err(unexpected(url, response).await),
        }
    }
}

/// Body-draining error for any non-2xx response
pub(crate) async fn unexpected(url: String, response: Response) -> QueueError {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return QueueError::Unauthorized { url };
    }
    let body = response.text().await.unwrap_or_default();
    QueueError::UnexpectedStatus {
        url,
        status: status.as_u16(),
        body,
    }
}

/// Client for the steady-state protocol: submit, fetch task and worker state
#[derive(Clone)]
pub struct QueueClient {
    transport: Transport,
}

impl QueueClient {
    pub fn new(settings: &QueueSettings) -> Result<Self> {
        Ok(Self {
            transport: Transport::new(settings)?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.transport.base_url
    }

    /// Liveness check of the queue
    pub async fn ping(&self) -> Result<()> {
        let url = self.transport.url("misc/ping");
        let response = self.transport.http().get(&url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(unexpected(url, response).await)
        }
    }

    /// Enqueue a submission container. Never retried.
    ///
    /// `name` is only used for correlation and need not be unique; the
    /// returned task carries the server-assigned id.
    pub async fn submit(
        &self,
        name: &str,
        file: Vec<u8>,
        image_id: &str,
        callback: Option<&str>,
    ) -> Result<Task> {
        let size = file.len();
        let part = Part::bytes(file)
            .file_name("submission.tar")
            .mime_str("application/x-tar")?;
        let mut form = Form::new()
            .text("name", name.to_string())
            .part("file", part)
            .text("image_id", image_id.to_string());
        if let Some(callback) = callback {
            form = form.text("callback", callback.to_string());
        }

        let url = self.transport.url("tasks");
        debug!("PUT {} (name={}, image_id={}, {} bytes)", url, name, image_id, size);
        let response = self.transport.http().put(&url).multipart(form).send().await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(QueueError::Unauthorized { url });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Queue rejected task {}: HTTP {} {}", name, status.as_u16(), body);
            return Err(QueueError::SubmissionRejected {
                status: status.as_u16(),
                body,
            });
        }

        let task: Task = response.json().await?;
        info!("Submitted task: id={}, name={}, image_id={}", task.id, task.name, image_id);
        Ok(task)
    }

    pub async fn get_task(&self, id: &str) -> Result<Task> {
        self.transport
            .get_json(&format!("tasks/{}", id), "task", id)
            .await
    }

    pub async fn get_worker(&self, name: &str) -> Result<Worker> {
        self.transport
            .get_json(&format!("workers/{}", name), "worker", name)
            .await
    }
}

#[async_trait]
impl QueueApi for QueueClient {
    async fn get_task(&self, id: &str) -> Result<Task> {
        QueueClient::get_task(self, id).await
    }

    async fn get_worker(&self, name: &str) -> Result<Worker> {
        QueueClient::get_worker(self, name).await
    }
}
