//! Remote GPU inference over HTTP.
//!
//! `POST {server_url}{infer_path}` with a multipart JPEG upload and the
//! detector parameters as form fields; `GET {server_url}{health_path}` for
//! availability. One pooled `reqwest::Client` is reused for every call.
//!
//! The client enforces connect and read timeouts itself. The write phase is
//! enforced here: the JPEG is streamed in chunks and a chunk the connection
//! does not accept within `write_ms` aborts the request.

use std::future::Future;
use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::Body;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backend::{HealthProbe, HealthStatus, InferenceBackend, RawDetection, finalize_detections};
use crate::compress::{self, PreparedFrame};
use crate::error::{InferenceError, RemoteFailure};
use visifruit::clock::duration_ms;
use visifruit::detection::{BackendKind, DetectionResult, ServerTiming};
use visifruit::inference::InferenceConfig;

/// Idle connections kept per host.
const POOL_MAX_IDLE_PER_HOST: usize = 5;

/// Idle connection lifetime.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Bytes handed to the connection per upload chunk.
const UPLOAD_CHUNK_BYTES: usize = 16 * 1024;

type UploadChunk = Result<Bytes, std::io::Error>;

/// Stream `payload` as a request body, one chunk at a time.
///
/// The returned future completes only if a single chunk waits longer than
/// `write_timeout` to be taken by the connection. The first chunk after the
/// head may also wait for the connection itself, so it gets `connect_grace`
/// on top. Once the whole payload is handed over, or the body is dropped, the
/// future never completes.
fn chunked_upload(
    payload: Bytes,
    connect_grace: Duration,
    write_timeout: Duration,
) -> (Body, impl Future<Output = ()>) {
    let (tx, rx) = mpsc::channel::<UploadChunk>(1);
    let body = Body::wrap_stream(futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    }));

    let stalled = async move {
        let mut offset = 0;
        while offset < payload.len() {
            let end = (offset + UPLOAD_CHUNK_BYTES).min(payload.len());
            let limit = if offset <= UPLOAD_CHUNK_BYTES {
                connect_grace + write_timeout
            } else {
                write_timeout
            };
            match tokio::time::timeout(limit, tx.send(Ok(payload.slice(offset..end)))).await {
                Ok(Ok(())) => offset = end,
                // Body dropped: the request already finished or failed.
                Ok(Err(_)) => break,
                Err(_) => return,
            }
        }
        drop(tx);
        std::future::pending::<()>().await
    };
    (body, stalled)
}

/// `/infer` response body.
#[derive(Debug, Deserialize)]
struct InferResponse {
    #[serde(default)]
    detections: Vec<RawDetection>,
    #[serde(flatten)]
    timing: ServerTiming,
    #[serde(default)]
    device: Option<String>,
}

/// HTTP client for the remote inference service.
#[derive(Debug, Clone)]
pub struct RemoteBackend {
    client: reqwest::Client,
    config: InferenceConfig,
    infer_url: String,
    health_url: String,
    class_names_json: String,
}

impl RemoteBackend {
    /// Build the pooled client.
    pub fn new(config: InferenceConfig) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeouts.connect())
            .read_timeout(config.timeouts.read())
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| InferenceError::RemoteUnavailable(RemoteFailure::Transport(e.to_string())))?;
        let class_names_json = serde_json::to_string(&config.class_names)
            .map_err(|e| InferenceError::Compression(e.to_string()))?;

        Ok(Self {
            infer_url: config.endpoint(&config.infer_path),
            health_url: config.endpoint(&config.health_path),
            client,
            config,
            class_names_json,
        })
    }

    pub fn infer_url(&self) -> &str {
        &self.infer_url
    }

    fn form(&self, image: Body, length: u64) -> Result<Form, InferenceError> {
        let part = Part::stream_with_length(image, length)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| InferenceError::Compression(e.to_string()))?;
        Ok(Form::new()
            .part("image", part)
            .text("imgsz", self.config.input_size.to_string())
            .text("conf", self.config.confidence_threshold.to_string())
            .text("iou", self.config.iou_threshold.to_string())
            .text("max_det", self.config.max_detections.to_string())
            .text("class_names_json", self.class_names_json.clone()))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// POST the upload and wait for the response head.
    ///
    /// Fails with a remote timeout of `write_ms` if the server stops
    /// accepting the body.
    async fn post_upload(&self, jpeg: Bytes) -> Result<reqwest::Response, InferenceError> {
        let budget = self.config.timeouts.request_budget();
        let write_timeout = self.config.timeouts.write();
        let length = jpeg.len() as u64;
        let (body, stalled) = chunked_upload(jpeg, self.config.timeouts.connect(), write_timeout);
        let form = self.form(body, length)?;

        let request = self
            .authorize(self.client.post(&self.infer_url))
            .multipart(form)
            .timeout(budget)
            .send();

        tokio::select! {
            sent = request => sent.map_err(|e| self.classify(e, budget)),
            () = stalled => {
                warn!(
                    "Remote upload stalled: {} bytes not accepted within {} ms",
                    length,
                    write_timeout.as_millis()
                );
                Err(InferenceError::Timeout {
                    backend: BackendKind::Remote,
                    after_ms: write_timeout.as_millis() as u64,
                })
            }
        }
    }

    fn classify(&self, e: reqwest::Error, budget: Duration) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout {
                backend: BackendKind::Remote,
                after_ms: budget.as_millis() as u64,
            }
        } else if e.is_connect() {
            InferenceError::RemoteUnavailable(RemoteFailure::Connect(e.to_string()))
        } else if e.is_decode() {
            InferenceError::RemoteUnavailable(RemoteFailure::Decode(e.to_string()))
        } else if let Some(status) = e.status() {
            InferenceError::RemoteUnavailable(RemoteFailure::Status(status.as_u16()))
        } else {
            InferenceError::RemoteUnavailable(RemoteFailure::Transport(e.to_string()))
        }
    }
}

impl InferenceBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn infer(&self, frame: &PreparedFrame) -> Result<DetectionResult, InferenceError> {
        let upload = compress::compress(frame, &self.config.compression)?;
        let (scale_x, scale_y) = (upload.scale_x, upload.scale_y);
        let budget = self.config.timeouts.request_budget();
        let started = Instant::now();

        let response = self.post_upload(Bytes::from(upload.jpeg)).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::RemoteUnavailable(RemoteFailure::Status(
                status.as_u16(),
            )));
        }
        let body: InferResponse = response.json().await.map_err(|e| self.classify(e, budget))?;
        let latency_ms = duration_ms(started.elapsed());
        debug!(
            "Remote inference frame {}: {} raw detections, {:.1} ms (server {:.1} ms)",
            frame.sequence,
            body.detections.len(),
            latency_ms,
            body.timing.total_ms
        );

        Ok(DetectionResult {
            detections: finalize_detections(body.detections, scale_x, scale_y, frame, &self.config),
            latency_ms,
            backend: BackendKind::Remote,
            frame_timestamp_us: frame.captured_at_us,
            frame_width: frame.width(),
            frame_height: frame.height(),
            device: body.device,
            server_timing: Some(body.timing),
        })
    }
}

impl HealthProbe for RemoteBackend {
    async fn health(&self) -> Result<HealthStatus, InferenceError> {
        let budget = self.config.timeouts.connect() + self.config.timeouts.read();
        let response = self
            .authorize(self.client.get(&self.health_url))
            .timeout(budget)
            .send()
            .await
            .map_err(|e| self.classify(e, budget))?;
        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::RemoteUnavailable(RemoteFailure::Status(
                status.as_u16(),
            )));
        }
        response
            .json::<HealthStatus>()
            .await
            .map_err(|e| self.classify(e, budget))
    }
}
