//! Model download with preflight checks and bounded retries
//!
//! Each attempt runs the network preflight, streams the body to a `.part`
//! file next to the target, checks the result is non-empty and renames it
//! into place. Any failure deletes the partial file first. Retryable
//! failures are re-attempted after a fixed delay, up to `max_retries` times.

use super::cache::partial_path;
use super::descriptor::AssetDescriptor;
use crate::config::DownloadConfig;
use crate::error::{AcquireError, AcquireResult, RetryStage};
use crate::preflight::Preflight;
use crate::telemetry::{ProgressTelemetry, TransferStats};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

/// Retry bounds for the download layer
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self::from(&DownloadConfig::default())
    }
}

impl From<&DownloadConfig> for DownloadSettings {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

/// State of one in-flight transfer attempt
#[derive(Debug)]
pub struct DownloadSession {
    pub bytes_written: u64,
    pub content_length: Option<u64>,
    pub started_at: Instant,
    /// Retries already spent before this attempt
    pub retry_count: u32,
    telemetry: ProgressTelemetry,
}

impl DownloadSession {
    pub fn new(retry_count: u32) -> Self {
        let started_at = Instant::now();
        Self {
            bytes_written: 0,
            content_length: None,
            started_at,
            retry_count,
            telemetry: ProgressTelemetry::new(started_at),
        }
    }

    /// Account for a received chunk and return fresh telemetry
    ///
    /// Fails without counting the chunk if it would take the session past
    /// the announced content length.
    fn record_chunk(&mut self, len: u64) -> AcquireResult<TransferStats> {
        if let Some(total) = self.content_length
            && self.bytes_written + len > total
        {
            return Err(AcquireError::TransferFailed {
                reason: format!("received more than the announced {} bytes", total),
                retryable: false,
            });
        }

        self.bytes_written += len;
        Ok(self
            .telemetry
            .sample(self.bytes_written, self.content_length, Instant::now()))
    }
}

/// Drives one asset download to completion
pub struct DownloadOrchestrator {
    preflight: Arc<dyn Preflight>,
    client: reqwest::Client,
    settings: DownloadSettings,
}

impl DownloadOrchestrator {
    pub fn new(
        preflight: Arc<dyn Preflight>,
        settings: DownloadSettings,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()?;
        Ok(Self {
            preflight,
            client,
            settings,
        })
    }

    /// Download the descriptor's asset to its local path
    ///
    /// On success the descriptor's observed size is updated and the local
    /// path is returned. `on_progress` receives every telemetry sample in
    /// the order the transfer reports them.
    pub async fn download<F>(
        &self,
        descriptor: &mut AssetDescriptor,
        mut on_progress: F,
    ) -> AcquireResult<PathBuf>
    where
        F: FnMut(&TransferStats) + Send,
    {
        let mut retry_count = 0u32;

        loop {
            crate::metrics::record_download_attempt(&descriptor.id);
            let mut session = DownloadSession::new(retry_count);

            let err = match self
                .attempt(descriptor, &mut session, &mut on_progress)
                .await
            {
                Ok(size_bytes) => {
                    descriptor.mark_downloaded(size_bytes);
                    tracing::info!(
                        model_id = %descriptor.id,
                        size_bytes,
                        retries = retry_count,
                        elapsed_ms = session.started_at.elapsed().as_millis() as u64,
                        "Model download complete"
                    );
                    return Ok(descriptor.local_path.clone());
                }
                Err(e) => e,
            };

            crate::metrics::record_download_failure(&descriptor.id, err.kind());
            remove_partial(&descriptor.local_path).await;

            if !err.is_retryable() {
                tracing::error!(
                    model_id = %descriptor.id,
                    error = %err,
                    "Model download failed"
                );
                return Err(err);
            }

            if retry_count >= self.settings.max_retries {
                tracing::error!(
                    model_id = %descriptor.id,
                    error = %err,
                    retries = retry_count,
                    "Model download retries exhausted"
                );
                return Err(AcquireError::Exhausted {
                    stage: RetryStage::Download,
                    attempts: retry_count + 1,
                    source: Box::new(err),
                });
            }

            retry_count += 1;
            crate::metrics::record_download_retry(&descriptor.id);
            tracing::warn!(
                model_id = %descriptor.id,
                error = %err,
                retry = retry_count,
                max_retries = self.settings.max_retries,
                delay_ms = self.settings.retry_delay.as_millis() as u64,
                "Model download failed, retrying"
            );
            tokio::time::sleep(self.settings.retry_delay).await;
        }
    }

    /// One preflight + transfer + verification pass; returns the file size
    async fn attempt<F>(
        &self,
        descriptor: &AssetDescriptor,
        session: &mut DownloadSession,
        on_progress: &mut F,
    ) -> AcquireResult<u64>
    where
        F: FnMut(&TransferStats) + Send,
    {
        let status = self.preflight.check(&descriptor.source_url).await;
        if !status.connected {
            return Err(status.into_error());
        }

        if let Some(parent) = descriptor.local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tracing::info!(
            model_id = %descriptor.id,
            url = %descriptor.source_url,
            dest = %descriptor.local_path.display(),
            retry = session.retry_count,
            "Downloading model"
        );

        let response = self
            .client
            .get(&descriptor.source_url)
            .send()
            .await
            .map_err(AcquireError::from_transfer)?;

        if !response.status().is_success() {
            return Err(AcquireError::TransferFailed {
                reason: format!(
                    "Download failed with status {}",
                    response.status().as_u16()
                ),
                retryable: false,
            });
        }

        session.content_length = response.content_length();

        let part = partial_path(&descriptor.local_path);
        let mut file = tokio::fs::File::create(&part).await?;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(AcquireError::from_transfer)?;
            let stats = session.record_chunk(chunk.len() as u64)?;

            file.write_all(&chunk).await?;
            crate::metrics::record_bytes_downloaded(&descriptor.id, chunk.len() as u64);
            crate::metrics::update_download_progress(&descriptor.id, stats.progress);
            tracing::trace!(
                model_id = %descriptor.id,
                bytes = session.bytes_written,
                progress = stats.progress,
                speed = %stats.speed_display(),
                eta = %stats.eta,
                "Download progress"
            );
            on_progress(&stats);
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let size_bytes = tokio::fs::metadata(&part).await?.len();
        if size_bytes == 0 {
            return Err(AcquireError::CorruptArtifact {
                path: descriptor.local_path.clone(),
            });
        }

        tokio::fs::rename(&part, &descriptor.local_path).await?;
        Ok(size_bytes)
    }
}

/// Best-effort removal of partial output; cleanup errors are swallowed
async fn remove_partial(local_path: &Path) {
    for path in [partial_path(local_path), local_path.to_path_buf()] {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Removed partial download");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Failed to remove partial download");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::NetworkStatus;
    use async_trait::async_trait;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::io::AsyncReadExt;

    /// Preflight that replays a script, repeating the last status
    struct ScriptedPreflight {
        script: Mutex<Vec<NetworkStatus>>,
        calls: AtomicU32,
    }

    impl ScriptedPreflight {
        fn new(script: Vec<NetworkStatus>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            })
        }

        fn always(status: NetworkStatus) -> Arc<Self> {
            Self::new(vec![status])
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Preflight for ScriptedPreflight {
        async fn check(&self, _target_url: &str) -> NetworkStatus {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn fast_settings() -> DownloadSettings {
        DownloadSettings {
            max_retries: 3,
            retry_delay: Duration::from_millis(5),
            connect_timeout: Duration::from_secs(2),
        }
    }

    fn descriptor(dir: &Path, url: String) -> AssetDescriptor {
        AssetDescriptor::new(
            "tiny.gguf".to_string(),
            "Tiny".to_string(),
            url,
            dir.join("tiny.gguf"),
        )
    }

    #[tokio::test]
    async fn test_successful_download() {
        let body = vec![42u8; 64 * 1024];
        let served = body.clone();
        let base = serve(Router::new().route(
            "/tiny.gguf",
            get(move || {
                let served = served.clone();
                async move { served }
            }),
        ))
        .await;

        let temp_dir = tempfile::tempdir().unwrap();
        let preflight = ScriptedPreflight::always(NetworkStatus::connected());
        let downloader = DownloadOrchestrator::new(preflight.clone(), fast_settings()).unwrap();
        let mut d = descriptor(temp_dir.path(), format!("{}/tiny.gguf", base));

        let mut samples = Vec::new();
        let path = downloader
            .download(&mut d, |stats| samples.push(stats.progress))
            .await
            .unwrap();

        assert_eq!(path, temp_dir.path().join("tiny.gguf"));
        assert_eq!(std::fs::read(&path).unwrap(), body);
        assert!(!partial_path(&path).exists());
        assert_eq!(d.size_bytes, body.len() as u64);
        assert!(d.is_downloaded);
        assert_eq!(preflight.calls(), 1);

        assert!(!samples.is_empty());
        assert!(samples.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(samples.last().copied(), Some(1.0));
    }

    #[tokio::test]
    async fn test_empty_body_is_corrupt_and_not_retried() {
        let base = serve(Router::new().route("/tiny.gguf", get(|| async { "" }))).await;

        let temp_dir = tempfile::tempdir().unwrap();
        let preflight = ScriptedPreflight::always(NetworkStatus::connected());
        let downloader = DownloadOrchestrator::new(preflight.clone(), fast_settings()).unwrap();
        let mut d = descriptor(temp_dir.path(), format!("{}/tiny.gguf", base));

        let err = downloader.download(&mut d, |_| {}).await.unwrap_err();

        assert!(matches!(err, AcquireError::CorruptArtifact { .. }));
        assert_eq!(preflight.calls(), 1);
        assert!(!d.local_path.exists());
        assert!(!partial_path(&d.local_path).exists());
        assert!(!d.is_downloaded);
    }

    #[tokio::test]
    async fn test_network_preflight_retried_then_exhausted() {
        let temp_dir = tempfile::tempdir().unwrap();
        let preflight = ScriptedPreflight::always(NetworkStatus::no_connection());
        let downloader = DownloadOrchestrator::new(preflight.clone(), fast_settings()).unwrap();
        let mut d = descriptor(temp_dir.path(), "http://127.0.0.1:9/tiny.gguf".to_string());

        let err = downloader.download(&mut d, |_| {}).await.unwrap_err();

        match err {
            AcquireError::Exhausted {
                stage,
                attempts,
                source,
            } => {
                assert_eq!(stage, RetryStage::Download);
                assert_eq!(attempts, 4);
                assert!(matches!(*source, AcquireError::NetworkUnavailable { .. }));
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
        // First attempt plus three retries
        assert_eq!(preflight.calls(), 4);
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_non_retryable_preflight_fails_immediately() {
        let temp_dir = tempfile::tempdir().unwrap();
        let preflight = ScriptedPreflight::always(NetworkStatus::server_unreachable(Some(
            reqwest::StatusCode::NOT_FOUND,
        )));
        let downloader = DownloadOrchestrator::new(preflight.clone(), fast_settings()).unwrap();
        let mut d = descriptor(temp_dir.path(), "http://127.0.0.1:9/tiny.gguf".to_string());

        let err = downloader.download(&mut d, |_| {}).await.unwrap_err();

        assert!(matches!(err, AcquireError::ServerUnreachable { .. }));
        assert_eq!(preflight.calls(), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_preflight_failure() {
        let base = serve(Router::new().route("/tiny.gguf", get(|| async { "GGUF-bytes" }))).await;

        let temp_dir = tempfile::tempdir().unwrap();
        let preflight = ScriptedPreflight::new(vec![
            NetworkStatus::internet_unreachable(),
            NetworkStatus::no_connection(),
            NetworkStatus::connected(),
        ]);
        let downloader = DownloadOrchestrator::new(preflight.clone(), fast_settings()).unwrap();
        let mut d = descriptor(temp_dir.path(), format!("{}/tiny.gguf", base));

        downloader.download(&mut d, |_| {}).await.unwrap();

        assert_eq!(preflight.calls(), 3);
        assert_eq!(d.size_bytes, 10);
    }

    #[tokio::test]
    async fn test_http_error_is_terminal() {
        let base = serve(Router::new().route(
            "/tiny.gguf",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        ))
        .await;

        let temp_dir = tempfile::tempdir().unwrap();
        let preflight = ScriptedPreflight::always(NetworkStatus::connected());
        let downloader = DownloadOrchestrator::new(preflight.clone(), fast_settings()).unwrap();
        let mut d = descriptor(temp_dir.path(), format!("{}/tiny.gguf", base));

        let err = downloader.download(&mut d, |_| {}).await.unwrap_err();

        assert!(matches!(
            err,
            AcquireError::TransferFailed {
                retryable: false,
                ..
            }
        ));
        assert!(err.to_string().contains("status 500"));
        assert_eq!(preflight.calls(), 1);
        assert!(!d.local_path.exists());
    }

    #[tokio::test]
    async fn test_stale_empty_file_removed_on_failure() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut d = descriptor(temp_dir.path(), "http://127.0.0.1:9/tiny.gguf".to_string());
        std::fs::write(&d.local_path, b"").unwrap();
        std::fs::write(partial_path(&d.local_path), b"half").unwrap();

        let preflight = ScriptedPreflight::always(NetworkStatus::server_unreachable(Some(
            reqwest::StatusCode::FORBIDDEN,
        )));
        let downloader = DownloadOrchestrator::new(preflight, fast_settings()).unwrap();
        assert!(downloader.download(&mut d, |_| {}).await.is_err());

        assert!(!d.local_path.exists());
        assert!(!partial_path(&d.local_path).exists());
    }

    #[test]
    fn test_settings_from_config() {
        let settings = DownloadSettings::default();
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.retry_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_session_tracks_bytes() {
        let mut session = DownloadSession::new(2);
        session.content_length = Some(100);
        let stats = session.record_chunk(25).unwrap();
        assert_eq!(session.bytes_written, 25);
        assert_eq!(session.retry_count, 2);
        assert_eq!(stats.progress, 0.25);
    }

    #[test]
    fn test_session_rejects_bytes_past_content_length() {
        let mut session = DownloadSession::new(0);
        session.content_length = Some(100);
        session.record_chunk(60).unwrap();

        let err = session.record_chunk(41).unwrap_err();
        assert!(matches!(
            err,
            AcquireError::TransferFailed {
                retryable: false,
                ..
            }
        ));
        assert!(err.to_string().contains("announced 100 bytes"));
        assert_eq!(session.bytes_written, 60);

        // Exactly reaching the announced length is fine
        let stats = session.record_chunk(40).unwrap();
        assert_eq!(stats.progress, 1.0);
    }

    #[test]
    fn test_session_without_length_accepts_any_amount() {
        let mut session = DownloadSession::new(0);
        let stats = session.record_chunk(1 << 40).unwrap();
        assert_eq!(session.bytes_written, 1 << 40);
        assert_eq!(stats.progress, 0.0);
    }

    // ========================================================================
    // Raw HTTP fixtures (bodies that disagree with Content-Length)
    // ========================================================================

    /// Announce `announced` body bytes, send `sent` bytes, then close
    #[derive(Clone, Copy)]
    struct RawReply {
        announced: usize,
        sent: usize,
    }

    /// Serve one scripted reply per connection, repeating the last one
    async fn serve_raw(script: Vec<RawReply>) -> (String, Arc<AtomicU32>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicU32::new(0));
        let counter = connections.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst) as usize;
                let reply = script[n.min(script.len() - 1)];

                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(read) => request.extend_from_slice(&buf[..read]),
                        }
                    }

                    let RawReply { announced, sent } = reply;
                    let head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        announced
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&vec![7u8; sent]).await;
                    let _ = socket.flush().await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (format!("http://{}/tiny.gguf", addr), connections)
    }

    #[tokio::test]
    async fn test_truncated_body_is_retried_and_cleaned_up() {
        let (url, connections) = serve_raw(vec![
            RawReply {
                announced: 1000,
                sent: 100,
            },
            RawReply {
                announced: 1000,
                sent: 1000,
            },
        ])
        .await;

        let temp_dir = tempfile::tempdir().unwrap();
        let preflight = ScriptedPreflight::always(NetworkStatus::connected());
        let downloader = DownloadOrchestrator::new(preflight.clone(), fast_settings()).unwrap();
        let mut d = descriptor(temp_dir.path(), url);

        let path = downloader.download(&mut d, |_| {}).await.unwrap();

        assert_eq!(connections.load(Ordering::SeqCst), 2);
        assert_eq!(preflight.calls(), 2);
        assert_eq!(std::fs::read(&path).unwrap(), vec![7u8; 1000]);
        assert!(!partial_path(&path).exists());
        assert_eq!(d.size_bytes, 1000);
    }

    #[tokio::test]
    async fn test_always_truncated_body_exhausts_retries() {
        let (url, connections) = serve_raw(vec![RawReply {
            announced: 1000,
            sent: 100,
        }])
        .await;

        let temp_dir = tempfile::tempdir().unwrap();
        let preflight = ScriptedPreflight::always(NetworkStatus::connected());
        let downloader = DownloadOrchestrator::new(preflight, fast_settings()).unwrap();
        let mut d = descriptor(temp_dir.path(), url);

        let err = downloader.download(&mut d, |_| {}).await.unwrap_err();

        match err {
            AcquireError::Exhausted {
                stage,
                attempts,
                source,
            } => {
                assert_eq!(stage, RetryStage::Download);
                assert_eq!(attempts, 4);
                assert!(source.is_retryable(), "{:?}", source);
                assert!(matches!(*source, AcquireError::TransferFailed { .. }));
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
        assert_eq!(connections.load(Ordering::SeqCst), 4);
        assert!(!d.local_path.exists());
        assert!(!partial_path(&d.local_path).exists());
    }

    #[tokio::test]
    async fn test_bytes_past_content_length_never_written() {
        let (url, _connections) = serve_raw(vec![RawReply {
            announced: 16,
            sent: 64,
        }])
        .await;

        let temp_dir = tempfile::tempdir().unwrap();
        let preflight = ScriptedPreflight::always(NetworkStatus::connected());
        let downloader = DownloadOrchestrator::new(preflight, fast_settings()).unwrap();
        let mut d = descriptor(temp_dir.path(), url);

        let mut samples = Vec::new();
        let path = downloader
            .download(&mut d, |stats| samples.push(stats.progress))
            .await
            .unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 16);
        assert_eq!(d.size_bytes, 16);
        assert!(samples.iter().all(|p| *p <= 1.0));
    }
}
