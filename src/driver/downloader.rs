//! Installer downloader - fetches the driver installer with progress reporting
//!
//! Data is written to `<installer>.downloading` and renamed to the final
//! name only after the whole body arrived, so a finished installer name
//! always refers to a complete file.

use super::{DriverError, DriverResult};
use futures_util::{Stream, StreamExt};
use log::{debug, error, info, warn};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::JoinHandle;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Suffix of an in-flight download
const PARTIAL_SUFFIX: &str = ".downloading";

/// Progress callback, receives whole percents 0-100
pub type ProgressCallback<'a> = &'a (dyn Fn(u8) + Send + Sync);

/// Installer file name for a driver version
pub fn installer_filename(version: &str) -> String {
    format!("{}-nvidia-installer.exe", version)
}

/// Path of a finished installer in `dir`, if it was downloaded before
pub fn existing_installer(dir: &Path, version: &str) -> Option<PathBuf> {
    let path = dir.join(installer_filename(version));
    path.is_file().then_some(path)
}

/// One installer download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub url: String,
    pub version: String,
    pub final_path: PathBuf,
    pub partial_path: PathBuf,
}

impl DownloadJob {
    pub fn new(url: &str, version: &str, dir: &Path) -> Self {
        let filename = installer_filename(version);
        Self {
            url: url.to_string(),
            version: version.to_string(),
            final_path: dir.join(&filename),
            partial_path: dir.join(format!("{}{}", filename, PARTIAL_SUFFIX)),
        }
    }
}

/// Events sent from the download worker to the foreground thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Progress(u8),
    Completed(PathBuf),
    Failed(String),
}

/// Download state as seen by the foreground thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Idle,
    Downloading(u8),
    Completed(PathBuf),
    Failed(String),
}

impl DownloadStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, DownloadStatus::Completed(_) | DownloadStatus::Failed(_))
    }
}

/// Download `job.url` into `job.final_path`
pub async fn download_installer(
    client: &reqwest::Client,
    job: &DownloadJob,
    on_progress: ProgressCallback<'_>,
) -> DriverResult<PathBuf> {
    remove_stale_partial(job).await?;

    info!("Downloading installer {} to {}", job.url, job.final_path.display());

    let response = client.get(&job.url).send().await?;
    if !response.status().is_success() {
        error!("Download failed with status: {}", response.status());
        return Err(DriverError::HttpStatus {
            status: response.status().as_u16(),
            url: job.url.clone(),
        });
    }

    let total_size = response.content_length().unwrap_or(0);
    info!("Download size: {} bytes", total_size);

    stream_to_installer(response.bytes_stream(), total_size, job, on_progress).await
}

/// Write a byte stream to the partial file and promote it on success.
/// On any failure the partial file is deleted.
pub async fn stream_to_installer<S, B, E>(
    stream: S,
    total_size: u64,
    job: &DownloadJob,
    on_progress: ProgressCallback<'_>,
) -> DriverResult<PathBuf>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    remove_stale_partial(job).await?;

    let result = match write_partial(stream, total_size, job, on_progress).await {
        Ok(()) => complete(job).await,
        Err(e) => Err(e),
    };

    if let Err(e) = &result {
        error!("Download NOT successful: {}", e);
        discard_partial(job).await;
    }
    result
}

async fn write_partial<S, B, E>(
    mut stream: S,
    total_size: u64,
    job: &DownloadJob,
    on_progress: ProgressCallback<'_>,
) -> DriverResult<()>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    if let Some(parent) = job.partial_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = File::create(&job.partial_path).await?;

    let mut downloaded: u64 = 0;
    let mut last_percent: u8 = 0;
    on_progress(0);

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DriverError::Network(format!("Error reading chunk: {}", e)))?;
        let bytes = chunk.as_ref();

        file.write_all(bytes).await?;
        downloaded += bytes.len() as u64;

        if total_size > 0 {
            let percent = percent_of(downloaded, total_size);
            if percent != last_percent {
                last_percent = percent;
                on_progress(percent);
            }
        }
        debug!("Downloaded {}/{} bytes", downloaded, total_size);
    }

    file.flush().await?;
    drop(file);

    if total_size > 0 && downloaded != total_size {
        return Err(DriverError::IncompleteDownload {
            expected: total_size,
            received: downloaded,
        });
    }

    if last_percent != 100 {
        on_progress(100);
    }
    info!("Download complete: {} bytes", downloaded);
    Ok(())
}

/// Whole percent, truncated
fn percent_of(downloaded: u64, total: u64) -> u8 {
    (downloaded.saturating_mul(100) / total).min(100) as u8
}

/// A partial file left by an interrupted attempt is never resumed
async fn remove_stale_partial(job: &DownloadJob) -> DriverResult<()> {
    if tokio::fs::try_exists(&job.partial_path).await? {
        warn!(
            "Found previous unfinished download, removing {}",
            job.partial_path.display()
        );
        tokio::fs::remove_file(&job.partial_path).await?;
    }
    Ok(())
}

/// Rename the partial file to its final name. The rename replaces an older
/// copy in one step, so the final name never goes missing.
async fn complete(job: &DownloadJob) -> DriverResult<PathBuf> {
    tokio::fs::rename(&job.partial_path, &job.final_path).await?;
    info!("Download successful: {}", job.final_path.display());
    Ok(job.final_path.clone())
}

async fn discard_partial(job: &DownloadJob) {
    if let Err(e) = tokio::fs::remove_file(&job.partial_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove partial download: {}", e);
        }
    }
}

/// Remove `*.downloading` files left behind by a process that exited
/// mid-download. Returns how many were removed.
pub fn cleanup_partial_downloads(dir: &Path) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_partial = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(PARTIAL_SUFFIX))
            .unwrap_or(false);

        if is_partial {
            info!("Cleaning up abandoned download: {}", path.display());
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
    removed
}

struct ActiveDownload {
    job: DownloadJob,
    events: Receiver<DownloadEvent>,
    worker: JoinHandle<()>,
}

/// Runs at most one installer download on a dedicated worker thread and
/// hands its events to the foreground thread
pub struct DownloadManager {
    client: reqwest::Client,
    active: Option<ActiveDownload>,
    status: DownloadStatus,
}

impl DownloadManager {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            active: None,
            status: DownloadStatus::Idle,
        }
    }

    pub fn status(&self) -> &DownloadStatus {
        &self.status
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Job currently running, if any
    pub fn active_job(&self) -> Option<&DownloadJob> {
        self.active.as_ref().map(|a| &a.job)
    }

    /// Start `job` in the background
    pub fn start(&mut self, job: DownloadJob) -> DriverResult<()> {
        if self.active.is_some() {
            return Err(DriverError::DownloadInProgress);
        }

        let (tx, rx) = mpsc::channel();
        let client = self.client.clone();
        let worker_job = job.clone();

        let worker = std::thread::Builder::new()
            .name("installer-download".to_string())
            .spawn(move || run_worker(client, worker_job, tx))?;

        info!("Started installer download for {}", job.version);
        self.status = DownloadStatus::Downloading(0);
        self.active = Some(ActiveDownload {
            job,
            events: rx,
            worker,
        });
        Ok(())
    }

    /// Drain pending events without blocking
    pub fn poll(&mut self) -> Vec<DownloadEvent> {
        let mut received = Vec::new();
        let Some(active) = &self.active else {
            return received;
        };

        loop {
            match active.events.try_recv() {
                Ok(event) => received.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !received.iter().any(is_terminal) {
                        received.push(DownloadEvent::Failed(
                            "Download worker exited unexpectedly".to_string(),
                        ));
                    }
                    break;
                }
            }
        }

        for event in &received {
            self.apply(event);
        }
        received
    }

    /// Block until the active download finishes, passing each event to
    /// `on_event`. Returns the final status.
    pub fn wait(&mut self, mut on_event: impl FnMut(&DownloadEvent)) -> DownloadStatus {
        while let Some(active) = &self.active {
            let event = active.events.recv().unwrap_or_else(|_| {
                DownloadEvent::Failed("Download worker exited unexpectedly".to_string())
            });
            on_event(&event);
            self.apply(&event);
        }
        self.status.clone()
    }

    fn apply(&mut self, event: &DownloadEvent) {
        self.status = match event {
            DownloadEvent::Progress(p) => DownloadStatus::Downloading(*p),
            DownloadEvent::Completed(path) => DownloadStatus::Completed(path.clone()),
            DownloadEvent::Failed(e) => DownloadStatus::Failed(e.clone()),
        };

        if is_terminal(event) {
            if let Some(active) = self.active.take() {
                if active.worker.join().is_err() {
                    error!("Download worker panicked");
                }
            }
        }
    }
}

fn is_terminal(event: &DownloadEvent) -> bool {
    matches!(event, DownloadEvent::Completed(_) | DownloadEvent::Failed(_))
}

fn run_worker(client: reqwest::Client, job: DownloadJob, tx: Sender<DownloadEvent>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let _ = tx.send(DownloadEvent::Failed(format!("Failed to start runtime: {}", e)));
            return;
        }
    };

    let progress_tx = tx.clone();
    let on_progress = move |percent: u8| {
        let _ = progress_tx.send(DownloadEvent::Progress(percent));
    };

    let event = match runtime.block_on(download_installer(&client, &job, &on_progress)) {
        Ok(path) => DownloadEvent::Completed(path),
        Err(e) => DownloadEvent::Failed(e.to_string()),
    };
    let _ = tx.send(event);
}
