use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::StatusCode;
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info, warn};

use crate::assets::CatalogItem;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::util::sanitize_file_stem;

/// Size of each read from the response body.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Downloads between two proactive session checks.
pub const HEALTH_CHECK_INTERVAL: usize = 10;

const PART_SUFFIX: &str = ".part";

/// One file to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub url: String,
    pub item_id: String,
    pub extension: String,
    pub destination_dir: PathBuf,
}

impl DownloadTask {
    pub fn for_item(item: &CatalogItem, destination_dir: &Path) -> Self {
        Self {
            url: item.asset_url.clone(),
            item_id: item.item_id.clone(),
            extension: item.extension().to_string(),
            destination_dir: destination_dir.to_path_buf(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}{}", sanitize_file_stem(&self.item_id), self.extension)
    }

    /// `<destination_dir>/<item_id><extension>`
    pub fn target_path(&self) -> PathBuf {
        self.destination_dir.join(self.file_name())
    }

    /// Where bytes land until the transfer completes.
    pub fn part_path(&self) -> PathBuf {
        self.destination_dir
            .join(format!("{}{}", self.file_name(), PART_SUFFIX))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Downloaded,
    /// The target already existed; nothing was transferred.
    Skipped,
    Failed,
}

#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub task: DownloadTask,
    pub status: OutcomeStatus,
    pub bytes_written: u64,
    pub error: Option<String>,
}

impl DownloadOutcome {
    fn downloaded(task: &DownloadTask, bytes_written: u64) -> Self {
        Self {
            task: task.clone(),
            status: OutcomeStatus::Downloaded,
            bytes_written,
            error: None,
        }
    }

    fn skipped(task: &DownloadTask) -> Self {
        Self {
            task: task.clone(),
            status: OutcomeStatus::Skipped,
            bytes_written: 0,
            error: None,
        }
    }

    fn failed(task: &DownloadTask, error: &Error) -> Self {
        Self {
            task: task.clone(),
            status: OutcomeStatus::Failed,
            bytes_written: 0,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status != OutcomeStatus::Failed
    }
}

/// Sequential, paced file fetcher with retry and session renewal.
#[derive(Debug, Clone)]
pub struct DownloadExecutor {
    delay: Duration,
    retry_max: usize,
    retry_delay: Duration,
    health_check_interval: usize,
    timeout: Duration,
    progress: bool,
    started: usize,
}

impl Default for DownloadExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadExecutor {
    pub fn new() -> Self {
        Self {
            delay: Duration::from_secs(5),
            retry_max: 3,
            retry_delay: Duration::from_secs(5),
            health_check_interval: HEALTH_CHECK_INTERVAL,
            timeout: Duration::from_secs(300),
            progress: true,
            started: 0,
        }
    }

    /// Pause applied before every transfer request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Attempts per task for transient failures.
    pub fn with_retry_max(mut self, retry_max: usize) -> Self {
        self.retry_max = retry_max.max(1);
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Check the session every `interval` downloads; 0 disables the check.
    pub fn with_health_check_interval(mut self, interval: usize) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Fetches one task.
    ///
    /// Per-file problems come back as a failed [`DownloadOutcome`]; only
    /// cancellation and a failed re-authentication are returned as errors, since
    /// neither lets the pass continue.
    pub fn download(
        &mut self,
        task: &DownloadTask,
        session: &mut Session,
        cancel: &CancelToken,
    ) -> Result<DownloadOutcome> {
        cancel.check()?;

        self.started += 1;
        if self.health_check_interval > 0 && self.started % self.health_check_interval == 0 {
            session.ensure_fresh()?;
        }

        let name = task.file_name();
        if task.target_path().exists() {
            info!("Skipping {}: file already exists", name);
            return Ok(DownloadOutcome::skipped(task));
        }

        info!("Downloading {}...", name);
        if !self.delay.is_zero() {
            debug!("Waiting {:.1}s before downloading...", self.delay.as_secs_f64());
        }
        cancel.sleep(self.delay)?;

        let mut attempt = 0usize;
        let mut renewed = false;
        loop {
            attempt += 1;
            match self.fetch(task, session.context().http(), cancel) {
                Ok(bytes) => {
                    info!("Downloaded {} successfully ({} bytes)", name, bytes);
                    return Ok(DownloadOutcome::downloaded(task, bytes));
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e @ Error::SessionInvalidated { .. }) => {
                    if renewed {
                        warn!("Failed to download {}: {}", name, e);
                        return Ok(DownloadOutcome::failed(task, &e));
                    }
                    warn!("{}; re-authenticating", e);
                    session.renew()?;
                    renewed = true;
                    cancel.sleep(self.delay)?;
                }
                Err(e) if e.is_retriable() && attempt < self.retry_max => {
                    warn!(
                        "{} (attempt {}/{}), waiting {}s before retry...",
                        e,
                        attempt,
                        self.retry_max,
                        self.retry_delay.as_secs_f64()
                    );
                    cancel.sleep(self.retry_delay)?;
                }
                Err(e) => {
                    warn!(
                        "Failed to download {} after {} attempt(s): {}",
                        name, attempt, e
                    );
                    return Ok(DownloadOutcome::failed(task, &e));
                }
            }
        }
    }

    /// One transfer attempt, without pacing or retries.
    ///
    /// Bytes go to [`DownloadTask::part_path`] and are renamed onto the target
    /// only once the body is complete; the part file is removed on any failure.
    pub fn fetch(&self, task: &DownloadTask, http: &HttpClient, cancel: &CancelToken) -> Result<u64> {
        let url = task.url.as_str();
        let resp = http
            .get(url)
            .timeout(self.timeout)
            .send()
            .map_err(|source| Error::DownloadTransport {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        // Unauthenticated asset requests end on the HTML login page. Error pages
        // served as HTML keep their status and go through the retry rules.
        let login_page = status.is_success() && content_type.starts_with("text/html");
        if login_page || status == StatusCode::UNAUTHORIZED {
            return Err(Error::SessionInvalidated {
                url: url.to_string(),
                content_type: if content_type.is_empty() {
                    format!("HTTP {}", status.as_u16())
                } else {
                    content_type
                },
            });
        }

        if !status.is_success() {
            return Err(Error::DownloadStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        fs::create_dir_all(&task.destination_dir)
            .map_err(|e| Error::io(&task.destination_dir, e))?;

        let part = task.part_path();
        match self.stream_to_file(resp, task, &part, cancel) {
            Ok(written) => {
                let target = task.target_path();
                fs::rename(&part, &target).map_err(|e| Error::io(&target, e))?;
                Ok(written)
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&part) {
                    if rm.kind() != ErrorKind::NotFound {
                        warn!("could not remove partial file {}: {}", part.display(), rm);
                    }
                }
                Err(e)
            }
        }
    }

    fn stream_to_file(
        &self,
        mut resp: Response,
        task: &DownloadTask,
        part: &Path,
        cancel: &CancelToken,
    ) -> Result<u64> {
        let total = resp.content_length().filter(|len| *len > 0);
        let mut out = File::create(part).map_err(|e| Error::io(part, e))?;
        let pb = self.progress_bar(total, &task.file_name());

        let interrupted = |source: std::io::Error| Error::DownloadInterrupted {
            url: task.url.clone(),
            source,
        };

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written: u64 = 0;
        let mut logged_decile = 0u64;
        loop {
            if let Err(e) = cancel.check() {
                if let Some(pb) = &pb {
                    pb.abandon();
                }
                return Err(e);
            }

            let n = match resp.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    if let Some(pb) = &pb {
                        pb.abandon();
                    }
                    return Err(interrupted(e));
                }
            };

            out.write_all(&buf[..n]).map_err(|e| Error::io(part, e))?;
            written += n as u64;
            if let Some(pb) = &pb {
                pb.inc(n as u64);
            }
            if let Some(len) = total {
                let decile = (written * 10 / len).min(10);
                if decile > logged_decile {
                    logged_decile = decile;
                    debug!(
                        "{}: {}/{} bytes ({}%)",
                        task.file_name(),
                        written,
                        len,
                        written * 100 / len
                    );
                }
            }
        }

        out.flush().map_err(|e| Error::io(part, e))?;

        if let Some(len) = total {
            if written < len {
                if let Some(pb) = &pb {
                    pb.abandon();
                }
                return Err(interrupted(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("received {} byte(s) out of {}", written, len),
                )));
            }
        } else {
            debug!("{}: {} bytes (size not announced)", task.file_name(), written);
        }

        if let Some(pb) = &pb {
            pb.finish_and_clear();
        }
        Ok(written)
    }

    fn progress_bar(&self, total: Option<u64>, label: &str) -> Option<ProgressBar> {
        if !self.progress {
            return None;
        }
        let pb = match total {
            Some(len) => {
                let pb = ProgressBar::new(len);
                pb.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.green} {msg} {bytes}/{total_bytes} {percent}% ({bytes_per_sec}) {wide_bar} {eta}",
                    )
                    .map(|s| s.progress_chars("=>-"))
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                pb
            }
            None => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(
                    ProgressStyle::with_template("{spinner:.green} {msg} {bytes} ({bytes_per_sec})")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                pb
            }
        };
        pb.set_message(label.to_string());
        Some(pb)
    }
}
