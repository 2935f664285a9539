//! Model storage and acquisition: where model files live on disk and how
//! their bytes get there.
//!
//! Files are stored under the platform data directory by default:
//!   Linux:   ~/.local/share/mate/models/
//!   macOS:   ~/Library/Application Support/mate/models/
//!   Windows: %LOCALAPPDATA%/mate/models/
//!
//! Downloads stream into `<file>.partial` and are renamed once complete, so a
//! file with the final name is never half-written.

use super::model_registry::{self, ModelDescriptor};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

/// Default base directory for downloaded models.
pub fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mate")
        .join("models")
}

/// Sibling path used while a download is in flight.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    dest.with_file_name(name)
}

/// On-disk layout of model files.
#[derive(Debug, Clone)]
pub struct ModelStorage {
    root: PathBuf,
}

impl ModelStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_dir(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    /// Full path for a model's file.
    pub fn model_path(&self, model: &ModelDescriptor) -> PathBuf {
        self.root.join(model.file_name)
    }

    /// Size of the stored file, if any.
    pub fn stored_size(&self, model: &ModelDescriptor) -> Option<u64> {
        std::fs::metadata(self.model_path(model)).ok().map(|m| m.len())
    }

    /// A model counts as present only once it reaches its minimum expected size.
    pub fn is_present(&self, model: &ModelDescriptor) -> bool {
        self.stored_size(model)
            .map(|len| len >= model.min_expected_size_bytes)
            .unwrap_or(false)
    }

    /// All catalog models currently present on disk.
    pub fn downloaded(&self) -> Vec<&'static ModelDescriptor> {
        model_registry::available_models()
            .iter()
            .filter(|m| self.is_present(m))
            .collect()
    }

    /// Delete a model file and any leftover partial download.
    pub fn delete(&self, model: &ModelDescriptor) -> io::Result<()> {
        let path = self.model_path(model);
        if path.exists() {
            std::fs::remove_file(&path)?;
            log::info!("[MODEL] Deleted: {}", path.display());
        }
        let partial = partial_path(&path);
        if partial.exists() {
            let _ = std::fs::remove_file(&partial);
        }
        Ok(())
    }
}

/// Check a file against a hex SHA-256 digest. Blocking; streams the file
/// through the hasher, so call it off the async runtime for large models.
pub fn verify_sha256(path: &Path, expected: &str) -> Result<(), String> {
    let file = std::fs::File::open(path)
        .map_err(|e| format!("Cannot open {} for verification: {}", path.display(), e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut io::BufReader::new(file), &mut hasher)
        .map_err(|e| format!("Read error during hash: {}", e))?;

    let actual = format!("{:x}", hasher.finalize());
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(format!("Checksum mismatch: expected {}, got {}", expected, actual))
    }
}

/// Acquires model bytes. Implementations may report progress from any
/// thread; the channel carries it back to the lifecycle controller.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch `locator` into `dest`, sending whole percentages on `progress`.
    /// Returns the number of bytes on disk, or a human-readable failure reason.
    async fn fetch(
        &self,
        locator: &str,
        dest: &Path,
        progress: mpsc::UnboundedSender<u8>,
    ) -> Result<u64, String>;

    /// Abort an in-flight fetch of `locator`. No-op if none is running.
    fn cancel(&self, locator: &str);
}

/// Answers whether the current connection may be used for large downloads
/// without asking the user.
pub trait NetworkMonitor: Send + Sync {
    fn is_unmetered(&self) -> bool;
}

/// Treats every connection as unmetered.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeUnmetered;

impl NetworkMonitor for AssumeUnmetered {
    fn is_unmetered(&self) -> bool {
        true
    }
}

/// HTTP(S) downloader with resume support.
///
/// If a partial file exists it sends a Range header and appends.
pub struct HttpDownloader {
    client: reqwest::Client,
    cancelled: Mutex<HashSet<String>>,
}

impl HttpDownloader {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            cancelled: Mutex::new(HashSet::new()),
        }
    }

    fn take_cancelled(&self, locator: &str) -> bool {
        self.cancelled
            .lock()
            .map(|mut set| set.remove(locator))
            .unwrap_or(false)
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn a write error into a reason string the taxonomy can classify.
fn write_failure(e: io::Error) -> String {
    if e.kind() == io::ErrorKind::StorageFull {
        format!("Insufficient storage: {}", e)
    } else {
        format!("Failed to write chunk: {}", e)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(
        &self,
        locator: &str,
        dest: &Path,
        progress: mpsc::UnboundedSender<u8>,
    ) -> Result<u64, String> {
        if let Some(dir) = dest.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| format!("Failed to create models dir: {}", e))?;
        }
        // A stale cancel request must not abort this new attempt.
        self.take_cancelled(locator);

        let partial = partial_path(dest);
        let existing_bytes = tokio::fs::metadata(&partial)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        log::info!("[MODEL] Downloading {} (resuming from {} bytes)", locator, existing_bytes);

        let mut req = self.client.get(locator);
        if existing_bytes > 0 {
            req = req.header("Range", format!("bytes={}-", existing_bytes));
        }

        let mut resp = req
            .send()
            .await
            .map_err(|e| format!("Download request failed: {}", e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!("Download failed: HTTP {}", status));
        }
        // Server ignored the Range header: start over.
        let resumed = existing_bytes > 0 && status == reqwest::StatusCode::PARTIAL_CONTENT;
        let mut downloaded = if resumed { existing_bytes } else { 0 };
        let total = resp.content_length().map(|len| len + downloaded);

        let mut file = if resumed {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(&partial)
                .await
                .map_err(|e| format!("Failed to open partial file: {}", e))?
        } else {
            tokio::fs::File::create(&partial).await.map_err(write_failure)?
        };

        let mut last_percent = 0u8;
        loop {
            if self.take_cancelled(locator) {
                drop(file);
                let _ = tokio::fs::remove_file(&partial).await;
                return Err("Download cancelled".to_string());
            }

            let chunk = match resp.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(format!("Download stream error: {}", e));
                }
            };

            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(write_failure(e));
            }
            downloaded += chunk.len() as u64;

            if let Some(total) = total.filter(|t| *t > 0) {
                let percent = ((downloaded as f64 / total as f64) * 100.0).min(100.0) as u8;
                if percent > last_percent {
                    last_percent = percent;
                    let _ = progress.send(percent);
                }
            }
        }

        file.flush().await.map_err(write_failure)?;
        drop(file);

        tokio::fs::rename(&partial, dest)
            .await
            .map_err(|e| format!("Failed to finalize download: {}", e))?;
        let _ = progress.send(100);

        log::info!("[MODEL] Download complete: {} ({} bytes)", dest.display(), downloaded);
        Ok(downloaded)
    }

    fn cancel(&self, locator: &str) {
        if let Ok(mut set) = self.cancelled.lock() {
            set.insert(locator.to_string());
        }
        log::info!("[MODEL] Cancel requested for {}", locator);
    }
}
