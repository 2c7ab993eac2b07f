//! src/tool/download.rs
//! Makes sure the external builder exists locally, downloading it on demand.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::ExternalTool;
use crate::error::{IoContext, PackError};
use crate::perms;

/// Snapshot of a running download, handed to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadProgress {
    pub downloaded: u64,
    /// From `Content-Length`, when the server sent one.
    pub total: Option<u64>,
    pub bytes_per_sec: f64,
}

impl DownloadProgress {
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(0) | None => None,
            Some(total) => Some((self.downloaded as f64 / total as f64 * 100.0).min(100.0)),
        }
    }
}

/// Result of provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub path: PathBuf,
    pub downloaded: bool,
}

/// Returns an executable path for `tool`. Downloads only when the file is absent;
/// either way the file ends up marked executable. No retries.
pub async fn ensure_tool<F>(
    tool: &ExternalTool,
    client: &reqwest::Client,
    on_progress: F,
) -> Result<Provisioned, PackError>
where
    F: FnMut(&DownloadProgress),
{
    let downloaded = if tool.is_present() {
        tracing::debug!(path = %tool.path.display(), "builder already present, skipping download");
        false
    } else {
        download_file_with_progress(client, &tool.url, &tool.path, on_progress).await?;
        true
    };

    if !perms::is_executable(&tool.path) {
        perms::set_executable(&tool.path)
            .io_context(|| format!("making {} executable", tool.path.display()))?;
    }

    Ok(Provisioned {
        path: tool.path.clone(),
        downloaded,
    })
}

/// Streams `url` into `dest_path`. The body lands in `<dest>.part` first and is
/// renamed only after the last chunk, so a broken transfer never leaves a file
/// that looks like a complete tool.
pub async fn download_file_with_progress<F>(
    client: &reqwest::Client,
    url: &str,
    dest_path: &Path,
    mut on_progress: F,
) -> Result<(), PackError>
where
    F: FnMut(&DownloadProgress),
{
    let mut response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| PackError::download(url, e))?;

    let total = response.content_length();
    let part_path = part_path(dest_path);
    let result = async {
        let mut dest_file = File::create(&part_path)
            .io_context(|| format!("creating {}", part_path.display()))?;

        let started = Instant::now();
        let mut downloaded = 0u64;
        on_progress(&DownloadProgress { downloaded, total, bytes_per_sec: 0.0 });

        // Stream the download chunk by chunk.
        while let Some(chunk) = response.chunk().await.map_err(|e| PackError::download(url, e))? {
            dest_file
                .write_all(&chunk)
                .io_context(|| format!("writing {}", part_path.display()))?;
            downloaded += chunk.len() as u64;
            let elapsed = started.elapsed().as_secs_f64();
            on_progress(&DownloadProgress {
                downloaded,
                total,
                bytes_per_sec: if elapsed > 0.0 { downloaded as f64 / elapsed } else { 0.0 },
            });
        }

        if let Some(expected) = total {
            if downloaded < expected {
                return Err(PackError::download(
                    url,
                    format!("transfer interrupted after {downloaded} of {expected} bytes"),
                ));
            }
        }
        dest_file
            .sync_all()
            .io_context(|| format!("flushing {}", part_path.display()))?;
        Ok::<(), PackError>(())
    }
    .await;

    match result {
        Ok(()) => fs::rename(&part_path, dest_path)
            .io_context(|| format!("moving download to {}", dest_path.display())),
        Err(e) => {
            let _ = fs::remove_file(&part_path);
            Err(e)
        }
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}
