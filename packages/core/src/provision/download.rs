//! Atomic artifact download
//!
//! Bytes are written to a temporary file created next to the destination and
//! renamed over it only once fully written and synced. The final name never
//! refers to a partial file, and an interrupted transfer leaves nothing behind.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;

use crate::error::HostError;

/// Boot image used when a driver has no explicit URL configured
pub const DEFAULT_BOOT2DOCKER_URL: &str =
    "https://github.com/boot2docker/boot2docker/releases/latest/download/boot2docker.iso";

/// Download `url` to `dest` atomically
pub async fn download_file(url: &str, dest: &Path) -> Result<(), HostError> {
    tracing::info!("Downloading {} to {}", url, dest.display());

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| download_error(url, e))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| download_error(url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(HostError::Download {
            url: url.to_string(),
            message: format!("server returned {status}"),
        });
    }

    write_atomically(response.bytes_stream(), dest)
        .await
        .map_err(|e| match e {
            HostError::Download { message, .. } => HostError::Download {
                url: url.to_string(),
                message,
            },
            other => other,
        })
}

/// Drain a byte stream into `dest` through a sibling temp file
///
/// On any stream or write error the temp file is dropped, which deletes it,
/// and `dest` is left untouched.
pub async fn write_atomically<S, E>(mut stream: S, dest: &Path) -> Result<(), HostError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let dir = parent_dir(dest).to_path_buf();
    let (file, tmp_path) = blocking(move || {
        let tmp = tempfile::Builder::new()
            .prefix(".download-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        Ok(tmp.into_parts())
    })
    .await?;
    let mut file = tokio::fs::File::from_std(file);

    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| HostError::Download {
            url: dest.display().to_string(),
            message: format!("transfer interrupted after {written} bytes: {e}"),
        })?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    let dest_path = dest.to_path_buf();
    blocking(move || tmp_path.persist(dest_path).map_err(|e| HostError::Io(e.error))).await?;

    tracing::debug!("Wrote {} bytes to {}", written, dest.display());
    Ok(())
}

/// Copy a local file to `dest` with the same atomic guarantee
pub async fn copy_atomically(src: &Path, dest: &Path) -> Result<(), HostError> {
    let src = src.to_path_buf();
    let dest = dest.to_path_buf();
    blocking(move || {
        let mut input = std::fs::File::open(&src)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".copy-")
            .suffix(".tmp")
            .tempfile_in(parent_dir(&dest))?;
        std::io::copy(&mut input, &mut tmp)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| HostError::Io(e.error))?;
        Ok(())
    })
    .await
}

/// Run filesystem work off the async worker threads
async fn blocking<T, F>(work: F) -> Result<T, HostError>
where
    F: FnOnce() -> Result<T, HostError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| HostError::Io(std::io::Error::other(e)))?
}

/// Download the boot image to `dest` unless it is already present
///
/// An empty `url` selects `default_url`.
pub async fn ensure_iso(url: &str, default_url: &str, dest: &Path) -> Result<(), HostError> {
    if dest.exists() {
        tracing::debug!("Boot image already present at {}", dest.display());
        return Ok(());
    }
    let url = if url.is_empty() { default_url } else { url };
    download_file(url, dest).await
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

fn download_error(url: &str, e: reqwest::Error) -> HostError {
    HostError::Download {
        url: url.to_string(),
        message: e.to_string(),
    }
}
