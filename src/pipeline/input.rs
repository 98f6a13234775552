//! Input resolution: load PDF bytes from a local path or an HTTP(S) URL.
//!
//! The extractor works on in-memory bytes, so URLs are downloaded straight
//! into a buffer. The `%PDF` magic is checked here so callers get a clear
//! error instead of a pdfium failure.

use crate::error::ReviewError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// PDF bytes plus the name they arrived under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub bytes: Vec<u8>,
    /// File name used as a history title fallback.
    pub file_name: Option<String>,
}

impl Document {
    /// Wrap bytes already in memory (e.g. an upload).
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, file_name: Option<String>) -> Self {
        Self {
            bytes: bytes.into(),
            file_name,
        }
    }

    /// `true` when the bytes start with `%PDF`.
    pub fn has_pdf_magic(&self) -> bool {
        self.bytes.starts_with(b"%PDF")
    }

    /// Fail with [`ReviewError::NotAPdf`] unless the magic bytes are present.
    pub fn ensure_pdf(&self) -> Result<(), ReviewError> {
        if self.has_pdf_magic() {
            Ok(())
        } else {
            Err(ReviewError::NotAPdf {
                magic: self.bytes.iter().take(4).copied().collect(),
            })
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load the input as a [`Document`], downloading it when it is a URL.
pub async fn load_document(input: &str, timeout_secs: u64) -> Result<Document, ReviewError> {
    let doc = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(Path::new(input)).await?
    };
    doc.ensure_pdf()?;
    Ok(doc)
}

async fn read_local(path: &Path) -> Result<Document, ReviewError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ReviewError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => ReviewError::DocumentUnreadable {
            detail: format!("{}: {e}", path.display()),
        },
    })?;
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok(Document {
        bytes,
        file_name: file_name_of(path),
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Document, ReviewError> {
    info!("Downloading PDF from: {}", url);

    let failed = |reason: String| ReviewError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {timeout_secs}s"))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    info!("Downloaded {} bytes", bytes.len());

    Ok(Document {
        bytes: bytes.to_vec(),
        file_name: filename_from_url(url),
    })
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Last path segment of a URL when it looks like a file name.
fn filename_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.is_empty() || !last.contains('.') {
        return None;
    }
    file_name_of(&PathBuf::from(last))
}
