//! Text extraction: PDF bytes → one plain-text blob, page order preserved.
//!
//! Pages are visited in document order. Within a page the text objects are
//! joined with a single space in the order pdfium reports them, and every
//! page ends with a newline. Columns, tables and reading order are not
//! reconstructed.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state; calling it from an async
//! task would stall a Tokio worker. The orchestrator runs
//! [`TextExtractor::extract_text`] inside `tokio::task::spawn_blocking`.

use crate::error::ReviewError;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};

/// Environment variable naming an existing pdfium library.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Converts PDF bytes into text. Deterministic; never retried.
pub trait TextExtractor: Send + Sync {
    /// Extract the text of every page.
    ///
    /// # Errors
    /// [`ReviewError::DocumentUnreadable`] when the bytes are not a parseable PDF.
    fn extract_text(&self, bytes: &[u8]) -> Result<String, ReviewError>;
}

/// Join per-page token lists: tokens separated by one space, `\n` after each page.
pub fn assemble_pages<P, T>(pages: P) -> String
where
    P: IntoIterator<Item = Vec<T>>,
    T: AsRef<str>,
{
    let mut text = String::new();
    for tokens in pages {
        for (i, token) in tokens.iter().enumerate() {
            if i > 0 {
                text.push(' ');
            }
            text.push_str(token.as_ref());
        }
        text.push('\n');
    }
    text
}

/// [`TextExtractor`] backed by pdfium-render.
#[derive(Debug, Clone, Default)]
pub struct PdfiumExtractor {
    /// Directory or full path of the pdfium library. `None` → `PDFIUM_LIB_PATH`,
    /// then the system library search path.
    pub library_path: Option<PathBuf>,
}

impl PdfiumExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_library_path(path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(path.into()),
        }
    }

    fn bind(&self) -> Result<Pdfium, ReviewError> {
        let configured = self
            .library_path
            .clone()
            .or_else(|| std::env::var_os(PDFIUM_LIB_PATH_ENV).map(PathBuf::from));

        let bindings = match configured {
            Some(path) => {
                let lib = if path.is_dir() {
                    Pdfium::pdfium_platform_library_name_at_path(&path)
                } else {
                    path
                };
                debug!("Binding pdfium from {}", lib.display());
                Pdfium::bind_to_library(&lib)
            }
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| ReviewError::PdfiumBindingFailed(format!("{e:?}")))?;

        Ok(Pdfium::new(bindings))
    }
}

impl TextExtractor for PdfiumExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<String, ReviewError> {
        if !bytes.starts_with(b"%PDF") {
            return Err(ReviewError::DocumentUnreadable {
                detail: "missing %PDF header".into(),
            });
        }

        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(|e| ReviewError::DocumentUnreadable {
                detail: format!("{e:?}"),
            })?;

        let pages: Vec<Vec<String>> = document
            .pages()
            .iter()
            .map(|page| {
                page.objects()
                    .iter()
                    .filter_map(|object| object.as_text_object().map(|t| t.text()))
                    .collect()
            })
            .collect();

        info!("PDF loaded: {} pages", pages.len());
        Ok(assemble_pages(pages))
    }
}
