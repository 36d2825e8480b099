//! Input resolution: validate the untrusted source before anything touches it.
//!
//! The source is only ever opened read-only and only by the rasterizer.
//! Validation here is cheap and early: existence, read permission and the
//! `%PDF-` header, so an obviously wrong input fails before a working area
//! is created or a renderer is loaded.

use crate::error::RedactError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Bytes searched for the PDF header. Readers accept leading garbage up to here.
const HEADER_WINDOW: usize = 1024;

/// Image extensions accepted in merge mode.
const PAGE_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// A validated, untrusted input document.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    path: PathBuf,
}

impl SourceDocument {
    /// Validate `path` as a readable PDF.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RedactError> {
        let path = path.as_ref().to_path_buf();

        if !path.is_file() {
            return Err(RedactError::FileNotFound { path });
        }

        let mut f = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(RedactError::PermissionDenied { path });
            }
            Err(_) => return Err(RedactError::FileNotFound { path }),
        };

        let mut head = Vec::with_capacity(HEADER_WINDOW);
        f.by_ref()
            .take(HEADER_WINDOW as u64)
            .read_to_end(&mut head)
            .map_err(|e| RedactError::UnsupportedDocument {
                path: path.clone(),
                detail: format!("cannot read header: {e}"),
            })?;

        if !has_pdf_header(&head) {
            let mut magic = [0u8; 4];
            let n = head.len().min(4);
            magic[..n].copy_from_slice(&head[..n]);
            return Err(RedactError::NotAPdf { path, magic });
        }

        debug!("Resolved source PDF: {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File stem used to derive default output names.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string())
    }

    /// `<stem>-final.pdf` beside the source.
    pub fn default_output_path(&self) -> PathBuf {
        self.path.with_file_name(format!("{}-final.pdf", self.stem()))
    }

    /// `<stem>_pages/` beside the source.
    pub fn default_pages_dir(&self) -> PathBuf {
        self.path.with_file_name(format!("{}_pages", self.stem()))
    }
}

fn has_pdf_header(head: &[u8]) -> bool {
    head.windows(5).any(|w| w == b"%PDF-")
}

/// List the page images in `dir`, sorted by file name.
///
/// Used in merge mode, where an operator has edited exploded pages by hand.
/// Names are compared as strings, so `page-0002.png` sorts before
/// `page-0010.png` as long as they are zero-padded the way explode writes them.
pub fn collect_page_images(dir: &Path) -> Result<Vec<PathBuf>, RedactError> {
    if !dir.is_dir() {
        return Err(RedactError::FileNotFound {
            path: dir.to_path_buf(),
        });
    }

    let entries = std::fs::read_dir(dir).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            RedactError::PermissionDenied {
                path: dir.to_path_buf(),
            }
        } else {
            RedactError::UnsupportedDocument {
                path: dir.to_path_buf(),
                detail: e.to_string(),
            }
        }
    })?;

    let mut pages: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| PAGE_IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    pages.sort();

    if pages.is_empty() {
        return Err(RedactError::UnsupportedDocument {
            path: dir.to_path_buf(),
            detail: "directory contains no .png or .jpg page images".into(),
        });
    }
    debug!("Found {} page images in {}", pages.len(), dir.display());
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_found() {
        let err = SourceDocument::open("/definitely/not/a/real/file.pdf").unwrap_err();
        assert!(matches!(err, RedactError::FileNotFound { .. }));
    }

    #[test]
    fn non_pdf_is_rejected_with_magic() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x.pdf");
        std::fs::write(&p, b"PK\x03\x04zipzip").unwrap();
        match SourceDocument::open(&p).unwrap_err() {
            RedactError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn header_after_leading_garbage_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x.pdf");
        let mut bytes = vec![b' '; 100];
        bytes.extend_from_slice(b"%PDF-1.7\n");
        std::fs::write(&p, bytes).unwrap();
        assert!(SourceDocument::open(&p).is_ok());
    }

    #[test]
    fn default_paths_sit_beside_source() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("leak.pdf");
        std::fs::write(&p, b"%PDF-1.4\n").unwrap();
        let src = SourceDocument::open(&p).unwrap();
        assert_eq!(src.default_output_path(), dir.path().join("leak-final.pdf"));
        assert_eq!(src.default_pages_dir(), dir.path().join("leak_pages"));
    }

    #[test]
    fn page_images_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["page-0002.png", "page-0001.PNG", "notes.txt", "page-0010.jpg"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let pages = collect_page_images(dir.path()).unwrap();
        let names: Vec<_> = pages
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["page-0001.PNG", "page-0002.png", "page-0010.jpg"]);
    }

    #[test]
    fn empty_page_dir_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let err = collect_page_images(dir.path()).unwrap_err();
        assert!(matches!(err, RedactError::UnsupportedDocument { .. }));
    }
}
