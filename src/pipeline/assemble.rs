//! Document reassembly: page images → a brand-new PDF.
//!
//! The output is built from scratch with `lopdf` rather than by editing the
//! source, so nothing from the original file can ride along. Each page
//! holds exactly one Flate-compressed DeviceRGB image drawn over the full
//! MediaBox. There is no Info dictionary and no document ID, and the writer
//! emits no timestamps, so identical pixels produce identical bytes.

use crate::error::RedactError;
use crate::pipeline::{Compositor, PageImage};
use async_trait::async_trait;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::io::Write;
use tracing::{debug, info};

const PDF_VERSION: &str = "1.5";
const IMAGE_NAME: &str = "Im0";

/// Builds the output PDF with `lopdf`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfCompositor;

#[async_trait]
impl Compositor for LopdfCompositor {
    async fn composite(&self, pages: &[PageImage]) -> Result<Vec<u8>, RedactError> {
        validate_sequence(pages)?;
        let pages = pages.to_vec();
        tokio::task::spawn_blocking(move || compose_blocking(&pages))
            .await
            .map_err(|e| RedactError::Internal(format!("Reassembly task panicked: {}", e)))?
    }
}

/// Check that `pages` is non-empty and indexed exactly `0..n` in order.
pub fn validate_sequence(pages: &[PageImage]) -> Result<(), RedactError> {
    if pages.is_empty() {
        return Err(RedactError::Reassembly("no pages to assemble".into()));
    }
    for (expected, page) in pages.iter().enumerate() {
        if page.index != expected {
            let problem = if page.index < expected {
                "duplicate"
            } else {
                "missing"
            };
            return Err(RedactError::Reassembly(format!(
                "page sequence broken at position {}: found page {} ({} page)",
                expected + 1,
                page.index + 1,
                problem
            )));
        }
        if page.dpi == 0 || page.width == 0 || page.height == 0 {
            return Err(RedactError::Reassembly(format!(
                "page {} has a degenerate size {}x{} at {} DPI",
                page.index + 1,
                page.width,
                page.height,
                page.dpi
            )));
        }
    }
    Ok(())
}

fn compose_blocking(pages: &[PageImage]) -> Result<Vec<u8>, RedactError> {
    let mut doc = Document::with_version(PDF_VERSION);
    let pages_id = doc.new_object_id();

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for page in pages {
        let page_id = add_page(&mut doc, pages_id, page)?;
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| RedactError::Reassembly(format!("cannot serialise document: {}", e)))?;
    info!("Assembled {} pages into {} bytes", pages.len(), out.len());
    Ok(out)
}

fn add_page(doc: &mut Document, parent: ObjectId, page: &PageImage) -> Result<ObjectId, RedactError> {
    let pixels = page.load()?;
    let raw = pixels.into_raw();

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw).map_err(|e| reassembly_err(page, e))?;
    let compressed = encoder.finish().map_err(|e| reassembly_err(page, e))?;

    let image = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => page.width as i64,
            "Height" => page.height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8i64,
            "Filter" => "FlateDecode",
        },
        compressed,
    )
    .with_compression(false);
    let image_id = doc.add_object(image);

    let (w_pt, h_pt) = (page.width_pt(), page.height_pt());
    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    w_pt.into(),
                    Object::Integer(0),
                    Object::Integer(0),
                    h_pt.into(),
                    Object::Integer(0),
                    Object::Integer(0),
                ],
            ),
            Operation::new("Do", vec![Object::Name(IMAGE_NAME.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_bytes = content
        .encode()
        .map_err(|e| RedactError::Reassembly(format!("page {}: {}", page.index + 1, e)))?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, content_bytes));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => parent,
        "MediaBox" => vec![Object::Integer(0), Object::Integer(0), w_pt.into(), h_pt.into()],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! {
                IMAGE_NAME => image_id,
            },
        },
    });

    debug!(
        page = page.index + 1,
        width_pt = w_pt,
        height_pt = h_pt,
        "Added page to output"
    );
    Ok(page_id)
}

fn reassembly_err(page: &PageImage, e: std::io::Error) -> RedactError {
    RedactError::Reassembly(format!("page {}: cannot compress image: {}", page.index + 1, e))
}
