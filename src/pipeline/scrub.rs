//! Metadata scrubbing: strip, then verify.
//!
//! [`LopdfScrubber`] removes every document-level metadata carrier lopdf can
//! see. An inspector then re-reads the stripped bytes; the orchestrator
//! refuses to deliver if it reports anything at all.
//!
//! Two inspectors are provided:
//! - [`LopdfInspector`] walks the object graph in-process.
//! - [`ExiftoolInspector`] asks `exiftool`, which knows far more metadata
//!   dialects than we do, for every PDF and XMP tag it can find.

use crate::error::RedactError;
use crate::pipeline::state::Stage;
use crate::pipeline::tool::run_tool;
use crate::pipeline::{MetadataInspector, MetadataStripper};
use async_trait::async_trait;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};

/// Keys that carry authoring history on the catalog and on pages.
const HISTORY_KEYS: &[&[u8]] = &[b"Metadata", b"PieceInfo", b"LastModified"];

/// exiftool tags that describe file structure rather than authorship.
const STRUCTURAL_TAGS: &[&str] = &["PDFVersion", "Linearized", "PageCount"];

fn parse(document: &[u8]) -> Result<Document, RedactError> {
    Document::load_mem(document).map_err(|e| RedactError::ToolFailed {
        tool: "lopdf".into(),
        status: "parse error".into(),
        stderr: e.to_string(),
    })
}

fn serialise(doc: &mut Document) -> Result<Vec<u8>, RedactError> {
    let mut out = Vec::new();
    doc.save_to(&mut out).map_err(|e| RedactError::ToolFailed {
        tool: "lopdf".into(),
        status: "write error".into(),
        stderr: e.to_string(),
    })?;
    Ok(out)
}

fn dict_of(obj: &Object) -> Option<&Dictionary> {
    match obj {
        Object::Dictionary(d) => Some(d),
        Object::Stream(s) => Some(&s.dict),
        _ => None,
    }
}

fn dict_of_mut(obj: &mut Object) -> Option<&mut Dictionary> {
    match obj {
        Object::Dictionary(d) => Some(d),
        Object::Stream(s) => Some(&mut s.dict),
        _ => None,
    }
}

fn is_metadata_object(obj: &Object) -> bool {
    dict_of(obj).is_some_and(|d| matches!(d.get(b"Type"), Ok(Object::Name(n)) if n == b"Metadata"))
}

fn catalog_id(doc: &Document) -> Option<ObjectId> {
    match doc.trailer.get(b"Root") {
        Ok(Object::Reference(id)) => Some(*id),
        _ => None,
    }
}

fn key_name(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

// ── Strip ────────────────────────────────────────────────────────────────

/// Removes document metadata with lopdf.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfScrubber;

#[async_trait]
impl MetadataStripper for LopdfScrubber {
    async fn strip(&self, document: &[u8]) -> Result<Vec<u8>, RedactError> {
        let bytes = document.to_vec();
        tokio::task::spawn_blocking(move || strip_blocking(&bytes))
            .await
            .map_err(|e| RedactError::Internal(format!("Strip task panicked: {}", e)))?
    }
}

fn strip_blocking(document: &[u8]) -> Result<Vec<u8>, RedactError> {
    let mut doc = parse(document)?;
    let mut removed = 0usize;

    if let Some(Object::Reference(info_id)) = doc.trailer.remove(b"Info") {
        doc.objects.remove(&info_id);
        removed += 1;
    }
    if doc.trailer.remove(b"ID").is_some() {
        removed += 1;
    }

    let mut holders: Vec<ObjectId> = doc.get_pages().into_values().collect();
    holders.extend(catalog_id(&doc));
    for id in holders {
        if let Some(dict) = doc.objects.get_mut(&id).and_then(dict_of_mut) {
            for key in HISTORY_KEYS {
                if dict.remove(key).is_some() {
                    removed += 1;
                }
            }
        }
    }

    let metadata_ids: Vec<ObjectId> = doc
        .objects
        .iter()
        .filter(|(_, obj)| is_metadata_object(obj))
        .map(|(id, _)| *id)
        .collect();
    for id in &metadata_ids {
        doc.objects.remove(id);
        removed += 1;
    }
    // Drop references left dangling by the removal, wherever they hang.
    for obj in doc.objects.values_mut() {
        if let Some(dict) = dict_of_mut(obj) {
            if matches!(dict.get(b"Metadata"), Ok(Object::Reference(id)) if metadata_ids.contains(id)) {
                dict.remove(b"Metadata");
            }
        }
    }

    let pruned = doc.prune_objects();
    debug!(removed, pruned = pruned.len(), "Stripped document metadata");

    serialise(&mut doc)
}

// ── Inspect ──────────────────────────────────────────────────────────────

/// Lists metadata carriers by walking the lopdf object graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfInspector;

#[async_trait]
impl MetadataInspector for LopdfInspector {
    fn name(&self) -> &'static str {
        "lopdf"
    }

    async fn inspect(&self, document: &[u8]) -> Result<BTreeSet<String>, RedactError> {
        let bytes = document.to_vec();
        tokio::task::spawn_blocking(move || inspect_blocking(&bytes))
            .await
            .map_err(|e| RedactError::Internal(format!("Inspect task panicked: {}", e)))?
    }
}

fn inspect_blocking(document: &[u8]) -> Result<BTreeSet<String>, RedactError> {
    let doc = parse(document)?;
    let mut fields = BTreeSet::new();

    let info = match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) => doc.get_object(*id).ok().and_then(dict_of),
        Ok(obj) => dict_of(obj),
        Err(_) => None,
    };
    if let Some(info) = info {
        if info.is_empty() {
            fields.insert("Info".to_string());
        }
        for (key, _) in info.iter() {
            fields.insert(format!("Info/{}", key_name(key)));
        }
    } else if doc.trailer.has(b"Info") {
        fields.insert("Info".to_string());
    }

    if doc.trailer.has(b"ID") {
        fields.insert("Trailer/ID".to_string());
    }

    if let Some(catalog) = catalog_id(&doc).and_then(|id| doc.get_object(id).ok()).and_then(dict_of) {
        for key in HISTORY_KEYS {
            if catalog.has(key) {
                fields.insert(format!("Catalog/{}", key_name(key)));
            }
        }
    }

    for (number, id) in doc.get_pages() {
        if let Some(page) = doc.get_object(id).ok().and_then(dict_of) {
            for key in HISTORY_KEYS {
                if page.has(key) {
                    fields.insert(format!("Page {}/{}", number, key_name(key)));
                }
            }
        }
    }

    for (id, obj) in &doc.objects {
        if is_metadata_object(obj) {
            fields.insert(format!("Object {}/Metadata", id.0));
        }
    }

    debug!(count = fields.len(), "lopdf inspection finished");
    Ok(fields)
}

/// Lists metadata by running `exiftool -j -G1 -PDF:all -XMP:all -`.
#[derive(Debug, Clone)]
pub struct ExiftoolInspector {
    program: String,
    timeout: Duration,
}

impl ExiftoolInspector {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: "exiftool".to_string(),
            timeout,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl MetadataInspector for ExiftoolInspector {
    fn name(&self) -> &'static str {
        "exiftool"
    }

    async fn inspect(&self, document: &[u8]) -> Result<BTreeSet<String>, RedactError> {
        let output = run_tool(
            &self.program,
            ["-j", "-G1", "-PDF:all", "-XMP:all", "-"],
            Some(document.to_vec()),
            self.timeout,
            Stage::Inspect,
        )
        .await?;
        let fields = parse_exiftool_json(&self.program, &output.stdout)?;
        info!("{} reported {} metadata field(s)", self.program, fields.len());
        Ok(fields)
    }
}

/// Extract tag names from exiftool's `-j -G1` output, dropping structural tags.
///
/// Anything short of a clean parse is a failure: `ExifTool:Error` fails the
/// call, `ExifTool:Warning` is reported as a field, and output that is not a
/// non-empty array of records fails.
fn parse_exiftool_json(tool: &str, stdout: &[u8]) -> Result<BTreeSet<String>, RedactError> {
    let failed = |status: &str, detail: String| RedactError::ToolFailed {
        tool: tool.to_string(),
        status: status.to_string(),
        stderr: detail,
    };

    let value: serde_json::Value = serde_json::from_slice(stdout)
        .map_err(|e| failed("unparseable output", e.to_string()))?;
    let records = match value.as_array() {
        Some(records) if !records.is_empty() => records,
        Some(_) => return Err(failed("no records", "exiftool returned an empty array".into())),
        None => return Err(failed("unexpected output", "expected a JSON array of records".into())),
    };

    let mut fields = BTreeSet::new();
    for record in records {
        let tags = record
            .as_object()
            .ok_or_else(|| failed("unexpected output", format!("record is not an object: {record}")))?;
        if let Some(error) = tags.get("ExifTool:Error") {
            return Err(failed("error", error.to_string()));
        }
        for key in tags.keys() {
            let (group, tag) = key.split_once(':').unwrap_or(("", key.as_str()));
            if key == "SourceFile" || STRUCTURAL_TAGS.contains(&tag) {
                continue;
            }
            if group == "ExifTool" && tag != "Warning" {
                continue;
            }
            fields.insert(key.clone());
        }
    }
    Ok(fields)
}
