//! Orchestrator integration tests.
//!
//! The rasterizer is replaced by a fake that paints a known pattern, so
//! these run without pdfium. Reassembly, stripping and inspection use the
//! real lopdf backends unless a test swaps one out.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use flate2::read::ZlibDecoder;
use image::{Rgb, RgbImage};
use pdf_redact::{
    Delivery, FillColor, MetadataInspector, PageImage, Pipeline, PipelineState, RasterRequest,
    Rasterizer, RedactError, RedactionConfig, RedactionProgressCallback, RedactionRegion,
    RunInput, Stage,
};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A file that passes input validation. Its body is never parsed.
fn fake_pdf(dir: &Path) -> PathBuf {
    let p = dir.join("source.pdf");
    std::fs::write(&p, b"%PDF-1.4\n% stand-in source\n").unwrap();
    p
}

fn pattern(w: u32, h: u32, seed: u32) -> RgbImage {
    RgbImage::from_fn(w, h, |x, y| {
        Rgb([((x * 3 + seed) % 256) as u8, ((y * 5) % 256) as u8, 128])
    })
}

/// Paints `pattern(w, h, index)` for every page.
struct FakeRasterizer {
    sizes: Vec<(u32, u32)>,
    fail_page: Option<usize>,
    delay: Duration,
}

impl FakeRasterizer {
    fn pages(n: usize, w: u32, h: u32) -> Self {
        Self {
            sizes: vec![(w, h); n],
            fail_page: None,
            delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl Rasterizer for FakeRasterizer {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn rasterize(&self, req: RasterRequest<'_>) -> Result<Vec<PageImage>, RedactError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut pages = Vec::new();
        for (i, &(w, h)) in self.sizes.iter().enumerate() {
            if self.fail_page == Some(i) {
                return Err(RedactError::PartialRender {
                    page: i + 1,
                    detail: "injected failure".into(),
                });
            }
            pages.push(PageImage::save(req.out_dir, i, req.dpi, &pattern(w, h, i as u32), "raster")?);
        }
        Ok(pages)
    }
}

/// Parks a blocking-pool thread far past any budget, like a page that hangs
/// inside pdfium.
struct HangingRasterizer {
    hang: Duration,
}

#[async_trait]
impl Rasterizer for HangingRasterizer {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn rasterize(&self, _req: RasterRequest<'_>) -> Result<Vec<PageImage>, RedactError> {
        let hang = self.hang;
        tokio::task::spawn_blocking(move || std::thread::sleep(hang))
            .await
            .map_err(|e| RedactError::Internal(e.to_string()))?;
        Ok(Vec::new())
    }
}

/// Always reports the same fields, as if stripping had missed them.
struct StubbornInspector;

#[async_trait]
impl MetadataInspector for StubbornInspector {
    fn name(&self) -> &'static str {
        "stubborn"
    }

    async fn inspect(&self, _document: &[u8]) -> Result<BTreeSet<String>, RedactError> {
        Ok(["Info/Author".to_string()].into_iter().collect())
    }
}

#[derive(Default)]
struct Recorder {
    states: Mutex<Vec<PipelineState>>,
    redacted: AtomicUsize,
    failure: Mutex<Option<String>>,
}

impl RedactionProgressCallback for Recorder {
    fn on_state_change(&self, _from: PipelineState, to: PipelineState) {
        self.states.lock().unwrap().push(to);
    }

    fn on_page_redacted(&self, _page: usize, _total: usize, _regions: usize) {
        self.redacted.fetch_add(1, Ordering::SeqCst);
    }

    fn on_run_failed(&self, error: &str) {
        *self.failure.lock().unwrap() = Some(error.to_string());
    }
}

fn config(scratch: &Path) -> RedactionConfig {
    RedactionConfig::builder()
        .dpi(72)
        .scratch_dir(scratch)
        .tool_timeout_secs(10)
        .build()
        .unwrap()
}

fn pipeline(config: RedactionConfig, rasterizer: FakeRasterizer) -> Pipeline {
    Pipeline::new(config).with_rasterizer(Arc::new(rasterizer))
}

fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

/// Width, height and raw RGB bytes of the image drawn on a 1-indexed page.
fn page_pixels(pdf: &[u8], page_no: u32) -> (u32, u32, Vec<u8>) {
    let doc = lopdf::Document::load_mem(pdf).unwrap();
    let page_id = doc.get_pages()[&page_no];
    let page = doc.get_dictionary(page_id).unwrap();
    let resources = page.get(b"Resources").unwrap().as_dict().unwrap();
    let xobjects = resources.get(b"XObject").unwrap().as_dict().unwrap();
    let image_id = xobjects.get(b"Im0").unwrap().as_reference().unwrap();
    let stream = doc.get_object(image_id).unwrap().as_stream().unwrap();
    let w = stream.dict.get(b"Width").unwrap().as_i64().unwrap() as u32;
    let h = stream.dict.get(b"Height").unwrap().as_i64().unwrap() as u32;
    let mut raw = Vec::new();
    ZlibDecoder::new(&stream.content[..])
        .read_to_end(&mut raw)
        .unwrap();
    (w, h, raw)
}

// ── Happy paths ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn three_pages_without_regions() {
    init_tracing();
    let work = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let src = fake_pdf(work.path());
    let out = work.path().join("source-final.pdf");

    let doc = pipeline(config(scratch.path()), FakeRasterizer::pages(3, 60, 80))
        .run(&RunInput::Pdf(src.clone()), &[], &Delivery::File(out.clone()))
        .await
        .expect("run should succeed");

    let written = std::fs::read(&out).unwrap();
    assert_eq!(written, doc.bytes);
    let parsed = lopdf::Document::load_mem(&written).unwrap();
    assert_eq!(parsed.get_pages().len(), 3);

    for page_no in 1..=3u32 {
        let (w, h, raw) = page_pixels(&written, page_no);
        assert_eq!((w, h), (60, 80));
        assert_eq!(raw, pattern(60, 80, page_no - 1).into_raw(), "page {page_no} out of order");
    }

    assert_eq!(doc.report.page_count, 3);
    assert_eq!(doc.report.redacted_pages, 0);
    assert_eq!(doc.report.output_path.as_deref(), Some(out.as_path()));
    assert_eq!(
        doc.report.states,
        vec![
            PipelineState::Created,
            PipelineState::Rasterizing,
            PipelineState::Reassembling,
            PipelineState::Scrubbing,
            PipelineState::Verified,
            PipelineState::Delivered,
        ]
    );

    let residual = pdf_redact::pipeline::scrub::LopdfInspector
        .inspect(&written)
        .await
        .unwrap();
    assert!(residual.is_empty(), "residual: {residual:?}");

    assert_eq!(std::fs::read(&src).unwrap(), b"%PDF-1.4\n% stand-in source\n");
    assert!(is_empty_dir(scratch.path()), "working area left behind");
}

#[tokio::test]
async fn full_page_region_gives_solid_page() {
    let work = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let src = fake_pdf(work.path());

    let cfg = RedactionConfig::builder()
        .dpi(72)
        .scratch_dir(scratch.path())
        .fill(FillColor([12, 200, 34]))
        .build()
        .unwrap();
    let doc = pipeline(cfg, FakeRasterizer::pages(1, 50, 40))
        .run(
            &RunInput::Pdf(src),
            &[RedactionRegion::full_page(0, 50, 40)],
            &Delivery::Memory,
        )
        .await
        .unwrap();

    let (_, _, raw) = page_pixels(&doc.bytes, 1);
    assert!(raw.chunks(3).all(|px| px == [12, 200, 34]));
    assert_eq!(doc.report.redacted_pages, 1);
    assert_eq!(doc.report.output_path, None);
}

#[tokio::test]
async fn region_pixels_filled_and_rest_untouched() {
    let work = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let src = fake_pdf(work.path());
    let region = RedactionRegion::new(1, 10, 5, 20, 15);

    let doc = pipeline(config(scratch.path()), FakeRasterizer::pages(2, 64, 48))
        .run(&RunInput::Pdf(src), &[region], &Delivery::Memory)
        .await
        .unwrap();

    let (_, _, untouched) = page_pixels(&doc.bytes, 1);
    assert_eq!(untouched, pattern(64, 48, 0).into_raw());

    let (w, h, raw) = page_pixels(&doc.bytes, 2);
    let image = RgbImage::from_raw(w, h, raw).unwrap();
    let original = pattern(64, 48, 1);
    for (x, y, px) in image.enumerate_pixels() {
        if region.contains(x, y) {
            assert_eq!(px, &Rgb([0, 0, 0]));
        } else {
            assert_eq!(px, original.get_pixel(x, y));
        }
    }
}

#[tokio::test]
async fn repeated_regions_are_byte_identical() {
    let work = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let src = fake_pdf(work.path());
    let r = RedactionRegion::new(0, 3, 3, 10, 10);

    let run = |regions: Vec<RedactionRegion>| {
        let p = pipeline(config(scratch.path()), FakeRasterizer::pages(2, 40, 40));
        let src = src.clone();
        async move {
            p.run(&RunInput::Pdf(src), &regions, &Delivery::Memory)
                .await
                .unwrap()
                .bytes
        }
    };

    let once = run(vec![r]).await;
    let again = run(vec![r]).await;
    let doubled = run(vec![r, r]).await;
    assert_eq!(once, again);
    assert_eq!(once, doubled);
}

#[tokio::test]
async fn progress_callback_sees_every_transition() {
    let work = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let src = fake_pdf(work.path());
    let recorder = Arc::new(Recorder::default());

    let cfg = RedactionConfig::builder()
        .dpi(72)
        .scratch_dir(scratch.path())
        .concurrency(2)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let regions = [
        RedactionRegion::new(0, 0, 0, 5, 5),
        RedactionRegion::new(2, 0, 0, 5, 5),
        RedactionRegion::new(3, 1, 1, 5, 5),
    ];
    pipeline(cfg, FakeRasterizer::pages(4, 30, 30))
        .run(&RunInput::Pdf(src), &regions, &Delivery::Memory)
        .await
        .unwrap();

    assert_eq!(
        *recorder.states.lock().unwrap(),
        vec![
            PipelineState::Rasterizing,
            PipelineState::Redacting,
            PipelineState::Reassembling,
            PipelineState::Scrubbing,
            PipelineState::Verified,
            PipelineState::Delivered,
        ]
    );
    assert_eq!(recorder.redacted.load(Ordering::SeqCst), 3);
    assert!(recorder.failure.lock().unwrap().is_none());
}

// ── Fail-closed behaviour ────────────────────────────────────────────────────

#[tokio::test]
async fn out_of_bounds_region_leaves_no_output() {
    let work = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let src = fake_pdf(work.path());
    let out = work.path().join("out.pdf");

    let err = pipeline(config(scratch.path()), FakeRasterizer::pages(1, 100, 100))
        .run(
            &RunInput::Pdf(src),
            &[RedactionRegion::new(0, 90, 0, 20, 10)],
            &Delivery::File(out.clone()),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RedactError::RegionOutOfBounds { page: 1, .. }), "{err:?}");
    assert_eq!(err.exit_code(), 4);
    assert!(!out.exists());
    assert!(is_empty_dir(scratch.path()));
}

#[tokio::test]
async fn region_on_missing_page_rejected() {
    let work = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let src = fake_pdf(work.path());

    let err = pipeline(config(scratch.path()), FakeRasterizer::pages(2, 10, 10))
        .run(
            &RunInput::Pdf(src),
            &[RedactionRegion::new(5, 0, 0, 1, 1)],
            &Delivery::Memory,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RedactError::RegionOutOfBounds { page: 6, .. }), "{err:?}");
}

#[tokio::test]
async fn residual_metadata_blocks_delivery() {
    let work = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let src = fake_pdf(work.path());
    let out = work.path().join("out.pdf");
    let recorder = Arc::new(Recorder::default());

    let cfg = RedactionConfig::builder()
        .dpi(72)
        .scratch_dir(scratch.path())
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let err = pipeline(cfg, FakeRasterizer::pages(1, 20, 20))
        .with_inspector(Arc::new(StubbornInspector))
        .run(&RunInput::Pdf(src), &[], &Delivery::File(out.clone()))
        .await
        .unwrap_err();

    match &err {
        RedactError::ResidualMetadata { fields } => assert_eq!(fields, &["Info/Author"]),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.exit_code(), 11);
    assert!(!out.exists());
    assert!(is_empty_dir(scratch.path()));

    let states = recorder.states.lock().unwrap().clone();
    assert_eq!(states.last(), Some(&PipelineState::Failed));
    assert!(!states.contains(&PipelineState::Verified));
    assert!(recorder.failure.lock().unwrap().is_some());
}

#[tokio::test]
async fn page_render_failure_aborts_run() {
    let work = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let src = fake_pdf(work.path());
    let out = work.path().join("out.pdf");

    let rasterizer = FakeRasterizer {
        fail_page: Some(2),
        ..FakeRasterizer::pages(4, 20, 20)
    };
    let err = pipeline(config(scratch.path()), rasterizer)
        .run(&RunInput::Pdf(src), &[], &Delivery::File(out.clone()))
        .await
        .unwrap_err();

    assert!(matches!(err, RedactError::PartialRender { page: 3, .. }), "{err:?}");
    assert_eq!(err.exit_code(), 3);
    assert!(!out.exists());
    assert!(is_empty_dir(scratch.path()), "working area left behind");
}

#[tokio::test]
async fn slow_collaborator_times_out() {
    let work = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let src = fake_pdf(work.path());

    let cfg = RedactionConfig::builder()
        .scratch_dir(scratch.path())
        .tool_timeout_secs(1)
        .build()
        .unwrap();
    let rasterizer = FakeRasterizer {
        delay: Duration::from_secs(30),
        ..FakeRasterizer::pages(1, 10, 10)
    };

    let start = Instant::now();
    let err = pipeline(cfg, rasterizer)
        .run(&RunInput::Pdf(src), &[], &Delivery::Memory)
        .await
        .unwrap_err();

    assert!(
        matches!(err, RedactError::Timeout { stage: Stage::Rasterize, secs: 1 }),
        "{err:?}"
    );
    assert_eq!(err.exit_code(), 6);
    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(is_empty_dir(scratch.path()));
}

#[test]
fn hung_blocking_render_does_not_hold_the_caller() {
    let work = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let src = fake_pdf(work.path());

    let cfg = RedactionConfig::builder()
        .scratch_dir(scratch.path())
        .tool_timeout_secs(1)
        .build()
        .unwrap();
    let pipeline = Pipeline::new(cfg).with_rasterizer(Arc::new(HangingRasterizer {
        hang: Duration::from_secs(20),
    }));

    let start = Instant::now();
    let result = pdf_redact::block_on_detached(pipeline.run(
        &RunInput::Pdf(src),
        &[],
        &Delivery::Memory,
    ))
    .unwrap();
    let elapsed = start.elapsed();

    let err = result.unwrap_err();
    assert!(
        matches!(err, RedactError::Timeout { stage: Stage::Rasterize, secs: 1 }),
        "{err:?}"
    );
    assert!(elapsed < Duration::from_secs(8), "caller held for {elapsed:?}");
    assert!(is_empty_dir(scratch.path()));
}

#[tokio::test]
async fn refuses_to_overwrite_source() {
    let work = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let src = fake_pdf(work.path());

    let err = pipeline(config(scratch.path()), FakeRasterizer::pages(1, 10, 10))
        .run(
            &RunInput::Pdf(src.clone()),
            &[],
            &Delivery::File(work.path().join(".").join("source.pdf")),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RedactError::SourceIsOutput { .. }), "{err:?}");
    assert_eq!(std::fs::read(&src).unwrap(), b"%PDF-1.4\n% stand-in source\n");
}

#[tokio::test]
async fn non_pdf_input_rejected_before_rendering() {
    let work = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let src = work.path().join("notes.pdf");
    std::fs::write(&src, b"PK\x03\x04 zip archive").unwrap();

    let err = pipeline(config(scratch.path()), FakeRasterizer::pages(1, 10, 10))
        .run(&RunInput::Pdf(src), &[], &Delivery::Memory)
        .await
        .unwrap_err();
    assert!(matches!(err, RedactError::NotAPdf { .. }), "{err:?}");
    assert_eq!(err.exit_code(), 2);
}

// ── Explode / merge / inspect ────────────────────────────────────────────────

#[tokio::test]
async fn explode_then_merge_round_trip() {
    let work = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let src = fake_pdf(work.path());
    let pages_dir = work.path().join("source_pages");

    let exploded = pipeline(config(scratch.path()), FakeRasterizer::pages(3, 24, 16))
        .explode(&src, &[RedactionRegion::new(0, 0, 0, 4, 4)], &pages_dir)
        .await
        .unwrap();
    assert_eq!(exploded.pages.len(), 3);
    assert_eq!(exploded.redacted_pages, 1);
    assert!(pages_dir.join("page-0001.png").is_file());
    assert!(pages_dir.join("page-0003.png").is_file());

    let out = work.path().join("merged.pdf");
    let merged = Pipeline::new(config(scratch.path()))
        .run(&RunInput::PageImages(pages_dir), &[], &Delivery::File(out.clone()))
        .await
        .unwrap();
    assert_eq!(merged.report.page_count, 3);

    let (w, h, raw) = page_pixels(&std::fs::read(&out).unwrap(), 1);
    let first = RgbImage::from_raw(w, h, raw).unwrap();
    assert_eq!(first.get_pixel(0, 0), &Rgb([0, 0, 0]));
    assert_eq!(first.get_pixel(10, 10), pattern(24, 16, 0).get_pixel(10, 10));
    assert!(is_empty_dir(scratch.path()));
}

#[tokio::test]
async fn inspect_reports_source_metadata() {
    use lopdf::{dictionary, Document, Object, StringFormat};

    let work = tempfile::tempdir().unwrap();
    let src = work.path().join("tagged.pdf");

    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! { "Type" => "Pages", "Kids" => Vec::<Object>::new(), "Count" => 0 }),
    );
    let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    let info = doc.add_object(dictionary! {
        "Title" => Object::String(b"Draft".to_vec(), StringFormat::Literal),
    });
    doc.trailer.set("Root", catalog);
    doc.trailer.set("Info", info);
    doc.save(&src).unwrap();

    let report = Pipeline::new(RedactionConfig::default())
        .inspect(&src)
        .await
        .unwrap();
    assert_eq!(report.inspector, "lopdf");
    assert_eq!(report.fields, vec!["Info/Title".to_string()]);
    assert!(!report.is_clean());
}
