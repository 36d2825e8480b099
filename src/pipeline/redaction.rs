//! Burn operator regions into page pixels.
//!
//! A region is replaced by a solid opaque fill, never blurred or pixelated:
//! the original pixel values are gone once the page is written back out.
//! Every region on a page is checked against the page bounds before the
//! first pixel is painted, so a bad region list cannot leave a half-redacted
//! page behind.

use crate::config::FillColor;
use crate::error::RedactError;
use crate::pipeline::PageImage;
use crate::region::RedactionRegion;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use std::path::Path;
use tracing::debug;

/// Paint every region onto `img` and return how many were painted.
///
/// Overlapping or repeated regions are fine: painting is saturating, so the
/// result depends only on the union of the regions.
pub fn paint_regions(
    img: &mut RgbImage,
    regions: &[RedactionRegion],
    fill: FillColor,
) -> Result<usize, RedactError> {
    let (w, h) = img.dimensions();
    for region in regions {
        region.check_bounds(w, h)?;
    }

    let colour = Rgb(fill.0);
    for region in regions {
        // check_bounds guarantees both coordinates fit inside a u32 image, so
        // they fit an i32 as long as the image does.
        let x = i32::try_from(region.x).map_err(|_| oversized(region))?;
        let y = i32::try_from(region.y).map_err(|_| oversized(region))?;
        draw_filled_rect_mut(img, Rect::at(x, y).of_size(region.width, region.height), colour);
    }
    Ok(regions.len())
}

fn oversized(region: &RedactionRegion) -> RedactError {
    RedactError::InvalidRegion {
        region: region.to_string(),
        reason: "coordinates exceed the supported image size".into(),
    }
}

/// Redact one page, writing the result next to it as `page-NNNN-redacted.png`.
///
/// A page with no regions is returned unchanged. Blocking.
pub fn apply_redactions(
    page: &PageImage,
    regions: &[RedactionRegion],
    fill: FillColor,
    out_dir: &Path,
) -> Result<PageImage, RedactError> {
    if regions.is_empty() {
        return Ok(page.clone());
    }
    if let Some(stray) = regions.iter().find(|r| r.page != page.index) {
        return Err(RedactError::Internal(format!(
            "region {} routed to page {}",
            stray,
            page.index + 1
        )));
    }

    let mut img = page.load()?;
    let painted = paint_regions(&mut img, regions, fill)?;
    debug!(page = page.index + 1, regions = painted, "Painted redaction regions");

    PageImage::save(out_dir, page.index, page.dpi, &img, "redacted")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x * 7 % 251) as u8, (y * 11 % 241) as u8, 200]))
    }

    #[test]
    fn inside_filled_outside_untouched() {
        let original = gradient(40, 30);
        let mut img = original.clone();
        let region = RedactionRegion::new(0, 5, 6, 10, 8);
        paint_regions(&mut img, &[region], FillColor::BLACK).unwrap();

        for (x, y, px) in img.enumerate_pixels() {
            if region.contains(x, y) {
                assert_eq!(px, &Rgb([0, 0, 0]), "({x},{y}) not filled");
            } else {
                assert_eq!(px, original.get_pixel(x, y), "({x},{y}) changed");
            }
        }
    }

    #[test]
    fn full_page_region_is_solid() {
        let mut img = gradient(16, 9);
        let region = RedactionRegion::full_page(0, 16, 9);
        paint_regions(&mut img, &[region], FillColor::WHITE).unwrap();
        assert!(img.pixels().all(|p| *p == Rgb([255, 255, 255])));
    }

    #[test]
    fn painting_twice_is_identical() {
        let regions = [
            RedactionRegion::new(0, 0, 0, 5, 5),
            RedactionRegion::new(0, 3, 3, 6, 6),
        ];
        let mut once = gradient(20, 20);
        paint_regions(&mut once, &regions, FillColor::BLACK).unwrap();

        let mut twice = gradient(20, 20);
        paint_regions(&mut twice, &regions, FillColor::BLACK).unwrap();
        paint_regions(&mut twice, &regions, FillColor::BLACK).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn out_of_bounds_paints_nothing() {
        let original = gradient(20, 20);
        let mut img = original.clone();
        let regions = [
            RedactionRegion::new(0, 0, 0, 5, 5),
            RedactionRegion::new(0, 15, 0, 6, 5),
        ];
        let err = paint_regions(&mut img, &regions, FillColor::BLACK).unwrap_err();
        assert!(matches!(err, RedactError::RegionOutOfBounds { page: 1, .. }));
        assert_eq!(img, original);
    }

    #[test]
    fn page_without_regions_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let page = PageImage::save(dir.path(), 0, 150, &gradient(8, 8), "raster").unwrap();
        let out = apply_redactions(&page, &[], FillColor::BLACK, dir.path()).unwrap();
        assert_eq!(out, page);
    }

    #[test]
    fn redacted_page_written_alongside() {
        let dir = tempfile::tempdir().unwrap();
        let page = PageImage::save(dir.path(), 1, 150, &gradient(8, 8), "raster").unwrap();
        let region = RedactionRegion::new(1, 0, 0, 4, 4);
        let out = apply_redactions(&page, &[region], FillColor::BLACK, dir.path()).unwrap();

        assert!(out.path.ends_with("page-0002-redacted.png"));
        assert_eq!((out.index, out.width, out.height), (1, 8, 8));
        let img = out.load().unwrap();
        assert_eq!(img.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(img.get_pixel(7, 7), gradient(8, 8).get_pixel(7, 7));
    }
}
