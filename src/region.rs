//! Operator-supplied redaction regions.
//!
//! Regions are rectangles in the pixel space of a page rendered at the run's
//! DPI. Internally pages are 0-indexed; everything an operator types or
//! reads (CLI arguments, the regions file, error messages) is 1-indexed.

use crate::error::RedactError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// A rectangle to paint over, in page-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RedactionRegion {
    /// 0-indexed page.
    pub page: usize,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl RedactionRegion {
    pub fn new(page: usize, x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            page,
            x,
            y,
            width,
            height,
        }
    }

    /// Region covering a whole `width × height` page.
    pub fn full_page(page: usize, width: u32, height: u32) -> Self {
        Self::new(page, 0, 0, width, height)
    }

    /// Exclusive right edge, or `None` on overflow.
    pub fn right(&self) -> Option<u32> {
        self.x.checked_add(self.width)
    }

    /// Exclusive bottom edge, or `None` on overflow.
    pub fn bottom(&self) -> Option<u32> {
        self.y.checked_add(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x
            && py >= self.y
            && self.right().is_none_or(|r| px < r)
            && self.bottom().is_none_or(|b| py < b)
    }

    /// Check that the region is non-empty and fits a `width × height` image.
    pub fn check_bounds(&self, width: u32, height: u32) -> Result<(), RedactError> {
        if self.is_empty() {
            return Err(RedactError::InvalidRegion {
                region: self.to_string(),
                reason: "width and height must be at least 1 px".into(),
            });
        }
        let fits = matches!(self.right(), Some(r) if r <= width)
            && matches!(self.bottom(), Some(b) if b <= height);
        if !fits {
            return Err(RedactError::RegionOutOfBounds {
                page: self.page + 1,
                region: self.to_string(),
                bounds: format!("page is {width}x{height} px"),
            });
        }
        Ok(())
    }
}

impl fmt::Display for RedactionRegion {
    /// Same `PAGE:X,Y,W,H` form the CLI accepts, with a 1-indexed page.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{},{},{},{}",
            self.page + 1,
            self.x,
            self.y,
            self.width,
            self.height
        )
    }
}

impl FromStr for RedactionRegion {
    type Err = RedactError;

    /// Parse `PAGE:X,Y,W,H` where `PAGE` is 1-indexed.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| RedactError::InvalidRegion {
            region: s.to_string(),
            reason: reason.to_string(),
        };

        let (page, rect) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| invalid("expected PAGE:X,Y,W,H"))?;
        let page: usize = page
            .trim()
            .parse()
            .map_err(|_| invalid("page must be a positive integer"))?;
        if page < 1 {
            return Err(invalid("pages are 1-indexed, minimum is 1"));
        }

        let parts = rect
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid("X,Y,W,H must be non-negative integers"))?;
        let [x, y, width, height] = parts[..] else {
            return Err(invalid("expected exactly four numbers X,Y,W,H"));
        };

        let region = RedactionRegion::new(page - 1, x, y, width, height);
        if region.is_empty() {
            return Err(invalid("width and height must be at least 1 px"));
        }
        Ok(region)
    }
}

/// On-disk form of a region: identical fields, 1-indexed page.
#[derive(Debug, Deserialize)]
struct RegionEntry {
    page: usize,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

/// Load regions from a JSON array of `{page, x, y, width, height}` objects.
pub fn load_regions_file(path: &Path) -> Result<Vec<RedactionRegion>, RedactError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        RedactError::InvalidConfig(format!(
            "Cannot read regions file '{}': {e}",
            path.display()
        ))
    })?;
    parse_regions_json(&raw)
}

/// Parse the regions-file JSON format.
pub fn parse_regions_json(raw: &str) -> Result<Vec<RedactionRegion>, RedactError> {
    let entries: Vec<RegionEntry> = serde_json::from_str(raw)
        .map_err(|e| RedactError::InvalidConfig(format!("Malformed regions file: {e}")))?;

    entries
        .into_iter()
        .map(|e| {
            if e.page < 1 {
                return Err(RedactError::InvalidRegion {
                    region: format!("{}:{},{},{},{}", e.page, e.x, e.y, e.width, e.height),
                    reason: "pages are 1-indexed, minimum is 1".into(),
                });
            }
            let region = RedactionRegion::new(e.page - 1, e.x, e.y, e.width, e.height);
            if region.is_empty() {
                return Err(RedactError::InvalidRegion {
                    region: region.to_string(),
                    reason: "width and height must be at least 1 px".into(),
                });
            }
            Ok(region)
        })
        .collect()
}

/// Group regions by 0-indexed page, preserving their relative order.
pub fn group_by_page(regions: &[RedactionRegion]) -> BTreeMap<usize, Vec<RedactionRegion>> {
    let mut by_page: BTreeMap<usize, Vec<RedactionRegion>> = BTreeMap::new();
    for r in regions {
        by_page.entry(r.page).or_default().push(*r);
    }
    by_page
}
