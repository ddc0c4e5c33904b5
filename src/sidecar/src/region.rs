use log::debug;
use thiserror::Error;

use crate::variant::{VariantMeta, VariantMetaError};

#[derive(Error, Debug)]
pub enum RegionError {
    #[error("Region '{spec}' is malformed; expected 'chrom:start-end'")]
    Malformed{spec: String},

    #[error("Region '{spec}' has a non-numeric or negative bound '{value}'")]
    BadBound{spec: String, value: String},

    #[error(transparent)]
    Meta(#[from] VariantMetaError),
}

/// Half-open variant-index interval `[start, end)`; the shared unit of all
/// range-restricted scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantRange {
    pub start: u32,
    pub end: u32,
}

impl VariantRange {
    /// The full `[0, variant_ct)` range.
    #[inline]
    pub fn full(variant_ct: u32) -> Self {
        Self{start: 0, end: variant_ct}
    }

    #[inline]
    pub fn empty() -> Self {
        Self{start: 0, end: 0}
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    #[inline]
    pub fn contains(&self, vidx: u32) -> bool {
        vidx >= self.start && vidx < self.end
    }
}

/// Resolve a 1-based inclusive `chrom:start-end` region against the variant
/// index.
///
/// Relies on the sidecar ordering contract: equal-chrom variants form one
/// contiguous block, position-sorted within it, so the scan stops as soon as
/// the block is passed. An unmatched region resolves to the empty range.
///
/// # Errors
/// `Malformed`/`BadBound` on bad syntax; metadata errors pass through.
pub fn parse_region(meta: &VariantMeta, spec: &str) -> Result<VariantRange, RegionError> {
    let malformed = || RegionError::Malformed{spec: spec.to_string()};
    let (chrom, bounds) = spec.split_once(':').ok_or_else(malformed)?;
    let (start_text, end_text) = bounds.split_once('-').ok_or_else(malformed)?;
    if chrom.is_empty() {
        return Err(malformed());
    }
    let parse_bound = |text: &str| -> Result<u32, RegionError> {
        text.trim().parse().map_err(|_| RegionError::BadBound{
            spec: spec.to_string(),
            value: text.to_string(),
        })
    };
    let start_pos = parse_bound(start_text)?;
    let end_pos = parse_bound(end_text)?;

    let mut start_idx = None;
    let mut end_idx = 0u32;
    let mut in_block = false;
    for vidx in 0..meta.variant_ct() {
        if meta.chrom(vidx)? != chrom {
            if in_block {
                break; // Left the chrom block; nothing further can match.
            }
            continue;
        }
        in_block = true;
        let pos = meta.pos(vidx)?;
        if pos > end_pos {
            break; // Positions are sorted within the block.
        }
        if pos >= start_pos {
            start_idx.get_or_insert(vidx);
            end_idx = vidx + 1;
        }
    }

    let range = match start_idx {
        Some(start) => VariantRange{start, end: end_idx},
        None => VariantRange::empty(),
    };
    debug!("Region '{spec}' resolved to variant range [{}, {})", range.start, range.end);
    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn meta(content: &str) -> (tempfile::TempDir, VariantMeta) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("variants.pvar");
        File::create(&path).unwrap().write_all(content.as_bytes()).unwrap();
        let meta = VariantMeta::load(&path).unwrap();
        (dir, meta)
    }

    const THREE_CHROMS: &str = "#CHROM\tPOS\tID\tREF\tALT\n\
        1\t100\trs1\tA\tG\n\
        1\t200\trs2\tA\tG\n\
        1\t300\trs3\tA\tG\n\
        2\t100\trs4\tA\tG\n\
        2\t150\trs5\tA\tG\n\
        3\t100\trs6\tA\tG\n";

    #[test]
    fn interior_match() {
        let (_dir, meta) = meta(THREE_CHROMS);
        assert_eq!(parse_region(&meta, "1:150-300").unwrap(), VariantRange{start: 1, end: 3});
        assert_eq!(parse_region(&meta, "2:100-100").unwrap(), VariantRange{start: 3, end: 4});
        assert_eq!(parse_region(&meta, "3:1-999").unwrap(), VariantRange{start: 5, end: 6});
    }

    #[test]
    fn unmatched_region_is_empty() {
        let (_dir, meta) = meta(THREE_CHROMS);
        assert!(parse_region(&meta, "1:301-999").unwrap().is_empty());
        assert!(parse_region(&meta, "7:1-999").unwrap().is_empty());
        assert!(parse_region(&meta, "2:200-100").unwrap().is_empty());
    }

    #[test]
    fn malformed_specs_are_rejected() {
        let (_dir, meta) = meta(THREE_CHROMS);
        for spec in ["1", "1:100", ":100-200", "1:a-200", "1:100-b", "1:-100-200"] {
            let err = parse_region(&meta, spec).unwrap_err();
            assert!(
                matches!(err, RegionError::Malformed{..} | RegionError::BadBound{..}),
                "spec {spec} gave {err}"
            );
        }
    }

    #[test]
    fn range_helpers() {
        let range = VariantRange::full(10);
        assert_eq!(range.len(), 10);
        assert!(range.contains(0));
        assert!(range.contains(9));
        assert!(!range.contains(10));
        assert!(VariantRange::empty().is_empty());
    }
}
