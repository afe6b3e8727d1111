//! Cross-subject duplicate detection between catalog entries.
//!
//! Relations are stored as id lists on both entries; they only ever grow.

use crate::models::{CatalogEntry, Component};
use crate::wcs::ARCSEC_PER_DEGREE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateRelation {
    /// Same components, same (or no) AllWISE host
    ExactDuplicate,
    /// Same components, different AllWISE hosts
    WiseCatalogMismatch,
    /// Every component of one entry appears in the other
    MatchComponents,
    /// At least one pair of components overlaps on the sky
    ShareComponents,
}

impl DuplicateRelation {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateRelation::ExactDuplicate => "exact_duplicate",
            DuplicateRelation::WiseCatalogMismatch => "WISE_cat_mismatch",
            DuplicateRelation::MatchComponents => "match_components",
            DuplicateRelation::ShareComponents => "share_components",
        }
    }
}

fn ranges_overlap(a: [f64; 2], b: [f64; 2]) -> bool {
    a[0] <= b[1] && b[0] <= a[1]
}

fn boxes_overlap(a: &Component, b: &Component) -> bool {
    ranges_overlap(a.ra_range, b.ra_range) && ranges_overlap(a.dec_range, b.dec_range)
}

/// Sky boxes equal to within `tolerance_arcsec` on every edge.
pub fn same_component(a: &Component, b: &Component, tolerance_arcsec: f64) -> bool {
    let tolerance = tolerance_arcsec / ARCSEC_PER_DEGREE;
    let cos_dec = ((a.dec_range[0] + a.dec_range[1]) / 2.0).to_radians().cos();
    let ra_close = a
        .ra_range
        .iter()
        .zip(b.ra_range.iter())
        .all(|(x, y)| (x - y).abs() * cos_dec <= tolerance);
    let dec_close = a
        .dec_range
        .iter()
        .zip(b.dec_range.iter())
        .all(|(x, y)| (x - y).abs() <= tolerance);
    ra_close && dec_close
}

/// How `new` relates to an entry from another subject, if at all.
pub fn classify(
    new: &CatalogEntry,
    prior: &CatalogEntry,
    tolerance_arcsec: f64,
) -> Option<DuplicateRelation> {
    if new.zooniverse_id == prior.zooniverse_id {
        return None;
    }
    let (a, b) = (new.components(), prior.components());
    if a.is_empty() || b.is_empty() {
        return None;
    }

    let overlapping = a.iter().any(|ca| b.iter().any(|cb| boxes_overlap(ca, cb)));
    if !overlapping {
        return None;
    }

    let covered = |from: &[Component], within: &[Component]| {
        from.iter()
            .filter(|c| within.iter().any(|w| same_component(c, w, tolerance_arcsec)))
            .count()
    };
    let a_matched = covered(a, b);
    let b_matched = covered(b, a);

    if a.len() == b.len() && a_matched == a.len() && b_matched == b.len() {
        let mismatched_hosts = match (&new.allwise, &prior.allwise) {
            (Some(x), Some(y)) => x.designation != y.designation,
            _ => false,
        };
        if mismatched_hosts {
            Some(DuplicateRelation::WiseCatalogMismatch)
        } else {
            Some(DuplicateRelation::ExactDuplicate)
        }
    } else if a_matched == a.len() || b_matched == b.len() {
        Some(DuplicateRelation::MatchComponents)
    } else {
        Some(DuplicateRelation::ShareComponents)
    }
}

fn insert_sorted(list: &mut Vec<i64>, id: i64) {
    if let Err(pos) = list.binary_search(&id) {
        list.insert(pos, id);
    }
}

/// Full membership of the exact-duplicate group containing both entries.
pub fn exact_group(a: &CatalogEntry, b: &CatalogEntry) -> Vec<i64> {
    let mut group = Vec::new();
    for entry in [a, b] {
        insert_sorted(&mut group, entry.catalog_id);
        if let Some(dups) = &entry.duplicate_sources {
            for &id in &dups.exact_duplicate {
                insert_sorted(&mut group, id);
            }
        }
    }
    group
}

/// Merge `group` into an entry's exact-duplicate list.
pub fn record_exact_group(entry: &mut CatalogEntry, group: &[i64]) {
    let list = &mut entry.duplicates_mut().exact_duplicate;
    for &id in group {
        insert_sorted(list, id);
    }
}

/// Record a non-exact relation on both entries.
pub fn record_pair(a: &mut CatalogEntry, b: &mut CatalogEntry, relation: DuplicateRelation) {
    let (a_id, b_id) = (a.catalog_id, b.catalog_id);
    for (entry, other) in [(a, b_id), (b, a_id)] {
        let dups = entry.duplicates_mut();
        let list = match relation {
            DuplicateRelation::ExactDuplicate => &mut dups.exact_duplicate,
            DuplicateRelation::WiseCatalogMismatch => &mut dups.wise_cat_mismatch,
            DuplicateRelation::MatchComponents => &mut dups.match_components,
            DuplicateRelation::ShareComponents => &mut dups.share_components,
        };
        insert_sorted(list, other);
    }
}
