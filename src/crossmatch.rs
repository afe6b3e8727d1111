//! Nearest-counterpart lookups against external catalogs, and source naming.

use regex::Regex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::db::Database;
use crate::error::FetchError;
use crate::models::CrossMatch;
use crate::wcs::{angular_separation_arcsec, ARCSEC_PER_DEGREE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum ReferenceCatalog {
    Allwise,
    Sdss,
    Swire,
}

impl ReferenceCatalog {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceCatalog::Allwise => "allwise",
            ReferenceCatalog::Sdss => "sdss",
            ReferenceCatalog::Swire => "swire",
        }
    }
}

/// One row of a reference catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSource {
    pub designation: String,
    pub ra: f64,
    pub dec: f64,
    #[serde(flatten)]
    pub properties: BTreeMap<String, f64>,
}

/// Cone search against an external catalog.
pub trait CrossMatcher {
    /// Every source within `radius_arcsec` of the position; order is unspecified.
    fn cone_search(
        &self,
        catalog: ReferenceCatalog,
        ra: f64,
        dec: f64,
        radius_arcsec: f64,
    ) -> Result<Vec<ReferenceSource>, FetchError>;
}

/// Reference catalogs loaded into a local SQLite file.
pub struct SqliteReferenceCatalog {
    conn: Connection,
}

impl SqliteReferenceCatalog {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

impl CrossMatcher for SqliteReferenceCatalog {
    fn cone_search(
        &self,
        catalog: ReferenceCatalog,
        ra: f64,
        dec: f64,
        radius_arcsec: f64,
    ) -> Result<Vec<ReferenceSource>, FetchError> {
        let db = Database::new(&self.conn);
        let candidates = db
            .reference_box(catalog, ra, dec, radius_arcsec / ARCSEC_PER_DEGREE)
            .map_err(|e| match e {
                crate::error::PipelineError::Store(rusqlite::Error::SqliteFailure(code, _))
                    if matches!(
                        code.code,
                        rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                    ) =>
                {
                    FetchError::Transient(format!("{} reference catalog busy", catalog.as_str()))
                }
                other => FetchError::Permanent(other.to_string()),
            })?;

        Ok(candidates
            .into_iter()
            .filter(|s| angular_separation_arcsec((ra, dec), (s.ra, s.dec)) <= radius_arcsec)
            .collect())
    }
}

/// Search parameters for one catalog.
#[derive(Debug, Clone)]
pub struct MatchRule {
    pub catalog: ReferenceCatalog,
    pub radius_arcsec: f64,
    /// Candidates must have this property strictly above the threshold
    pub min_property: Option<(String, f64)>,
}

impl MatchRule {
    fn accepts(&self, source: &ReferenceSource) -> bool {
        match &self.min_property {
            Some((key, threshold)) => source.properties.get(key).is_some_and(|v| v > threshold),
            None => true,
        }
    }
}

/// Nearest accepted candidate, with the count of accepted candidates in the cone.
pub fn nearest_match(
    candidates: Vec<ReferenceSource>,
    ra: f64,
    dec: f64,
    rule: &MatchRule,
) -> Option<CrossMatch> {
    let accepted: Vec<(f64, ReferenceSource)> = candidates
        .into_iter()
        .filter(|s| rule.accepts(s))
        .map(|s| (angular_separation_arcsec((ra, dec), (s.ra, s.dec)), s))
        .filter(|(sep, _)| *sep <= rule.radius_arcsec)
        .collect();
    let number_matches = accepted.len() as u32;

    let (separation_arcsec, best) = accepted
        .into_iter()
        .min_by(|a, b| a.0.total_cmp(&b.0))?;
    Some(CrossMatch {
        designation: best.designation,
        ra: best.ra,
        dec: best.dec,
        separation_arcsec,
        number_matches,
        properties: best.properties,
    })
}

/// Cone search plus nearest-match selection.
pub fn lookup(
    matcher: &dyn CrossMatcher,
    rule: &MatchRule,
    ra: f64,
    dec: f64,
) -> Result<Option<CrossMatch>, FetchError> {
    let candidates = matcher.cone_search(rule.catalog, ra, dec, rule.radius_arcsec)?;
    Ok(nearest_match(candidates, ra, dec, rule))
}

fn designation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"J(\d{6}\.\d)\d*([+-]\d{6})").expect("designation pattern is valid")
    })
}

/// `RGZJhhmmss.s±ddmmss` from a catalog designation such as `WISEA J103508.04+270650.0`.
pub fn rgz_name_from_designation(designation: &str) -> Option<String> {
    let caps = designation_pattern().captures(designation)?;
    Some(format!("RGZJ{}{}", &caps[1], &caps[2]))
}

/// `RGZJhhmmss.s±ddmmss` from a sky position in degrees.
///
/// RA is rounded to a tenth of a second of time; Dec is truncated to the arcsecond.
pub fn rgz_name_from_position(ra: f64, dec: f64) -> String {
    const TENTHS_PER_DAY: i64 = 24 * 36_000;
    let tenths =
        ((ra.rem_euclid(360.0) / 15.0 * 36_000.0).round() as i64).rem_euclid(TENTHS_PER_DAY);
    let (hours, minutes, seconds, tenth) =
        (tenths / 36_000, tenths / 600 % 60, tenths / 10 % 60, tenths % 10);

    let sign = if dec < 0.0 { '-' } else { '+' };
    let arcsec = (dec.abs() * ARCSEC_PER_DEGREE).floor() as i64;
    let (degrees, arcmin, arcsec) = (arcsec / 3600, arcsec / 60 % 60, arcsec % 60);

    format!(
        "RGZJ{:02}{:02}{:02}.{}{}{:02}{:02}{:02}",
        hours, minutes, seconds, tenth, sign, degrees, arcmin, arcsec
    )
}
