use crate::db::Database;
use crate::models::CatalogEntry;
use crate::utils::{format_optional, truncate_string};
use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;

/// Placeholder for absent numeric fields in CSV output
const MISSING: &str = "-99";

/// One catalog entry flattened for tabular export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlatRow {
    pub catalog_id: i64,
    pub rgz_name: Option<String>,
    pub zooniverse_id: String,
    pub image_id: Option<String>,
    pub ra: Option<f64>,
    pub dec: Option<f64>,
    pub ir_ra: Option<f64>,
    pub ir_dec: Option<f64>,
    pub ir_flag: i32,
    pub n_total: u32,
    pub n_radio: u32,
    pub n_ir: u32,
    pub radio_level: f64,
    pub ir_level: f64,
    pub number_components: Option<usize>,
    pub number_peaks: Option<usize>,
    pub max_angular_extent: Option<f64>,
    pub total_solid_angle: Option<f64>,
    pub outermost_level: Option<f64>,
    pub total_flux: Option<f64>,
    pub total_flux_err: Option<f64>,
    pub peak_flux_err: Option<f64>,
    /// Brightest peak inside each component's sky box, in component order
    pub component_peak_fluxes: Vec<Option<f64>>,
    pub component_peak_ras: Vec<Option<f64>>,
    pub component_peak_decs: Vec<Option<f64>>,
    pub redshift: Option<f64>,
    pub max_physical_extent: Option<f64>,
    pub total_cross_section: Option<f64>,
    pub total_luminosity: Option<f64>,
    pub total_luminosity_err: Option<f64>,
    pub allwise: Option<String>,
    pub sdss: Option<String>,
    pub swire: Option<String>,
    pub overedge: bool,
    pub share_components: Vec<i64>,
    pub match_components: Vec<i64>,
    pub wise_cat_mismatch: Vec<i64>,
}

impl FlatRow {
    fn from_entry(entry: &CatalogEntry, removed: &HashSet<i64>) -> Self {
        let radio = entry.radio.as_ref();
        let physical = radio.and_then(|r| r.physical.as_ref());

        let component_peaks: Vec<Option<(f64, f64, f64)>> = radio
            .map(|r| {
                r.components
                    .iter()
                    .map(|c| r.component_peak(c).map(|p| (p.flux, p.ra, p.dec)))
                    .collect()
            })
            .unwrap_or_default();

        let kept = |ids: Option<&Vec<i64>>| -> Vec<i64> {
            ids.map(|ids| ids.iter().copied().filter(|id| !removed.contains(id)).collect())
                .unwrap_or_default()
        };
        let dups = entry.duplicate_sources.as_ref();

        Self {
            catalog_id: entry.catalog_id,
            rgz_name: entry.rgz_name.clone(),
            zooniverse_id: entry.zooniverse_id.clone(),
            image_id: entry.first_id.clone().or_else(|| entry.atlas_id.clone()),
            ra: radio.map(|r| r.ra),
            dec: radio.map(|r| r.dec),
            ir_ra: entry.consensus.ir_ra,
            ir_dec: entry.consensus.ir_dec,
            ir_flag: entry.consensus.ir_flag,
            n_total: entry.consensus.n_total,
            n_radio: entry.consensus.n_radio,
            n_ir: entry.consensus.n_ir,
            radio_level: entry.consensus.radio_level,
            ir_level: entry.consensus.ir_level,
            number_components: radio.map(|r| r.number_components),
            number_peaks: radio.map(|r| r.number_peaks),
            max_angular_extent: radio.map(|r| r.max_angular_extent),
            total_solid_angle: radio.map(|r| r.total_solid_angle),
            outermost_level: radio.map(|r| r.outermost_level),
            total_flux: radio.map(|r| r.total_flux),
            total_flux_err: radio.map(|r| r.total_flux_err),
            peak_flux_err: radio.map(|r| r.peak_flux_err),
            component_peak_fluxes: component_peaks.iter().map(|p| p.map(|p| p.0)).collect(),
            component_peak_ras: component_peaks.iter().map(|p| p.map(|p| p.1)).collect(),
            component_peak_decs: component_peaks.iter().map(|p| p.map(|p| p.2)).collect(),
            redshift: physical.map(|p| p.redshift),
            max_physical_extent: physical.map(|p| p.max_physical_extent),
            total_cross_section: physical.map(|p| p.total_cross_section),
            total_luminosity: physical.map(|p| p.total_luminosity),
            total_luminosity_err: physical.map(|p| p.total_luminosity_err),
            allwise: entry.allwise.as_ref().map(|m| m.designation.clone()),
            sdss: entry.sdss.as_ref().map(|m| m.designation.clone()),
            swire: entry.swire.as_ref().map(|m| m.designation.clone()),
            overedge: entry.overedge,
            share_components: kept(dups.map(|d| &d.share_components)),
            match_components: kept(dups.map(|d| &d.match_components)),
            wise_cat_mismatch: kept(dups.map(|d| &d.wise_cat_mismatch)),
        }
    }
}

/// Members of exact-duplicate groups other than the lowest id.
pub fn redundant_duplicates(entries: &[CatalogEntry]) -> HashSet<i64> {
    entries
        .iter()
        .filter(|e| {
            e.duplicate_sources
                .as_ref()
                .and_then(|d| d.exact_duplicate.iter().min())
                .is_some_and(|&min| min != e.catalog_id)
        })
        .map(|e| e.catalog_id)
        .collect()
}

pub fn flatten_catalog(
    entries: &[CatalogEntry],
    min_consensus: f64,
    keep_duplicates: bool,
) -> Vec<FlatRow> {
    let removed = if keep_duplicates {
        HashSet::new()
    } else {
        redundant_duplicates(entries)
    };

    entries
        .iter()
        .filter(|e| !removed.contains(&e.catalog_id))
        .filter(|e| e.consensus.radio_level >= min_consensus)
        .map(|e| FlatRow::from_entry(e, &removed))
        .collect()
}

pub fn dump_catalog(
    conn: &Connection,
    format: &str,
    min_consensus: f64,
    keep_duplicates: bool,
) -> Result<()> {
    let db = Database::new(conn);
    let entries = db.all_entries()?;
    let rows = flatten_catalog(&entries, min_consensus, keep_duplicates);

    match format {
        "json" => output_json(&rows)?,
        "csv" => output_csv(&rows)?,
        _ => output_table(&rows)?,
    }

    Ok(())
}

fn output_table(rows: &[FlatRow]) -> Result<()> {
    println!(
        "{:<8} {:<22} {:<12} {:>10} {:>10} {:>6} {:>5} {:>10} {:>8} {:<24} {:>8}",
        "ID", "Name", "Subject", "RA", "Dec", "Cons", "Comp", "Flux", "Extent", "AllWISE", "z"
    );
    println!("{:-<135}", "");

    for row in rows {
        println!(
            "{:<8} {:<22} {:<12} {:>10} {:>10} {:>6.2} {:>5} {:>10} {:>8} {:<24} {:>8}",
            row.catalog_id,
            truncate_string(row.rgz_name.as_deref().unwrap_or(""), 22),
            truncate_string(&row.zooniverse_id, 12),
            format_optional(row.ra, 5),
            format_optional(row.dec, 5),
            row.radio_level,
            row.number_components
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string()),
            format_optional(row.total_flux, 2),
            format_optional(row.max_angular_extent, 3),
            truncate_string(row.allwise.as_deref().unwrap_or(""), 24),
            format_optional(row.redshift, 4),
        );
    }

    println!("\nTotal: {} entries", rows.len());
    Ok(())
}

fn output_json(rows: &[FlatRow]) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(rows)?);
    Ok(())
}

fn csv_number(value: Option<f64>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| MISSING.to_string())
}

fn csv_list<T: ToString>(values: &[T]) -> String {
    if values.is_empty() {
        MISSING.to_string()
    } else {
        let joined: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        format!("\"{}\"", joined.join(";"))
    }
}

fn csv_optional_list(values: &[Option<f64>]) -> String {
    let rendered: Vec<String> = values.iter().map(|v| csv_number(*v)).collect();
    csv_list(&rendered)
}

pub fn csv_header() -> &'static str {
    "catalog_id,rgz_name,zooniverse_id,image_id,radio.ra,radio.dec,consensus.ir_ra,consensus.ir_dec,\
consensus.ir_flag,consensus.n_total,consensus.n_radio,consensus.n_ir,consensus.radio_level,\
consensus.ir_level,radio.number_components,radio.number_peaks,radio.max_angular_extent,\
radio.total_solid_angle,radio.outermost_level,radio.total_flux,radio.total_flux_err,\
radio.peak_flux_err,component.peak_fluxes,component.peak_ras,component.peak_decs,\
radio.redshift,radio.max_physical_extent,radio.total_cross_section,radio.total_luminosity,\
radio.total_luminosity_err,AllWISE.designation,SDSS.designation,SWIRE.designation,overedge,\
duplicate_sources.share_components,duplicate_sources.match_components,\
duplicate_sources.WISE_cat_mismatch"
}

pub fn csv_line(row: &FlatRow) -> String {
    let text = |v: &Option<String>| v.clone().unwrap_or_else(|| MISSING.to_string());
    let count = |v: Option<usize>| v.map(|n| n.to_string()).unwrap_or_else(|| MISSING.to_string());

    [
        row.catalog_id.to_string(),
        text(&row.rgz_name),
        row.zooniverse_id.clone(),
        text(&row.image_id),
        csv_number(row.ra),
        csv_number(row.dec),
        csv_number(row.ir_ra),
        csv_number(row.ir_dec),
        row.ir_flag.to_string(),
        row.n_total.to_string(),
        row.n_radio.to_string(),
        row.n_ir.to_string(),
        row.radio_level.to_string(),
        row.ir_level.to_string(),
        count(row.number_components),
        count(row.number_peaks),
        csv_number(row.max_angular_extent),
        csv_number(row.total_solid_angle),
        csv_number(row.outermost_level),
        csv_number(row.total_flux),
        csv_number(row.total_flux_err),
        csv_number(row.peak_flux_err),
        csv_optional_list(&row.component_peak_fluxes),
        csv_optional_list(&row.component_peak_ras),
        csv_optional_list(&row.component_peak_decs),
        csv_number(row.redshift),
        csv_number(row.max_physical_extent),
        csv_number(row.total_cross_section),
        csv_number(row.total_luminosity),
        csv_number(row.total_luminosity_err),
        text(&row.allwise),
        text(&row.sdss),
        text(&row.swire),
        row.overedge.to_string(),
        csv_list(&row.share_components),
        csv_list(&row.match_components),
        csv_list(&row.wise_cat_mismatch),
    ]
    .join(",")
}

fn output_csv(rows: &[FlatRow]) -> Result<()> {
    println!("{}", csv_header());
    for row in rows {
        println!("{}", csv_line(row));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duplicates::test_support::{component, entry};
    use crate::models::{DuplicateSources, Peak};

    fn with_dups(mut e: CatalogEntry, dups: DuplicateSources) -> CatalogEntry {
        e.duplicate_sources = Some(dups);
        e
    }

    #[test]
    fn test_exact_duplicates_keep_lowest_id() {
        let group = DuplicateSources {
            exact_duplicate: vec![2, 5],
            ..Default::default()
        };
        let entries = vec![
            entry(1, "ARG1", vec![]),
            with_dups(entry(2, "ARG2", vec![]), group.clone()),
            with_dups(
                entry(3, "ARG3", vec![]),
                DuplicateSources {
                    share_components: vec![4, 5],
                    ..Default::default()
                },
            ),
            entry(4, "ARG4", vec![]),
            with_dups(entry(5, "ARG5", vec![]), group),
        ];

        let ids: Vec<i64> = flatten_catalog(&entries, 0.0, false)
            .iter()
            .map(|r| r.catalog_id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);

        let rows = flatten_catalog(&entries, 0.0, false);
        assert_eq!(rows[2].share_components, vec![4]);
        assert_eq!(flatten_catalog(&entries, 0.0, true).len(), 5);
    }

    #[test]
    fn test_min_consensus_filter() {
        let mut strong = entry(1, "ARG1", vec![]);
        strong.consensus.radio_level = 0.9;
        let mut weak = entry(2, "ARG2", vec![]);
        weak.consensus.radio_level = 0.3;
        let rows = flatten_catalog(&[strong, weak], 0.5, false);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].catalog_id, 1);
    }

    #[test]
    fn test_component_peaks_use_brightest_inside_box() {
        let mut e = entry(
            1,
            "ARG1",
            vec![
                component([10.0, 10.1], [5.0, 5.1]),
                component([11.0, 11.1], [5.0, 5.1]),
            ],
        );
        if let Some(radio) = e.radio.as_mut() {
            radio.peaks = vec![
                Peak { ra: 10.05, dec: 5.05, flux: 3.0, luminosity: None },
                Peak { ra: 10.06, dec: 5.06, flux: 8.0, luminosity: None },
            ];
        }
        let row = &flatten_catalog(&[e], 0.0, false)[0];
        assert_eq!(row.component_peak_fluxes, vec![Some(8.0), None]);
        assert_eq!(row.component_peak_ras, vec![Some(10.06), None]);

        let line = csv_line(row);
        assert!(line.contains("\"8;-99\""), "{}", line);
        assert_eq!(
            line.split(',').count(),
            csv_header().split(',').count()
        );
    }

    #[test]
    fn test_csv_line_for_entry_without_radio() {
        let mut e = entry(9, "ARG9", vec![]);
        e.radio = None;
        let row = &flatten_catalog(&[e], 0.0, false)[0];
        let line = csv_line(row);
        assert!(line.starts_with("9,-99,ARG9,-99,-99,-99"), "{}", line);
        assert_eq!(line.split(',').count(), csv_header().split(',').count());
    }
}
