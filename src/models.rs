use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Display size of the classification images, in pixels
pub const DISPLAY_SIZE: f64 = 500.0;

/// ATLAS cutouts are always rendered from a 200-pixel frame
const ATLAS_FRAME: f64 = 200.0;

/// Sentinel used by the consensus stage when no IR host was agreed on
pub const NO_IR_PEAK: f64 = -99.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Survey {
    First,
    Atlas,
}

impl Survey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Survey::First => "first",
            Survey::Atlas => "atlas",
        }
    }

    /// FITS file name for a cutout id.
    pub fn image_file_name(&self, image_id: &str) -> String {
        match self {
            Survey::First => format!("{}.fits", image_id),
            Survey::Atlas => format!("{}_radio.fits", image_id),
        }
    }

    /// Map an IR click in display pixels (origin top-left) to a 0-indexed FITS pixel.
    pub fn ir_display_to_fits(&self, x: f64, y: f64, naxis1: usize, naxis2: usize) -> (f64, f64) {
        // 1-indexed FITS coordinates first, as the survey tooling defines them
        let (fx, fy) = match self {
            Survey::First => (
                x * naxis1 as f64 / DISPLAY_SIZE,
                1.0 + naxis2 as f64 - y * naxis2 as f64 / DISPLAY_SIZE,
            ),
            Survey::Atlas => (
                x * ATLAS_FRAME / DISPLAY_SIZE,
                ATLAS_FRAME - y * ATLAS_FRAME / DISPLAY_SIZE,
            ),
        };
        (fx - 1.0, fy - 1.0)
    }
}

impl std::fmt::Display for Survey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a subject sits in the catalog run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectStatus {
    Pending,
    InProgress,
    Done,
}

impl SubjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectStatus::Pending => "Pending",
            SubjectStatus::InProgress => "In progress",
            SubjectStatus::Done => "Done",
        }
    }
}

impl std::fmt::Display for SubjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectLocation {
    pub contours: String,
}

/// One classification image, as delivered by the subject source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub zooniverse_id: String,
    pub location: SubjectLocation,
}

/// One human-agreed grouping of radio components within a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusRecord {
    pub zooniverse_id: String,
    pub label: String,
    #[serde(default)]
    pub n_votes: u32,
    #[serde(default)]
    pub n_total: u32,
    #[serde(default)]
    pub n_ir: u32,
    #[serde(default)]
    pub ir_flag: i32,
    #[serde(default)]
    pub ir_level: f64,
    #[serde(default)]
    pub consensus_level: f64,
    #[serde(default = "no_ir_peak")]
    pub ir_peak: [f64; 2],
    #[serde(default)]
    pub bbox: Vec<[f64; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atlas_id: Option<String>,
}

fn no_ir_peak() -> [f64; 2] {
    [NO_IR_PEAK, NO_IR_PEAK]
}

impl ConsensusRecord {
    pub fn image_id(&self, survey: Survey) -> Option<&str> {
        match survey {
            Survey::First => self.first_id.as_deref(),
            Survey::Atlas => self.atlas_id.as_deref(),
        }
    }

    /// IR host click in display pixels, or `None` for the no-host sentinel.
    pub fn ir_peak(&self) -> Option<(f64, f64)> {
        if self.ir_peak[0] == NO_IR_PEAK {
            None
        } else {
            Some((self.ir_peak[0], self.ir_peak[1]))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusBlock {
    pub n_radio: u32,
    pub n_total: u32,
    pub n_ir: u32,
    pub ir_flag: i32,
    pub ir_level: f64,
    pub radio_level: f64,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ir_ra: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ir_dec: Option<f64>,
}

impl ConsensusBlock {
    pub fn from_record(record: &ConsensusRecord, ir_position: Option<(f64, f64)>) -> Self {
        Self {
            n_radio: record.n_votes,
            n_total: record.n_total,
            n_ir: record.n_ir,
            ir_flag: record.ir_flag,
            ir_level: record.ir_level,
            radio_level: record.consensus_level,
            label: record.label.clone(),
            ir_ra: ir_position.map(|p| p.0),
            ir_dec: ir_position.map(|p| p.1),
        }
    }
}

/// Nearest counterpart in an external catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossMatch {
    pub designation: String,
    pub ra: f64,
    pub dec: f64,
    pub separation_arcsec: f64,
    pub number_matches: u32,
    /// Photometry, uncertainties and redshifts, keyed by catalog column name
    #[serde(flatten)]
    pub properties: BTreeMap<String, f64>,
}

impl CrossMatch {
    /// Spectroscopic redshift when present, photometric otherwise.
    pub fn redshift(&self) -> Option<f64> {
        self.properties
            .get("spec_redshift")
            .or_else(|| self.properties.get("photo_redshift"))
            .copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentPhysical {
    /// kpc
    pub physical_extent: f64,
    /// kpc²
    pub cross_section: f64,
    /// W/Hz
    pub luminosity: f64,
    pub luminosity_err: f64,
}

/// One connected region of radio emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// mJy
    pub flux: f64,
    pub flux_err: f64,
    /// arcmin
    pub angular_extent: f64,
    /// arcsec²
    pub solid_angle: f64,
    /// degrees, [min, max]
    pub ra_range: [f64; 2],
    pub dec_range: [f64; 2],
    #[serde(default)]
    pub overedge: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical: Option<ComponentPhysical>,
}

impl Component {
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.ra_range[0], self.dec_range[0]),
            (self.ra_range[0], self.dec_range[1]),
            (self.ra_range[1], self.dec_range[0]),
            (self.ra_range[1], self.dec_range[1]),
        ]
    }

    pub fn contains(&self, ra: f64, dec: f64) -> bool {
        self.ra_range[0] <= ra
            && ra <= self.ra_range[1]
            && self.dec_range[0] <= dec
            && dec <= self.dec_range[1]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub ra: f64,
    pub dec: f64,
    /// mJy/beam
    pub flux: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub luminosity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePhysical {
    pub redshift: f64,
    /// kpc
    pub max_physical_extent: f64,
    /// kpc²
    pub total_cross_section: f64,
    /// W/Hz
    pub total_luminosity: f64,
    pub total_luminosity_err: f64,
    pub peak_luminosity_err: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioBlock {
    pub ra: f64,
    pub dec: f64,
    pub total_flux: f64,
    pub total_flux_err: f64,
    /// mJy/beam
    pub outermost_level: f64,
    pub number_components: usize,
    pub number_peaks: usize,
    /// arcmin
    pub max_angular_extent: f64,
    /// arcsec²
    pub total_solid_angle: f64,
    pub peak_flux_err: f64,
    pub peaks: Vec<Peak>,
    pub components: Vec<Component>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical: Option<SourcePhysical>,
}

impl RadioBlock {
    /// Brightest peak falling inside a component's sky box.
    pub fn component_peak(&self, component: &Component) -> Option<&Peak> {
        self.peaks
            .iter()
            .filter(|p| component.contains(p.ra, p.dec))
            .max_by(|a, b| a.flux.total_cmp(&b.flux))
    }

    /// Union of all component sky boxes as (ra_min, ra_max, dec_min, dec_max).
    pub fn sky_box(&self) -> Option<(f64, f64, f64, f64)> {
        let first = self.components.first()?;
        Some(self.components.iter().fold(
            (
                first.ra_range[0],
                first.ra_range[1],
                first.dec_range[0],
                first.dec_range[1],
            ),
            |(ra0, ra1, dec0, dec1), c| {
                (
                    ra0.min(c.ra_range[0]),
                    ra1.max(c.ra_range[1]),
                    dec0.min(c.dec_range[0]),
                    dec1.max(c.dec_range[1]),
                )
            },
        ))
    }
}

/// Back-references to other entries describing the same sky emission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateSources {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exact_duplicate: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub share_components: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_components: Vec<i64>,
    #[serde(
        rename = "WISE_cat_mismatch",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub wise_cat_mismatch: Vec<i64>,
}

/// The unit of catalog output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub catalog_id: i64,
    pub zooniverse_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atlas_id: Option<String>,
    pub consensus: ConsensusBlock,
    #[serde(rename = "AllWISE", default, skip_serializing_if = "Option::is_none")]
    pub allwise: Option<CrossMatch>,
    #[serde(rename = "SDSS", default, skip_serializing_if = "Option::is_none")]
    pub sdss: Option<CrossMatch>,
    #[serde(rename = "SWIRE", default, skip_serializing_if = "Option::is_none")]
    pub swire: Option<CrossMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radio: Option<RadioBlock>,
    #[serde(default)]
    pub overedge: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgz_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_sources: Option<DuplicateSources>,
}

impl CatalogEntry {
    pub fn components(&self) -> &[Component] {
        self.radio
            .as_ref()
            .map(|r| r.components.as_slice())
            .unwrap_or(&[])
    }

    pub fn duplicates_mut(&mut self) -> &mut DuplicateSources {
        self.duplicate_sources.get_or_insert_with(DuplicateSources::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(ra: [f64; 2], dec: [f64; 2]) -> Component {
        Component {
            flux: 1.0,
            flux_err: 0.1,
            angular_extent: 0.5,
            solid_angle: 10.0,
            ra_range: ra,
            dec_range: dec,
            overedge: false,
            physical: None,
        }
    }

    #[test]
    fn test_subject_status_labels() {
        assert_eq!(SubjectStatus::Pending.as_str(), "Pending");
        assert_eq!(SubjectStatus::InProgress.as_str(), "In progress");
        assert_eq!(SubjectStatus::Done.to_string(), "Done");
        assert_eq!(format!("{:<6}|", SubjectStatus::Done), "Done  |");
    }

    #[test]
    fn test_consensus_record_defaults_and_sentinel() {
        let json = r#"{"zooniverse_id":"ARG0003f9l","label":"a","first_id":"FIRSTJ1","ir_peak":[-99,-99],"bbox":[[1,2,3,4]]}"#;
        let record: ConsensusRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.ir_peak(), None);
        assert_eq!(record.image_id(Survey::First), Some("FIRSTJ1"));
        assert_eq!(record.image_id(Survey::Atlas), None);
        assert_eq!(record.bbox, vec![[1.0, 2.0, 3.0, 4.0]]);

        let missing: ConsensusRecord =
            serde_json::from_str(r#"{"zooniverse_id":"z","label":"b"}"#).unwrap();
        assert_eq!(missing.ir_peak(), None);
    }

    #[test]
    fn test_ir_display_to_fits_first() {
        // Display centre of a 132-pixel cutout
        let (x, y) = Survey::First.ir_display_to_fits(250.0, 250.0, 132, 132);
        assert!((x - 65.0).abs() < 1e-12);
        assert!((y - 66.0).abs() < 1e-12);
    }

    #[test]
    fn test_ir_display_to_fits_atlas() {
        let (x, y) = Survey::Atlas.ir_display_to_fits(500.0, 0.0, 300, 300);
        assert!((x - 199.0).abs() < 1e-12);
        assert!((y - 199.0).abs() < 1e-12);
    }

    #[test]
    fn test_entry_omits_absent_blocks() {
        let entry = CatalogEntry {
            catalog_id: 3,
            zooniverse_id: "ARG00000sl".to_string(),
            first_id: Some("FIRSTJ1".to_string()),
            atlas_id: None,
            consensus: ConsensusBlock::from_record(
                &serde_json::from_str(r#"{"zooniverse_id":"ARG00000sl","label":"a"}"#).unwrap(),
                None,
            ),
            allwise: None,
            sdss: None,
            swire: None,
            radio: None,
            overedge: false,
            rgz_name: None,
            duplicate_sources: None,
        };
        let value = serde_json::to_value(&entry).unwrap();
        let object = value.as_object().unwrap();
        for absent in ["AllWISE", "SDSS", "SWIRE", "radio", "duplicate_sources", "atlas_id"] {
            assert!(!object.contains_key(absent), "{} should be omitted", absent);
        }
        assert!(!object["consensus"].as_object().unwrap().contains_key("ir_ra"));

        let back: CatalogEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_duplicate_sources_wire_names() {
        let dups = DuplicateSources {
            wise_cat_mismatch: vec![4],
            ..Default::default()
        };
        let json = serde_json::to_string(&dups).unwrap();
        assert_eq!(json, r#"{"WISE_cat_mismatch":[4]}"#);
    }

    #[test]
    fn test_cross_match_redshift_preference() {
        let mut properties = BTreeMap::new();
        properties.insert("photo_redshift".to_string(), 0.3);
        let mut m = CrossMatch {
            designation: "1237".to_string(),
            ra: 1.0,
            dec: 2.0,
            separation_arcsec: 0.4,
            number_matches: 1,
            properties,
        };
        assert_eq!(m.redshift(), Some(0.3));
        m.properties.insert("spec_redshift".to_string(), 0.25);
        assert_eq!(m.redshift(), Some(0.25));
    }

    #[test]
    fn test_component_peak_and_sky_box() {
        let radio = RadioBlock {
            ra: 0.0,
            dec: 0.0,
            total_flux: 2.0,
            total_flux_err: 0.1,
            outermost_level: 0.5,
            number_components: 2,
            number_peaks: 3,
            max_angular_extent: 1.0,
            total_solid_angle: 20.0,
            peak_flux_err: 0.15,
            peaks: vec![
                Peak { ra: 10.1, dec: 5.1, flux: 3.0, luminosity: None },
                Peak { ra: 10.2, dec: 5.2, flux: 7.0, luminosity: None },
                Peak { ra: 11.5, dec: 5.5, flux: 9.0, luminosity: None },
            ],
            components: vec![
                component([10.0, 10.5], [5.0, 5.3]),
                component([11.0, 12.0], [4.9, 6.0]),
            ],
            physical: None,
        };
        let brightest = radio.component_peak(&radio.components[0]).unwrap();
        assert_eq!(brightest.flux, 7.0);
        assert_eq!(radio.sky_box(), Some((10.0, 12.0, 4.9, 6.0)));
    }
}
