//! Consensus merge engine: turns consensus groupings into committed catalog entries.
//!
//! Each subject is processed to completion under a durable in-progress marker, so
//! a run interrupted at any point resumes with an idempotent re-scan: groupings
//! already in the catalog are skipped and ids continue from the stored maximum.

use rusqlite::Connection;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::contour::{build_trees, ContourDocument};
use crate::cosmology::{apply_physical, DistanceModel};
use crate::crossmatch::{
    lookup, rgz_name_from_designation, rgz_name_from_position, CrossMatcher, MatchRule,
    ReferenceCatalog,
};
use crate::db::{Database, LAST_RUN_STARTED};
use crate::duplicates::classify;
use crate::error::{ContourError, FetchError, PipelineError, PipelineResult};
use crate::fetch::{ContourSource, ImageSource, RetryPolicy};
use crate::models::{
    CatalogEntry, ConsensusBlock, ConsensusRecord, CrossMatch, RadioBlock, Subject, Survey,
};
use crate::morphology::{measure_source, EdgeTolerance};
use crate::radio_image::RadioImage;

/// Configuration for a catalog run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub survey: Survey,
    /// Pixel tolerance when matching contour rings to consensus boxes
    pub bbox_tolerance_px: f64,
    pub edges: EdgeTolerance,
    /// Component sky-box tolerance for duplicate classification
    pub duplicate_tolerance_arcsec: f64,

    pub allwise_radius_arcsec: f64,
    pub allwise_min_w1snr: f64,
    pub sdss_radius_arcsec: f64,
    pub swire_radius_arcsec: f64,

    pub retry: RetryPolicy,
    /// Pause after an external service stays unavailable
    pub resume_delay: Duration,
    /// Give up after this many pause-and-resume cycles
    pub max_resumes: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            survey: Survey::First,
            bbox_tolerance_px: 1e-3,
            edges: EdgeTolerance::default(),
            duplicate_tolerance_arcsec: 1.0,
            allwise_radius_arcsec: 3.0,
            allwise_min_w1snr: 5.0,
            sdss_radius_arcsec: 3.0,
            swire_radius_arcsec: 3.0,
            retry: RetryPolicy::default(),
            resume_delay: Duration::from_secs(600),
            max_resumes: None,
        }
    }
}

impl PipelineConfig {
    fn match_rules(&self) -> Vec<MatchRule> {
        match self.survey {
            Survey::First => vec![
                MatchRule {
                    catalog: ReferenceCatalog::Allwise,
                    radius_arcsec: self.allwise_radius_arcsec,
                    min_property: Some(("w1snr".to_string(), self.allwise_min_w1snr)),
                },
                MatchRule {
                    catalog: ReferenceCatalog::Sdss,
                    radius_arcsec: self.sdss_radius_arcsec,
                    min_property: None,
                },
            ],
            Survey::Atlas => vec![MatchRule {
                catalog: ReferenceCatalog::Swire,
                radius_arcsec: self.swire_radius_arcsec,
                min_property: None,
            }],
        }
    }
}

/// External capabilities the engine calls out to.
pub struct Collaborators<'a> {
    pub contours: &'a dyn ContourSource,
    pub images: &'a dyn ImageSource,
    pub cross_matcher: Option<&'a dyn CrossMatcher>,
    pub distances: &'a dyn DistanceModel,
}

/// Durable run state, read back from the store at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeState {
    pub last_catalog_id: i64,
    pub in_progress: Option<String>,
}

impl MergeState {
    pub fn load(db: &Database) -> PipelineResult<Self> {
        Ok(Self {
            last_catalog_id: db.max_catalog_id()?,
            in_progress: db.subject_in_progress()?,
        })
    }
}

#[derive(Debug, Default)]
struct CrossMatches {
    allwise: Option<CrossMatch>,
    sdss: Option<CrossMatch>,
    swire: Option<CrossMatch>,
}

enum RadioOutcome {
    Measured(RadioBlock),
    Absent,
    /// The geometry broke an invariant; the entry must not be committed
    Abort,
}

pub struct MergeEngine<'a> {
    db: Database<'a>,
    config: &'a PipelineConfig,
    sources: &'a Collaborators<'a>,
    state: MergeState,
}

impl<'a> MergeEngine<'a> {
    pub fn new(
        conn: &'a Connection,
        config: &'a PipelineConfig,
        sources: &'a Collaborators<'a>,
    ) -> PipelineResult<Self> {
        let db = Database::new(conn);
        let state = MergeState::load(&db)?;
        if let Some(subject) = &state.in_progress {
            info!("Resuming interrupted subject {}", subject);
        }
        Ok(Self {
            db,
            config,
            sources,
            state,
        })
    }

    pub fn state(&self) -> &MergeState {
        &self.state
    }

    /// One pass over every subject that still has uncommitted groupings.
    pub fn run_once(&mut self) -> PipelineResult<usize> {
        let pending = self.db.subjects_to_complete()?;
        let subjects = self.db.subjects_in_order(&pending)?;
        if subjects.len() < pending.len() {
            warn!(
                "{} subjects have consensus but no subject record",
                pending.len() - subjects.len()
            );
        }
        info!("{} subjects to complete", subjects.len());

        let mut added = 0;
        for subject in &subjects {
            added += self.process_subject(subject)?;
        }
        Ok(added)
    }

    /// Commit every outstanding grouping of one subject.
    pub fn process_subject(&mut self, subject: &Subject) -> PipelineResult<usize> {
        let zooniverse_id = subject.zooniverse_id.as_str();
        self.db.set_subject_in_progress(Some(zooniverse_id))?;
        self.state.in_progress = Some(zooniverse_id.to_string());

        let records = self.db.consensus_for_subject(zooniverse_id)?;
        let mut contours: Option<Option<ContourDocument>> = None;
        let mut added = 0;

        for record in &records {
            if record.image_id(self.config.survey).is_none() {
                debug!(
                    "{} grouping {} has no {} image",
                    zooniverse_id, record.label, self.config.survey
                );
                continue;
            }
            if self.db.entry_exists(zooniverse_id, &record.label)? {
                debug!("{} grouping {} already in catalog", zooniverse_id, record.label);
                continue;
            }

            if contours.is_none() {
                contours = Some(self.fetch_contours(subject)?);
            }
            let document = contours.as_ref().and_then(|c| c.as_ref());

            match self.build_entry(subject, record, document)? {
                Some(entry) => {
                    let catalog_id = self.commit(entry)?;
                    println!(
                        "Processed entry {} (consensus {} in subject {})",
                        catalog_id, record.label, zooniverse_id
                    );
                    added += 1;
                }
                None => println!(
                    "Skipped consensus {} in subject {}",
                    record.label, zooniverse_id
                ),
            }
        }

        self.db.set_subject_in_progress(None)?;
        self.state.in_progress = None;
        Ok(added)
    }

    fn fetch_contours(&self, subject: &Subject) -> PipelineResult<Option<ContourDocument>> {
        let fetched = self.config.retry.run("contour fetch", || {
            self.sources.contours.fetch(subject)
        });
        let bytes = match fetched {
            Ok(bytes) => bytes,
            Err(FetchError::NotFound(_)) => {
                info!("No radio JSON detected for {}", subject.zooniverse_id);
                return Ok(None);
            }
            Err(FetchError::Transient(msg)) => return Err(PipelineError::ExternalUnavailable(msg)),
            Err(err) => {
                warn!("Contours for {} unavailable: {}", subject.zooniverse_id, err);
                return Ok(None);
            }
        };

        match ContourDocument::from_json(&bytes) {
            Ok(document) => Ok(Some(document)),
            Err(err) => {
                warn!("Ignoring contours for {}: {}", subject.zooniverse_id, err);
                Ok(None)
            }
        }
    }

    /// Assemble one entry. `None` means the grouping was aborted.
    fn build_entry(
        &self,
        subject: &Subject,
        record: &ConsensusRecord,
        document: Option<&ContourDocument>,
    ) -> PipelineResult<Option<CatalogEntry>> {
        let survey = self.config.survey;
        let image = match record.image_id(survey) {
            Some(id) => match self.sources.images.load(survey, id) {
                Ok(image) => Some(image),
                Err(err) => {
                    warn!("Image {} for {} unavailable: {:#}", id, subject.zooniverse_id, err);
                    None
                }
            },
            None => None,
        };

        let ir_position = match (record.ir_peak(), &image) {
            (Some((x, y)), Some(image)) => {
                let (fx, fy) = survey.ir_display_to_fits(x, y, image.width, image.height);
                Some(image.wcs.pixel_to_sky(fx, fy))
            }
            _ => None,
        };

        let matches = match ir_position {
            Some(position) => self.cross_match(position)?,
            None => CrossMatches::default(),
        };

        let mut radio = match (&image, document) {
            (Some(image), Some(document)) => match self.measure_radio(record, image, document) {
                RadioOutcome::Measured(radio) => Some(radio),
                RadioOutcome::Absent => None,
                RadioOutcome::Abort => return Ok(None),
            },
            _ => None,
        };

        if let (Some(radio), Some(z)) = (&mut radio, matches.sdss.as_ref().and_then(|m| m.redshift())) {
            if apply_physical(radio, z, self.sources.distances) {
                debug!("Physical quantities at z = {}", z);
            }
        }

        let rgz_name = matches
            .allwise
            .as_ref()
            .and_then(|m| rgz_name_from_designation(&m.designation))
            .or_else(|| {
                matches
                    .swire
                    .as_ref()
                    .and_then(|m| rgz_name_from_designation(&m.designation))
            })
            .or_else(|| ir_position.map(|(ra, dec)| rgz_name_from_position(ra, dec)))
            .or_else(|| radio.as_ref().map(|r| rgz_name_from_position(r.ra, r.dec)));

        Ok(Some(CatalogEntry {
            catalog_id: 0,
            zooniverse_id: subject.zooniverse_id.clone(),
            first_id: record.first_id.clone(),
            atlas_id: record.atlas_id.clone(),
            consensus: ConsensusBlock::from_record(record, ir_position),
            allwise: matches.allwise,
            sdss: matches.sdss,
            swire: matches.swire,
            overedge: radio
                .as_ref()
                .is_some_and(|r| r.components.iter().any(|c| c.overedge)),
            radio,
            rgz_name,
            duplicate_sources: None,
        }))
    }

    fn measure_radio(
        &self,
        record: &ConsensusRecord,
        image: &RadioImage,
        document: &ContourDocument,
    ) -> RadioOutcome {
        let trees = match build_trees(document, &record.bbox, self.config.bbox_tolerance_px) {
            Ok(trees) => trees,
            Err(ContourError::InvariantViolation(msg)) => {
                error!("Aborting {} grouping {}: {}", record.zooniverse_id, record.label, msg);
                return RadioOutcome::Abort;
            }
            Err(err) => {
                warn!("Contours for {} unusable: {}", record.zooniverse_id, err);
                return RadioOutcome::Absent;
            }
        };

        let outermost = document.outermost_level().unwrap_or(0.0);
        match measure_source(&trees, image, outermost, self.config.edges) {
            Ok(Some(radio)) => RadioOutcome::Measured(radio),
            Ok(None) => {
                info!(
                    "No contour matches the consensus boxes of {} grouping {}",
                    record.zooniverse_id, record.label
                );
                RadioOutcome::Absent
            }
            Err(err) => {
                error!("Aborting {} grouping {}: {}", record.zooniverse_id, record.label, err);
                RadioOutcome::Abort
            }
        }
    }

    fn cross_match(&self, (ra, dec): (f64, f64)) -> PipelineResult<CrossMatches> {
        let mut matches = CrossMatches::default();
        let Some(matcher) = self.sources.cross_matcher else {
            return Ok(matches);
        };

        for rule in self.config.match_rules() {
            let result = self
                .config
                .retry
                .run(rule.catalog.as_str(), || lookup(matcher, &rule, ra, dec));
            let found = match result {
                Ok(found) => found,
                Err(FetchError::Transient(msg)) => {
                    return Err(PipelineError::ExternalUnavailable(msg));
                }
                Err(err) => {
                    warn!("{} cross-match skipped: {}", rule.catalog.as_str(), err);
                    None
                }
            };
            match rule.catalog {
                ReferenceCatalog::Allwise => matches.allwise = found,
                ReferenceCatalog::Sdss => matches.sdss = found,
                ReferenceCatalog::Swire => matches.swire = found,
            }
        }
        Ok(matches)
    }

    /// Allocate the next id and write the entry with its duplicate links.
    fn commit(&mut self, mut entry: CatalogEntry) -> PipelineResult<i64> {
        let catalog_id = self.state.last_catalog_id + 1;
        entry.catalog_id = catalog_id;

        let mut links = Vec::new();
        for prior in self.db.overlapping_entries(&entry)? {
            if let Some(relation) = classify(&entry, &prior, self.config.duplicate_tolerance_arcsec)
            {
                info!(
                    "Entry {} {} entry {}",
                    catalog_id,
                    relation.as_str(),
                    prior.catalog_id
                );
                links.push((prior.catalog_id, relation));
            }
        }

        self.db.commit_entry(&entry, &links)?;
        self.state.last_catalog_id = catalog_id;
        Ok(catalog_id)
    }
}

/// Run the engine to completion, pausing on external outages and re-scanning
/// after store failures. Returns the number of entries added.
pub fn build_catalog(
    conn: &Connection,
    config: &PipelineConfig,
    sources: &Collaborators,
) -> PipelineResult<usize> {
    let start = Instant::now();
    let db = Database::new(conn);
    db.set_state(LAST_RUN_STARTED, Some(&chrono::Utc::now().to_rfc3339()))?;
    let initial = db.count_entries()?;

    let mut resumes = 0u32;
    loop {
        let outcome = MergeEngine::new(conn, config, sources).and_then(|mut engine| engine.run_once());
        let delay = match outcome {
            Ok(_) => break,
            Err(PipelineError::ExternalUnavailable(msg)) => {
                warn!("External service unavailable: {}", msg);
                config.resume_delay
            }
            Err(PipelineError::Store(err)) => {
                warn!("Catalog store error, re-scanning: {}", err);
                config.retry.delay
            }
            Err(err) => return Err(err),
        };

        resumes += 1;
        if config.max_resumes.is_some_and(|max| resumes > max) {
            return Err(PipelineError::Other(format!(
                "giving up after {} resume attempts",
                resumes - 1
            )));
        }
        let resume_at = chrono::Local::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        println!("Paused. Resuming at {}", resume_at.format("%Y-%m-%d %H:%M:%S"));
        std::thread::sleep(delay);
    }

    let added = Database::new(conn).count_entries()?.saturating_sub(initial);
    println!("{} entries added.", added);
    println!("Time taken: {:.1} s", start.elapsed().as_secs_f64());
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::test_support::{document, square_ring};
    use crate::crossmatch::test_support::{source, StaticCatalogs};
    use crate::cosmology::FlatLambdaCdm;
    use crate::models::SubjectLocation;
    use crate::radio_image::test_support::{add_blob, noisy_image};
    use std::cell::Cell;
    use std::collections::HashMap;

    struct StubContours {
        documents: HashMap<String, String>,
        calls: Cell<usize>,
        transient: bool,
    }

    impl ContourSource for StubContours {
        fn fetch(&self, subject: &Subject) -> Result<Vec<u8>, FetchError> {
            self.calls.set(self.calls.get() + 1);
            if self.transient {
                return Err(FetchError::Transient("503".to_string()));
            }
            self.documents
                .get(&subject.zooniverse_id)
                .map(|d| d.clone().into_bytes())
                .ok_or_else(|| FetchError::NotFound(subject.location.contours.clone()))
        }
    }

    struct StubImages;

    impl ImageSource for StubImages {
        fn load(&self, _survey: Survey, image_id: &str) -> anyhow::Result<RadioImage> {
            if image_id == "missing" {
                anyhow::bail!("no such file");
            }
            let mut image = noisy_image(100, 100, 1e-5, 3);
            if image_id == "negative" {
                image.data.iter_mut().for_each(|v| *v = -0.01);
                return Ok(image);
            }
            add_blob(&mut image, 25.0, 25.0, 0.02, 3.0);
            Ok(image)
        }
    }

    fn single_lobe_json() -> String {
        let doc = document(vec![
            vec![square_ring(0.001, 15.0, 15.0, 35.0, 35.0)],
            vec![square_ring(0.004, 20.0, 20.0, 30.0, 30.0)],
        ]);
        serde_json::to_string(&doc).unwrap()
    }

    fn seed(conn: &Connection, subject: &str, record: serde_json::Value) {
        let db = Database::new(conn);
        db.init_schema().unwrap();
        db.insert_subject(&Subject {
            zooniverse_id: subject.to_string(),
            location: SubjectLocation {
                contours: format!("http://host/{}.json", subject),
            },
        })
        .unwrap();
        db.upsert_consensus(&serde_json::from_value(record).unwrap()).unwrap();
    }

    fn quick_config() -> PipelineConfig {
        PipelineConfig {
            retry: RetryPolicy {
                max_attempts: 2,
                delay: Duration::ZERO,
            },
            resume_delay: Duration::ZERO,
            max_resumes: Some(1),
            ..Default::default()
        }
    }

    fn contours_for(subject: &str) -> StubContours {
        StubContours {
            documents: HashMap::from([(subject.to_string(), single_lobe_json())]),
            calls: Cell::new(0),
            transient: false,
        }
    }

    #[test]
    fn test_entry_with_host_and_redshift() {
        let conn = Connection::open_in_memory().unwrap();
        seed(
            &conn,
            "ARG1",
            serde_json::json!({
                "zooniverse_id": "ARG1", "label": "a", "first_id": "F1",
                "n_votes": 8, "n_total": 10, "consensus_level": 0.8,
                "ir_peak": [125.0, 375.0], "bbox": [[35.0, 35.0, 15.0, 15.0]]
            }),
        );

        // IR click at display (125, 375) lands on FITS pixel (24, 25)
        let image = StubImages.load(Survey::First, "F1").unwrap();
        let (ra, dec) = image.wcs.pixel_to_sky(24.0, 25.0);
        let catalogs = StaticCatalogs::default()
            .with(
                ReferenceCatalog::Allwise,
                source("J095959.99+295959.9", ra, dec, &[("w1snr", 20.0)]),
            )
            .with(
                ReferenceCatalog::Sdss,
                source("1237661", ra, dec, &[("spec_redshift", 0.3)]),
            );
        let contours = contours_for("ARG1");
        let cosmology = FlatLambdaCdm::planck13();
        let sources = Collaborators {
            contours: &contours,
            images: &StubImages,
            cross_matcher: Some(&catalogs),
            distances: &cosmology,
        };
        let config = quick_config();

        let mut engine = MergeEngine::new(&conn, &config, &sources).unwrap();
        assert_eq!(engine.run_once().unwrap(), 1);
        assert_eq!(engine.state().last_catalog_id, 1);
        assert_eq!(engine.state().in_progress, None);

        let entry = Database::new(&conn).get_entry(1).unwrap().unwrap();
        assert_eq!(entry.consensus.n_radio, 8);
        assert!((entry.consensus.ir_ra.unwrap() - ra).abs() < 1e-9);
        assert_eq!(entry.rgz_name.as_deref(), Some("RGZJ095959.9+295959"));
        let radio = entry.radio.unwrap();
        assert_eq!(radio.number_components, 1);
        assert_eq!(radio.number_peaks, 1);
        let physical = radio.physical.unwrap();
        assert_eq!(physical.redshift, 0.3);
        assert!(physical.total_luminosity > 0.0);
    }

    #[test]
    fn test_missing_contours_commit_without_radio() {
        let conn = Connection::open_in_memory().unwrap();
        seed(
            &conn,
            "ARG2",
            serde_json::json!({
                "zooniverse_id": "ARG2", "label": "a", "first_id": "F2",
                "ir_peak": [-99, -99], "bbox": [[35.0, 35.0, 15.0, 15.0]]
            }),
        );
        let contours = StubContours {
            documents: HashMap::new(),
            calls: Cell::new(0),
            transient: false,
        };
        let cosmology = FlatLambdaCdm::planck13();
        let sources = Collaborators {
            contours: &contours,
            images: &StubImages,
            cross_matcher: None,
            distances: &cosmology,
        };
        let config = quick_config();

        let mut engine = MergeEngine::new(&conn, &config, &sources).unwrap();
        assert_eq!(engine.run_once().unwrap(), 1);
        // Not found is never retried
        assert_eq!(contours.calls.get(), 1);

        let entry = Database::new(&conn).get_entry(1).unwrap().unwrap();
        assert!(entry.radio.is_none());
        assert!(entry.consensus.ir_ra.is_none());
        assert!(entry.rgz_name.is_none());
        assert!(!entry.overedge);
    }

    #[test]
    fn test_missing_image_omits_radio_and_ir() {
        let conn = Connection::open_in_memory().unwrap();
        seed(
            &conn,
            "ARG3",
            serde_json::json!({
                "zooniverse_id": "ARG3", "label": "a", "first_id": "missing",
                "ir_peak": [125.0, 375.0], "bbox": [[35.0, 35.0, 15.0, 15.0]]
            }),
        );
        let contours = contours_for("ARG3");
        let cosmology = FlatLambdaCdm::planck13();
        let sources = Collaborators {
            contours: &contours,
            images: &StubImages,
            cross_matcher: None,
            distances: &cosmology,
        };
        let config = quick_config();

        let mut engine = MergeEngine::new(&conn, &config, &sources).unwrap();
        engine.run_once().unwrap();
        let entry = Database::new(&conn).get_entry(1).unwrap().unwrap();
        assert!(entry.radio.is_none());
        assert!(entry.consensus.ir_ra.is_none());
    }

    #[test]
    fn test_invariant_violation_aborts_entry() {
        let conn = Connection::open_in_memory().unwrap();
        seed(
            &conn,
            "ARG4",
            serde_json::json!({
                "zooniverse_id": "ARG4", "label": "a", "first_id": "negative",
                "bbox": [[35.0, 35.0, 15.0, 15.0]]
            }),
        );
        let contours = contours_for("ARG4");
        let cosmology = FlatLambdaCdm::planck13();
        let sources = Collaborators {
            contours: &contours,
            images: &StubImages,
            cross_matcher: None,
            distances: &cosmology,
        };
        let config = quick_config();

        let mut engine = MergeEngine::new(&conn, &config, &sources).unwrap();
        assert_eq!(engine.run_once().unwrap(), 0);
        assert_eq!(Database::new(&conn).count_entries().unwrap(), 0);
        assert_eq!(engine.state().last_catalog_id, 0);
    }

    #[test]
    fn test_transient_outage_keeps_subject_in_progress() {
        let conn = Connection::open_in_memory().unwrap();
        seed(
            &conn,
            "ARG5",
            serde_json::json!({
                "zooniverse_id": "ARG5", "label": "a", "first_id": "F5",
                "bbox": [[35.0, 35.0, 15.0, 15.0]]
            }),
        );
        let contours = StubContours {
            documents: HashMap::new(),
            calls: Cell::new(0),
            transient: true,
        };
        let cosmology = FlatLambdaCdm::planck13();
        let sources = Collaborators {
            contours: &contours,
            images: &StubImages,
            cross_matcher: None,
            distances: &cosmology,
        };
        let config = quick_config();

        let mut engine = MergeEngine::new(&conn, &config, &sources).unwrap();
        let err = engine.run_once().unwrap_err();
        assert!(matches!(err, PipelineError::ExternalUnavailable(_)));
        assert_eq!(contours.calls.get(), 2);
        assert_eq!(
            Database::new(&conn).subject_in_progress().unwrap().as_deref(),
            Some("ARG5")
        );

        // One resume allowed, then the run gives up
        let err = build_catalog(&conn, &config, &sources).unwrap_err();
        assert!(matches!(err, PipelineError::Other(_)));
        assert_eq!(contours.calls.get(), 6);
    }

    #[test]
    fn test_atlas_entry_named_from_swire_host() {
        let conn = Connection::open_in_memory().unwrap();
        seed(
            &conn,
            "ARG6",
            serde_json::json!({
                "zooniverse_id": "ARG6", "label": "a", "atlas_id": "A6",
                "ir_peak": [250.0, 250.0], "bbox": [[35.0, 35.0, 15.0, 15.0]]
            }),
        );

        let image = StubImages.load(Survey::Atlas, "A6").unwrap();
        let (fx, fy) = Survey::Atlas.ir_display_to_fits(250.0, 250.0, image.width, image.height);
        let (ra, dec) = image.wcs.pixel_to_sky(fx, fy);
        let catalogs = StaticCatalogs::default().with(
            ReferenceCatalog::Swire,
            source("SWIRE3 J095959.99+295959.9", ra, dec, &[]),
        );
        let contours = contours_for("ARG6");
        let cosmology = FlatLambdaCdm::planck13();
        let sources = Collaborators {
            contours: &contours,
            images: &StubImages,
            cross_matcher: Some(&catalogs),
            distances: &cosmology,
        };
        let config = PipelineConfig {
            survey: Survey::Atlas,
            ..quick_config()
        };

        let mut engine = MergeEngine::new(&conn, &config, &sources).unwrap();
        assert_eq!(engine.run_once().unwrap(), 1);

        let entry = Database::new(&conn).get_entry(1).unwrap().unwrap();
        assert!(entry.allwise.is_none());
        assert_eq!(
            entry.swire.as_ref().map(|m| m.designation.as_str()),
            Some("SWIRE3 J095959.99+295959.9")
        );
        assert_eq!(entry.rgz_name.as_deref(), Some("RGZJ095959.9+295959"));
    }

    #[test]
    fn test_outage_mid_subject_resumes_with_next_id() {
        let conn = Connection::open_in_memory().unwrap();
        seed(
            &conn,
            "ARG7",
            serde_json::json!({
                "zooniverse_id": "ARG7", "label": "a", "first_id": "F7",
                "bbox": [[35.0, 35.0, 15.0, 15.0]]
            }),
        );
        let second: ConsensusRecord = serde_json::from_value(serde_json::json!({
            "zooniverse_id": "ARG7", "label": "b", "first_id": "F7",
            "ir_peak": [125.0, 375.0], "bbox": [[35.0, 35.0, 15.0, 15.0]]
        }))
        .unwrap();
        Database::new(&conn).upsert_consensus(&second).unwrap();

        let contours = contours_for("ARG7");
        let cosmology = FlatLambdaCdm::planck13();
        let config = quick_config();

        // Only grouping b has a host to cross-match, and the catalog is down
        let down = StaticCatalogs {
            fail_with: Some(|| FetchError::Transient("timeout".to_string())),
            ..Default::default()
        };
        let sources = Collaborators {
            contours: &contours,
            images: &StubImages,
            cross_matcher: Some(&down),
            distances: &cosmology,
        };
        let mut engine = MergeEngine::new(&conn, &config, &sources).unwrap();
        let err = engine.run_once().unwrap_err();
        assert!(matches!(err, PipelineError::ExternalUnavailable(_)));

        let db = Database::new(&conn);
        assert_eq!(db.count_entries().unwrap(), 1);
        assert!(db.entry_exists("ARG7", "a").unwrap());
        assert!(!db.entry_exists("ARG7", "b").unwrap());
        assert_eq!(db.subject_in_progress().unwrap().as_deref(), Some("ARG7"));

        let healthy = StaticCatalogs::default();
        let sources = Collaborators {
            cross_matcher: Some(&healthy),
            ..sources
        };
        let mut engine = MergeEngine::new(&conn, &config, &sources).unwrap();
        assert_eq!(engine.state().last_catalog_id, 1);
        assert_eq!(engine.run_once().unwrap(), 1);

        assert_eq!(db.count_entries().unwrap(), 2);
        assert_eq!(db.subject_in_progress().unwrap(), None);
        let first = db.get_entry(1).unwrap().unwrap();
        let resumed = db.get_entry(2).unwrap().unwrap();
        assert_eq!(first.consensus.label, "a");
        assert_eq!(resumed.consensus.label, "b");
        assert!(resumed.consensus.ir_ra.is_some());

        // Nothing left to do
        let mut engine = MergeEngine::new(&conn, &config, &sources).unwrap();
        assert_eq!(engine.run_once().unwrap(), 0);
        assert_eq!(db.count_entries().unwrap(), 2);
    }

    #[test]
    fn test_aborted_grouping_leaves_no_gap_in_ids() {
        let conn = Connection::open_in_memory().unwrap();
        seed(
            &conn,
            "ARG8",
            serde_json::json!({
                "zooniverse_id": "ARG8", "label": "a", "first_id": "negative",
                "bbox": [[35.0, 35.0, 15.0, 15.0]]
            }),
        );
        let good: ConsensusRecord = serde_json::from_value(serde_json::json!({
            "zooniverse_id": "ARG8", "label": "b", "first_id": "F8",
            "bbox": [[35.0, 35.0, 15.0, 15.0]]
        }))
        .unwrap();
        Database::new(&conn).upsert_consensus(&good).unwrap();

        let contours = contours_for("ARG8");
        let cosmology = FlatLambdaCdm::planck13();
        let sources = Collaborators {
            contours: &contours,
            images: &StubImages,
            cross_matcher: None,
            distances: &cosmology,
        };
        let config = quick_config();

        let mut engine = MergeEngine::new(&conn, &config, &sources).unwrap();
        assert_eq!(engine.run_once().unwrap(), 1);
        assert_eq!(engine.state().last_catalog_id, 1);

        let entry = Database::new(&conn).get_entry(1).unwrap().unwrap();
        assert_eq!(entry.consensus.label, "b");
        assert!(Database::new(&conn).get_entry(2).unwrap().is_none());
    }
}
