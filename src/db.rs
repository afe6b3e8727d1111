use crate::crossmatch::{ReferenceCatalog, ReferenceSource};
use crate::duplicates::{self, DuplicateRelation};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{CatalogEntry, ConsensusRecord, Subject, SubjectLocation, SubjectStatus};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS radio_subjects (
    position INTEGER PRIMARY KEY AUTOINCREMENT,
    zooniverse_id TEXT NOT NULL UNIQUE,
    contours_url TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS consensus (
    zooniverse_id TEXT NOT NULL,
    label TEXT NOT NULL,
    document TEXT NOT NULL,
    UNIQUE (zooniverse_id, label)
);
CREATE TABLE IF NOT EXISTS catalog (
    catalog_id INTEGER PRIMARY KEY,
    zooniverse_id TEXT NOT NULL,
    label TEXT NOT NULL,
    ra_min REAL,
    ra_max REAL,
    dec_min REAL,
    dec_max REAL,
    document TEXT NOT NULL,
    UNIQUE (zooniverse_id, label)
);
CREATE INDEX IF NOT EXISTS catalog_dec ON catalog (dec_min, dec_max);
CREATE TABLE IF NOT EXISTS run_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS reference_sources (
    catalog TEXT NOT NULL,
    designation TEXT NOT NULL,
    ra REAL NOT NULL,
    dec REAL NOT NULL,
    properties TEXT NOT NULL,
    UNIQUE (catalog, designation)
);
CREATE INDEX IF NOT EXISTS reference_position ON reference_sources (catalog, dec);
";

const SUBJECT_IN_PROGRESS: &str = "subject_in_progress";
pub const LAST_RUN_STARTED: &str = "last_run_started";

/// Subject counts by catalog status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
}

/// Database access layer for the catalog store
pub struct Database<'a> {
    conn: &'a Connection,
}

impl<'a> Database<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Database { conn }
    }

    pub fn init_schema(&self) -> PipelineResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // Subject queries
    pub fn insert_subject(&self, subject: &Subject) -> PipelineResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO radio_subjects (zooniverse_id, contours_url) VALUES (?, ?)",
            params![subject.zooniverse_id, subject.location.contours],
        )?;
        Ok(inserted > 0)
    }

    /// Subjects with the given ids, in delivery order.
    pub fn subjects_in_order(&self, ids: &HashSet<String>) -> PipelineResult<Vec<Subject>> {
        let mut stmt = self.conn.prepare(
            "SELECT zooniverse_id, contours_url FROM radio_subjects ORDER BY position",
        )?;

        let subjects = stmt
            .query_map([], |row| {
                Ok(Subject {
                    zooniverse_id: row.get(0)?,
                    location: SubjectLocation {
                        contours: row.get(1)?,
                    },
                })
            })?
            .filter(|s| s.as_ref().map_or(true, |s| ids.contains(&s.zooniverse_id)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(subjects)
    }

    // Consensus queries
    pub fn upsert_consensus(&self, record: &ConsensusRecord) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO consensus (zooniverse_id, label, document) VALUES (?, ?, ?)",
            params![
                record.zooniverse_id,
                record.label,
                serde_json::to_string(record)?
            ],
        )?;
        Ok(())
    }

    pub fn clear_consensus(&self) -> PipelineResult<usize> {
        Ok(self.conn.execute("DELETE FROM consensus", [])?)
    }

    pub fn consensus_for_subject(
        &self,
        zooniverse_id: &str,
    ) -> PipelineResult<Vec<ConsensusRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT document FROM consensus WHERE zooniverse_id = ? ORDER BY rowid")?;

        let documents = stmt
            .query_map([zooniverse_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        documents
            .iter()
            .map(|doc| Ok(serde_json::from_str(doc)?))
            .collect()
    }

    /// Subjects with consensus but no catalog entry yet.
    pub fn subjects_to_complete(&self) -> PipelineResult<HashSet<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT zooniverse_id FROM consensus
             WHERE zooniverse_id NOT IN (SELECT zooniverse_id FROM catalog)",
        )?;

        let mut ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;

        if let Some(in_progress) = self.subject_in_progress()? {
            ids.insert(in_progress);
        }
        Ok(ids)
    }

    pub fn status_counts(&self) -> PipelineResult<StatusCounts> {
        let in_progress = self.subject_in_progress()?;
        let mut stmt = self.conn.prepare(
            "SELECT s.zooniverse_id,
                    EXISTS (SELECT 1 FROM catalog c WHERE c.zooniverse_id = s.zooniverse_id)
             FROM radio_subjects s
             WHERE EXISTS (SELECT 1 FROM consensus k WHERE k.zooniverse_id = s.zooniverse_id)",
        )?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = StatusCounts::default();
        for (id, has_entries) in rows {
            let status = if in_progress.as_deref() == Some(id.as_str()) {
                SubjectStatus::InProgress
            } else if has_entries {
                SubjectStatus::Done
            } else {
                SubjectStatus::Pending
            };
            match status {
                SubjectStatus::Pending => counts.pending += 1,
                SubjectStatus::InProgress => counts.in_progress += 1,
                SubjectStatus::Done => counts.done += 1,
            }
        }
        Ok(counts)
    }

    // Catalog queries
    pub fn max_catalog_id(&self) -> PipelineResult<i64> {
        let max: Option<i64> =
            self.conn
                .query_row("SELECT MAX(catalog_id) FROM catalog", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0))
    }

    pub fn count_entries(&self) -> PipelineResult<usize> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM catalog", [], |row| row.get(0))?)
    }

    pub fn entry_exists(&self, zooniverse_id: &str, label: &str) -> PipelineResult<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM catalog WHERE zooniverse_id = ? AND label = ?)",
            params![zooniverse_id, label],
            |row| row.get(0),
        )?)
    }

    pub fn get_entry(&self, catalog_id: i64) -> PipelineResult<Option<CatalogEntry>> {
        read_entry(self.conn, catalog_id)
    }

    pub fn all_entries(&self) -> PipelineResult<Vec<CatalogEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT document FROM catalog ORDER BY catalog_id")?;

        let documents = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        documents
            .iter()
            .map(|doc| Ok(serde_json::from_str(doc)?))
            .collect()
    }

    /// Entries from other subjects whose sky box intersects `entry`'s.
    pub fn overlapping_entries(&self, entry: &CatalogEntry) -> PipelineResult<Vec<CatalogEntry>> {
        let Some((ra_min, ra_max, dec_min, dec_max)) =
            entry.radio.as_ref().and_then(|r| r.sky_box())
        else {
            return Ok(Vec::new());
        };

        let mut stmt = self.conn.prepare(
            "SELECT document FROM catalog
             WHERE zooniverse_id != ?
               AND ra_min <= ? AND ra_max >= ?
               AND dec_min <= ? AND dec_max >= ?
             ORDER BY catalog_id",
        )?;

        let documents = stmt
            .query_map(
                params![entry.zooniverse_id, ra_max, ra_min, dec_max, dec_min],
                |row| row.get::<_, String>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        documents
            .iter()
            .map(|doc| Ok(serde_json::from_str(doc)?))
            .collect()
    }

    /// Insert a new entry together with its duplicate back-references.
    pub fn commit_entry(
        &self,
        entry: &CatalogEntry,
        links: &[(i64, DuplicateRelation)],
    ) -> PipelineResult<()> {
        self.with_transaction(|tx| {
            write_entry(tx, entry, true)?;
            for &(prior_id, relation) in links {
                link_in(tx, entry.catalog_id, prior_id, relation)?;
            }
            Ok(())
        })
    }

    // Run state
    pub fn get_state(&self, key: &str) -> PipelineResult<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM run_state WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    pub fn set_state(&self, key: &str, value: Option<&str>) -> PipelineResult<()> {
        match value {
            Some(value) => self.conn.execute(
                "INSERT OR REPLACE INTO run_state (key, value) VALUES (?, ?)",
                params![key, value],
            )?,
            None => self
                .conn
                .execute("DELETE FROM run_state WHERE key = ?", [key])?,
        };
        Ok(())
    }

    pub fn subject_in_progress(&self) -> PipelineResult<Option<String>> {
        self.get_state(SUBJECT_IN_PROGRESS)
    }

    pub fn set_subject_in_progress(&self, zooniverse_id: Option<&str>) -> PipelineResult<()> {
        self.set_state(SUBJECT_IN_PROGRESS, zooniverse_id)
    }

    // Reference catalogs
    pub fn insert_reference(
        &self,
        catalog: ReferenceCatalog,
        source: &ReferenceSource,
    ) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO reference_sources (catalog, designation, ra, dec, properties)
             VALUES (?, ?, ?, ?, ?)",
            params![
                catalog.as_str(),
                source.designation,
                source.ra,
                source.dec,
                serde_json::to_string(&source.properties)?
            ],
        )?;
        Ok(())
    }

    /// Reference rows inside the RA/Dec box circumscribing a cone of `radius_deg`.
    pub fn reference_box(
        &self,
        catalog: ReferenceCatalog,
        ra: f64,
        dec: f64,
        radius_deg: f64,
    ) -> PipelineResult<Vec<ReferenceSource>> {
        let cos_dec = dec.to_radians().cos().max(1e-6);
        let ra_half_width = (radius_deg / cos_dec).min(180.0);

        let mut stmt = self.conn.prepare(
            "SELECT designation, ra, dec, properties FROM reference_sources
             WHERE catalog = ? AND dec BETWEEN ? AND ?",
        )?;

        let rows = stmt
            .query_map(
                params![catalog.as_str(), dec - radius_deg, dec + radius_deg],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut sources = Vec::new();
        for (designation, source_ra, source_dec, properties) in rows {
            let dra = (source_ra - ra + 180.0).rem_euclid(360.0) - 180.0;
            if dra.abs() > ra_half_width {
                continue;
            }
            sources.push(ReferenceSource {
                designation,
                ra: source_ra,
                dec: source_dec,
                properties: serde_json::from_str(&properties)?,
            });
        }
        Ok(sources)
    }

    // Transaction helpers
    pub fn with_transaction<T, F>(&self, f: F) -> PipelineResult<T>
    where
        F: FnOnce(&rusqlite::Transaction) -> PipelineResult<T>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

fn link_in(
    conn: &Connection,
    new_id: i64,
    prior_id: i64,
    relation: DuplicateRelation,
) -> PipelineResult<()> {
    let (Some(mut new), Some(mut prior)) = (read_entry(conn, new_id)?, read_entry(conn, prior_id)?)
    else {
        return Err(PipelineError::Other(format!(
            "cannot link missing entries {} and {}",
            new_id, prior_id
        )));
    };

    if relation == DuplicateRelation::ExactDuplicate {
        let group = duplicates::exact_group(&new, &prior);
        for &member in &group {
            let mut entry = if member == new_id {
                new.clone()
            } else if member == prior_id {
                prior.clone()
            } else {
                match read_entry(conn, member)? {
                    Some(entry) => entry,
                    None => continue,
                }
            };
            duplicates::record_exact_group(&mut entry, &group);
            write_entry(conn, &entry, false)?;
        }
    } else {
        duplicates::record_pair(&mut new, &mut prior, relation);
        write_entry(conn, &new, false)?;
        write_entry(conn, &prior, false)?;
    }
    Ok(())
}

fn read_entry(conn: &Connection, catalog_id: i64) -> PipelineResult<Option<CatalogEntry>> {
    let document: Option<String> = conn
        .query_row(
            "SELECT document FROM catalog WHERE catalog_id = ?",
            [catalog_id],
            |row| row.get(0),
        )
        .optional()?;
    match document {
        Some(doc) => Ok(Some(serde_json::from_str(&doc)?)),
        None => Ok(None),
    }
}

fn write_entry(conn: &Connection, entry: &CatalogEntry, insert: bool) -> PipelineResult<()> {
    let document = serde_json::to_string(entry)?;
    if insert {
        let sky_box = entry.radio.as_ref().and_then(|r| r.sky_box());
        conn.execute(
            "INSERT INTO catalog
                (catalog_id, zooniverse_id, label, ra_min, ra_max, dec_min, dec_max, document)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                entry.catalog_id,
                entry.zooniverse_id,
                entry.consensus.label,
                sky_box.map(|b| b.0),
                sky_box.map(|b| b.1),
                sky_box.map(|b| b.2),
                sky_box.map(|b| b.3),
                document
            ],
        )?;
    } else {
        conn.execute(
            "UPDATE catalog SET document = ? WHERE catalog_id = ?",
            params![document, entry.catalog_id],
        )?;
    }
    Ok(())
}
