use crate::crossmatch::{ReferenceCatalog, ReferenceSource};
use crate::db::Database;
use crate::models::{ConsensusRecord, Subject};
use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

/// Parse a file holding one JSON document per line. Blank lines are skipped.
pub fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid record", path.display(), index + 1))?;
        records.push(record);
    }
    Ok(records)
}

pub fn import_subjects(conn: &Connection, file: &str) -> Result<()> {
    let subjects: Vec<Subject> = read_json_lines(Path::new(file))?;
    let db = Database::new(conn);

    let added = db.with_transaction(|_| {
        let mut added = 0usize;
        for subject in &subjects {
            if db.insert_subject(subject)? {
                added += 1;
            }
        }
        Ok(added)
    })?;

    info!(file, read = subjects.len(), added, "Imported subjects");
    println!(
        "Imported {} subjects ({} already present)",
        added,
        subjects.len() - added
    );
    Ok(())
}

pub fn import_consensus(conn: &Connection, file: &str, replace: bool) -> Result<()> {
    let records: Vec<ConsensusRecord> = read_json_lines(Path::new(file))?;
    let db = Database::new(conn);

    let removed = db.with_transaction(|_| {
        let removed = if replace { db.clear_consensus()? } else { 0 };
        for record in &records {
            db.upsert_consensus(record)?;
        }
        Ok(removed)
    })?;

    if replace {
        println!("Removed {} existing consensus groupings", removed);
    }
    println!("Imported {} consensus groupings", records.len());
    Ok(())
}

pub fn import_reference(
    catalog: ReferenceCatalog,
    file: &str,
    reference_db: &str,
) -> Result<()> {
    let sources: Vec<ReferenceSource> = read_json_lines(Path::new(file))?;
    let conn = Connection::open(reference_db)
        .with_context(|| format!("Failed to open reference database: {}", reference_db))?;
    let db = Database::new(&conn);
    db.init_schema()?;

    db.with_transaction(|_| {
        for source in &sources {
            db.insert_reference(catalog, source)?;
        }
        Ok(())
    })?;

    println!(
        "Imported {} {} sources into {}",
        sources.len(),
        catalog.as_str(),
        reference_db
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn scratch_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rgz-import-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        Database::new(&conn).init_schema().unwrap();
        conn
    }

    #[test]
    fn test_import_subjects_skips_blank_lines_and_duplicates() {
        let path = scratch_file(
            "subjects.jsonl",
            concat!(
                r#"{"zooniverse_id":"ARG0001","location":{"contours":"http://x/a.json"}}"#,
                "\n\n",
                r#"{"zooniverse_id":"ARG0002","location":{"contours":"http://x/b.json"}}"#,
                "\n",
                r#"{"zooniverse_id":"ARG0001","location":{"contours":"http://x/a.json"}}"#,
                "\n",
            ),
        );
        let conn = memory_db();
        import_subjects(&conn, path.to_str().unwrap()).unwrap();

        let db = Database::new(&conn);
        let ids = ["ARG0001", "ARG0002"].iter().map(|s| s.to_string()).collect();
        let subjects = db.subjects_in_order(&ids).unwrap();
        assert_eq!(subjects.len(), 2);
        assert_eq!(subjects[0].zooniverse_id, "ARG0001");
    }

    #[test]
    fn test_bad_line_reports_position() {
        let path = scratch_file("broken.jsonl", "{\"zooniverse_id\":\"a\",\"label\":\"x\"}\nnot json\n");
        let err = read_json_lines::<ConsensusRecord>(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.jsonl:2"));
    }

    #[test]
    fn test_import_consensus_replace() {
        let first = scratch_file(
            "consensus1.jsonl",
            r#"{"zooniverse_id":"ARG0001","label":"a","first_id":"F1"}"#,
        );
        let second = scratch_file(
            "consensus2.jsonl",
            r#"{"zooniverse_id":"ARG0002","label":"a","first_id":"F2"}"#,
        );
        let conn = memory_db();
        import_consensus(&conn, first.to_str().unwrap(), false).unwrap();
        import_consensus(&conn, second.to_str().unwrap(), true).unwrap();

        let db = Database::new(&conn);
        assert!(db.consensus_for_subject("ARG0001").unwrap().is_empty());
        assert_eq!(db.consensus_for_subject("ARG0002").unwrap().len(), 1);
    }
}
