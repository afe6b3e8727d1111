use crate::db::{Database, LAST_RUN_STARTED};
use crate::models::SubjectStatus;
use anyhow::Result;
use rusqlite::Connection;

pub fn show_status(conn: &Connection) -> Result<()> {
    let db = Database::new(conn);
    let counts = db.status_counts()?;

    println!("{:<15} {:>10}", "Status", "Subjects");
    println!("{:-<26}", "");
    for (status, count) in [
        (SubjectStatus::Pending, counts.pending),
        (SubjectStatus::InProgress, counts.in_progress),
        (SubjectStatus::Done, counts.done),
    ] {
        println!("{:<15} {:>10}", status.as_str(), count);
    }

    println!("\nCatalog entries: {}", db.count_entries()?);
    if let Some(subject) = db.subject_in_progress()? {
        println!("Interrupted in subject {}", subject);
    }
    if let Some(started) = db.get_state(LAST_RUN_STARTED)? {
        println!("Last run started: {}", started);
    }
    Ok(())
}
