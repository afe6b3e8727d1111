use crate::db::Database;
use anyhow::Result;
use rusqlite::Connection;

pub fn show_entry(conn: &Connection, catalog_id: i64) -> Result<()> {
    let db = Database::new(conn);
    let entry = db
        .get_entry(catalog_id)?
        .ok_or_else(|| anyhow::anyhow!("No catalog entry with id {}", catalog_id))?;

    println!("{}", serde_json::to_string_pretty(&entry)?);
    Ok(())
}
