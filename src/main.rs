use anyhow::Context;
use clap::Parser;
use rusqlite::Connection;
use tracing_subscriber::EnvFilter;

use rgz_catalog::cli::{Cli, Commands};
use rgz_catalog::commands::{
    build_catalog, dump_catalog, import_consensus, import_reference, import_subjects, show_entry,
    show_status,
};
use rgz_catalog::db::Database;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::ImportReference {
        catalog,
        file,
        reference_db,
    } = &cli.command
    {
        return import_reference(*catalog, file, reference_db);
    }

    let conn = Connection::open(&cli.database)
        .with_context(|| format!("Failed to open database: {}", cli.database))?;
    Database::new(&conn).init_schema()?;

    match cli.command {
        Commands::ImportSubjects { file } => {
            import_subjects(&conn, &file)?;
        }
        Commands::ImportConsensus { file, replace } => {
            import_consensus(&conn, &file, replace)?;
        }
        Commands::ImportReference { .. } => {}
        Commands::BuildCatalog { inputs, pipeline } => {
            build_catalog(&conn, &inputs, &pipeline)?;
        }
        Commands::DumpCatalog {
            format,
            min_consensus,
            keep_duplicates,
        } => {
            dump_catalog(&conn, &format, min_consensus, keep_duplicates)?;
        }
        Commands::ShowEntry { catalog_id } => {
            show_entry(&conn, catalog_id)?;
        }
        Commands::Status => {
            show_status(&conn)?;
        }
    }

    Ok(())
}
