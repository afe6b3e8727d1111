use crate::cli::{DistanceModelChoice, InputOptions, PipelineOptions};
use crate::cosmology::{DistanceModel, FlatLambdaCdm, LogPolynomialApprox};
use crate::crossmatch::{CrossMatcher, SqliteReferenceCatalog};
use crate::db::Database;
use crate::fetch::{FitsDirectory, HttpContourSource, LayeredContourSource, LocalContourDirectory};
use crate::pipeline::{self, Collaborators};
use crate::radio_image::Beam;
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::time::Duration;
use tracing::info;

pub fn build_catalog(
    conn: &Connection,
    inputs: &InputOptions,
    options: &PipelineOptions,
) -> Result<()> {
    let config = options.to_pipeline_config();
    Database::new(conn).init_schema()?;

    if inputs.offline && inputs.contour_dir.is_none() {
        return Err(anyhow::anyhow!(
            "--offline needs --contour-dir to read contours from"
        ));
    }

    let local = inputs.contour_dir.as_ref().map(LocalContourDirectory::new);
    let remote = if inputs.offline {
        None
    } else {
        Some(HttpContourSource::new(
            inputs.contour_base_url.clone(),
            Duration::from_secs(inputs.http_timeout),
        )?)
    };
    let contours = LayeredContourSource::new(local, remote);

    let images = FitsDirectory::new(&inputs.image_dir, Beam::circular_arcsec(options.default_beam));

    let reference = match &inputs.reference_db {
        Some(path) => {
            let conn = Connection::open(path)
                .with_context(|| format!("Failed to open reference database: {}", path))?;
            Some(SqliteReferenceCatalog::new(conn))
        }
        None => {
            info!("No reference database given; skipping cross-matches");
            None
        }
    };

    let distances: Box<dyn DistanceModel> = match options.distance_model {
        DistanceModelChoice::Planck13 => Box::new(FlatLambdaCdm::planck13()),
        DistanceModelChoice::Approx => Box::new(LogPolynomialApprox),
    };

    let sources = Collaborators {
        contours: &contours,
        images: &images,
        cross_matcher: reference.as_ref().map(|r| r as &dyn CrossMatcher),
        distances: distances.as_ref(),
    };

    info!(
        survey = %config.survey,
        image_dir = %inputs.image_dir,
        "Building catalog"
    );
    pipeline::build_catalog(conn, &config, &sources)?;
    Ok(())
}
