use clap::{Parser, Subcommand, ValueEnum};
use std::time::Duration;

use crate::crossmatch::ReferenceCatalog;
use crate::fetch::RetryPolicy;
use crate::models::Survey;
use crate::morphology::EdgeTolerance;
use crate::pipeline::PipelineConfig;
use crate::radio_image::DEFAULT_BEAM_ARCSEC;

#[derive(Parser)]
#[command(name = "rgz-catalog")]
#[command(about = "Build the Radio Galaxy Zoo source catalog from consensus classifications", long_about = None)]
pub struct Cli {
    #[arg(short, long, default_value = "rgz_catalog.sqlite")]
    pub database: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load subject records (one JSON object per line)
    ImportSubjects {
        /// JSONL file with zooniverse_id and location.contours
        file: String,
    },

    /// Load consensus groupings (one JSON object per line)
    ImportConsensus {
        file: String,

        /// Drop the existing consensus collection first
        #[arg(long)]
        replace: bool,
    },

    /// Load rows of an external reference catalog
    ImportReference {
        #[arg(value_enum)]
        catalog: ReferenceCatalog,

        /// JSONL file with designation, ra, dec and numeric columns
        file: String,

        /// Reference database to write to
        #[arg(long, default_value = "reference.sqlite")]
        reference_db: String,
    },

    /// Run the merge engine over every subject with uncommitted groupings
    BuildCatalog {
        #[command(flatten)]
        inputs: InputOptions,

        #[command(flatten)]
        pipeline: PipelineOptions,
    },

    /// Export the catalog as a flat table
    DumpCatalog {
        /// Output format (json, csv, table)
        #[arg(short, long, default_value = "table")]
        format: String,

        /// Minimum radio consensus level
        #[arg(long, default_value = "0.0")]
        min_consensus: f64,

        /// Keep every member of an exact-duplicate group
        #[arg(long)]
        keep_duplicates: bool,
    },

    /// Print one catalog entry as JSON
    ShowEntry {
        catalog_id: i64,
    },

    /// Count subjects by catalog status
    Status,
}

#[derive(Parser, Debug, Clone)]
pub struct InputOptions {
    /// Directory of FITS cutouts
    #[arg(long, default_value = "rawdata")]
    pub image_dir: String,

    /// Local cache of contour JSON files, checked before the network
    #[arg(long)]
    pub contour_dir: Option<String>,

    /// Fetch contours from this prefix instead of the subject URL host
    #[arg(long)]
    pub contour_base_url: Option<String>,

    /// Do not fetch contours over HTTP
    #[arg(long)]
    pub offline: bool,

    /// SQLite file with reference catalogs for cross-matching
    #[arg(long)]
    pub reference_db: Option<String>,

    /// HTTP timeout in seconds
    #[arg(long, default_value = "30")]
    pub http_timeout: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DistanceModelChoice {
    /// Flat ΛCDM with Planck 2013 parameters
    Planck13,
    /// Closed-form log-polynomial fit
    Approx,
}

#[derive(Parser, Debug, Clone)]
pub struct PipelineOptions {
    /// Radio survey the image ids refer to
    #[arg(long, value_enum, default_value = "first")]
    pub survey: Survey,

    /// Pixel tolerance for matching contours to consensus boxes
    #[arg(long, default_value = "0.001")]
    pub bbox_tolerance: f64,

    /// Distance from the image edge (pixels) that counts as touching it
    #[arg(long, default_value = "4")]
    pub edge_margin: f64,

    /// Largest first-to-last vertex gap (pixels) of a closed contour
    #[arg(long, default_value = "1")]
    pub edge_gap: f64,

    /// Component sky-box tolerance for duplicate detection (arcsec)
    #[arg(long, default_value = "1.0")]
    pub duplicate_tolerance: f64,

    /// AllWISE search radius (arcsec)
    #[arg(long, default_value = "3.0")]
    pub allwise_radius: f64,

    /// Minimum W1 signal-to-noise for an AllWISE counterpart
    #[arg(long, default_value = "5.0")]
    pub allwise_min_w1snr: f64,

    /// SDSS search radius (arcsec)
    #[arg(long, default_value = "3.0")]
    pub sdss_radius: f64,

    /// SWIRE search radius (arcsec)
    #[arg(long, default_value = "3.0")]
    pub swire_radius: f64,

    /// Attempts per external call before pausing
    #[arg(long, default_value = "5")]
    pub retry_attempts: u32,

    /// Seconds between attempts
    #[arg(long, default_value = "10")]
    pub retry_delay: u64,

    /// Seconds to pause once retries are exhausted
    #[arg(long, default_value = "600")]
    pub resume_delay: u64,

    /// Stop after this many pauses
    #[arg(long)]
    pub max_resumes: Option<u32>,

    /// Distance measure for physical quantities
    #[arg(long, value_enum, default_value = "planck13")]
    pub distance_model: DistanceModelChoice,

    /// Restoring beam FWHM (arcsec) for images without BMAJ/BMIN
    #[arg(long, default_value_t = DEFAULT_BEAM_ARCSEC)]
    pub default_beam: f64,
}

impl PipelineOptions {
    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            survey: self.survey,
            bbox_tolerance_px: self.bbox_tolerance,
            edges: EdgeTolerance {
                margin_px: self.edge_margin,
                max_gap_px: self.edge_gap,
            },
            duplicate_tolerance_arcsec: self.duplicate_tolerance,
            allwise_radius_arcsec: self.allwise_radius,
            allwise_min_w1snr: self.allwise_min_w1snr,
            sdss_radius_arcsec: self.sdss_radius,
            swire_radius_arcsec: self.swire_radius,
            retry: RetryPolicy {
                max_attempts: self.retry_attempts.max(1),
                delay: Duration::from_secs(self.retry_delay),
            },
            resume_delay: Duration::from_secs(self.resume_delay),
            max_resumes: self.max_resumes,
        }
    }
}
